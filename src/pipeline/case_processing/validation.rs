//! Validation aggregator: merges partial rule batches per document type.
//!
//! Merge is keyed by rule key within a document type: unseen types are
//! inserted in delivery order, seen types only gain rules whose key is new.
//! Repeated or reordered delivery therefore converges on the same state.
//! The only removal path is `clear_type`, used by the reupload flow.

use serde::Serialize;

use crate::models::{RawValidationBatch, RawValidationRule, ValidationRule, ValidationState};

impl ValidationState {
    /// Merge already-keyed rules for one type. Returns how many were added.
    pub fn merge(&mut self, document_type: &str, incoming: Vec<ValidationRule>) -> usize {
        let existing = self.by_type.entry(document_type.to_string()).or_default();
        let mut added = 0;
        for mut rule in incoming {
            if existing.iter().any(|r| r.rule_key == rule.rule_key) {
                continue;
            }
            rule.document_type = document_type.to_string();
            existing.push(rule);
            added += 1;
        }
        if existing.is_empty() {
            // An empty batch for an unseen type leaves no trace.
            self.by_type.shift_remove(document_type);
        }
        added
    }

    /// Key raw rules and merge them.
    pub fn merge_raw(&mut self, document_type: &str, incoming: Vec<RawValidationRule>) -> usize {
        let rules = incoming
            .into_iter()
            .map(|raw| ValidationRule::from_raw(document_type, raw))
            .collect();
        self.merge(document_type, rules)
    }

    /// Merge every type of another state, in its order.
    pub fn merge_all(&mut self, other: ValidationState) -> usize {
        other
            .by_type
            .into_iter()
            .map(|(document_type, rules)| self.merge(&document_type, rules))
            .sum()
    }

    /// Build a deduplicated state from a backfill payload.
    pub fn from_raw_batch(batch: RawValidationBatch) -> Self {
        let mut state = Self::new();
        for (document_type, rules) in batch {
            state.merge_raw(&document_type, rules);
        }
        state
    }

    /// Remove every rule of one type. Returns how many were removed.
    pub fn clear_type(&mut self, document_type: &str) -> usize {
        self.by_type
            .shift_remove(document_type)
            .map(|rules| rules.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl RuleSummary {
    /// Nothing passed out of at least one rule.
    pub fn is_failure_eligible(&self) -> bool {
        self.total > 0 && self.passed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Empty,
    /// Seeded from a warm session or the durable cache.
    Placeholder,
    /// At least one backend answer has been applied.
    Authoritative,
}

/// Outcome of adopting a REST validation fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    Replaced,
    Merged(usize),
}

#[derive(Debug, Clone)]
pub struct ValidationAggregator {
    state: ValidationState,
    provenance: Provenance,
}

impl Default for ValidationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationAggregator {
    pub fn new() -> Self {
        Self {
            state: ValidationState::new(),
            provenance: Provenance::Empty,
        }
    }

    pub fn seeded(state: ValidationState) -> Self {
        Self {
            state,
            provenance: Provenance::Placeholder,
        }
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Merge rules delivered with a completed event.
    pub fn merge(&mut self, document_type: &str, incoming: Vec<RawValidationRule>) -> usize {
        let added = self.state.merge_raw(document_type, incoming);
        if added > 0 && self.provenance == Provenance::Empty {
            self.provenance = Provenance::Authoritative;
        }
        added
    }

    /// Apply a REST fetch. A placeholder is replaced wholesale; once the
    /// state is authoritative, fetches are merged like any other batch.
    pub fn adopt_fetched(&mut self, fetched: ValidationState) -> Adoption {
        match self.provenance {
            Provenance::Empty | Provenance::Placeholder => {
                self.state = fetched;
                self.provenance = Provenance::Authoritative;
                Adoption::Replaced
            }
            Provenance::Authoritative => Adoption::Merged(self.state.merge_all(fetched)),
        }
    }

    pub fn clear_type(&mut self, document_type: &str) -> usize {
        self.state.clear_type(document_type)
    }

    pub fn summary(&self, document_type: &str) -> RuleSummary {
        let rules = self.state.rules(document_type);
        let passed = rules.iter().filter(|r| r.passed).count();
        RuleSummary {
            total: rules.len(),
            passed,
            failed: rules.len() - passed,
        }
    }

    pub fn is_failure_eligible(&self, document_type: &str) -> bool {
        self.summary(document_type).is_failure_eligible()
    }

    pub fn failure_eligible(&self) -> Vec<&str> {
        self.state
            .document_types()
            .filter(|t| self.is_failure_eligible(t))
            .collect()
    }
}
