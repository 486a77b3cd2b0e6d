use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A validation check as delivered by the backend, before it has a key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawValidationRule {
    #[serde(default, alias = "rule_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "rule", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Any other fields the validator attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single pass/fail check, keyed for deduplication within its document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub document_type: String,
    pub rule_key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ValidationRule {
    pub fn from_raw(document_type: &str, raw: RawValidationRule) -> Self {
        let rule_key = raw.rule_key();
        Self {
            document_type: document_type.to_string(),
            rule_key,
            name: raw.name,
            passed: raw.passed,
            message: raw.message,
            details: raw.extra,
        }
    }
}

impl RawValidationRule {
    /// Explicit id, else rule name, else a structural hash of the payload.
    pub fn rule_key(&self) -> String {
        if let Some(id) = non_blank(self.id.as_deref()) {
            return format!("id:{id}");
        }
        if let Some(name) = non_blank(self.name.as_deref()) {
            return format!("name:{name}");
        }
        format!("hash:{}", self.structural_hash())
    }

    /// SHA-256 over the canonical (key-sorted) JSON of the whole rule.
    pub fn structural_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// Object keys are emitted sorted regardless of how serde_json's Map is
// ordered in this build.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Aggregated validation results: document type → rules, insertion-ordered,
/// rule keys unique per type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationState {
    pub(crate) by_type: IndexMap<String, Vec<ValidationRule>>,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self, document_type: &str) -> &[ValidationRule] {
        self.by_type
            .get(document_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn document_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn contains_type(&self, document_type: &str) -> bool {
        self.by_type.contains_key(document_type)
    }

    /// Total number of rules across all types.
    pub fn rule_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ValidationRule])> {
        self.by_type
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Wire shape of a full validation backfill: type → raw rules.
pub type RawValidationBatch = IndexMap<String, Vec<RawValidationRule>>;
