//! Cross-verification aggregator: holds the latest full result.
//!
//! The backend recomputes the result from the complete document set each
//! time, so there is nothing to merge: every delivery replaces the last.

use crate::models::CrossVerificationResult;

#[derive(Debug, Clone, Default)]
pub struct CrossVerificationAggregator {
    latest: Option<CrossVerificationResult>,
    placeholder: bool,
}

impl CrossVerificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(result: CrossVerificationResult) -> Self {
        Self {
            latest: Some(result),
            placeholder: true,
        }
    }

    pub fn replace(&mut self, result: CrossVerificationResult) {
        self.latest = Some(result);
        self.placeholder = false;
    }

    pub fn latest(&self) -> Option<&CrossVerificationResult> {
        self.latest.as_ref()
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Presentation hint; false until a result exists.
    pub fn all_documents_uploaded(&self) -> bool {
        self.latest
            .as_ref()
            .map(|r| r.all_documents_uploaded)
            .unwrap_or(false)
    }

    pub fn has_errors(&self) -> bool {
        self.latest.as_ref().map(|r| r.has_errors()).unwrap_or(false)
    }
}
