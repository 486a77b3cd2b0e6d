use serde::{Deserialize, Serialize};

/// One inconsistency reported by cross-document verification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VerificationIssue {
    #[serde(default)]
    pub field: Option<String>,
    /// Document ids or type ids involved.
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub message: String,
}

/// Result of checking extracted data for consistency across a case's
/// documents. Always recomputed in full by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CrossVerificationResult {
    #[serde(default)]
    pub mismatch_errors: Vec<VerificationIssue>,
    #[serde(default)]
    pub missing_errors: Vec<VerificationIssue>,
    #[serde(default)]
    pub summarization_errors: Vec<VerificationIssue>,
    #[serde(default)]
    pub all_documents_uploaded: bool,
}

impl CrossVerificationResult {
    pub fn error_count(&self) -> usize {
        self.mismatch_errors.len() + self.missing_errors.len() + self.summarization_errors.len()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}
