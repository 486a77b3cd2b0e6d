//! Error types for case document processing.
//!
//! `ServiceError` is what collaborators return; the orchestrator converts it
//! into a `CaseError` at its boundary so aggregation code never sees raw
//! transport failures.

use thiserror::Error;

use crate::models::DocumentStatus;

/// Failures raised by external collaborators (REST, mail).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Cannot connect to {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl ServiceError {
    /// 4xx responses: the service understood and refused.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (400..500).contains(status))
    }
}

/// Why a file never reached the intake pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("file is empty")]
    Empty,

    #[error("unsupported file type {mime_type}")]
    UnsupportedType { mime_type: String },

    #[error("{size_bytes} bytes exceeds the {max_bytes} byte limit")]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("document type {0} is not part of this case")]
    UnknownDocumentType(String),

    #[error("document type {0} is already processing")]
    AlreadyProcessing(String),

    #[error("document type {0} is already uploaded; request a reupload first")]
    AlreadyUploaded(String),

    #[error("intake service refused the file: {0}")]
    Refused(String),

    #[error("intake service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaseError {
    #[error("Upload rejected for {file_name}: {reason}")]
    UploadRejected {
        file_name: String,
        reason: RejectReason,
    },

    #[error("Event channel delivery failure: {0}")]
    ChannelDeliveryFailure(String),

    #[error("Processing failed for document {document_id}: {message}")]
    ProcessingFailed {
        document_id: String,
        message: String,
    },

    #[error("No document matched completed event for {document_id}")]
    ReconciliationMiss { document_id: String },

    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("{action} rejected: {reason}")]
    ActionRejected {
        action: &'static str,
        reason: String,
    },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Cannot {action} document {document_id} while it is {from}")]
    InvalidTransition {
        document_id: String,
        from: String,
        action: &'static str,
    },

    #[error("Case session is closed")]
    SessionClosed,
}

impl CaseError {
    pub(crate) fn invalid_transition(
        document_id: &str,
        from: DocumentStatus,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            document_id: document_id.to_string(),
            from: from.as_str().to_string(),
            action,
        }
    }

    /// Only rejected uploads and failed processing ask the user to act.
    pub fn requires_action(&self) -> bool {
        matches!(self, Self::UploadRejected { .. } | Self::ProcessingFailed { .. })
    }
}
