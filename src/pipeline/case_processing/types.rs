//! Core types for case document processing.
//!
//! These types model the lifecycle:
//! Upload → Processing → Completed/Failed event → Reconciled snapshot →
//! Aggregated validation → Batch notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CaseError;
use crate::models::{
    CaseSnapshot, CrossVerificationResult, DocumentRecord, RawValidationRule, ValidationState,
};

// ═══════════════════════════════════════════
// Processing events (pushed by the backend worker)
// ═══════════════════════════════════════════

/// A processing event for one document of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaseEvent {
    Started {
        case_id: String,
        document_id: String,
    },
    Progress {
        case_id: String,
        document_id: String,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        percent: Option<u8>,
    },
    Completed {
        case_id: String,
        document_id: String,
        #[serde(default)]
        payload: CompletedPayload,
    },
    Failed {
        case_id: String,
        document_id: String,
        #[serde(default)]
        error: Option<String>,
    },
}

impl CaseEvent {
    pub fn case_id(&self) -> &str {
        match self {
            Self::Started { case_id, .. }
            | Self::Progress { case_id, .. }
            | Self::Completed { case_id, .. }
            | Self::Failed { case_id, .. } => case_id,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Self::Started { document_id, .. }
            | Self::Progress { document_id, .. }
            | Self::Completed { document_id, .. }
            | Self::Failed { document_id, .. } => document_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What a `completed` event may carry. Every field is optional: producers
/// send partially populated payloads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletedPayload {
    /// Document-type display name as reported by the worker.
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub document_type_id: Option<String>,
    /// Full case snapshot; when present it replaces local state wholesale.
    #[serde(default)]
    pub case: Option<CaseSnapshot>,
    #[serde(default)]
    pub validations: Vec<RawValidationRule>,
    #[serde(default)]
    pub cross_verification: Option<CrossVerificationResult>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Last reported progress of an in-flight document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Option<String>,
    pub percent: Option<u8>,
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════
// Uploads
// ═══════════════════════════════════════════

/// A file selected by the user for one document type of the case.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub document_type_id: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: &str, document_type_id: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            document_type_id: document_type_id.to_string(),
            bytes,
        }
    }
}

/// A file that passed local checks, ready for the intake API.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedUpload {
    pub file: UploadFile,
    pub mime_type: String,
}

/// Per-file outcome of `upload_files`, in input order.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub results: Vec<Result<DocumentRecord, CaseError>>,
}

impl UploadReport {
    pub fn accepted(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn rejected(&self) -> impl Iterator<Item = &CaseError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn all_accepted(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }
}

// ═══════════════════════════════════════════
// Notification
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailContent {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════
// Session notices (user-visible, non-blocking)
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    UploadRejected,
    ChannelDeliveryFailure,
    ProcessingFailed,
    ReconciliationMiss,
    NotificationFailure,
    ActionRejected,
    UploadAccepted,
    DocumentCompleted,
    BatchCompleted,
    NotificationSent,
    ChannelRestored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionNotice {
    pub kind: NoticeKind,
    pub document_id: Option<String>,
    pub message: String,
    pub requires_action: bool,
}

impl SessionNotice {
    pub fn info(kind: NoticeKind, document_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            document_id: document_id.map(str::to_string),
            message: message.into(),
            requires_action: false,
        }
    }

    pub fn from_error(error: &CaseError) -> Self {
        let (kind, document_id) = match error {
            CaseError::UploadRejected { .. } => (NoticeKind::UploadRejected, None),
            CaseError::ChannelDeliveryFailure(_) => (NoticeKind::ChannelDeliveryFailure, None),
            CaseError::ProcessingFailed { document_id, .. } => {
                (NoticeKind::ProcessingFailed, Some(document_id.clone()))
            }
            CaseError::ReconciliationMiss { document_id } => {
                (NoticeKind::ReconciliationMiss, Some(document_id.clone()))
            }
            CaseError::NotificationFailure(_) => (NoticeKind::NotificationFailure, None),
            CaseError::DocumentNotFound(id) | CaseError::InvalidTransition { document_id: id, .. } => {
                (NoticeKind::ActionRejected, Some(id.clone()))
            }
            CaseError::ActionRejected { .. } | CaseError::SessionClosed => {
                (NoticeKind::ActionRejected, None)
            }
        };
        Self {
            kind,
            document_id,
            message: error.to_string(),
            requires_action: error.requires_action(),
        }
    }
}

// ═══════════════════════════════════════════
// Warm start
// ═══════════════════════════════════════════

/// State handed from a closed session to the next one in the same process.
/// Highest-precedence placeholder at session start.
#[derive(Debug, Clone, Default)]
pub struct SessionSeed {
    pub snapshot: Option<CaseSnapshot>,
    pub validations: Option<ValidationState>,
    pub cross_verification: Option<CrossVerificationResult>,
}
