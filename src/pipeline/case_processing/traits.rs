//! Collaborator seams for the case orchestrator.
//!
//! - CaseService: the backend REST surface (intake, snapshot, validation,
//!   cross-verification, status, mail)
//! - EventSubscriptions: per-document subscription control on the event channel

use async_trait::async_trait;

use super::error::ServiceError;
use super::types::{AcceptedUpload, MailContent, Receipt};
use crate::models::{
    CaseSnapshot, CrossVerificationResult, DocumentRecord, DocumentStatus, ValidationState,
};

#[async_trait]
pub trait CaseService: Send + Sync {
    /// Hand a file to the intake pipeline. The returned record id is the one
    /// processing events will refer to.
    async fn create_document(
        &self,
        case_id: &str,
        upload: &AcceptedUpload,
        management_id: Option<&str>,
    ) -> Result<DocumentRecord, ServiceError>;

    async fn get_case(&self, case_id: &str) -> Result<CaseSnapshot, ServiceError>;

    /// Full validation state, used for backfill.
    async fn get_validations(&self, case_id: &str) -> Result<ValidationState, ServiceError>;

    async fn get_cross_verification(
        &self,
        case_id: &str,
    ) -> Result<CrossVerificationResult, ServiceError>;

    async fn set_status(
        &self,
        case_id: &str,
        document_type_id: &str,
        status: DocumentStatus,
    ) -> Result<(), ServiceError>;

    /// Reset a document type to Pending on the backend.
    async fn request_reupload(
        &self,
        case_id: &str,
        document_type_id: &str,
    ) -> Result<(), ServiceError>;

    async fn draft_mail(&self, case_id: &str) -> Result<MailContent, ServiceError>;

    async fn send_mail(&self, mail: &MailContent) -> Result<Receipt, ServiceError>;
}

/// Subscription control for the push channel. Calls never block and never fail:
/// the channel replays its subscription list on every reconnect.
pub trait EventSubscriptions: Send + Sync {
    fn subscribe(&self, document_id: &str);
    fn unsubscribe(&self, document_id: &str);
}
