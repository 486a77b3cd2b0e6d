//! In-memory collaborators for orchestrator and session tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::error::ServiceError;
use super::traits::{CaseService, EventSubscriptions};
use super::types::{AcceptedUpload, MailContent, Receipt};
use crate::models::{
    CaseSnapshot, CrossVerificationResult, DocumentRecord, DocumentStatus, ValidationState,
};

/// Smallest byte string detected as a PDF.
pub fn pdf() -> Vec<u8> {
    b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n".to_vec()
}

#[derive(Default)]
struct MockState {
    case: CaseSnapshot,
    validations: ValidationState,
    cross_verification: CrossVerificationResult,
    refused_files: HashSet<String>,
    fail_status: bool,
    fail_validations: bool,
    intake_down: bool,
    failing_sends: u32,
    created: u32,
    case_fetches: u32,
    validation_fetches: u32,
    cross_fetches: u32,
    sent: u32,
    status_updates: Vec<(String, DocumentStatus)>,
    reupload_requests: Vec<String>,
}

/// Scriptable `CaseService`. Created documents get ids `doc-1`, `doc-2`, ...
pub struct MockCaseService {
    state: Mutex<MockState>,
}

impl MockCaseService {
    pub fn new(case: CaseSnapshot) -> Self {
        Self {
            state: Mutex::new(MockState {
                case,
                ..MockState::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_case(&self, case: CaseSnapshot) {
        self.with(|s| s.case = case);
    }

    pub fn set_validations(&self, validations: ValidationState) {
        self.with(|s| s.validations = validations);
    }

    pub fn set_cross_verification(&self, result: CrossVerificationResult) {
        self.with(|s| s.cross_verification = result);
    }

    pub fn refuse_file(&self, file_name: &str) {
        self.with(|s| {
            s.refused_files.insert(file_name.to_string());
        });
    }

    /// Make `set_status` and `request_reupload` fail.
    pub fn fail_status_calls(&self, fail: bool) {
        self.with(|s| s.fail_status = fail);
    }

    pub fn fail_validation_fetches(&self, fail: bool) {
        self.with(|s| s.fail_validations = fail);
    }

    /// Make `create_document` fail with a 503.
    pub fn set_intake_down(&self, down: bool) {
        self.with(|s| s.intake_down = down);
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.with(|s| s.failing_sends = count);
    }

    pub fn created_count(&self) -> u32 {
        self.with(|s| s.created)
    }

    pub fn case_fetches(&self) -> u32 {
        self.with(|s| s.case_fetches)
    }

    pub fn validation_fetches(&self) -> u32 {
        self.with(|s| s.validation_fetches)
    }

    pub fn cross_fetches(&self) -> u32 {
        self.with(|s| s.cross_fetches)
    }

    pub fn sent_mail_count(&self) -> u32 {
        self.with(|s| s.sent)
    }

    pub fn status_updates(&self) -> Vec<(String, DocumentStatus)> {
        self.with(|s| s.status_updates.clone())
    }

    pub fn reupload_requests(&self) -> Vec<String> {
        self.with(|s| s.reupload_requests.clone())
    }
}

fn unavailable() -> ServiceError {
    ServiceError::Http {
        status: 503,
        body: "unavailable".into(),
    }
}

#[async_trait]
impl CaseService for MockCaseService {
    async fn create_document(
        &self,
        _case_id: &str,
        upload: &AcceptedUpload,
        _management_id: Option<&str>,
    ) -> Result<DocumentRecord, ServiceError> {
        self.with(|s| {
            if s.intake_down {
                return Err(unavailable());
            }
            if s.refused_files.contains(&upload.file.file_name) {
                return Err(ServiceError::Http {
                    status: 422,
                    body: "unreadable".into(),
                });
            }
            s.created += 1;
            let name = s
                .case
                .documents
                .iter()
                .find(|d| d.document_type_id == upload.file.document_type_id)
                .map(|d| d.name.clone())
                .unwrap_or_default();
            Ok(DocumentRecord {
                id: format!("doc-{}", s.created),
                document_type_id: upload.file.document_type_id.clone(),
                name,
                status: DocumentStatus::Pending,
                required: true,
                last_uploaded_at: None,
                file_name: Some(upload.file.file_name.clone()),
            })
        })
    }

    async fn get_case(&self, _case_id: &str) -> Result<CaseSnapshot, ServiceError> {
        self.with(|s| {
            s.case_fetches += 1;
            Ok(s.case.clone())
        })
    }

    async fn get_validations(&self, _case_id: &str) -> Result<ValidationState, ServiceError> {
        self.with(|s| {
            s.validation_fetches += 1;
            if s.fail_validations {
                return Err(unavailable());
            }
            Ok(s.validations.clone())
        })
    }

    async fn get_cross_verification(
        &self,
        _case_id: &str,
    ) -> Result<CrossVerificationResult, ServiceError> {
        self.with(|s| {
            s.cross_fetches += 1;
            Ok(s.cross_verification.clone())
        })
    }

    async fn set_status(
        &self,
        _case_id: &str,
        document_type_id: &str,
        status: DocumentStatus,
    ) -> Result<(), ServiceError> {
        self.with(|s| {
            if s.fail_status {
                return Err(unavailable());
            }
            s.status_updates.push((document_type_id.to_string(), status));
            Ok(())
        })
    }

    async fn request_reupload(
        &self,
        _case_id: &str,
        document_type_id: &str,
    ) -> Result<(), ServiceError> {
        self.with(|s| {
            if s.fail_status {
                return Err(unavailable());
            }
            s.reupload_requests.push(document_type_id.to_string());
            Ok(())
        })
    }

    async fn draft_mail(&self, case_id: &str) -> Result<MailContent, ServiceError> {
        Ok(MailContent {
            subject: format!("Case {case_id} complete"),
            body: "All documents received.".into(),
            recipients: vec!["advisor@example.com".into()],
        })
    }

    async fn send_mail(&self, _mail: &MailContent) -> Result<Receipt, ServiceError> {
        self.with(|s| {
            if s.failing_sends > 0 {
                s.failing_sends -= 1;
                return Err(ServiceError::Connection("smtp".into()));
            }
            s.sent += 1;
            Ok(Receipt {
                message_id: format!("msg-{}", s.sent),
                sent_at: Some(Utc::now()),
            })
        })
    }
}

/// Records subscribe/unsubscribe calls.
#[derive(Default)]
pub struct RecordingSubscriptions {
    calls: Mutex<Vec<(bool, String)>>,
}

impl RecordingSubscriptions {
    pub fn subscribed_count(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| *s).count()
    }

    pub fn unsubscribed(&self, document_id: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|(s, id)| !*s && id == document_id)
    }
}

impl EventSubscriptions for RecordingSubscriptions {
    fn subscribe(&self, document_id: &str) {
        self.calls.lock().unwrap().push((true, document_id.to_string()));
    }

    fn unsubscribe(&self, document_id: &str) {
        self.calls.lock().unwrap().push((false, document_id.to_string()));
    }
}
