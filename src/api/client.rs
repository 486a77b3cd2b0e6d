//! reqwest adapter for the case backend REST API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AppConfig;
use crate::models::{
    CaseSnapshot, CrossVerificationResult, DocumentRecord, DocumentStatus, RawValidationBatch,
    ValidationState,
};
use crate::pipeline::case_processing::{
    AcceptedUpload, CaseService, MailContent, Receipt, ServiceError,
};

/// HTTP client for the case backend.
pub struct HttpCaseService {
    base_url: Url,
    client: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct StatusBody {
    status: DocumentStatus,
}

impl HttpCaseService {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ServiceError::Request(format!("invalid base URL {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        Ok(Self {
            base_url,
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(&config.api_base_url, config.request_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Join percent-encoded path segments onto the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::Request(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_connect() {
            ServiceError::Connection(self.base_url.to_string())
        } else if e.is_timeout() {
            ServiceError::Timeout(self.timeout_secs)
        } else {
            ServiceError::Request(e.to_string())
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(|e| self.send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "Case API returned an error status");
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ServiceError> {
        let url = self.endpoint(segments)?;
        let response = self.execute(self.client.get(url)).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl CaseService for HttpCaseService {
    async fn create_document(
        &self,
        case_id: &str,
        upload: &AcceptedUpload,
        management_id: Option<&str>,
    ) -> Result<DocumentRecord, ServiceError> {
        let url = self.endpoint(&["cases", case_id, "documents"])?;
        let part = Part::bytes(upload.file.bytes.clone())
            .file_name(upload.file.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        let mut form = Form::new()
            .part("file", part)
            .text("document_type_id", upload.file.document_type_id.clone());
        if let Some(management_id) = management_id {
            form = form.text("management_id", management_id.to_string());
        }

        let response = self.execute(self.client.post(url).multipart(form)).await?;
        Self::decode(response).await
    }

    async fn get_case(&self, case_id: &str) -> Result<CaseSnapshot, ServiceError> {
        self.get_json(&["cases", case_id]).await
    }

    async fn get_validations(&self, case_id: &str) -> Result<ValidationState, ServiceError> {
        let batch: RawValidationBatch = self.get_json(&["cases", case_id, "validations"]).await?;
        Ok(ValidationState::from_raw_batch(batch))
    }

    async fn get_cross_verification(
        &self,
        case_id: &str,
    ) -> Result<CrossVerificationResult, ServiceError> {
        self.get_json(&["cases", case_id, "cross-verification"]).await
    }

    async fn set_status(
        &self,
        case_id: &str,
        document_type_id: &str,
        status: DocumentStatus,
    ) -> Result<(), ServiceError> {
        let url = self.endpoint(&["cases", case_id, "document-types", document_type_id, "status"])?;
        self.execute(self.client.put(url).json(&StatusBody { status }))
            .await?;
        Ok(())
    }

    async fn request_reupload(
        &self,
        case_id: &str,
        document_type_id: &str,
    ) -> Result<(), ServiceError> {
        let url =
            self.endpoint(&["cases", case_id, "document-types", document_type_id, "reupload"])?;
        self.execute(self.client.post(url)).await?;
        Ok(())
    }

    async fn draft_mail(&self, case_id: &str) -> Result<MailContent, ServiceError> {
        let url = self.endpoint(&["cases", case_id, "mail", "draft"])?;
        let response = self.execute(self.client.post(url)).await?;
        Self::decode(response).await
    }

    async fn send_mail(&self, mail: &MailContent) -> Result<Receipt, ServiceError> {
        let url = self.endpoint(&["mail", "send"])?;
        let response = self.execute(self.client.post(url).json(mail)).await?;
        Self::decode(response).await
    }
}
