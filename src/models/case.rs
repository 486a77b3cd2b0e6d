use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::DocumentStatus;

/// One required or uploaded document within a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub document_type_id: String,
    /// Display name of the document type; matched by the name fallback
    /// in reconciliation.
    pub name: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub last_uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// View of one case's documents and metadata as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub case_id: String,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CaseSnapshot {
    pub fn empty(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            ..Self::default()
        }
    }

    pub fn document(&self, id: &str) -> Option<&DocumentRecord> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn document_mut(&mut self, id: &str) -> Option<&mut DocumentRecord> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }

    pub fn has_document_type(&self, document_type_id: &str) -> bool {
        self.documents
            .iter()
            .any(|d| d.document_type_id == document_type_id)
    }

    /// True when every document is Uploaded or Approved. An empty case is
    /// not considered complete.
    pub fn all_settled(&self) -> bool {
        !self.documents.is_empty() && self.documents.iter().all(|d| d.status.is_settled())
    }
}

#[cfg(test)]
pub(crate) fn record(id: &str, type_id: &str, name: &str, status: DocumentStatus) -> DocumentRecord {
    DocumentRecord {
        id: id.into(),
        document_type_id: type_id.into(),
        name: name.into(),
        status,
        required: true,
        last_uploaded_at: None,
        file_name: None,
    }
}
