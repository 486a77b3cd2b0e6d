//! Case snapshot store: the in-memory view of one case.

use chrono::{DateTime, Utc};

use super::processing_set::ProcessingSet;
use crate::models::{CaseSnapshot, DisplayStatus, DocumentRecord, DocumentStatus};

#[derive(Debug, Clone)]
pub struct CaseSnapshotStore {
    snapshot: CaseSnapshot,
    /// True once a backend-provided snapshot (REST or embedded) has been applied.
    authoritative: bool,
}

impl CaseSnapshotStore {
    pub fn new(case_id: &str) -> Self {
        Self {
            snapshot: CaseSnapshot::empty(case_id),
            authoritative: false,
        }
    }

    /// Seed from a warm placeholder; the next backend snapshot replaces it.
    pub fn seeded(snapshot: CaseSnapshot) -> Self {
        Self {
            snapshot,
            authoritative: false,
        }
    }

    pub fn case_id(&self) -> &str {
        &self.snapshot.case_id
    }

    pub fn snapshot(&self) -> &CaseSnapshot {
        &self.snapshot
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Replace wholesale. Snapshots for another case are refused.
    pub fn replace(&mut self, snapshot: CaseSnapshot) -> bool {
        if snapshot.case_id != self.snapshot.case_id {
            tracing::warn!(
                case_id = %self.snapshot.case_id,
                foreign = %snapshot.case_id,
                "Ignoring snapshot for a different case"
            );
            return false;
        }
        self.snapshot = snapshot;
        self.authoritative = true;
        true
    }

    pub fn document(&self, id: &str) -> Option<&DocumentRecord> {
        self.snapshot.document(id)
    }

    /// Patch one record to Uploaded. Other records are untouched.
    pub fn mark_uploaded(&mut self, index: usize, at: DateTime<Utc>) -> Option<&DocumentRecord> {
        let record = self.snapshot.documents.get_mut(index)?;
        record.status = DocumentStatus::Uploaded;
        record.last_uploaded_at = Some(at);
        Some(record)
    }

    pub fn set_status(&mut self, id: &str, status: DocumentStatus) -> Option<&DocumentRecord> {
        let record = self.snapshot.document_mut(id)?;
        record.status = status;
        Some(record)
    }

    /// Insert or refresh a record returned by the intake API. A new id takes
    /// over the slot of the Pending record of the same document type, so one
    /// type never holds two open slots.
    pub fn upsert(&mut self, record: DocumentRecord) {
        let slot = self.snapshot.position(&record.id).or_else(|| {
            self.snapshot.documents.iter().position(|d| {
                d.document_type_id == record.document_type_id && d.status == DocumentStatus::Pending
            })
        });
        match slot {
            Some(i) => self.snapshot.documents[i] = record,
            None => self.snapshot.documents.push(record),
        }
    }

    pub fn display_status(&self, id: &str, processing: &ProcessingSet) -> Option<DisplayStatus> {
        self.document(id)
            .map(|d| DisplayStatus::derive(d.status, processing.contains(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::case::record;

    fn store() -> CaseSnapshotStore {
        let mut snapshot = CaseSnapshot::empty("case-1");
        snapshot.documents = vec![
            record("a", "t1", "Passport", DocumentStatus::Pending),
            record("b", "t2", "Payslip", DocumentStatus::Pending),
        ];
        CaseSnapshotStore::seeded(snapshot)
    }

    #[test]
    fn replace_refuses_foreign_case() {
        let mut s = store();
        assert!(!s.replace(CaseSnapshot::empty("case-2")));
        assert_eq!(s.snapshot().documents.len(), 2);
        assert!(!s.is_authoritative());
    }

    #[test]
    fn replace_marks_authoritative() {
        let mut s = store();
        assert!(s.replace(CaseSnapshot::empty("case-1")));
        assert!(s.is_authoritative());
        assert!(s.snapshot().documents.is_empty());
    }

    #[test]
    fn mark_uploaded_touches_one_record() {
        let mut s = store();
        let before = s.snapshot().documents[1].clone();
        let at = Utc::now();
        let patched = s.mark_uploaded(0, at).unwrap();
        assert_eq!(patched.status, DocumentStatus::Uploaded);
        assert_eq!(patched.last_uploaded_at, Some(at));
        assert_eq!(s.snapshot().documents[1], before);
    }

    #[test]
    fn display_status_derives_processing() {
        let s = store();
        let mut set = ProcessingSet::new();
        set.register_upload("a");
        assert_eq!(s.display_status("a", &set), Some(DisplayStatus::Processing));
        assert_eq!(s.display_status("b", &set), Some(DisplayStatus::Pending));
        assert_eq!(s.display_status("zzz", &set), None);
    }

    #[test]
    fn upsert_replaces_or_appends() {
        let mut s = store();
        let mut a = record("a", "t1", "Passport", DocumentStatus::Pending);
        a.file_name = Some("scan.pdf".into());
        s.upsert(a);
        s.upsert(record("c", "t3", "Contract", DocumentStatus::Pending));
        assert_eq!(s.snapshot().documents.len(), 3);
        assert_eq!(s.document("a").unwrap().file_name.as_deref(), Some("scan.pdf"));
    }

    #[test]
    fn upsert_new_id_takes_pending_slot_of_same_type() {
        let mut s = store();
        s.upsert(record("a2", "t1", "Passport", DocumentStatus::Pending));
        assert_eq!(s.snapshot().documents.len(), 2);
        assert!(s.document("a").is_none());
        assert_eq!(s.snapshot().documents[0].id, "a2");
    }
}
