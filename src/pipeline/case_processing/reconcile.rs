//! Reconciliation resolver: applies a `completed` event to the snapshot.
//!
//! Priority: embedded snapshot > exact record id > first Pending record whose
//! type name matches the reported type. No match means the caller must
//! re-fetch the case from REST.

use chrono::Utc;

use super::snapshot::CaseSnapshotStore;
use super::types::CompletedPayload;
use crate::models::{CaseSnapshot, DocumentStatus};

/// Where a completed event lands in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The event carried a full snapshot for this case.
    FullSnapshot,
    /// Record index matched by document id.
    ById(usize),
    /// Record index matched by type name among Pending records.
    ByTypeName(usize),
    Miss,
}

/// Decide how to apply a completed event, without mutating anything.
pub fn resolve(snapshot: &CaseSnapshot, document_id: &str, payload: &CompletedPayload) -> Resolution {
    if let Some(embedded) = &payload.case {
        if embedded.case_id == snapshot.case_id {
            return Resolution::FullSnapshot;
        }
    }
    if let Some(index) = snapshot.position(document_id) {
        return Resolution::ById(index);
    }
    match payload.document_type.as_deref() {
        Some(type_name) => match pending_by_type_name(snapshot, type_name) {
            Some(index) => Resolution::ByTypeName(index),
            None => Resolution::Miss,
        },
        None => Resolution::Miss,
    }
}

// Deprecated path: ambiguous when two Pending records share a type name.
// Kept until every producer sends the record id.
fn pending_by_type_name(snapshot: &CaseSnapshot, type_name: &str) -> Option<usize> {
    snapshot
        .documents
        .iter()
        .position(|d| d.status == DocumentStatus::Pending && d.name == type_name)
}

/// Outcome of applying a completed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Replaced,
    Patched {
        record_id: String,
        document_type_id: String,
    },
    Miss,
}

/// Resolve and apply. An embedded snapshot is moved into the store.
pub fn reconcile_completed(
    store: &mut CaseSnapshotStore,
    document_id: &str,
    payload: &mut CompletedPayload,
) -> Reconciled {
    match resolve(store.snapshot(), document_id, payload) {
        Resolution::FullSnapshot => match payload.case.take() {
            Some(snapshot) => {
                if store.replace(snapshot) {
                    Reconciled::Replaced
                } else {
                    Reconciled::Miss
                }
            }
            None => Reconciled::Miss,
        },
        Resolution::ById(index) => patch(store, index, payload),
        Resolution::ByTypeName(index) => {
            tracing::warn!(
                document_id,
                document_type = payload.document_type.as_deref().unwrap_or_default(),
                "Completed event matched by type name; producer did not send a known record id"
            );
            patch(store, index, payload)
        }
        Resolution::Miss => Reconciled::Miss,
    }
}

fn patch(store: &mut CaseSnapshotStore, index: usize, payload: &CompletedPayload) -> Reconciled {
    let at = payload.completed_at.unwrap_or_else(Utc::now);
    match store.mark_uploaded(index, at) {
        Some(record) => Reconciled::Patched {
            record_id: record.id.clone(),
            document_type_id: record.document_type_id.clone(),
        },
        None => Reconciled::Miss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::case::record;

    fn snapshot() -> CaseSnapshot {
        let mut snap = CaseSnapshot::empty("case-1");
        snap.documents = vec![
            record("a", "t1", "Passport", DocumentStatus::Uploaded),
            record("b", "t1", "Passport", DocumentStatus::Pending),
            record("c", "t2", "Payslip", DocumentStatus::Pending),
        ];
        snap
    }

    fn payload_for(type_name: Option<&str>) -> CompletedPayload {
        CompletedPayload {
            document_type: type_name.map(str::to_string),
            ..CompletedPayload::default()
        }
    }

    #[test]
    fn id_match_wins_over_name() {
        let res = resolve(&snapshot(), "c", &payload_for(Some("Passport")));
        assert_eq!(res, Resolution::ById(2));
    }

    #[test]
    fn name_fallback_skips_non_pending() {
        let res = resolve(&snapshot(), "unknown", &payload_for(Some("Passport")));
        assert_eq!(res, Resolution::ByTypeName(1));
    }

    #[test]
    fn no_id_no_name_is_miss() {
        assert_eq!(resolve(&snapshot(), "unknown", &payload_for(None)), Resolution::Miss);
        assert_eq!(
            resolve(&snapshot(), "unknown", &payload_for(Some("Contract"))),
            Resolution::Miss
        );
    }

    #[test]
    fn embedded_snapshot_wins() {
        let mut payload = payload_for(Some("Passport"));
        payload.case = Some(CaseSnapshot::empty("case-1"));
        assert_eq!(resolve(&snapshot(), "c", &payload), Resolution::FullSnapshot);
    }

    #[test]
    fn embedded_foreign_snapshot_is_ignored() {
        let mut payload = payload_for(None);
        payload.case = Some(CaseSnapshot::empty("case-9"));
        assert_eq!(resolve(&snapshot(), "c", &payload), Resolution::ById(2));
    }

    #[test]
    fn patch_by_id_changes_only_that_record() {
        let mut store = CaseSnapshotStore::seeded(snapshot());
        let before = store.snapshot().clone();
        let mut payload = payload_for(None);

        let outcome = reconcile_completed(&mut store, "c", &mut payload);

        assert_eq!(
            outcome,
            Reconciled::Patched {
                record_id: "c".into(),
                document_type_id: "t2".into()
            }
        );
        let after = store.snapshot();
        assert_eq!(after.documents[2].status, DocumentStatus::Uploaded);
        assert_eq!(after.documents[0], before.documents[0]);
        assert_eq!(after.documents[1], before.documents[1]);
    }

    #[test]
    fn completed_at_is_recorded() {
        let mut store = CaseSnapshotStore::seeded(snapshot());
        let at = chrono::DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut payload = CompletedPayload {
            completed_at: Some(at),
            ..CompletedPayload::default()
        };
        reconcile_completed(&mut store, "b", &mut payload);
        assert_eq!(store.document("b").unwrap().last_uploaded_at, Some(at));
    }

    #[test]
    fn replaced_snapshot_moves_into_store() {
        let mut store = CaseSnapshotStore::seeded(snapshot());
        let mut fresh = CaseSnapshot::empty("case-1");
        fresh.documents.push(record("z", "t9", "Deed", DocumentStatus::Uploaded));
        let mut payload = CompletedPayload {
            case: Some(fresh),
            ..CompletedPayload::default()
        };
        assert_eq!(reconcile_completed(&mut store, "c", &mut payload), Reconciled::Replaced);
        assert!(payload.case.is_none());
        assert_eq!(store.snapshot().documents.len(), 1);
    }
}
