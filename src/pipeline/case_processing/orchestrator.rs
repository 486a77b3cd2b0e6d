//! CaseOrchestrator: composes the processing set, snapshot store,
//! reconciliation, aggregators, notification gate and durable cache for one
//! case-viewing session.
//!
//! Every collaborator failure is converted into a `CaseError` here and
//! surfaced as a `SessionNotice`; none of it reaches the aggregation code.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use super::error::{CaseError, RejectReason, ServiceError};
use super::gate::{GateOutcome, NotificationGate};
use super::processing_set::ProcessingSet;
use super::reconcile::{reconcile_completed, Reconciled};
use super::snapshot::CaseSnapshotStore;
use super::traits::{CaseService, EventSubscriptions};
use super::types::*;
use super::upload::check_upload;
use super::validation::{Adoption, Provenance, ValidationAggregator};
use super::verification::CrossVerificationAggregator;
use crate::config::UploadLimits;
use crate::db::cache::{self, DurableCache};
use crate::models::{
    CaseSnapshot, CrossVerificationResult, DisplayStatus, DocumentRecord, DocumentStatus,
    ValidationState,
};

/// Notice channel depth; slow consumers lose the oldest notices.
pub(crate) const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub management_id: Option<String>,
    pub upload: UploadLimits,
}

/// Progress of the current upload batch.
#[derive(Debug, Clone, Default)]
struct BatchState {
    /// Uploads registered this session; zero means no batch has started.
    registered: usize,
    /// The post-batch validation backfill has succeeded.
    validation_fetched: bool,
}

/// Which sources answered during hydration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub seeded_from_memory: bool,
    pub seeded_from_cache: bool,
    pub snapshot_fetched: bool,
    pub validations_fetched: bool,
    pub cross_verification_fetched: bool,
}

/// Read-only copy of session state for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub snapshot: CaseSnapshot,
    pub validations: ValidationState,
    pub cross_verification: Option<CrossVerificationResult>,
    pub all_documents_uploaded: bool,
    pub processing: Vec<String>,
    pub progress: HashMap<String, Progress>,
    pub notification_sent: bool,
    /// Something shown is still a seed or cache placeholder, or the case was
    /// never fetched.
    pub stale: bool,
}

impl SessionView {
    pub fn display_status(&self, document_id: &str) -> Option<DisplayStatus> {
        let processing = self.processing.iter().any(|id| id == document_id);
        self.snapshot
            .document(document_id)
            .map(|d| DisplayStatus::derive(d.status, processing))
    }
}

pub struct CaseOrchestrator {
    case_id: String,
    service: Arc<dyn CaseService>,
    cache: Arc<dyn DurableCache>,
    subscriptions: Arc<dyn EventSubscriptions>,
    notices: broadcast::Sender<SessionNotice>,
    config: OrchestratorConfig,
    snapshot: CaseSnapshotStore,
    processing: ProcessingSet,
    progress: HashMap<String, Progress>,
    validations: ValidationAggregator,
    cross: CrossVerificationAggregator,
    gate: NotificationGate,
    batch: BatchState,
    /// Ids whose job was superseded by a reupload; late events for them are dropped.
    retired: HashSet<String>,
}

impl CaseOrchestrator {
    pub fn new(
        case_id: &str,
        service: Arc<dyn CaseService>,
        cache: Arc<dyn DurableCache>,
        subscriptions: Arc<dyn EventSubscriptions>,
        config: OrchestratorConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            case_id: case_id.to_string(),
            service,
            cache,
            subscriptions,
            notices,
            config,
            snapshot: CaseSnapshotStore::new(case_id),
            processing: ProcessingSet::new(),
            progress: HashMap::new(),
            validations: ValidationAggregator::new(),
            cross: CrossVerificationAggregator::new(),
            gate: NotificationGate::new(),
            batch: BatchState::default(),
            retired: HashSet::new(),
        }
    }

    // ── Read accessors ──────────────────────────────────────

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn snapshot(&self) -> &CaseSnapshot {
        self.snapshot.snapshot()
    }

    pub fn validations(&self) -> &ValidationState {
        self.validations.state()
    }

    pub fn validation_aggregator(&self) -> &ValidationAggregator {
        &self.validations
    }

    pub fn cross_verification(&self) -> Option<&CrossVerificationResult> {
        self.cross.latest()
    }

    pub fn processing(&self) -> &ProcessingSet {
        &self.processing
    }

    pub fn is_processing(&self, document_id: &str) -> bool {
        self.processing.contains(document_id)
    }

    pub fn progress(&self, document_id: &str) -> Option<&Progress> {
        self.progress.get(document_id)
    }

    pub fn display_status(&self, document_id: &str) -> Option<DisplayStatus> {
        self.snapshot.display_status(document_id, &self.processing)
    }

    pub fn notification_sent(&self) -> bool {
        self.gate.has_fired()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            snapshot: self.snapshot.snapshot().clone(),
            validations: self.validations.state().clone(),
            cross_verification: self.cross.latest().cloned(),
            all_documents_uploaded: self.cross.all_documents_uploaded(),
            processing: self.processing.ids().map(str::to_string).collect(),
            progress: self.progress.clone(),
            notification_sent: self.gate.has_fired(),
            stale: self.is_stale(),
        }
    }

    pub fn is_stale(&self) -> bool {
        !self.snapshot.is_authoritative()
            || self.validations.provenance() == Provenance::Placeholder
            || self.cross.is_placeholder()
    }

    /// Hand state to the next session of this case in the same process.
    pub fn into_seed(self) -> SessionSeed {
        SessionSeed {
            snapshot: Some(self.snapshot.snapshot().clone()),
            validations: Some(self.validations.state().clone()),
            cross_verification: self.cross.latest().cloned(),
        }
    }

    // ── Session start ───────────────────────────────────────

    /// Seed placeholders (warm seed > durable cache), then let REST replace them.
    pub async fn hydrate(&mut self, seed: SessionSeed) -> HydrationReport {
        let mut report = HydrationReport::default();

        if let Some(snapshot) = seed.snapshot.filter(|s| s.case_id == self.case_id) {
            self.snapshot = CaseSnapshotStore::seeded(snapshot);
            report.seeded_from_memory = true;
        }
        match seed.validations {
            Some(state) => {
                self.validations = ValidationAggregator::seeded(state);
                report.seeded_from_memory = true;
            }
            None => {
                if let Some(state) = cache::load_validation(self.cache.as_ref(), &self.case_id) {
                    self.validations = ValidationAggregator::seeded(state);
                    report.seeded_from_cache = true;
                }
            }
        }
        match seed.cross_verification {
            Some(result) => {
                self.cross = CrossVerificationAggregator::seeded(result);
                report.seeded_from_memory = true;
            }
            None => {
                if let Some(result) =
                    cache::load_cross_verification(self.cache.as_ref(), &self.case_id)
                {
                    self.cross = CrossVerificationAggregator::seeded(result);
                    report.seeded_from_cache = true;
                }
            }
        }

        let service = Arc::clone(&self.service);
        let (case, validations, cross) = tokio::join!(
            service.get_case(&self.case_id),
            service.get_validations(&self.case_id),
            service.get_cross_verification(&self.case_id),
        );

        match case {
            Ok(snapshot) => report.snapshot_fetched = self.snapshot.replace(snapshot),
            Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Snapshot fetch failed at session start"),
        }
        match validations {
            Ok(state) => {
                self.adopt_validations(state);
                report.validations_fetched = true;
            }
            Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Validation fetch failed at session start"),
        }
        match cross {
            Ok(result) => {
                self.replace_cross_verification(result);
                report.cross_verification_fetched = true;
            }
            Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Cross-verification fetch failed at session start"),
        }

        tracing::info!(
            case_id = %self.case_id,
            documents = self.snapshot.snapshot().documents.len(),
            rules = self.validations.state().rule_count(),
            ?report,
            "Case session hydrated"
        );
        report
    }

    // ── Event dispatch ──────────────────────────────────────

    pub async fn handle_event(&mut self, event: CaseEvent) {
        if event.case_id() != self.case_id {
            tracing::debug!(
                case_id = %self.case_id,
                foreign = event.case_id(),
                kind = event.kind(),
                "Ignoring event for another case"
            );
            return;
        }
        match event {
            CaseEvent::Started { document_id, .. } => self.on_started(&document_id),
            CaseEvent::Progress {
                document_id,
                stage,
                percent,
                ..
            } => self.on_progress(&document_id, stage, percent),
            CaseEvent::Completed {
                document_id,
                payload,
                ..
            } => self.on_completed(&document_id, payload).await,
            CaseEvent::Failed {
                document_id, error, ..
            } => self.on_failed(&document_id, error).await,
        }
    }

    fn on_started(&mut self, document_id: &str) {
        if !self.processing.contains(document_id) {
            tracing::debug!(case_id = %self.case_id, document_id, "Started event for untracked document");
            return;
        }
        self.progress.insert(
            document_id.to_string(),
            Progress {
                stage: Some("started".into()),
                percent: Some(0),
                updated_at: Utc::now(),
            },
        );
    }

    fn on_progress(&mut self, document_id: &str, stage: Option<String>, percent: Option<u8>) {
        if !self.processing.contains(document_id) {
            return;
        }
        self.progress.insert(
            document_id.to_string(),
            Progress {
                stage,
                percent: percent.map(|p| p.min(100)),
                updated_at: Utc::now(),
            },
        );
    }

    async fn on_completed(&mut self, document_id: &str, mut payload: CompletedPayload) {
        let was_tracked = self.processing.complete_or_fail(document_id);
        self.progress.remove(document_id);
        self.subscriptions.unsubscribe(document_id);

        if !was_tracked && self.is_redelivery(document_id) {
            tracing::debug!(case_id = %self.case_id, document_id, "Ignoring repeated or superseded completion");
            if self.processing.is_empty() {
                self.on_batch_drained().await;
            }
            return;
        }

        let rules = std::mem::take(&mut payload.validations);
        let cross = payload.cross_verification.take();
        let reported_type_id = payload.document_type_id.clone();

        let document_type_id = match reconcile_completed(&mut self.snapshot, document_id, &mut payload)
        {
            Reconciled::Replaced => reported_type_id.or_else(|| self.type_of(document_id)),
            Reconciled::Patched {
                document_type_id, ..
            } => Some(document_type_id),
            Reconciled::Miss => {
                let miss = CaseError::ReconciliationMiss {
                    document_id: document_id.to_string(),
                };
                tracing::warn!(case_id = %self.case_id, document_id, "{miss}; re-fetching case");
                self.notify(SessionNotice::from_error(&miss));
                if let Err(e) = self.refetch_case().await {
                    tracing::warn!(case_id = %self.case_id, error = %e, "Re-fetch after reconciliation miss failed");
                }
                reported_type_id.or_else(|| self.type_of(document_id))
            }
        };

        match document_type_id {
            Some(type_id) => {
                let added = self.validations.merge(&type_id, rules);
                if added > 0 {
                    cache::save_validation(self.cache.as_ref(), &self.case_id, self.validations.state());
                }
                tracing::debug!(case_id = %self.case_id, document_id, document_type = %type_id, added, "Validation rules merged");
            }
            None if !rules.is_empty() => {
                tracing::warn!(
                    case_id = %self.case_id,
                    document_id,
                    dropped = rules.len(),
                    "Completed event rules have no document type; batch backfill will recover them"
                );
            }
            None => {}
        }

        if let Some(result) = cross {
            self.replace_cross_verification(result);
        }

        tracing::info!(case_id = %self.case_id, document_id, was_tracked, remaining = self.processing.len(), "Document processing completed");
        self.notify(SessionNotice::info(
            NoticeKind::DocumentCompleted,
            Some(document_id),
            "Document processed",
        ));

        if self.processing.is_empty() {
            self.on_batch_drained().await;
        }
    }

    async fn on_failed(&mut self, document_id: &str, error: Option<String>) {
        let was_tracked = self.processing.complete_or_fail(document_id);
        self.progress.remove(document_id);
        self.subscriptions.unsubscribe(document_id);

        if !was_tracked && self.retired.contains(document_id) {
            tracing::debug!(case_id = %self.case_id, document_id, "Ignoring failure of a superseded job");
        } else if was_tracked || self.snapshot.document(document_id).is_some() {
            let failure = CaseError::ProcessingFailed {
                document_id: document_id.to_string(),
                message: error.unwrap_or_else(|| "processing failed".into()),
            };
            tracing::warn!(case_id = %self.case_id, document_id, was_tracked, "{failure}");
            self.notify(SessionNotice::from_error(&failure));
        } else {
            tracing::debug!(case_id = %self.case_id, document_id, "Failed event for unknown document");
        }

        if was_tracked && self.processing.is_empty() {
            self.on_batch_drained().await;
        }
    }

    // ── Channel state ───────────────────────────────────────

    /// A (re)connection attached. After a reconnect events may have been lost,
    /// so REST is consulted.
    pub async fn on_channel_connected(&mut self, generation: u64) {
        if generation <= 1 {
            return;
        }
        tracing::info!(case_id = %self.case_id, generation, "Event channel restored; re-fetching case");
        self.notify(SessionNotice::info(
            NoticeKind::ChannelRestored,
            None,
            "Live updates restored",
        ));
        if let Err(e) = self.refetch_case().await {
            tracing::warn!(case_id = %self.case_id, error = %e, "Re-fetch after reconnect failed");
            return;
        }
        if self.batch.registered > 0 && self.processing.is_empty() {
            self.on_batch_drained().await;
        }
    }

    pub fn on_channel_disconnected(&mut self, reason: &str, gave_up: bool) {
        let message = if gave_up {
            format!("{reason}; live updates stopped, refresh to see the latest state")
        } else {
            format!("{reason}; reconnecting")
        };
        let failure = CaseError::ChannelDeliveryFailure(message);
        tracing::warn!(case_id = %self.case_id, gave_up, "{failure}");
        self.notify(SessionNotice::from_error(&failure));
    }

    // ── User actions ────────────────────────────────────────

    /// Validate and send every file; each file's outcome is independent.
    pub async fn upload_files(&mut self, files: Vec<UploadFile>) -> UploadReport {
        let mut slots: Vec<Option<Result<DocumentRecord, CaseError>>> = vec![None; files.len()];
        let mut accepted: Vec<(usize, AcceptedUpload)> = Vec::new();

        for (index, file) in files.into_iter().enumerate() {
            let duplicate_in_call = accepted
                .iter()
                .any(|(_, a)| a.file.document_type_id == file.document_type_id);
            let checked = if duplicate_in_call {
                Err(CaseError::UploadRejected {
                    file_name: file.file_name.clone(),
                    reason: RejectReason::AlreadyProcessing(file.document_type_id.clone()),
                })
            } else {
                check_upload(file, &self.config.upload, self.snapshot.snapshot(), &self.processing)
                    .and_then(|a| self.require_pending_slot(a))
            };
            match checked {
                Ok(upload) => accepted.push((index, upload)),
                Err(e) => {
                    tracing::info!(case_id = %self.case_id, "{e}");
                    self.notify(SessionNotice::from_error(&e));
                    slots[index] = Some(Err(e));
                }
            }
        }

        let service = Arc::clone(&self.service);
        let management_id = self.config.management_id.clone();
        let case_id = self.case_id.clone();
        let outcomes = join_all(accepted.iter().map(|(_, upload)| {
            service.create_document(&case_id, upload, management_id.as_deref())
        }))
        .await;

        let mut registered = 0;
        for ((index, upload), outcome) in accepted.into_iter().zip(outcomes) {
            let result = match outcome {
                Ok(record) => {
                    self.register(&record);
                    registered += 1;
                    tracing::info!(
                        case_id = %self.case_id,
                        document_id = %record.id,
                        document_type = %record.document_type_id,
                        file = %upload.file.file_name,
                        "Upload accepted; awaiting processing"
                    );
                    self.notify(SessionNotice::info(
                        NoticeKind::UploadAccepted,
                        Some(&record.id),
                        format!("{} is processing", upload.file.file_name),
                    ));
                    Ok(record)
                }
                Err(e) => {
                    let reason = if e.is_rejection() {
                        RejectReason::Refused(e.to_string())
                    } else {
                        RejectReason::Unavailable(e.to_string())
                    };
                    let rejected = CaseError::UploadRejected {
                        file_name: upload.file.file_name.clone(),
                        reason,
                    };
                    tracing::warn!(case_id = %self.case_id, "{rejected}");
                    self.notify(SessionNotice::from_error(&rejected));
                    Err(rejected)
                }
            };
            slots[index] = Some(result);
        }

        if registered > 0 {
            self.batch.registered += registered;
            self.batch.validation_fetched = false;
        }

        UploadReport {
            results: slots.into_iter().flatten().collect(),
        }
    }

    pub async fn approve_document(&mut self, document_id: &str) -> Result<(), CaseError> {
        let result = self.try_approve(document_id).await;
        self.report_action(result)
    }

    async fn try_approve(&mut self, document_id: &str) -> Result<(), CaseError> {
        let record = self.actionable(document_id, "approve")?;
        if record.status != DocumentStatus::Uploaded {
            return Err(CaseError::invalid_transition(document_id, record.status, "approve"));
        }
        self.service
            .set_status(&self.case_id, &record.document_type_id, DocumentStatus::Approved)
            .await
            .map_err(|e| action_rejected("approve", e))?;
        self.snapshot.set_status(document_id, DocumentStatus::Approved);
        tracing::info!(case_id = %self.case_id, document_id, "Document approved");
        Ok(())
    }

    /// Reset a document to Pending and drop every rule of its type.
    pub async fn request_reupload(&mut self, document_id: &str) -> Result<(), CaseError> {
        let result = self.try_request_reupload(document_id).await;
        self.report_action(result)
    }

    async fn try_request_reupload(&mut self, document_id: &str) -> Result<(), CaseError> {
        let record = self.actionable(document_id, "request reupload for")?;
        if record.status == DocumentStatus::Pending {
            return Err(CaseError::invalid_transition(
                document_id,
                record.status,
                "request reupload for",
            ));
        }
        self.service
            .request_reupload(&self.case_id, &record.document_type_id)
            .await
            .map_err(|e| action_rejected("reupload", e))?;

        self.snapshot.set_status(document_id, DocumentStatus::Pending);
        self.retired.insert(document_id.to_string());
        let removed = self.validations.clear_type(&record.document_type_id);
        cache::save_validation(self.cache.as_ref(), &self.case_id, self.validations.state());
        tracing::info!(
            case_id = %self.case_id,
            document_id,
            document_type = %record.document_type_id,
            removed,
            "Reupload requested; validation cleared for type"
        );
        Ok(())
    }

    /// Manual refresh: snapshot, validations and cross-verification from REST,
    /// then the gate is re-evaluated.
    pub async fn refresh(&mut self) -> Result<(), CaseError> {
        let service = Arc::clone(&self.service);
        let (case, validations, cross) = tokio::join!(
            service.get_case(&self.case_id),
            service.get_validations(&self.case_id),
            service.get_cross_verification(&self.case_id),
        );

        match validations {
            Ok(state) => self.adopt_validations(state),
            Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Validation fetch failed on refresh"),
        }
        match cross {
            Ok(result) => self.replace_cross_verification(result),
            Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Cross-verification fetch failed on refresh"),
        }

        let result = case
            .map(|snapshot| self.apply_fetched_case(snapshot))
            .map_err(|e| action_rejected("refresh", e));
        let result = self.report_action(result);
        if result.is_ok() && self.batch.registered > 0 && self.processing.is_empty() {
            self.on_batch_drained().await;
        }
        result
    }

    /// Re-run the batch completion step, e.g. after a notification failure.
    pub async fn retry_notification(&mut self) {
        if self.batch.registered > 0 && self.processing.is_empty() {
            self.on_batch_drained().await;
        }
    }

    // ── Internals ───────────────────────────────────────────

    fn notify(&self, notice: SessionNotice) {
        // No receivers is fine: notices are advisory.
        let _ = self.notices.send(notice);
    }

    fn report_action(&self, result: Result<(), CaseError>) -> Result<(), CaseError> {
        if let Err(e) = &result {
            tracing::warn!(case_id = %self.case_id, "{e}");
            self.notify(SessionNotice::from_error(e));
        }
        result
    }

    fn type_of(&self, document_id: &str) -> Option<String> {
        self.snapshot
            .document(document_id)
            .map(|d| d.document_type_id.clone())
    }

    /// Record for an approve/reupload action; refused while processing.
    fn actionable(&self, document_id: &str, action: &'static str) -> Result<DocumentRecord, CaseError> {
        let record = self
            .snapshot
            .document(document_id)
            .cloned()
            .ok_or_else(|| CaseError::DocumentNotFound(document_id.to_string()))?;
        if self.processing.contains(document_id) {
            return Err(CaseError::InvalidTransition {
                document_id: document_id.to_string(),
                from: "processing".into(),
                action,
            });
        }
        Ok(record)
    }

    /// Uploads only fill a Pending slot; settled types go through reupload first.
    fn require_pending_slot(&self, upload: AcceptedUpload) -> Result<AcceptedUpload, CaseError> {
        let has_pending = self.snapshot.snapshot().documents.iter().any(|d| {
            d.document_type_id == upload.file.document_type_id && d.status == DocumentStatus::Pending
        });
        if has_pending {
            Ok(upload)
        } else {
            Err(CaseError::UploadRejected {
                file_name: upload.file.file_name.clone(),
                reason: RejectReason::AlreadyUploaded(upload.file.document_type_id.clone()),
            })
        }
    }

    /// An untracked completion for a settled record repeats one already
    /// applied; one for a retired id belongs to a job a reupload replaced.
    fn is_redelivery(&self, document_id: &str) -> bool {
        self.retired.contains(document_id)
            || self
                .snapshot
                .document(document_id)
                .map(|d| d.status != DocumentStatus::Pending)
                .unwrap_or(false)
    }

    fn register(&mut self, record: &DocumentRecord) {
        self.retired.remove(&record.id);
        self.snapshot.upsert(record.clone());
        if self.processing.register_upload(&record.id) {
            self.subscriptions.subscribe(&record.id);
        }
    }

    fn adopt_validations(&mut self, fetched: ValidationState) {
        let changed = match self.validations.adopt_fetched(fetched) {
            Adoption::Replaced => true,
            Adoption::Merged(added) => added > 0,
        };
        if changed {
            cache::save_validation(self.cache.as_ref(), &self.case_id, self.validations.state());
        }
    }

    fn replace_cross_verification(&mut self, result: CrossVerificationResult) {
        self.cross.replace(result);
        if let Some(latest) = self.cross.latest() {
            cache::save_cross_verification(self.cache.as_ref(), &self.case_id, latest);
        }
    }

    /// Replace the snapshot from REST, then settle in-flight ids whose record
    /// is no longer Pending (their terminal event was lost).
    async fn refetch_case(&mut self) -> Result<(), ServiceError> {
        let fetched = self.service.get_case(&self.case_id).await?;
        self.apply_fetched_case(fetched);
        Ok(())
    }

    fn apply_fetched_case(&mut self, fetched: CaseSnapshot) {
        self.snapshot.replace(fetched);

        let settled: Vec<String> = self
            .processing
            .ids()
            .filter(|id| {
                self.snapshot
                    .document(id)
                    .map(|d| d.status != DocumentStatus::Pending)
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();
        for id in settled {
            self.processing.complete_or_fail(&id);
            self.progress.remove(&id);
            self.subscriptions.unsubscribe(&id);
            tracing::info!(case_id = %self.case_id, document_id = %id, "Settled from REST snapshot; terminal event was not received");
        }
    }

    /// The processing set just emptied: backfill validations once per batch,
    /// then try the notification gate.
    async fn on_batch_drained(&mut self) {
        if self.batch.registered == 0 {
            return;
        }

        if !self.batch.validation_fetched {
            let service = Arc::clone(&self.service);
            let (validations, cross) = tokio::join!(
                service.get_validations(&self.case_id),
                service.get_cross_verification(&self.case_id),
            );
            match validations {
                Ok(state) => {
                    self.adopt_validations(state);
                    self.batch.validation_fetched = true;
                }
                Err(e) => {
                    tracing::warn!(case_id = %self.case_id, error = %e, "Batch validation fetch failed; notification deferred");
                }
            }
            match cross {
                Ok(result) => self.replace_cross_verification(result),
                Err(e) => tracing::warn!(case_id = %self.case_id, error = %e, "Batch cross-verification fetch failed"),
            }
            if !self.batch.validation_fetched {
                return;
            }
            tracing::info!(case_id = %self.case_id, uploads = self.batch.registered, "Processing batch drained");
            self.notify(SessionNotice::info(
                NoticeKind::BatchCompleted,
                None,
                "All documents finished processing",
            ));
        }

        self.try_fire_notification().await;
    }

    async fn try_fire_notification(&mut self) {
        if self.gate.has_fired() {
            return;
        }
        if !self.snapshot.snapshot().all_settled() {
            tracing::debug!(case_id = %self.case_id, "Not every document is uploaded; notification waits");
            return;
        }

        let service = Arc::clone(&self.service);
        let case_id = self.case_id.clone();
        let outcome = self
            .gate
            .fire_once(|| async move {
                let mail = service.draft_mail(&case_id).await?;
                service.send_mail(&mail).await
            })
            .await;

        match outcome {
            GateOutcome::Fired(receipt) => {
                tracing::info!(case_id = %self.case_id, message_id = %receipt.message_id, "Batch notification sent");
                self.notify(SessionNotice::info(
                    NoticeKind::NotificationSent,
                    None,
                    "Case notification sent",
                ));
            }
            GateOutcome::Skipped => {}
            GateOutcome::Failed(e) => {
                let failure = CaseError::NotificationFailure(e.to_string());
                tracing::error!(case_id = %self.case_id, attempts = self.gate.attempts(), "{failure}");
                self.notify(SessionNotice::from_error(&failure));
            }
        }
    }
}

fn action_rejected(action: &'static str, error: ServiceError) -> CaseError {
    CaseError::ActionRejected {
        action,
        reason: error.to_string(),
    }
}
