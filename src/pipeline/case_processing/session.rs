//! Case session driver: a single task owns the orchestrator.
//!
//! Channel messages and user commands are serialized through one
//! `tokio::select!` loop, so aggregation state has exactly one writer.
//! Consumers read a `watch` of `SessionView` and a broadcast of notices.

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::error::CaseError;
use super::orchestrator::{CaseOrchestrator, SessionView, NOTICE_CAPACITY};
use super::types::{SessionNotice, SessionSeed, UploadFile, UploadReport};
use crate::channel::ChannelMessage;

const COMMAND_BUFFER: usize = 32;

enum SessionCommand {
    Upload {
        files: Vec<UploadFile>,
        reply: oneshot::Sender<UploadReport>,
    },
    Approve {
        document_id: String,
        reply: oneshot::Sender<Result<(), CaseError>>,
    },
    Reupload {
        document_id: String,
        reply: oneshot::Sender<Result<(), CaseError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<(), CaseError>>,
    },
    RetryNotification {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<SessionSeed>,
    },
}

/// Cloneable handle to a running case session.
#[derive(Clone)]
pub struct SessionHandle {
    case_id: String,
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    notices: broadcast::Sender<SessionNotice>,
}

pub struct CaseSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

impl CaseSession {
    /// Spawn the session task. Hydration runs first; commands sent meanwhile
    /// queue behind it.
    pub fn start(
        orchestrator: CaseOrchestrator,
        seed: SessionSeed,
        events: mpsc::Receiver<ChannelMessage>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(orchestrator.view());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let handle = SessionHandle {
            case_id: orchestrator.case_id().to_string(),
            commands: command_tx,
            view: view_rx,
            notices: notice_tx.clone(),
        };

        let task = tokio::spawn(run_session(
            orchestrator,
            seed,
            events,
            command_rx,
            view_tx,
            notice_tx,
        ));

        Self { handle, task }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop the session and return its state for the next one.
    pub async fn close(self) -> Result<SessionSeed, CaseError> {
        let seed = self.handle.shutdown().await;
        if let Err(e) = self.task.await {
            tracing::error!(case_id = %self.handle.case_id, error = %e, "Case session task panicked");
        }
        seed
    }
}

impl SessionHandle {
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver that yields a new view after every state change.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub async fn upload_files(&self, files: Vec<UploadFile>) -> Result<UploadReport, CaseError> {
        self.request(|reply| SessionCommand::Upload { files, reply })
            .await
    }

    pub async fn approve_document(&self, document_id: &str) -> Result<(), CaseError> {
        let document_id = document_id.to_string();
        self.request(|reply| SessionCommand::Approve { document_id, reply })
            .await?
    }

    pub async fn request_reupload(&self, document_id: &str) -> Result<(), CaseError> {
        let document_id = document_id.to_string();
        self.request(|reply| SessionCommand::Reupload { document_id, reply })
            .await?
    }

    pub async fn refresh(&self) -> Result<(), CaseError> {
        self.request(|reply| SessionCommand::Refresh { reply }).await?
    }

    /// Try the completion notification again after a failed send. Resolves to
    /// whether the notification has now been sent.
    pub async fn retry_notification(&self) -> Result<bool, CaseError> {
        self.request(|reply| SessionCommand::RetryNotification { reply })
            .await
    }

    async fn shutdown(&self) -> Result<SessionSeed, CaseError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, CaseError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CaseError::SessionClosed)?;
        response.await.map_err(|_| CaseError::SessionClosed)
    }
}

async fn run_session(
    mut orchestrator: CaseOrchestrator,
    seed: SessionSeed,
    mut events: mpsc::Receiver<ChannelMessage>,
    mut commands: mpsc::Receiver<SessionCommand>,
    view: watch::Sender<SessionView>,
    notices: broadcast::Sender<SessionNotice>,
) {
    let case_id = orchestrator.case_id().to_string();
    let mut forwarded = orchestrator.notices();

    orchestrator.hydrate(seed).await;
    publish(&orchestrator, &view, &mut forwarded, &notices);

    let mut events_open = true;
    loop {
        tokio::select! {
            message = events.recv(), if events_open => match message {
                Some(ChannelMessage::Event { event, .. }) => orchestrator.handle_event(event).await,
                Some(ChannelMessage::Connected { generation, replayed }) => {
                    tracing::debug!(case_id = %case_id, generation, replayed, "Event channel connected");
                    orchestrator.on_channel_connected(generation).await;
                }
                Some(ChannelMessage::Disconnected { reason, gave_up }) => {
                    orchestrator.on_channel_disconnected(&reason, gave_up);
                }
                None => {
                    tracing::info!(case_id = %case_id, "Event channel closed; session continues on REST only");
                    events_open = false;
                }
            },
            command = commands.recv() => match command {
                // The view is published before replying so callers observe their own effect.
                Some(SessionCommand::Upload { files, reply }) => {
                    let report = orchestrator.upload_files(files).await;
                    publish(&orchestrator, &view, &mut forwarded, &notices);
                    let _ = reply.send(report);
                }
                Some(SessionCommand::Approve { document_id, reply }) => {
                    let result = orchestrator.approve_document(&document_id).await;
                    publish(&orchestrator, &view, &mut forwarded, &notices);
                    let _ = reply.send(result);
                }
                Some(SessionCommand::Reupload { document_id, reply }) => {
                    let result = orchestrator.request_reupload(&document_id).await;
                    publish(&orchestrator, &view, &mut forwarded, &notices);
                    let _ = reply.send(result);
                }
                Some(SessionCommand::Refresh { reply }) => {
                    let result = orchestrator.refresh().await;
                    publish(&orchestrator, &view, &mut forwarded, &notices);
                    let _ = reply.send(result);
                }
                Some(SessionCommand::RetryNotification { reply }) => {
                    orchestrator.retry_notification().await;
                    publish(&orchestrator, &view, &mut forwarded, &notices);
                    let _ = reply.send(orchestrator.notification_sent());
                }
                Some(SessionCommand::Shutdown { reply }) => {
                    forward_notices(&mut forwarded, &notices);
                    let _ = reply.send(orchestrator.into_seed());
                    tracing::info!(case_id = %case_id, "Case session closed");
                    return;
                }
                None => {
                    tracing::info!(case_id = %case_id, "All session handles dropped");
                    return;
                }
            },
        }

        publish(&orchestrator, &view, &mut forwarded, &notices);
    }
}

fn publish(
    orchestrator: &CaseOrchestrator,
    view: &watch::Sender<SessionView>,
    forwarded: &mut broadcast::Receiver<SessionNotice>,
    notices: &broadcast::Sender<SessionNotice>,
) {
    forward_notices(forwarded, notices);
    view.send_replace(orchestrator.view());
}

/// Move orchestrator notices onto the session's public broadcast.
fn forward_notices(
    from: &mut broadcast::Receiver<SessionNotice>,
    to: &broadcast::Sender<SessionNotice>,
) {
    loop {
        match from.try_recv() {
            Ok(notice) => {
                let _ = to.send(notice);
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Session notices dropped");
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::SqliteDurableCache;
    use crate::models::case::record;
    use crate::models::{CaseSnapshot, DocumentStatus};
    use crate::pipeline::case_processing::orchestrator::OrchestratorConfig;
    use crate::pipeline::case_processing::test_support::{
        pdf, MockCaseService, RecordingSubscriptions,
    };
    use crate::pipeline::case_processing::types::{CaseEvent, CompletedPayload, NoticeKind};

    fn start(
        snapshot: CaseSnapshot,
    ) -> (CaseSession, Arc<MockCaseService>, mpsc::Sender<ChannelMessage>) {
        let service = Arc::new(MockCaseService::new(snapshot));
        let orchestrator = CaseOrchestrator::new(
            "case-1",
            service.clone(),
            Arc::new(SqliteDurableCache::in_memory().unwrap()),
            Arc::new(RecordingSubscriptions::default()),
            OrchestratorConfig::default(),
        );
        let (events_tx, events_rx) = mpsc::channel(16);
        let session = CaseSession::start(orchestrator, SessionSeed::default(), events_rx);
        (session, service, events_tx)
    }

    fn one_pending() -> CaseSnapshot {
        let mut snap = CaseSnapshot::empty("case-1");
        snap.documents = vec![record("p1", "t1", "Passport", DocumentStatus::Pending)];
        snap
    }

    fn completed(document_id: &str) -> ChannelMessage {
        ChannelMessage::Event {
            generation: 1,
            event: CaseEvent::Completed {
                case_id: "case-1".into(),
                document_id: document_id.into(),
                payload: CompletedPayload::default(),
            },
        }
    }

    #[tokio::test]
    async fn upload_then_completion_updates_view() {
        let (session, service, events) = start(one_pending());
        let handle = session.handle();
        let mut watch = handle.watch();

        let report = handle
            .upload_files(vec![UploadFile::new("p.pdf", "t1", pdf())])
            .await
            .unwrap();
        let id = report.accepted().next().unwrap().id.clone();
        assert_eq!(handle.view().processing, vec![id.clone()]);

        events.send(completed(&id)).await.unwrap();
        watch
            .wait_for(|v| v.processing.is_empty())
            .await
            .unwrap();

        let view = handle.view();
        assert_eq!(view.snapshot.document(&id).unwrap().status, DocumentStatus::Uploaded);
        assert!(view.notification_sent);
        assert_eq!(service.sent_mail_count(), 1);

        let seed = session.close().await.unwrap();
        assert!(seed.snapshot.is_some());
    }

    #[tokio::test]
    async fn retry_command_resends_failed_notification() {
        let (session, service, events) = start(one_pending());
        service.fail_next_sends(1);
        let handle = session.handle();
        let mut watch = handle.watch();

        let report = handle
            .upload_files(vec![UploadFile::new("p.pdf", "t1", pdf())])
            .await
            .unwrap();
        let id = report.accepted().next().unwrap().id.clone();
        events.send(completed(&id)).await.unwrap();
        watch.wait_for(|v| v.processing.is_empty()).await.unwrap();
        assert!(!handle.view().notification_sent);

        assert!(handle.retry_notification().await.unwrap());
        assert!(handle.view().notification_sent);
        assert_eq!(service.sent_mail_count(), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn notices_reach_subscribers() {
        let (session, _service, _events) = start(one_pending());
        let handle = session.handle();
        let mut notices = handle.notices();

        let report = handle
            .upload_files(vec![UploadFile::new("empty.pdf", "t1", vec![])])
            .await
            .unwrap();
        assert!(!report.all_accepted());

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::UploadRejected);
        assert!(notice.requires_action);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn actions_after_close_report_session_closed() {
        let (session, _service, _events) = start(one_pending());
        let handle = session.handle();
        session.close().await.unwrap();
        assert_eq!(
            handle.approve_document("p1").await.unwrap_err(),
            CaseError::SessionClosed
        );
    }

    #[tokio::test]
    async fn closed_event_channel_keeps_commands_working() {
        let (session, _service, events) = start(one_pending());
        drop(events);
        let handle = session.handle();
        let err = handle.approve_document("p1").await.unwrap_err();
        assert!(matches!(err, CaseError::InvalidTransition { .. }));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_message_becomes_notice() {
        let (session, _service, events) = start(one_pending());
        let handle = session.handle();
        let mut notices = handle.notices();
        events
            .send(ChannelMessage::Disconnected {
                reason: "connection reset".into(),
                gave_up: true,
            })
            .await
            .unwrap();
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::ChannelDeliveryFailure);
        session.close().await.unwrap();
    }
}
