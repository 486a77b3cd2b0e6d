//! Websocket connection task for the event channel.
//!
//! Connection lifecycle:
//! 1. Connect, attach a new listener generation, spawn its reader
//! 2. Replay every registered subscription, report `Connected`
//! 3. Forward own-case events; apply subscribe/unsubscribe commands
//! 4. On loss: detach the reader, report `Disconnected`, back off, reconnect
//! 5. Retries exhausted: report `Disconnected { gave_up: true }` and stop

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::frames::{parse_frame, ControlFrame, Frame};
use super::policy::ReconnectionPolicy;
use super::registry::{ListenerSlot, SubscriptionRegistry};
use super::ChannelMessage;
use crate::pipeline::case_processing::EventSubscriptions;

/// Queue depth between the connection task and the session.
const MESSAGE_BUFFER: usize = 256;

#[derive(Debug)]
enum ChannelCommand {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

#[derive(Debug)]
enum ReaderMsg {
    Text(String),
    Closed(String),
}

enum ConnectionEnd {
    Lost(String),
    Shutdown,
}

/// Subscription control for a running channel. Cloning shares the channel.
#[derive(Clone)]
pub struct ChannelHandle {
    case_id: String,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Close the local socket and stop reconnecting. Remote jobs keep running.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ChannelCommand::Shutdown);
    }
}

impl EventSubscriptions for ChannelHandle {
    fn subscribe(&self, document_id: &str) {
        if self.registry.insert(document_id) {
            let _ = self
                .commands
                .send(ChannelCommand::Subscribe(document_id.to_string()));
        }
    }

    fn unsubscribe(&self, document_id: &str) {
        if self.registry.remove(document_id) {
            let _ = self
                .commands
                .send(ChannelCommand::Unsubscribe(document_id.to_string()));
        }
    }
}

/// Start the channel task for one case session.
pub fn spawn_event_channel(
    url: &str,
    case_id: &str,
    policy: ReconnectionPolicy,
) -> (ChannelHandle, mpsc::Receiver<ChannelMessage>) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(MESSAGE_BUFFER);
    let (frames_tx, frames_rx) = mpsc::channel(MESSAGE_BUFFER);

    let task = ChannelTask {
        url: url.to_string(),
        case_id: case_id.to_string(),
        policy,
        registry: Arc::clone(&registry),
        commands: command_rx,
        out: out_tx,
        frames_tx,
        frames_rx,
        slot: ListenerSlot::new(),
        sent: HashSet::new(),
    };
    tokio::spawn(task.run());

    let handle = ChannelHandle {
        case_id: case_id.to_string(),
        registry,
        commands: command_tx,
    };
    (handle, out_rx)
}

struct ChannelTask {
    url: String,
    case_id: String,
    policy: ReconnectionPolicy,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    out: mpsc::Sender<ChannelMessage>,
    frames_tx: mpsc::Sender<(u64, ReaderMsg)>,
    frames_rx: mpsc::Receiver<(u64, ReaderMsg)>,
    slot: ListenerSlot,
    /// Ids subscribed on the current connection.
    sent: HashSet<String>,
}

impl ChannelTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let last_error = match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    attempt = 0;
                    match self.serve(socket).await {
                        ConnectionEnd::Shutdown => {
                            tracing::info!(case_id = %self.case_id, "Event channel closed");
                            return;
                        }
                        ConnectionEnd::Lost(reason) => {
                            tracing::warn!(case_id = %self.case_id, reason = %reason, "Event channel lost");
                            let message = ChannelMessage::Disconnected {
                                reason: reason.clone(),
                                gave_up: false,
                            };
                            if self.out.send(message).await.is_err() {
                                return;
                            }
                            reason
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(case_id = %self.case_id, attempt, error = %e, "Event channel connect failed");
                    e.to_string()
                }
            };

            if !self.policy.should_retry(attempt) {
                tracing::error!(case_id = %self.case_id, attempts = attempt, "Event channel giving up");
                let _ = self
                    .out
                    .send(ChannelMessage::Disconnected {
                        reason: last_error,
                        gave_up: true,
                    })
                    .await;
                return;
            }

            let delay = self.policy.delay_for(attempt);
            attempt += 1;
            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Sleep through a backoff delay. Subscription changes land in the
    /// registry meanwhile; returns false on shutdown.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Shutdown) | None => return false,
                    Some(_) => {}
                },
            }
        }
    }

    async fn serve<S>(&mut self, socket: S) -> ConnectionEnd
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let generation = self.slot.attach();
        let (mut sink, stream) = socket.split();
        let reader = spawn_reader(generation, stream, self.frames_tx.clone());
        self.sent.clear();

        let end = self.serve_attached(generation, &mut sink).await;

        // Detach before the next attach; anything the old reader queued is stale.
        reader.abort();
        self.slot.detach();
        if matches!(end, ConnectionEnd::Shutdown) {
            let _ = sink.close().await;
        }
        end
    }

    async fn serve_attached<K>(&mut self, generation: u64, sink: &mut K) -> ConnectionEnd
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let mut replayed = 0;
        for document_id in self.registry.ids() {
            if let Err(e) = self.send_subscribe(sink, &document_id).await {
                return ConnectionEnd::Lost(e);
            }
            replayed += 1;
        }
        tracing::info!(case_id = %self.case_id, generation, replayed, "Event channel connected");
        if self
            .out
            .send(ChannelMessage::Connected {
                generation,
                replayed,
            })
            .await
            .is_err()
        {
            return ConnectionEnd::Shutdown;
        }

        loop {
            tokio::select! {
                frame = self.frames_rx.recv() => match frame {
                    Some((from, _)) if !self.slot.is_current(from) => {
                        tracing::debug!(case_id = %self.case_id, stale = from, generation, "Dropping frame from detached listener");
                    }
                    Some((_, ReaderMsg::Text(text))) => {
                        if !self.dispatch(generation, &text).await {
                            return ConnectionEnd::Shutdown;
                        }
                    }
                    Some((_, ReaderMsg::Closed(reason))) => return ConnectionEnd::Lost(reason),
                    None => return ConnectionEnd::Shutdown,
                },
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Subscribe(document_id)) => {
                        if self.registry.contains(&document_id) {
                            if let Err(e) = self.send_subscribe(sink, &document_id).await {
                                return ConnectionEnd::Lost(e);
                            }
                        }
                    }
                    Some(ChannelCommand::Unsubscribe(document_id)) => {
                        if self.sent.remove(&document_id) {
                            let frame = ControlFrame::unsubscribe(&self.case_id, &document_id);
                            if let Err(e) = send_control(sink, &frame).await {
                                return ConnectionEnd::Lost(e);
                            }
                        }
                    }
                    Some(ChannelCommand::Shutdown) | None => return ConnectionEnd::Shutdown,
                },
            }
        }
    }

    /// Subscribe once per connection.
    async fn send_subscribe<K>(&mut self, sink: &mut K, document_id: &str) -> Result<(), String>
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if self.sent.contains(document_id) {
            return Ok(());
        }
        let frame = ControlFrame::subscribe(&self.case_id, document_id);
        send_control(sink, &frame).await?;
        self.sent.insert(document_id.to_string());
        Ok(())
    }

    /// Returns false when the session side has gone away.
    async fn dispatch(&self, generation: u64, text: &str) -> bool {
        match parse_frame(text, &self.case_id) {
            Frame::Event(event) => {
                tracing::debug!(
                    case_id = %self.case_id,
                    document_id = event.document_id(),
                    kind = event.kind(),
                    generation,
                    "Event received"
                );
                self.out
                    .send(ChannelMessage::Event { generation, event })
                    .await
                    .is_ok()
            }
            Frame::Foreign { case_id } => {
                tracing::debug!(case_id = %self.case_id, foreign = %case_id, "Ignoring event for another case");
                true
            }
            Frame::Control => true,
            Frame::Malformed(reason) => {
                tracing::warn!(case_id = %self.case_id, generation, reason = %reason, "Skipping malformed frame");
                true
            }
        }
    }
}

fn spawn_reader<R>(
    generation: u64,
    mut stream: R,
    frames: mpsc::Sender<(u64, ReaderMsg)>,
) -> JoinHandle<()>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if frames.send((generation, ReaderMsg::Text(text))).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| format!("closed by server: {}", f.reason))
                        .unwrap_or_else(|| "closed by server".into());
                }
                Some(Ok(_)) => {} // Ping/Pong handled by tungstenite
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".into(),
            }
        };
        let _ = frames.send((generation, ReaderMsg::Closed(reason))).await;
    })
}

async fn send_control<K>(sink: &mut K, frame: &ControlFrame) -> Result<(), String>
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = frame.to_text().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::pipeline::case_processing::CaseEvent;

    #[derive(Clone)]
    struct ServerState {
        frames: mpsc::UnboundedSender<(usize, String)>,
        connections: Arc<AtomicUsize>,
        drop_first: bool,
    }

    fn fast_policy(max_retries: u32) -> ReconnectionPolicy {
        ReconnectionPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            max_retries,
            jitter_ms: 0,
        }
    }

    async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
        ws.on_upgrade(move |socket| serve_socket(socket, state))
    }

    /// Echo a completed event (plus a foreign one) for every subscribe frame.
    /// With `drop_first`, the first connection is dropped after one frame.
    async fn serve_socket(mut socket: WebSocket, state: ServerState) {
        let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
        while let Some(Ok(msg)) = socket.recv().await {
            let WsMessage::Text(text) = msg else { continue };
            let _ = state.frames.send((connection, text.clone()));
            if state.drop_first && connection == 1 {
                return;
            }
            let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
            if frame["action"] != "subscribe" {
                continue;
            }
            let doc = frame["document_id"].as_str().unwrap().to_string();
            let foreign = json!({"event": "completed", "case_id": "case-other", "document_id": doc});
            let own = json!({"event": "completed", "case_id": "case-1", "document_id": doc});
            let _ = socket.send(WsMessage::Text("not json".into())).await;
            let _ = socket.send(WsMessage::Text(foreign.to_string())).await;
            let _ = socket.send(WsMessage::Text(own.to_string())).await;
        }
    }

    async fn start_server(
        drop_first: bool,
    ) -> (String, mpsc::UnboundedReceiver<(usize, String)>, JoinHandle<()>) {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let state = ServerState {
            frames,
            connections: Arc::new(AtomicUsize::new(0)),
            drop_first,
        };
        let app = Router::new().route("/events", get(ws_handler)).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{addr}/events"), frames_rx, server)
    }

    async fn next(rx: &mut mpsc::Receiver<ChannelMessage>) -> ChannelMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for channel message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_own_case_events_only() {
        let (url, mut server_frames, server) = start_server(false).await;
        let (handle, mut rx) = spawn_event_channel(&url, "case-1", fast_policy(3));

        assert_eq!(
            next(&mut rx).await,
            ChannelMessage::Connected { generation: 1, replayed: 0 }
        );

        handle.subscribe("d1");
        let (_, frame) = server_frames.recv().await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["action"], "subscribe");
        assert_eq!(frame["document_id"], "d1");

        match next(&mut rx).await {
            ChannelMessage::Event { generation, event: CaseEvent::Completed { case_id, document_id, .. } } => {
                assert_eq!(generation, 1);
                assert_eq!(case_id, "case-1");
                assert_eq!(document_id, "d1");
            }
            other => panic!("Expected completed event, got {other:?}"),
        }

        handle.shutdown();
        server.abort();
    }

    #[tokio::test]
    async fn reconnect_replays_registered_subscriptions() {
        let (url, mut server_frames, server) = start_server(true).await;
        let (handle, mut rx) = spawn_event_channel(&url, "case-1", fast_policy(5));

        assert!(matches!(next(&mut rx).await, ChannelMessage::Connected { generation: 1, .. }));
        handle.subscribe("d1");
        handle.subscribe("d2");
        handle.unsubscribe("d2");

        match next(&mut rx).await {
            ChannelMessage::Disconnected { gave_up, .. } => assert!(!gave_up),
            other => panic!("Expected disconnect, got {other:?}"),
        }
        assert_eq!(
            next(&mut rx).await,
            ChannelMessage::Connected { generation: 2, replayed: 1 }
        );

        // The second connection only ever hears about d1.
        let mut second = Vec::new();
        while second.is_empty() {
            let (connection, text) = server_frames.recv().await.unwrap();
            if connection == 2 {
                second.push(text);
            }
        }
        let frame: serde_json::Value = serde_json::from_str(&second[0]).unwrap();
        assert_eq!(frame["action"], "subscribe");
        assert_eq!(frame["document_id"], "d1");
        assert_eq!(handle.subscriptions(), vec!["d1"]);

        handle.shutdown();
        server.abort();
    }

    #[tokio::test]
    async fn gives_up_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_handle, mut rx) =
            spawn_event_channel(&format!("ws://{addr}/events"), "case-1", fast_policy(2));
        match next(&mut rx).await {
            ChannelMessage::Disconnected { gave_up, .. } => assert!(gave_up),
            other => panic!("Expected terminal disconnect, got {other:?}"),
        }
    }
}
