//! Event channel client: push delivery of document processing events.
//!
//! One websocket per case session. Subscriptions are per document id, kept in
//! a registry and replayed on every reconnect. Each connection is a listener
//! generation; a reconnect detaches the old generation before attaching the
//! new one, so a frame is never delivered twice through stale listeners.

mod client;
mod frames;
mod policy;
mod registry;

pub use client::{spawn_event_channel, ChannelHandle};
pub use frames::{parse_frame, ControlFrame, Frame, SubscriptionAction};
pub use policy::ReconnectionPolicy;
pub use registry::{ListenerSlot, SubscriptionRegistry};

use crate::pipeline::case_processing::CaseEvent;

/// What the channel task reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Event { generation: u64, event: CaseEvent },
    /// A connection attached and `replayed` subscriptions were re-sent.
    Connected { generation: u64, replayed: usize },
    /// The connection dropped. With `gave_up`, no further reconnects follow.
    Disconnected { reason: String, gave_up: bool },
}
