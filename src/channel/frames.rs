//! Wire frames for the event channel.
//!
//! Server → client: JSON text frames tagged by `"event"`.
//! Client → server: `{"action": "subscribe"|"unsubscribe", "case_id", "document_id"}`.

use serde::{Deserialize, Serialize};

use crate::pipeline::case_processing::CaseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub action: SubscriptionAction,
    pub case_id: String,
    pub document_id: String,
}

impl ControlFrame {
    pub fn subscribe(case_id: &str, document_id: &str) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            case_id: case_id.to_string(),
            document_id: document_id.to_string(),
        }
    }

    pub fn unsubscribe(case_id: &str, document_id: &str) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            case_id: case_id.to_string(),
            document_id: document_id.to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Classification of one incoming text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(CaseEvent),
    /// A well-formed event for a case this session does not own.
    Foreign { case_id: String },
    /// Valid JSON without an `event` tag (acks, heartbeats).
    Control,
    Malformed(String),
}

pub fn parse_frame(text: &str, case_id: &str) -> Frame {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Frame::Malformed(e.to_string()),
    };
    if value.get("event").is_none() {
        return Frame::Control;
    }
    match serde_json::from_value::<CaseEvent>(value) {
        Ok(event) if event.case_id() == case_id => Frame::Event(event),
        Ok(event) => Frame::Foreign {
            case_id: event.case_id().to_string(),
        },
        Err(e) => Frame::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_frame_wire_shape() {
        let text = ControlFrame::subscribe("case-1", "d1").to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"action": "subscribe", "case_id": "case-1", "document_id": "d1"})
        );
    }

    #[test]
    fn parses_own_event() {
        let text = json!({"event": "failed", "case_id": "case-1", "document_id": "d1"}).to_string();
        match parse_frame(&text, "case-1") {
            Frame::Event(event) => assert_eq!(event.kind(), "failed"),
            other => panic!("Expected event, got {other:?}"),
        }
    }

    #[test]
    fn flags_foreign_case() {
        let text = json!({"event": "started", "case_id": "case-2", "document_id": "d1"}).to_string();
        assert_eq!(
            parse_frame(&text, "case-1"),
            Frame::Foreign { case_id: "case-2".into() }
        );
    }

    #[test]
    fn untagged_json_is_control() {
        assert_eq!(parse_frame(r#"{"type":"ack"}"#, "case-1"), Frame::Control);
    }

    #[test]
    fn garbage_and_unknown_kinds_are_malformed() {
        assert!(matches!(parse_frame("not json", "case-1"), Frame::Malformed(_)));
        let unknown = json!({"event": "exploded", "case_id": "case-1", "document_id": "d"}).to_string();
        assert!(matches!(parse_frame(&unknown, "case-1"), Frame::Malformed(_)));
    }
}
