//! Payload decode / classify / validate pipeline.
//!
//! Three stages, each allowed to fail independently:
//! 1. **Decode**: base64 → UTF-8 → JSON. Failure leaves the record raw.
//! 2. **Classify**: the `type` discriminator when present (unrecognized tags
//!    preserved verbatim), a structural fallback for the COMMS shape,
//!    `unknown` otherwise.
//! 3. **Validate**: deserialize into the typed event for the classified kind.
//!
//! A failure at any stage is data, not an error — the substrate record is
//! stored and the cursor advances regardless.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::events::TopicEvent;
use crate::message::{MessageKind, ParsedMessage, TopicMessage};

/// Converts opaque payloads into decoded documents and typed events.
/// Stateless; one instance serves every topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParser;

impl MessageParser {
    pub fn new() -> Self {
        Self
    }

    /// Run the pipeline on one wire message.
    pub fn parse(&self, message: TopicMessage) -> ParsedMessage {
        let decoded = decode(&message.message_base64);
        let kind = decoded.as_ref().map(classify);
        let event = match (&decoded, &kind) {
            (Some(doc), Some(kind)) => validate(doc, kind),
            _ => None,
        };
        ParsedMessage { message, decoded, kind, event }
    }
}

fn decode(payload_base64: &str) -> Option<Value> {
    let bytes = BASE64.decode(payload_base64.as_bytes()).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    serde_json::from_str(text).ok()
}

fn classify(doc: &Value) -> MessageKind {
    let Some(map) = doc.as_object() else {
        return MessageKind::Unknown;
    };
    if let Some(tag) = map.get("type").and_then(Value::as_str) {
        return MessageKind::from_type_tag(tag);
    }
    if map.contains_key("from") && map.contains_key("text") && map.contains_key("timestamp") {
        return MessageKind::Comms;
    }
    MessageKind::Unknown
}

fn validate(doc: &Value, kind: &MessageKind) -> Option<TopicEvent> {
    let doc = doc.clone();
    match kind {
        MessageKind::AgentInit => serde_json::from_value(doc).ok().map(TopicEvent::AgentInit),
        MessageKind::AgentCreated => serde_json::from_value(doc).ok().map(TopicEvent::AgentCreated),
        MessageKind::Action => serde_json::from_value(doc).ok().map(TopicEvent::Action),
        MessageKind::Transaction => serde_json::from_value(doc).ok().map(TopicEvent::Transaction),
        MessageKind::RentalInitiated => {
            serde_json::from_value(doc).ok().map(TopicEvent::RentalInitiated)
        }
        MessageKind::RentalCompleted => {
            serde_json::from_value(doc).ok().map(TopicEvent::RentalCompleted)
        }
        MessageKind::Comms => serde_json::from_value(doc).ok().map(TopicEvent::Comms),
        MessageKind::Unknown | MessageKind::Other(_) => None,
    }
}
