//! Substrate message records and classification labels.

use std::fmt;

use serde_json::Value;

use crate::events::TopicEvent;
use crate::timestamp::ConsensusTimestamp;

/// One message as received from the substrate, before parsing.
///
/// The payload is kept in its wire form (base64) so the substrate record
/// preserves exactly what was received, even when it never decodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub topic_id: String,
    pub consensus_timestamp: ConsensusTimestamp,
    pub sequence_number: u64,
    pub payer_account_id: Option<String>,
    pub message_base64: String,
}

/// Classification label produced by the parser.
///
/// The set of recognized kinds is closed, but unrecognized `type` strings are
/// preserved verbatim as `Other` so the substrate record stays queryable by
/// whatever the producer called the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    AgentInit,
    AgentCreated,
    Action,
    Transaction,
    RentalInitiated,
    RentalCompleted,
    Comms,
    Unknown,
    Other(String),
}

impl MessageKind {
    /// Maps a `type` discriminator string onto a kind.
    pub fn from_type_tag(tag: &str) -> Self {
        match tag {
            "AGENT_INIT" => Self::AgentInit,
            "AGENT_CREATED" => Self::AgentCreated,
            "ACTION" => Self::Action,
            "TRANSACTION" => Self::Transaction,
            "RENTAL_INITIATED" => Self::RentalInitiated,
            "RENTAL_COMPLETED" => Self::RentalCompleted,
            "COMMS" => Self::Comms,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentInit => "AGENT_INIT",
            Self::AgentCreated => "AGENT_CREATED",
            Self::Action => "ACTION",
            Self::Transaction => "TRANSACTION",
            Self::RentalInitiated => "RENTAL_INITIATED",
            Self::RentalCompleted => "RENTAL_COMPLETED",
            Self::Comms => "COMMS",
            Self::Unknown => "unknown",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parser's output for one message: the wire record plus whatever the
/// decode, classify, and validate stages managed to produce.
///
/// `decoded` is absent when the payload is not base64/UTF-8/JSON; `kind` is
/// absent exactly when `decoded` is; `event` is present only when the decoded
/// document matched a known schema.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message: TopicMessage,
    pub decoded: Option<Value>,
    pub kind: Option<MessageKind>,
    pub event: Option<TopicEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_type_tags_map_to_kinds() {
        assert_eq!(MessageKind::from_type_tag("AGENT_INIT"), MessageKind::AgentInit);
        assert_eq!(MessageKind::from_type_tag("RENTAL_COMPLETED"), MessageKind::RentalCompleted);
    }

    #[test]
    fn unknown_type_tag_is_preserved_verbatim() {
        let kind = MessageKind::from_type_tag("FIRMWARE_UPDATE");
        assert_eq!(kind, MessageKind::Other("FIRMWARE_UPDATE".into()));
        assert_eq!(kind.as_str(), "FIRMWARE_UPDATE");
    }
}
