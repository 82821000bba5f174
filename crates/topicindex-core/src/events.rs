//! Typed event shapes projected into the relational model.
//!
//! Each struct mirrors one recognized payload schema. Validation is plain
//! serde deserialization from the decoded document: a missing required field
//! fails the match and the message stays classified-but-unvalidated.
//! Unknown extra fields (`type`, `version`, producer extensions) are ignored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared shape of AGENT_INIT and AGENT_CREATED.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentLifecycle {
    pub agent_id: String,
    pub agent_name: String,
    pub platform: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub operating_account: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionDetail {
    pub tool: String,
    pub parameters: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionEvent {
    pub agent_id: String,
    pub session_key: String,
    pub action: ActionDetail,
    pub timestamp: i64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionEvent {
    pub agent_id: String,
    pub transaction_type: String,
    pub transaction_id: String,
    pub details: String,
    pub timestamp: i64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RentalInitiated {
    pub agent_id: String,
    pub rental_id: String,
    pub renter: String,
    pub escrow_account: String,
    pub stake_usd: Decimal,
    pub buffer_usd: Decimal,
    pub timestamp: i64,
}

/// Per-party split of a completed rental's cost.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settlement {
    pub owner: Decimal,
    pub creator: Decimal,
    pub network: Decimal,
    pub treasury: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RentalCompleted {
    pub rental_id: String,
    pub total_cost_usd: Decimal,
    pub settlement: Settlement,
    pub timestamp: i64,
}

/// Agent-to-agent communication. The only kind without a `type`
/// discriminator; classified structurally by `{from, text, timestamp}`.
/// Its timestamp is a string as given by the producer, not an epoch integer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommsEvent {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub text: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// A validated event, tagged by kind.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    AgentInit(AgentLifecycle),
    AgentCreated(AgentLifecycle),
    Action(ActionEvent),
    Transaction(TransactionEvent),
    RentalInitiated(RentalInitiated),
    RentalCompleted(RentalCompleted),
    Comms(CommsEvent),
}
