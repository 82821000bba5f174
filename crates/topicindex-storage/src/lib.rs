//! Storage backends for the topic indexer.
//!
//! The `ProjectionStore` trait is the seam between the ingestion engine and
//! durable state. One `apply` call is one atomic unit: insert the substrate
//! record (ignoring duplicates), project the validated event if any, then
//! advance the per-topic sync cursor. A crash inside the unit must never
//! leave the cursor ahead of the record or the projection behind the cursor.
//!
//! Backends:
//! - `PostgresStore` — production backend, one transaction per message
//!   (feature `postgres`, on by default)
//! - `MemoryStore` — test backend reproducing the same observable semantics

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

use topicindex_core::cursor::TopicCursor;
use topicindex_core::error::IndexerError;
use topicindex_core::events::Settlement;
use topicindex_core::message::ParsedMessage;
use topicindex_core::timestamp::ConsensusTimestamp;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStore};

/// Durable state shared by all supervisors.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Apply one parsed message as a single atomic unit.
    ///
    /// Replays are harmless: a duplicate `(topic_id, sequence_number)` leaves
    /// the substrate record, the projections, and the cursor unchanged.
    async fn apply(&self, parsed: &ParsedMessage) -> Result<(), IndexerError>;

    /// Load the sync cursor for a topic (`None` = nothing ingested yet).
    async fn load_cursor(&self, topic_id: &str) -> Result<Option<TopicCursor>, IndexerError>;
}

// ─── Record types ─────────────────────────────────────────────────────────────

/// One substrate record: a message exactly as received, plus whatever the
/// parser produced.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub topic_id: String,
    pub consensus_timestamp: ConsensusTimestamp,
    pub sequence_number: u64,
    pub payer_account_id: Option<String>,
    pub message_base64: String,
    pub decoded_json: Option<Value>,
    pub message_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A projected agent, upserted by lifecycle events and touched by activity.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_name: String,
    pub platform: String,
    pub version: Option<String>,
    pub operating_account: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

/// Append-only audit row for ACTION / TRANSACTION events.
#[derive(Debug, Clone)]
pub struct AgentEventRecord {
    pub agent_id: String,
    pub event_type: String,
    pub session_key: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_type: Option<String>,
    pub action: Option<Value>,
    pub reasoning: Option<String>,
    pub details: Option<String>,
    pub previous_hash: Option<String>,
    pub timestamp: i64,
    pub consensus_timestamp: ConsensusTimestamp,
    pub raw_data: Value,
    pub created_at: DateTime<Utc>,
}

/// Rental lifecycle: `initiated` → `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalStatus {
    Initiated,
    Completed,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RentalStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "completed" => Ok(Self::Completed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RentalRecord {
    pub rental_id: String,
    pub agent_id: String,
    pub renter: Option<String>,
    pub escrow_account: Option<String>,
    pub stake_usd: Option<Decimal>,
    pub buffer_usd: Option<Decimal>,
    pub total_cost_usd: Option<Decimal>,
    pub settlement: Option<Value>,
    pub status: RentalStatus,
    pub initiated_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only agent-to-agent communication row.
#[derive(Debug, Clone)]
pub struct CommsRecord {
    pub topic_id: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub text: String,
    pub timestamp: String,
    pub consensus_timestamp: ConsensusTimestamp,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// ─── Shared projection helpers ────────────────────────────────────────────────

/// Monetary USD amounts are fixed-point with exactly two decimal places.
pub(crate) fn round_usd(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Settlement split as stored, with every party rounded to cents.
pub(crate) fn settlement_json(settlement: &Settlement) -> Value {
    serde_json::json!({
        "owner": round_usd(settlement.owner),
        "creator": round_usd(settlement.creator),
        "network": round_usd(settlement.network),
        "treasury": round_usd(settlement.treasury),
    })
}
