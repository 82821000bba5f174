//! In-memory projection backend.
//!
//! Reproduces the observable semantics of the Postgres backend — duplicate
//! suppression, per-kind projection, cursor-advances-last — over plain maps.
//! Useful for tests and for driving supervisors without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use topicindex_core::cursor::TopicCursor;
use topicindex_core::error::IndexerError;
use topicindex_core::events::TopicEvent;
use topicindex_core::message::ParsedMessage;

use crate::{
    round_usd, settlement_json, AgentEventRecord, AgentRecord, CommsRecord, MessageRecord,
    ProjectionStore, RentalRecord, RentalStatus,
};

#[derive(Default)]
struct Inner {
    cursors: HashMap<String, TopicCursor>,
    /// Keyed by (topic_id, sequence_number); BTreeMap keeps per-topic order.
    messages: BTreeMap<(String, u64), MessageRecord>,
    agents: HashMap<String, AgentRecord>,
    agent_events: Vec<AgentEventRecord>,
    rentals: HashMap<String, RentalRecord>,
    comms: Vec<CommsRecord>,
}

/// In-memory projection store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, topic_id: &str, sequence_number: u64) -> Option<MessageRecord> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .get(&(topic_id.to_string(), sequence_number))
            .cloned()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    /// Sequence numbers stored for a topic, in order.
    pub fn sequences_for(&self, topic_id: &str) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .keys()
            .filter(|(topic, _)| topic == topic_id)
            .map(|(_, seq)| *seq)
            .collect()
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.inner.lock().unwrap().agents.get(agent_id).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.inner.lock().unwrap().agents.len()
    }

    pub fn agent_events_for(&self, agent_id: &str) -> Vec<AgentEventRecord> {
        self.inner
            .lock()
            .unwrap()
            .agent_events
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn rental(&self, rental_id: &str) -> Option<RentalRecord> {
        self.inner.lock().unwrap().rentals.get(rental_id).cloned()
    }

    pub fn rental_count(&self) -> usize {
        self.inner.lock().unwrap().rentals.len()
    }

    pub fn comms(&self) -> Vec<CommsRecord> {
        self.inner.lock().unwrap().comms.clone()
    }

    pub fn cursor(&self, topic_id: &str) -> Option<TopicCursor> {
        self.inner.lock().unwrap().cursors.get(topic_id).copied()
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn apply(&self, parsed: &ParsedMessage) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock().unwrap();
        let m = &parsed.message;

        let key = (m.topic_id.clone(), m.sequence_number);
        let inserted = if inner.messages.contains_key(&key) {
            false
        } else {
            inner.messages.insert(
                key,
                MessageRecord {
                    topic_id: m.topic_id.clone(),
                    consensus_timestamp: m.consensus_timestamp,
                    sequence_number: m.sequence_number,
                    payer_account_id: m.payer_account_id.clone(),
                    message_base64: m.message_base64.clone(),
                    decoded_json: parsed.decoded.clone(),
                    message_type: parsed.kind.as_ref().map(|k| k.as_str().to_string()),
                    created_at: Utc::now(),
                },
            );
            true
        };

        // Project only on first sight of this sequence number, so replays
        // cannot double-append audit rows.
        if inserted {
            if let Some(event) = &parsed.event {
                project(&mut inner, parsed, event)?;
            }
        }

        // Cursor last; never regresses.
        inner
            .cursors
            .entry(m.topic_id.clone())
            .and_modify(|cursor| cursor.advance(m.consensus_timestamp, m.sequence_number))
            .or_insert_with(|| TopicCursor::new(m.consensus_timestamp, m.sequence_number));

        Ok(())
    }

    async fn load_cursor(&self, topic_id: &str) -> Result<Option<TopicCursor>, IndexerError> {
        Ok(self.inner.lock().unwrap().cursors.get(topic_id).copied())
    }
}

fn project(
    inner: &mut Inner,
    parsed: &ParsedMessage,
    event: &TopicEvent,
) -> Result<(), IndexerError> {
    let m = &parsed.message;
    let raw_data = parsed.decoded.clone().unwrap_or(serde_json::Value::Null);
    let now = Utc::now();

    match event {
        TopicEvent::AgentInit(agent) | TopicEvent::AgentCreated(agent) => {
            let metadata = agent.metadata.clone().map(serde_json::Value::Object);
            inner
                .agents
                .entry(agent.agent_id.clone())
                .and_modify(|existing| {
                    existing.agent_name = agent.agent_name.clone();
                    existing.platform = agent.platform.clone();
                    existing.version = agent.version.clone();
                    existing.operating_account = agent.operating_account.clone();
                    existing.metadata = metadata.clone();
                    existing.last_seen_at = now;
                })
                .or_insert_with(|| AgentRecord {
                    agent_id: agent.agent_id.clone(),
                    agent_name: agent.agent_name.clone(),
                    platform: agent.platform.clone(),
                    version: agent.version.clone(),
                    operating_account: agent.operating_account.clone(),
                    first_seen_at: now,
                    last_seen_at: now,
                    metadata,
                });
        }
        TopicEvent::Action(action) => {
            inner.agent_events.push(AgentEventRecord {
                agent_id: action.agent_id.clone(),
                event_type: "ACTION".into(),
                session_key: Some(action.session_key.clone()),
                transaction_id: None,
                transaction_type: None,
                action: Some(
                    serde_json::to_value(&action.action)
                        .map_err(|e| IndexerError::Storage(e.to_string()))?,
                ),
                reasoning: action.reasoning.clone(),
                details: None,
                previous_hash: action.previous_hash.clone(),
                timestamp: action.timestamp,
                consensus_timestamp: m.consensus_timestamp,
                raw_data,
                created_at: now,
            });
            // Touch last_seen; activity for an unknown agent creates nothing.
            if let Some(agent) = inner.agents.get_mut(&action.agent_id) {
                agent.last_seen_at = now;
            }
        }
        TopicEvent::Transaction(tx) => {
            inner.agent_events.push(AgentEventRecord {
                agent_id: tx.agent_id.clone(),
                event_type: "TRANSACTION".into(),
                session_key: None,
                transaction_id: Some(tx.transaction_id.clone()),
                transaction_type: Some(tx.transaction_type.clone()),
                action: None,
                reasoning: tx.reasoning.clone(),
                details: Some(tx.details.clone()),
                previous_hash: tx.previous_hash.clone(),
                timestamp: tx.timestamp,
                consensus_timestamp: m.consensus_timestamp,
                raw_data,
                created_at: now,
            });
            if let Some(agent) = inner.agents.get_mut(&tx.agent_id) {
                agent.last_seen_at = now;
            }
        }
        TopicEvent::RentalInitiated(rental) => {
            inner
                .rentals
                .entry(rental.rental_id.clone())
                .or_insert_with(|| RentalRecord {
                    rental_id: rental.rental_id.clone(),
                    agent_id: rental.agent_id.clone(),
                    renter: Some(rental.renter.clone()),
                    escrow_account: Some(rental.escrow_account.clone()),
                    stake_usd: Some(round_usd(rental.stake_usd)),
                    buffer_usd: Some(round_usd(rental.buffer_usd)),
                    total_cost_usd: None,
                    settlement: None,
                    status: RentalStatus::Initiated,
                    initiated_at: Some(rental.timestamp),
                    completed_at: None,
                    created_at: now,
                    updated_at: now,
                });
        }
        TopicEvent::RentalCompleted(rental) => {
            // No matching initiation yet: silent no-op, the cursor still
            // advances and the raw record stays queryable.
            if let Some(existing) = inner.rentals.get_mut(&rental.rental_id) {
                existing.status = RentalStatus::Completed;
                existing.total_cost_usd = Some(round_usd(rental.total_cost_usd));
                existing.settlement = Some(settlement_json(&rental.settlement));
                existing.completed_at = Some(rental.timestamp);
                existing.updated_at = now;
            }
        }
        TopicEvent::Comms(comms) => {
            inner.comms.push(CommsRecord {
                topic_id: m.topic_id.clone(),
                from_agent: comms.from.clone(),
                to_agent: comms.to.clone(),
                text: comms.text.clone(),
                timestamp: comms.timestamp.clone(),
                consensus_timestamp: m.consensus_timestamp,
                metadata: comms.metadata.clone().map(serde_json::Value::Object),
                created_at: now,
            });
        }
    }
    Ok(())
}
