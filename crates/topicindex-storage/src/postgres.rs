//! PostgreSQL projection backend.
//!
//! Persists substrate records, projected entities, and sync cursors using
//! `sqlx` with connection pooling. Each applied message is one transaction:
//! record insert, projection, cursor upsert — in that order, so a crash can
//! never leave the cursor ahead of the data it claims.
//!
//! # Schema
//! Created on first connect (`CREATE TABLE IF NOT EXISTS`):
//! - `sync_cursors`   — one row per topic, the ingestion high-water mark
//! - `hcs_messages`   — raw substrate records, unique per (topic, sequence)
//! - `agents`         — upserted agent registry
//! - `agent_events`   — append-only ACTION / TRANSACTION audit log
//! - `rentals`        — two-state rental lifecycle
//! - `agent_comms`    — append-only agent-to-agent messages

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use topicindex_core::cursor::TopicCursor;
use topicindex_core::error::IndexerError;
use topicindex_core::events::TopicEvent;
use topicindex_core::message::ParsedMessage;
use topicindex_core::timestamp::ConsensusTimestamp;

use crate::{
    round_usd, settlement_json, AgentEventRecord, AgentRecord, CommsRecord, MessageRecord,
    ProjectionStore, RentalRecord, RentalStatus,
};

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

/// PostgreSQL-backed projection store.
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
/// All supervisors share one store; the per-message transaction plus the
/// at-most-one-supervisor-per-topic invariant keep cursor updates serial.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to a PostgreSQL database and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, IndexerError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS sync_cursors (
                topic_id             TEXT PRIMARY KEY,
                last_timestamp       TEXT NOT NULL,
                last_sequence_number BIGINT NOT NULL,
                updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS hcs_messages (
                id                  BIGSERIAL PRIMARY KEY,
                topic_id            TEXT NOT NULL,
                consensus_timestamp TEXT NOT NULL,
                sequence_number     BIGINT NOT NULL,
                payer_account_id    TEXT,
                message_base64      TEXT NOT NULL,
                decoded_json        JSONB,
                message_type        TEXT,
                created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (topic_id, sequence_number)
            )",
            "CREATE INDEX IF NOT EXISTS idx_hcs_messages_topic_consensus
             ON hcs_messages(topic_id, consensus_timestamp)",
            "CREATE TABLE IF NOT EXISTS agents (
                agent_id          TEXT PRIMARY KEY,
                agent_name        TEXT NOT NULL,
                platform          TEXT NOT NULL,
                version           TEXT,
                operating_account TEXT,
                first_seen_at     TIMESTAMPTZ NOT NULL,
                last_seen_at      TIMESTAMPTZ NOT NULL,
                metadata          JSONB
            )",
            "CREATE TABLE IF NOT EXISTS agent_events (
                id                  BIGSERIAL PRIMARY KEY,
                agent_id            TEXT NOT NULL,
                event_type          TEXT NOT NULL,
                session_key         TEXT,
                transaction_id      TEXT,
                transaction_type    TEXT,
                action              JSONB,
                reasoning           TEXT,
                details             TEXT,
                previous_hash       TEXT,
                timestamp           BIGINT NOT NULL,
                consensus_timestamp TEXT NOT NULL,
                raw_data            JSONB NOT NULL,
                created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE INDEX IF NOT EXISTS idx_agent_events_agent
             ON agent_events(agent_id, consensus_timestamp)",
            "CREATE TABLE IF NOT EXISTS rentals (
                rental_id      TEXT PRIMARY KEY,
                agent_id       TEXT NOT NULL,
                renter         TEXT,
                escrow_account TEXT,
                stake_usd      NUMERIC(10,2),
                buffer_usd     NUMERIC(10,2),
                total_cost_usd NUMERIC(10,2),
                settlement     JSONB,
                status         TEXT NOT NULL DEFAULT 'initiated',
                initiated_at   BIGINT,
                completed_at   BIGINT,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS agent_comms (
                id                  BIGSERIAL PRIMARY KEY,
                topic_id            TEXT NOT NULL,
                from_agent          TEXT NOT NULL,
                to_agent            TEXT,
                text                TEXT NOT NULL,
                timestamp           TEXT NOT NULL,
                consensus_timestamp TEXT NOT NULL,
                metadata            JSONB,
                created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE INDEX IF NOT EXISTS idx_agent_comms_from
             ON agent_comms(from_agent, consensus_timestamp)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }

        debug!("PostgresStore schema initialized");
        Ok(())
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn project(
        tx: &mut Transaction<'_, Postgres>,
        parsed: &ParsedMessage,
        event: &TopicEvent,
    ) -> Result<(), IndexerError> {
        let m = &parsed.message;
        let consensus = m.consensus_timestamp.to_string();
        let raw_data = parsed.decoded.clone().unwrap_or(Value::Null);

        match event {
            TopicEvent::AgentInit(agent) | TopicEvent::AgentCreated(agent) => {
                let metadata = agent.metadata.clone().map(Value::Object);
                sqlx::query(
                    "INSERT INTO agents
                        (agent_id, agent_name, platform, version, operating_account,
                         first_seen_at, last_seen_at, metadata)
                     VALUES ($1, $2, $3, $4, $5, NOW(), NOW(), $6)
                     ON CONFLICT (agent_id) DO UPDATE SET
                        agent_name        = EXCLUDED.agent_name,
                        platform          = EXCLUDED.platform,
                        version           = EXCLUDED.version,
                        operating_account = EXCLUDED.operating_account,
                        metadata          = EXCLUDED.metadata,
                        last_seen_at      = NOW()",
                )
                .bind(&agent.agent_id)
                .bind(&agent.agent_name)
                .bind(&agent.platform)
                .bind(&agent.version)
                .bind(&agent.operating_account)
                .bind(metadata)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
            }
            TopicEvent::Action(action) => {
                let detail = serde_json::to_value(&action.action)
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO agent_events
                        (agent_id, event_type, session_key, action, reasoning,
                         previous_hash, timestamp, consensus_timestamp, raw_data)
                     VALUES ($1, 'ACTION', $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(&action.agent_id)
                .bind(&action.session_key)
                .bind(detail)
                .bind(&action.reasoning)
                .bind(&action.previous_hash)
                .bind(action.timestamp)
                .bind(&consensus)
                .bind(raw_data)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;

                touch_agent(tx, &action.agent_id).await?;
            }
            TopicEvent::Transaction(txn) => {
                sqlx::query(
                    "INSERT INTO agent_events
                        (agent_id, event_type, transaction_id, transaction_type, details,
                         reasoning, previous_hash, timestamp, consensus_timestamp, raw_data)
                     VALUES ($1, 'TRANSACTION', $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                .bind(&txn.agent_id)
                .bind(&txn.transaction_id)
                .bind(&txn.transaction_type)
                .bind(&txn.details)
                .bind(&txn.reasoning)
                .bind(&txn.previous_hash)
                .bind(txn.timestamp)
                .bind(&consensus)
                .bind(raw_data)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;

                touch_agent(tx, &txn.agent_id).await?;
            }
            TopicEvent::RentalInitiated(rental) => {
                sqlx::query(
                    "INSERT INTO rentals
                        (rental_id, agent_id, renter, escrow_account, stake_usd,
                         buffer_usd, status, initiated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, 'initiated', $7)
                     ON CONFLICT (rental_id) DO NOTHING",
                )
                .bind(&rental.rental_id)
                .bind(&rental.agent_id)
                .bind(&rental.renter)
                .bind(&rental.escrow_account)
                .bind(round_usd(rental.stake_usd))
                .bind(round_usd(rental.buffer_usd))
                .bind(rental.timestamp)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
            }
            TopicEvent::RentalCompleted(rental) => {
                // No matching row is a silent no-op: the initiation may sit in
                // a backfill window we have not reached yet.
                sqlx::query(
                    "UPDATE rentals SET
                        status         = 'completed',
                        total_cost_usd = $2,
                        settlement     = $3,
                        completed_at   = $4,
                        updated_at     = NOW()
                     WHERE rental_id = $1",
                )
                .bind(&rental.rental_id)
                .bind(round_usd(rental.total_cost_usd))
                .bind(settlement_json(&rental.settlement))
                .bind(rental.timestamp)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
            }
            TopicEvent::Comms(comms) => {
                sqlx::query(
                    "INSERT INTO agent_comms
                        (topic_id, from_agent, to_agent, text, timestamp,
                         consensus_timestamp, metadata)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(&m.topic_id)
                .bind(&comms.from)
                .bind(&comms.to)
                .bind(&comms.text)
                .bind(&comms.timestamp)
                .bind(&consensus)
                .bind(comms.metadata.clone().map(Value::Object))
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }

    // ── Read helpers (the contract the read API consumes) ────────────────────

    /// Latest substrate records for a topic, newest first. Pass the smallest
    /// sequence number of the previous page as `before_sequence` to paginate.
    pub async fn recent_messages(
        &self,
        topic_id: &str,
        limit: u32,
        before_sequence: Option<u64>,
    ) -> Result<Vec<MessageRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT topic_id, consensus_timestamp, sequence_number, payer_account_id,
                    message_base64, decoded_json, message_type, created_at
             FROM hcs_messages
             WHERE topic_id = $1
               AND ($2::BIGINT IS NULL OR sequence_number < $2)
             ORDER BY sequence_number DESC
             LIMIT $3",
        )
        .bind(topic_id)
        .bind(before_sequence.map(|s| s as i64))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, IndexerError> {
        let row = sqlx::query(
            "SELECT agent_id, agent_name, platform, version, operating_account,
                    first_seen_at, last_seen_at, metadata
             FROM agents WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        row.as_ref().map(agent_from_row).transpose()
    }

    pub async fn get_rental(&self, rental_id: &str) -> Result<Option<RentalRecord>, IndexerError> {
        let row = sqlx::query(
            "SELECT rental_id, agent_id, renter, escrow_account, stake_usd, buffer_usd,
                    total_cost_usd, settlement, status, initiated_at, completed_at,
                    created_at, updated_at
             FROM rentals WHERE rental_id = $1",
        )
        .bind(rental_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        row.as_ref().map(rental_from_row).transpose()
    }

    /// Events logged for one agent, oldest first.
    pub async fn events_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<AgentEventRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT agent_id, event_type, session_key, transaction_id, transaction_type,
                    action, reasoning, details, previous_hash, timestamp,
                    consensus_timestamp, raw_data, created_at
             FROM agent_events
             WHERE agent_id = $1
             ORDER BY consensus_timestamp ASC
             LIMIT $2",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(agent_event_from_row).collect()
    }

    /// Communications sent or received by one agent, newest first.
    pub async fn comms_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<CommsRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT topic_id, from_agent, to_agent, text, timestamp,
                    consensus_timestamp, metadata, created_at
             FROM agent_comms
             WHERE from_agent = $1 OR to_agent = $1
             ORDER BY consensus_timestamp DESC
             LIMIT $2",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(comms_from_row).collect()
    }
}

#[async_trait]
impl ProjectionStore for PostgresStore {
    async fn apply(&self, parsed: &ParsedMessage) -> Result<(), IndexerError> {
        let m = &parsed.message;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO hcs_messages
                (topic_id, consensus_timestamp, sequence_number, payer_account_id,
                 message_base64, decoded_json, message_type)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (topic_id, sequence_number) DO NOTHING",
        )
        .bind(&m.topic_id)
        .bind(m.consensus_timestamp.to_string())
        .bind(m.sequence_number as i64)
        .bind(&m.payer_account_id)
        .bind(&m.message_base64)
        .bind(&parsed.decoded)
        .bind(parsed.kind.as_ref().map(|k| k.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        // Project only when the record is new, so a replay cannot
        // double-append audit rows.
        if result.rows_affected() > 0 {
            if let Some(event) = &parsed.event {
                Self::project(&mut tx, parsed, event).await?;
            }
        }

        // Cursor upsert is the last statement of the unit; the guard keeps it
        // from ever moving backwards.
        sqlx::query(
            "INSERT INTO sync_cursors (topic_id, last_timestamp, last_sequence_number, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (topic_id) DO UPDATE SET
                last_timestamp       = EXCLUDED.last_timestamp,
                last_sequence_number = EXCLUDED.last_sequence_number,
                updated_at           = NOW()
             WHERE sync_cursors.last_sequence_number < EXCLUDED.last_sequence_number",
        )
        .bind(&m.topic_id)
        .bind(m.consensus_timestamp.to_string())
        .bind(m.sequence_number as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit: {e}")))?;

        Ok(())
    }

    async fn load_cursor(&self, topic_id: &str) -> Result<Option<TopicCursor>, IndexerError> {
        let row = sqlx::query(
            "SELECT last_timestamp, last_sequence_number
             FROM sync_cursors WHERE topic_id = $1",
        )
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        row.map(|r| {
            let timestamp: ConsensusTimestamp =
                r.get::<String, _>("last_timestamp").parse()?;
            Ok(TopicCursor::new(
                timestamp,
                r.get::<i64, _>("last_sequence_number") as u64,
            ))
        })
        .transpose()
    }
}

async fn touch_agent(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: &str,
) -> Result<(), IndexerError> {
    // Activity from an agent we have never seen creates nothing.
    sqlx::query("UPDATE agents SET last_seen_at = NOW() WHERE agent_id = $1")
        .bind(agent_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;
    Ok(())
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn message_from_row(row: &PgRow) -> Result<MessageRecord, IndexerError> {
    Ok(MessageRecord {
        topic_id: row.try_get("topic_id").map_err(storage_err)?,
        consensus_timestamp: row
            .try_get::<String, _>("consensus_timestamp")
            .map_err(storage_err)?
            .parse()?,
        sequence_number: row.try_get::<i64, _>("sequence_number").map_err(storage_err)? as u64,
        payer_account_id: row.try_get("payer_account_id").map_err(storage_err)?,
        message_base64: row.try_get("message_base64").map_err(storage_err)?,
        decoded_json: row.try_get("decoded_json").map_err(storage_err)?,
        message_type: row.try_get("message_type").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn agent_from_row(row: &PgRow) -> Result<AgentRecord, IndexerError> {
    Ok(AgentRecord {
        agent_id: row.try_get("agent_id").map_err(storage_err)?,
        agent_name: row.try_get("agent_name").map_err(storage_err)?,
        platform: row.try_get("platform").map_err(storage_err)?,
        version: row.try_get("version").map_err(storage_err)?,
        operating_account: row.try_get("operating_account").map_err(storage_err)?,
        first_seen_at: row.try_get("first_seen_at").map_err(storage_err)?,
        last_seen_at: row.try_get("last_seen_at").map_err(storage_err)?,
        metadata: row.try_get("metadata").map_err(storage_err)?,
    })
}

fn agent_event_from_row(row: &PgRow) -> Result<AgentEventRecord, IndexerError> {
    Ok(AgentEventRecord {
        agent_id: row.try_get("agent_id").map_err(storage_err)?,
        event_type: row.try_get("event_type").map_err(storage_err)?,
        session_key: row.try_get("session_key").map_err(storage_err)?,
        transaction_id: row.try_get("transaction_id").map_err(storage_err)?,
        transaction_type: row.try_get("transaction_type").map_err(storage_err)?,
        action: row.try_get("action").map_err(storage_err)?,
        reasoning: row.try_get("reasoning").map_err(storage_err)?,
        details: row.try_get("details").map_err(storage_err)?,
        previous_hash: row.try_get("previous_hash").map_err(storage_err)?,
        timestamp: row.try_get("timestamp").map_err(storage_err)?,
        consensus_timestamp: row
            .try_get::<String, _>("consensus_timestamp")
            .map_err(storage_err)?
            .parse()?,
        raw_data: row.try_get("raw_data").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn rental_from_row(row: &PgRow) -> Result<RentalRecord, IndexerError> {
    Ok(RentalRecord {
        rental_id: row.try_get("rental_id").map_err(storage_err)?,
        agent_id: row.try_get("agent_id").map_err(storage_err)?,
        renter: row.try_get("renter").map_err(storage_err)?,
        escrow_account: row.try_get("escrow_account").map_err(storage_err)?,
        stake_usd: row.try_get::<Option<Decimal>, _>("stake_usd").map_err(storage_err)?,
        buffer_usd: row.try_get::<Option<Decimal>, _>("buffer_usd").map_err(storage_err)?,
        total_cost_usd: row
            .try_get::<Option<Decimal>, _>("total_cost_usd")
            .map_err(storage_err)?,
        settlement: row.try_get("settlement").map_err(storage_err)?,
        status: row
            .try_get::<String, _>("status")
            .map_err(storage_err)?
            .parse()
            .unwrap_or(RentalStatus::Initiated),
        initiated_at: row.try_get("initiated_at").map_err(storage_err)?,
        completed_at: row.try_get("completed_at").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

fn comms_from_row(row: &PgRow) -> Result<CommsRecord, IndexerError> {
    Ok(CommsRecord {
        topic_id: row.try_get("topic_id").map_err(storage_err)?,
        from_agent: row.try_get("from_agent").map_err(storage_err)?,
        to_agent: row.try_get("to_agent").map_err(storage_err)?,
        text: row.try_get("text").map_err(storage_err)?,
        timestamp: row.try_get("timestamp").map_err(storage_err)?,
        consensus_timestamp: row
            .try_get::<String, _>("consensus_timestamp")
            .map_err(storage_err)?
            .parse()?,
        metadata: row.try_get("metadata").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    // Integration tests require a running PostgreSQL instance.
    // Set DATABASE_URL to enable:
    // DATABASE_URL=postgresql://localhost/topicindex_test cargo test -- --ignored

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::json;
    use topicindex_core::message::TopicMessage;
    use topicindex_core::parser::MessageParser;
    use topicindex_core::timestamp::ConsensusTimestamp;

    use crate::{ProjectionStore, RentalStatus};

    fn parsed(seq: u64, secs: i64, payload: &serde_json::Value) -> topicindex_core::ParsedMessage {
        MessageParser::new().parse(TopicMessage {
            topic_id: "0.0.9999".into(),
            consensus_timestamp: ConsensusTimestamp::new(secs, 0),
            sequence_number: seq,
            payer_account_id: None,
            message_base64: BASE64.encode(payload.to_string()),
        })
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn apply_is_idempotent_and_advances_cursor() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = super::PostgresStore::connect(&url).await.unwrap();

        let init = parsed(
            1,
            1_700_000_000,
            &json!({
                "type": "AGENT_INIT",
                "agent_id": "pg-test-a1",
                "agent_name": "scout",
                "platform": "hedera",
                "timestamp": 1700000000
            }),
        );
        store.apply(&init).await.unwrap();
        store.apply(&init).await.unwrap();

        let cursor = store.load_cursor("0.0.9999").await.unwrap().unwrap();
        assert_eq!(cursor.sequence_number, 1);

        let agent = store.get_agent("pg-test-a1").await.unwrap().unwrap();
        assert_eq!(agent.agent_name, "scout");

        let messages = store.recent_messages("0.0.9999", 10, None).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn rental_lifecycle_roundtrip() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = super::PostgresStore::connect(&url).await.unwrap();

        store
            .apply(&parsed(
                10,
                1_700_000_010,
                &json!({
                    "type": "RENTAL_INITIATED",
                    "agent_id": "pg-test-a1",
                    "rental_id": "pg-test-r1",
                    "renter": "0.0.1001",
                    "escrow_account": "0.0.2002",
                    "stake_usd": 10.0,
                    "buffer_usd": 5.0,
                    "timestamp": 1700000010
                }),
            ))
            .await
            .unwrap();
        store
            .apply(&parsed(
                11,
                1_700_000_011,
                &json!({
                    "type": "RENTAL_COMPLETED",
                    "rental_id": "pg-test-r1",
                    "total_cost_usd": 7.5,
                    "settlement": {"owner": 6.9, "creator": 0.375, "network": 0.15, "treasury": 0.075},
                    "timestamp": 1700000011
                }),
            ))
            .await
            .unwrap();

        let rental = store.get_rental("pg-test-r1").await.unwrap().unwrap();
        assert_eq!(rental.status, RentalStatus::Completed);
        assert_eq!(rental.total_cost_usd.unwrap().to_string(), "7.50");
        assert!(rental.completed_at >= rental.initiated_at);
    }
}
