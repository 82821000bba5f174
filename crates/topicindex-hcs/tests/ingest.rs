//! End-to-end ingestion scenarios over scripted mirror/stream fakes and the
//! in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use topicindex_core::error::IndexerError;
use topicindex_core::indexer::{IngestConfig, SupervisorPhase};
use topicindex_core::message::TopicMessage;
use topicindex_core::parser::MessageParser;
use topicindex_core::timestamp::ConsensusTimestamp;
use topicindex_hcs::rest::{MessagesPage, MirrorApi, MirrorMessage, PageLinks};
use topicindex_hcs::stream::{MessageStream, TopicStream};
use topicindex_hcs::IngestionManager;
use topicindex_storage::{MemoryStore, ProjectionStore, RentalStatus};

const TOPIC: &str = "0.0.1234";

// ─── Scripted fakes ──────────────────────────────────────────────────────────

/// Serves scripted pages in order; once the script runs out, every request
/// returns an empty final page.
#[derive(Default)]
struct ScriptedMirror {
    pages: Mutex<VecDeque<Result<MessagesPage, IndexerError>>>,
}

impl ScriptedMirror {
    fn new(pages: Vec<Result<MessagesPage, IndexerError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
        }
    }

    fn pop(&self) -> Result<MessagesPage, IndexerError> {
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MessagesPage::default()))
    }
}

#[async_trait]
impl MirrorApi for ScriptedMirror {
    async fn fetch_messages(
        &self,
        _topic_id: &str,
        _cursor: Option<&ConsensusTimestamp>,
        _limit: u32,
    ) -> Result<MessagesPage, IndexerError> {
        self.pop()
    }

    async fn fetch_next(&self, _next: &str) -> Result<MessagesPage, IndexerError> {
        self.pop()
    }
}

/// Hands out one scripted item sequence per subscribe call; once the scripts
/// run out, subscriptions stay silently open forever.
#[derive(Default)]
struct ScriptedStream {
    scripts: Mutex<VecDeque<Vec<Result<TopicMessage, IndexerError>>>>,
    starts: Mutex<Vec<Option<ConsensusTimestamp>>>,
}

impl ScriptedStream {
    fn new(scripts: Vec<Vec<Result<TopicMessage, IndexerError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            starts: Mutex::new(vec![]),
        }
    }

    fn recorded_starts(&self) -> Vec<Option<ConsensusTimestamp>> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopicStream for ScriptedStream {
    async fn subscribe(
        &self,
        _topic_id: &str,
        start: Option<ConsensusTimestamp>,
    ) -> Result<MessageStream, IndexerError> {
        self.starts.lock().unwrap().push(start);
        match self.scripts.lock().unwrap().pop_front() {
            Some(items) => Ok(Box::pin(futures::stream::iter(items))),
            None => Ok(Box::pin(futures::stream::pending::<
                Result<TopicMessage, IndexerError>,
            >())),
        }
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn payload_b64(payload: &serde_json::Value) -> String {
    BASE64.encode(payload.to_string())
}

fn mirror_msg(seq: u64, secs: i64, payload: &serde_json::Value) -> MirrorMessage {
    MirrorMessage {
        consensus_timestamp: format!("{secs}.000000000"),
        topic_id: TOPIC.into(),
        message: payload_b64(payload),
        payer_account_id: Some("0.0.2".into()),
        sequence_number: seq,
        running_hash: None,
        running_hash_version: None,
        chunk_info: None,
    }
}

fn topic_msg(seq: u64, secs: i64, message_base64: String) -> TopicMessage {
    TopicMessage {
        topic_id: TOPIC.into(),
        consensus_timestamp: ConsensusTimestamp::new(secs, 0),
        sequence_number: seq,
        payer_account_id: Some("0.0.2".into()),
        message_base64,
    }
}

fn page(messages: Vec<MirrorMessage>, next: Option<&str>) -> MessagesPage {
    MessagesPage {
        messages,
        links: PageLinks {
            next: next.map(String::from),
        },
    }
}

fn agent_init(agent_id: &str, secs: i64) -> serde_json::Value {
    json!({
        "type": "AGENT_INIT",
        "agent_id": agent_id,
        "agent_name": "scout",
        "platform": "hedera",
        "timestamp": secs
    })
}

fn action(agent_id: &str, secs: i64) -> serde_json::Value {
    json!({
        "type": "ACTION",
        "agent_id": agent_id,
        "session_key": "s1",
        "action": {"tool": "search", "parameters": {}, "result": "ok"},
        "timestamp": secs
    })
}

async fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn config_for(topics: &[&str]) -> IngestConfig {
    IngestConfig {
        topic_ids: topics.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_backfill_projects_history_and_sets_cursor() {
    let mirror = Arc::new(ScriptedMirror::new(vec![Ok(page(
        vec![
            mirror_msg(1, 1_700_000_000, &agent_init("a1", 1_700_000_000)),
            mirror_msg(2, 1_700_000_001, &action("a1", 1_700_000_001)),
        ],
        None,
    ))]));
    let stream = Arc::new(ScriptedStream::default());
    let store = Arc::new(MemoryStore::new());

    let manager =
        IngestionManager::new(mirror, stream, Arc::clone(&store), config_for(&[TOPIC]));
    manager.start().await;

    assert!(
        wait_until(3_000, || {
            store.cursor(TOPIC).map(|c| c.sequence_number) == Some(2)
        })
        .await,
        "backfill did not reach sequence 2"
    );

    assert_eq!(store.message_count(), 2);
    assert_eq!(store.sequences_for(TOPIC), vec![1, 2]);
    assert_eq!(store.agent_count(), 1);
    assert_eq!(store.agent_events_for("a1").len(), 1);
    let cursor = store.cursor(TOPIC).unwrap();
    assert_eq!(cursor.timestamp.to_string(), "1700000001.000000000");

    // Backfill hands off to the stream once the last page has no next link.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let status = manager.status().await;
        if status[TOPIC].phase == SupervisorPhase::Streaming {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "supervisor never reached streaming"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    manager.stop().await;
}

#[tokio::test]
async fn resume_stores_undecodable_live_message_and_advances_cursor() {
    // Cursor already at 5 when the process comes up.
    let store = Arc::new(MemoryStore::new());
    let seed = MessageParser::new().parse(topic_msg(
        5,
        1_700_000_500,
        payload_b64(&json!({"boot": true})),
    ));
    store.apply(&seed).await.unwrap();

    let invalid_utf8 = BASE64.encode([0xff, 0xfe, 0xfd]);
    let mirror = Arc::new(ScriptedMirror::default());
    let stream = Arc::new(ScriptedStream::new(vec![vec![Ok(topic_msg(
        6,
        1_700_000_600,
        invalid_utf8,
    ))]]));

    let manager = IngestionManager::new(
        mirror,
        Arc::clone(&stream),
        Arc::clone(&store),
        config_for(&[TOPIC]),
    );
    manager.start().await;

    assert!(
        wait_until(3_000, || {
            store.cursor(TOPIC).map(|c| c.sequence_number) == Some(6)
        })
        .await,
        "live message did not advance the cursor"
    );

    let record = store.message(TOPIC, 6).unwrap();
    assert!(record.decoded_json.is_none());
    assert!(record.message_type.is_none());

    // The supervisor subscribed from the stored cursor; the +1ns bump is the
    // stream implementation's job, not the supervisor's.
    let starts = stream.recorded_starts();
    assert_eq!(
        starts.first().copied().flatten().map(|ts| ts.to_string()),
        Some("1700000500.000000000".into())
    );

    manager.stop().await;
}

#[tokio::test]
async fn rental_lifecycle_survives_reconnect() {
    // Backfill pass 1 carries the initiation; the stream then drops, and the
    // reconnect loop's next backfill pass picks up the completion.
    let mirror = Arc::new(ScriptedMirror::new(vec![
        Ok(page(
            vec![mirror_msg(
                10,
                1_700_000_010,
                &json!({
                    "type": "RENTAL_INITIATED",
                    "agent_id": "a1",
                    "rental_id": "r1",
                    "renter": "0.0.1001",
                    "escrow_account": "0.0.2002",
                    "stake_usd": 10.0,
                    "buffer_usd": 5.0,
                    "timestamp": 1700000010
                }),
            )],
            None,
        )),
        Ok(page(
            vec![mirror_msg(
                11,
                1_700_000_011,
                &json!({
                    "type": "RENTAL_COMPLETED",
                    "rental_id": "r1",
                    "total_cost_usd": 7.5,
                    "settlement": {"owner": 6.9, "creator": 0.375, "network": 0.15, "treasury": 0.075},
                    "timestamp": 1700000011
                }),
            )],
            None,
        )),
    ]));
    let stream = Arc::new(ScriptedStream::new(vec![vec![Err(IndexerError::Stream(
        "connection dropped".into(),
    ))]]));
    let store = Arc::new(MemoryStore::new());

    let manager =
        IngestionManager::new(mirror, stream, Arc::clone(&store), config_for(&[TOPIC]));
    manager.start().await;

    // Reconnect backoff is one second for the first attempt.
    assert!(
        wait_until(5_000, || {
            store
                .rental("r1")
                .map(|r| r.status == RentalStatus::Completed)
                .unwrap_or(false)
        })
        .await,
        "rental never completed after reconnect"
    );

    assert_eq!(store.rental_count(), 1);
    let rental = store.rental("r1").unwrap();
    assert_eq!(rental.stake_usd.unwrap().to_string(), "10.00");
    assert_eq!(rental.buffer_usd.unwrap().to_string(), "5.00");
    assert_eq!(rental.total_cost_usd.unwrap().to_string(), "7.50");
    assert_eq!(rental.initiated_at, Some(1_700_000_010));
    assert_eq!(rental.completed_at, Some(1_700_000_011));
    assert_eq!(store.cursor(TOPIC).unwrap().sequence_number, 11);

    manager.stop().await;
}

#[tokio::test]
async fn duplicate_delivery_projects_once() {
    // Sequence 2 arrives twice: once by backfill, once by the stream.
    let mirror = Arc::new(ScriptedMirror::new(vec![Ok(page(
        vec![
            mirror_msg(1, 1_700_000_000, &agent_init("a1", 1_700_000_000)),
            mirror_msg(2, 1_700_000_001, &action("a1", 1_700_000_001)),
        ],
        None,
    ))]));
    let stream = Arc::new(ScriptedStream::new(vec![vec![Ok(topic_msg(
        2,
        1_700_000_001,
        payload_b64(&action("a1", 1_700_000_001)),
    ))]]));
    let store = Arc::new(MemoryStore::new());

    let manager = IngestionManager::new(
        mirror,
        stream,
        Arc::clone(&store),
        config_for(&[TOPIC]),
    );
    manager.start().await;

    // Three applications in total: two from backfill, one replay.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let status = manager.status().await;
        let processed = status
            .get(TOPIC)
            .map(|s| s.metrics.messages_processed)
            .unwrap_or(0);
        if processed >= 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replayed message never arrived (processed={processed})"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(store.message_count(), 2);
    assert_eq!(store.agent_events_for("a1").len(), 1);
    assert_eq!(store.cursor(TOPIC).unwrap().sequence_number, 2);

    manager.stop().await;
}

#[tokio::test]
async fn orphan_completion_is_stored_but_projects_nothing() {
    let mirror = Arc::new(ScriptedMirror::new(vec![Ok(page(
        vec![mirror_msg(
            1,
            1_700_000_000,
            &json!({
                "type": "RENTAL_COMPLETED",
                "rental_id": "r-missing",
                "total_cost_usd": 1.0,
                "settlement": {"owner": 1.0, "creator": 0.0, "network": 0.0, "treasury": 0.0},
                "timestamp": 1700000000
            }),
        )],
        None,
    ))]));
    let stream = Arc::new(ScriptedStream::default());
    let store = Arc::new(MemoryStore::new());

    let manager =
        IngestionManager::new(mirror, stream, Arc::clone(&store), config_for(&[TOPIC]));
    manager.start().await;

    assert!(
        wait_until(3_000, || {
            store.cursor(TOPIC).map(|c| c.sequence_number) == Some(1)
        })
        .await
    );

    assert_eq!(store.rental_count(), 0);
    assert_eq!(store.message_count(), 1);

    manager.stop().await;
}

#[tokio::test]
async fn add_topic_at_runtime_spawns_one_supervisor() {
    let second_topic = "0.0.5678";
    let mirror = Arc::new(ScriptedMirror::default());
    let stream = Arc::new(ScriptedStream::default());
    let store = Arc::new(MemoryStore::new());

    let manager = Arc::new(IngestionManager::new(
        mirror,
        stream,
        Arc::clone(&store),
        config_for(&[TOPIC]),
    ));
    manager.start().await;

    // Two tasks race the same registration; at most one supervisor may win.
    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.add_topic(second_topic).await }
    });
    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.add_topic(second_topic).await }
    });
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let status = manager.status().await;
        let ingesting = status
            .get(second_topic)
            .map(|s| {
                s.phase == SupervisorPhase::Backfilling || s.phase == SupervisorPhase::Streaming
            })
            .unwrap_or(false);
        if ingesting {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "added topic never started ingesting"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let status = manager.status().await;
    assert_eq!(status.len(), 2);

    manager.stop().await;
    // Idempotent.
    manager.stop().await;
}
