//! topicindex — consensus-topic ingestion daemon.
//!
//! Configuration comes from the environment:
//!
//! | Variable            | Meaning                                | Default |
//! |---------------------|----------------------------------------|---------|
//! | `DATABASE_URL`      | PostgreSQL connection string           | required |
//! | `MIRROR_BASE_URL`   | Mirror REST base URL                   | required |
//! | `MIRROR_STREAM_URL` | Push stream endpoint (`wss://…`)       | required |
//! | `TOPIC_IDS`         | Comma-separated seed topics            | empty |
//! | `POLL_INTERVAL_MS`  | Backfill pacing                        | 5000 (min 1000) |
//! | `PAGE_DELAY_MS`     | Delay between backfill pages           | 100 |
//! | `PAGE_LIMIT`        | Mirror page size                       | 100 |
//! | `SHUTDOWN_GRACE_MS` | Graceful shutdown budget               | 10000 |
//! | `LOG_LEVEL`         | Default tracing filter                 | info |
//!
//! Runs until Ctrl-C, logging a per-topic status heartbeat every 30 seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use topicindex_core::error::IndexerError;
use topicindex_core::indexer::IngestConfig;
use topicindex_hcs::{IngestionManager, MirrorRestClient, WsTopicStream};
use topicindex_storage::PostgresStore;

struct Settings {
    database_url: String,
    mirror_base_url: String,
    stream_url: String,
    log_level: String,
    ingest: IngestConfig,
}

impl Settings {
    fn from_env() -> Result<Self> {
        let ingest = IngestConfig {
            topic_ids: std::env::var("TOPIC_IDS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            page_limit: env_parse("PAGE_LIMIT", 100)?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 5_000)?,
            page_delay_ms: env_parse("PAGE_DELAY_MS", 100)?,
            shutdown_grace_ms: env_parse("SHUTDOWN_GRACE_MS", 10_000)?,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            mirror_base_url: std::env::var("MIRROR_BASE_URL")
                .context("MIRROR_BASE_URL must be set")?,
            stream_url: std::env::var("MIRROR_STREAM_URL")
                .context("MIRROR_STREAM_URL must be set")?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            ingest,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, IndexerError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| IndexerError::Config(format!("{name} is not a valid number: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(&settings.log_level);

    // An unreachable database at startup is the one fatal error.
    let store = Arc::new(
        PostgresStore::connect(&settings.database_url)
            .await
            .context("database connection failed")?,
    );
    let mirror = Arc::new(MirrorRestClient::new(&settings.mirror_base_url));
    let stream = Arc::new(WsTopicStream::new(&settings.stream_url));

    let manager = IngestionManager::new(mirror, stream, store, settings.ingest);
    manager.start().await;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                for (topic, status) in manager.status().await {
                    tracing::info!(
                        topic = %topic,
                        phase = %status.phase,
                        attempts = status.reconnect_attempts,
                        processed = status.metrics.messages_processed,
                        projected = status.metrics.events_projected,
                        "heartbeat"
                    );
                }
            }
        }
    }

    manager.stop().await;
    Ok(())
}
