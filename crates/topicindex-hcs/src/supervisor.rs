//! Per-topic ingestion supervisor — historical catch-up, then live stream.
//!
//! # Phase 1: BACKFILL
//! Page through the mirror REST history from the stored cursor, running every
//! message through parse → apply, following `links.next` until exhausted.
//!
//! # Phase 2: STREAM
//! Subscribe to the push stream from the cursor (the subscriber bumps the
//! start by one nanosecond) and apply each delivered message the same way.
//!
//! Any failure in either phase moves the supervisor to RECONNECTING: wait out
//! the exponential backoff, then re-enter BACKFILL — never STREAM directly,
//! so whatever accumulated during the outage is swept up first. A successful
//! backfill pass resets the attempt counter.
//!
//! Processing within one supervisor is strictly serial; that is what
//! preserves per-topic ordering without any locking beyond the store's
//! per-message transaction.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use topicindex_core::backoff::ReconnectPolicy;
use topicindex_core::error::IndexerError;
use topicindex_core::indexer::{IngestConfig, SupervisorPhase, SupervisorStatus};
use topicindex_core::message::TopicMessage;
use topicindex_core::parser::MessageParser;
use topicindex_storage::ProjectionStore;

use crate::rest::{MessagesPage, MirrorApi};
use crate::stream::TopicStream;

/// Drives ingestion for a single topic.
///
/// At most one supervisor exists per topic (the manager enforces it), which
/// makes the sync cursor a single-writer row without further coordination.
pub struct TopicSupervisor<M, T, S> {
    topic_id: String,
    mirror: Arc<M>,
    stream: Arc<T>,
    store: Arc<S>,
    config: IngestConfig,
    parser: MessageParser,
    backoff: ReconnectPolicy,
    status: SupervisorStatus,
    status_tx: watch::Sender<SupervisorStatus>,
    shutdown: watch::Receiver<bool>,
}

impl<M, T, S> TopicSupervisor<M, T, S>
where
    M: MirrorApi,
    T: TopicStream,
    S: ProjectionStore,
{
    /// Build a supervisor and the receiver its status snapshots are
    /// published through.
    pub fn new(
        topic_id: impl Into<String>,
        mirror: Arc<M>,
        stream: Arc<T>,
        store: Arc<S>,
        config: IngestConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<SupervisorStatus>) {
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());
        let supervisor = Self {
            topic_id: topic_id.into(),
            mirror,
            stream,
            store,
            config,
            parser: MessageParser::new(),
            backoff: ReconnectPolicy::default(),
            status: SupervisorStatus::default(),
            status_tx,
            shutdown,
        };
        (supervisor, status_rx)
    }

    /// Run until shutdown is signalled. Consumes the supervisor; spawn it as
    /// its own task.
    pub async fn run(mut self) {
        info!(topic = %self.topic_id, "supervisor starting");

        loop {
            if self.stopping() {
                break;
            }

            self.set_phase(SupervisorPhase::Backfilling);
            match self.backfill().await {
                Ok(()) => {
                    self.status.reconnect_attempts = 0;
                    self.publish();
                }
                Err(e) if e.is_retryable() => {
                    if !self.reconnect_pause(e).await {
                        break;
                    }
                    continue;
                }
                // Shutdown observed mid-pass.
                Err(_) => break,
            }

            self.set_phase(SupervisorPhase::Streaming);
            match self.stream_live().await {
                Ok(()) => break, // shutdown while streaming
                Err(e) if e.is_retryable() => {
                    if !self.reconnect_pause(e).await {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        self.set_phase(SupervisorPhase::Idle);
        info!(topic = %self.topic_id, "supervisor stopped");
    }

    /// One full backfill pass: everything the mirror has beyond the cursor.
    async fn backfill(&mut self) -> Result<(), IndexerError> {
        let cursor = self.store.load_cursor(&self.topic_id).await?;
        let start = cursor.map(|c| c.timestamp);

        debug!(
            topic = %self.topic_id,
            cursor = %start.map(|ts| ts.to_string()).unwrap_or_else(|| "none".into()),
            "backfill pass starting"
        );

        let page = self
            .mirror
            .fetch_messages(&self.topic_id, start.as_ref(), self.config.page_limit)
            .await?;
        let mut next = self.process_page(page).await?;

        while let Some(url) = next {
            if !self.sleep_or_stop(Duration::from_millis(self.config.page_delay_ms)).await {
                return Err(self.aborted());
            }
            let page = self.mirror.fetch_next(&url).await?;
            next = self.process_page(page).await?;
        }

        Ok(())
    }

    /// Apply one page in order; returns the continuation link.
    async fn process_page(&mut self, page: MessagesPage) -> Result<Option<String>, IndexerError> {
        let count = page.messages.len();
        for wire in page.messages {
            if self.stopping() {
                return Err(self.aborted());
            }
            let message = wire.into_topic_message()?;
            self.process(message).await?;
        }
        if count > 0 {
            debug!(topic = %self.topic_id, count, "backfill page applied");
        }
        Ok(page.links.next)
    }

    /// Consume the push stream until it fails or shutdown is signalled.
    async fn stream_live(&mut self) -> Result<(), IndexerError> {
        let cursor = self.store.load_cursor(&self.topic_id).await?;
        let mut messages = self
            .stream
            .subscribe(&self.topic_id, cursor.map(|c| c.timestamp))
            .await?;

        info!(topic = %self.topic_id, "streaming live");

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                item = messages.next() => match item {
                    None => return Err(IndexerError::Stream("subscription ended".into())),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(message)) => self.process(message).await?,
                },
            }
        }
    }

    /// Parse and durably apply one message, then bump the counters.
    async fn process(&mut self, message: TopicMessage) -> Result<(), IndexerError> {
        let parsed = self.parser.parse(message);
        self.store.apply(&parsed).await?;

        self.status.metrics.messages_processed += 1;
        if parsed.event.is_some() {
            self.status.metrics.events_projected += 1;
        }
        if parsed.decoded.is_none() {
            self.status.metrics.parse_failures += 1;
        }
        self.publish();

        debug!(
            topic = %self.topic_id,
            seq = parsed.message.sequence_number,
            kind = parsed.kind.as_ref().map(|k| k.as_str()).unwrap_or("-"),
            "message applied"
        );
        Ok(())
    }

    /// Record the failure and wait out the backoff. Returns `false` when
    /// shutdown arrived instead of the timer.
    async fn reconnect_pause(&mut self, err: IndexerError) -> bool {
        self.status.reconnect_attempts += 1;
        self.status.metrics.reconnections += 1;
        self.status.last_error = Some(err.to_string());
        self.set_phase(SupervisorPhase::Reconnecting);

        let delay = self.backoff.delay(self.status.reconnect_attempts);
        warn!(
            topic = %self.topic_id,
            attempt = self.status.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "reconnecting"
        );
        self.sleep_or_stop(delay).await
    }

    /// Sleep for `duration`; returns `false` if shutdown was signalled first.
    async fn sleep_or_stop(&self, duration: Duration) -> bool {
        if self.stopping() {
            return false;
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn aborted(&self) -> IndexerError {
        IndexerError::Aborted {
            reason: "shutdown signalled".into(),
        }
    }

    fn set_phase(&mut self, phase: SupervisorPhase) {
        self.status.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}
