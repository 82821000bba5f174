//! Ingestion manager — owns one supervisor per topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use topicindex_core::indexer::{IngestConfig, SupervisorStatus};
use topicindex_storage::ProjectionStore;

use crate::rest::MirrorApi;
use crate::stream::TopicStream;
use crate::supervisor::TopicSupervisor;

struct SupervisorHandle {
    status: watch::Receiver<SupervisorStatus>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    running: bool,
    supervisors: HashMap<String, SupervisorHandle>,
    /// Topics registered before `start`; drained on startup.
    pending: Vec<String>,
}

/// Holds the set of topic supervisors, supports runtime topic registration,
/// and coordinates startup and graceful shutdown.
pub struct IngestionManager<M, T, S> {
    mirror: Arc<M>,
    stream: Arc<T>,
    store: Arc<S>,
    config: IngestConfig,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<ManagerState>,
}

impl<M, T, S> IngestionManager<M, T, S>
where
    M: MirrorApi + 'static,
    T: TopicStream + 'static,
    S: ProjectionStore + 'static,
{
    pub fn new(mirror: Arc<M>, stream: Arc<T>, store: Arc<S>, config: IngestConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            mirror,
            stream,
            store,
            config: config.normalize(),
            shutdown_tx,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Start a supervisor for every configured seed topic, plus any topics
    /// registered before startup.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        state.running = true;

        let mut topics = self.config.topic_ids.clone();
        topics.append(&mut state.pending);
        for topic_id in topics {
            self.spawn_locked(&mut state, topic_id);
        }

        info!(topics = state.supervisors.len(), "ingestion manager started");
    }

    /// Register a topic at runtime. At most one supervisor ever exists per
    /// topic; duplicate registrations are ignored. Before `start`, the topic
    /// is recorded and picked up on startup.
    pub async fn add_topic(&self, topic_id: impl Into<String>) {
        let topic_id = topic_id.into();
        let mut state = self.state.lock().await;
        if state.supervisors.contains_key(&topic_id) {
            return;
        }
        if !state.running {
            if !state.pending.contains(&topic_id) {
                state.pending.push(topic_id);
            }
            return;
        }
        info!(topic = %topic_id, "topic added at runtime");
        self.spawn_locked(&mut state, topic_id);
    }

    fn spawn_locked(&self, state: &mut ManagerState, topic_id: String) {
        if state.supervisors.contains_key(&topic_id) {
            return;
        }
        let (supervisor, status) = TopicSupervisor::new(
            topic_id.clone(),
            Arc::clone(&self.mirror),
            Arc::clone(&self.stream),
            Arc::clone(&self.store),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        );
        let task = tokio::spawn(supervisor.run());
        state.supervisors.insert(topic_id, SupervisorHandle { status, task });
    }

    /// Snapshot of every supervisor's status.
    pub async fn status(&self) -> HashMap<String, SupervisorStatus> {
        self.state
            .lock()
            .await
            .supervisors
            .iter()
            .map(|(topic, handle)| (topic.clone(), handle.status.borrow().clone()))
            .collect()
    }

    /// Signal every supervisor and wait for graceful termination, bounded by
    /// the shutdown grace budget. A message mid-projection finishes its
    /// transaction; supervisors that outlive the budget are aborted.
    /// Idempotent.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let mut state = self.state.lock().await;
        state.running = false;

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        for (topic, handle) in state.supervisors.drain() {
            let mut task = handle.task;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!(topic = %topic, "supervisor exceeded shutdown grace, aborting");
                task.abort();
            }
        }

        info!("ingestion manager stopped");
    }
}
