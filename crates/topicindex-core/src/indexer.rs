//! Ingestion configuration and supervisor status types.

use serde::{Deserialize, Serialize};

/// Configuration for the ingestion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Topics to ingest at startup.
    #[serde(default)]
    pub topic_ids: Vec<String>,
    /// Page size for mirror REST backfill requests.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Backfill pacing. Accepted and clamped to at least 1000 ms; the
    /// supervisor's page loop currently paces itself with `page_delay_ms`
    /// alone, so this knob is carried but not consumed.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between consecutive backfill pages.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Overall budget for graceful shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_page_limit() -> u32 {
    100
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_page_delay_ms() -> u64 {
    100
}
fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topic_ids: vec![],
            page_limit: default_page_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            page_delay_ms: default_page_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl IngestConfig {
    /// Clamp out-of-range values to their documented minimums.
    pub fn normalize(mut self) -> Self {
        self.poll_interval_ms = self.poll_interval_ms.max(1_000);
        self.page_limit = self.page_limit.max(1);
        self
    }
}

/// Runtime state of a topic supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// Fetching historical messages from the mirror REST API.
    Backfilling,
    /// Consuming the live push stream.
    Streaming,
    /// Waiting out the backoff timer after a failure.
    Reconnecting,
}

impl std::fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Streaming => write!(f, "streaming"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Ingestion counters for one supervisor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestMetrics {
    /// Messages run through parse + apply (duplicates included).
    pub messages_processed: u64,
    /// Messages whose validated event reached a projector.
    pub events_projected: u64,
    /// Messages whose payload never decoded.
    pub parse_failures: u64,
    /// Failures that sent the supervisor through the reconnect state.
    pub reconnections: u64,
}

/// Observability snapshot published by a supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisorStatus {
    pub phase: SupervisorPhase,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub metrics: IngestMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.page_limit, 100);
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.page_delay_ms, 100);
        assert_eq!(config.shutdown_grace_ms, 10_000);
    }

    #[test]
    fn normalize_clamps_poll_interval() {
        let config = IngestConfig {
            poll_interval_ms: 250,
            ..Default::default()
        }
        .normalize();
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[test]
    fn phase_display_matches_status_vocabulary() {
        assert_eq!(SupervisorPhase::Backfilling.to_string(), "backfilling");
        assert_eq!(SupervisorPhase::Reconnecting.to_string(), "reconnecting");
    }
}
