//! Reconnect backoff policy for topic supervisors.

use std::time::Duration;

/// Exponential reconnect backoff: 1s, 2s, 4s, … capped at 60s.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay before the `attempt`-th reconnect (1-based).
    /// Attempts never give up; repeated failures just sit at the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self.initial.as_millis() as u64 * (1u64 << exp);
        Duration::from_millis(ms).min(self.max)
    }
}
