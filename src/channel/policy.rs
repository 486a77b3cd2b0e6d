use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reconnection backoff for the event channel.
///
/// `delay = min(initial_delay_ms * 2^attempt, max_delay_ms) + random_jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionPolicy {
    /// Initial delay before first reconnection attempt (ms).
    pub initial_delay_ms: u32,
    /// Maximum delay cap (ms).
    pub max_delay_ms: u32,
    /// Maximum number of reconnection attempts before giving up.
    pub max_retries: u32,
    /// Maximum random jitter added to each delay (ms).
    pub jitter_ms: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 10,
            jitter_ms: 500,
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before retry `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(31);
        let ms = u64::from(self.initial_delay_ms)
            .saturating_mul(factor)
            .min(u64::from(self.max_delay_ms));
        Duration::from_millis(ms)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=u64::from(self.jitter_ms))
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
