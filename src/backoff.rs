//! Retry/backoff policy shared by the store write path and the API client.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and additive uniform jitter.
///
/// `sleep(attempt) = min(max_sleep, base_sleep * 2^(attempt-1)) + U(0, jitter_max)`
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one (>= 1).
    pub max_attempts: u32,
    pub base_sleep: Duration,
    pub max_sleep: Duration,
    pub jitter_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_sleep: Duration::from_millis(800),
            max_sleep: Duration::from_secs(8),
            jitter_max: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// Policy with no waiting at all, for callers that only want the attempt cap.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_sleep: Duration::ZERO,
            max_sleep: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self.base_sleep.saturating_mul(1u32 << exp);
        scaled.min(self.max_sleep)
    }

    /// Full delay including a random jitter in `[0, jitter_max]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt)
            .saturating_add(self.jitter(&mut rand::thread_rng()))
    }

    fn jitter<R: Rng>(&self, rng: &mut R) -> Duration {
        let max = self.jitter_max.as_secs_f64();
        if max <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(rng.gen_range(0.0..=max)).unwrap_or(self.jitter_max)
    }

    /// True when another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Sleep for the backoff delay that follows failed attempt `attempt`.
    pub async fn wait(&self, attempt: u32) {
        let d = self.delay(attempt);
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}
