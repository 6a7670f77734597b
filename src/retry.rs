use std::time::Duration;

use rand::Rng;
use tracing::warn;

pub(crate) const DEFAULT_RETRY_COUNT: u32 = 3;
pub(crate) const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_RETRY_MAX_WAIT: Duration = Duration::from_secs(2);

/// Bounded-retry configuration for transport failures.
///
/// `attempts` is the total number of dispatches, not the number of retries:
/// a policy with 3 attempts sends at most three times. Only failures below
/// the HTTP layer consume attempts; any received response ends the loop.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    attempts: u32,
    wait: Duration,
    max_wait: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    /// Three attempts with a jittered 100ms exponential backoff.
    pub fn standard() -> Self {
        Self {
            attempts: DEFAULT_RETRY_COUNT,
            wait: DEFAULT_RETRY_WAIT,
            max_wait: DEFAULT_RETRY_MAX_WAIT,
            jitter_ratio: 0.2,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            wait: DEFAULT_RETRY_WAIT,
            max_wait: DEFAULT_RETRY_MAX_WAIT,
            jitter_ratio: 0.0,
        }
    }

    /// Sets the attempt count. Zero is rejected with a warning and the prior
    /// value is kept.
    pub fn attempts(mut self, attempts: u32) -> Self {
        if attempts == 0 {
            warn!(kept = self.attempts, "retry count must be greater than 0");
            return self;
        }
        self.attempts = attempts;
        self
    }

    /// Base wait slept before the first retry; later retries grow
    /// exponentially from it.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        if self.max_wait < wait {
            self.max_wait = wait;
        }
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.wait);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Backoff before retry number `retry_index` (1-based: the wait after the
    /// first failed attempt is index 1).
    pub(crate) fn backoff_for_retry(&self, retry_index: u32) -> Duration {
        if self.wait.is_zero() {
            return Duration::ZERO;
        }
        let capped_exponent = retry_index.saturating_sub(1).min(31);
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.wait.as_millis().max(1);
        let max_ms = self.max_wait.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_wait.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
