//! Bounded retry policy for queued actions and trigger backoff

use std::time::Duration;

use rand::Rng;

/// Caps per-action attempts and widens the trigger interval after failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Recorded failures after which an action stops being submitted
    pub max_attempts: u32,
    /// Delay after the first consecutive failure
    pub base_delay: Duration,
    /// Upper bound on the exponential delay, before jitter
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Maximum jitter as a fraction of the delay
    const JITTER: f64 = 0.1;

    /// Whether an action with `attempts` recorded failures is exhausted.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Exponential delay for the given number of consecutive failures (1-indexed).
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(failures.saturating_sub(1).min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Add up to 10% random jitter to `delay`.
    pub fn with_jitter(delay: Duration, rng: &mut impl Rng) -> Duration {
        let extra = rng.random_range(0.0..=Self::JITTER);
        delay + delay.mul_f64(extra)
    }
}
