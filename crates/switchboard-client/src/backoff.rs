//! Reconnect delay helper.
//!
//! The manager never reconnects on its own. Applications that want to retry
//! call `connect()` again after [`Backoff::next_delay`].

use std::time::Duration;

/// Default first delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a schedule starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Delay scaled by `1 + random * jitter`, for a caller-supplied
    /// `random` in `[0, 1)`.
    pub fn next_delay_with_jitter(&mut self, random: f64, jitter: f64) -> Duration {
        let delay = self.next_delay();
        let factor = 1.0 + random.clamp(0.0, 1.0) * jitter.clamp(0.0, 1.0);
        delay.mul_f64(factor)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base
            .checked_mul(1u32 << attempt.min(20))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Call after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
