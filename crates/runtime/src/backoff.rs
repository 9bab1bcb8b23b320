use std::time::Duration;

/// Bounded exponential backoff for reconnect attempts.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)`, capped at `max_delay`.
/// After `max_retries` attempts the policy yields nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_retries,
        }
    }

    /// Delay before the given attempt, or `None` once retries are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let exponent = (attempt - 1).min(16);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 8)
    }
}
