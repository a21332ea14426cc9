//! Retry delays for the expiration watch.

use std::time::Duration;

/// Exponential retry delay with additive jitter.
///
/// Each [`next_delay`](Self::next_delay) returns the current base plus a
/// jitter of at most half of it, then doubles the base up to `max`.
/// [`reset`](Self::reset) goes back to `initial` after a delivered event.
///
/// ```ignore
/// let config = FairConfig::default(); // 500ms, capped at 10s
/// let mut backoff = WatchBackoff::new(config.watch_retry_backoff, config.watch_retry_backoff_max);
/// assert_eq!(backoff.next_delay(100), Duration::from_millis(600));
/// assert_eq!(backoff.current(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchBackoff {
    initial_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl WatchBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial_ms = initial.as_millis() as u64;
        Self {
            initial_ms,
            max_ms: (max.as_millis() as u64).max(initial_ms),
            current_ms: initial_ms,
        }
    }

    /// Base delay the next call starts from.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Delay to sleep now. `jitter_seed` is reduced modulo half the base plus one.
    pub fn next_delay(&mut self, jitter_seed: u64) -> Duration {
        let jitter = jitter_seed % (self.current_ms / 2 + 1);
        let delay = self.current_ms.saturating_add(jitter);
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_WATCH_RETRY_BACKOFF;
    use crate::config::DEFAULT_WATCH_RETRY_BACKOFF_MAX;

    fn default_backoff() -> WatchBackoff {
        WatchBackoff::new(DEFAULT_WATCH_RETRY_BACKOFF, DEFAULT_WATCH_RETRY_BACKOFF_MAX)
    }

    #[test]
    fn test_doubles_up_to_max() {
        let mut backoff = default_backoff();
        let delays: Vec<_> = (0..7).map(|_| backoff.next_delay(0).as_millis()).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[test]
    fn test_jitter_adds_at_most_half() {
        let mut backoff = default_backoff();
        assert_eq!(backoff.next_delay(100), Duration::from_millis(600));
        assert_eq!(backoff.current(), Duration::from_secs(1));
        assert!(backoff.next_delay(u64::MAX) <= Duration::from_millis(1_500));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut backoff = default_backoff();
        backoff.next_delay(0);
        backoff.next_delay(0);
        backoff.reset();
        assert_eq!(backoff.current(), DEFAULT_WATCH_RETRY_BACKOFF);
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let mut backoff = WatchBackoff::new(Duration::from_secs(2), Duration::from_secs(1));
        backoff.next_delay(0);
        assert_eq!(backoff.current(), Duration::from_secs(2));
    }
}
