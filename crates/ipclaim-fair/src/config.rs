//! Allocation manager configuration.

use std::time::Duration;

use crate::error::ClaimError;

/// Default namespace for claim keys.
pub const DEFAULT_CLAIM_PREFIX: &str = "/ipclaim/";

/// Default claim lifetime without renewal.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Default interval between renewals.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(3);

/// Initial pause before re-subscribing a failed watch.
pub const DEFAULT_WATCH_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for the watch re-subscribe backoff.
pub const DEFAULT_WATCH_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Entries requested per page when building a claim snapshot.
pub const DEFAULT_SCAN_PAGE_SIZE: u32 = 1000;

/// Configuration for [`crate::FairManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairConfig {
    /// Key namespace; must end with `/`.
    pub prefix: String,
    /// Lifetime of a claim that is not renewed.
    pub ttl: Duration,
    /// Renewal cadence. Must be shorter than `ttl`.
    pub renew_interval: Duration,
    pub watch_retry_backoff: Duration,
    pub watch_retry_backoff_max: Duration,
    pub scan_page_size: u32,
}

impl Default for FairConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_CLAIM_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            watch_retry_backoff: DEFAULT_WATCH_RETRY_BACKOFF,
            watch_retry_backoff_max: DEFAULT_WATCH_RETRY_BACKOFF_MAX,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

impl FairConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration, renew_interval: Duration) -> Self {
        self.ttl = ttl;
        self.renew_interval = renew_interval;
        self
    }

    /// TTL in whole milliseconds as sent to the store.
    pub fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }

    pub fn validate(&self) -> Result<(), ClaimError> {
        let invalid = |reason: &str| {
            Err(ClaimError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if !self.prefix.ends_with('/') {
            return invalid("prefix must end with '/'");
        }
        if self.ttl_ms() == 0 {
            return invalid("ttl must be at least 1ms");
        }
        if self.renew_interval.is_zero() {
            return invalid("renew_interval must be non-zero");
        }
        if self.renew_interval >= self.ttl {
            return invalid("renew_interval must be shorter than ttl");
        }
        if self.watch_retry_backoff.is_zero() || self.watch_retry_backoff_max.is_zero() {
            return invalid("watch retry backoff must be non-zero");
        }
        if self.scan_page_size == 0 {
            return invalid("scan_page_size must be non-zero");
        }
        Ok(())
    }
}
