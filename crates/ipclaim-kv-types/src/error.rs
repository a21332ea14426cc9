//! Errors returned by coordination store backends.

use snafu::Snafu;

/// Errors from key-value store operations.
///
/// Race losses (`KeyExists`, `CompareAndSwapFailed`) are reported here so the
/// caller can decide whether they are failures; the claim manager treats them
/// as routine negative outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyValueStoreError {
    /// Requested key was not found.
    #[snafu(display("key '{key}' not found"))]
    NotFound { key: String },

    /// Create-if-absent found the key already present.
    #[snafu(display("key '{key}' already exists"))]
    KeyExists { key: String },

    /// Compare-and-swap precondition did not hold.
    #[snafu(display("compare-and-swap failed for key '{key}': expected {expected:?}, actual {actual:?}"))]
    CompareAndSwapFailed {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[snafu(display("key must not be empty"))]
    EmptyKey,

    #[snafu(display("key size {size} exceeds maximum of {max} bytes"))]
    KeyTooLarge { size: u32, max: u32 },

    #[snafu(display("value size {size} exceeds maximum of {max} bytes"))]
    ValueTooLarge { size: u32, max: u32 },

    #[snafu(display("ttl for key '{key}' must be non-zero"))]
    InvalidTtl { key: String },

    #[snafu(display("operation timed out after {duration_ms}ms"))]
    Timeout { duration_ms: u64 },

    /// No store endpoint could be reached.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable { reason: String },

    /// The watch stream ended and must be re-established.
    #[snafu(display("watch stream closed"))]
    WatchClosed,

    #[snafu(display("operation failed: {reason}"))]
    Failed { reason: String },
}

impl KeyValueStoreError {
    /// Errors worth retrying after a short pause (network blips, restarts).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeyValueStoreError::Timeout { .. } | KeyValueStoreError::Unavailable { .. } | KeyValueStoreError::WatchClosed
        )
    }
}
