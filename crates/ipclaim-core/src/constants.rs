//! Fixed limits for store operations.
//!
//! Each constant bounds a resource so a single request cannot allocate
//! without limit.

/// Maximum key size in bytes (1 KiB).
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum value size in bytes (1 MiB).
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

/// Default page size for prefix scans.
pub const DEFAULT_SCAN_LIMIT: u32 = 1000;

/// Upper bound on a single scan page.
pub const MAX_SCAN_RESULTS: u32 = 10_000;

/// Capacity of the in-memory watch broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Entries kept in the in-memory store's write log; older ones are dropped.
pub const MAX_WRITE_LOG_ENTRIES: usize = 4096;
