//! Types shared by every coordination store backend.
//!
//! The store is a linearizable key/value service with TTL entries, atomic
//! create-if-absent, compare-and-swap, recursive prefix listing and a watch
//! stream. These types describe requests and responses at that boundary and
//! carry no I/O themselves.

mod error;
mod read;
mod watch;
mod write;

pub use error::KeyValueStoreError;
pub use read::DeleteRequest;
pub use read::DeleteResult;
pub use read::KeyValueWithRevision;
pub use read::ReadRequest;
pub use read::ReadResult;
pub use read::ScanRequest;
pub use read::ScanResult;
pub use watch::WatchAction;
pub use watch::WatchEvent;
pub use watch::WatchRequest;
pub use write::WriteCommand;
pub use write::WriteRequest;
pub use write::WriteResult;
