//! Store capability traits.

use async_trait::async_trait;
use ipclaim_kv_types::DeleteRequest;
use ipclaim_kv_types::DeleteResult;
use ipclaim_kv_types::KeyValueStoreError;
use ipclaim_kv_types::ReadRequest;
use ipclaim_kv_types::ReadResult;
use ipclaim_kv_types::ScanRequest;
use ipclaim_kv_types::ScanResult;
use ipclaim_kv_types::WatchEvent;
use ipclaim_kv_types::WatchRequest;
use ipclaim_kv_types::WriteRequest;
use ipclaim_kv_types::WriteResult;

/// Linearizable key-value store with TTL entries and a watch stream.
///
/// Implementations are shared by every task in the process and must be safe
/// for concurrent use; callers add no locking of their own. Operation
/// deadlines belong to the implementation (request timeouts), not to callers.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Apply a single write command.
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError>;

    /// Read a value by key. A missing key is `Ok` with `kv: None`.
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError>;

    /// Delete a key from the store.
    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError>;

    /// List keys under a prefix with pagination support.
    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError>;

    /// Open a watch stream over every key under the requested prefix.
    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn KeyWatcher>, KeyValueStoreError>;
}

/// A live watch subscription.
///
/// `next_event` blocks until the store delivers the next change. Callers
/// cancel by dropping the future (e.g. losing a `tokio::select!` race), so
/// implementations must be cancel-safe: no event may be consumed by a future
/// that is dropped before returning it.
#[async_trait]
pub trait KeyWatcher: Send {
    async fn next_event(&mut self) -> Result<WatchEvent, KeyValueStoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        (**self).write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        (**self).read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        (**self).delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        (**self).scan(request).await
    }

    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn KeyWatcher>, KeyValueStoreError> {
        (**self).watch(request).await
    }
}
