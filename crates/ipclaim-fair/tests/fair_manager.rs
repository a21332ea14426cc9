//! Integration tests for the fair allocation manager against the in-memory store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use ipclaim_core::DeleteRequest;
use ipclaim_core::DeleteResult;
use ipclaim_core::DeterministicKeyValueStore;
use ipclaim_core::KeyValueStore;
use ipclaim_core::KeyValueStoreError;
use ipclaim_core::KeyWatcher;
use ipclaim_core::ReadRequest;
use ipclaim_core::ReadResult;
use ipclaim_core::ScanRequest;
use ipclaim_core::ScanResult;
use ipclaim_core::TtlSweeperConfig;
use ipclaim_core::WatchAction;
use ipclaim_core::WatchEvent;
use ipclaim_core::WatchRequest;
use ipclaim_core::WriteRequest;
use ipclaim_core::WriteResult;
use ipclaim_core::spawn_ttl_sweeper;
use ipclaim_fair::FairConfig;
use ipclaim_fair::FairManager;
use ipclaim_fair::IpManager;
use ipclaim_workqueue::WorkQueue;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const PREFIX: &str = "/ips/";

fn test_config() -> FairConfig {
    FairConfig::default().with_prefix(PREFIX).with_ttl(Duration::from_secs(1), Duration::from_millis(100))
}

fn new_manager<S: KeyValueStore + ?Sized + 'static>(store: Arc<S>, cancel: CancellationToken) -> Arc<FairManager<S>> {
    FairManager::new(store, test_config(), Arc::new(WorkQueue::new()), cancel).unwrap()
}

/// Drain every item currently queued.
fn drain(queue: &WorkQueue<String>) -> Vec<String> {
    std::iter::from_fn(|| queue.try_get()).collect()
}

/// Store whose watch stream replays a fixed script.
///
/// Reads and writes go to an in-memory store. Every subscription pulls from
/// the same script, so an error entry ends one subscription and the next
/// subscription continues with the following entry. Once the script is
/// exhausted the watcher fires `cancel` and never yields again.
struct ScriptedWatchStore {
    inner: Arc<DeterministicKeyValueStore>,
    script: Arc<Mutex<VecDeque<Result<WatchEvent, KeyValueStoreError>>>>,
    cancel: CancellationToken,
    failed_subscribes: AtomicU32,
    subscriptions: AtomicU32,
}

impl ScriptedWatchStore {
    fn new(script: Vec<Result<WatchEvent, KeyValueStoreError>>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            inner: DeterministicKeyValueStore::new(),
            script: Arc::new(Mutex::new(script.into())),
            cancel,
            failed_subscribes: AtomicU32::new(0),
            subscriptions: AtomicU32::new(0),
        })
    }
}

struct ScriptedWatcher {
    script: Arc<Mutex<VecDeque<Result<WatchEvent, KeyValueStoreError>>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl KeyWatcher for ScriptedWatcher {
    async fn next_event(&mut self) -> Result<WatchEvent, KeyValueStoreError> {
        let next = self.script.lock().pop_front();
        match next {
            Some(next) => next,
            None => {
                self.cancel.cancel();
                std::future::pending().await
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for ScriptedWatchStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.inner.write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.inner.read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.inner.delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        self.inner.scan(request).await
    }

    async fn watch(&self, _request: WatchRequest) -> Result<Box<dyn KeyWatcher>, KeyValueStoreError> {
        if self.failed_subscribes.load(Ordering::SeqCst) > 0 {
            self.failed_subscribes.fetch_sub(1, Ordering::SeqCst);
            return Err(KeyValueStoreError::Unavailable {
                reason: "connection refused".into(),
            });
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedWatcher {
            script: self.script.clone(),
            cancel: self.cancel.clone(),
        }))
    }
}

fn event(action: WatchAction, cidr_key: &str) -> Result<WatchEvent, KeyValueStoreError> {
    Ok(WatchEvent::new(action, format!("{PREFIX}{cidr_key}")))
}

#[tokio::test(start_paused = true)]
async fn test_watch_enqueues_removed_claims() {
    let cancel = CancellationToken::new();
    let store = ScriptedWatchStore::new(
        vec![
            event(WatchAction::Expire, "10.10.0.2::24"),
            event(WatchAction::CompareAndSwap, "10.10.0.3::24"),
            event(WatchAction::Delete, "10.10.0.4::24"),
            event(WatchAction::Set, "10.10.0.5::24"),
            event(WatchAction::Expire, "node-a"),
        ],
        cancel.clone(),
    );
    let manager = new_manager(store.clone(), cancel.clone());

    manager.run_expiration_watch().await;

    assert_eq!(drain(manager.queue()), vec!["10.10.0.2/24", "10.10.0.4/24", "node-a"]);
    assert_eq!(store.subscriptions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_watch_coalesces_pending_identifiers() {
    let cancel = CancellationToken::new();
    let store = ScriptedWatchStore::new(
        vec![
            event(WatchAction::Expire, "10.10.0.2::24"),
            event(WatchAction::Expire, "10.10.0.2::24"),
            event(WatchAction::Delete, "10.10.0.3::24"),
        ],
        cancel.clone(),
    );
    let manager = new_manager(store, cancel);

    manager.run_expiration_watch().await;
    assert_eq!(manager.queue().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_watch_resubscribes_after_errors() {
    let cancel = CancellationToken::new();
    let store = ScriptedWatchStore::new(
        vec![
            event(WatchAction::Expire, "10.10.0.2::24"),
            Err(KeyValueStoreError::WatchClosed),
            event(WatchAction::Expire, "10.10.0.3::24"),
            Err(KeyValueStoreError::Failed {
                reason: "event history compacted".into(),
            }),
            event(WatchAction::Delete, "10.10.0.4::24"),
        ],
        cancel.clone(),
    );
    store.failed_subscribes.store(2, Ordering::SeqCst);
    let manager = new_manager(store.clone(), cancel.clone());

    manager.run_expiration_watch().await;

    assert_eq!(drain(manager.queue()), vec!["10.10.0.2/24", "10.10.0.3/24", "10.10.0.4/24"]);
    assert_eq!(store.subscriptions.load(Ordering::SeqCst), 3);
    assert_eq!(store.failed_subscribes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_retries_transient_errors_on_same_subscription() {
    let cancel = CancellationToken::new();
    let store = ScriptedWatchStore::new(
        vec![
            event(WatchAction::Expire, "10.10.0.2::24"),
            Err(KeyValueStoreError::Timeout { duration_ms: 100 }),
            Err(KeyValueStoreError::Unavailable {
                reason: "connection reset".into(),
            }),
            event(WatchAction::Expire, "10.10.0.3::24"),
        ],
        cancel.clone(),
    );
    let manager = new_manager(store.clone(), cancel);

    manager.run_expiration_watch().await;

    assert_eq!(drain(manager.queue()), vec!["10.10.0.2/24", "10.10.0.3/24"]);
    assert_eq!(store.subscriptions.load(Ordering::SeqCst), 1);
}

/// In-memory store whose first watcher times out once before delivering.
struct FlakyWatchStore {
    inner: Arc<DeterministicKeyValueStore>,
    subscriptions: AtomicU32,
}

struct FlakyWatcher {
    inner: Box<dyn KeyWatcher>,
    timed_out: bool,
}

#[async_trait]
impl KeyWatcher for FlakyWatcher {
    async fn next_event(&mut self) -> Result<WatchEvent, KeyValueStoreError> {
        if !self.timed_out {
            self.timed_out = true;
            return Err(KeyValueStoreError::Timeout { duration_ms: 5_000 });
        }
        self.inner.next_event().await
    }
}

#[async_trait]
impl KeyValueStore for FlakyWatchStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.inner.write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.inner.read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.inner.delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        self.inner.scan(request).await
    }

    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn KeyWatcher>, KeyValueStoreError> {
        let first = self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(Box::new(FlakyWatcher {
            inner: self.inner.watch(request).await?,
            timed_out: !first,
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_removal_during_watch_backoff_is_not_lost() {
    let inner = DeterministicKeyValueStore::new();
    inner.write(WriteRequest::create_with_ttl("/ips/10.10.0.2::24", "2", 60_000)).await.unwrap();
    let store = Arc::new(FlakyWatchStore {
        inner: inner.clone(),
        subscriptions: AtomicU32::new(0),
    });
    let cancel = CancellationToken::new();
    let manager = new_manager(store.clone(), cancel.clone());
    let watch = manager.spawn_expiration_watch();

    // The watcher has timed out and is backing off when the claim goes away.
    tokio::time::sleep(Duration::from_millis(10)).await;
    inner.delete(DeleteRequest::new("/ips/10.10.0.2::24")).await.unwrap();

    let queued = tokio::time::timeout(Duration::from_secs(5), manager.queue().get(&cancel)).await.unwrap();
    assert_eq!(queued.as_deref(), Some("10.10.0.2/24"));
    assert_eq!(store.subscriptions.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
    watch.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_stops_on_shutdown_with_events_pending() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let store = ScriptedWatchStore::new(vec![event(WatchAction::Expire, "10.10.0.2::24")], cancel.clone());
    let manager = new_manager(store.clone(), cancel);

    manager.run_expiration_watch().await;

    assert!(manager.queue().is_empty());
    assert_eq!(store.script.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_claim_is_queued_and_renewal_stops() {
    let store = DeterministicKeyValueStore::new();
    let cancel = CancellationToken::new();
    let manager = new_manager(store.clone(), cancel.clone());
    let watch = manager.spawn_expiration_watch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.fit("1", "10.10.0.2/24").await.unwrap());
    store.delete(DeleteRequest::new("/ips/10.10.0.2::24")).await.unwrap();

    let queued = tokio::time::timeout(Duration::from_secs(1), manager.queue().get(&cancel)).await.unwrap();
    assert_eq!(queued.as_deref(), Some("10.10.0.2/24"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.active_renewals().await, 0);

    manager.shutdown().await;
    watch.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_claim_expires_and_is_queued() {
    let store = DeterministicKeyValueStore::new();
    let cancel = CancellationToken::new();
    let sweeper = spawn_ttl_sweeper(store.clone(), TtlSweeperConfig::default(), cancel.clone());
    let manager = new_manager(store.clone(), cancel.clone());
    let watch = manager.spawn_expiration_watch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A peer that claimed and then died: nobody renews it.
    store.write(WriteRequest::create_with_ttl("/ips/10.10.0.9::24", "2", 1_000)).await.unwrap();
    assert!(!manager.fit("1", "10.10.0.9/24").await.unwrap());

    let queued = tokio::time::timeout(Duration::from_secs(2), manager.queue().get(&cancel)).await.unwrap();
    assert_eq!(queued.as_deref(), Some("10.10.0.9/24"));
    assert!(manager.fit("1", "10.10.0.9/24").await.unwrap());

    manager.shutdown().await;
    watch.await.unwrap();
    sweeper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_renewed_claim_outlives_ttl() {
    let store = DeterministicKeyValueStore::new();
    let cancel = CancellationToken::new();
    let sweeper = spawn_ttl_sweeper(store.clone(), TtlSweeperConfig::default(), cancel.clone());
    let manager = new_manager(store.clone(), cancel.clone());

    assert!(manager.fit("1", "10.10.0.2/24").await.unwrap());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.owner_of("10.10.0.2/24").await.unwrap().as_deref(), Some("1"));

    // After shutdown nobody renews, so the claim lapses.
    manager.shutdown().await;
    sweeper.await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(manager.owner_of("10.10.0.2/24").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fit_same_uid_starts_one_renewal() {
    let store = DeterministicKeyValueStore::new();
    let manager = new_manager(store.clone(), CancellationToken::new());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move { manager.fit("1", "10.10.0.2/24").await }));
    }
    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            granted += 1;
        }
    }

    assert!(granted >= 1);
    assert_eq!(manager.active_renewals().await, 1);
    assert_eq!(manager.owner_of("10.10.0.2/24").await.unwrap().as_deref(), Some("1"));
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fit_different_uids_grants_once() {
    let store = DeterministicKeyValueStore::new();
    let manager = new_manager(store.clone(), CancellationToken::new());

    let mut tasks = Vec::new();
    for uid in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move { manager.fit(&uid.to_string(), "10.10.0.2/24").await }));
    }
    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(manager.active_renewals().await, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_usable_as_trait_object() {
    let store = DeterministicKeyValueStore::new();
    let manager: Arc<dyn IpManager> = new_manager(store, CancellationToken::new());
    assert!(manager.fit("1", "10.10.0.2/24").await.unwrap());
    assert!(!manager.fit("2", "10.10.0.2/24").await.unwrap());
}
