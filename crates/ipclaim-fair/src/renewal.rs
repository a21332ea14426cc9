//! Lease renewal for granted claims.
//!
//! Every granted claim gets one background task that re-asserts ownership on
//! a fixed interval with a compare-and-swap (`uid -> uid`, full TTL). The
//! [`RenewalRegistry`] guarantees at most one such task per key: `Fit` calls
//! racing on the same key serialize on the registry lock for the whole
//! check-and-insert. The lock never spans a store call.
//!
//! A task ends in one of two ways:
//!
//! - the shutdown token fires (quiet exit, entry stays until shutdown drains it)
//! - a renewal CAS finds another value and a re-read confirms the key is no
//!   longer held by the task's uid. The task then removes its own entry under
//!   the registry lock and exits, unless an `ensure` for the same key found it
//!   running in the meantime; that means the claim was requested again and
//!   renewal goes on.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ipclaim_core::KeyValueStore;
use ipclaim_core::KeyValueStoreError;
use ipclaim_core::ReadRequest;
use ipclaim_core::WriteRequest;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

/// A claim to keep alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub uid: String,
    pub ttl_ms: u64,
    pub renew_interval: Duration,
}

struct RenewalEntry {
    handle: JoinHandle<()>,
    /// Bumped by every `ensure` that finds this task running.
    touches: Arc<AtomicU64>,
}

/// Process-local set of keys with a running renewal task.
#[derive(Clone, Default)]
pub struct RenewalRegistry {
    tasks: Arc<Mutex<HashMap<String, RenewalEntry>>>,
}

impl RenewalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start renewing `lease` unless a task for its key is already running.
    ///
    /// Returns true if a task was started. Nothing is started once `cancel`
    /// has fired.
    pub async fn ensure<S>(&self, store: Arc<S>, lease: Lease, cancel: &CancellationToken) -> bool
    where S: KeyValueStore + ?Sized + 'static {
        let mut tasks = self.tasks.lock().await;
        if cancel.is_cancelled() {
            return false;
        }
        if let Some(entry) = tasks.get(&lease.key).filter(|entry| !entry.handle.is_finished()) {
            entry.touches.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        let key = lease.key.clone();
        let touches = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run_renewal(store, lease, self.clone(), touches.clone(), cancel.clone()));
        tasks.insert(key, RenewalEntry { handle, touches });
        true
    }

    /// Number of renewal tasks still running.
    pub async fn active(&self) -> usize {
        self.tasks.lock().await.values().filter(|entry| !entry.handle.is_finished()).count()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.tasks.lock().await.get(key).is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Remove every entry and hand back the task handles.
    pub async fn drain(&self) -> Vec<JoinHandle<()>> {
        self.tasks.lock().await.drain().map(|(_, entry)| entry.handle).collect()
    }

    /// Called by a task that found its claim lost.
    ///
    /// Removes the task's entry and returns true, or returns false when an
    /// `ensure` touched the entry after `seen` was read.
    async fn release(&self, key: &str, touches: &Arc<AtomicU64>, seen: u64) -> bool {
        let mut tasks = self.tasks.lock().await;
        if touches.load(Ordering::SeqCst) != seen {
            return false;
        }
        if tasks.get(key).is_some_and(|entry| Arc::ptr_eq(&entry.touches, touches)) {
            tasks.remove(key);
        }
        true
    }
}

async fn run_renewal<S>(
    store: Arc<S>,
    lease: Lease,
    registry: RenewalRegistry,
    touches: Arc<AtomicU64>,
    cancel: CancellationToken,
) where
    S: KeyValueStore + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + lease.renew_interval, lease.renew_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        key = %lease.key,
        uid = %lease.uid,
        interval_ms = lease.renew_interval.as_millis() as u64,
        "renewal started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let request = WriteRequest::compare_and_swap_with_ttl(&lease.key, &lease.uid, &lease.uid, lease.ttl_ms);
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = store.write(request) => result,
        };

        match result {
            Ok(_) => {
                debug!(key = %lease.key, uid = %lease.uid, ttl_ms = lease.ttl_ms, "claim renewed");
                continue;
            }
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {}
            Err(error) => {
                // Keep trying; the claim expires on its own if the store stays unreachable.
                warn!(key = %lease.key, uid = %lease.uid, error = %error, "failed to renew claim");
                continue;
            }
        }

        let seen = touches.load(Ordering::SeqCst);
        let reread = tokio::select! {
            _ = cancel.cancelled() => break,
            result = store.read(ReadRequest::new(lease.key.clone())) => result,
        };
        let current = match reread {
            Ok(result) => result.kv.map(|kv| kv.value),
            Err(error) => {
                // Undecided; the next tick's CAS settles it.
                warn!(key = %lease.key, error = %error, "failed to re-read lost claim");
                continue;
            }
        };

        if current.as_deref() == Some(lease.uid.as_str()) {
            debug!(key = %lease.key, uid = %lease.uid, "claim re-acquired, renewal continues");
            continue;
        }
        if !registry.release(&lease.key, &touches, seen).await {
            debug!(key = %lease.key, uid = %lease.uid, "claim requested again, renewal continues");
            continue;
        }
        warn!(
            key = %lease.key,
            uid = %lease.uid,
            current_owner = ?current,
            "claim lost, renewal stopped"
        );
        return;
    }

    debug!(key = %lease.key, uid = %lease.uid, "renewal stopped by shutdown");
}
