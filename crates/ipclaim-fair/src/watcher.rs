//! Expiration watch loop.
//!
//! Holds one subscription on the claim namespace and turns every removal
//! event (`expire`, `delete`, `compareAndDelete`) into the decoded resource
//! identifier on the work queue. Other actions, renewals included, are
//! ignored. Errors never end the loop. A timeout or an unreachable store is
//! retried on the same watcher after a jittered backoff, so no removal is
//! skipped; a closed stream or any other failure backs off and re-subscribes.
//! Only the shutdown token stops it.

use ipclaim_core::KeyValueStore;
use ipclaim_core::KeyValueStoreError;
use ipclaim_core::WatchEvent;
use ipclaim_core::WatchRequest;
use ipclaim_workqueue::WorkQueue;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::FairConfig;
use crate::keys::ClaimKeyCodec;
use crate::pure::WatchBackoff;

/// Borrowed collaborators of one watch loop run.
pub(crate) struct ExpirationWatch<'a, S: ?Sized> {
    pub store: &'a S,
    pub codec: &'a ClaimKeyCodec,
    pub queue: &'a WorkQueue<String>,
    pub config: &'a FairConfig,
    pub cancel: &'a CancellationToken,
}

impl<S: KeyValueStore + ?Sized> ExpirationWatch<'_, S> {
    /// Run until the shutdown token fires.
    pub async fn run(&self) {
        let mut backoff = WatchBackoff::new(self.config.watch_retry_backoff, self.config.watch_retry_backoff_max);
        let prefix = self.codec.prefix();

        info!(prefix, "expiration watch started");

        'subscribe: loop {
            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break 'subscribe,
                result = self.store.watch(WatchRequest::new(prefix)) => result,
            };

            let mut watcher = match subscribed {
                Ok(watcher) => watcher,
                Err(err) => {
                    warn!(prefix, error = %err, backoff = ?backoff.current(), "watch subscribe failed");
                    if !self.pause(&mut backoff).await {
                        break 'subscribe;
                    }
                    continue 'subscribe;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'subscribe,
                    next = watcher.next_event() => next,
                };

                match next {
                    Ok(event) => {
                        backoff.reset();
                        self.handle_event(&event);
                    }
                    Err(KeyValueStoreError::WatchClosed) => {
                        warn!(prefix, backoff = ?backoff.current(), "watch stream closed, re-subscribing");
                        break;
                    }
                    Err(err) if err.is_transient() => {
                        // The watcher keeps its position; poll it again after the pause.
                        warn!(prefix, error = %err, backoff = ?backoff.current(), "watch interrupted, retrying");
                        if !self.pause(&mut backoff).await {
                            break 'subscribe;
                        }
                        continue;
                    }
                    Err(err) => {
                        error!(prefix, error = %err, backoff = ?backoff.current(), "watch failed, re-subscribing");
                        break;
                    }
                }
            }

            if !self.pause(&mut backoff).await {
                break 'subscribe;
            }
        }

        info!(prefix, "expiration watch stopped");
    }

    /// Enqueue the identifier of a removed claim. Returns true if enqueued.
    pub fn handle_event(&self, event: &WatchEvent) -> bool {
        if !event.action.is_removal() {
            return false;
        }
        match self.codec.cidr_from_key(&event.key) {
            Ok(cidr) => {
                let is_new = self.queue.add(cidr.clone());
                debug!(key = %event.key, %cidr, action = %event.action, is_new, "claim removed, queued");
                true
            }
            Err(err) => {
                error!(key = %event.key, action = %event.action, error = %err, "undecodable claim key in watch stream");
                false
            }
        }
    }

    /// Sleep for the current backoff plus jitter. Returns false on shutdown.
    async fn pause(&self, backoff: &mut WatchBackoff) -> bool {
        let delay = backoff.next_delay(rand::rng().random::<u64>());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use ipclaim_core::WatchAction;

    use super::*;

    #[test]
    fn test_only_removals_are_enqueued() {
        let store = ipclaim_core::DeterministicKeyValueStore::default();
        let codec = ClaimKeyCodec::new("/ips/");
        let queue = WorkQueue::new();
        let config = FairConfig::default().with_prefix("/ips/");
        let cancel = CancellationToken::new();
        let watch = ExpirationWatch {
            store: &store,
            codec: &codec,
            queue: &queue,
            config: &config,
            cancel: &cancel,
        };

        assert!(watch.handle_event(&WatchEvent::new(WatchAction::Expire, "/ips/10.10.0.2::24")));
        assert!(watch.handle_event(&WatchEvent::new(WatchAction::Delete, "/ips/10.10.0.3::24")));
        assert!(watch.handle_event(&WatchEvent::new(WatchAction::CompareAndDelete, "/ips/10.10.0.4::24")));
        assert!(!watch.handle_event(&WatchEvent::new(WatchAction::CompareAndSwap, "/ips/10.10.0.5::24")));
        assert!(!watch.handle_event(&WatchEvent::new(WatchAction::Create, "/ips/10.10.0.6::24")));
        assert!(!watch.handle_event(&WatchEvent::new(WatchAction::Expire, "/other/10.10.0.7::24")));

        assert_eq!(queue.try_get().as_deref(), Some("10.10.0.2/24"));
        assert_eq!(queue.try_get().as_deref(), Some("10.10.0.3/24"));
        assert_eq!(queue.try_get().as_deref(), Some("10.10.0.4/24"));
        assert!(queue.is_empty());
    }
}
