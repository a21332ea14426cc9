//! Background TTL sweeper for the in-memory store.
//!
//! Lazy expiry only fires when an operation touches a key, so a claim nobody
//! reads would never produce its `expire` event. The sweeper removes lapsed
//! entries on a fixed interval so watchers observe expirations promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::inmemory::DeterministicKeyValueStore;

/// Configuration for the TTL sweeper task.
#[derive(Debug, Clone)]
pub struct TtlSweeperConfig {
    /// Interval between sweeps (default: 100ms).
    pub sweep_interval: Duration,
}

impl Default for TtlSweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// Spawn the sweeper. It stops when `cancel` fires.
pub fn spawn_ttl_sweeper(
    store: Arc<DeterministicKeyValueStore>,
    config: TtlSweeperConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_ttl_sweeper(store, config, cancel))
}

async fn run_ttl_sweeper(store: Arc<DeterministicKeyValueStore>, config: TtlSweeperConfig, cancel: CancellationToken) {
    let mut ticker = interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(interval_ms = config.sweep_interval.as_millis() as u64, "TTL sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("TTL sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let expired = store.expire_due().await;
                if expired > 0 {
                    debug!(expired, "TTL sweep removed expired keys");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ipclaim_kv_types::WatchAction;
    use ipclaim_kv_types::WatchRequest;
    use ipclaim_kv_types::WriteRequest;

    use super::*;
    use crate::traits::KeyValueStore;

    #[test]
    fn test_default_config() {
        let config = TtlSweeperConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_emits_expire_without_reads() {
        let store = DeterministicKeyValueStore::new();
        let mut watcher = store.watch(WatchRequest::new("/ips/")).await.unwrap();
        store.write(WriteRequest::create_with_ttl("/ips/a", "1", 500)).await.unwrap();
        watcher.next_event().await.unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_ttl_sweeper(store.clone(), TtlSweeperConfig::default(), cancel.clone());

        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.action, WatchAction::Expire);
        assert_eq!(event.key, "/ips/a");

        cancel.cancel();
        handle.await.unwrap();
    }
}
