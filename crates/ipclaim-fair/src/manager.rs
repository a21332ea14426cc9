//! Fair allocation manager.
//!
//! [`FairManager::fit`] admits a claim in three steps: list every live claim
//! into a [`ClaimSnapshot`], apply the fairness rule, then create the claim
//! key with a TTL if it is still absent. Losing the create race is a normal
//! `Ok(false)`. A granted claim is kept alive by a renewal task bound to the
//! manager's shutdown token, and [`FairManager::run_expiration_watch`] feeds
//! the identifiers of claims that disappear into the work queue.

use std::sync::Arc;

use async_trait::async_trait;
use ipclaim_core::KeyValueStore;
use ipclaim_core::KeyValueStoreError;
use ipclaim_core::ReadRequest;
use ipclaim_core::ScanRequest;
use ipclaim_core::WriteRequest;
use ipclaim_workqueue::WorkQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::IpManager;
use crate::config::FairConfig;
use crate::error::ClaimError;
use crate::keys::ClaimKeyCodec;
use crate::keys::validate_cidr;
use crate::pure::ClaimDecision;
use crate::pure::ClaimSnapshot;
use crate::pure::evaluate;
use crate::renewal::Lease;
use crate::renewal::RenewalRegistry;
use crate::watcher::ExpirationWatch;

/// Hands out claims on resource identifiers fairly across consumers.
///
/// # Example
///
/// ```ignore
/// let store = DeterministicKeyValueStore::new();
/// let queue = Arc::new(WorkQueue::new());
/// let manager = FairManager::new(store, FairConfig::default(), queue, CancellationToken::new())?;
///
/// if manager.fit("node-1", "10.10.0.2/24").await? {
///     // claimed and renewed in the background
/// }
/// ```
pub struct FairManager<S: KeyValueStore + ?Sized + 'static> {
    store: Arc<S>,
    config: FairConfig,
    codec: ClaimKeyCodec,
    queue: Arc<WorkQueue<String>>,
    renewals: RenewalRegistry,
    cancel: CancellationToken,
}

impl<S: KeyValueStore + ?Sized + 'static> FairManager<S> {
    /// Create a manager. Fails if `config` does not validate.
    pub fn new(
        store: Arc<S>,
        config: FairConfig,
        queue: Arc<WorkQueue<String>>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ClaimError> {
        config.validate()?;
        Ok(Arc::new(Self {
            store,
            codec: ClaimKeyCodec::new(config.prefix.clone()),
            config,
            queue,
            renewals: RenewalRegistry::new(),
            cancel,
        }))
    }

    /// Try to claim `cidr` for `uid`.
    ///
    /// Returns `Ok(false)` when the claim is held by someone else, would break
    /// the fairness bound, or was won by a concurrent claimant. Store
    /// transport failures are returned as errors and not retried.
    pub async fn fit(&self, uid: &str, cidr: &str) -> Result<bool, ClaimError> {
        if uid.is_empty() {
            return Err(ClaimError::InvalidClaim {
                reason: "uid must not be empty".to_string(),
            });
        }
        validate_cidr(cidr)?;
        if self.cancel.is_cancelled() {
            return Err(ClaimError::ShutDown);
        }

        let key = self.codec.key_from_cidr(cidr);
        let snapshot = self.snapshot().await?;
        let decision = evaluate(&snapshot, uid, cidr);
        debug!(uid, cidr, ?decision, "claim evaluated");

        match decision {
            ClaimDecision::AlreadyOwned => {
                // Same owner asking again: no write, just make sure it is renewed.
                self.ensure_renewal(key, uid).await;
                return Ok(true);
            }
            decision if !decision.is_granted() => return Ok(false),
            _ => {}
        }

        match self.store.write(WriteRequest::create_with_ttl(key.clone(), uid, self.config.ttl_ms())).await {
            Ok(_) => {}
            Err(KeyValueStoreError::KeyExists { .. }) => {
                debug!(uid, cidr, "claim lost to a concurrent claimant");
                return Ok(false);
            }
            Err(source) => return Err(ClaimError::Storage { source }),
        }

        info!(uid, cidr, %key, ttl_ms = self.config.ttl_ms(), "claim granted");
        self.ensure_renewal(key, uid).await;
        Ok(true)
    }

    async fn ensure_renewal(&self, key: String, uid: &str) {
        let lease = Lease {
            key,
            uid: uid.to_string(),
            ttl_ms: self.config.ttl_ms(),
            renew_interval: self.config.renew_interval,
        };
        self.renewals.ensure(self.store.clone(), lease, &self.cancel).await;
    }

    /// List every live claim under the prefix, following scan pages.
    ///
    /// A key that does not decode is a [`ClaimError::CorruptedKey`].
    pub async fn snapshot(&self) -> Result<ClaimSnapshot, ClaimError> {
        let mut snapshot = ClaimSnapshot::new();
        let mut continuation_token = None;

        loop {
            let page = self
                .store
                .scan(ScanRequest {
                    prefix: self.codec.prefix().to_string(),
                    limit: Some(self.config.scan_page_size),
                    continuation_token,
                })
                .await?;

            for kv in page.entries {
                let cidr = self.codec.cidr_from_key(&kv.key)?;
                snapshot.insert(cidr, kv.value);
            }

            match page.continuation_token {
                Some(token) if page.is_truncated => continuation_token = Some(token),
                _ => return Ok(snapshot),
            }
        }
    }

    /// Current owner of `cidr`, or `None` if unclaimed.
    pub async fn owner_of(&self, cidr: &str) -> Result<Option<String>, ClaimError> {
        validate_cidr(cidr)?;
        let result = self.store.read(ReadRequest::new(self.codec.key_from_cidr(cidr))).await?;
        Ok(result.kv.map(|kv| kv.value))
    }

    /// Watch the claim namespace and queue every claim that disappears.
    ///
    /// Runs until the shutdown token fires; subscription errors are retried.
    pub async fn run_expiration_watch(&self) {
        ExpirationWatch {
            store: &*self.store,
            codec: &self.codec,
            queue: &self.queue,
            config: &self.config,
            cancel: &self.cancel,
        }
        .run()
        .await
    }

    /// Run [`Self::run_expiration_watch`] on its own task.
    pub fn spawn_expiration_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.run_expiration_watch().await })
    }

    /// Number of claims currently being renewed.
    pub async fn active_renewals(&self) -> usize {
        self.renewals.active().await
    }

    /// Fire the shutdown token and wait for every renewal task to stop.
    ///
    /// Claims are not deleted; they expire once their TTL lapses.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = self.renewals.drain().await;
        let count = handles.len();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "renewal task panicked");
            }
        }
        info!(renewals = count, "allocation manager shut down");
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    pub fn codec(&self) -> &ClaimKeyCodec {
        &self.codec
    }

    pub fn config(&self) -> &FairConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized + 'static> IpManager for FairManager<S> {
    async fn fit(&self, uid: &str, cidr: &str) -> Result<bool, ClaimError> {
        FairManager::fit(self, uid, cidr).await
    }
}
