//! Re-claims expired addresses this node serves.
//!
//! The expiration watch puts every resource identifier whose claim vanished
//! on the work queue. The reconciler drains that queue and, for identifiers in
//! the node's served set, tries to take the claim over. Queue items can be
//! stale (the identifier may already be claimed again); a refused `fit` is the
//! expected outcome then.

use std::collections::BTreeSet;
use std::sync::Arc;

use ipclaim_fair::IpManager;
use ipclaim_workqueue::WorkQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// What happened to one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not in this node's served set.
    NotServed,
    Granted,
    NotGranted,
    Failed,
}

/// Drains expired identifiers and re-attempts the ones this node serves.
pub struct ExpiredClaimReconciler<M: ?Sized> {
    manager: Arc<M>,
    queue: Arc<WorkQueue<String>>,
    uid: String,
    served: BTreeSet<String>,
    cancel: CancellationToken,
}

impl<M: IpManager + ?Sized + 'static> ExpiredClaimReconciler<M> {
    pub fn new(
        manager: Arc<M>,
        queue: Arc<WorkQueue<String>>,
        uid: impl Into<String>,
        served: impl IntoIterator<Item = String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            queue,
            uid: uid.into(),
            served: served.into_iter().collect(),
            cancel,
        }
    }

    /// Try every served identifier once. Returns how many were granted.
    pub async fn claim_all(&self) -> usize {
        let mut granted = 0;
        for cidr in &self.served {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.attempt(cidr).await == ReconcileOutcome::Granted {
                granted += 1;
            }
        }
        info!(uid = %self.uid, granted, served = self.served.len(), "initial claim pass finished");
        granted
    }

    /// Handle one identifier taken from the queue.
    pub async fn reconcile(&self, cidr: &str) -> ReconcileOutcome {
        if !self.served.contains(cidr) {
            debug!(cidr, "expired claim not served by this node, dropping");
            return ReconcileOutcome::NotServed;
        }
        self.attempt(cidr).await
    }

    async fn attempt(&self, cidr: &str) -> ReconcileOutcome {
        match self.manager.fit(&self.uid, cidr).await {
            Ok(true) => {
                info!(uid = %self.uid, cidr, "claim granted");
                ReconcileOutcome::Granted
            }
            Ok(false) => {
                debug!(uid = %self.uid, cidr, "claim not granted");
                ReconcileOutcome::NotGranted
            }
            Err(err) => {
                warn!(uid = %self.uid, cidr, error = %err, "claim attempt failed");
                ReconcileOutcome::Failed
            }
        }
    }

    /// Process queue items until the shutdown token fires.
    pub async fn run(&self) {
        while let Some(cidr) = self.queue.get(&self.cancel).await {
            self.reconcile(&cidr).await;
        }
        debug!("reconciler stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
