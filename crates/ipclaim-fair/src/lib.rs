//! Fair, lease-based allocation of resource identifiers.
//!
//! Consumers (nodes, identified by a uid) claim resource identifiers (CIDR
//! blocks) through a shared coordination store. A claim is a TTL key holding
//! its owner's uid; the owner keeps it alive by renewing, and a claim whose
//! owner disappears expires and is reported on a work queue for
//! reconciliation. Admission is max-min fair: no owner may hold two more
//! claims than another.
//!
//! # Components
//!
//! - [`keys`]: resource identifier to store key mapping
//! - [`pure`]: claim snapshot, fairness rule and backoff arithmetic
//! - [`FairManager`]: admission, renewal and the expiration watch
//! - [`NoopManager`]: grants everything, no store
//!
//! # Example
//!
//! ```ignore
//! use ipclaim_fair::{FairConfig, FairManager, IpManager};
//!
//! let manager = FairManager::new(store, FairConfig::default(), queue, cancel.clone())?;
//! let watch = manager.spawn_expiration_watch();
//! let granted = manager.fit("node-1", "10.10.0.2/24").await?;
//! ```

mod config;
mod error;
pub mod keys;
mod manager;
mod noop;
pub mod pure;
mod renewal;
mod watcher;

use async_trait::async_trait;

pub use config::DEFAULT_CLAIM_PREFIX;
pub use config::FairConfig;
pub use error::ClaimError;
pub use keys::ClaimKeyCodec;
pub use manager::FairManager;
pub use noop::NoopManager;
pub use pure::ClaimDecision;
pub use pure::ClaimSnapshot;
pub use pure::can_claim;

/// Something that decides whether a consumer may take a resource.
#[async_trait]
pub trait IpManager: Send + Sync {
    /// Try to claim `cidr` for `uid`. `Ok(false)` means "not granted".
    async fn fit(&self, uid: &str, cidr: &str) -> Result<bool, ClaimError>;
}

#[async_trait]
impl<T: IpManager + ?Sized> IpManager for std::sync::Arc<T> {
    async fn fit(&self, uid: &str, cidr: &str) -> Result<bool, ClaimError> {
        (**self).fit(uid, cidr).await
    }
}
