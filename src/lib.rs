//! Fair, lease-based claiming of IP ranges for cluster nodes.
//!
//! Every node serves a set of addresses and competes for them through a shared
//! coordination store. The allocation logic lives in [`ipclaim_fair`]; this
//! crate supplies what a running node needs around it:
//!
//! - [`etcd`]: the coordination store over the etcd v2 keys API
//! - [`config`]: layered node configuration (environment, TOML, CLI)
//! - [`reconciler`]: re-claims served addresses whose claims expired
//!
//! The `ipclaim-node` binary wires these together.

pub mod config;
pub mod etcd;
pub mod reconciler;

pub use config::ConfigError;
pub use config::IpManagerKind;
pub use config::NodeConfig;
pub use config::StoreBackend;
pub use etcd::EtcdConfig;
pub use etcd::EtcdError;
pub use etcd::EtcdKeyValueStore;
pub use ipclaim_fair::ClaimError;
pub use ipclaim_fair::FairConfig;
pub use ipclaim_fair::FairManager;
pub use ipclaim_fair::IpManager;
pub use ipclaim_fair::NoopManager;
pub use reconciler::ExpiredClaimReconciler;
pub use reconciler::ReconcileOutcome;
