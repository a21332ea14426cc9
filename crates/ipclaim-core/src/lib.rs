//! Core interfaces for the ipclaim coordination store.
//!
//! Defines the [`KeyValueStore`] capability every backend implements, the
//! [`KeyWatcher`] stream handle returned by `watch`, fixed size limits, and
//! [`DeterministicKeyValueStore`], an in-process store with TTL, CAS and watch
//! semantics used by tests and by single-node deployments.

pub mod constants;
mod inmemory;
mod traits;
mod ttl_sweeper;
mod validation;

pub use inmemory::DeterministicKeyValueStore;
pub use ipclaim_kv_types::*;
pub use traits::KeyValueStore;
pub use traits::KeyWatcher;
pub use ttl_sweeper::TtlSweeperConfig;
pub use ttl_sweeper::spawn_ttl_sweeper;
pub use validation::validate_write_command;
