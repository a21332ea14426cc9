//! Deterministic decision logic for the allocation manager.
//!
//! Nothing here performs I/O or reads the clock; the async shell in
//! [`crate::manager`] feeds these functions store snapshots and random seeds.
//!
//! - [`fairness`]: claim snapshot and the admission rule
//! - [`backoff`]: retry delays with jitter for the watch loop

pub mod backoff;
pub mod fairness;

pub use backoff::WatchBackoff;
pub use fairness::ClaimDecision;
pub use fairness::ClaimSnapshot;
pub use fairness::can_claim;
pub use fairness::evaluate;
pub use fairness::is_balanced;
