//! Error types for claim admission.

use ipclaim_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors from the fair allocation manager.
///
/// Losing a race for a resource is not an error: `fit` reports it as
/// `Ok(false)`. These variants cover bad input, store transport failures and
/// keys that violate the codec's invariants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClaimError {
    /// The uid or resource identifier cannot be claimed as given.
    #[snafu(display("invalid claim: {reason}"))]
    InvalidClaim { reason: String },

    /// A stored key does not belong to the claim namespace.
    ///
    /// Indicates a bug elsewhere; never silently repaired.
    #[snafu(display("key '{key}' is outside the claim prefix '{prefix}'"))]
    CorruptedKey { key: String, prefix: String },

    /// Manager configuration is unusable.
    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    /// The manager's shutdown signal has fired; no new claims are taken.
    #[snafu(display("allocation manager is shut down"))]
    ShutDown,

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage { source: KeyValueStoreError },
}

impl From<KeyValueStoreError> for ClaimError {
    fn from(source: KeyValueStoreError) -> Self {
        ClaimError::Storage { source }
    }
}
