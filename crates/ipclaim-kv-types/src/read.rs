//! Read, scan and delete types for querying key-value state.

use serde::Deserialize;
use serde::Serialize;

/// Key-value pair with revision metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueWithRevision {
    /// The key identifying this entry.
    pub key: String,
    /// The stored value.
    pub value: String,
    /// Store index at which the key was created.
    pub create_revision: u64,
    /// Store index of the most recent modification to this key.
    pub mod_revision: u64,
    /// Remaining time-to-live in milliseconds, for keys that expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_ms: Option<u64>,
}

/// Request to read a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

impl ReadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Response from a read operation.
///
/// An absent key is `kv: None`, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub kv: Option<KeyValueWithRevision>,
}

/// Request to delete a key from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
}

impl DeleteRequest {
    /// Create a delete request for the specified key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Result of a delete operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub key: String,
    /// Whether the key existed and was deleted.
    pub is_deleted: bool,
}

/// Request to list every key under a prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRequest {
    pub prefix: String,
    pub limit: Option<u32>,
    pub continuation_token: Option<String>,
}

impl ScanRequest {
    /// Scan everything under `prefix`, first page.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            limit: None,
            continuation_token: None,
        }
    }
}

/// Response from a scan operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScanResult {
    pub entries: Vec<KeyValueWithRevision>,
    pub count: u32,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
}
