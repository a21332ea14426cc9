//! Write operation types for modifying key-value state.

use serde::Deserialize;
use serde::Serialize;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair.
    Set { key: String, value: String },
    /// Set a key-value pair with a time-to-live.
    SetWithTTL { key: String, value: String, ttl_ms: u64 },
    /// Create a key with a time-to-live, failing if the key already exists.
    CreateWithTTL { key: String, value: String, ttl_ms: u64 },
    /// Compare-and-swap: atomically update value if current value matches expected.
    ///
    /// `expected = None` requires the key to be absent.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
    },
    /// Compare-and-swap that also resets the key's time-to-live.
    CompareAndSwapWithTTL {
        key: String,
        expected: String,
        new_value: String,
        ttl_ms: u64,
    },
    /// Delete a single key.
    Delete { key: String },
}

impl WriteCommand {
    /// The key this command targets.
    pub fn key(&self) -> &str {
        match self {
            WriteCommand::Set { key, .. }
            | WriteCommand::SetWithTTL { key, .. }
            | WriteCommand::CreateWithTTL { key, .. }
            | WriteCommand::CompareAndSwap { key, .. }
            | WriteCommand::CompareAndSwapWithTTL { key, .. }
            | WriteCommand::Delete { key } => key,
        }
    }

    /// The time-to-live carried by this command, if any.
    pub fn ttl_ms(&self) -> Option<u64> {
        match self {
            WriteCommand::SetWithTTL { ttl_ms, .. }
            | WriteCommand::CreateWithTTL { ttl_ms, .. }
            | WriteCommand::CompareAndSwapWithTTL { ttl_ms, .. } => Some(*ttl_ms),
            _ => None,
        }
    }
}

/// Request to perform a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command to store a key-value pair.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a Set command with TTL.
    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            command: WriteCommand::SetWithTTL {
                key: key.into(),
                value: value.into(),
                ttl_ms,
            },
        }
    }

    /// Create a create-if-absent command with TTL.
    pub fn create_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            command: WriteCommand::CreateWithTTL {
                key: key.into(),
                value: value.into(),
                ttl_ms,
            },
        }
    }

    /// Create a Delete command.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Delete { key: key.into() },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }

    /// Create a CompareAndSwap command that refreshes the TTL.
    pub fn compare_and_swap_with_ttl(
        key: impl Into<String>,
        expected: impl Into<String>,
        new_value: impl Into<String>,
        ttl_ms: u64,
    ) -> Self {
        Self {
            command: WriteCommand::CompareAndSwapWithTTL {
                key: key.into(),
                expected: expected.into(),
                new_value: new_value.into(),
                ttl_ms,
            },
        }
    }

    /// Create from a raw WriteCommand.
    pub fn from_command(command: WriteCommand) -> Self {
        Self { command }
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WriteResult {
    pub command: Option<WriteCommand>,
    /// Store revision (etcd `modifiedIndex`) assigned to the write.
    pub revision: Option<u64>,
    /// Value held before the write, when the backend reports it.
    pub prev_value: Option<String>,
}
