//! Watch stream types.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Subscribe to every change under a key prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchRequest {
    pub prefix: String,
}

impl WatchRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

/// What happened to a key.
///
/// Names follow the etcd v2 `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchAction {
    Set,
    Create,
    Update,
    CompareAndSwap,
    Delete,
    CompareAndDelete,
    Expire,
}

impl WatchAction {
    /// Parse an etcd v2 action string. Unknown actions yield `None`.
    pub fn from_etcd(action: &str) -> Option<Self> {
        match action {
            "set" => Some(WatchAction::Set),
            "create" => Some(WatchAction::Create),
            "update" => Some(WatchAction::Update),
            "compareAndSwap" => Some(WatchAction::CompareAndSwap),
            "delete" => Some(WatchAction::Delete),
            "compareAndDelete" => Some(WatchAction::CompareAndDelete),
            "expire" => Some(WatchAction::Expire),
            _ => None,
        }
    }

    /// True when the key no longer exists after this event.
    pub fn is_removal(self) -> bool {
        matches!(self, WatchAction::Delete | WatchAction::CompareAndDelete | WatchAction::Expire)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WatchAction::Set => "set",
            WatchAction::Create => "create",
            WatchAction::Update => "update",
            WatchAction::CompareAndSwap => "compareAndSwap",
            WatchAction::Delete => "delete",
            WatchAction::CompareAndDelete => "compareAndDelete",
            WatchAction::Expire => "expire",
        }
    }
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change delivered on a watch stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub key: String,
    /// Value after the change; `None` for removals.
    pub value: Option<String>,
    /// Store index of the change.
    pub index: u64,
}

impl WatchEvent {
    pub fn new(action: WatchAction, key: impl Into<String>) -> Self {
        Self {
            action,
            key: key.into(),
            value: None,
            index: 0,
        }
    }
}
