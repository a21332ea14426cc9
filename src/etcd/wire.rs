//! etcd v2 keys API wire format.
//!
//! Decoding is kept free of I/O so every response shape can be tested from a
//! literal body.

use ipclaim_core::KeyValueStoreError;
use ipclaim_core::KeyValueWithRevision;
use ipclaim_core::WatchAction;
use ipclaim_core::WatchEvent;
use serde::Deserialize;

/// Key does not exist.
pub const ECODE_KEY_NOT_FOUND: u64 = 100;
/// `prevValue` / `prevIndex` precondition failed.
pub const ECODE_TEST_FAILED: u64 = 101;
/// `prevExist=false` and the key exists.
pub const ECODE_NODE_EXIST: u64 = 105;
/// `waitIndex` is older than the server's event history.
pub const ECODE_EVENT_INDEX_CLEARED: u64 = 401;

/// Response header carrying the store's current index.
pub const ETCD_INDEX_HEADER: &str = "X-Etcd-Index";

/// A node in the etcd v2 key tree.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdNode {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub nodes: Vec<EtcdNode>,
    #[serde(default)]
    pub created_index: u64,
    #[serde(default)]
    pub modified_index: u64,
    /// Remaining TTL in seconds.
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl EtcdNode {
    fn to_kv(&self) -> Option<KeyValueWithRevision> {
        if self.dir {
            return None;
        }
        Some(KeyValueWithRevision {
            key: self.key.clone(),
            value: self.value.clone().unwrap_or_default(),
            create_revision: self.created_index,
            mod_revision: self.modified_index,
            ttl_remaining_ms: self.ttl.map(|secs| (secs.max(0) as u64).saturating_mul(1000)),
        })
    }
}

/// Successful action response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdResponse {
    pub action: String,
    pub node: EtcdNode,
    #[serde(default)]
    pub prev_node: Option<EtcdNode>,
}

impl EtcdResponse {
    /// Convert a watch response. Actions that are not key changes yield `None`.
    pub fn into_watch_event(self) -> Option<WatchEvent> {
        let action = WatchAction::from_etcd(&self.action)?;
        Some(WatchEvent {
            action,
            key: self.node.key,
            value: self.node.value,
            index: self.node.modified_index,
        })
    }
}

/// Error body returned with a non-2xx status.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdErrorBody {
    pub error_code: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub index: Option<u64>,
}

impl EtcdErrorBody {
    pub fn is(&self, code: u64) -> bool {
        self.error_code == code
    }

    /// Generic mapping for codes the caller has no special handling for.
    pub fn into_store_error(self) -> KeyValueStoreError {
        KeyValueStoreError::Failed {
            reason: match self.cause {
                Some(cause) => format!("etcd error {}: {} ({cause})", self.error_code, self.message),
                None => format!("etcd error {}: {}", self.error_code, self.message),
            },
        }
    }
}

/// A decoded reply: either the action result or an etcd error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtcdReply {
    Success(EtcdResponse),
    Failure(EtcdErrorBody),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReply {
    Failure(EtcdErrorBody),
    Success(EtcdResponse),
}

/// Decode a response body.
///
/// etcd answers both success and failure with JSON; anything else (a proxy
/// page, a truncated body) is a [`KeyValueStoreError::Failed`] carrying the
/// HTTP status.
pub fn decode_response(status: u16, body: &str) -> Result<EtcdReply, KeyValueStoreError> {
    match serde_json::from_str::<RawReply>(body) {
        Ok(RawReply::Success(response)) => Ok(EtcdReply::Success(response)),
        Ok(RawReply::Failure(error)) => Ok(EtcdReply::Failure(error)),
        Err(err) => Err(KeyValueStoreError::Failed {
            reason: format!("undecodable etcd response (status {status}): {err}"),
        }),
    }
}

/// Every leaf under `node`, depth first.
pub fn flatten(node: &EtcdNode) -> Vec<KeyValueWithRevision> {
    let mut out = Vec::new();
    collect_leaves(node, &mut out);
    out
}

fn collect_leaves(node: &EtcdNode, out: &mut Vec<KeyValueWithRevision>) {
    if node.dir {
        for child in &node.nodes {
            collect_leaves(child, out);
        }
    } else if let Some(kv) = node.to_kv() {
        out.push(kv);
    }
}

/// Leaf value of a single-key read. A directory reads as absent.
pub fn node_value(node: &EtcdNode) -> Option<KeyValueWithRevision> {
    node.to_kv()
}

/// etcd v2 TTLs are whole seconds: round up, never below one.
pub fn ttl_seconds(ttl_ms: u64) -> u64 {
    ttl_ms.div_ceil(1000).max(1)
}
