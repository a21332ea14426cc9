//! In-memory implementation of [`KeyValueStore`].
//!
//! Provides a deterministic, non-persistent store with the same observable
//! semantics as the etcd backend: TTL entries expire and surface as `expire`
//! watch events, create-if-absent and compare-and-swap are atomic, and scans
//! are paginated by key order. Time is read from `tokio::time::Instant`, so
//! tests running on a paused runtime control expiry exactly.
//!
//! Expiry is lazy (any operation touching an expired key removes it first)
//! plus active via [`DeterministicKeyValueStore::expire_due`], which
//! [`crate::spawn_ttl_sweeper`] calls periodically.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipclaim_kv_types::DeleteRequest;
use ipclaim_kv_types::DeleteResult;
use ipclaim_kv_types::KeyValueStoreError;
use ipclaim_kv_types::KeyValueWithRevision;
use ipclaim_kv_types::ReadRequest;
use ipclaim_kv_types::ReadResult;
use ipclaim_kv_types::ScanRequest;
use ipclaim_kv_types::ScanResult;
use ipclaim_kv_types::WatchAction;
use ipclaim_kv_types::WatchEvent;
use ipclaim_kv_types::WatchRequest;
use ipclaim_kv_types::WriteCommand;
use ipclaim_kv_types::WriteRequest;
use ipclaim_kv_types::WriteResult;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use crate::constants::DEFAULT_SCAN_LIMIT;
use crate::constants::MAX_SCAN_RESULTS;
use crate::constants::MAX_WRITE_LOG_ENTRIES;
use crate::constants::WATCH_CHANNEL_CAPACITY;
use crate::traits::KeyValueStore;
use crate::traits::KeyWatcher;
use crate::validation::validate_write_command;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    create_revision: u64,
    mod_revision: u64,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    fn to_kv(&self, key: &str, now: Instant) -> KeyValueWithRevision {
        KeyValueWithRevision {
            key: key.to_string(),
            value: self.value.clone(),
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
            ttl_remaining_ms: self.deadline.map(|d| d.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<String, Entry>,
    revision: u64,
    write_log: VecDeque<WriteCommand>,
}

impl State {
    fn record(&mut self, command: &WriteCommand) {
        if self.write_log.len() == MAX_WRITE_LOG_ENTRIES {
            self.write_log.pop_front();
        }
        self.write_log.push_back(command.clone());
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// In-memory deterministic implementation of [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// use ipclaim_core::{DeterministicKeyValueStore, KeyValueStore, WriteRequest};
///
/// let store = DeterministicKeyValueStore::new();
/// store.write(WriteRequest::create_with_ttl("/ips/10.0.0.1::32", "node-1", 10_000)).await?;
/// ```
pub struct DeterministicKeyValueStore {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for DeterministicKeyValueStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }
}

impl DeterministicKeyValueStore {
    /// Create a new empty store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recent write commands, accepted or rejected, oldest first.
    ///
    /// Holds at most [`MAX_WRITE_LOG_ENTRIES`] commands.
    pub async fn write_log(&self) -> Vec<WriteCommand> {
        self.state.lock().await.write_log.iter().cloned().collect()
    }

    /// Remove every entry whose TTL has lapsed, emitting one `expire` event each.
    ///
    /// Returns the number of entries removed.
    pub async fn expire_due(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let expired: Vec<String> =
            state.data.iter().filter(|(_, e)| e.is_expired(now)).map(|(k, _)| k.clone()).collect();
        for key in &expired {
            self.purge_expired(&mut state, key, now);
        }
        expired.len() as u32
    }

    /// Publish an arbitrary event to every open watcher.
    ///
    /// The stored data is not touched.
    pub fn inject_event(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self, action: WatchAction, key: &str, value: Option<String>, index: u64) {
        // No receivers is fine.
        let _ = self.events.send(WatchEvent {
            action,
            key: key.to_string(),
            value,
            index,
        });
    }

    /// Drop `key` if its TTL has lapsed. Returns true if it was removed.
    fn purge_expired(&self, state: &mut State, key: &str, now: Instant) -> bool {
        if !state.data.get(key).is_some_and(|e| e.is_expired(now)) {
            return false;
        }
        state.data.remove(key);
        let revision = state.next_revision();
        self.publish(WatchAction::Expire, key, None, revision);
        true
    }

    fn insert(&self, state: &mut State, key: &str, value: &str, deadline: Option<Instant>, action: WatchAction) -> u64 {
        let revision = state.next_revision();
        let create_revision = state.data.get(key).map(|e| e.create_revision).unwrap_or(revision);
        state.data.insert(key.to_string(), Entry {
            value: value.to_string(),
            create_revision,
            mod_revision: revision,
            deadline,
        });
        self.publish(action, key, Some(value.to_string()), revision);
        revision
    }

    fn remove(&self, state: &mut State, key: &str) -> Option<(Entry, u64)> {
        let entry = state.data.remove(key)?;
        let revision = state.next_revision();
        self.publish(WatchAction::Delete, key, None, revision);
        Some((entry, revision))
    }
}

fn deadline_after(now: Instant, ttl_ms: u64) -> Option<Instant> {
    Some(now + Duration::from_millis(ttl_ms))
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.record(&request.command);
        validate_write_command(&request.command)?;

        let key = request.command.key().to_string();
        self.purge_expired(&mut state, &key, now);
        let prev_value = state.data.get(&key).map(|e| e.value.clone());

        let revision = match &request.command {
            WriteCommand::Set { key, value } => self.insert(&mut state, key, value, None, WatchAction::Set),
            WriteCommand::SetWithTTL { key, value, ttl_ms } => {
                self.insert(&mut state, key, value, deadline_after(now, *ttl_ms), WatchAction::Set)
            }
            WriteCommand::CreateWithTTL { key, value, ttl_ms } => {
                if prev_value.is_some() {
                    return Err(KeyValueStoreError::KeyExists { key: key.clone() });
                }
                self.insert(&mut state, key, value, deadline_after(now, *ttl_ms), WatchAction::Create)
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                if prev_value != *expected {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: expected.clone(),
                        actual: prev_value,
                    });
                }
                let action = if expected.is_none() {
                    WatchAction::Create
                } else {
                    WatchAction::CompareAndSwap
                };
                self.insert(&mut state, key, new_value, None, action)
            }
            WriteCommand::CompareAndSwapWithTTL {
                key,
                expected,
                new_value,
                ttl_ms,
            } => {
                if prev_value.as_deref() != Some(expected.as_str()) {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: Some(expected.clone()),
                        actual: prev_value,
                    });
                }
                self.insert(&mut state, key, new_value, deadline_after(now, *ttl_ms), WatchAction::CompareAndSwap)
            }
            WriteCommand::Delete { key } => match self.remove(&mut state, key) {
                Some((_, revision)) => revision,
                None => return Err(KeyValueStoreError::NotFound { key: key.clone() }),
            },
        };

        Ok(WriteResult {
            command: Some(request.command),
            revision: Some(revision),
            prev_value,
        })
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.purge_expired(&mut state, &request.key, now);
        Ok(ReadResult {
            kv: state.data.get(&request.key).map(|e| e.to_kv(&request.key, now)),
        })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        let now = Instant::now();
        let command = WriteRequest::delete(request.key.clone()).command;
        let mut state = self.state.lock().await;
        state.record(&command);
        validate_write_command(&command)?;
        self.purge_expired(&mut state, &request.key, now);
        let is_deleted = self.remove(&mut state, &request.key).is_some();
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired: Vec<String> = state
            .data
            .iter()
            .filter(|(k, e)| k.starts_with(&request.prefix) && e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.purge_expired(&mut state, key, now);
        }

        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT).clamp(1, MAX_SCAN_RESULTS) as usize;
        let mut matching = state
            .data
            .range(request.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&request.prefix))
            .filter(|(k, _)| request.continuation_token.as_ref().is_none_or(|token| k.as_str() > token.as_str()));

        let entries: Vec<KeyValueWithRevision> = matching.by_ref().take(limit).map(|(k, e)| e.to_kv(k, now)).collect();
        let is_truncated = matching.next().is_some();
        let continuation_token = if is_truncated {
            entries.last().map(|kv| kv.key.clone())
        } else {
            None
        };

        Ok(ScanResult {
            count: entries.len() as u32,
            entries,
            is_truncated,
            continuation_token,
        })
    }

    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn KeyWatcher>, KeyValueStoreError> {
        Ok(Box::new(InMemoryWatcher {
            rx: self.events.subscribe(),
            prefix: request.prefix,
        }))
    }
}

/// Watch stream over the in-memory store's broadcast channel.
struct InMemoryWatcher {
    rx: broadcast::Receiver<WatchEvent>,
    prefix: String,
}

#[async_trait]
impl KeyWatcher for InMemoryWatcher {
    async fn next_event(&mut self) -> Result<WatchEvent, KeyValueStoreError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(prefix = %self.prefix, skipped, "watcher lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(KeyValueStoreError::WatchClosed),
            }
        }
    }
}
