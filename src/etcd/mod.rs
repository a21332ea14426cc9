//! etcd v2 backend for [`KeyValueStore`].
//!
//! Talks to the v2 keys API over HTTP:
//!
//! | operation | request |
//! |---|---|
//! | read | `GET /v2/keys{key}` |
//! | scan | `GET /v2/keys{prefix}?recursive=true&sorted=true` |
//! | create | `PUT /v2/keys{key}?prevExist=false` with `value`, `ttl` |
//! | renew | `PUT /v2/keys{key}?prevValue=uid` with `value`, `ttl` |
//! | delete | `DELETE /v2/keys{key}` |
//! | watch | `GET /v2/keys{prefix}?wait=true&recursive=true&waitIndex=N` |
//!
//! Endpoints are tried in order; one that cannot be reached passes the request
//! to the next. Every request but the watch long-poll carries the configured
//! timeout.

mod wire;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipclaim_core::DeleteRequest;
use ipclaim_core::DeleteResult;
use ipclaim_core::KeyValueStore;
use ipclaim_core::KeyValueStoreError;
use ipclaim_core::KeyWatcher;
use ipclaim_core::ReadRequest;
use ipclaim_core::ReadResult;
use ipclaim_core::ScanRequest;
use ipclaim_core::ScanResult;
use ipclaim_core::WatchEvent;
use ipclaim_core::WatchRequest;
use ipclaim_core::WriteCommand;
use ipclaim_core::WriteRequest;
use ipclaim_core::WriteResult;
use ipclaim_core::constants::DEFAULT_SCAN_LIMIT;
use ipclaim_core::constants::MAX_SCAN_RESULTS;
use ipclaim_core::validate_write_command;
use reqwest::Client;
use reqwest::Method;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;
use tracing::warn;
use url::Url;
pub use wire::ECODE_EVENT_INDEX_CLEARED;
pub use wire::ECODE_KEY_NOT_FOUND;
pub use wire::ECODE_NODE_EXIST;
pub use wire::ECODE_TEST_FAILED;
pub use wire::EtcdErrorBody;
pub use wire::EtcdNode;
pub use wire::EtcdReply;
pub use wire::EtcdResponse;
pub use wire::decode_response;
pub use wire::ttl_seconds;

const KEYS_PATH: &str = "v2/keys";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect timeout for the watch client, which has no overall timeout.
const WATCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors building an [`EtcdKeyValueStore`].
#[derive(Debug, Snafu)]
pub enum EtcdError {
    #[snafu(display("no etcd endpoints configured"))]
    NoEndpoints,

    #[snafu(display("invalid etcd endpoint '{endpoint}': {source}"))]
    InvalidEndpoint { endpoint: String, source: url::ParseError },

    #[snafu(display("etcd endpoint '{endpoint}' must use http or https"))]
    UnsupportedScheme { endpoint: String },

    #[snafu(display("failed to build HTTP client: {source}"))]
    BuildClient { source: reqwest::Error },
}

/// Connection settings for the etcd backend.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub request_timeout: Duration,
}

impl EtcdConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Parse and normalize an endpoint so that its path ends with `/`.
fn parse_endpoint(endpoint: &str) -> Result<Url, EtcdError> {
    let mut url = Url::parse(endpoint.trim()).context(InvalidEndpointSnafu { endpoint })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EtcdError::UnsupportedScheme {
            endpoint: endpoint.to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// URL of `key` under the keys API of `endpoint`.
fn key_url(endpoint: &Url, key: &str) -> Url {
    let mut url = endpoint.clone();
    let key = key.strip_prefix('/').unwrap_or(key);
    url.set_path(&format!("{}{KEYS_PATH}/{key}", endpoint.path()));
    url
}

/// Raw reply plus the store index header.
struct Reply {
    etcd_index: Option<u64>,
    body: EtcdReply,
}

struct EtcdInner {
    client: Client,
    watch_client: Client,
    endpoints: Vec<Url>,
    request_timeout: Duration,
}

impl EtcdInner {
    /// Send one request, failing over between endpoints on connection errors.
    async fn execute(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
        long_poll: bool,
    ) -> Result<Reply, KeyValueStoreError> {
        let client = if long_poll { &self.watch_client } else { &self.client };
        let mut last_error = None;

        for endpoint in &self.endpoints {
            let url = key_url(endpoint, key);
            let mut request = client.request(method.clone(), url).query(query);
            if !form.is_empty() {
                request = request.form(form);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    return Err(KeyValueStoreError::Timeout {
                        duration_ms: self.request_timeout.as_millis() as u64,
                    });
                }
                Err(err) if err.is_connect() => {
                    debug!(endpoint = %endpoint, error = %err, "etcd endpoint unreachable, trying next");
                    last_error = Some(err.to_string());
                    continue;
                }
                Err(err) => {
                    return Err(KeyValueStoreError::Unavailable { reason: err.to_string() });
                }
            };

            let status = response.status().as_u16();
            let etcd_index = response
                .headers()
                .get(wire::ETCD_INDEX_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            let text = response.text().await.map_err(|err| {
                if err.is_timeout() {
                    KeyValueStoreError::Timeout {
                        duration_ms: self.request_timeout.as_millis() as u64,
                    }
                } else {
                    // Connection dropped mid-body. A watcher resumes from its
                    // wait index on the next poll.
                    KeyValueStoreError::Unavailable { reason: err.to_string() }
                }
            })?;

            return Ok(Reply {
                etcd_index,
                body: decode_response(status, &text)?,
            });
        }

        Err(KeyValueStoreError::Unavailable {
            reason: last_error.unwrap_or_else(|| "no etcd endpoints".to_string()),
        })
    }

    async fn current_value(&self, key: &str) -> Option<String> {
        let reply = self.execute(Method::GET, key, &[], &[], false).await.ok()?;
        match reply.body {
            EtcdReply::Success(response) => wire::node_value(&response.node).map(|kv| kv.value),
            EtcdReply::Failure(_) => None,
        }
    }
}

/// [`KeyValueStore`] backed by an etcd v2 cluster.
#[derive(Clone)]
pub struct EtcdKeyValueStore {
    inner: Arc<EtcdInner>,
}

impl EtcdKeyValueStore {
    pub fn new(config: EtcdConfig) -> Result<Self, EtcdError> {
        if config.endpoints.is_empty() {
            return Err(EtcdError::NoEndpoints);
        }
        let endpoints = config.endpoints.iter().map(|e| parse_endpoint(e)).collect::<Result<Vec<_>, _>>()?;

        let client = Client::builder().timeout(config.request_timeout).build().context(BuildClientSnafu)?;
        let watch_client = Client::builder().connect_timeout(WATCH_CONNECT_TIMEOUT).build().context(BuildClientSnafu)?;

        Ok(Self {
            inner: Arc::new(EtcdInner {
                client,
                watch_client,
                endpoints,
                request_timeout: config.request_timeout,
            }),
        })
    }

    /// Map a failed compare-and-swap, filling in the value currently stored.
    async fn compare_failed(&self, key: &str, expected: Option<String>) -> KeyValueStoreError {
        KeyValueStoreError::CompareAndSwapFailed {
            key: key.to_string(),
            expected,
            actual: self.inner.current_value(key).await,
        }
    }
}

#[async_trait]
impl KeyValueStore for EtcdKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        validate_write_command(&request.command)?;

        let (method, query, form) = match &request.command {
            WriteCommand::Set { value, .. } => (Method::PUT, vec![], vec![("value", value.clone())]),
            WriteCommand::SetWithTTL { value, ttl_ms, .. } => {
                (Method::PUT, vec![], vec![("value", value.clone()), ("ttl", ttl_seconds(*ttl_ms).to_string())])
            }
            WriteCommand::CreateWithTTL { value, ttl_ms, .. } => (
                Method::PUT,
                vec![("prevExist", "false".to_string())],
                vec![("value", value.clone()), ("ttl", ttl_seconds(*ttl_ms).to_string())],
            ),
            WriteCommand::CompareAndSwap {
                expected, new_value, ..
            } => {
                let query = match expected {
                    Some(expected) => vec![("prevValue", expected.clone())],
                    None => vec![("prevExist", "false".to_string())],
                };
                (Method::PUT, query, vec![("value", new_value.clone())])
            }
            WriteCommand::CompareAndSwapWithTTL {
                expected,
                new_value,
                ttl_ms,
                ..
            } => (
                Method::PUT,
                vec![("prevValue", expected.clone())],
                vec![("value", new_value.clone()), ("ttl", ttl_seconds(*ttl_ms).to_string())],
            ),
            WriteCommand::Delete { .. } => (Method::DELETE, vec![], vec![]),
        };

        let key = request.command.key().to_string();
        let reply = self.inner.execute(method, &key, &query, &form, false).await?;

        match reply.body {
            EtcdReply::Success(response) => Ok(WriteResult {
                command: Some(request.command),
                revision: Some(response.node.modified_index),
                prev_value: response.prev_node.and_then(|node| node.value),
            }),
            EtcdReply::Failure(error) => Err(match &request.command {
                WriteCommand::CreateWithTTL { .. } if error.is(ECODE_NODE_EXIST) => {
                    KeyValueStoreError::KeyExists { key }
                }
                WriteCommand::CompareAndSwap { expected, .. }
                    if error.is(ECODE_NODE_EXIST) || error.is(ECODE_TEST_FAILED) || error.is(ECODE_KEY_NOT_FOUND) =>
                {
                    self.compare_failed(&key, expected.clone()).await
                }
                WriteCommand::CompareAndSwapWithTTL { expected, .. }
                    if error.is(ECODE_TEST_FAILED) || error.is(ECODE_KEY_NOT_FOUND) =>
                {
                    self.compare_failed(&key, Some(expected.clone())).await
                }
                WriteCommand::Delete { .. } if error.is(ECODE_KEY_NOT_FOUND) => KeyValueStoreError::NotFound { key },
                _ => error.into_store_error(),
            }),
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let reply = self.inner.execute(Method::GET, &request.key, &[], &[], false).await?;
        match reply.body {
            EtcdReply::Success(response) => Ok(ReadResult {
                kv: wire::node_value(&response.node),
            }),
            EtcdReply::Failure(error) if error.is(ECODE_KEY_NOT_FOUND) => Ok(ReadResult { kv: None }),
            EtcdReply::Failure(error) => Err(error.into_store_error()),
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        let command = WriteRequest::delete(request.key.clone()).command;
        validate_write_command(&command)?;

        let reply = self.inner.execute(Method::DELETE, &request.key, &[], &[], false).await?;
        let is_deleted = match reply.body {
            EtcdReply::Success(_) => true,
            EtcdReply::Failure(error) if error.is(ECODE_KEY_NOT_FOUND) => false,
            EtcdReply::Failure(error) => return Err(error.into_store_error()),
        };
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        let query = [("recursive", "true".to_string()), ("sorted", "true".to_string())];
        let reply = self.inner.execute(Method::GET, &request.prefix, &query, &[], false).await?;

        let mut entries = match reply.body {
            EtcdReply::Success(response) => wire::flatten(&response.node),
            EtcdReply::Failure(error) if error.is(ECODE_KEY_NOT_FOUND) => Vec::new(),
            EtcdReply::Failure(error) => return Err(error.into_store_error()),
        };

        // v2 has no server-side paging; page over the sorted listing.
        entries.retain(|kv| kv.key.starts_with(&request.prefix));
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(token) = &request.continuation_token {
            entries.retain(|kv| kv.key.as_str() > token.as_str());
        }
        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT).clamp(1, MAX_SCAN_RESULTS) as usize;
        let is_truncated = entries.len() > limit;
        entries.truncate(limit);
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
        // Start from the index current at subscription time so nothing between
        // this call and the first long-poll is missed.
        let reply = self.inner.execute(Method::GET, &request.prefix, &[], &[], false).await?;
        let wait_index = reply.etcd_index.map(|index| index.saturating_add(1));
        debug!(prefix = %request.prefix, ?wait_index, "etcd watch subscribed");

        Ok(Box::new(EtcdWatcher {
            inner: self.inner.clone(),
            prefix: request.prefix,
            wait_index,
        }))
    }
}

/// Long-polling watch on a key prefix.
pub struct EtcdWatcher {
    inner: Arc<EtcdInner>,
    prefix: String,
    wait_index: Option<u64>,
}

#[async_trait]
impl KeyWatcher for EtcdWatcher {
    async fn next_event(&mut self) -> Result<WatchEvent, KeyValueStoreError> {
        loop {
            let mut query = vec![("wait", "true".to_string()), ("recursive", "true".to_string())];
            if let Some(index) = self.wait_index {
                query.push(("waitIndex", index.to_string()));
            }

            let reply = self.inner.execute(Method::GET, &self.prefix, &query, &[], true).await?;
            match reply.body {
                EtcdReply::Success(response) => {
                    self.wait_index = Some(response.node.modified_index.saturating_add(1));
                    if let Some(event) = response.into_watch_event() {
                        return Ok(event);
                    }
                }
                EtcdReply::Failure(error) if error.is(ECODE_EVENT_INDEX_CLEARED) => {
                    let resume = reply.etcd_index.or(error.index).map(|index| index.saturating_add(1));
                    warn!(
                        prefix = %self.prefix,
                        wait_index = ?self.wait_index,
                        ?resume,
                        "etcd event history cleared, events may have been missed"
                    );
                    self.wait_index = resume;
                }
                EtcdReply::Failure(error) => return Err(error.into_store_error()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_normalizes_path() {
        assert_eq!(parse_endpoint("http://127.0.0.1:2379").unwrap().as_str(), "http://127.0.0.1:2379/");
        assert_eq!(parse_endpoint("https://etcd/base").unwrap().path(), "/base/");
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_input() {
        assert!(matches!(parse_endpoint("not a url"), Err(EtcdError::InvalidEndpoint { .. })));
        assert!(matches!(parse_endpoint("ftp://etcd:2379"), Err(EtcdError::UnsupportedScheme { .. })));
    }

    #[test]
    fn test_key_url() {
        let endpoint = parse_endpoint("http://127.0.0.1:2379").unwrap();
        let url = key_url(&endpoint, "/ipclaim/10.0.0.1::32");
        assert_eq!(url.as_str(), "http://127.0.0.1:2379/v2/keys/ipclaim/10.0.0.1::32");

        let endpoint = parse_endpoint("http://proxy/etcd/").unwrap();
        assert_eq!(key_url(&endpoint, "/ipclaim/").path(), "/etcd/v2/keys/ipclaim/");
    }

    #[test]
    fn test_new_requires_endpoints() {
        assert!(matches!(EtcdKeyValueStore::new(EtcdConfig::new(vec![])), Err(EtcdError::NoEndpoints)));
        assert!(EtcdKeyValueStore::new(EtcdConfig::new(vec!["http://127.0.0.1:2379".into()])).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_are_unavailable() {
        // Port 9 (discard) is closed on test hosts; connection is refused.
        let mut config = EtcdConfig::new(vec!["http://127.0.0.1:9".into()]);
        config.request_timeout = Duration::from_secs(2);
        let store = EtcdKeyValueStore::new(config).unwrap();

        let err = store.read(ReadRequest::new("/ipclaim/a")).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_invalid_write_is_rejected_locally() {
        let store = EtcdKeyValueStore::new(EtcdConfig::new(vec!["http://127.0.0.1:9".into()])).unwrap();
        let err = store.write(WriteRequest::create_with_ttl("", "1", 1_000)).await.unwrap_err();
        assert_eq!(err, KeyValueStoreError::EmptyKey);
    }
}
