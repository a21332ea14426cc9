//! Node configuration.
//!
//! Loaded in layers, lowest precedence first:
//! 1. Environment variables (`IPCLAIM_*`)
//! 2. TOML configuration file
//! 3. Command-line arguments

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ipclaim_fair::FairConfig;
use ipclaim_fair::keys::validate_cidr;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::etcd::EtcdConfig;

/// Which allocation backend hands out addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IpManagerKind {
    /// Grant every claim, no coordination.
    #[default]
    Noop,
    /// Fair, lease-based allocation over the coordination store.
    Fair,
}

impl FromStr for IpManagerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "noop" => Ok(IpManagerKind::Noop),
            "fair" => Ok(IpManagerKind::Fair),
            _ => Err(format!("invalid ipmanager: {s} (expected noop or fair)")),
        }
    }
}

/// Coordination store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// etcd v2 keys API.
    #[default]
    Etcd,
    /// In-process store; claims are only shared within this process.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(StoreBackend::Etcd),
            "memory" | "inmemory" => Ok(StoreBackend::Memory),
            _ => Err(format!("invalid store backend: {s} (expected etcd or memory)")),
        }
    }
}

/// Configuration for an `ipclaim-node` process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interface the claimed addresses are assigned to.
    #[serde(default = "default_iface")]
    pub iface: String,

    /// Mask appended to bare addresses in `cidrs`.
    #[serde(default = "default_mask")]
    pub mask: u8,

    /// Consumer id for claims. Defaults to the OS hostname.
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub ipmanager: IpManagerKind,

    #[serde(default)]
    pub store_backend: StoreBackend,

    #[serde(default)]
    pub etcd_endpoints: Vec<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Claim lifetime without renewal.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,

    /// Key namespace for claims.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Addresses this node serves.
    #[serde(default)]
    pub cidrs: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            iface: default_iface(),
            mask: default_mask(),
            hostname: None,
            ipmanager: IpManagerKind::default(),
            store_backend: StoreBackend::default(),
            etcd_endpoints: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            ttl_ms: default_ttl_ms(),
            renew_interval_ms: default_renew_interval_ms(),
            prefix: default_prefix(),
            cidrs: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from `IPCLAIM_<FIELD_NAME>` environment variables.
    ///
    /// List fields (`IPCLAIM_ETCD_ENDPOINTS`, `IPCLAIM_CIDRS`) are comma separated.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key)?.trim().parse().ok()
        }
        let list = |key: &str| lookup(key).map(|v| split_list(&v)).unwrap_or_default();

        Self {
            iface: lookup("IPCLAIM_IFACE").unwrap_or_else(default_iface),
            mask: parse(&lookup, "IPCLAIM_MASK").unwrap_or_else(default_mask),
            hostname: lookup("IPCLAIM_HOSTNAME").filter(|h| !h.is_empty()),
            ipmanager: parse(&lookup, "IPCLAIM_IPMANAGER").unwrap_or_default(),
            store_backend: parse(&lookup, "IPCLAIM_STORE_BACKEND").unwrap_or_default(),
            etcd_endpoints: list("IPCLAIM_ETCD_ENDPOINTS"),
            request_timeout_ms: parse(&lookup, "IPCLAIM_REQUEST_TIMEOUT_MS").unwrap_or_else(default_request_timeout_ms),
            ttl_ms: parse(&lookup, "IPCLAIM_TTL_MS").unwrap_or_else(default_ttl_ms),
            renew_interval_ms: parse(&lookup, "IPCLAIM_RENEW_INTERVAL_MS").unwrap_or_else(default_renew_interval_ms),
            prefix: lookup("IPCLAIM_PREFIX").unwrap_or_else(default_prefix),
            cidrs: list("IPCLAIM_CIDRS"),
        }
    }

    /// Merge configuration from a higher-precedence source.
    ///
    /// Fields in `other` that are `Some`, non-empty or non-default override
    /// fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.iface != default_iface() {
            self.iface = other.iface;
        }
        if other.mask != default_mask() {
            self.mask = other.mask;
        }
        if other.hostname.is_some() {
            self.hostname = other.hostname;
        }
        if other.ipmanager != IpManagerKind::default() {
            self.ipmanager = other.ipmanager;
        }
        if other.store_backend != StoreBackend::default() {
            self.store_backend = other.store_backend;
        }
        if !other.etcd_endpoints.is_empty() {
            self.etcd_endpoints = other.etcd_endpoints;
        }
        if other.request_timeout_ms != default_request_timeout_ms() {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if other.ttl_ms != default_ttl_ms() {
            self.ttl_ms = other.ttl_ms;
        }
        if other.renew_interval_ms != default_renew_interval_ms() {
            self.renew_interval_ms = other.renew_interval_ms;
        }
        if other.prefix != default_prefix() {
            self.prefix = other.prefix;
        }
        if !other.cidrs.is_empty() {
            self.cidrs = other.cidrs;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation { message });

        if self.iface.is_empty() {
            return invalid("iface must not be empty".into());
        }
        if self.mask > 128 {
            return invalid(format!("mask {} is out of range", self.mask));
        }
        if self.hostname.as_deref() == Some("") {
            return invalid("hostname must not be empty".into());
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be non-zero".into());
        }
        if self.ipmanager == IpManagerKind::Fair
            && self.store_backend == StoreBackend::Etcd
            && self.etcd_endpoints.is_empty()
        {
            return invalid("the fair ipmanager on the etcd backend needs at least one etcd endpoint".into());
        }
        if let Err(err) = self.fair_config().validate() {
            return invalid(err.to_string());
        }
        for cidr in self.served_cidrs() {
            if let Err(err) = validate_cidr(&cidr) {
                return invalid(err.to_string());
            }
        }
        Ok(())
    }

    /// Allocation manager settings derived from this configuration.
    pub fn fair_config(&self) -> FairConfig {
        FairConfig::default()
            .with_prefix(self.prefix.clone())
            .with_ttl(Duration::from_millis(self.ttl_ms), Duration::from_millis(self.renew_interval_ms))
    }

    pub fn etcd_config(&self) -> EtcdConfig {
        EtcdConfig {
            endpoints: self.etcd_endpoints.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// Consumer id: the configured hostname, else the OS hostname.
    pub fn uid(&self) -> Result<String, ConfigError> {
        if let Some(hostname) = &self.hostname {
            return Ok(hostname.clone());
        }
        let hostname = hostname::get().context(HostnameSnafu)?;
        Ok(hostname.to_string_lossy().into_owned())
    }

    /// Served identifiers with `mask` applied to bare addresses.
    pub fn served_cidrs(&self) -> Vec<String> {
        self.cidrs
            .iter()
            .map(|cidr| {
                if cidr.contains('/') {
                    cidr.clone()
                } else {
                    format!("{cidr}/{}", self.mask)
                }
            })
            .collect()
    }
}

fn default_iface() -> String {
    "eth0".into()
}

fn default_mask() -> u8 {
    32
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_ttl_ms() -> u64 {
    10_000
}

fn default_renew_interval_ms() -> u64 {
    3_000
}

fn default_prefix() -> String {
    ipclaim_fair::DEFAULT_CLAIM_PREFIX.into()
}

/// Split a comma separated list, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },

    #[snafu(display("failed to read OS hostname: {source}"))]
    Hostname { source: std::io::Error },
}
