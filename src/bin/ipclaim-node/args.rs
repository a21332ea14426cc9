//! CLI argument parsing for ipclaim-node.

use std::path::PathBuf;

use clap::Parser;
use ipclaim::IpManagerKind;
use ipclaim::StoreBackend;

#[derive(Parser, Debug, Default)]
#[command(name = "ipclaim-node", about = "Claim served IP addresses fairly across cluster nodes")]
pub struct Args {
    /// Path to TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface the claimed addresses are assigned to.
    #[arg(long)]
    pub iface: Option<String>,

    /// Mask appended to bare addresses.
    #[arg(long)]
    pub mask: Option<u8>,

    /// Consumer id for claims (defaults to the OS hostname).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Allocation backend.
    /// Options: "noop" (default), "fair"
    #[arg(long)]
    pub ipmanager: Option<IpManagerKind>,

    /// Coordination store.
    /// Options: "etcd" (default), "memory"
    #[arg(long)]
    pub store_backend: Option<StoreBackend>,

    /// etcd endpoint URL. Repeat or comma separate for several.
    #[arg(long = "etcd", value_delimiter = ',')]
    pub etcd_endpoints: Vec<String>,

    /// Per-request timeout for the coordination store, in milliseconds.
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Claim lifetime without renewal, in milliseconds.
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Renewal period, in milliseconds. Must be shorter than the TTL.
    #[arg(long)]
    pub renew_interval_ms: Option<u64>,

    /// Key namespace for claims.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Address or CIDR this node serves. Repeat for several.
    #[arg(long = "cidr")]
    pub cidrs: Vec<String>,
}
