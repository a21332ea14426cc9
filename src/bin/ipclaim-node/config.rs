//! Tracing setup and configuration loading for ipclaim-node.

use anyhow::Context;
use anyhow::Result;
use ipclaim::NodeConfig;
use tracing::info;

use crate::args::Args;

/// Initialize tracing subscriber with environment-based filtering.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    const NOISY_CRATES: &str = ",hyper_util=warn,reqwest=warn";

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("info{NOISY_CRATES}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// Node configuration carried by the command line alone.
///
/// Unset flags keep their defaults so `merge` leaves lower layers alone.
pub fn cli_config(args: &Args) -> NodeConfig {
    let defaults = NodeConfig::default();
    NodeConfig {
        iface: args.iface.clone().unwrap_or(defaults.iface),
        mask: args.mask.unwrap_or(defaults.mask),
        hostname: args.hostname.clone(),
        ipmanager: args.ipmanager.unwrap_or_default(),
        store_backend: args.store_backend.unwrap_or_default(),
        etcd_endpoints: args.etcd_endpoints.clone(),
        request_timeout_ms: args.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
        ttl_ms: args.ttl_ms.unwrap_or(defaults.ttl_ms),
        renew_interval_ms: args.renew_interval_ms.unwrap_or(defaults.renew_interval_ms),
        prefix: args.prefix.clone().unwrap_or(defaults.prefix),
        cidrs: args.cidrs.clone(),
    }
}

/// Load configuration with precedence env < TOML < CLI, then validate.
pub fn build_config(args: &Args) -> Result<NodeConfig> {
    let mut config = NodeConfig::from_env();

    if let Some(path) = &args.config {
        let file = NodeConfig::from_toml_file(path).context("failed to load configuration file")?;
        info!(path = %path.display(), "loaded configuration file");
        config.merge(file);
    }

    config.merge(cli_config(args));
    config.validate().context("invalid node configuration")?;
    Ok(config)
}
