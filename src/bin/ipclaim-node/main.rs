//! ipclaim node binary.
//!
//! Claims the addresses this node serves through the configured allocation
//! backend, keeps granted claims renewed, and re-claims served addresses whose
//! claims expire elsewhere. Configuration layers: environment < TOML < CLI.
//!
//! # Usage
//!
//! ```bash
//! # Fair allocation over etcd
//! ipclaim-node --ipmanager fair --etcd http://10.0.0.10:2379 --cidr 10.10.0.2 --cidr 10.10.0.3
//!
//! # TOML config
//! ipclaim-node --config /etc/ipclaim/node.toml
//!
//! # Environment variables
//! export IPCLAIM_IPMANAGER=fair IPCLAIM_STORE_BACKEND=memory IPCLAIM_CIDRS=10.10.0.2
//! ipclaim-node
//! ```

mod args;
mod config;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use ipclaim::ExpiredClaimReconciler;
use ipclaim::FairManager;
use ipclaim::IpManager;
use ipclaim::IpManagerKind;
use ipclaim::NodeConfig;
use ipclaim::NoopManager;
use ipclaim::StoreBackend;
use ipclaim::etcd::EtcdKeyValueStore;
use ipclaim_core::DeterministicKeyValueStore;
use ipclaim_core::KeyValueStore;
use ipclaim_core::TtlSweeperConfig;
use ipclaim_core::spawn_ttl_sweeper;
use ipclaim_workqueue::WorkQueue;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::args::Args;
use crate::config::build_config;
use crate::config::init_tracing;

type SharedStore = Arc<dyn KeyValueStore>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = build_config(&args)?;
    let uid = config.uid().context("failed to determine node uid")?;
    let served = config.served_cidrs();

    info!(
        uid = %uid,
        iface = %config.iface,
        ipmanager = ?config.ipmanager,
        store_backend = ?config.store_backend,
        served = served.len(),
        "starting ipclaim node"
    );

    let cancel = CancellationToken::new();
    let queue = Arc::new(WorkQueue::new());
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let (manager, fair): (Arc<dyn IpManager>, Option<Arc<FairManager<dyn KeyValueStore>>>) = match config.ipmanager {
        IpManagerKind::Noop => (Arc::new(NoopManager) as Arc<dyn IpManager>, None),
        IpManagerKind::Fair => {
            let store = open_store(&config, &cancel, &mut tasks)?;
            let fair = FairManager::new(store, config.fair_config(), queue.clone(), cancel.clone())
                .context("failed to create allocation manager")?;
            tasks.push(fair.spawn_expiration_watch());
            (fair.clone() as Arc<dyn IpManager>, Some(fair))
        }
    };

    let reconciler = ExpiredClaimReconciler::new(manager, queue.clone(), uid, served, cancel.clone());
    reconciler.claim_all().await;
    tasks.push(reconciler.spawn());

    shutdown_signal().await;

    cancel.cancel();
    queue.shut_down();
    if let Some(fair) = fair {
        fair.shutdown().await;
    }
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task panicked");
        }
    }

    info!("ipclaim node stopped");
    Ok(())
}

/// Open the configured coordination store.
fn open_store(config: &NodeConfig, cancel: &CancellationToken, tasks: &mut Vec<JoinHandle<()>>) -> Result<SharedStore> {
    match config.store_backend {
        StoreBackend::Etcd => {
            let store = EtcdKeyValueStore::new(config.etcd_config()).context("failed to create etcd client")?;
            info!(endpoints = ?config.etcd_endpoints, "using etcd coordination store");
            Ok(Arc::new(store) as SharedStore)
        }
        StoreBackend::Memory => {
            let store = DeterministicKeyValueStore::new();
            tasks.push(spawn_ttl_sweeper(store.clone(), TtlSweeperConfig::default(), cancel.clone()));
            warn!("using in-memory coordination store; claims are not shared with other nodes");
            Ok(store as SharedStore)
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}
