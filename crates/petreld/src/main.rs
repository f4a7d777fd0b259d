//! `petreld`, the Petrel daemon.
//!
//! Runs the cluster-facing side of the erasure-coded pipeline (gossip,
//! elections, nursery replication) and offers operator commands against a
//! running cluster.
//!
//! # Usage
//!
//! ```text
//! petreld start -c petrel.toml            # run the gossip/nursery daemon
//! petreld status                          # gossip state of a running daemon
//! petreld check AUTH_acct                 # probe an account via the proxy
//! petreld repair AUTH_acct cont obj       # repair one quarantined entry
//! ```

mod config;
mod telemetry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use petrel_gossip::{
    GossipService, GossipState, GossipView, HttpActionDispatcher, HttpGossipTransport,
};
use petrel_nursery::NurseryReplicator;
use petrel_proxy::{BackendClient, HttpBackend, ProxyClient};
use petrel_repair::{QuarantineRepair, RepairOutcome};
use petrel_ring::Ring;
use petrel_types::PolicyList;
use tracing::{info, warn};

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "petreld", version, about = "Petrel object-storage proxy daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gossip and nursery-replication daemon.
    Start,

    /// Show the gossip state of a running daemon.
    Status {
        /// Daemon address (defaults to the configured bind address).
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Probe an account through the proxy dispatch path.
    Check {
        /// Account name.
        account: String,
    },

    /// Repair a quarantined entry by name.
    Repair {
        /// Account name.
        account: String,
        /// Container name (container- and object-level entries).
        container: Option<String>,
        /// Object name (object-level entries).
        object: Option<String>,
        /// Storage policy index for object-level entries.
        #[arg(short, long, default_value = "0")]
        policy: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref()).context("failed to load config")?;
    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start => cmd_start(config).await,
        Commands::Status { addr } => cmd_status(&config, addr).await,
        Commands::Check { account } => cmd_check(&config, &account).await,
        Commands::Repair {
            account,
            container,
            object,
            policy,
        } => {
            cmd_repair(
                &config,
                &account,
                container.as_deref().unwrap_or(""),
                object.as_deref().unwrap_or(""),
                policy,
            )
            .await
        }
    }
}

/// Build the proxy core from configuration.
///
/// The proxy owns the per-policy object dispatchers; each dispatcher holds
/// a weak handle back to the proxy, so the whole cycle is assembled in one
/// [`ProxyClient::new`] call.
fn build_proxy(config: &DaemonConfig, backend: Arc<dyn BackendClient>) -> Arc<ProxyClient> {
    let mut object_rings: HashMap<usize, Arc<dyn Ring>> = HashMap::new();
    for policy in &config.policies {
        match config.object_ring(policy.index) {
            Some(section) => {
                object_rings.insert(policy.index, config.build_ring(section));
            }
            None => warn!(policy = policy.index, "no object ring configured for policy"),
        }
    }
    ProxyClient::new(
        backend,
        config.build_ring(&config.account_ring),
        config.build_ring(&config.container_ring),
        object_rings,
        PolicyList::new(config.policies.clone()),
        None,
    )
}

async fn cmd_start(config: DaemonConfig) -> Result<()> {
    info!(
        bind = %config.proxy.bind_addr,
        drive_root = %config.ec.drive_root.display(),
        policies = config.policies.len(),
        "starting petreld"
    );

    let backend: Arc<dyn BackendClient> =
        Arc::new(HttpBackend::new().context("failed to build backend client")?);
    let ec_ring = config.build_ring(&config.ec.ring);

    // --- Gossip service ---
    let state = Arc::new(GossipState::new());
    let service = Arc::new(GossipService::new(
        state.clone(),
        ec_ring.clone(),
        Arc::new(HttpGossipTransport::new()),
        Arc::new(HttpActionDispatcher::new()),
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let service = service.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            service.run(shutdown_rx).await;
        });
    }

    // --- Nursery replicator + HTTP surface ---
    let replicator = Arc::new(NurseryReplicator::new(
        backend,
        ec_ring,
        config.ec.drive_root.clone(),
    ));
    match replicator.local_devices().await {
        Ok(devices) if !devices.is_empty() => {
            info!(count = devices.len(), "local nursery devices found")
        }
        Ok(_) => info!("no local nursery devices"),
        Err(e) => warn!(%e, "failed to enumerate local devices"),
    }

    let app = petrel_gossip::router(state).merge(petrel_nursery::router(replicator));
    let listener = tokio::net::TcpListener::bind(&config.proxy.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.proxy.bind_addr))?;
    info!(addr = %config.proxy.bind_addr, "gossip/nursery surface ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    let _ = shutdown_tx.send(true);
    info!("shutdown complete");
    Ok(())
}

async fn cmd_status(config: &DaemonConfig, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.proxy.bind_addr.clone());
    let url = format!("http://{addr}/gossip");
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("cannot reach daemon at {url}"))?;
    let view: GossipView = resp.json().await.context("undecodable gossip state")?;

    println!("Peers: {}", view.friends.len());
    if let Some(leader) = view.friends.values().max_by_key(|p| p.id) {
        println!("Leader: {} (id {})", leader.name, leader.id);
    }
    println!("Pending actions: {}", view.todo.len());
    println!("Completed actions (tombstoned): {}", view.done.len());
    Ok(())
}

async fn cmd_check(config: &DaemonConfig, account: &str) -> Result<()> {
    let backend: Arc<dyn BackendClient> =
        Arc::new(HttpBackend::new().context("failed to build backend client")?);
    let proxy = build_proxy(config, backend);
    let resp = proxy
        .head_account(account, axum::http::HeaderMap::new())
        .await;
    match resp.detail() {
        Some(detail) => println!("{account}: {} ({detail})", resp.status()),
        None => println!("{account}: {}", resp.status()),
    }
    Ok(())
}

async fn cmd_repair(
    config: &DaemonConfig,
    account: &str,
    container: &str,
    object: &str,
    policy: usize,
) -> Result<()> {
    let backend: Arc<dyn BackendClient> =
        Arc::new(HttpBackend::new().context("failed to build backend client")?);
    let ring: Arc<dyn Ring> = if !object.is_empty() {
        let section = config
            .object_ring(policy)
            .with_context(|| format!("no object ring configured for policy {policy}"))?;
        config.build_ring(section)
    } else if !container.is_empty() {
        config.build_ring(&config.container_ring)
    } else {
        config.build_ring(&config.account_ring)
    };

    let repair = QuarantineRepair::new(backend);
    match repair.repair_entry(ring.as_ref(), account, container, object).await {
        RepairOutcome::Handled => {
            println!("handled: the quarantine record can be deleted");
        }
        RepairOutcome::Retry => {
            println!("not handled: leave the quarantine record for a later pass");
        }
    }
    Ok(())
}

/// Resolve on SIGINT (Ctrl-C) or SIGTERM, starting graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
