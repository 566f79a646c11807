//! Sidecar configuration repo server.
//!
//! Loads mesh state from a JSON snapshot, publishes one configuration
//! document per proxy into the remote repository and re-reads the snapshot
//! periodically, republishing whatever changed.
//!
//! Usage:
//!   sidecar-repod --snapshot mesh.json --repo-url http://repo:6060

use anyhow::{Context, Result};
use clap::Parser;
use sidecar_control::catalog::ProxyEntry;
use sidecar_control::{
    MeshEvent, MeshSnapshot, ProxyRegistry, RepoServer, ServerConfig, ServerDeps,
    SnapshotAuthority, SnapshotCatalog,
};
use sidecar_repo_client::{HttpRepoClient, HttpRepoConfig};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sidecar-repod")]
#[command(about = "Publishes sidecar proxy configuration to a versioned repository")]
struct Args {
    /// Path to the mesh snapshot (JSON)
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Base URL of the configuration repository
    #[arg(long, default_value = "http://127.0.0.1:6060")]
    repo_url: String,

    /// Per-request timeout against the repository, in seconds
    #[arg(long, default_value = "30")]
    repo_timeout_secs: u64,

    /// Prefix for every repository namespace, e.g. the mesh name
    #[arg(long)]
    codebase_prefix: Option<String>,

    /// Worker lanes (0 = one per CPU)
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// Seconds between snapshot reloads
    #[arg(long, default_value = "30")]
    resync_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Sidecar repo server starting...");
    let snapshot = MeshSnapshot::load(&args.snapshot)
        .with_context(|| format!("failed to load snapshot {}", args.snapshot.display()))?;
    info!(
        "Loaded snapshot: {} proxies, {} services",
        snapshot.proxies.len(),
        snapshot.services.len()
    );

    let authority = Arc::new(SnapshotAuthority::new(snapshot.pki.clone()));
    if snapshot.pki.is_none() {
        warn!("Snapshot has no PKI material; proxies will be published without certificates");
    }
    let registry = Arc::new(ProxyRegistry::new());
    sync_proxies(&registry, &snapshot.proxies);
    let catalog = Arc::new(SnapshotCatalog::new(snapshot));

    let repo = Arc::new(
        HttpRepoClient::new(HttpRepoConfig {
            base_url: args.repo_url.clone(),
            timeout_secs: args.repo_timeout_secs,
        })
        .context("failed to build repository client")?,
    );

    let config = ServerConfig {
        codebase_prefix: args.codebase_prefix.clone(),
        workers: args.workers,
        ..ServerConfig::default()
    };
    let (events, _) = broadcast::channel(256);
    let server = RepoServer::new(
        ServerDeps {
            catalog: catalog.clone(),
            kube: catalog.clone(),
            authority,
            repo,
            registry: registry.clone(),
        },
        config,
        events.clone(),
    );

    server.start().await.context("repo server failed to start")?;
    info!(
        "Repo server ready: base {}, {} worker lane(s), repo {}",
        server.paths().base(),
        server.scheduler().lane_count(),
        args.repo_url
    );

    let period = Duration::from_secs(args.resync_secs.max(1));
    let mut resync = interval_at(Instant::now() + period, period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = resync.tick() => {
                reload(&args.snapshot, &catalog, &registry, &events);
            }
        }
    }

    server.shutdown();
    Ok(())
}

/// Re-reads the snapshot and, if it changed, swaps it in and asks for a
/// full recompute.
fn reload(
    path: &Path,
    catalog: &SnapshotCatalog,
    registry: &ProxyRegistry,
    events: &broadcast::Sender<MeshEvent>,
) {
    let snapshot = match MeshSnapshot::load(path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to reload snapshot {}: {}", path.display(), e);
            return;
        }
    };
    if snapshot == catalog.snapshot() {
        debug!("Snapshot unchanged");
        return;
    }

    sync_proxies(registry, &snapshot.proxies);
    catalog.replace(snapshot);
    info!("Snapshot changed, recomputing all proxies");
    if events.send(MeshEvent::All).is_err() {
        warn!("No event listener running");
    }
}

/// Registers new proxies and drops vanished ones. Proxies already known
/// keep their state.
fn sync_proxies(registry: &ProxyRegistry, entries: &[ProxyEntry]) {
    let wanted: BTreeSet<_> = entries.iter().map(|e| e.key).collect();
    for proxy in registry.list() {
        if !wanted.contains(&proxy.key()) {
            registry.unregister(&proxy.key());
            info!("Proxy {} disconnected", proxy);
        }
    }
    for entry in entries {
        if registry.get(&entry.key).is_none() {
            let proxy = registry.register(entry.clone().into_proxy());
            info!("Proxy {} connected", proxy);
        }
    }
}
