//! Daemon orchestration: wires loader, collector, aggregator, retention, and
//! the IPC server together and fans a single shutdown signal out to all of
//! them.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::time;

use portwatch_api::protocol::PortInfo;

use crate::aggregator::Aggregator;
use crate::collector::Collector;
use crate::loader::Loader;
use crate::server::{DaemonInfo, DaemonState, IpcServer};
use crate::storage::sqlite::SqliteStore;
use crate::storage::StatsStore;

const COLLECT_INTERVAL: Duration = Duration::from_millis(100);
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validated runtime configuration, produced by `main` from flags + file.
pub(crate) struct DaemonConfig {
    pub ports: Vec<PortInfo>,
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub retention_days: u32,
}

/// Run the daemon until SIGINT/SIGTERM.
pub(crate) async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    // Bump the memlock rlimit; kernels without memcg-based accounting charge
    // BPF map memory against it.
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        debug!("failed to remove memlock limit");
    }

    info!(
        "starting portwatchd: data_dir={}, socket={}, ports={:?}, retention_days={}",
        config.data_dir.display(),
        config.socket_path.display(),
        config.ports.iter().map(|p| p.port).collect::<Vec<_>>(),
        config.retention_days
    );

    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    if let Some(dir) = config.socket_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating socket directory {}", dir.display()))?;
    }

    let store = Arc::new(SqliteStore::open(&config.data_dir).context("opening database")?);
    debug!("store ready at {}", store.path().display());

    let loader = Arc::new(Loader::load().context("loading and attaching eBPF programs")?);
    for entry in &config.ports {
        if let Err(e) = loader.add_port(entry.port) {
            warn!("failed to add port {}: {e}", entry.port);
        }
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let signal_handle = tokio::spawn(shutdown_handler(shutdown_tx.clone()));

    let collector = Arc::new(Collector::new(loader.clone(), COLLECT_INTERVAL));
    let snapshot = collector.snapshot();
    let aggregator = Aggregator::new(
        snapshot.clone(),
        store.clone() as Arc<dyn StatsStore>,
        PERSIST_INTERVAL,
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        collector.clone().run(shutdown_tx.subscribe()),
    ));
    tasks.push(tokio::spawn(
        aggregator.clone().run(shutdown_tx.subscribe()),
    ));
    tasks.push(tokio::spawn(retention_loop(
        store.clone() as Arc<dyn StatsStore>,
        config.retention_days,
        shutdown_tx.subscribe(),
    )));

    let state = Arc::new(RwLock::new(DaemonState {
        ports: config.ports.clone(),
    }));
    let server = Arc::new(IpcServer::new(
        config.socket_path.clone(),
        loader.clone(),
        snapshot,
        store.clone() as Arc<dyn StatsStore>,
        aggregator,
        state,
        DaemonInfo {
            data_dir: config.data_dir.display().to_string(),
            retention_days: config.retention_days,
            socket_path: config.socket_path.display().to_string(),
            started_at: Local::now(),
        },
    ));
    let server_shutdown = shutdown_tx.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.serve(server_shutdown).await {
            error!("IPC server error: {e}");
        }
    }));

    info!("daemon started");

    for task in tasks {
        if let Err(e) = task.await {
            error!("task error: {e}");
        }
    }
    let _ = signal_handle.await;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_handler(shutdown_tx: broadcast::Sender<()>) {
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => debug!("received SIGINT"),
        _ = sigterm.recv() => debug!("received SIGTERM"),
    }
    let _ = shutdown_tx.send(());
}

/// Delete expired rows once at startup and then every 24 hours.
async fn retention_loop(
    store: Arc<dyn StatsStore>,
    retention_days: u32,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = store.delete_old_data(retention_days) {
        error!("retention cleanup failed: {e}");
    }

    let mut ticker = time::interval_at(
        time::Instant::now() + RETENTION_INTERVAL,
        RETENTION_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                if let Err(e) = store.delete_old_data(retention_days) {
                    error!("retention cleanup failed: {e}");
                }
            }
        }
    }
}
