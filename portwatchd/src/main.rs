//! portwatchd is the eBPF port traffic monitor daemon.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn, LevelFilter};

use portwatch_api::config::{expand_tilde, Config};
use portwatch_api::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_DATA_DIR, DEFAULT_RETENTION_DAYS, DEFAULT_SOCKET_PATH,
};
use portwatch_api::protocol::PortInfo;

mod aggregator;
mod collector;
mod daemon;
mod errors;
mod loader;
mod server;
mod storage;

#[derive(Parser, Debug)]
#[command(name = "portwatchd")]
#[command(
    long_about = "portwatchd is a daemon that uses eBPF kprobes to monitor TCP traffic
on specified ports. It collects statistics, persists them to SQLite,
and exposes an IPC interface for clients."
)]
struct Args {
    /// Optional: config file path.
    #[clap(short, long, verbatim_doc_comment)]
    config: Option<PathBuf>,
    /// Port to monitor; may be given multiple times.
    #[clap(short, long = "port", verbatim_doc_comment)]
    port: Vec<u16>,
    /// Optional: data directory.
    #[clap(long, verbatim_doc_comment)]
    data_dir: Option<String>,
    /// Optional: data retention in days (1-365).
    #[clap(long, verbatim_doc_comment)]
    retention_days: Option<u32>,
    /// Optional: unix socket path.
    #[clap(long, verbatim_doc_comment)]
    socket: Option<String>,
    /// Optional: log level (debug, info, warn, error).
    #[clap(long, verbatim_doc_comment)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config file first, flags override.
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config_path = expand_tilde(&config_path.to_string_lossy());

    let mut loaded_config_file = false;
    let file_config = match fs::read_to_string(&config_path) {
        Ok(contents) => {
            loaded_config_file = true;
            contents
                .parse::<Config>()
                .with_context(|| format!("loading config file {}", config_path.display()))?
        }
        Err(e) if args.config.is_some() => {
            // only an error when the user asked for this file explicitly
            return Err(e)
                .with_context(|| format!("loading config file {}", config_path.display()));
        }
        Err(_) => Config::default(),
    };

    let mut ports = file_config.resolve_ports()?;
    if !args.port.is_empty() {
        if args.port.iter().any(|p| *p == 0) {
            bail!("invalid port 0: must be between 1 and 65535");
        }
        ports = args
            .port
            .iter()
            .map(|p| PortInfo {
                port: *p,
                description: String::new(),
            })
            .collect();
    }

    let data_dir = args
        .data_dir
        .or(file_config.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let socket_path = args
        .socket
        .or(file_config.socket)
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());
    let retention_days = args
        .retention_days
        .or(file_config.retention_days)
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    let log_level = args
        .log_level
        .or(file_config.log_level)
        .unwrap_or_else(|| "info".to_string());

    let level = match log_level.as_str() {
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if loaded_config_file {
        info!("loaded config file {}", config_path.display());
    }

    if ports.is_empty() {
        bail!("at least one port must be specified (via --port or config file)");
    }
    if !(1..=365).contains(&retention_days) {
        bail!("retention_days must be between 1 and 365");
    }

    // eBPF loading needs CAP_BPF/CAP_SYS_ADMIN
    if unsafe { libc::geteuid() } != 0 {
        warn!("running without root privileges, eBPF loading may fail");
    }

    daemon::run(daemon::DaemonConfig {
        ports,
        data_dir: expand_tilde(&data_dir),
        socket_path: expand_tilde(&socket_path),
        retention_days,
    })
    .await
}
