use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::IpcClient;
use crate::stats::StatsArgs;
use crate::{ports, stats, status};

#[derive(Parser, Debug)]
#[command(name = "portwatch")]
#[command(long_about = "portwatch is a client for querying traffic statistics from the portwatchd daemon.")]
pub(crate) struct Cli {
    /// Optional: unix socket path of the daemon.
    #[clap(long, global = true, verbatim_doc_comment)]
    pub(crate) socket: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Show traffic statistics for a port.
    /// Without a date range this returns the realtime snapshot.
    Stats(StatsArgs),

    /// Show daemon status.
    Status {
        /// Output in JSON format.
        #[clap(long)]
        json: bool,
    },

    /// List monitored ports.
    ListPorts {
        /// Output in JSON format.
        #[clap(long)]
        json: bool,
    },

    /// Add a port to monitoring.
    AddPort { port: u16 },

    /// Remove a port from monitoring.
    RemovePort { port: u16 },

    /// Persist pending statistics to the database immediately.
    Flush,
}

impl Cli {
    pub(crate) async fn execute(&self) -> anyhow::Result<()> {
        let mut client = IpcClient::connect(self.socket.clone()).await?;
        match &self.command {
            Commands::Stats(args) => stats::execute(&mut client, args).await,
            Commands::Status { json } => status::execute(&mut client, *json).await,
            Commands::ListPorts { json } => ports::execute_list(&mut client, *json).await,
            Commands::AddPort { port } => ports::execute_add(&mut client, *port).await,
            Commands::RemovePort { port } => ports::execute_remove(&mut client, *port).await,
            Commands::Flush => ports::execute_flush(&mut client).await,
        }
    }
}
