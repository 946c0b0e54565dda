//! portwatch is the CLI client for the portwatchd daemon.

use clap::Parser;

use crate::args::Cli;

mod args;
mod client;
mod format;
mod ports;
mod stats;
mod status;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Cli::parse().execute().await
}
