use super::commands::delta::DeltaCommands;
use super::commands::order::OrderCommands;
use super::commands::retries::RetriesCommands;
use super::commands::run::RunCommands;
use super::commands::sync::SyncCommands;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shopsync")]
#[command(about = "Keep a local inventory and order store in sync with an e-commerce platform")]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/shopsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync flow now
    Sync(SyncCommands),
    /// Process only what changed since the last watermark
    Delta(DeltaCommands),
    /// Inspect and process the retry queue
    Retries(RetriesCommands),
    /// Order status management
    Order(OrderCommands),
    /// Run auto-sync and the retry worker until interrupted
    Run(RunCommands),
    /// Show sync health and stored watermarks
    Health,
}
