use super::health::print_health;
use anyhow::Result;
use clap::Args;
use colored::*;
use log::{info, warn};
use shopsync::app::SyncApp;
use std::time::Duration;

#[derive(Args)]
pub struct RunCommands {
    /// Seconds between full syncs (overrides the config; minimum 10)
    #[arg(long)]
    pub interval: Option<u64>,
}

pub async fn handle_run_command(app: &SyncApp, cmd: RunCommands) -> Result<()> {
    let interval = cmd
        .interval
        .map(Duration::from_secs)
        .or_else(|| app.config.auto_sync_interval());

    let worker = app.spawn_retry_worker();
    match interval {
        Some(interval) => {
            let effective = app.orchestrator.start_auto_sync(interval);
            println!("{} Auto-sync every {:?}", "▶".bright_green(), effective);
        }
        None => println!("{}", "Auto-sync disabled, running the retry worker only".dimmed()),
    }
    println!("{}", "Press Ctrl-C to stop".dimmed());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    app.shutdown.cancel();
    app.orchestrator.stop_auto_sync().await;
    if let Err(e) = worker.await {
        warn!("Retry worker ended abnormally: {}", e);
    }

    print_health(app);
    Ok(())
}
