use super::print_result;
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use colored::*;
use shopsync::app::SyncApp;

#[derive(Args)]
pub struct DeltaCommands {
    /// What to synchronize
    #[arg(value_enum)]
    pub kind: DeltaKind,

    /// Override the stored watermark (RFC 3339)
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DeltaKind {
    /// Remote products changed on the platform
    Products,
    /// Remote orders changed on the platform
    Orders,
    /// Local products edited since the last push
    LocalProducts,
}

pub async fn handle_delta_command(app: &SyncApp, cmd: DeltaCommands) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let delta = match cmd.kind {
        DeltaKind::Products => orchestrator.sync_products_delta(cmd.since).await?,
        DeltaKind::Orders => orchestrator.sync_orders_delta(cmd.since).await?,
        DeltaKind::LocalProducts => orchestrator.sync_local_products_delta(cmd.since).await?,
    };

    let since = delta
        .since
        .map(|since| since.to_rfc3339())
        .unwrap_or_else(|| "the beginning".to_string());
    println!("{} {}", "Changes since".dimmed(), since.cyan());
    println!(
        "  {} new, {} modified, {} skipped",
        delta.new_count.to_string().bright_green(),
        delta.modified_count.to_string().bright_blue(),
        delta.skipped_count.to_string().dimmed()
    );
    print_result(delta.sync_type.as_str(), &delta.result);
    println!("{} {}", "Watermark now".dimmed(), delta.watermark.to_rfc3339().cyan());
    Ok(())
}
