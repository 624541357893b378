use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use shopsync::app::SyncApp;
use shopsync::store::SyncRetryItem;
use shopsync::sync::SyncType;

#[derive(Args)]
pub struct RetriesCommands {
    #[command(subcommand)]
    pub command: RetriesSubcommands,
}

#[derive(Subcommand)]
pub enum RetriesSubcommands {
    /// Items still waiting for another attempt
    List {
        /// Only this sync type (e.g. stock_push)
        #[arg(long = "type")]
        sync_type: Option<SyncType>,
    },
    /// Items that ran out of attempts and need manual reconciliation
    Failed,
    /// Process due items once now
    Process,
    /// Delete resolved items older than the given age
    Purge {
        #[arg(long, default_value_t = 7)]
        older_than_days: i64,
    },
}

pub async fn handle_retries_command(app: &SyncApp, cmd: RetriesCommands) -> Result<()> {
    match cmd.command {
        RetriesSubcommands::List { sync_type } => {
            let items = app.queue.get_pending_retries(sync_type).await?;
            print_items("pending", &items);
        }
        RetriesSubcommands::Failed => {
            let items = app.queue.get_failed_items().await?;
            print_items("permanently failed", &items);
        }
        RetriesSubcommands::Process => {
            let summary = app.queue.process_due(&app.items, chrono::Utc::now()).await?;
            println!(
                "{} {} selected, {} resolved, {} failed ({} exhausted), {} deferred, {} conflicts",
                "✓".bright_green().bold(),
                summary.selected,
                summary.resolved.to_string().green(),
                summary.failed.to_string().red(),
                summary.exhausted,
                summary.deferred,
                summary.conflicts
            );
        }
        RetriesSubcommands::Purge { older_than_days } => {
            let removed = app
                .queue
                .purge_resolved(chrono::Duration::days(older_than_days))
                .await?;
            println!("{} Removed {} resolved items", "✓".bright_green().bold(), removed);
        }
    }
    Ok(())
}

fn print_items(label: &str, items: &[SyncRetryItem]) {
    if items.is_empty() {
        println!("  {}", format!("No {} items", label).dimmed());
        return;
    }

    println!("{} {} items:", items.len().to_string().bold(), label);
    for item in items {
        println!(
            "  #{} {} {} {} attempts {}/{} next {} [{}]",
            item.id,
            item.sync_type.as_str().cyan(),
            item.item_type.dimmed(),
            item.item_id.bright_yellow(),
            item.retry_count,
            item.max_retries,
            item.next_retry_at.to_rfc3339(),
            item.correlation_id.as_str().dimmed()
        );
        println!("      {} {}", item.error_category.to_string().red(), item.last_error);
    }
}
