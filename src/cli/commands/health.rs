use anyhow::Result;
use colored::*;
use shopsync::app::SyncApp;
use shopsync::sync::{HealthStatus, SyncType};

pub async fn handle_health_command(app: &SyncApp) -> Result<()> {
    print_health(app);

    println!("{}", "Watermarks:".bold());
    for sync_type in SyncType::ALL {
        let state = app.store.get_sync_state(sync_type).await?;
        let label = state
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("  {:<18} {}", sync_type.as_str(), label.cyan());
    }

    let failed = app.queue.get_failed_items().await?.len();
    let pending = app.queue.get_pending_retries(None).await?.len();
    println!("{} pending retries, {} permanently failed", pending, failed);
    Ok(())
}

/// Print the orchestrator's in-memory health snapshot
pub fn print_health(app: &SyncApp) {
    let snapshot = app.orchestrator.health().snapshot();
    let status = match snapshot.status {
        HealthStatus::Healthy => "healthy".bright_green().bold(),
        HealthStatus::Degraded => "degraded".bright_yellow().bold(),
        HealthStatus::Unhealthy => "unhealthy".bright_red().bold(),
    };
    println!("Sync is {} (circuit {:?})", status, snapshot.circuit_state);
    if let Some(at) = snapshot.last_success {
        println!("  last success {}", at.to_rfc3339().dimmed());
    }
    if let Some(at) = snapshot.last_failure {
        println!(
            "  last failure {} ({} consecutive)",
            at.to_rfc3339().dimmed(),
            snapshot.consecutive_failures
        );
    }
}
