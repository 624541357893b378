pub mod delta;
pub mod health;
pub mod order;
pub mod retries;
pub mod run;
pub mod sync;

use colored::*;
use shopsync::sync::SyncResult;

/// Print the counts and per-item errors of a finished pass
pub fn print_result(label: &str, result: &SyncResult) {
    let marker = if result.is_clean() {
        "✓".bright_green().bold()
    } else {
        "⚠".bright_yellow().bold()
    };
    println!(
        "{} {}: {} processed, {} succeeded, {} failed ({} ms)",
        marker,
        label.bold(),
        result.total_processed,
        result.success_count.to_string().green(),
        result.error_count.to_string().red(),
        result.duration_ms().unwrap_or_default()
    );
    for error in &result.errors {
        println!(
            "  {} {} [{}] {}",
            "✗".bright_red(),
            error.item_id.bright_yellow(),
            error.category.to_string().dimmed(),
            error.message.red()
        );
    }
}
