use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use shopsync::app::SyncApp;
use shopsync::domain::OrderStatus;

#[derive(Args)]
pub struct OrderCommands {
    #[command(subcommand)]
    pub command: OrderSubcommands,
}

#[derive(Subcommand)]
pub enum OrderSubcommands {
    /// Move an order to a new status
    Transition {
        /// Local order id
        id: i64,
        /// Pending, Confirmed, Shipped, Delivered or Cancelled
        status: OrderStatus,
        /// Why the status changes
        #[arg(long)]
        reason: Option<String>,
        /// Who requests the change
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Apply transitions that need confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

pub async fn handle_order_command(app: &SyncApp, cmd: OrderCommands) -> Result<()> {
    match cmd.command {
        OrderSubcommands::Transition {
            id,
            status,
            reason,
            actor,
            yes,
        } => {
            let mut order = app
                .repository
                .get_order(id)
                .await?
                .with_context(|| format!("Order {} not found", id))?;

            let validation = app.orders.validate_transition(order.status, status, &order).await?;
            if let Some(error) = &validation.error {
                anyhow::bail!("{}", error);
            }
            if validation.requires_confirmation && !yes {
                for warning in &validation.warnings {
                    println!("  {} {}", "⚠".bright_yellow(), warning.yellow());
                }
                anyhow::bail!("Transition needs confirmation, rerun with --yes");
            }

            let outcome = app
                .orders
                .transition_to(&mut order, status, reason.as_deref(), &actor)
                .await?;
            println!(
                "{} Order {} {} → {}",
                "✓".bright_green().bold(),
                order.order_number.bright_green().bold(),
                outcome.event.previous,
                outcome.event.current
            );
            for warning in &outcome.warnings {
                println!("  {} {}", "⚠".bright_yellow(), warning.yellow());
            }
        }
    }
    Ok(())
}
