use super::print_result;
use anyhow::Result;
use clap::Args;
use log::info;
use shopsync::app::SyncApp;
use shopsync::sync::SyncFlow;

#[derive(Args)]
pub struct SyncCommands {
    /// Flow to run: products-push, products-pull, stock-push, orders-pull,
    /// order-status-push, full, products-delta, orders-delta, local-products-delta
    #[arg(default_value = "full")]
    pub flow: SyncFlow,
}

pub async fn handle_sync_command(app: &SyncApp, cmd: SyncCommands) -> Result<()> {
    info!("Running sync flow {}", cmd.flow);
    let result = app.orchestrator.run(cmd.flow).await?;
    print_result(cmd.flow.as_str(), &result);
    Ok(())
}
