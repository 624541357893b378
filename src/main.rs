use anyhow::Result;
use clap::Parser;
use log::info;
use shopsync::app::SyncApp;
use shopsync::config::Config;
use std::io::Write;
use std::path::Path;

mod cli;

use cli::Cli;
use cli::Commands;
use cli::commands::delta::handle_delta_command;
use cli::commands::health::handle_health_command;
use cli::commands::order::handle_order_command;
use cli::commands::retries::handle_retries_command;
use cli::commands::run::handle_run_command;
use cli::commands::sync::handle_sync_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config = Config::load(cli.config.as_deref())?;
    info!("Starting shopsync");
    let app = SyncApp::open(config).await?;

    let outcome = match cli.command {
        Commands::Sync(cmd) => handle_sync_command(&app, cmd).await,
        Commands::Delta(cmd) => handle_delta_command(&app, cmd).await,
        Commands::Retries(cmd) => handle_retries_command(&app, cmd).await,
        Commands::Order(cmd) => handle_order_command(&app, cmd).await,
        Commands::Run(cmd) => handle_run_command(&app, cmd).await,
        Commands::Health => handle_health_command(&app).await,
    };

    app.pool.close().await;
    outcome
}

/// `RUST_LOG` filtered logger tagging every line with the active correlation id
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {} cid={} {}",
            buf.timestamp_millis(),
            record.level(),
            record.target(),
            shopsync::correlation::log_label(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}
