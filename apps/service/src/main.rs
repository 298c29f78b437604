use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use vigil_service::config::Config;
use vigil_service::database::open_repository;
use vigil_service::orchestrator::Engine;

#[derive(Parser)]
#[command(name = "vigil-service")]
#[command(about = "Vigil - monitoring and alerting engine")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref())?;
    if cli.print_config {
        println!("{}", config);
        return Ok(());
    }

    let repository = open_repository(&config.database).await?;
    let engine = Engine::with_defaults(repository, config.engine_config())?;
    engine.apply_seeds(&config.seeds).await?;
    engine.start().await?;

    info!("Vigil engine running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    let grace = Duration::from_secs(config.engine.shutdown_grace_seconds + 5);
    engine.shutdown(grace).await;
    Ok(())
}
