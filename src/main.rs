mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use debtwatch::AnyError;
use debtwatch::config::Config;
use debtwatch::observability;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = Config::load()?;
    observability::init_tracing(&config.telemetry);

    match cli.command {
        Commands::Worker(args) => commands::worker(config, args).await?,
        Commands::Publish(args) => commands::publish(config, args).await?,
        Commands::Pending => commands::pending(config)?,
    }

    Ok(())
}
