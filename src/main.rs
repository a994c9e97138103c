mod backup;
mod commands;
mod config;
mod error;
mod live_tail;
mod log_fetcher;
mod log_line;
mod session;
mod sse;
mod types;
mod view;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    info!("Starting maketicket-logconsole");

    // Parse command-line arguments
    let cli = config::Cli::parse();

    // Load configuration
    let config = config::load_config(&cli)?;
    info!("Configuration loaded successfully");

    commands::execute_command(cli.command, &config).await
}
