use anyhow::Result;
use clap::Parser;
use crabbridge::{config, logging, server};
use std::path::PathBuf;
use tracing::info;

/// WebSocket to IRC bridge.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file (default: <config dir>/crabbridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config
    let cfg = config::load_config(args.config.as_deref())?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(());
    }

    logging::init(&cfg.logging);
    match &cfg.server.allowed_origin {
        Some(origin) => info!("Allowing origin: {:?}", origin),
        None => info!("Allowing any origin"),
    }

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    server::run(&cfg, shutdown).await
}
