//! AirDash backend
//!
//! Pairing rendezvous for AirDash devices plus the scheduled ICE server
//! refresh.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use airdash::cli::{Cli, Command, LogFormat, run_refresh_ice, run_serve};
use airdash::config::Config;

const DEFAULT_LOG_FILTER: &str = "airdash=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap so `env` attributes see it.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(addr = %config.bind_addr, "Starting AirDash backend");
            run_serve(config).await
        }
        Command::RefreshIce => run_refresh_ice(config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.with_target(true).init(),
        LogFormat::Json => builder.json().init(),
    }
}
