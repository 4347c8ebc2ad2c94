//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the HTTP service and refresh job (`serve`, the default)
//! - Fetching ICE servers once and printing them (`refresh-ice`)

mod refresh_ice;
mod serve;

pub use refresh_ice::run_refresh_ice;
pub use serve::run_serve;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use crate::ice::{IceServerProvider, TwilioConfig, TwilioProvider, UnconfiguredProvider};

#[derive(Parser, Debug)]
#[command(name = "airdash")]
#[command(about = "AirDash backend: device pairing rendezvous and ICE server provisioning")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address to bind the HTTP server to (overrides AIRDASH_BIND_ADDR)
    #[arg(long, global = true)]
    pub bind: Option<SocketAddr>,

    /// Log output format
    #[arg(long, global = true, value_enum, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP service and the ICE refresh job (default if no subcommand given)
    Serve,

    /// Fetch ICE servers from the provider once and print the resulting config
    RefreshIce,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Pick the ICE provider: Twilio when its credentials are complete, otherwise
/// a provider that reports which variables are missing.
pub(crate) fn ice_provider(
    twilio: Result<TwilioConfig, Vec<&'static str>>,
) -> Arc<dyn IceServerProvider> {
    match twilio {
        Ok(config) => Arc::new(TwilioProvider::new(config)),
        Err(missing) => Arc::new(UnconfiguredProvider::new(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["airdash"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.bind, None);
    }

    #[test]
    fn test_parse_refresh_ice_with_flags() {
        let cli = Cli::try_parse_from([
            "airdash",
            "refresh-ice",
            "--bind",
            "127.0.0.1:3000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Command::RefreshIce));
        assert_eq!(cli.bind, Some("127.0.0.1:3000".parse().unwrap()));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unconfigured_provider_selected() {
        let provider = ice_provider(Err(vec!["TWILIO_ACCOUNT_SID"]));
        assert_eq!(provider.name(), "unconfigured");
    }
}
