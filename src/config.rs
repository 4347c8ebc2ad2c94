//! Runtime configuration.
//!
//! Everything comes from environment variables (a `.env` file is loaded by the
//! binary through `dotenvy`). Only the ICE provider credentials are optional:
//! without them the server still pairs devices, but the refresh job is off.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ConfigError, IceError};
use crate::ice::{DEFAULT_REFRESH_SCHEDULE, RefreshSchedule, TwilioConfig};
use crate::pairing::{DEFAULT_PAIRING_TIMEOUT_SECS, PairingConfig};

pub const BIND_ADDR_VAR: &str = "AIRDASH_BIND_ADDR";
pub const PAIRING_TIMEOUT_VAR: &str = "AIRDASH_PAIRING_TIMEOUT_SECS";
pub const PAIRING_CLEANUP_VAR: &str = "AIRDASH_PAIRING_CLEANUP";
pub const ICE_SCHEDULE_VAR: &str = "AIRDASH_ICE_SCHEDULE";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// ICE refresh settings.
#[derive(Debug)]
pub struct IceConfig {
    pub schedule: RefreshSchedule,
    /// Provider credentials, or the variables that were missing.
    pub twilio: Result<TwilioConfig, Vec<&'static str>>,
}

/// Top-level configuration.
#[derive(Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub pairing: PairingConfig,
    pub ice: IceConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get(BIND_ADDR_VAR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .trim()
            .parse()
            .map_err(|e| invalid(BIND_ADDR_VAR, format!("{}: {}", bind_raw, e)))?;

        let timeout_secs = match get(PAIRING_TIMEOUT_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => return Err(invalid(PAIRING_TIMEOUT_VAR, "must be at least 1")),
                Ok(secs) => secs,
                Err(e) => return Err(invalid(PAIRING_TIMEOUT_VAR, format!("{}: {}", raw, e))),
            },
            None => DEFAULT_PAIRING_TIMEOUT_SECS,
        };

        let cleanup_on_exit = match get(PAIRING_CLEANUP_VAR) {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                invalid(PAIRING_CLEANUP_VAR, format!("expected true or false, got {}", raw))
            })?,
            None => true,
        };

        let schedule_raw =
            get(ICE_SCHEDULE_VAR).unwrap_or_else(|| DEFAULT_REFRESH_SCHEDULE.to_string());
        let schedule = RefreshSchedule::parse(schedule_raw.trim())?;

        let twilio = TwilioConfig::from_lookup(&lookup).map_err(|e| match e {
            IceError::InvalidEnvironment { missing } => missing,
            _ => Vec::new(),
        });

        Ok(Self {
            bind_addr,
            pairing: PairingConfig {
                timeout: Duration::from_secs(timeout_secs),
                cleanup_on_exit,
                ..PairingConfig::default()
            },
            ice: IceConfig { schedule, twilio },
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key: &str| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.pairing.timeout, Duration::from_secs(60));
        assert!(config.pairing.cleanup_on_exit);
        assert_eq!(config.pairing.collection, "connections");
        assert_eq!(config.ice.schedule.expression(), DEFAULT_REFRESH_SCHEDULE);
        assert_eq!(config.ice.twilio.unwrap_err().len(), 3);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            (BIND_ADDR_VAR, "127.0.0.1:9090"),
            (PAIRING_TIMEOUT_VAR, "15"),
            (PAIRING_CLEANUP_VAR, "off"),
            (ICE_SCHEDULE_VAR, "0 30 * * * *"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_API_KEY_SID", "SK1"),
            ("TWILIO_API_KEY_SECRET", "secret"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9090);
        assert_eq!(config.pairing.timeout, Duration::from_secs(15));
        assert!(!config.pairing.cleanup_on_exit);
        assert_eq!(config.ice.schedule.expression(), "0 30 * * * *");
        assert_eq!(config.ice.twilio.unwrap().account_sid, "AC1");
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            (BIND_ADDR_VAR, "not-an-addr"),
            (PAIRING_TIMEOUT_VAR, "0"),
            (PAIRING_TIMEOUT_VAR, "soon"),
            (PAIRING_CLEANUP_VAR, "maybe"),
        ] {
            match config(&[(key, value)]) {
                Err(ConfigError::InvalidValue { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("expected InvalidValue for {key}, got {other:?}"),
            }
        }
    }
}
