//! Twilio Network Traversal Service provider.
//!
//! `POST /2010-04-01/Accounts/{AccountSid}/Tokens.json` with an API key pair
//! returns short-lived TURN credentials in `ice_servers`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{IceServer, IceServerProvider};
use crate::error::IceError;

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const PROVIDER: &str = "twilio";

pub const ACCOUNT_SID_VAR: &str = "TWILIO_ACCOUNT_SID";
pub const API_KEY_SID_VAR: &str = "TWILIO_API_KEY_SID";
pub const API_KEY_SECRET_VAR: &str = "TWILIO_API_KEY_SECRET";

/// Twilio credentials.
pub struct TwilioConfig {
    pub account_sid: String,
    pub api_key_sid: String,
    pub api_key_secret: SecretString,
    pub base_url: String,
}

impl TwilioConfig {
    /// Build from a variable lookup. Reports every missing variable at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IceError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let account_sid = get(ACCOUNT_SID_VAR);
        let api_key_sid = get(API_KEY_SID_VAR);
        let api_key_secret = get(API_KEY_SECRET_VAR);

        match (account_sid, api_key_sid, api_key_secret) {
            (Some(account_sid), Some(api_key_sid), Some(secret)) => Ok(Self {
                account_sid,
                api_key_sid,
                api_key_secret: SecretString::from(secret),
                base_url: DEFAULT_BASE_URL.to_string(),
            }),
            (account_sid, api_key_sid, secret) => {
                let missing = [
                    (ACCOUNT_SID_VAR, account_sid.is_none()),
                    (API_KEY_SID_VAR, api_key_sid.is_none()),
                    (API_KEY_SECRET_VAR, secret.is_none()),
                ]
                .into_iter()
                .filter_map(|(var, absent)| absent.then_some(var))
                .collect();
                Err(IceError::InvalidEnvironment { missing })
            }
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn tokens_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Tokens.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("api_key_sid", &self.api_key_sid)
            .field("api_key_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    ice_servers: Vec<IceServer>,
}

/// Fetches ICE servers from Twilio.
pub struct TwilioProvider {
    client: Client,
    config: TwilioConfig,
}

impl TwilioProvider {
    pub fn new(config: TwilioConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl IceServerProvider for TwilioProvider {
    fn name(&self) -> &str {
        "Twilio"
    }

    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>, IceError> {
        let url = self.config.tokens_url();
        tracing::debug!("Requesting ICE servers from {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.api_key_sid,
                Some(self.config.api_key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| IceError::Upstream {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(IceError::Upstream {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        parse_token_response(&body)
    }
}

fn parse_token_response(body: &str) -> Result<Vec<IceServer>, IceError> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| IceError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("JSON parse error: {}", e),
        })?;
    Ok(parsed.ice_servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_from_complete_env() {
        let config = TwilioConfig::from_lookup(lookup(&[
            (ACCOUNT_SID_VAR, "AC123"),
            (API_KEY_SID_VAR, "SK456"),
            (API_KEY_SECRET_VAR, "shh"),
        ]))
        .unwrap();

        assert_eq!(
            config.tokens_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Tokens.json"
        );
        assert_eq!(config.api_key_secret.expose_secret(), "shh");
        assert!(!format!("{:?}", config).contains("shh"));
    }

    #[test]
    fn test_config_lists_all_missing_vars() {
        let err = TwilioConfig::from_lookup(lookup(&[(API_KEY_SID_VAR, "SK456"), (API_KEY_SECRET_VAR, " ")]))
            .unwrap_err();
        match err {
            IceError::InvalidEnvironment { missing } => {
                assert_eq!(missing, vec![ACCOUNT_SID_VAR, API_KEY_SECRET_VAR]);
            }
            other => panic!("expected InvalidEnvironment, got {:?}", other),
        }
    }

    #[test]
    fn test_base_url_override() {
        let config = TwilioConfig::from_lookup(lookup(&[
            (ACCOUNT_SID_VAR, "AC1"),
            (API_KEY_SID_VAR, "SK1"),
            (API_KEY_SECRET_VAR, "s"),
        ]))
        .unwrap()
        .with_base_url("http://127.0.0.1:9000/");
        assert_eq!(
            config.tokens_url(),
            "http://127.0.0.1:9000/2010-04-01/Accounts/AC1/Tokens.json"
        );
    }

    #[test]
    fn test_parse_token_response() {
        let body = r#"{
            "account_sid": "AC123",
            "ttl": "86400",
            "username": "abc",
            "password": "def",
            "ice_servers": [
                {"url": "stun:global.stun.twilio.com:3478", "urls": "stun:global.stun.twilio.com:3478"},
                {"url": "turn:global.turn.twilio.com:3478?transport=udp", "urls": "turn:global.turn.twilio.com:3478?transport=udp", "username": "abc", "credential": "def"}
            ]
        }"#;
        let servers = parse_token_response(body).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].credential.as_deref(), Some("def"));
    }

    #[test]
    fn test_parse_token_response_without_servers() {
        let err = parse_token_response(r#"{"code": 20003, "message": "Authenticate"}"#).unwrap_err();
        assert!(matches!(err, IceError::InvalidResponse { .. }));
    }
}
