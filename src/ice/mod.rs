//! ICE server provisioning.
//!
//! WebRTC clients read their STUN/TURN list from the `connectionConfig` field
//! of the shared `appInfo/appInfo` document. The refresh job keeps it current
//! by asking an upstream provider for short-lived credentials.

mod scheduler;
mod twilio;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IceError, StoreError};
use crate::store::{DocumentRef, DocumentStore, Fields};

pub use scheduler::{DEFAULT_REFRESH_SCHEDULE, RefreshSchedule, spawn_refresh_task};
pub use twilio::{TwilioConfig, TwilioProvider};

/// Collection and id of the document holding shared app configuration.
pub const APP_INFO_COLLECTION: &str = "appInfo";
pub const APP_INFO_ID: &str = "appInfo";

/// Field of the app info document the refresh job writes.
pub const CONNECTION_CONFIG_FIELD: &str = "connectionConfig";

/// `urls` may be a single URL or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// One STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Value stored under `connectionConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub date: String,
    /// The server list as a JSON string; clients parse it themselves.
    pub ice_servers: String,
    pub provider: String,
}

impl ConnectionConfig {
    pub fn new(
        provider: &str,
        servers: &[IceServer],
        now: DateTime<Utc>,
    ) -> Result<Self, IceError> {
        let date = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let ice_servers =
            serde_json::to_string(servers).map_err(|e| IceError::from(StoreError::from(e)))?;
        Ok(Self {
            provider: format!("{} ({})", provider, date),
            date,
            ice_servers,
        })
    }

    /// Decode the embedded server list.
    pub fn servers(&self) -> Result<Vec<IceServer>, serde_json::Error> {
        serde_json::from_str(&self.ice_servers)
    }
}

/// `appInfo/appInfo`, read by every client at startup.
pub fn app_info_document() -> DocumentRef {
    DocumentRef::new(APP_INFO_COLLECTION, APP_INFO_ID)
}

/// Source of ICE server credentials.
#[async_trait]
pub trait IceServerProvider: Send + Sync {
    /// Label recorded in [`ConnectionConfig::provider`].
    fn name(&self) -> &str;

    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>, IceError>;
}

/// Placeholder used when no provider credentials are configured. Every fetch
/// fails with `invalidEnvironment`.
pub struct UnconfiguredProvider {
    missing: Vec<&'static str>,
}

impl UnconfiguredProvider {
    pub fn new(missing: Vec<&'static str>) -> Self {
        Self { missing }
    }
}

#[async_trait]
impl IceServerProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>, IceError> {
        Err(IceError::InvalidEnvironment {
            missing: self.missing.clone(),
        })
    }
}

/// Fetches fresh credentials and publishes them to the app info document.
pub struct IceRefresher {
    provider: Arc<dyn IceServerProvider>,
    store: Arc<dyn DocumentStore>,
    target: DocumentRef,
}

impl IceRefresher {
    pub fn new(provider: Arc<dyn IceServerProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            provider,
            store,
            target: app_info_document(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Fetch and build a config without writing it.
    pub async fn fetch_config(&self) -> Result<ConnectionConfig, IceError> {
        let servers = self.provider.fetch_ice_servers().await?;
        ConnectionConfig::new(self.provider.name(), &servers, Utc::now())
    }

    /// Fetch a config and merge it into the app info document.
    pub async fn refresh(&self) -> Result<ConnectionConfig, IceError> {
        let config = self.fetch_config().await?;

        let value = serde_json::to_value(&config).map_err(StoreError::from)?;
        let mut fields = Fields::new();
        fields.insert(CONNECTION_CONFIG_FIELD.to_string(), value);
        self.store.update(&self.target, fields).await?;

        tracing::info!(
            target_doc = %self.target,
            provider = %config.provider,
            "Updated connection config"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct StaticProvider(Vec<IceServer>);

    #[async_trait]
    impl IceServerProvider for StaticProvider {
        fn name(&self) -> &str {
            "Static"
        }

        async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>, IceError> {
            Ok(self.0.clone())
        }
    }

    fn stun() -> IceServer {
        IceServer {
            url: Some("stun:global.stun.twilio.com:3478".to_string()),
            urls: IceUrls::One("stun:global.stun.twilio.com:3478".to_string()),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn test_connection_config_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let config = ConnectionConfig::new("Twilio", &[stun()], now).unwrap();

        assert_eq!(config.date, "2024-03-01T06:00:00.000Z");
        assert_eq!(config.provider, "Twilio (2024-03-01T06:00:00.000Z)");
        assert_eq!(config.servers().unwrap(), vec![stun()]);
        assert_eq!(
            serde_json::to_value(&config).unwrap()["iceServers"],
            json!(r#"[{"url":"stun:global.stun.twilio.com:3478","urls":"stun:global.stun.twilio.com:3478"}]"#)
        );
    }

    #[test]
    fn test_ice_server_accepts_url_lists() {
        let server: IceServer = serde_json::from_value(json!({
            "urls": ["turn:a:3478?transport=udp", "turn:a:443?transport=tcp"],
            "username": "u",
            "credential": "c",
        }))
        .unwrap();
        assert!(matches!(server.urls, IceUrls::Many(ref urls) if urls.len() == 2));
        assert_eq!(server.url, None);
    }

    #[tokio::test]
    async fn test_refresh_writes_app_info() {
        let store = InMemoryStore::new();
        let reference = app_info_document();
        assert_eq!(reference.to_string(), "appInfo/appInfo");
        let mut existing = Fields::new();
        existing.insert("latestVersion".to_string(), json!("1.4.0"));
        store.update(&reference, existing).await.unwrap();

        let refresher = IceRefresher::new(
            Arc::new(StaticProvider(vec![stun()])),
            Arc::new(store.clone()),
        );
        let config = refresher.refresh().await.unwrap();

        let doc = store.get(&reference).await.unwrap().unwrap();
        assert_eq!(doc.fields["latestVersion"], "1.4.0");
        let stored: ConnectionConfig =
            serde_json::from_value(doc.fields[CONNECTION_CONFIG_FIELD].clone()).unwrap();
        assert_eq!(stored, config);
        assert!(stored.provider.starts_with("Static ("));
    }

    #[tokio::test]
    async fn test_fetch_config_does_not_write() {
        let store = InMemoryStore::new();
        let refresher = IceRefresher::new(
            Arc::new(StaticProvider(vec![stun()])),
            Arc::new(store.clone()),
        );
        refresher.fetch_config().await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_reports_missing_env() {
        let store = InMemoryStore::new();
        let refresher = IceRefresher::new(
            Arc::new(UnconfiguredProvider::new(vec!["TWILIO_API_KEY_SECRET"])),
            Arc::new(store.clone()),
        );
        let err = refresher.refresh().await.unwrap_err();
        assert!(matches!(err, IceError::InvalidEnvironment { ref missing } if missing == &["TWILIO_API_KEY_SECRET"]));
        assert_eq!(store.write_count(), 0);
    }
}
