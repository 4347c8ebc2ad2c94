//! One-shot ICE fetch.

use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::ice::IceRefresher;
use crate::store::InMemoryStore;

/// Fetch ICE servers once and print the connection config as JSON. Nothing is
/// persisted.
pub async fn run_refresh_ice(config: Config) -> anyhow::Result<()> {
    let refresher = IceRefresher::new(
        super::ice_provider(config.ice.twilio),
        Arc::new(InMemoryStore::new()),
    );

    let connection_config = refresher
        .fetch_config()
        .await
        .with_context(|| format!("ICE fetch from {} failed", refresher.provider_name()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&connection_config).context("Failed to encode config")?
    );
    Ok(())
}
