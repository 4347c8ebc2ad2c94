//! The long-running service.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::ice::{IceRefresher, spawn_refresh_task};
use crate::pairing::PairingCoordinator;
use crate::server::PairingServer;
use crate::store::{DocumentStore, InMemoryStore};

/// Run the HTTP service and the ICE refresh job until ctrl-c.
pub async fn run_serve(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
    let shutdown = CancellationToken::new();

    info!(
        timeout_secs = config.pairing.timeout.as_secs(),
        cleanup_on_exit = config.pairing.cleanup_on_exit,
        "Pairing coordinator configured"
    );
    let coordinator =
        PairingCoordinator::new(store.clone(), config.pairing).with_shutdown(shutdown.clone());

    let ice_configured = config.ice.twilio.is_ok();
    if let Err(missing) = &config.ice.twilio {
        warn!(
            missing = %missing.join(", "),
            "ICE provider not configured, refresh job disabled"
        );
    }
    let refresher = Arc::new(IceRefresher::new(
        super::ice_provider(config.ice.twilio),
        store.clone(),
    ));
    let refresh_task = ice_configured.then(|| {
        spawn_refresh_task(refresher.clone(), config.ice.schedule, shutdown.child_token())
    });

    let state = Arc::new(AppState::new(coordinator, refresher));
    let server = PairingServer::bind(
        config.bind_addr,
        api::router(state),
        shutdown.child_token(),
    )
    .await
    .context("Failed to start HTTP server")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install ctrl-c signal handler")?;
    info!("Received ctrl-c, initiating graceful shutdown");

    shutdown.cancel();
    server.stop().await;
    if let Some(task) = refresh_task {
        let _ = task.await;
    }

    info!("AirDash backend stopped");
    Ok(())
}
