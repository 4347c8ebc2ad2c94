//! HTTP API: the pairing endpoint, the ICE playground and a health check.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{Error, PairingError};
use crate::ice::IceRefresher;
use crate::pairing::{PairingCoordinator, PairingRequestBody, PairingResult};

/// Shared state for the API handlers.
pub struct AppState {
    pub coordinator: PairingCoordinator,
    pub ice: Arc<IceRefresher>,
    /// How long `/playground` holds the request open.
    pub playground_delay: Duration,
}

impl AppState {
    pub fn new(coordinator: PairingCoordinator, ice: Arc<IceRefresher>) -> Self {
        Self {
            coordinator,
            ice,
            playground_delay: Duration::from_secs(1),
        }
    }
}

/// Create the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pairing", post(pairing))
        .route("/playground", get(playground).post(playground))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error returned from handlers, rendered as `{"error": kind}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.kind().as_str() }))).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn pairing(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<PairingResult>, ApiError> {
    let body: PairingRequestBody = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Rejected malformed pairing body");
        PairingError::InvalidParams { field: "body" }
    })?;

    let result = state.coordinator.pair(body.into_request()).await?;
    Ok(Json(result))
}

/// Fetches ICE servers without persisting them, then answers after a delay.
async fn playground(State(state): State<Arc<AppState>>) -> &'static str {
    info!("Playground started");

    match state.ice.fetch_config().await {
        Ok(config) => info!(
            provider = %config.provider,
            ice_servers = %config.ice_servers,
            "Playground fetched ICE servers"
        ),
        Err(e) => warn!(error = %e, kind = %e.kind(), "Playground ICE fetch failed"),
    }

    tokio::time::sleep(state.playground_delay).await;
    info!("Playground finished");
    "Hello!"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IceError, StoreError};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;

    async fn render(error: impl Into<Error>) -> (StatusCode, serde_json::Value) {
        let response = ApiError(error.into()).into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_error_bodies() {
        let (status, body) = render(PairingError::InvalidParams { field: "deviceKey" }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "invalidParams" }));

        let (status, body) = render(PairingError::timeout(Duration::from_secs(1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "timeout" }));

        let (status, body) = render(PairingError::Cancelled).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "error": "cancelled" }));
    }

    #[tokio::test]
    async fn test_store_status_wins() {
        let (status, body) = render(PairingError::Store(StoreError::Unavailable {
            reason: "backend down".to_string(),
        }))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "error": "storeError" }));

        let (status, _) = render(StoreError::Serialization("bad".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_ice_errors() {
        let (status, body) = render(IceError::InvalidEnvironment {
            missing: vec!["TWILIO_API_KEY_SID"],
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "invalidEnvironment" }));

        let (status, _) = render(IceError::Upstream {
            provider: "twilio".to_string(),
            reason: "HTTP 401".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
