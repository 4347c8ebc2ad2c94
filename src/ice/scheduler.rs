//! Periodic ICE refresh.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::IceRefresher;
use crate::config::ICE_SCHEDULE_VAR;
use crate::error::ConfigError;

/// Every six hours, on the hour (`sec min hour day month weekday`).
pub const DEFAULT_REFRESH_SCHEDULE: &str = "0 0 */6 * * *";

/// Parsed cron schedule for the refresh job.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl RefreshSchedule {
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let schedule =
            cron::Schedule::from_str(expression).map_err(|e| ConfigError::InvalidValue {
                key: ICE_SCHEDULE_VAR.to_string(),
                message: format!("{}: {}", expression, e),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

/// Spawn the refresh loop. It runs until `shutdown` is cancelled. Failures
/// are logged and the loop waits for the next slot.
pub fn spawn_refresh_task(
    refresher: Arc<IceRefresher>,
    schedule: RefreshSchedule,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(refresh_loop(refresher, schedule, shutdown))
}

async fn refresh_loop(
    refresher: Arc<IceRefresher>,
    schedule: RefreshSchedule,
    shutdown: CancellationToken,
) {
    tracing::info!(
        schedule = schedule.expression(),
        provider = refresher.provider_name(),
        "ICE refresh task started"
    );

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!("ICE refresh schedule has no upcoming runs, stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(next = %next, "Next ICE refresh scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("ICE refresh task stopping");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if let Err(e) = refresher.refresh().await {
            tracing::error!(kind = %e.kind(), error = %e, "ICE refresh failed");
        }
    }
}
