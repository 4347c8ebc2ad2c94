//! Pairing attempt coordination.
//!
//! One call to [`PairingCoordinator::pair`] runs a whole attempt:
//!
//! ```text
//! Idle ──► Publishing ──► Waiting ──┬──► Matched
//!                                   ├──► TimedOut
//!                                   └──► Failed
//! ```
//!
//! While `Waiting`, the attempt races the live query against a deadline and a
//! cancellation token. Whichever fires first wins; the other side is torn down
//! before the caller sees the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    CONNECTIONS_COLLECTION, DEFAULT_PAIRING_TIMEOUT_SECS, PairingAdvertisement, PairingRequest,
    PairingResult,
};
use crate::error::{PairingError, StoreError};
use crate::store::{ChangeBatch, ChangeKind, DocumentRef, DocumentStore, Filter, Subscription};

/// Tunables for pairing attempts.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// How long an attempt waits for its counterpart, measured from the
    /// moment the live query is open.
    pub timeout: Duration,
    /// Delete the attempt's own advertisement when it ends without a match.
    pub cleanup_on_exit: bool,
    /// Collection holding advertisements.
    pub collection: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_PAIRING_TIMEOUT_SECS),
            cleanup_on_exit: true,
            collection: CONNECTIONS_COLLECTION.to_string(),
        }
    }
}

/// Lifecycle of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Publishing,
    Waiting,
    Matched,
    TimedOut,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Matched | AttemptState::TimedOut | AttemptState::Failed
        )
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttemptState::Idle => "idle",
            AttemptState::Publishing => "publishing",
            AttemptState::Waiting => "waiting",
            AttemptState::Matched => "matched",
            AttemptState::TimedOut => "timed_out",
            AttemptState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Resources owned by one attempt.
///
/// `close` cancels the attempt token and unsubscribes; calling it more than
/// once is harmless. Dropping the context closes it as well.
struct AttemptContext {
    id: Uuid,
    state: AttemptState,
    cancel: CancellationToken,
    subscription: Option<Subscription>,
    advert: Option<DocumentRef>,
}

impl AttemptContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: AttemptState::Idle,
            cancel,
            subscription: None,
            advert: None,
        }
    }

    fn transition(&mut self, next: AttemptState) {
        tracing::debug!(attempt = %self.id, from = %self.state, to = %next, "Pairing state change");
        self.state = next;
    }

    fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

impl Drop for AttemptContext {
    fn drop(&mut self) {
        self.close();
    }
}

enum WaitEvent {
    Cancelled,
    Deadline,
    Batch(Option<Result<ChangeBatch, StoreError>>),
}

/// Runs pairing attempts against a shared document store.
///
/// Attempts are independent: each publishes its own advertisement and opens
/// its own live query. Cloning is cheap.
#[derive(Clone)]
pub struct PairingCoordinator {
    store: Arc<dyn DocumentStore>,
    config: PairingConfig,
    shutdown: CancellationToken,
}

impl PairingCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, config: PairingConfig) -> Self {
        Self {
            store,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort in-flight attempts with [`PairingError::Cancelled`] once `token`
    /// is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Run one attempt to completion.
    ///
    /// Validation happens before anything is written. On every exit path the
    /// live query is closed before this returns.
    pub async fn pair(&self, request: PairingRequest) -> Result<PairingResult, PairingError> {
        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "Rejected pairing request");
            return Err(e);
        }

        let mut ctx = AttemptContext::new(self.shutdown.child_token());
        tracing::info!(
            attempt = %ctx.id,
            local_code = %request.local_code,
            remote_code = %request.remote_code,
            "Pairing started"
        );

        let outcome = self.run(&mut ctx, &request).await;
        ctx.close();

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    attempt = %ctx.id,
                    device_name = result.device_name.as_deref().unwrap_or("-"),
                    "Pairing succeeded"
                );
            }
            Err(e) => {
                if !ctx.state.is_terminal() {
                    ctx.transition(AttemptState::Failed);
                }
                tracing::warn!(attempt = %ctx.id, state = %ctx.state, error = %e, "Pairing failed");
                if self.config.cleanup_on_exit {
                    self.discard_advert(&mut ctx).await;
                }
            }
        }

        outcome
    }

    async fn run(
        &self,
        ctx: &mut AttemptContext,
        request: &PairingRequest,
    ) -> Result<PairingResult, PairingError> {
        ctx.transition(AttemptState::Publishing);
        let advert = PairingAdvertisement::from_request(request, Utc::now());
        let reference = self
            .store
            .add(&self.config.collection, advert.to_fields()?)
            .await?;
        tracing::debug!(attempt = %ctx.id, advert = %reference, "Added local connection");
        ctx.advert = Some(reference);

        let subscription = self
            .store
            .subscribe(
                &self.config.collection,
                Filter::eq("remoteCode", request.local_code.as_str()),
            )
            .await?;
        ctx.subscription = Some(subscription);
        ctx.transition(AttemptState::Waiting);

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let cancel = ctx.cancel.clone();

        loop {
            let Some(subscription) = ctx.subscription.as_mut() else {
                return Err(self.closed_error().into());
            };

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => WaitEvent::Cancelled,
                _ = &mut deadline => WaitEvent::Deadline,
                batch = subscription.next() => WaitEvent::Batch(batch),
            };

            match event {
                WaitEvent::Cancelled => return Err(PairingError::Cancelled),
                WaitEvent::Deadline => {
                    ctx.transition(AttemptState::TimedOut);
                    return Err(PairingError::timeout(self.config.timeout));
                }
                WaitEvent::Batch(Some(Ok(batch))) => {
                    if let Some(result) = self.consume(ctx, request, batch).await? {
                        ctx.transition(AttemptState::Matched);
                        return Ok(result);
                    }
                }
                WaitEvent::Batch(Some(Err(e))) => {
                    tracing::warn!(attempt = %ctx.id, error = %e, "Could not listen for pairing connections");
                    return Err(e.into());
                }
                WaitEvent::Batch(None) => return Err(self.closed_error().into()),
            }
        }
    }

    /// Delete every added document in `batch`, then check it against the
    /// expected code. A document whose delete did not land belongs to whoever
    /// removed it. The first match wins; later documents in the same batch are
    /// still consumed.
    async fn consume(
        &self,
        ctx: &AttemptContext,
        request: &PairingRequest,
        batch: ChangeBatch,
    ) -> Result<Option<PairingResult>, PairingError> {
        let mut matched = None;

        for change in batch {
            if change.kind != ChangeKind::Added {
                continue;
            }
            let document = change.document;
            // Only reachable when both codes are equal.
            if ctx.advert.as_ref() == Some(&document.reference) {
                continue;
            }

            if !self.store.delete(&document.reference).await? {
                tracing::debug!(attempt = %ctx.id, doc = %document.reference, "Pair candidate already taken");
                continue;
            }

            let candidate: PairingAdvertisement = match document.decode() {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!(attempt = %ctx.id, doc = %document.reference, error = %e, "Discarding malformed pair candidate");
                    continue;
                }
            };
            tracing::debug!(
                attempt = %ctx.id,
                doc = %document.reference,
                local_code = %candidate.local_code,
                "New pair candidate"
            );

            if matched.is_some() {
                continue;
            }
            if candidate.local_code == request.remote_code {
                matched = Some(candidate.into_result());
            } else {
                tracing::warn!(
                    attempt = %ctx.id,
                    expected = %request.remote_code,
                    found = %candidate.local_code,
                    "Invalid pairing code found"
                );
            }
        }

        Ok(matched)
    }

    async fn discard_advert(&self, ctx: &mut AttemptContext) {
        let Some(reference) = ctx.advert.take() else {
            return;
        };
        match self.store.delete(&reference).await {
            Ok(_) => tracing::debug!(attempt = %ctx.id, advert = %reference, "Removed unmatched advertisement"),
            Err(e) => {
                tracing::warn!(attempt = %ctx.id, advert = %reference, error = %e, "Could not remove unmatched advertisement")
            }
        }
    }

    fn closed_error(&self) -> StoreError {
        StoreError::SubscriptionClosed {
            collection: self.config.collection.clone(),
        }
    }
}
