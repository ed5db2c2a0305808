//! sync
//!
//! Argo CD synchronization client.
//!
//! After a successful push the dispatcher hands the new commit id to this
//! module, which runs independently of the HTTP response: it authenticates
//! against the Argo CD API, waits until the application reports the pushed
//! revision, and then triggers a sync. The webhook caller is never blocked
//! on or told about the outcome; results land in the logs.
//!
//! # Retry model
//!
//! Each attempt runs the full authenticate → wait-for-revision → sync
//! sequence. Transient failures (network errors, non-auth API errors) are
//! retried with exponential backoff under one overall deadline. Permanent
//! failures stop immediately: bad credentials will not improve, and an
//! expired deadline must not spawn another watch.
//!
//! The transport is behind the [`ArgoApi`] trait so retry timing and event
//! sequencing are testable against a mock server with small backoff values.

pub mod client;

pub use client::ArgoClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials were rejected. Permanent.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The overall sync deadline elapsed. Permanent.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The API answered with a non-auth error status. Retried.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Network or connection error. Retried.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl SyncError {
    /// Permanent errors abort the retry loop immediately.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SyncError::AuthFailed(_) | SyncError::DeadlineExceeded)
    }
}

/// Transport boundary to the Argo CD API.
#[async_trait]
pub trait ArgoApi: Send + Sync {
    /// Read the application, purely to confirm the credentials are valid.
    async fn get_application(&self, name: &str) -> Result<(), SyncError>;

    /// Subscribe to the application's status events. Each item is the
    /// currently reported synced revision.
    async fn watch_revisions(
        &self,
        name: &str,
    ) -> Result<BoxStream<'static, Result<String, SyncError>>, SyncError>;

    /// Trigger a synchronization of the application.
    async fn sync(&self, name: &str) -> Result<(), SyncError>;
}

/// Retry/backoff tuning for one sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// First retry delay; doubles per transient failure.
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
    /// Overall deadline for the whole session.
    pub overall_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(64),
            overall_timeout: Duration::from_secs(300),
        }
    }
}

/// States of one sync attempt.
///
/// The credential probe covers both the connection and the authentication
/// step; its error classification separates the two failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Authenticating,
    WaitingForRevision,
    Syncing,
    Done,
}

/// Spawn a detached sync session for `application` at `revision`.
///
/// Fire-and-forget: the task logs its outcome and is never joined.
pub fn spawn(api: Arc<dyn ArgoApi>, application: String, revision: String, config: SyncConfig) {
    tokio::spawn(async move {
        match run(api.as_ref(), &application, &revision, &config).await {
            Ok(()) => {}
            Err(SyncError::DeadlineExceeded) => {
                warn!(application, revision, "timed out waiting for Argo CD sync");
            }
            Err(err) => {
                warn!(application, revision, error = %err, "could not trigger Argo CD sync");
            }
        }
    });
}

/// Run one bounded-retry sync session to completion.
pub async fn run(
    api: &dyn ArgoApi,
    application: &str,
    revision: &str,
    config: &SyncConfig,
) -> Result<(), SyncError> {
    let deadline = Instant::now() + config.overall_timeout;
    let mut backoff = config.initial_backoff;

    loop {
        match attempt(api, application, revision, deadline).await {
            Ok(()) => {
                info!(application, revision, "application synchronized");
                return Ok(());
            }
            Err(err) if err.is_permanent() => return Err(err),
            Err(err) => {
                debug!(application, error = %err, "sync attempt failed, will retry");
                if Instant::now() + backoff >= deadline {
                    return Err(SyncError::DeadlineExceeded);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }
}

/// One full pass through the sync state machine.
async fn attempt(
    api: &dyn ArgoApi,
    application: &str,
    revision: &str,
    deadline: Instant,
) -> Result<(), SyncError> {
    let mut state = SyncState::Authenticating;
    loop {
        debug!(application, ?state, "sync state");
        state = match state {
            SyncState::Authenticating => {
                api.get_application(application).await?;
                SyncState::WaitingForRevision
            }
            SyncState::WaitingForRevision => {
                wait_for_revision(api, application, revision, deadline).await?;
                SyncState::Syncing
            }
            SyncState::Syncing => {
                api.sync(application).await?;
                SyncState::Done
            }
            SyncState::Done => return Ok(()),
        };
    }
}

/// Consume status events until the target revision is reported.
///
/// A deadline expiry here is permanent: the revision did not converge in
/// time, and watching longer is exactly what the deadline forbids. A stream
/// that ends without a match is a dropped connection and retried.
async fn wait_for_revision(
    api: &dyn ArgoApi,
    application: &str,
    target: &str,
    deadline: Instant,
) -> Result<(), SyncError> {
    let mut events = api.watch_revisions(application).await?;
    let watch = async {
        while let Some(event) = events.next().await {
            let revision = event?;
            debug!(application, revision, "application revision reported");
            if revision == target {
                return Ok(());
            }
        }
        Err(SyncError::NetworkError(
            "watch stream ended before revision appeared".to_string(),
        ))
    };
    match tokio::time::timeout_at(deadline, watch).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::DeadlineExceeded),
    }
}
