//! server::hook
//!
//! The webhook dispatcher: decodes and validates the request, resolves the
//! deployment and its repository, and runs the fetch → update → push
//! sequence under the repository's exclusive lock.
//!
//! Outcome mapping: `200` updated, `304` no-op, `400` the caller's own
//! validation mistakes (echoed), `404` unknown deployment, `500` everything
//! infrastructural - with detail kept in the logs, never the body.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::deployment::{ApplyError, ApplyOutcome};
use super::AppState;
use crate::repo::{Deadline, RepoError};
use crate::sync;

/// Budget for one webhook call, fetch and push included.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded webhook request body.
///
/// Decoding is strict: unknown fields and duplicate keys are errors.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookPayload {
    pub deployment: String,
    pub tag_name: String,
    pub authorized_by: String,
}

/// Business-invariant violations in an otherwise well-formed payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

impl WebhookPayload {
    /// Check the non-emptiness and tag-format invariants.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.deployment.is_empty() {
            return Err(PayloadError::MissingField("deployment"));
        }
        if self.tag_name.is_empty() {
            return Err(PayloadError::MissingField("tag_name"));
        }
        if self.authorized_by.is_empty() {
            return Err(PayloadError::MissingField("authorized_by"));
        }
        if self.tag_name.chars().any(char::is_whitespace) {
            return Err(PayloadError::InvalidField("tag_name"));
        }
        Ok(())
    }
}

/// Failures the dispatcher maps to HTTP responses.
#[derive(Debug, Error)]
enum HookError {
    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Validation(#[from] PayloadError),

    #[error("deployment not found")]
    UnknownDeployment,

    /// Configuration promised referential integrity; a missing repository
    /// for a known deployment is a server-side defect.
    #[error("repository '{0}' not configured")]
    MissingRepository(String),

    #[error("request deadline elapsed before repository fetch")]
    DeadlineBeforeFetch,

    #[error("fetch failed: {0}")]
    Fetch(RepoError),

    #[error("apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("push failed: {0}")]
    Push(RepoError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        match self {
            HookError::Decode(message) => (
                StatusCode::BAD_REQUEST,
                format!("failed to decode payload: {message}"),
            )
                .into_response(),
            HookError::Validation(err) => {
                (StatusCode::BAD_REQUEST, err.to_string()).into_response()
            }
            HookError::UnknownDeployment => {
                (StatusCode::NOT_FOUND, "Deployment not found").into_response()
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
        }
    }
}

/// `POST /` - the webhook entry point.
pub async fn hook(State(state): State<Arc<AppState>>, body: String) -> Response {
    let deadline = Deadline::after(WEBHOOK_TIMEOUT);
    match process(&state, &body, deadline).await {
        Ok(ApplyOutcome::Updated { .. }) => (StatusCode::OK, "OK").into_response(),
        Ok(ApplyOutcome::Unchanged) => StatusCode::NOT_MODIFIED.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn process(
    state: &Arc<AppState>,
    body: &str,
    deadline: Deadline,
) -> Result<ApplyOutcome, HookError> {
    let payload: WebhookPayload =
        serde_json::from_str(body).map_err(|err| HookError::Decode(err.to_string()))?;
    payload.validate()?;

    let deployment = state
        .deployments
        .get(&payload.deployment)
        .cloned()
        .ok_or(HookError::UnknownDeployment)?;
    let repository = state
        .repositories
        .get(&deployment.repository)
        .cloned()
        .ok_or_else(|| {
            error!(
                deployment = %payload.deployment,
                repository = %deployment.repository,
                "deployment references a repository that is not configured"
            );
            HookError::MissingRepository(deployment.repository.clone())
        })?;

    // Serialize all writes to this repository; everything from fetch to
    // push happens under the lock.
    let guard = repository.lock().await;

    // Short-circuit before the expensive clone if we already timed out
    // waiting for the lock.
    if deadline.expired() {
        return Err(HookError::DeadlineBeforeFetch);
    }

    let outcome = {
        let repository = repository.clone();
        let deployment = deployment.clone();
        let tag = payload.tag_name.clone();
        let user = payload.authorized_by.clone();
        tokio::task::spawn_blocking(move || -> Result<ApplyOutcome, HookError> {
            let session = repository.fetch(deadline).map_err(HookError::Fetch)?;
            let outcome = deployment.apply(&session, &tag, &user)?;
            if matches!(outcome, ApplyOutcome::Updated { .. }) {
                session.push(deadline).map_err(HookError::Push)?;
            }
            Ok(outcome)
            // session drops here, on success and failure alike
        })
        .await
        .map_err(|err| HookError::Internal(err.to_string()))?
    };
    drop(guard);

    let outcome = outcome.inspect_err(|err| log_failure(&payload, &deployment.repository, err))?;

    match &outcome {
        ApplyOutcome::Updated { commit } => {
            info!(
                deployment = %payload.deployment,
                tag = %payload.tag_name,
                authorized_by = %payload.authorized_by,
                commit = %commit,
                "deployment updated"
            );
            if let (Some(api), Some(app)) = (&state.argo, &deployment.argocd_app) {
                sync::spawn(
                    api.clone(),
                    app.clone(),
                    commit.clone(),
                    state.sync_config.clone(),
                );
            }
        }
        ApplyOutcome::Unchanged => {
            info!(
                deployment = %payload.deployment,
                tag = %payload.tag_name,
                "no changes made"
            );
        }
    }

    Ok(outcome)
}

/// Log infrastructure failures with their full detail; the response body
/// will only carry a generic message.
fn log_failure(payload: &WebhookPayload, repository: &str, err: &HookError) {
    match err {
        HookError::Fetch(cause) => warn!(
            deployment = %payload.deployment,
            repository,
            error = %cause,
            "failed to fetch repository"
        ),
        HookError::Push(cause) => {
            if let RepoError::PushFailed { message, progress } = cause {
                warn!(
                    deployment = %payload.deployment,
                    repository,
                    error = %message,
                    transport = %progress,
                    "failed to push repository"
                );
            } else {
                warn!(
                    deployment = %payload.deployment,
                    repository,
                    error = %cause,
                    "failed to push repository"
                );
            }
        }
        HookError::Apply(cause) => warn!(
            deployment = %payload.deployment,
            repository,
            error = %cause,
            "failed to apply deployment"
        ),
        HookError::DeadlineBeforeFetch | HookError::Internal(_) => warn!(
            deployment = %payload.deployment,
            repository,
            error = %err,
            "webhook processing failed"
        ),
        // Client errors and the already-logged repository defect
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(deployment: &str, tag: &str, user: &str) -> WebhookPayload {
        WebhookPayload {
            deployment: deployment.to_string(),
            tag_name: tag.to_string(),
            authorized_by: user.to_string(),
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(payload("api", "1.2.3", "alice").validate().is_ok());
    }

    #[test]
    fn empty_fields_are_named() {
        let err = payload("", "1.2.3", "alice").validate().unwrap_err();
        assert_eq!(err.to_string(), "missing field: deployment");
        let err = payload("api", "", "alice").validate().unwrap_err();
        assert_eq!(err.to_string(), "missing field: tag_name");
        let err = payload("api", "1.2.3", "").validate().unwrap_err();
        assert_eq!(err.to_string(), "missing field: authorized_by");
    }

    #[test]
    fn whitespace_in_tag_is_invalid() {
        let err = payload("api", "1.2 3", "alice").validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid field: tag_name");
        assert!(payload("api", "1.2\t3", "alice").validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<WebhookPayload, _> = serde_json::from_str(
            r#"{"deployment":"api","tag_name":"1.0","authorized_by":"ci","extra":true}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let result: Result<WebhookPayload, _> = serde_json::from_str(
            r#"{"deployment":"api","deployment":"api","tag_name":"1.0","authorized_by":"ci"}"#,
        );
        assert!(result.is_err());
    }
}
