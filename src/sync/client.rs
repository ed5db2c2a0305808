//! sync::client
//!
//! reqwest implementation of the [`ArgoApi`] transport against the Argo CD
//! HTTP API:
//!
//! - `GET  /api/v1/applications/{name}` - credential probe
//! - `GET  /api/v1/stream/applications?name={name}` - NDJSON status events
//! - `POST /api/v1/applications/{name}/sync` - trigger synchronization
//!
//! Status mapping: 401/403 become [`SyncError::AuthFailed`] (permanent),
//! other non-success statuses become [`SyncError::ApiError`], transport
//! failures become [`SyncError::NetworkError`].

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{ArgoApi, SyncError};

/// Argo CD API client with bearer-token authentication.
pub struct ArgoClient {
    client: Client,
    base_url: String,
    token: String,
}

// Custom Debug to avoid exposing the token
impl std::fmt::Debug for ArgoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgoClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// One event from the application stream. Only the synced revision is read.
#[derive(Debug, Deserialize)]
struct WatchEnvelope {
    result: WatchEvent,
}

#[derive(Debug, Deserialize)]
struct WatchEvent {
    application: WatchApplication,
}

#[derive(Debug, Deserialize)]
struct WatchApplication {
    status: WatchStatus,
}

#[derive(Debug, Deserialize)]
struct WatchStatus {
    sync: WatchSyncStatus,
}

#[derive(Debug, Deserialize)]
struct WatchSyncStatus {
    revision: Option<String>,
}

impl ArgoClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, SyncError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| SyncError::AuthFailed("token is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn app_url(&self, name: &str, suffix: &str) -> String {
        format!("{}/api/v1/applications/{name}{suffix}", self.base_url)
    }

    /// Map a non-success response to the sync error taxonomy.
    async fn handle_error_response(response: Response, status: StatusCode) -> SyncError {
        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthFailed(message),
            _ => SyncError::ApiError {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl ArgoApi for ArgoClient {
    async fn get_application(&self, name: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .get(self.app_url(name, ""))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|err| SyncError::NetworkError(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::handle_error_response(response, status).await)
        }
    }

    async fn watch_revisions(
        &self,
        name: &str,
    ) -> Result<BoxStream<'static, Result<String, SyncError>>, SyncError> {
        let response = self
            .client
            .get(format!("{}/api/v1/stream/applications", self.base_url))
            .query(&[("name", name)])
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|err| SyncError::NetworkError(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(response, status).await);
        }

        // NDJSON: buffer chunks into lines, decode each line, and surface
        // the reported revision. Lines that don't decode are skipped rather
        // than killing the watch.
        let stream = futures_util::stream::unfold(
            (response.bytes_stream(), String::new(), VecDeque::<String>::new()),
            |(mut body, mut buffer, mut pending)| async move {
                loop {
                    while let Some(line) = pending.pop_front() {
                        if let Some(revision) = decode_revision(&line) {
                            return Some((Ok(revision), (body, buffer, pending)));
                        }
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                            while let Some(newline) = buffer.find('\n') {
                                let line: String = buffer.drain(..=newline).collect();
                                let line = line.trim().to_string();
                                if !line.is_empty() {
                                    pending.push_back(line);
                                }
                            }
                        }
                        Some(Err(err)) => {
                            return Some((
                                Err(SyncError::NetworkError(err.to_string())),
                                (body, buffer, pending),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn sync(&self, name: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.app_url(name, "/sync"))
            .headers(self.headers()?)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|err| SyncError::NetworkError(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::handle_error_response(response, status).await)
        }
    }
}

/// Pull the synced revision out of one NDJSON event line.
fn decode_revision(line: &str) -> Option<String> {
    serde_json::from_str::<WatchEnvelope>(line)
        .ok()
        .and_then(|envelope| envelope.result.application.status.sync.revision)
}
