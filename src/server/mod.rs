//! server
//!
//! HTTP surface: the webhook dispatcher plus its collaborators.
//!
//! # Routes
//!
//! - `POST /` - the webhook (gated by the shared secret when configured)
//! - `GET /health` - liveness probe, always `200 OK`
//! - `GET /metrics` - Prometheus text exposition
//!
//! The IP allowlist, when configured, guards all three. Scheduling is one
//! concurrent handler per request; only requests that target the same
//! repository serialize on its lock.

pub mod deployment;
pub mod hook;
pub mod metrics;
pub mod middleware;

pub use deployment::{ApplyOutcome, Deployment};
pub use metrics::HookMetrics;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use prometheus::Registry;
use thiserror::Error;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::repo::Repository;
use crate::sync::{ArgoApi, ArgoClient, SyncConfig};
use middleware::{AllowlistError, CidrBlock};

/// Errors from server construction and serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Allowlist(#[from] AllowlistError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable shared state behind the router.
///
/// Everything here is either read-only configuration or interior-mutable by
/// design (locks, metrics); no component reaches for ambient globals.
pub struct AppState {
    pub listen_address: String,
    pub deployments: HashMap<String, Arc<Deployment>>,
    pub repositories: HashMap<String, Arc<Repository>>,
    pub argo: Option<Arc<dyn ArgoApi>>,
    pub sync_config: SyncConfig,
    pub metrics: HookMetrics,
    pub secret_key: Option<String>,
    pub allowed_ips: Vec<CidrBlock>,
}

impl AppState {
    /// Build the runtime state from a validated config.
    ///
    /// Deployment construction compiles commit-message templates, so this
    /// is where a malformed template aborts startup.
    pub fn from_config(config: Config, registry: Registry) -> Result<Self, ServerError> {
        if config.secret_key.is_none() && config.allowed_ips.is_empty() {
            warn!("your secret_key and allowed_ips have not been configured");
            warn!("this is extremely insecure, and should never be done outside of testing");
        }

        let mut repositories = HashMap::with_capacity(config.repositories.len());
        for repo_config in config.repositories {
            repositories.insert(
                repo_config.name.clone(),
                Arc::new(Repository::new(repo_config)),
            );
        }

        let mut deployments = HashMap::with_capacity(config.deployments.len());
        for deploy_config in config.deployments {
            let deployment = Deployment::new(deploy_config)?;
            deployments.insert(deployment.name.clone(), Arc::new(deployment));
        }

        let argo: Option<Arc<dyn ArgoApi>> = match (&config.argocd_url, &config.argocd_token) {
            (Some(url), Some(token)) => Some(Arc::new(ArgoClient::new(url, token))),
            _ => None,
        };

        Ok(Self {
            listen_address: config.listen_address,
            deployments,
            repositories,
            argo,
            sync_config: SyncConfig::default(),
            metrics: HookMetrics::new(registry)?,
            secret_key: config.secret_key,
            allowed_ips: CidrBlock::parse_all(&config.allowed_ips)?,
        })
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    // Webhook route: timeout wraps metrics wraps the secret gate wraps the
    // handler, so gate rejections are still counted and timed.
    let hook_routes = Router::new()
        .route("/", post(hook::hook))
        .layer(from_fn_with_state(state.clone(), middleware::secret_key))
        .layer(from_fn_with_state(state.clone(), record_hook_metrics))
        .layer(TimeoutLayer::new(hook::WEBHOOK_TIMEOUT + Duration::from_secs(1)));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_exposition))
        .merge(hook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), middleware::ip_allowlist))
        .with_state(state)
}

/// Bind and serve until a shutdown signal arrives.
pub async fn run(state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(&state.listen_address).await?;
    info!(address = %listener.local_addr()?, "listening");
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics_exposition(State(state): State<Arc<AppState>>) -> String {
    state.metrics.encode_text()
}

/// Record counter/gauge/histogram around one webhook call.
async fn record_hook_metrics(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let started = std::time::Instant::now();
    state.metrics.call_started();
    let response = next.run(request).await;
    state.metrics.call_finished(
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler means no way to shut down cleanly; park
            // forever and leave termination to the supervisor.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
