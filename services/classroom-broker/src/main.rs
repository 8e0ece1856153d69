//! Classroom Credential Broker
//!
//! Single-binary Rust service that:
//! 1. Logs a single user in to Google via OAuth (authorization code + PKCE)
//! 2. Keeps exactly one credential in a durable store, refreshing it on demand
//! 3. Serves Classroom API data using that credential

mod config;
mod error;
mod metrics;
mod oauth_flow;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use classroom_api::ApiProxy;
use credential_lifecycle::{CredentialLifecycleManager, OAuthRefresher, open_store};
use google_auth::ClientSecrets;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Error;
use crate::metrics::ServiceMetrics;
use crate::oauth_flow::{FlowError, OAuthFlow};

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    manager: Arc<CredentialLifecycleManager>,
    api: Arc<ApiProxy>,
    flow: Arc<OAuthFlow>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Excess concurrent requests beyond `max_connections` queue in the
/// concurrency limit layer.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/logout", get(logout_handler))
        .route("/oauth/callback", get(callback_handler))
        .route("/api/items", get(items_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::track_requests,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may set LOG_LEVEL, so load it before the subscriber
    let dotenv = dotenvy::dotenv();

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting classroom-broker");
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to load .env"),
    }

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let store_url = config.store_url()?;
    let database = config.store_database()?;
    info!(
        listen_addr = %config.server.listen_addr,
        database,
        api = %config.api.base_url,
        scopes = config.oauth.scopes.len(),
        "configuration loaded"
    );

    let secrets = ClientSecrets::from_file(&config.oauth.client_secrets_file).with_context(|| {
        format!(
            "failed to load OAuth client secrets from {}",
            config.oauth.client_secrets_file.display()
        )
    })?;

    let store = open_store(store_url, database)
        .await
        .context("failed to open credential store")?;

    let client = reqwest::Client::new();
    let refresher = Arc::new(OAuthRefresher::new(client.clone(), config.refresh_timeout()));
    let manager = Arc::new(CredentialLifecycleManager::new(
        store,
        refresher,
        config.oauth.scopes.clone(),
    ));
    let api = Arc::new(ApiProxy::new(
        client.clone(),
        manager.clone(),
        config.api_settings()?,
    ));
    let redirect_uri = config.redirect_uri(&secrets);
    info!(%redirect_uri, "oauth callback");
    let flow = Arc::new(OAuthFlow::new(
        client,
        secrets,
        redirect_uri,
        config.oauth.scopes.clone(),
    ));

    match manager.status().await {
        Ok(status) => info!(credential = ?status, "credential store ready"),
        Err(e) => warn!(error = %e, "could not read stored credential"),
    }

    let app_state = AppState {
        manager,
        api,
        flow,
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// GET /login: redirect to the provider's consent page.
async fn login_handler(State(state): State<AppState>) -> Response {
    match state.flow.authorization_url().await {
        Ok(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        Err(e) => Error::from(e).into_response(),
    }
}

/// GET /logout: forget the stored credential.
async fn logout_handler(State(state): State<AppState>) -> &'static str {
    state.manager.logout().await;
    "logged out"
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /oauth/callback: finish the login started at /login.
///
/// Always answers 200; the body says what happened.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> &'static str {
    match complete_login(&state, params).await {
        Ok(()) => "authenticated",
        Err(e) => {
            error!(kind = e.kind(), error = %e, "login failed");
            e.callback_message()
        }
    }
}

async fn complete_login(state: &AppState, params: CallbackParams) -> Result<(), Error> {
    if let Some(denied) = params.error {
        return Err(FlowError::Denied(denied).into());
    }
    let code = params
        .code
        .ok_or_else(|| FlowError::Denied("callback has no authorization code".into()))?;
    let login_state = params.state.ok_or(FlowError::UnknownState)?;

    let record = state.flow.complete(&code, &login_state).await?;
    state.manager.accept_new(record.into()).await?;
    info!("login complete");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ItemsParams {
    id: Option<String>,
}

/// GET /api/items: one item by `id`, or the whole collection.
async fn items_handler(
    State(state): State<AppState>,
    Query(params): Query<ItemsParams>,
) -> Result<Response, Error> {
    // A blank id lists the collection, same as no id at all
    match params.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => Ok(axum::Json(state.api.get_item(id).await?).into_response()),
        None => Ok(axum::Json(state.api.list_items().await?).into_response()),
    }
}

/// Health endpoint: service status, stored credential state, uptime, requests served.
/// Returns 503 when the credential store cannot be read.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.uptime_secs();
    let requests = state.metrics.requests_served();

    let (status_code, body) = match state.manager.status().await {
        Ok(credential) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "credential": credential,
                "uptime_seconds": uptime,
                "requests_served": requests,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read credential store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "degraded",
                    "credential": "unknown",
                    "uptime_seconds": uptime,
                    "requests_served": requests,
                }),
            )
        }
    };

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
