//! HTTP server startup
//!
//! Opens the research store, wires the gateway to the hosted model and the
//! in-process context store, and serves the API until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::Config,
    gateway::Gateway,
    memory::InMemoryContextStore,
    model_runtime::LLMWorker,
    shared_state::AppState,
    storage::open_store,
};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.print_config();

    let cfg = Arc::new(cfg);
    let store = open_store(&cfg)?;
    match store.stats().await {
        Ok(stats) => info!(
            "Research database ready: {} users, {} interactions, {} events ({} bytes)",
            stats.total_users, stats.total_interactions, stats.total_events, stats.database_size_bytes
        ),
        Err(e) => warn!("Could not read database stats: {:#}", e),
    }

    let contexts = Arc::new(InMemoryContextStore::new());
    let sweeper = cfg
        .context_idle_ttl_seconds
        .map(|ttl| spawn_context_sweeper(contexts.clone(), Duration::from_secs(ttl)));

    let model = Arc::new(LLMWorker::from_config(&cfg)?);
    let gateway = Arc::new(Gateway::new(cfg.clone(), store.clone(), contexts, model));
    let state = AppState::new(cfg.clone(), gateway);
    let counters = state.counters.clone();

    let app = build_router(state)?;
    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    let (total, submissions, events, rejected) = counters.snapshot();
    info!(
        "Server stopped after {} requests ({} submissions, {} events, {} rejected)",
        total, submissions, events, rejected
    );
    store.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Periodically drops conversation windows idle for longer than `ttl`.
pub fn spawn_context_sweeper(contexts: Arc<InMemoryContextStore>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 2).max(Duration::from_secs(1));
    info!("Context sweeper running every {}s (ttl {}s)", period.as_secs(), ttl.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = contexts.evict_idle(ttl);
            if evicted > 0 {
                info!("Evicted {} idle conversation contexts", evicted);
            }
        }
    })
}

fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origin.trim() == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let origin: HeaderValue = origin
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid CORS_ORIGIN '{}': {}", origin, e))?;
    Ok(layer.allow_origin(origin))
}

pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.cors_origin)?;
    let timeout = state.config.request_timeout();

    Ok(Router::new()
        .route("/health", get(crate::api::health))
        .route("/metrics", get(crate::metrics::get_metrics))
        .route("/api/check-user", post(crate::api::check_user))
        .route("/api/submit", post(crate::api::submit))
        .route("/api/reset", post(crate::api::reset))
        .route("/api/log-event", post(crate::api::log_event))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state))
}
