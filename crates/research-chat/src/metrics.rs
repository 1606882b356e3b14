
use prometheus::{Encoder, TextEncoder, Registry, IntCounter, IntCounterVec, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static INTERACTIONS: OnceLock<IntCounter> = OnceLock::new();
static EVENTS_LOGGED: OnceLock<IntCounterVec> = OnceLock::new();
static MODEL_LATENCY: OnceLock<Histogram> = OnceLock::new();

fn get_or_build<T: Clone>(
    cell: &OnceLock<T>,
    build: impl FnOnce() -> prometheus::Result<T>,
) -> prometheus::Result<T> {
    if let Some(existing) = cell.get() {
        return Ok(existing.clone());
    }
    let built = build()?;
    Ok(cell.get_or_init(|| built).clone())
}

pub fn init_metrics() {
    let registered = (|| -> prometheus::Result<()> {
        let req_counter = get_or_build(&REQ_COUNTER, || {
            IntCounterVec::new(
                prometheus::opts!("requests_total", "Total requests per route"),
                &["route", "status"],
            )
        })?;
        let interactions = get_or_build(&INTERACTIONS, || {
            IntCounter::new("interactions_total", "Interactions recorded")
        })?;
        let events_logged = get_or_build(&EVENTS_LOGGED, || {
            IntCounterVec::new(
                prometheus::opts!("events_logged_total", "UI events recorded per type"),
                &["event_type"],
            )
        })?;
        let model_latency = get_or_build(&MODEL_LATENCY, || {
            Histogram::with_opts(prometheus::HistogramOpts::new(
                "model_latency_seconds",
                "Wall-clock time of a submission up to the model reply",
            ))
        })?;

        // Already-registered collectors are fine on repeated init.
        REGISTRY.register(Box::new(req_counter)).ok();
        REGISTRY.register(Box::new(interactions)).ok();
        REGISTRY.register(Box::new(events_logged)).ok();
        REGISTRY.register(Box::new(model_latency)).ok();
        Ok(())
    })();

    if let Err(e) = registered {
        error!("Failed to initialize metrics: {}", e);
    }
}

pub fn inc_request(route: &str, status: u16) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, &status.to_string()]).inc();
    }
}

pub fn inc_interactions() {
    if let Some(counter) = INTERACTIONS.get() {
        counter.inc();
    }
}

pub fn inc_event(event_type: &str) {
    if let Some(counter) = EVENTS_LOGGED.get() {
        counter.with_label_values(&[event_type]).inc();
    }
}

pub fn observe_model_latency(seconds: f64) {
    if let Some(histogram) = MODEL_LATENCY.get() {
        histogram.observe(seconds);
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
