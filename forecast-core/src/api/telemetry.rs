//! Metrics endpoint and sampled request tracing.

use axum::{
    Router,
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::time::Instant;
use tracing::{Instrument, info, info_span};

use crate::{
    config::TelemetryConfig,
    metrics::{ForecastMetrics, PROMETHEUS_CONTENT_TYPE},
};

pub const METRICS_PATH: &str = "/metrics";

/// Router for the metrics listener. Served on its own port, never behind auth.
pub fn metrics_router(metrics: Arc<ForecastMetrics>) -> Router {
    Router::new()
        .route(METRICS_PATH, get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<ForecastMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics.render_prometheus(),
    )
}

/// Picks a fixed fraction of requests to trace, spread evenly over arrivals.
#[derive(Debug)]
pub struct RequestSampler {
    rate: f64,
    seen: AtomicU64,
    service: String,
    version: Option<String>,
}

impl RequestSampler {
    pub fn new(rate: f64, service: impl Into<String>, version: Option<String>) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            seen: AtomicU64::new(0),
            service: service.into(),
            version,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.tracing_sample_rate,
            config.tracing_service.clone(),
            config.tracing_version.clone(),
        )
    }

    /// True for the requests whose arrival crosses the next whole multiple of
    /// `1 / rate`. At 0.25 that is every fourth request.
    pub fn should_sample(&self) -> bool {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) as f64;
        ((n + 1.0) * self.rate).floor() > (n * self.rate).floor()
    }
}

/// Run sampled requests inside a `request` span and log how they ended.
pub async fn trace_requests(
    State(sampler): State<Arc<RequestSampler>>,
    request: Request,
    next: Next,
) -> Response {
    if !sampler.should_sample() {
        return next.run(request).await;
    }

    let span = info_span!(
        "request",
        service = %sampler.service,
        version = sampler.version.as_deref().unwrap_or("unknown"),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let started = Instant::now();
        let response = next.run(request).await;
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        response
    }
    .instrument(span)
    .await
}

pub fn traced(router: Router, sampler: Arc<RequestSampler>) -> Router {
    router.layer(middleware::from_fn_with_state(sampler, trace_requests))
}
