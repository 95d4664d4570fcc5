//! HTTP surface: two GET routes, optional API key auth, problem-detail errors.
//! A separate router exposes request counters for the metrics listener.

use axum::{Router, middleware, routing::get};

use crate::{config::AuthConfig, orchestrator::ForecastOrchestrator};

pub mod auth;
pub mod handlers;
pub mod problem;
pub mod telemetry;

pub use auth::{API_KEY_HEADER, ApiKeys};
pub use problem::{PROBLEM_CONTENT_TYPE, Problem};
pub use telemetry::{METRICS_PATH, RequestSampler, metrics_router, traced};

pub const SUMMARY_PATH: &str = "/api/v1/forecast/summary";
pub const DETAILED_PATH: &str = "/api/v1/forecast/detailed";

pub fn router(orchestrator: ForecastOrchestrator, auth: &AuthConfig) -> Router {
    let mut routes = Router::new()
        .route(SUMMARY_PATH, get(handlers::forecast_summary))
        .route(DETAILED_PATH, get(handlers::forecast_detailed));

    if auth.enabled {
        let keys = ApiKeys::new(auth.api_keys.iter().cloned());
        routes = routes.route_layer(middleware::from_fn_with_state(keys, auth::require_api_key));
    }

    routes.with_state(orchestrator)
}
