use axum::{
    extract::{OriginalUri, State},
    http::{HeaderValue, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use tracing::error;

use super::problem::Problem;
use crate::{error::ForecastError, orchestrator::ForecastOrchestrator};

/// `GET /api/v1/forecast/summary`
pub async fn forecast_summary(
    State(orchestrator): State<ForecastOrchestrator>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, Problem> {
    let served = orchestrator
        .summary()
        .await
        .map_err(|err| failure(&err, uri.path()))?;
    Ok(json(served.body))
}

/// `GET /api/v1/forecast/detailed`
pub async fn forecast_detailed(
    State(orchestrator): State<ForecastOrchestrator>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, Problem> {
    let served = orchestrator
        .breakdown()
        .await
        .map_err(|err| failure(&err, uri.path()))?;
    Ok(json(served.body))
}

fn failure(err: &ForecastError, path: &str) -> Problem {
    error!(path, error = %err, "{}", err.title());
    Problem::from_error(err, path)
}

fn json(body: String) -> Response {
    ([(CONTENT_TYPE, HeaderValue::from_static("application/json"))], body).into_response()
}
