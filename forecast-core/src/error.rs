//! Error kinds that can end a forecast request.
//!
//! Cache failures are absent: the orchestrator logs and counts them, and
//! they never reach a client.

use std::time::Duration;

use thiserror::Error;

use crate::{inference::InferenceError, source::SourceError};

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("inference unavailable: {0}")]
    InferenceUnavailable(#[from] InferenceError),

    #[error("inference reply did not match the expected shape: {0}")]
    InferenceShapeInvalid(#[source] serde_json::Error),

    #[error("failed to serialize forecast: {0}")]
    Marshal(#[source] serde_json::Error),

    #[error("forecast request exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl ForecastError {
    /// Short, stable title used in problem-detail bodies.
    pub fn title(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "failed to get simplified forecast periods",
            Self::InferenceUnavailable(_) => "failed to get forecast inference",
            Self::InferenceShapeInvalid(_) => "failed to parse forecast inference",
            Self::Marshal(_) => "failed to marshal forecast",
            Self::DeadlineExceeded(_) => "forecast request timed out",
        }
    }

    /// Stable snake_case label for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::InferenceUnavailable(_) => "inference_unavailable",
            Self::InferenceShapeInvalid(_) => "inference_shape_invalid",
            Self::Marshal(_) => "marshal",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }

    /// HTTP status code the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DeadlineExceeded(_) => 504,
            _ => 500,
        }
    }
}

/// Cut an upstream error body down to something fit for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 203);

        assert_eq!(truncate_body("overloaded"), "overloaded");
        assert_eq!(truncate_body(&"x".repeat(200)), "x".repeat(200));
    }

    #[test]
    fn shape_and_availability_errors_are_distinguishable() {
        let shape = ForecastError::InferenceShapeInvalid(
            serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
        );
        let unavailable =
            ForecastError::InferenceUnavailable(InferenceError::Request("connection reset".into()));

        assert_ne!(shape.title(), unavailable.title());
        assert_ne!(shape.kind(), unavailable.kind());
        assert_eq!(shape.status_code(), 500);
        assert_eq!(unavailable.status_code(), 500);
    }

    #[test]
    fn deadline_maps_to_gateway_timeout() {
        let err = ForecastError::DeadlineExceeded(Duration::from_secs(10));
        assert_eq!(err.status_code(), 504);
        assert!(err.to_string().contains("10s"));
    }
}
