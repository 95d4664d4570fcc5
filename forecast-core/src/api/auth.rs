//! API key authentication.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

use super::problem::Problem;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The set of accepted keys. Empty means nothing is accepted.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys(Arc<HashSet<String>>);

impl ApiKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(keys.into_iter().map(Into::into).collect()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

/// Reject requests whose `X-API-Key` header is not a configured key.
pub async fn require_api_key(
    State(keys): State<ApiKeys>,
    request: Request,
    next: Next,
) -> Result<Response, Problem> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !keys.contains(presented) {
        debug!(path = request.uri().path(), "rejected request with invalid api key");
        return Err(Problem::invalid_api_key(presented, request.uri().path()));
    }

    Ok(next.run(request).await)
}
