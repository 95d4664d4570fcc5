use async_trait::async_trait;
use std::{fmt::Debug, num::NonZeroUsize};
use thiserror::Error;

use crate::model::ForecastPeriod;

pub mod nws;

pub use nws::NwsClient;

/// How many leading periods a caller wants from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodCount {
    All,
    First(NonZeroUsize),
}

impl PeriodCount {
    pub const fn first(n: NonZeroUsize) -> Self {
        PeriodCount::First(n)
    }

    /// Keep the leading periods. Asking for more than exist yields all of them.
    pub fn apply<T>(self, mut items: Vec<T>) -> Vec<T> {
        if let PeriodCount::First(n) = self {
            items.truncate(n.get());
        }
        items
    }
}

impl std::fmt::Display for PeriodCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodCount::All => f.write_str("all"),
            PeriodCount::First(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("could not decode forecast from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Upstream provider of forecast periods.
#[async_trait]
pub trait ForecastSource: Send + Sync + Debug {
    /// Fetch periods for `location` in chronological order, keeping `count` of them.
    async fn fetch_periods(
        &self,
        location: &str,
        count: PeriodCount,
    ) -> Result<Vec<ForecastPeriod>, SourceError>;
}
