//! Request counters for the forecast products, rendered in the Prometheus
//! text exposition format.

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{error::ForecastError, orchestrator::ProductKind};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Which cache round trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct ProductCounters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Process-wide counters, shared between the orchestrator and the metrics
/// listener.
#[derive(Debug, Default)]
pub struct ForecastMetrics {
    summary: ProductCounters,
    breakdown: ProductCounters,
    cache_read_errors: AtomicU64,
    cache_write_errors: AtomicU64,
    failures: Mutex<BTreeMap<(&'static str, &'static str), u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSnapshot {
    pub product: &'static str,
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub products: Vec<ProductSnapshot>,
    pub cache_read_errors: u64,
    pub cache_write_errors: u64,
    pub failures: BTreeMap<String, u64>,
}

impl ForecastMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn product(&self, kind: ProductKind) -> &ProductCounters {
        match kind {
            ProductKind::Summary => &self.summary,
            ProductKind::Breakdown => &self.breakdown,
        }
    }

    pub fn record_request(&self, kind: ProductKind) {
        self.product(kind).requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self, kind: ProductKind) {
        self.product(kind).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, kind: ProductKind) {
        self.product(kind).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self, op: CacheOp) {
        let counter = match op {
            CacheOp::Read => &self.cache_read_errors,
            CacheOp::Write => &self.cache_write_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: ProductKind, err: &ForecastError) {
        *self
            .failures
            .lock()
            .entry((kind.cache_name(), err.kind()))
            .or_default() += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let products = [ProductKind::Summary, ProductKind::Breakdown]
            .into_iter()
            .map(|kind| {
                let c = self.product(kind);
                ProductSnapshot {
                    product: kind.cache_name(),
                    requests: c.requests.load(Ordering::Relaxed),
                    hits: c.hits.load(Ordering::Relaxed),
                    misses: c.misses.load(Ordering::Relaxed),
                }
            })
            .collect();

        let failures = self
            .failures
            .lock()
            .iter()
            .map(|((product, kind), n)| (format!("{product}/{kind}"), *n))
            .collect();

        MetricsSnapshot {
            products,
            cache_read_errors: self.cache_read_errors.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
            failures,
        }
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let (s, b) = (&self.summary, &self.breakdown);
        let families = [
            (
                "forecast_requests_total",
                "Forecast requests received.",
                [&s.requests, &b.requests],
            ),
            (
                "forecast_cache_hits_total",
                "Requests served from cache.",
                [&s.hits, &b.hits],
            ),
            (
                "forecast_cache_misses_total",
                "Requests that regenerated.",
                [&s.misses, &b.misses],
            ),
        ];
        for (name, help, counters) in families {
            let _ = writeln!(out, "# HELP {name} {help}\n# TYPE {name} counter");
            let kinds = [ProductKind::Summary, ProductKind::Breakdown];
            for (kind, counter) in kinds.into_iter().zip(counters) {
                let value = counter.load(Ordering::Relaxed);
                let _ = writeln!(out, "{name}{{product=\"{kind}\"}} {value}");
            }
        }

        let _ = writeln!(
            out,
            "# HELP forecast_cache_errors_total Cache round trips that failed.\n\
             # TYPE forecast_cache_errors_total counter\n\
             forecast_cache_errors_total{{op=\"read\"}} {}\n\
             forecast_cache_errors_total{{op=\"write\"}} {}",
            self.cache_read_errors.load(Ordering::Relaxed),
            self.cache_write_errors.load(Ordering::Relaxed),
        );

        let _ = writeln!(
            out,
            "# HELP forecast_failures_total Requests that ended in an error.\n\
             # TYPE forecast_failures_total counter"
        );
        for ((product, kind), n) in self.failures.lock().iter() {
            let _ = writeln!(
                out,
                "forecast_failures_total{{product=\"{product}\",kind=\"{kind}\"}} {n}"
            );
        }

        out
    }
}
