//! Cache-aside orchestration for the two forecast products.
//!
//! Each product follows the same protocol:
//!
//! ```text
//! CHECK_CACHE ── hit ──> DECODE ── ok ──> SERVE (stored bytes)
//!      │                    │
//!     miss            decode failed
//!      │                    │
//!      └────────────────────┴──> FETCH_SOURCE -> BUILD_PROMPT
//!                                     -> CALL_INFERENCE -> PARSE -> [JOIN]
//!                                     -> SERVE -> WRITE_CACHE
//! ```
//!
//! Cache errors never fail a request. Source, inference and parse errors
//! always do. One deadline bounds the lookup and generation; the write-back
//! gets whatever time is left and is abandoned, not failed, when it runs out.
//! Concurrent misses for the same product are not coalesced; the last writer
//! wins.

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheError, KeyValueCache, namespaced_key},
    config::Config,
    error::ForecastError,
    inference::{InferenceClient, InferenceRequest},
    join::join_periods,
    metrics::{CacheOp, ForecastMetrics},
    model::{BreakdownProduct, ForecastPeriod, PeriodAnnotation, SummaryProduct, SummaryReply},
    prompt::PromptTemplate,
    source::{ForecastSource, PeriodCount},
};

const SUMMARY_PERIODS: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Summary,
    Breakdown,
}

impl ProductKind {
    /// Name used in the cache key.
    pub fn cache_name(&self) -> &'static str {
        match self {
            ProductKind::Summary => "forecast-summary",
            ProductKind::Breakdown => "forecast-periods-information",
        }
    }

    pub fn period_count(&self) -> PeriodCount {
        match self {
            ProductKind::Summary => PeriodCount::first(SUMMARY_PERIODS),
            ProductKind::Breakdown => PeriodCount::All,
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cache_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// A product ready to send, with the exact JSON that was or will be cached.
#[derive(Debug, Clone)]
pub struct Served<P> {
    pub product: P,
    pub body: String,
    pub cache: CacheStatus,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub location: String,
    pub model: String,
    pub max_tokens: u32,
    pub deadline: Duration,
    pub ttl: Duration,
    pub key_prefix: String,
    pub summary_prompt: PromptTemplate,
    pub breakdown_prompt: PromptTemplate,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            location: config.source.location.clone(),
            model: config.inference.model.clone(),
            max_tokens: config.inference.max_tokens,
            deadline: config.server.handler_timeout,
            ttl: config.cache.ttl,
            key_prefix: config.cache.key_prefix.clone(),
            summary_prompt: config.prompts.summary.clone(),
            breakdown_prompt: config.prompts.breakdown.clone(),
        }
    }

    fn prompt(&self, kind: ProductKind) -> &PromptTemplate {
        match kind {
            ProductKind::Summary => &self.summary_prompt,
            ProductKind::Breakdown => &self.breakdown_prompt,
        }
    }
}

/// Serves forecast products from cache, regenerating on miss.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Debug, Clone)]
pub struct ForecastOrchestrator {
    source: Arc<dyn ForecastSource>,
    inference: Arc<dyn InferenceClient>,
    cache: Arc<dyn KeyValueCache>,
    settings: Arc<OrchestratorSettings>,
    metrics: Arc<ForecastMetrics>,
}

impl ForecastOrchestrator {
    pub fn new(
        source: Arc<dyn ForecastSource>,
        inference: Arc<dyn InferenceClient>,
        cache: Arc<dyn KeyValueCache>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source,
            inference,
            cache,
            settings: Arc::new(settings),
            metrics: Arc::new(ForecastMetrics::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Arc<ForecastMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_key(&self, kind: ProductKind) -> String {
        namespaced_key(&self.settings.key_prefix, kind.cache_name())
    }

    pub async fn summary(&self) -> Result<Served<SummaryProduct>, ForecastError> {
        self.serve(ProductKind::Summary, || self.generate_summary()).await
    }

    pub async fn breakdown(&self) -> Result<Served<BreakdownProduct>, ForecastError> {
        self.serve(ProductKind::Breakdown, || self.generate_breakdown()).await
    }

    /// Run the cache-aside protocol for one product under the request deadline.
    ///
    /// The deadline bounds the lookup and generation. A fresh product is then
    /// written back with whatever time remains; a write that fails or runs out
    /// of time is logged and the product is still returned.
    async fn serve<P, G, Fut>(
        &self,
        kind: ProductKind,
        generate: G,
    ) -> Result<Served<P>, ForecastError>
    where
        P: Serialize + DeserializeOwned,
        G: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, ForecastError>>,
    {
        self.metrics.record_request(kind);

        let limit = self.settings.deadline;
        let deadline = Instant::now() + limit;
        let key = self.cache_key(kind);

        let lookup = self.lookup_or_generate(kind, &key, generate);
        let outcome = match timeout_at(deadline, lookup).await {
            Ok(result) => result,
            Err(_) => Err(ForecastError::DeadlineExceeded(limit)),
        };

        let served = match outcome {
            Ok(served) => served,
            Err(err) => {
                self.metrics.record_failure(kind, &err);
                return Err(err);
            }
        };

        match served.cache {
            CacheStatus::Hit => self.metrics.record_hit(kind),
            CacheStatus::Miss => {
                self.metrics.record_miss(kind);
                self.write_back(kind, &key, &served.body, deadline).await;
            }
        }

        Ok(served)
    }

    async fn lookup_or_generate<P, G, Fut>(
        &self,
        kind: ProductKind,
        key: &str,
        generate: G,
    ) -> Result<Served<P>, ForecastError>
    where
        P: Serialize + DeserializeOwned,
        G: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, ForecastError>>,
    {
        match self.cache.get(key).await {
            Ok(Some(body)) => match serde_json::from_str::<P>(&body) {
                Ok(product) => {
                    info!(product = %kind, "serving forecast from cache");
                    return Ok(Served {
                        product,
                        body,
                        cache: CacheStatus::Hit,
                    });
                }
                Err(err) => {
                    warn!(
                        product = %kind,
                        %key,
                        error = %err,
                        "cached forecast is unreadable, regenerating"
                    );
                }
            },
            Ok(None) => debug!(product = %kind, "forecast not cached"),
            Err(err) => {
                self.metrics.record_cache_error(CacheOp::Read);
                error!(
                    product = %kind,
                    %key,
                    error = %err,
                    "could not get forecast from cache"
                );
            }
        }

        let product = generate().await?;
        let body = serde_json::to_string(&product).map_err(ForecastError::Marshal)?;

        Ok(Served {
            product,
            body,
            cache: CacheStatus::Miss,
        })
    }

    async fn write_back(&self, kind: ProductKind, key: &str, body: &str, deadline: Instant) {
        let write = self.cache.set(key, body, self.settings.ttl);
        let err = match timeout_at(deadline, write).await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(_) => CacheError::Timeout(self.settings.deadline),
        };

        self.metrics.record_cache_error(CacheOp::Write);
        error!(product = %kind, %key, error = %err, "could not set forecast in cache");
    }

    async fn generate_summary(&self) -> Result<SummaryProduct, ForecastError> {
        let periods = self.fetch(ProductKind::Summary).await?;
        let reply: SummaryReply = self.infer(ProductKind::Summary, &periods).await?;

        Ok(SummaryProduct {
            summary: reply.summary,
            icon: reply.icon,
            last_updated: Utc::now(),
        })
    }

    async fn generate_breakdown(&self) -> Result<BreakdownProduct, ForecastError> {
        let periods = self.fetch(ProductKind::Breakdown).await?;
        let annotations: Vec<PeriodAnnotation> =
            self.infer(ProductKind::Breakdown, &periods).await?;

        let joined = join_periods(&periods, &annotations);
        if joined.len() < periods.len() {
            debug!(
                periods = periods.len(),
                annotated = joined.len(),
                "dropping periods without annotations"
            );
        }

        Ok(BreakdownProduct {
            periods: joined,
            last_updated: Utc::now(),
        })
    }

    async fn fetch(&self, kind: ProductKind) -> Result<Vec<ForecastPeriod>, ForecastError> {
        let periods = self
            .source
            .fetch_periods(&self.settings.location, kind.period_count())
            .await?;
        Ok(periods)
    }

    async fn infer<R: DeserializeOwned>(
        &self,
        kind: ProductKind,
        periods: &[ForecastPeriod],
    ) -> Result<R, ForecastError> {
        let payload = serde_json::to_string(periods).map_err(ForecastError::Marshal)?;
        let rendered = self.settings.prompt(kind).render(&payload);

        let request = InferenceRequest {
            model: self.settings.model.clone(),
            system: rendered.system,
            prompt: rendered.user,
            max_tokens: self.settings.max_tokens,
        };

        let raw = self.inference.complete(&request).await?;
        parse_reply(&raw)
    }
}

/// Parse a model reply as exactly one JSON document of type `R`.
///
/// Surrounding whitespace is tolerated; any other text is not.
pub fn parse_reply<R: DeserializeOwned>(raw: &str) -> Result<R, ForecastError> {
    serde_json::from_str(raw.trim()).map_err(ForecastError::InferenceShapeInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{CacheError, MemoryCache},
        inference::InferenceError,
        model::Icon,
        source::SourceError,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rfc3339(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[derive(Debug)]
    struct FixedSource {
        periods: Vec<ForecastPeriod>,
        calls: AtomicUsize,
        requested: Mutex<Vec<PeriodCount>>,
    }

    impl FixedSource {
        fn new(names: &[&str]) -> Self {
            let periods = names
                .iter()
                .enumerate()
                .map(|(i, name)| ForecastPeriod {
                    name: name.to_string(),
                    start_time: rfc3339("2024-06-08T20:00:00-07:00"),
                    end_time: rfc3339("2024-06-09T06:00:00-07:00"),
                    temperature: 50 + i as i32,
                    wind_speed: "5 mph".into(),
                    wind_direction: "S".into(),
                    short_forecast: "Cloudy".into(),
                    detailed_forecast: "Cloudy.".into(),
                    is_daytime: i % 2 == 1,
                })
                .collect();
            Self {
                periods,
                calls: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ForecastSource for FixedSource {
        async fn fetch_periods(
            &self,
            _: &str,
            count: PeriodCount,
        ) -> Result<Vec<ForecastPeriod>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(count);
            Ok(count.apply(self.periods.clone()))
        }
    }

    #[derive(Debug)]
    struct ScriptedModel {
        reply: String,
        calls: AtomicUsize,
        last: Mutex<Option<InferenceRequest>>,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedModel {
        async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[derive(Debug)]
    struct DownModel;

    #[async_trait]
    impl InferenceClient for DownModel {
        async fn complete(&self, _: &InferenceRequest) -> Result<String, InferenceError> {
            Err(InferenceError::Request("connection refused".into()))
        }
    }

    #[derive(Debug, Default)]
    struct BrokenCache {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueCache for BrokenCache {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout(Duration::from_millis(500)))
        }

        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout(Duration::from_millis(500)))
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings::from_config(&Config::default())
    }

    fn orchestrator(
        source: Arc<dyn ForecastSource>,
        model: Arc<dyn InferenceClient>,
        cache: Arc<dyn KeyValueCache>,
    ) -> ForecastOrchestrator {
        ForecastOrchestrator::new(source, model, cache, settings())
    }

    const SUMMARY: &str = r#"{"summary":"Cloudy tonight, brighter Sunday.","icon":"cloud-moon"}"#;

    #[tokio::test]
    async fn summary_miss_then_hit() {
        let source = Arc::new(FixedSource::new(&["Tonight", "Sunday", "Sunday Night", "Monday"]));
        let model = Arc::new(ScriptedModel::new(SUMMARY));
        let cache = Arc::new(MemoryCache::new());
        let orch = orchestrator(source.clone(), model.clone(), cache.clone());

        let first = orch.summary().await.unwrap();
        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(first.product.icon, Some(Icon::CloudMoon));
        assert!(first.product.last_updated.timestamp() > 0);
        assert_eq!(source.requested.lock()[0], PeriodCount::first(SUMMARY_PERIODS));

        let second = orch.summary().await.unwrap();
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.body, first.body);
        assert_eq!(second.product, first.product);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn summary_prompt_carries_three_periods_and_system_context() {
        let source = Arc::new(FixedSource::new(&["Tonight", "Sunday", "Sunday Night", "Monday"]));
        let model = Arc::new(ScriptedModel::new(SUMMARY));
        let orch = orchestrator(source, model.clone(), Arc::new(MemoryCache::new()));

        orch.summary().await.unwrap();

        let request = model.last.lock().clone().unwrap();
        assert!(request.system.unwrap().contains("cloud-moon"));
        let payload = request.prompt.rsplit("input: ").next().unwrap();
        let sent: Vec<ForecastPeriod> = serde_json::from_str(payload).unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(request.max_tokens, 1024);
    }

    #[tokio::test]
    async fn breakdown_joins_partial_annotations_in_source_order() {
        let source = Arc::new(FixedSource::new(&["Tonight", "Sunday", "Sunday Night"]));
        let model = Arc::new(ScriptedModel::new(
            r#"[
                {"name":"Sunday Night","time_of_day":"night","icon":"cloud-moon",
                 "beaufort":"Light breeze"},
                {"name":"Tonight","time_of_day":"night","icon":"cloud","beaufort":"Light air"}
            ]"#,
        ));
        let orch = orchestrator(source.clone(), model, Arc::new(MemoryCache::new()));

        let served = orch.breakdown().await.unwrap();
        let names: Vec<_> = served
            .product
            .periods
            .iter()
            .map(|p| p.period.name.as_str())
            .collect();
        assert_eq!(names, ["Tonight", "Sunday Night"]);
        assert_eq!(source.requested.lock()[0], PeriodCount::All);
    }

    #[tokio::test]
    async fn products_use_separate_keys() {
        let cache = Arc::new(MemoryCache::new());
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight"])),
            Arc::new(ScriptedModel::new(SUMMARY)),
            cache.clone(),
        );

        orch.summary().await.unwrap();
        assert!(cache.get("lfia-forecast-summary").await.unwrap().is_some());
        assert!(cache.get("lfia-forecast-periods-information").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_failures_are_logged_not_returned() {
        let cache = Arc::new(BrokenCache::default());
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight", "Sunday", "Sunday Night"])),
            Arc::new(ScriptedModel::new(SUMMARY)),
            cache.clone(),
        );

        let served = orch.summary().await.unwrap();
        assert_eq!(served.cache, CacheStatus::Miss);
        assert_eq!(cache.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.writes.load(Ordering::SeqCst), 1);

        let snap = orch.metrics().snapshot();
        assert_eq!(snap.cache_read_errors, 1);
        assert_eq!(snap.cache_write_errors, 1);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_falls_through_to_regeneration() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("lfia-forecast-summary", "{\"summary\":", Duration::from_secs(60))
            .await
            .unwrap();
        let model = Arc::new(ScriptedModel::new(SUMMARY));
        let source = Arc::new(FixedSource::new(&["Tonight"]));
        let orch = orchestrator(source, model.clone(), cache.clone());

        let served = orch.summary().await.unwrap();
        assert_eq!(served.cache, CacheStatus::Miss);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let stored = cache.get("lfia-forecast-summary").await.unwrap().unwrap();
        assert_eq!(stored, served.body);
    }

    #[tokio::test]
    async fn malformed_reply_is_fatal_and_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight"])),
            Arc::new(ScriptedModel::new("Here is your summary: sunny!")),
            cache.clone(),
        );

        let err = orch.summary().await.unwrap_err();
        assert!(matches!(err, ForecastError::InferenceShapeInvalid(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn out_of_vocabulary_icon_is_a_shape_error() {
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight"])),
            Arc::new(ScriptedModel::new(
                r#"[{"name":"Tonight","time_of_day":"night","icon":"moon","beaufort":"Calm"}]"#,
            )),
            Arc::new(MemoryCache::new()),
        );

        let err = orch.breakdown().await.unwrap_err();
        assert!(matches!(err, ForecastError::InferenceShapeInvalid(_)));
    }

    #[tokio::test]
    async fn inference_outage_is_fatal() {
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight"])),
            Arc::new(DownModel),
            Arc::new(MemoryCache::new()),
        );

        let err = orch.breakdown().await.unwrap_err();
        assert!(matches!(err, ForecastError::InferenceUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_regenerated() {
        let model = Arc::new(ScriptedModel::new(SUMMARY));
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight"])),
            model.clone(),
            Arc::new(MemoryCache::new()),
        );
        let ttl = orch.settings().ttl;

        orch.summary().await.unwrap();
        tokio::time::advance(ttl - Duration::from_secs(1)).await;
        assert_eq!(orch.summary().await.unwrap().cache, CacheStatus::Hit);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(orch.summary().await.unwrap().cache, CacheStatus::Miss);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug)]
    struct StalledModel;

    #[async_trait]
    impl InferenceClient for StalledModel {
        async fn complete(&self, _: &InferenceRequest) -> Result<String, InferenceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_whole_miss_path() {
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(FixedSource::new(&["Tonight"]));
        let orch = orchestrator(source, Arc::new(StalledModel), cache.clone());

        let err = orch.summary().await.unwrap_err();
        assert!(matches!(
            err,
            ForecastError::DeadlineExceeded(d) if d == Duration::from_secs(10)
        ));
        assert!(cache.is_empty());
        assert_eq!(
            orch.metrics().snapshot().failures["forecast-summary/deadline_exceeded"],
            1
        );
    }

    #[derive(Debug, Default)]
    struct StalledWriteCache {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueCache for StalledWriteCache {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }

        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_back_still_serves_the_product() {
        let cache = Arc::new(StalledWriteCache::default());
        let orch = orchestrator(
            Arc::new(FixedSource::new(&["Tonight", "Sunday"])),
            Arc::new(ScriptedModel::new(SUMMARY)),
            cache.clone(),
        );

        let started = Instant::now();
        let served = orch.summary().await.unwrap();
        assert_eq!(served.cache, CacheStatus::Miss);
        assert_eq!(served.product.icon, Some(Icon::CloudMoon));
        assert!(started.elapsed() <= orch.settings().deadline);
        assert_eq!(cache.writes.load(Ordering::SeqCst), 1);

        let snap = orch.metrics().snapshot();
        assert_eq!(snap.cache_write_errors, 1);
        assert_eq!(snap.cache_read_errors, 0);
        assert!(snap.failures.is_empty());
    }

    #[test]
    fn parse_reply_tolerates_whitespace_only() {
        let reply: SummaryReply = parse_reply("\n  {\"summary\":\"Dry.\"}\n").unwrap();
        assert_eq!(reply.summary, "Dry.");

        let fenced = "```json\n{\"summary\":\"Dry.\"}\n```";
        assert!(parse_reply::<SummaryReply>(fenced).is_err());
    }
}
