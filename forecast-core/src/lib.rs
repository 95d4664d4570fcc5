//! Core library for the `forecast-server` gateway.
//!
//! This crate defines:
//! - Configuration loading (defaults, TOML file, environment)
//! - The upstream forecast source and the language-model client
//! - Prompt assembly and the joining of model annotations onto periods
//! - A TTL key-value cache and the cache-aside orchestrator built on it
//! - Request counters and the axum routers that serve products and metrics
//!
//! It is used by `forecast-server`, but the orchestrator can be embedded
//! behind any other transport.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod inference;
pub mod join;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod source;

pub use cache::{KeyValueCache, MemoryCache, RedisCache};
pub use config::Config;
pub use error::ForecastError;
pub use inference::{AnthropicClient, InferenceClient};
pub use model::{BreakdownProduct, SummaryProduct};
pub use orchestrator::{ForecastOrchestrator, OrchestratorSettings};
pub use source::{ForecastSource, NwsClient};
