use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryCache;
pub use redis_store::RedisCache;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache did not answer within {0:?}")]
    Timeout(Duration),

    #[error("cache ttl must be greater than zero")]
    ZeroTtl,
}

/// String key-value store with per-entry expiry.
///
/// Expired entries must read as absent. TTLs are fixed at write time and are
/// not refreshed by reads.
#[async_trait]
pub trait KeyValueCache: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// `<prefix>-<name>`, the key layout shared with other readers of the store.
pub fn namespaced_key(prefix: &str, name: &str) -> String {
    format!("{prefix}-{name}")
}
