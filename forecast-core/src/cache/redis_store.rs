use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisResult, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;

use crate::config::CacheConfig;

use super::{CacheError, KeyValueCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redis-protocol store (Redis, Dragonfly) behind a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect and ping. Startup fails if the store does not answer.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let client = Client::open(config.url()?).context("Invalid cache connection settings")?;

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow!("Timed out connecting to cache after {CONNECT_TIMEOUT:?}"))?
            .context("Could not connect to cache")?;

        let mut ping_cmd = redis::cmd("PING");
        let ping = ping_cmd.query_async(&mut conn);
        let _: String = tokio::time::timeout(CONNECT_TIMEOUT, ping)
            .await
            .map_err(|_| anyhow!("Timed out pinging cache after {CONNECT_TIMEOUT:?}"))?
            .context("Could not ping cache")?;

        info!(
            host = config.host.as_deref().unwrap_or_default(),
            port = config.port,
            "connected to cache"
        );

        Ok(Self {
            conn,
            command_timeout: config.timeout,
        })
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        within(self.command_timeout, conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }

        // PSETEX keeps sub-second precision; anything under 1ms still lives 1ms.
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        within(self.command_timeout, conn.pset_ex(key, value, millis)).await
    }
}

/// The connection manager reconnects but never gives up on a command, so
/// every round trip carries its own bound.
async fn within<T, F>(limit: Duration, command: F) -> Result<T, CacheError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(limit, command).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CacheError::Timeout(limit)),
    }
}
