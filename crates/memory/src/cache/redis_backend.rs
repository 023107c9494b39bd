//! Redis cache backend.

use super::{BackendInfo, CacheBackend, CacheError};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// Minimum pause between connection attempts after a failure.
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(5);

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}

/// Redis-backed cache with a lazily established, shared connection.
///
/// The connection manager is created on first use and reused by every caller;
/// it reconnects on its own once established. If the initial connection
/// fails, further attempts are suppressed for a short cool-down so an outage
/// does not add a connect timeout to every request.
pub struct RedisCacheBackend {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl RedisCacheBackend {
    /// Parse the connection string. No network I/O happens here.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout,
            last_failure: Mutex::new(None),
        })
    }

    #[instrument(skip(self))]
    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        if let Some(conn) = self.connection.get() {
            return Ok(conn.clone());
        }

        let last_failure = *self.last_failure.lock();
        if let Some(at) = last_failure {
            if at.elapsed() < RECONNECT_COOLDOWN {
                return Err(CacheError::Unavailable(
                    "redis unreachable, waiting before reconnecting".into(),
                ));
            }
        }

        let result = self
            .connection
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.connect_timeout,
                    self.client.get_connection_manager(),
                )
                .await
                {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(CacheError::from(e)),
                    Err(_) => Err(CacheError::Unavailable(format!(
                        "connect timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))),
                }
            })
            .await;

        match result {
            Ok(conn) => {
                info!("Connected to redis");
                *self.last_failure.lock() = None;
                Ok(conn.clone())
            }
            Err(e) => {
                warn!(error = %e, "Redis connection failed");
                *self.last_failure.lock() = Some(Instant::now());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError> {
        let mut conn = self.connection().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn info(&self) -> Result<BackendInfo, CacheError> {
        let mut conn = self.connection().await?;
        let key_count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let memory: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;

        Ok(BackendInfo {
            key_count,
            memory_used: parse_info_field(&memory, "used_memory_human"),
        })
    }
}

/// Pull `field:value` out of an `INFO` section.
fn parse_info_field(info: &str, field: &str) -> Option<String> {
    info.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name == field).then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let result = RedisCacheBackend::new("not a url", Duration::from_millis(100));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_valid_url_does_not_connect() {
        assert!(RedisCacheBackend::new("redis://127.0.0.1:1", Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_parse_info_field() {
        let info = "# Memory\r\nused_memory:1024\r\nused_memory_human:1.00K\r\n";
        assert_eq!(
            parse_info_field(info, "used_memory_human"),
            Some("1.00K".to_string())
        );
        assert_eq!(parse_info_field(info, "missing"), None);
    }
}
