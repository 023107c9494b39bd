//! TTL key-value cache over an external service.
//!
//! [`CacheStore`] never surfaces a failure: when the backing service is
//! unreachable, slow or misbehaving every operation degrades to a no-op
//! (`get` → `None`, `set`/`delete`/`exists` → `false`, `clear_pattern` → `0`)
//! and the failure is logged and counted.
//!
//! # Key namespaces
//!
//! - `emb:{model}:{hash}` - embedding vectors
//! - `session:{user_id}:{session_id}` - session turn windows
//! - `search:{user_id}:{hash}` - note-search results
//!
//! Caller-supplied ids are passed through [`key_segment`] first, so they can
//! contain neither the `:` separator nor glob metacharacters.

mod memory;
mod redis_backend;

pub use self::memory::MemoryCacheBackend;
pub use self::redis_backend::RedisCacheBackend;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Keys fetched per page when clearing by pattern.
const SCAN_PAGE_SIZE: usize = 100;

/// Percent-encode an id for use as one segment of a cache key.
///
/// Only ASCII alphanumerics and `-_.~` survive unencoded.
pub fn key_segment(id: &str) -> Cow<'_, str> {
    urlencoding::encode(id)
}

/// Errors raised by cache backends. They never escape [`CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Invalid cache configuration: {0}")]
    Config(String),

    #[error("Cache value (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Size information reported by a backend.
#[derive(Debug, Clone, Default)]
pub struct BackendInfo {
    pub key_count: u64,
    pub memory_used: Option<String>,
}

/// A raw string key-value service with TTLs and cursor-based key scanning.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for stats.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// One page of keys matching a glob pattern. A returned cursor of `0`
    /// means the scan is complete.
    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError>;

    /// Returns the number of keys removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError>;

    async fn info(&self) -> Result<BackendInfo, CacheError>;
}

/// Cache statistics exposed by health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub available: bool,
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    /// Hit rate in percent over all reads
    pub hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<String>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Failure-tolerant cache facade.
pub struct CacheStore {
    backend: Option<Arc<dyn CacheBackend>>,
    timeout: Duration,
    counters: CacheCounters,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            timeout: Duration::from_secs(5),
            counters: CacheCounters::default(),
        }
    }

    /// A cache with no backend; every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: Duration::from_secs(5),
            counters: CacheCounters::default(),
        }
    }

    /// Bound every backend round trip by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Fetch and decode a JSON value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Fetch a raw string value.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        let value = self.guarded("get", key, backend.get(key)).await.flatten();

        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Encode a value as JSON and store it with a TTL.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to encode cache value");
                return false;
            }
        };

        // Backends reject zero expiries
        let ttl = ttl.max(Duration::from_secs(1));
        let stored = self
            .guarded("set", key, backend.set_ex(key, encoded, ttl))
            .await
            .is_some();

        if stored {
            self.counters.writes.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        self.guarded("delete", key, backend.delete(key))
            .await
            .unwrap_or(false)
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        self.guarded("exists", key, backend.exists(key))
            .await
            .unwrap_or(false)
    }

    /// Delete every key matching a glob pattern, one page at a time.
    ///
    /// Returns the number of keys deleted before completion or the first failure.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        let mut cursor = 0u64;
        let mut deleted = 0u64;

        loop {
            let Some((next, keys)) = self
                .guarded("scan", pattern, backend.scan(pattern, cursor, SCAN_PAGE_SIZE))
                .await
            else {
                break;
            };

            if !keys.is_empty() {
                match self
                    .guarded("delete_many", pattern, backend.delete_many(&keys))
                    .await
                {
                    Some(n) => deleted += n,
                    None => break,
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, deleted, "Cleared cache keys by pattern");
        deleted
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        let hit_rate = if reads == 0 {
            0.0
        } else {
            hits as f64 * 100.0 / reads as f64
        };

        let (backend_name, info) = match self.backend.as_ref() {
            Some(backend) => (
                backend.name(),
                self.guarded("info", "*", backend.info()).await,
            ),
            None => ("disabled", None),
        };

        CacheStats {
            enabled: self.backend.is_some(),
            available: info.is_some(),
            backend: backend_name,
            hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            hit_rate,
            key_count: info.as_ref().map(|i| i.key_count),
            memory_used: info.and_then(|i| i.memory_used),
        }
    }

    /// Run a backend call under the timeout, absorbing any failure.
    async fn guarded<T, F>(&self, op: &'static str, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(op, key = %key, error = %e, "Cache operation failed, continuing without cache");
                None
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(op, key = %key, timeout_ms = self.timeout.as_millis() as u64, "Cache operation timed out");
                None
            }
        }
    }
}
