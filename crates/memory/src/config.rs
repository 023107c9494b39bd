//! Configuration for the context engine.
//!
//! Settings come from a TOML file (every field optional) and are then
//! overridden by `PARLEY_*` environment variables.

use parley_common::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Which vector-similarity engine backs the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Qdrant,
    /// In-process brute-force index (development and tests)
    Memory,
}

/// Which key-value service backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    /// In-process map (single-node deployments and tests)
    Memory,
    /// No cache at all; every operation is a no-op
    Disabled,
}

/// Configuration for the memory system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedding model name (`hashing` selects the offline encoder)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension `D`
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    #[serde(default = "default_vector_backend")]
    pub vector_backend: VectorBackendKind,

    /// Qdrant gRPC endpoint
    #[serde(default = "default_vector_url")]
    pub vector_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_api_key: Option<String>,

    #[serde(default = "default_cache_backend")]
    pub cache_backend: CacheBackendKind,

    /// Redis connection string
    #[serde(default = "default_cache_url")]
    pub cache_url: String,

    /// Timeout for a single cache or vector-index round trip
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Session window size `W`
    #[serde(default = "default_session_window")]
    pub session_window: usize,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_embedding_cache_ttl_secs")]
    pub embedding_cache_ttl_secs: u64,

    /// TTL for cached note-search results
    #[serde(default = "default_result_cache_ttl_secs")]
    pub result_cache_ttl_secs: u64,

    /// Maximum relevant-history turns retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score for retrieval
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Score added per matched keyword in hybrid search
    #[serde(default = "default_keyword_boost")]
    pub keyword_boost: f32,

    /// Candidate pool multiplier for hybrid search
    #[serde(default = "default_hybrid_candidate_multiplier")]
    pub hybrid_candidate_multiplier: usize,

    #[serde(default = "default_conversations_collection")]
    pub conversations_collection: String,

    #[serde(default = "default_notes_collection")]
    pub notes_collection: String,

    /// Append-only metrics log; in-memory ring when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<PathBuf>,

    /// Capacity of the in-memory metrics ring
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,

    /// Size at which the metrics log is rotated
    #[serde(default = "default_metrics_rotate_bytes")]
    pub metrics_rotate_bytes: u64,
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".into()
}

fn default_embedding_dim() -> usize {
    384 // MiniLM dimension
}

fn default_vector_backend() -> VectorBackendKind {
    VectorBackendKind::Qdrant
}

fn default_vector_url() -> String {
    "http://localhost:6334".into()
}

fn default_cache_backend() -> CacheBackendKind {
    CacheBackendKind::Redis
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_backend_timeout_ms() -> u64 {
    5000
}

fn default_session_window() -> usize {
    10
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_embedding_cache_ttl_secs() -> u64 {
    3600
}

fn default_result_cache_ttl_secs() -> u64 {
    300
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.5
}

fn default_keyword_boost() -> f32 {
    0.15
}

fn default_hybrid_candidate_multiplier() -> usize {
    3
}

fn default_conversations_collection() -> String {
    "conversations".into()
}

fn default_notes_collection() -> String {
    "notes".into()
}

fn default_metrics_capacity() -> usize {
    10_000
}

fn default_metrics_rotate_bytes() -> u64 {
    crate::analytics::DEFAULT_METRICS_ROTATE_BYTES
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            vector_backend: default_vector_backend(),
            vector_url: default_vector_url(),
            vector_api_key: None,
            cache_backend: default_cache_backend(),
            cache_url: default_cache_url(),
            backend_timeout_ms: default_backend_timeout_ms(),
            session_window: default_session_window(),
            session_ttl_secs: default_session_ttl_secs(),
            embedding_cache_ttl_secs: default_embedding_cache_ttl_secs(),
            result_cache_ttl_secs: default_result_cache_ttl_secs(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            keyword_boost: default_keyword_boost(),
            hybrid_candidate_multiplier: default_hybrid_candidate_multiplier(),
            conversations_collection: default_conversations_collection(),
            notes_collection: default_notes_collection(),
            metrics_path: None,
            metrics_capacity: default_metrics_capacity(),
            metrics_rotate_bytes: default_metrics_rotate_bytes(),
        }
    }
}

impl MemoryConfig {
    /// Fully in-process configuration: hashing encoder, memory index and cache.
    pub fn offline() -> Self {
        Self {
            embedding_model: "hashing".into(),
            vector_backend: VectorBackendKind::Memory,
            cache_backend: CacheBackendKind::Memory,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let config: Self = toml::from_str(&content)?;

        if config.vector_api_key.is_some() {
            warn!(
                "Vector index API key found in config file '{}'. \
                 Prefer the PARLEY_VECTOR_API_KEY environment variable.",
                path.display()
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `PARLEY_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PARLEY_EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = lookup("PARLEY_EMBEDDING_DIM") {
            self.embedding_dim = parse_var("PARLEY_EMBEDDING_DIM", &v)?;
        }
        if let Some(v) = lookup("PARLEY_VECTOR_BACKEND") {
            self.vector_backend = match v.to_ascii_lowercase().as_str() {
                "qdrant" => VectorBackendKind::Qdrant,
                "memory" => VectorBackendKind::Memory,
                other => {
                    return Err(ParleyError::Config(format!(
                        "PARLEY_VECTOR_BACKEND: unknown backend '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = lookup("PARLEY_VECTOR_URL") {
            self.vector_url = v;
        }
        if let Some(v) = lookup("PARLEY_VECTOR_API_KEY") {
            self.vector_api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("PARLEY_CACHE_BACKEND") {
            self.cache_backend = match v.to_ascii_lowercase().as_str() {
                "redis" => CacheBackendKind::Redis,
                "memory" => CacheBackendKind::Memory,
                "disabled" | "none" => CacheBackendKind::Disabled,
                other => {
                    return Err(ParleyError::Config(format!(
                        "PARLEY_CACHE_BACKEND: unknown backend '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = lookup("PARLEY_CACHE_URL") {
            self.cache_url = v;
        }
        if let Some(v) = lookup("PARLEY_SESSION_WINDOW") {
            self.session_window = parse_var("PARLEY_SESSION_WINDOW", &v)?;
        }
        if let Some(v) = lookup("PARLEY_SESSION_TTL_SECS") {
            self.session_ttl_secs = parse_var("PARLEY_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_EMBEDDING_CACHE_TTL_SECS") {
            self.embedding_cache_ttl_secs = parse_var("PARLEY_EMBEDDING_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_RESULT_CACHE_TTL_SECS") {
            self.result_cache_ttl_secs = parse_var("PARLEY_RESULT_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_TOP_K") {
            self.top_k = parse_var("PARLEY_TOP_K", &v)?;
        }
        if let Some(v) = lookup("PARLEY_MIN_SCORE") {
            self.min_score = parse_var("PARLEY_MIN_SCORE", &v)?;
        }
        if let Some(v) = lookup("PARLEY_KEYWORD_BOOST") {
            self.keyword_boost = parse_var("PARLEY_KEYWORD_BOOST", &v)?;
        }
        if let Some(v) = lookup("PARLEY_METRICS_PATH") {
            self.metrics_path = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }

        debug!(config = ?self, "Applied environment overrides");
        self.validate()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(ParleyError::Config("embedding_dim must be positive".into()));
        }
        if self.session_window == 0 {
            return Err(ParleyError::Config("session_window must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(ParleyError::Config(format!(
                "min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        if self.keyword_boost < 0.0 {
            return Err(ParleyError::Config("keyword_boost must not be negative".into()));
        }
        if self.hybrid_candidate_multiplier == 0 {
            return Err(ParleyError::Config(
                "hybrid_candidate_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn embedding_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_cache_ttl_secs)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ParleyError::Config(format!("{name}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.session_window, 10);
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.vector_backend, VectorBackendKind::Qdrant);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
embedding_model = "hashing"
session_window = 4
vector_backend = "memory"
cache_backend = "disabled"
"#
        )
        .unwrap();

        let config = MemoryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.embedding_model, "hashing");
        assert_eq!(config.session_window, 4);
        assert_eq!(config.vector_backend, VectorBackendKind::Memory);
        assert_eq!(config.cache_backend, CacheBackendKind::Disabled);
        // Untouched fields keep their defaults
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PARLEY_SESSION_WINDOW", "3"),
            ("PARLEY_MIN_SCORE", "0.25"),
            ("PARLEY_CACHE_BACKEND", "memory"),
            ("PARLEY_VECTOR_URL", "http://qdrant:6334"),
        ]
        .into_iter()
        .collect();

        let mut config = MemoryConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.session_window, 3);
        assert!((config.min_score - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.cache_backend, CacheBackendKind::Memory);
        assert_eq!(config.vector_url, "http://qdrant:6334");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = MemoryConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "PARLEY_SESSION_WINDOW").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ParleyError::Config(_))));

        let mut config = MemoryConfig::default();
        let result =
            config.apply_overrides(|k| (k == "PARLEY_MIN_SCORE").then(|| "1.5".to_string()));
        assert!(result.is_err());
    }
}
