//! Embedding generation for vector search.
//!
//! [`EmbeddingGenerator`] turns text into L2-normalised vectors so cosine
//! similarity reduces to a dot product. The model is loaded on the first real
//! call, never at construction, and shared by every caller afterwards. A
//! failed load leaves nothing behind, so the next call simply retries.
//!
//! Vectors are cached under `emb:{model}:{sha256}`; a cache hit skips the
//! model entirely. Only fully computed vectors are ever written to the cache.

use crate::cache::CacheStore;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parley_common::ParleyError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info, instrument};

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Cannot embed empty or whitespace-only text")]
    EmptyInput,

    #[error("Failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("Failed to generate embeddings: {0}")]
    Generation(String),

    #[error("Model produced {actual}-dim vectors, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl From<EmbeddingError> for ParleyError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::EmptyInput => ParleyError::EmptyInput("text to embed".into()),
            EmbeddingError::ModelLoad(msg) => ParleyError::ModelLoad(msg),
            other => ParleyError::Embedding(other.to_string()),
        }
    }
}

/// A loaded model that encodes a batch of texts. Calls are synchronous and
/// run on the blocking pool.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Knows how to load a [`TextEncoder`] and what it produces.
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Load the model. Potentially slow (may download weights).
    fn load(&self) -> Result<Arc<dyn TextEncoder>, EmbeddingError>;
}

/// Build the provider named by the configuration.
///
/// `hashing` selects the offline [`HashingProvider`]; anything else must be a
/// fastembed model whose dimension matches `expected_dim`.
pub fn provider_from_config(
    model_name: &str,
    expected_dim: usize,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    if model_name.eq_ignore_ascii_case("hashing") {
        return Ok(Arc::new(HashingProvider::new(expected_dim)));
    }
    Ok(Arc::new(FastEmbedProvider::from_config(model_name, expected_dim)?))
}

// ============================================================================
// fastembed
// ============================================================================

/// Known fastembed models: (config name, enum name, model, dimension).
const FASTEMBED_MODELS: &[(&str, &str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", "AllMiniLML6V2", EmbeddingModel::AllMiniLML6V2, 384),
    ("all-MiniLM-L6-v2-q", "AllMiniLML6V2Q", EmbeddingModel::AllMiniLML6V2Q, 384),
    ("all-MiniLM-L12-v2", "AllMiniLML12V2", EmbeddingModel::AllMiniLML12V2, 384),
    ("all-MiniLM-L12-v2-q", "AllMiniLML12V2Q", EmbeddingModel::AllMiniLML12V2Q, 384),
    ("bge-small-en-v1.5", "BGESmallENV15", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", "BGEBaseENV15", EmbeddingModel::BGEBaseENV15, 768),
    ("bge-large-en-v1.5", "BGELargeENV15", EmbeddingModel::BGELargeENV15, 1024),
    ("nomic-embed-text-v1", "NomicEmbedTextV1", EmbeddingModel::NomicEmbedTextV1, 768),
    ("nomic-embed-text-v1.5", "NomicEmbedTextV15", EmbeddingModel::NomicEmbedTextV15, 768),
    ("multilingual-e5-small", "MultilingualE5Small", EmbeddingModel::MultilingualE5Small, 384),
    ("multilingual-e5-base", "MultilingualE5Base", EmbeddingModel::MultilingualE5Base, 768),
    ("multilingual-e5-large", "MultilingualE5Large", EmbeddingModel::MultilingualE5Large, 1024),
];

/// Local ONNX models through fastembed.
pub struct FastEmbedProvider {
    name: String,
    model: EmbeddingModel,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Look up a model by its config or enum name.
    pub fn from_model_str(model_name: &str) -> Result<Self, EmbeddingError> {
        FASTEMBED_MODELS
            .iter()
            .find(|(name, alias, _, _)| *name == model_name || *alias == model_name)
            .map(|(name, _, model, dimension)| Self {
                name: (*name).to_string(),
                model: model.clone(),
                dimension: *dimension,
            })
            .ok_or_else(|| {
                EmbeddingError::ModelLoad(format!(
                    "Unknown embedding model: '{}'. Supported models: all-MiniLM-L6-v2, bge-base-en-v1.5, nomic-embed-text-v1.5, etc.",
                    model_name
                ))
            })
    }

    /// Look up a model and check that it produces `expected_dim` vectors.
    pub fn from_config(model_name: &str, expected_dim: usize) -> Result<Self, EmbeddingError> {
        let provider = Self::from_model_str(model_name)?;
        if provider.dimension != expected_dim {
            return Err(EmbeddingError::ModelLoad(format!(
                "Dimension mismatch: model '{}' produces {}-dim vectors but config specifies {}",
                model_name, provider.dimension, expected_dim
            )));
        }
        Ok(provider)
    }
}

struct FastEmbedEncoder(TextEmbedding);

impl TextEncoder for FastEmbedEncoder {
    fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.0
            .embed(texts, None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn load(&self) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        let mut options = InitOptions::new(self.model.clone());
        options.show_download_progress = false;
        let model =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
        Ok(Arc::new(FastEmbedEncoder(model)))
    }
}

// ============================================================================
// Feature hashing
// ============================================================================

/// Deterministic bag-of-words feature hashing.
///
/// Needs no model download. Texts sharing words get similar vectors, which is
/// enough for development setups and tests, not for production relevance.
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn load(&self) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        Ok(Arc::new(HashingEncoder {
            dimension: self.dimension,
        }))
    }
}

struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket =
                u64::from_le_bytes([digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7]]);
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[(bucket % self.dimension as u64) as usize] += sign;
        }
        vector
    }
}

impl TextEncoder for HashingEncoder {
    fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Scale a vector to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// An embedding plus whether it was served from the cache.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub cached: bool,
}

/// Embedding counters exposed by stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStats {
    pub model: String,
    pub dimension: usize,
    pub model_loaded: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Number of times the model itself was invoked
    pub model_invocations: u64,
    pub texts_encoded: u64,
}

#[derive(Debug, Default)]
struct EmbeddingCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    model_invocations: AtomicU64,
    texts_encoded: AtomicU64,
}

/// Cached, lazily loaded embedding service.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    model: OnceCell<Arc<dyn TextEncoder>>,
    cache: Arc<CacheStore>,
    cache_ttl: Duration,
    counters: EmbeddingCounters,
}

impl EmbeddingGenerator {
    /// The model is not loaded until the first embedding call.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<CacheStore>, cache_ttl: Duration) -> Self {
        Self {
            provider,
            model: OnceCell::new(),
            cache,
            cache_ttl,
            counters: EmbeddingCounters::default(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Deterministic cache key for `text` under the current model.
    pub fn cache_key(&self, text: &str) -> String {
        let model = self.provider.model_name();
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("emb:{}:{:x}", model, hasher.finalize())
    }

    /// Load the model if nobody has yet.
    ///
    /// Concurrent callers wait for one load. A failed or abandoned load leaves
    /// the cell empty so a later call can retry.
    async fn model(&self) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let provider = self.provider.clone();
                info!(model = provider.model_name(), "Loading embedding model");

                let model = task::spawn_blocking(move || provider.load())
                    .await
                    .map_err(|e| EmbeddingError::ModelLoad(format!("load task failed: {e}")))??;

                info!(
                    model = self.provider.model_name(),
                    dimension = self.provider.dimension(),
                    "Embedding model loaded"
                );
                Ok::<_, EmbeddingError>(model)
            })
            .await?;
        Ok(model.clone())
    }

    /// Pre-load the model so the first request does not pay for it.
    #[instrument(skip(self))]
    pub async fn warmup(&self) -> Result<(), EmbeddingError> {
        if self.is_loaded() {
            debug!("Model already initialized, skipping warmup");
            return Ok(());
        }
        self.model().await.map(|_| ())
    }

    /// Generate an embedding for text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_tracked(text).await?.vector)
    }

    /// Like [`embed`](Self::embed), also reporting whether the cache served it.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn embed_tracked(&self, text: &str) -> Result<Embedded, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let key = self.cache_key(text);
        if let Some(vector) = self.cached_vector(&key).await {
            return Ok(Embedded {
                vector,
                cached: true,
            });
        }

        let mut vectors = self.encode(vec![text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("Empty embedding result".into()))?;

        self.cache.set(&key, &vector, self.cache_ttl).await;
        Ok(Embedded {
            vector,
            cached: false,
        })
    }

    /// Generate embeddings for multiple texts, preserving input order.
    ///
    /// Only cache misses reach the model, in a single batched call.
    #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            match self.cached_vector(&key).await {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    misses.push((i, key));
                }
            }
        }

        if !misses.is_empty() {
            let inputs: Vec<String> = misses.iter().map(|(i, _)| texts[*i].to_string()).collect();
            let vectors = self.encode(inputs).await?;
            if vectors.len() != misses.len() {
                return Err(EmbeddingError::Generation(format!(
                    "model returned {} vectors for {} texts",
                    vectors.len(),
                    misses.len()
                )));
            }

            for ((i, key), vector) in misses.into_iter().zip(vectors) {
                self.cache.set(&key, &vector, self.cache_ttl).await;
                results[i] = Some(vector);
            }
        }

        debug!(batch_size = texts.len(), "Generated batch embeddings");

        results
            .into_iter()
            .map(|v| v.ok_or_else(|| EmbeddingError::Generation("missing batch slot".into())))
            .collect()
    }

    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            model: self.provider.model_name().to_string(),
            dimension: self.provider.dimension(),
            model_loaded: self.is_loaded(),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            model_invocations: self.counters.model_invocations.load(Ordering::Relaxed),
            texts_encoded: self.counters.texts_encoded.load(Ordering::Relaxed),
        }
    }

    async fn cached_vector(&self, key: &str) -> Option<Vec<f32>> {
        let cached: Option<Vec<f32>> = self
            .cache
            .get::<Vec<f32>>(key)
            .await
            .filter(|v| v.len() == self.provider.dimension());

        if cached.is_some() {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        cached
    }

    /// Run the model on the blocking pool and normalise its output.
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model().await?;
        let count = texts.len() as u64;
        let expected = self.provider.dimension();

        self.counters.model_invocations.fetch_add(1, Ordering::Relaxed);

        // fastembed is synchronous
        let mut vectors = task::spawn_blocking(move || model.encode(texts)).await??;

        for vector in vectors.iter_mut() {
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            l2_normalize(vector);
        }

        self.counters.texts_encoded.fetch_add(count, Ordering::Relaxed);
        debug!(
            count,
            dimension = expected,
            "Generated embeddings"
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use std::sync::atomic::AtomicBool;

    /// Provider whose loads can be made to fail and whose model calls are counted.
    struct FlakyProvider {
        fail_load: AtomicBool,
        loads: AtomicU64,
        encoded: Arc<AtomicU64>,
    }

    impl FlakyProvider {
        fn new(fail_load: bool) -> Self {
            Self {
                fail_load: AtomicBool::new(fail_load),
                loads: AtomicU64::new(0),
                encoded: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    struct CountingEncoder {
        inner: Arc<dyn TextEncoder>,
        encoded: Arc<AtomicU64>,
    }

    impl TextEncoder for CountingEncoder {
        fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.encoded.fetch_add(texts.len() as u64, Ordering::SeqCst);
            self.inner.encode(texts)
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            32
        }

        fn load(&self) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load.load(Ordering::SeqCst) {
                return Err(EmbeddingError::ModelLoad("weights missing".into()));
            }
            Ok(Arc::new(CountingEncoder {
                inner: HashingProvider::new(32).load()?,
                encoded: self.encoded.clone(),
            }))
        }
    }

    fn cached_generator(provider: Arc<dyn EmbeddingProvider>) -> EmbeddingGenerator {
        let cache = Arc::new(CacheStore::new(Arc::new(MemoryCacheBackend::new())));
        EmbeddingGenerator::new(provider, cache, Duration::from_secs(60))
    }

    #[test]
    fn test_from_model_str() {
        assert!(FastEmbedProvider::from_model_str("all-MiniLM-L6-v2").is_ok());
        assert!(FastEmbedProvider::from_model_str("AllMiniLML6V2").is_ok());
        assert!(FastEmbedProvider::from_model_str("unknown-model").is_err());
    }

    #[test]
    fn test_from_config_dimension_mismatch() {
        // MiniLM is 384-dim, so 512 should fail
        assert!(FastEmbedProvider::from_config("all-MiniLM-L6-v2", 512).is_err());
        assert!(FastEmbedProvider::from_config("all-MiniLM-L6-v2", 384).is_ok());
    }

    #[test]
    fn test_provider_from_config_hashing() {
        let provider = provider_from_config("hashing", 64).unwrap();
        assert_eq!(provider.model_name(), "hashing");
        assert_eq!(provider.dimension(), 64);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_model_is_loaded_lazily() {
        let provider = Arc::new(FlakyProvider::new(false));
        let generator = cached_generator(provider.clone());

        assert!(!generator.is_loaded());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 0);

        generator.embed("hello world").await.unwrap();
        generator.embed("another text").await.unwrap();

        assert!(generator.is_loaded());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let generator = cached_generator(Arc::new(HashingProvider::new(16)));
        assert!(matches!(
            generator.embed("   \n\t").await,
            Err(EmbeddingError::EmptyInput)
        ));
        assert!(matches!(
            generator.embed_batch(&["ok", ""]).await,
            Err(EmbeddingError::EmptyInput)
        ));
        // Rejected before any model load
        assert!(!generator.is_loaded());
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let generator = cached_generator(Arc::new(HashingProvider::new(64)));
        let v = generator.embed("cancel my netflix subscription").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let provider = Arc::new(FlakyProvider::new(false));
        let generator = cached_generator(provider.clone());

        let first = generator.embed_tracked("same text").await.unwrap();
        let second = generator.embed_tracked("same text").await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.vector, second.vector);
        assert_eq!(provider.encoded.load(Ordering::SeqCst), 1);

        let stats = generator.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.model_invocations, 1);
    }

    #[tokio::test]
    async fn test_batch_only_encodes_misses_in_order() {
        let provider = Arc::new(FlakyProvider::new(false));
        let generator = cached_generator(provider.clone());

        let warm = generator.embed("beta").await.unwrap();
        assert_eq!(provider.encoded.load(Ordering::SeqCst), 1);

        let batch = generator.embed_batch(&["alpha", "beta", "gamma"]).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], warm);
        // alpha and gamma only
        assert_eq!(provider.encoded.load(Ordering::SeqCst), 3);

        assert_eq!(batch[0], generator.embed("alpha").await.unwrap());
        assert_eq!(batch[2], generator.embed("gamma").await.unwrap());
        assert_eq!(provider.encoded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_load_failure_is_retryable() {
        let provider = Arc::new(FlakyProvider::new(true));
        let generator = cached_generator(provider.clone());

        let err = generator.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ModelLoad(_)));
        assert!(!generator.is_loaded());

        provider.fail_load.store(false, Ordering::SeqCst);
        assert!(generator.embed("hello").await.is_ok());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_works_without_cache() {
        let generator = EmbeddingGenerator::new(
            Arc::new(HashingProvider::new(16)),
            Arc::new(CacheStore::disabled()),
            Duration::from_secs(60),
        );
        let a = generator.embed_tracked("text").await.unwrap();
        let b = generator.embed_tracked("text").await.unwrap();
        assert!(!b.cached);
        assert_eq!(a.vector, b.vector);
    }

    #[test]
    fn test_cache_key_depends_on_model_and_text() {
        let cache = Arc::new(CacheStore::disabled());
        let a = EmbeddingGenerator::new(Arc::new(HashingProvider::new(8)), cache.clone(), Duration::from_secs(1));
        let key = a.cache_key("hello");
        assert!(key.starts_with("emb:hashing:"));
        assert_eq!(key, a.cache_key("hello"));
        assert_ne!(key, a.cache_key("hello!"));
    }

    #[test]
    fn test_error_conversion() {
        let err: ParleyError = EmbeddingError::ModelLoad("x".into()).into();
        assert!(matches!(err, ParleyError::ModelLoad(_)));
        let err: ParleyError = EmbeddingError::EmptyInput.into();
        assert!(err.is_input_error());
    }

    // Integration test - downloads model, run with: cargo test --ignored
    #[tokio::test]
    #[ignore = "Downloads model from network, slow"]
    async fn test_similar_texts_have_similar_embeddings() {
        let generator = EmbeddingGenerator::new(
            Arc::new(FastEmbedProvider::from_model_str("all-MiniLM-L6-v2").unwrap()),
            Arc::new(CacheStore::disabled()),
            Duration::from_secs(60),
        );

        let emb1 = generator.embed("The cat sat on the mat").await.unwrap();
        let emb2 = generator.embed("A cat is sitting on a mat").await.unwrap();
        let emb3 = generator.embed("Quantum physics is complex").await.unwrap();

        // Vectors are normalised, so the dot product is the cosine similarity
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&emb1, &emb2) > dot(&emb1, &emb3));
    }
}
