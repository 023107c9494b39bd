//! Conversation context engine.
//!
//! Ties the session store, embedding generator, vector index and analytics
//! together behind the caller-facing operations. Only input errors and fatal
//! model-load errors on the note paths reach the caller; everything on the
//! chat path degrades to a poorer context instead of failing.

use crate::analytics::{
    AggregatedMetrics, HealthReport, JsonlMetricsStore, MemoryMetricsStore, MetricsStore, QueryMetrics,
    QueryType, RetrievalAnalytics,
};
use crate::cache::{key_segment, CacheStats, CacheStore, MemoryCacheBackend, RedisCacheBackend};
use crate::config::{CacheBackendKind, MemoryConfig, VectorBackendKind};
use crate::embedding::{provider_from_config, EmbeddingGenerator, EmbeddingStats};
use crate::entities::{collect_entities, extract_entities, query_keywords, resolve_references};
use crate::index::{
    MemoryVectorBackend, QdrantBackend, SearchQuery, VectorBackend, VectorIndex, RECORD_ID_FIELD,
};
use crate::session::SessionStore;
use crate::types::{
    ConversationContext, ConversationPayload, FieldCondition, NewNote, NoteHit, NotePayload, PayloadFilter,
    RecordPayload, TurnReceipt, VectorRecord,
};
use parley_common::message::now_secs;
use parley_common::{ConversationTurn, MessageRole, ParleyError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Recent turns rendered by [`format_for_prompt`].
const PROMPT_RECENT_TURNS: usize = 3;
/// Relevant-history turns rendered by [`format_for_prompt`].
const PROMPT_RELEVANT_TURNS: usize = 2;
const PROMPT_HISTORY_CHARS: usize = 200;
const MAX_NOTE_RESULTS: usize = 50;

/// Shared handles the engine is built from.
pub struct EngineComponents {
    pub cache: Arc<CacheStore>,
    pub embeddings: Arc<EmbeddingGenerator>,
    pub index: Arc<VectorIndex>,
    pub analytics: Arc<RetrievalAnalytics>,
}

impl EngineComponents {
    /// Build every backend named by `config`. Nothing connects yet.
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        let timeout = config.backend_timeout();

        let cache = match config.cache_backend {
            CacheBackendKind::Redis => {
                let backend = RedisCacheBackend::new(&config.cache_url, timeout)
                    .map_err(|e| ParleyError::Config(e.to_string()))?;
                CacheStore::new(Arc::new(backend)).with_timeout(timeout)
            }
            CacheBackendKind::Memory => CacheStore::new(Arc::new(MemoryCacheBackend::new())).with_timeout(timeout),
            CacheBackendKind::Disabled => CacheStore::disabled(),
        };
        let cache = Arc::new(cache);

        let provider = provider_from_config(&config.embedding_model, config.embedding_dim)
            .map_err(|e| ParleyError::Config(e.to_string()))?;
        let embeddings = Arc::new(EmbeddingGenerator::new(
            provider,
            cache.clone(),
            config.embedding_cache_ttl(),
        ));

        let backend: Arc<dyn VectorBackend> = match config.vector_backend {
            VectorBackendKind::Qdrant => Arc::new(
                QdrantBackend::new(&config.vector_url, config.vector_api_key.clone(), timeout)
                    .map_err(|e| ParleyError::Config(e.to_string()))?,
            ),
            VectorBackendKind::Memory => Arc::new(MemoryVectorBackend::new()),
        };
        let index = Arc::new(
            VectorIndex::new(backend, config.embedding_dim)
                .with_candidate_multiplier(config.hybrid_candidate_multiplier),
        );

        let store: Arc<dyn MetricsStore> = match &config.metrics_path {
            Some(path) => Arc::new(JsonlMetricsStore::new(path).with_rotate_bytes(config.metrics_rotate_bytes)),
            None => Arc::new(MemoryMetricsStore::new(config.metrics_capacity)),
        };

        Ok(Self {
            cache,
            embeddings,
            index,
            analytics: Arc::new(RetrievalAnalytics::new(store)),
        })
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub embedding: EmbeddingStats,
    pub cache: CacheStats,
    pub vector_backend: &'static str,
    pub session_window: usize,
    pub local_sessions: usize,
}

/// What [`ContextEngine::forget_user`] removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForgetReport {
    pub sessions_cleared: usize,
    pub conversations_deleted: u64,
    pub notes_deleted: u64,
}

/// Timings of one relevant-history lookup.
#[derive(Debug, Default)]
struct Retrieval {
    turns: Vec<ConversationTurn>,
    scores: Vec<f32>,
    embedding_ms: f64,
    search_ms: f64,
    cache_hit: bool,
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(ParleyError::MissingTenantKey);
    }
    Ok(())
}

fn require_text(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ParleyError::EmptyInput(what.to_string()));
    }
    Ok(())
}

/// Point id of a user's note; unique across users.
fn note_record_id(user_id: &str, note_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("note\0{user_id}\0{note_id}").as_bytes()).to_string()
}

fn note_search_prefix(user_id: &str) -> String {
    format!("search:{}:", key_segment(user_id))
}

/// Per-session dialogue state plus retrieval over past conversations and notes.
pub struct ContextEngine {
    config: MemoryConfig,
    cache: Arc<CacheStore>,
    embeddings: Arc<EmbeddingGenerator>,
    index: Arc<VectorIndex>,
    sessions: SessionStore,
    analytics: Arc<RetrievalAnalytics>,
}

impl ContextEngine {
    /// Build the engine and all of its backends from configuration.
    pub fn from_config(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        let components = EngineComponents::from_config(&config)?;
        info!(
            model = %config.embedding_model,
            vector_backend = ?config.vector_backend,
            cache_backend = ?config.cache_backend,
            window = config.session_window,
            "Context engine configured"
        );
        Ok(Self::new(config, components))
    }

    pub fn new(config: MemoryConfig, components: EngineComponents) -> Self {
        let sessions = SessionStore::new(
            components.cache.clone(),
            config.session_window,
            config.session_ttl(),
        );
        Self {
            config,
            cache: components.cache,
            embeddings: components.embeddings,
            index: components.index,
            sessions,
            analytics: components.analytics,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingGenerator> {
        &self.embeddings
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn analytics(&self) -> &Arc<RetrievalAnalytics> {
        &self.analytics
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Append a turn to the session and index it for later retrieval.
    ///
    /// Entities are extracted from `content` when none are given. Indexing is
    /// best-effort: its failures come back as warnings on the receipt.
    #[instrument(skip(self, content, entities), fields(role = %role))]
    pub async fn add_turn(
        &self,
        user_id: &str,
        session_id: &str,
        role: MessageRole,
        content: &str,
        entities: Option<Vec<String>>,
    ) -> Result<TurnReceipt> {
        require_user(user_id)?;
        if session_id.trim().is_empty() {
            return Err(ParleyError::InvalidInput("session_id must not be empty".into()));
        }
        require_text(content, "turn content")?;

        let entities = entities.unwrap_or_else(|| extract_entities(content));
        let turn = ConversationTurn::new(role, content, entities);
        self.sessions.append(user_id, session_id, turn.clone()).await;

        let mut warnings = Vec::new();
        let indexed = match self.index_turn(user_id, session_id, &turn).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, session_id, error = %e, "Failed to index conversation turn");
                warnings.push(format!("turn not indexed: {e}"));
                false
            }
        };

        debug!(user_id, session_id, indexed, entities = ?turn.entities, "Added turn");
        Ok(TurnReceipt {
            turn,
            indexed,
            warnings,
        })
    }

    async fn index_turn(&self, user_id: &str, session_id: &str, turn: &ConversationTurn) -> Result<()> {
        let vector = self.embeddings.embed(&turn.content).await?;
        let record = VectorRecord::new(
            Uuid::new_v4().to_string(),
            vector,
            RecordPayload::Conversation(ConversationPayload {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                role: turn.role,
                content: turn.content.clone(),
                timestamp: turn.timestamp,
                entities: turn.entities.clone(),
            }),
        );
        self.index
            .upsert(&self.config.conversations_collection, record)
            .await?;
        Ok(())
    }

    /// Build the retrieval context for `query` in a session.
    ///
    /// Relevant history comes from the user's other sessions; any failure
    /// there leaves it empty. Reference resolution uses entities from the
    /// recent turns only.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn get_context(&self, user_id: &str, session_id: &str, query: &str) -> Result<ConversationContext> {
        require_user(user_id)?;
        require_text(query, "query")?;
        let started = Instant::now();

        let recent_turns = self.sessions.load(user_id, session_id).await;

        let retrieval = match self.retrieve_history(user_id, session_id, query).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                warn!(user_id, session_id, error = %e, "Relevant history unavailable, continuing without it");
                Retrieval::default()
            }
        };

        let mentioned_entities = collect_entities(&recent_turns);
        let resolved_query = resolve_references(query, &mentioned_entities);

        let mut metrics = QueryMetrics::new(user_id, QueryType::Context).with_scores(&retrieval.scores);
        metrics.latency_ms = elapsed_ms(started);
        metrics.embedding_ms = retrieval.embedding_ms;
        metrics.search_ms = retrieval.search_ms;
        metrics.cache_hit = retrieval.cache_hit;
        self.analytics.log_query(metrics);

        debug!(
            recent = recent_turns.len(),
            relevant = retrieval.turns.len(),
            entities = mentioned_entities.len(),
            resolved = resolved_query != query,
            "Built conversation context"
        );

        Ok(ConversationContext {
            recent_turns,
            relevant_history: retrieval.turns,
            mentioned_entities,
            resolved_query,
        })
    }

    async fn retrieve_history(&self, user_id: &str, session_id: &str, query: &str) -> Result<Retrieval> {
        if self.config.top_k == 0 {
            return Ok(Retrieval::default());
        }

        let embed_started = Instant::now();
        let embedded = self.embeddings.embed_tracked(query).await?;
        let embedding_ms = elapsed_ms(embed_started);

        let search_started = Instant::now();
        let search = SearchQuery::new(embedded.vector, user_id)
            .with_limit(self.config.top_k)
            .with_min_score(self.config.min_score)
            .with_filter(PayloadFilter::new().must_not(FieldCondition::keyword("session_id", session_id)));
        let results = self
            .index
            .search(&self.config.conversations_collection, &search)
            .await?;
        let search_ms = elapsed_ms(search_started);

        let (turns, scores): (Vec<ConversationTurn>, Vec<f32>) = results
            .iter()
            .filter_map(|r| r.payload.as_conversation().map(|c| (c.to_turn(), r.score)))
            .unzip();

        Ok(Retrieval {
            turns,
            scores,
            embedding_ms,
            search_ms,
            cache_hit: embedded.cached,
        })
    }

    /// Drop a session from both tiers. Returns how many turns it held.
    pub async fn clear_session(&self, user_id: &str, session_id: &str) -> usize {
        let deleted = self.sessions.clear(user_id, session_id).await;
        info!(user_id, session_id, deleted, "Cleared session");
        deleted
    }

    /// Embed and index a note, replacing any note with the same id.
    #[instrument(skip(self, note))]
    pub async fn index_note(&self, user_id: &str, note: NewNote) -> Result<NotePayload> {
        require_user(user_id)?;
        require_text(&note.content, "note content")?;

        let note_id = match note.note_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let payload = NotePayload {
            user_id: user_id.to_string(),
            note_id,
            title: note.title,
            content: note.content,
            tags: note.tags,
            created_at: now_secs(),
        };

        let text = if payload.title.trim().is_empty() {
            payload.content.clone()
        } else {
            format!("{}\n{}", payload.title, payload.content)
        };
        let vector = self.embeddings.embed(&text).await?;

        let record = VectorRecord::new(
            note_record_id(user_id, &payload.note_id),
            vector,
            RecordPayload::Note(payload.clone()),
        );
        self.index.upsert(&self.config.notes_collection, record).await?;

        self.cache
            .clear_pattern(&format!("{}*", note_search_prefix(user_id)))
            .await;
        info!(user_id, note_id = %payload.note_id, "Indexed note");
        Ok(payload)
    }

    /// Delete one of the user's notes. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<bool> {
        require_user(user_id)?;
        let filter = PayloadFilter::new().must(FieldCondition::keyword(
            RECORD_ID_FIELD,
            note_record_id(user_id, note_id),
        ));

        let existing = self
            .index
            .count_where(&self.config.notes_collection, user_id, &filter)
            .await?;
        if existing == 0 {
            return Ok(false);
        }

        self.index
            .delete_where(&self.config.notes_collection, user_id, &filter)
            .await?;
        self.cache
            .clear_pattern(&format!("{}*", note_search_prefix(user_id)))
            .await;
        Ok(true)
    }

    /// Hybrid search over the user's notes, best first.
    ///
    /// Results are cached per `(user, query, limit)` until the next note
    /// write or the result TTL.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn search_notes(&self, user_id: &str, query: &str, limit: Option<usize>) -> Result<Vec<NoteHit>> {
        require_user(user_id)?;
        require_text(query, "query")?;
        let limit = limit.unwrap_or(self.config.top_k).clamp(1, MAX_NOTE_RESULTS);
        let started = Instant::now();

        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(limit.to_le_bytes());
        let cache_key = format!("{}{:x}", note_search_prefix(user_id), hasher.finalize());

        if let Some(hits) = self.cache.get::<Vec<NoteHit>>(&cache_key).await {
            let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
            let mut metrics = QueryMetrics::new(user_id, QueryType::NoteSearch).with_scores(&scores);
            metrics.latency_ms = elapsed_ms(started);
            metrics.cache_hit = true;
            self.analytics.log_query(metrics);
            return Ok(hits);
        }

        let embed_started = Instant::now();
        let embedded = self.embeddings.embed_tracked(query).await?;
        let embedding_ms = elapsed_ms(embed_started);

        let search_started = Instant::now();
        let keywords = query_keywords(query);
        let search = SearchQuery::new(embedded.vector, user_id)
            .with_limit(limit)
            .with_min_score(self.config.min_score);
        let results = self
            .index
            .hybrid_search(&self.config.notes_collection, &search, &keywords, self.config.keyword_boost)
            .await?;
        let search_ms = elapsed_ms(search_started);

        let hits: Vec<NoteHit> = results
            .iter()
            .filter_map(|r| r.payload.as_note().map(|note| NoteHit::from_payload(note, r.score)))
            .collect();

        self.cache
            .set(&cache_key, &hits, self.config.result_cache_ttl())
            .await;

        let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
        let mut metrics = QueryMetrics::new(user_id, QueryType::NoteSearch).with_scores(&scores);
        metrics.latency_ms = elapsed_ms(started);
        metrics.embedding_ms = embedding_ms;
        metrics.search_ms = search_ms;
        metrics.cache_hit = embedded.cached;
        self.analytics.log_query(metrics);

        Ok(hits)
    }

    /// Remove everything stored for a user: indexed turns, notes, sessions
    /// and cached search results.
    #[instrument(skip(self))]
    pub async fn forget_user(&self, user_id: &str) -> Result<ForgetReport> {
        require_user(user_id)?;

        let conversations = &self.config.conversations_collection;
        let notes = &self.config.notes_collection;

        let conversations_deleted = self.index.count(conversations, Some(user_id)).await?;
        self.index.delete_by_user(conversations, user_id).await?;
        let notes_deleted = self.index.count(notes, Some(user_id)).await?;
        self.index.delete_by_user(notes, user_id).await?;

        let sessions_cleared = self.sessions.clear_user(user_id).await;
        self.cache
            .clear_pattern(&format!("{}*", note_search_prefix(user_id)))
            .await;

        let report = ForgetReport {
            sessions_cleared,
            conversations_deleted,
            notes_deleted,
        };
        info!(user_id, ?report, "Forgot user");
        Ok(report)
    }

    /// Load the embedding model and create the collections ahead of traffic.
    ///
    /// A model that fails to load is an error; an unreachable index is not.
    pub async fn warmup(&self) -> Result<()> {
        let started = Instant::now();
        self.embeddings.warmup().await?;

        for collection in [&self.config.conversations_collection, &self.config.notes_collection] {
            if let Err(e) = self.index.ensure_collection(collection).await {
                warn!(collection = %collection, error = %e, "Could not prepare collection during warmup");
            }
        }

        info!(elapsed_ms = elapsed_ms(started), "Context engine warmed up");
        Ok(())
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            embedding: self.embeddings.stats(),
            cache: self.cache.stats().await,
            vector_backend: self.index.backend_name(),
            session_window: self.sessions.window(),
            local_sessions: self.sessions.local_session_count(),
        }
    }

    /// Aggregated retrieval metrics for the trailing window and their health.
    pub async fn retrieval_health(&self, minutes: i64, user_id: Option<&str>) -> (AggregatedMetrics, HealthReport) {
        let metrics = self.analytics.recent(minutes, user_id).await;
        let report = RetrievalAnalytics::assess_health(&metrics);
        (metrics, report)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Render a context as prompt text.
///
/// Shows the last three recent turns, the top two relevant-history turns and
/// the mentioned entities. Empty sections are left out.
pub fn format_for_prompt(context: &ConversationContext) -> String {
    let mut sections = Vec::new();

    if !context.recent_turns.is_empty() {
        let skip = context.recent_turns.len().saturating_sub(PROMPT_RECENT_TURNS);
        let lines: Vec<String> = context
            .recent_turns
            .iter()
            .skip(skip)
            .map(|t| format!("{}: {}", t.role.label(), t.content))
            .collect();
        sections.push(format!("## Recent Conversation\n{}", lines.join("\n")));
    }

    if !context.relevant_history.is_empty() {
        let lines: Vec<String> = context
            .relevant_history
            .iter()
            .take(PROMPT_RELEVANT_TURNS)
            .map(|t| format!("- {}: {}", t.role.label(), truncate(&t.content, PROMPT_HISTORY_CHARS)))
            .collect();
        sections.push(format!("## Relevant Past Conversations\n{}", lines.join("\n")));
    }

    if !context.mentioned_entities.is_empty() {
        sections.push(format!(
            "## Mentioned Entities\n{}",
            context.mentioned_entities.join(", ")
        ));
    }

    sections.join("\n\n")
}
