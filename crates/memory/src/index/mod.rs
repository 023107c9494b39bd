//! Vector index over a pluggable similarity-search backend.
//!
//! [`VectorIndex`] owns the rules every backend call has to follow: records
//! must carry a `user_id`, every read and delete-by-user is filtered on it,
//! and a collection that does not exist yet reads as empty. Backends only
//! translate calls for their engine.

mod memory;
mod qdrant;

pub use self::memory::MemoryVectorBackend;
pub use self::qdrant::QdrantBackend;

use crate::types::{FieldCondition, PayloadFilter, RecordPayload, SearchResult, VectorRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use parley_common::ParleyError;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound on the keyword boost a single hybrid result can receive.
pub const MAX_KEYWORD_BOOST: f32 = 0.3;

/// Payload field holding the caller-facing record id.
pub const RECORD_ID_FIELD: &str = "record_id";

/// Payload field every record is partitioned by.
pub const TENANT_FIELD: &str = "user_id";

const SCROLL_PAGE_SIZE: usize = 256;

/// Raw JSON payload as stored by a backend.
pub type Payload = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Record payload has no user_id")]
    MissingTenantKey,

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector backend error: {0}")]
    Backend(String),

    #[error("Invalid payload: {0}")]
    Payload(String),
}

impl From<IndexError> for ParleyError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::MissingTenantKey => ParleyError::MissingTenantKey,
            other => ParleyError::Index(other.to_string()),
        }
    }
}

/// A point as handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A point returned by a backend, scored or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<ScoredPoint>,
    pub next_offset: Option<String>,
}

/// Operations a similarity-search engine has to provide.
///
/// Backends must return [`IndexError::CollectionNotFound`] when asked about
/// a collection that does not exist.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collection_exists(&self, collection: &str) -> Result<bool, IndexError>;

    /// Create a cosine-distance collection.
    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), IndexError>;

    /// Insert points, replacing any with the same id.
    async fn upsert(&self, collection: &str, points: Vec<StoredPoint>) -> Result<(), IndexError>;

    /// Nearest neighbours satisfying `filter`, best first, with `score >= min_score`.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    /// Page through points satisfying `filter`, without scoring.
    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, IndexError>;

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), IndexError>;

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<(), IndexError>;

    async fn count(&self, collection: &str, filter: &PayloadFilter) -> Result<u64, IndexError>;
}

/// Backend point id for a record id.
///
/// UUIDs pass through; any other string maps to a stable UUIDv5.
pub fn point_uuid(record_id: &str) -> Uuid {
    Uuid::parse_str(record_id).unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()))
}

/// Count distinct keywords that occur in `text`, ignoring case.
pub fn keyword_match_count(text: &str, keywords: &[String]) -> usize {
    let haystack = text.to_lowercase();
    let distinct: HashSet<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    distinct.iter().filter(|k| haystack.contains(k.as_str())).count()
}

/// Semantic score plus a capped keyword boost, never above 1.0.
pub fn hybrid_score(score: f32, matches: usize, boost: f32) -> f32 {
    let bonus = (boost * matches as f32).min(MAX_KEYWORD_BOOST);
    (score + bonus).min(1.0)
}

/// Parameters of a similarity query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub user_id: String,
    pub limit: usize,
    pub min_score: f32,
    /// Extra conditions; the tenant filter is always added on top
    pub filter: PayloadFilter,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, user_id: impl Into<String>) -> Self {
        Self {
            vector,
            user_id: user_id.into(),
            limit: 5,
            min_score: 0.0,
            filter: PayloadFilter::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_filter(mut self, filter: PayloadFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Tenant-scoped vector index.
pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    dimension: usize,
    candidate_multiplier: usize,
    known_collections: RwLock<HashSet<String>>,
}

impl VectorIndex {
    pub fn new(backend: Arc<dyn VectorBackend>, dimension: usize) -> Self {
        Self {
            backend,
            dimension,
            candidate_multiplier: 3,
            known_collections: RwLock::new(HashSet::new()),
        }
    }

    /// How many candidates per requested result hybrid search fetches.
    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Create the collection if it does not exist. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn ensure_collection(&self, collection: &str) -> Result<(), IndexError> {
        if self.known_collections.read().contains(collection) {
            return Ok(());
        }

        if !self.backend.collection_exists(collection).await? {
            if let Err(e) = self.backend.create_collection(collection, self.dimension).await {
                // Lost a creation race with another writer
                if !self.backend.collection_exists(collection).await? {
                    return Err(e);
                }
            } else {
                info!(collection, dimension = self.dimension, "Created collection");
            }
        }

        self.known_collections.write().insert(collection.to_string());
        Ok(())
    }

    /// Insert or replace one record.
    pub async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), IndexError> {
        self.upsert_batch(collection, vec![record]).await
    }

    /// Insert or replace records. Nothing is written if any record is invalid.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert_batch(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records
            .into_iter()
            .map(|record| self.to_point(record))
            .collect::<Result<Vec<_>, _>>()?;

        self.ensure_collection(collection).await?;
        let count = points.len();
        self.backend.upsert(collection, points).await?;
        debug!(collection, count, "Upserted records");
        Ok(())
    }

    fn to_point(&self, record: VectorRecord) -> Result<StoredPoint, IndexError> {
        if record.payload.user_id().trim().is_empty() {
            return Err(IndexError::MissingTenantKey);
        }
        if record.vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }

        let mut payload = match serde_json::to_value(&record.payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(IndexError::Payload(format!("expected an object, got {other}"))),
            Err(e) => return Err(IndexError::Payload(e.to_string())),
        };
        payload.insert(RECORD_ID_FIELD.to_string(), Value::String(record.id.clone()));

        Ok(StoredPoint {
            id: record.id,
            vector: record.vector,
            payload,
        })
    }

    fn tenant_filter(user_id: &str, extra: &PayloadFilter) -> Result<PayloadFilter, IndexError> {
        if user_id.trim().is_empty() {
            return Err(IndexError::MissingTenantKey);
        }
        Ok(PayloadFilter::new()
            .must(FieldCondition::keyword(TENANT_FIELD, user_id))
            .and(extra.clone()))
    }

    /// Decode backend points, dropping anything outside the tenant.
    fn to_results(user_id: &str, points: Vec<ScoredPoint>) -> Vec<SearchResult> {
        points
            .into_iter()
            .filter_map(|point| {
                let id = point
                    .payload
                    .get(RECORD_ID_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(point.id);

                match serde_json::from_value::<RecordPayload>(Value::Object(point.payload)) {
                    Ok(payload) if payload.user_id() == user_id => Some(SearchResult {
                        id,
                        score: point.score,
                        payload,
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(id = %id, error = %e, "Skipping record with undecodable payload");
                        None
                    }
                }
            })
            .collect()
    }

    /// Similarity search restricted to `query.user_id`, best first.
    #[instrument(skip(self, query), fields(user_id = %query.user_id, limit = query.limit))]
    pub async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexError> {
        let filter = Self::tenant_filter(&query.user_id, &query.filter)?;
        if query.vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.vector.len(),
            });
        }
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let points = match self
            .backend
            .search(collection, &query.vector, &filter, query.limit, query.min_score)
            .await
        {
            Ok(points) => points,
            Err(IndexError::CollectionNotFound(_)) => {
                debug!(collection, "Collection does not exist yet, returning no results");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut results = Self::to_results(&query.user_id, points);
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.limit);
        Ok(results)
    }

    /// Similarity search re-ranked by keyword matches.
    ///
    /// Fetches an enlarged candidate pool with no score threshold, adds
    /// `min(boost * matches, 0.3)` to each score (capped at 1.0), then applies
    /// `query.min_score` and `query.limit`.
    #[instrument(skip(self, query, keywords), fields(user_id = %query.user_id, keywords = keywords.len()))]
    pub async fn hybrid_search(
        &self,
        collection: &str,
        query: &SearchQuery,
        keywords: &[String],
        boost: f32,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let candidates_query = SearchQuery {
            limit: query.limit.saturating_mul(self.candidate_multiplier),
            min_score: 0.0,
            ..query.clone()
        };
        let candidates = self.search(collection, &candidates_query).await?;

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|mut result| {
                let matches = keyword_match_count(&result.payload.searchable_text(), keywords);
                result.score = hybrid_score(result.score, matches, boost);
                result
            })
            .filter(|result| result.score >= query.min_score)
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.limit);
        Ok(results)
    }

    /// Exact substring lookup on one payload field, bypassing similarity.
    ///
    /// Every match is returned with a score of 1.0. Meant for small exact
    /// lookups; it walks the whole tenant partition.
    #[instrument(skip(self, text_contains))]
    pub async fn keyword_filter_search(
        &self,
        collection: &str,
        user_id: &str,
        text_contains: &str,
        field: &str,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let filter = Self::tenant_filter(
            user_id,
            &PayloadFilter::new().must(FieldCondition::text(field, text_contains)),
        )?;

        let mut results = Vec::new();
        let mut offset = None;
        loop {
            let page = match self
                .backend
                .scroll(collection, &filter, SCROLL_PAGE_SIZE, offset)
                .await
            {
                Ok(page) => page,
                Err(IndexError::CollectionNotFound(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

            let points = page
                .points
                .into_iter()
                .map(|p| ScoredPoint { score: 1.0, ..p })
                .collect();
            results.extend(Self::to_results(user_id, points));

            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(results)
    }

    /// Delete records by id. Missing ids and collections are ignored.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        match self.backend.delete_points(collection, ids).await {
            Ok(()) | Err(IndexError::CollectionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete every record belonging to `user_id`.
    #[instrument(skip(self))]
    pub async fn delete_by_user(&self, collection: &str, user_id: &str) -> Result<(), IndexError> {
        let filter = Self::tenant_filter(user_id, &PayloadFilter::new())?;
        match self.backend.delete_by_filter(collection, &filter).await {
            Ok(()) => {
                info!(collection, user_id, "Deleted user records");
                Ok(())
            }
            Err(IndexError::CollectionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete the records of `user_id` that also satisfy `filter`.
    #[instrument(skip(self, filter))]
    pub async fn delete_where(&self, collection: &str, user_id: &str, filter: &PayloadFilter) -> Result<(), IndexError> {
        let filter = Self::tenant_filter(user_id, filter)?;
        match self.backend.delete_by_filter(collection, &filter).await {
            Ok(()) | Err(IndexError::CollectionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Number of records of `user_id` that also satisfy `filter`.
    pub async fn count_where(&self, collection: &str, user_id: &str, filter: &PayloadFilter) -> Result<u64, IndexError> {
        let filter = Self::tenant_filter(user_id, filter)?;
        match self.backend.count(collection, &filter).await {
            Ok(count) => Ok(count),
            Err(IndexError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Number of records, optionally restricted to one user.
    pub async fn count(&self, collection: &str, user_id: Option<&str>) -> Result<u64, IndexError> {
        let filter = match user_id {
            Some(user_id) => Self::tenant_filter(user_id, &PayloadFilter::new())?,
            None => PayloadFilter::new(),
        };
        match self.backend.count(collection, &filter).await {
            Ok(count) => Ok(count),
            Err(IndexError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationPayload, NotePayload};
    use parley_common::MessageRole;

    const DIM: usize = 4;

    fn index() -> (Arc<MemoryVectorBackend>, VectorIndex) {
        let backend = Arc::new(MemoryVectorBackend::new());
        (backend.clone(), VectorIndex::new(backend, DIM))
    }

    fn turn(id: &str, user: &str, session: &str, content: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(
            id,
            vector,
            RecordPayload::Conversation(ConversationPayload {
                user_id: user.into(),
                session_id: session.into(),
                role: MessageRole::User,
                content: content.into(),
                timestamp: 1.0,
                entities: Vec::new(),
            }),
        )
    }

    fn note(id: &str, user: &str, content: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(
            id,
            vector,
            RecordPayload::Note(NotePayload {
                user_id: user.into(),
                note_id: id.into(),
                title: String::new(),
                content: content.into(),
                tags: Vec::new(),
                created_at: 1.0,
            }),
        )
    }

    /// Unit vector whose cosine similarity with [1, 0, 0, 0] is `score`.
    fn at_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt(), 0.0, 0.0]
    }

    #[test]
    fn test_hybrid_score_is_capped() {
        assert!((hybrid_score(0.7, 2, 0.15) - 1.0).abs() < 1e-6);
        assert!((hybrid_score(0.5, 1, 0.15) - 0.65).abs() < 1e-6);
        // Boost capped at 0.3 regardless of match count
        assert!((hybrid_score(0.2, 10, 0.15) - 0.5).abs() < 1e-6);
        assert!((hybrid_score(0.9, 0, 0.15) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_match_count_distinct_case_insensitive() {
        let keywords = vec!["Netflix".to_string(), "netflix".to_string(), "plan".to_string(), "".to_string()];
        assert_eq!(keyword_match_count("Change my NETFLIX plan", &keywords), 2);
        assert_eq!(keyword_match_count("nothing here", &keywords), 0);
    }

    #[test]
    fn test_point_uuid_is_stable() {
        let uuid = Uuid::new_v4();
        assert_eq!(point_uuid(&uuid.to_string()), uuid);
        assert_eq!(point_uuid("note-1"), point_uuid("note-1"));
        assert_ne!(point_uuid("note-1"), point_uuid("note-2"));
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let (backend, index) = index();
        index.ensure_collection("conversations").await.unwrap();
        index.ensure_collection("conversations").await.unwrap();
        assert!(backend.collection_exists("conversations").await.unwrap());
        assert_eq!(backend.collection_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_requires_user_id() {
        let (_, index) = index();
        let err = index
            .upsert("conversations", turn("t1", "  ", "s1", "hello", at_score(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::MissingTenantKey));
        assert_eq!(index.count("conversations", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let (_, index) = index();
        let err = index
            .upsert("conversations", turn("t1", "u1", "s1", "hello", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let (_, index) = index();
        index.upsert("notes", note("n1", "u1", "first", at_score(1.0))).await.unwrap();
        index.upsert("notes", note("n1", "u1", "second", at_score(1.0))).await.unwrap();

        assert_eq!(index.count("notes", Some("u1")).await.unwrap(), 1);
        let results = index
            .search("notes", &SearchQuery::new(at_score(1.0), "u1"))
            .await
            .unwrap();
        assert_eq!(results[0].id, "n1");
        assert_eq!(results[0].payload.as_note().unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_empty() {
        let (_, index) = index();
        let results = index
            .search("nowhere", &SearchQuery::new(at_score(1.0), "u1"))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(index.count("nowhere", None).await.unwrap(), 0);
        index.delete("nowhere", &["x".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_is_tenant_isolated() {
        let (_, index) = index();
        let v = at_score(1.0);
        index
            .upsert_batch(
                "conversations",
                vec![
                    turn("a1", "user_a", "s1", "cancel netflix", v.clone()),
                    turn("b1", "user_b", "s1", "cancel netflix", v.clone()),
                    turn("b2", "user_b", "s2", "cancel netflix", v.clone()),
                ],
            )
            .await
            .unwrap();

        let results = index
            .search("conversations", &SearchQuery::new(v.clone(), "user_a").with_limit(10))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.payload.user_id() == "user_a"));

        let err = index
            .search("conversations", &SearchQuery::new(v, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::MissingTenantKey));
    }

    #[tokio::test]
    async fn test_search_sorted_and_thresholded() {
        let (_, index) = index();
        index
            .upsert_batch(
                "notes",
                vec![
                    note("low", "u1", "x", at_score(0.3)),
                    note("high", "u1", "x", at_score(0.95)),
                    note("mid", "u1", "x", at_score(0.6)),
                ],
            )
            .await
            .unwrap();

        let results = index
            .search(
                "notes",
                &SearchQuery::new(at_score(1.0), "u1").with_limit(10).with_min_score(0.5),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn test_search_extra_filter() {
        let (_, index) = index();
        let v = at_score(1.0);
        index
            .upsert_batch(
                "conversations",
                vec![
                    turn("t1", "u1", "current", "a", v.clone()),
                    turn("t2", "u1", "older", "b", v.clone()),
                ],
            )
            .await
            .unwrap();

        let query = SearchQuery::new(v, "u1")
            .with_limit(10)
            .with_filter(PayloadFilter::new().must_not(FieldCondition::keyword("session_id", "current")));
        let results = index.search("conversations", &query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "t2");
    }

    #[tokio::test]
    async fn test_hybrid_boost_reorders() {
        let (_, index) = index();
        index
            .upsert_batch(
                "notes",
                vec![
                    note("semantic", "u1", "something unrelated", at_score(0.9)),
                    note("keyword", "u1", "cancel my netflix subscription", at_score(0.7)),
                ],
            )
            .await
            .unwrap();

        let keywords = vec!["netflix".to_string(), "subscription".to_string()];
        let query = SearchQuery::new(at_score(1.0), "u1").with_limit(2).with_min_score(0.5);
        let results = index.hybrid_search("notes", &query, &keywords, 0.15).await.unwrap();

        assert_eq!(results[0].id, "keyword");
        assert!((results[0].score - 1.0).abs() < 1e-4);
        assert_eq!(results[1].id, "semantic");
        assert!((results[1].score - 0.9).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_hybrid_threshold_applies_after_boost() {
        let (_, index) = index();
        index
            .upsert("notes", note("n1", "u1", "netflix", at_score(0.4)))
            .await
            .unwrap();

        let query = SearchQuery::new(at_score(1.0), "u1").with_min_score(0.5);
        let keywords = vec!["netflix".to_string()];
        assert!(index.search("notes", &query).await.unwrap().is_empty());

        let results = index.hybrid_search("notes", &query, &keywords, 0.15).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.55).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_keyword_filter_search() {
        let (_, index) = index();
        let records = (0..300)
            .map(|i| {
                let content = if i % 3 == 0 { format!("invoice {i}") } else { format!("memo {i}") };
                note(&format!("n{i}"), "u1", &content, at_score(0.5))
            })
            .chain(std::iter::once(note("other", "u2", "invoice", at_score(0.5))))
            .collect();
        index.upsert_batch("notes", records).await.unwrap();

        let results = index
            .keyword_filter_search("notes", "u1", "invoice", "content")
            .await
            .unwrap();
        assert_eq!(results.len(), 100);
        assert!(results.iter().all(|r| r.score == 1.0 && r.payload.user_id() == "u1"));
    }

    #[tokio::test]
    async fn test_delete_and_delete_by_user() {
        let (_, index) = index();
        let v = at_score(1.0);
        index
            .upsert_batch(
                "notes",
                vec![
                    note("a1", "a", "x", v.clone()),
                    note("a2", "a", "x", v.clone()),
                    note("b1", "b", "x", v.clone()),
                ],
            )
            .await
            .unwrap();

        index.delete("notes", &["a1".to_string()]).await.unwrap();
        assert_eq!(index.count("notes", Some("a")).await.unwrap(), 1);

        index.delete_by_user("notes", "a").await.unwrap();
        assert_eq!(index.count("notes", Some("a")).await.unwrap(), 0);
        assert_eq!(index.count("notes", Some("b")).await.unwrap(), 1);
        assert_eq!(index.count("notes", None).await.unwrap(), 1);

        assert!(matches!(
            index.delete_by_user("notes", "").await,
            Err(IndexError::MissingTenantKey)
        ));
    }

    #[tokio::test]
    async fn test_delete_where_is_tenant_scoped() {
        let (_, index) = index();
        let v = at_score(1.0);
        index
            .upsert_batch("notes", vec![note("a-n1", "a", "x", v.clone()), note("b-n1", "b", "x", v)])
            .await
            .unwrap();

        // Same field value under another tenant is untouched
        let by_id = |id: &str| PayloadFilter::new().must(FieldCondition::keyword(RECORD_ID_FIELD, id));
        index.delete_where("notes", "a", &by_id("b-n1")).await.unwrap();
        assert_eq!(index.count_where("notes", "b", &by_id("b-n1")).await.unwrap(), 1);

        index.delete_where("notes", "a", &by_id("a-n1")).await.unwrap();
        assert_eq!(index.count("notes", Some("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backend_outage_surfaces_error() {
        let (backend, index) = index();
        index.upsert("notes", note("n1", "u1", "x", at_score(1.0))).await.unwrap();
        backend.set_unavailable(true);

        let err = index
            .search("notes", &SearchQuery::new(at_score(1.0), "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Backend(_)));
    }
}
