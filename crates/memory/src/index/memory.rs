//! In-process vector backend with brute-force cosine search.

use super::{IndexError, ScoredPoint, ScrollPage, StoredPoint, VectorBackend};
use crate::types::PayloadFilter;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

struct Collection {
    dimension: usize,
    points: BTreeMap<String, StoredPoint>,
}

/// Vector backend kept entirely in memory.
///
/// Applies the same filter semantics as the Qdrant backend. An outage can be
/// simulated with [`set_unavailable`](Self::set_unavailable).
#[derive(Default)]
pub struct MemoryVectorBackend {
    collections: RwLock<HashMap<String, Collection>>,
    unavailable: AtomicBool,
}

impl MemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a backend error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn collection_count(&self) -> usize {
        self.collections.read().len()
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Backend("in-memory backend marked unavailable".into()));
        }
        Ok(())
    }
}

fn not_found(collection: &str) -> IndexError {
    IndexError::CollectionNotFound(collection.to_string())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, IndexError> {
        self.check_available()?;
        Ok(self.collections.read().contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), IndexError> {
        self.check_available()?;
        let mut collections = self.collections.write();
        if collections.contains_key(collection) {
            return Err(IndexError::Backend(format!("collection {collection} already exists")));
        }
        collections.insert(
            collection.to_string(),
            Collection {
                dimension,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<StoredPoint>) -> Result<(), IndexError> {
        self.check_available()?;
        let mut collections = self.collections.write();
        let target = collections.get_mut(collection).ok_or_else(|| not_found(collection))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: target.dimension,
                actual: bad.vector.len(),
            });
        }
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        self.check_available()?;
        let collections = self.collections.read();
        let target = collections.get(collection).ok_or_else(|| not_found(collection))?;

        let mut hits: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|p| p.score >= min_score)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, IndexError> {
        self.check_available()?;
        let collections = self.collections.read();
        let target = collections.get(collection).ok_or_else(|| not_found(collection))?;

        let start = match offset {
            Some(id) => Bound::Included(id),
            None => Bound::Unbounded,
        };

        let mut points = Vec::new();
        let mut next_offset = None;
        for (id, point) in target.points.range((start, Bound::Unbounded)) {
            if !filter.matches(&point.payload) {
                continue;
            }
            if points.len() == limit {
                next_offset = Some(id.clone());
                break;
            }
            points.push(ScoredPoint {
                id: id.clone(),
                score: 0.0,
                payload: point.payload.clone(),
            });
        }

        Ok(ScrollPage { points, next_offset })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), IndexError> {
        self.check_available()?;
        let mut collections = self.collections.write();
        let target = collections.get_mut(collection).ok_or_else(|| not_found(collection))?;
        for id in ids {
            target.points.remove(id);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<(), IndexError> {
        self.check_available()?;
        let mut collections = self.collections.write();
        let target = collections.get_mut(collection).ok_or_else(|| not_found(collection))?;
        target.points.retain(|_, p| !filter.matches(&p.payload));
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &PayloadFilter) -> Result<u64, IndexError> {
        self.check_available()?;
        let collections = self.collections.read();
        let target = collections.get(collection).ok_or_else(|| not_found(collection))?;
        Ok(target.points.values().filter(|p| filter.matches(&p.payload)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldCondition;
    use serde_json::json;

    fn point(id: &str, user: &str, vector: Vec<f32>) -> StoredPoint {
        let payload = json!({ "user_id": user, "content": format!("point {id}") });
        StoredPoint {
            id: id.to_string(),
            vector,
            payload: payload.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_missing_collection_reports_not_found() {
        let backend = MemoryVectorBackend::new();
        let err = backend
            .search("missing", &[1.0], &PayloadFilter::new(), 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_scroll_pages_through_matches() {
        let backend = MemoryVectorBackend::new();
        backend.create_collection("c", 2).await.unwrap();
        let points = (0..7)
            .map(|i| point(&format!("p{i}"), if i % 2 == 0 { "a" } else { "b" }, vec![1.0, 0.0]))
            .collect();
        backend.upsert("c", points).await.unwrap();

        let filter = PayloadFilter::new().must(FieldCondition::keyword("user_id", "a"));
        let mut seen = Vec::new();
        let mut offset = None;
        loop {
            let page = backend.scroll("c", &filter, 2, offset).await.unwrap();
            assert!(page.points.len() <= 2);
            seen.extend(page.points.into_iter().map(|p| p.id));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["p0", "p2", "p4", "p6"]);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let backend = MemoryVectorBackend::new();
        backend.create_collection("c", 2).await.unwrap();
        assert!(backend.create_collection("c", 2).await.is_err());
    }
}
