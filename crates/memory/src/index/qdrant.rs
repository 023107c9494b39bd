//! Qdrant backend over the gRPC client.

use super::{point_uuid, IndexError, Payload, ScoredPoint, ScrollPage, StoredPoint, VectorBackend};
use crate::types::{FieldCondition, Match, PayloadFilter};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload as QdrantPayload, Qdrant, QdrantError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Vector backend talking to a Qdrant server.
pub struct QdrantBackend {
    client: Qdrant,
}

impl QdrantBackend {
    /// Build a client for `url`. No request is made until first use.
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Backend(format!("invalid Qdrant configuration: {e}")))?;
        info!(url, "Configured Qdrant vector backend");
        Ok(Self { client })
    }

    fn map_error(collection: &str, e: QdrantError) -> IndexError {
        let message = e.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("not found") || lowered.contains("doesn't exist") || lowered.contains("does not exist") {
            IndexError::CollectionNotFound(collection.to_string())
        } else {
            IndexError::Backend(message)
        }
    }
}

fn to_condition(condition: &FieldCondition) -> Condition {
    match &condition.value {
        Match::Keyword(value) => Condition::matches(condition.field.as_str(), value.clone()),
        Match::Text(value) => Condition::matches_text(condition.field.as_str(), value.as_str()),
    }
}

fn to_filter(filter: &PayloadFilter) -> Filter {
    Filter {
        must: filter.must.iter().map(to_condition).collect(),
        must_not: filter.must_not.iter().map(to_condition).collect(),
        ..Default::default()
    }
}

fn to_point_id(id: &str) -> PointId {
    PointId::from(point_uuid(id).to_string())
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

fn from_qdrant_payload(payload: HashMap<String, QdrantValue>) -> Payload {
    payload.into_iter().map(|(k, v)| (k, v.into_json())).collect()
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, IndexError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), IndexError> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<StoredPoint>) -> Result<(), IndexError> {
        let points = points
            .into_iter()
            .map(|point| {
                let payload = QdrantPayload::try_from(serde_json::Value::Object(point.payload))
                    .map_err(|e| IndexError::Payload(e.to_string()))?;
                Ok(PointStruct::new(to_point_id(&point.id), point.vector, payload))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| Self::map_error(collection, e))?;
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
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
                    .filter(to_filter(filter))
                    .score_threshold(min_score)
                    .with_payload(true),
            )
            .await
            .map_err(|e| Self::map_error(collection, e))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredPoint {
                id: point_id_string(point.id),
                score: point.score,
                payload: from_qdrant_payload(point.payload),
            })
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, IndexError> {
        let mut request = ScrollPointsBuilder::new(collection)
            .filter(to_filter(filter))
            .limit(limit as u32)
            .with_payload(true);
        if let Some(offset) = offset {
            // Offsets handed out by this backend are already point ids
            request = request.offset(PointId::from(offset));
        }

        let response = self
            .client
            .scroll(request)
            .await
            .map_err(|e| Self::map_error(collection, e))?;

        Ok(ScrollPage {
            points: response
                .result
                .into_iter()
                .map(|point| ScoredPoint {
                    id: point_id_string(point.id),
                    score: 0.0,
                    payload: from_qdrant_payload(point.payload),
                })
                .collect(),
            next_offset: response.next_page_offset.map(|id| point_id_string(Some(id))),
        })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), IndexError> {
        let ids = PointsIdsList {
            ids: ids.iter().map(|id| to_point_id(id)).collect(),
        };
        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(ids).wait(true))
            .await
            .map_err(|e| Self::map_error(collection, e))?;
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<(), IndexError> {
        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(to_filter(filter)).wait(true))
            .await
            .map_err(|e| Self::map_error(collection, e))?;
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &PayloadFilter) -> Result<u64, IndexError> {
        let mut request = CountPointsBuilder::new(collection).exact(true);
        if !filter.is_empty() {
            request = request.filter(to_filter(filter));
        }
        let response = self
            .client
            .count(request)
            .await
            .map_err(|e| Self::map_error(collection, e))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_translation() {
        let filter = PayloadFilter::new()
            .must(FieldCondition::keyword("user_id", "u1"))
            .must(FieldCondition::text("content", "netflix"))
            .must_not(FieldCondition::keyword("session_id", "s1"));
        let translated = to_filter(&filter);
        assert_eq!(translated.must.len(), 2);
        assert_eq!(translated.must_not.len(), 1);
        assert!(translated.should.is_empty());
    }

    #[test]
    fn test_point_ids_round_trip_as_uuid() {
        let id = to_point_id("note-42");
        let text = point_id_string(Some(id));
        assert_eq!(text, point_uuid("note-42").to_string());
        assert_eq!(point_id_string(None), "");
    }

    #[test]
    fn test_client_builds_without_connecting() {
        assert!(QdrantBackend::new("http://localhost:6334", None, Duration::from_secs(1)).is_ok());
    }
}
