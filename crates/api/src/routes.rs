//! HTTP route handlers for the API.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use parley_common::MessageRole;
use parley_memory::{
    format_for_prompt, AggregatedMetrics, CacheStats, ConversationContext, EngineStats, ForgetReport,
    HealthReport, NewNote, NoteHit, TurnReceipt,
};
use parley_memory::types::NotePayload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Window `/health` judges retrieval over.
const HEALTH_WINDOW_MINUTES: i64 = 60;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub model_loaded: bool,
    pub cache: CacheStats,
    pub retrieval: HealthReport,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (_, report) = state.engine.retrieval_health(HEALTH_WINDOW_MINUTES, None).await;

    Json(HealthResponse {
        status: if report.is_healthy() { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        model_loaded: state.engine.embeddings().is_loaded(),
        cache: state.engine.cache().stats().await,
        retrieval: report,
    })
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default = "default_stats_minutes")]
    pub minutes: i64,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_stats_minutes() -> i64 {
    HEALTH_WINDOW_MINUTES
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub period_minutes: i64,
    pub metrics: AggregatedMetrics,
    pub health: HealthReport,
    pub engine: EngineStats,
}

/// Aggregated retrieval metrics, their health and engine counters.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Json<StatsResponse> {
    let minutes = params.minutes.max(1);
    let (metrics, health) = state
        .engine
        .retrieval_health(minutes, params.user_id.as_deref())
        .await;

    Json(StatsResponse {
        period_minutes: minutes,
        metrics,
        health,
        engine: state.engine.stats().await,
    })
}

/// Turn request body.
#[derive(Debug, Deserialize)]
pub struct AddTurnRequest {
    pub role: MessageRole,
    pub content: String,
    /// Entities mentioned in the turn; extracted from `content` when absent
    #[serde(default)]
    pub entities: Option<Vec<String>>,
}

/// Append a turn to a session.
pub async fn add_turn(
    State(state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, String)>,
    Json(request): Json<AddTurnRequest>,
) -> Result<(StatusCode, Json<TurnReceipt>), ApiError> {
    let receipt = state
        .engine
        .add_turn(&user_id, &session_id, request.role, &request.content, request.entities)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    #[serde(flatten)]
    pub context: ConversationContext,
    /// The context rendered for a downstream prompt
    pub prompt: String,
}

/// Build the retrieval context for a query.
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, String)>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, ApiError> {
    debug!(
        user_id = %user_id,
        session_id = %session_id,
        query_preview = %request.query.chars().take(50).collect::<String>(),
        "Building context"
    );

    let context = state
        .engine
        .get_context(&user_id, &session_id, &request.query)
        .await?;
    let prompt = format_for_prompt(&context);
    Ok(Json(ContextResponse { context, prompt }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearSessionResponse {
    pub turns_deleted: usize,
}

/// Drop a session.
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Json<ClearSessionResponse> {
    let turns_deleted = state.engine.clear_session(&user_id, &session_id).await;
    Json(ClearSessionResponse { turns_deleted })
}

/// Index a note.
pub async fn index_note(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(note): Json<NewNote>,
) -> Result<(StatusCode, Json<NotePayload>), ApiError> {
    let note = state.engine.index_note(&user_id, note).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

#[derive(Debug, Deserialize)]
pub struct NoteSearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NoteSearchResponse {
    pub results: Vec<NoteHit>,
}

/// Hybrid search over a user's notes.
pub async fn search_notes(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<NoteSearchRequest>,
) -> Result<Json<NoteSearchResponse>, ApiError> {
    let results = state
        .engine
        .search_notes(&user_id, &request.query, request.limit)
        .await?;
    Ok(Json(NoteSearchResponse { results }))
}

/// Delete one note.
pub async fn delete_note(
    State(state): State<Arc<AppState>>,
    Path((user_id, note_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.engine.delete_note(&user_id, &note_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Note not found: {note_id}")))
    }
}

/// Delete everything stored for a user.
pub async fn forget_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ForgetReport>, ApiError> {
    let report = state.engine.forget_user(&user_id).await?;
    info!(user_id = %user_id, "Forgot user via API");
    Ok(Json(report))
}
