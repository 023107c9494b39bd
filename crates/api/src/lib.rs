//! REST API for the parley context engine.
//!
//! # Endpoints
//!
//! - `GET /health` - Service status, cache stats and retrieval health
//! - `GET /api/v1/stats?minutes=&user_id=` - Aggregated retrieval metrics
//! - `POST /api/v1/users/{user_id}/sessions/{session_id}/turns` - Append a turn
//! - `POST /api/v1/users/{user_id}/sessions/{session_id}/context` - Build context for a query
//! - `DELETE /api/v1/users/{user_id}/sessions/{session_id}` - Clear a session
//! - `POST /api/v1/users/{user_id}/notes` - Index a note
//! - `POST /api/v1/users/{user_id}/notes/search` - Search notes
//! - `DELETE /api/v1/users/{user_id}/notes/{note_id}` - Delete a note
//! - `DELETE /api/v1/users/{user_id}` - Forget a user
//!
//! Input errors answer 400, an unloadable embedding model 503, anything
//! else 500.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::{ApiError, ErrorResponse};
pub use state::AppState;

fn cors_layer(origins: Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match origins {
        Some(origins) if !origins.iter().any(|o| o == "*") => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %o, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(parsed)
        }
        _ => layer.allow_origin(Any),
    }
}

/// Create the API router with all routes configured.
///
/// `cors_origins` of `None` or containing `*` allows any origin.
pub fn create_router(state: Arc<AppState>, cors_origins: Option<Vec<String>>) -> Router {
    Router::new()
        // Health and stats
        .route("/health", get(routes::health))
        .route("/api/v1/stats", get(routes::stats))
        // Sessions
        .route(
            "/api/v1/users/{user_id}/sessions/{session_id}",
            delete(routes::clear_session),
        )
        .route(
            "/api/v1/users/{user_id}/sessions/{session_id}/turns",
            post(routes::add_turn),
        )
        .route(
            "/api/v1/users/{user_id}/sessions/{session_id}/context",
            post(routes::get_context),
        )
        // Notes
        .route("/api/v1/users/{user_id}/notes", post(routes::index_note))
        .route("/api/v1/users/{user_id}/notes/search", post(routes::search_notes))
        .route(
            "/api/v1/users/{user_id}/notes/{note_id}",
            delete(routes::delete_note),
        )
        // Users
        .route("/api/v1/users/{user_id}", delete(routes::forget_user))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr, cors_origins: Option<Vec<String>>) -> anyhow::Result<()> {
    let router = create_router(state, cors_origins);

    info!(%addr, "Starting parley API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
