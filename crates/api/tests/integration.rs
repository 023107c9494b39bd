//! Integration tests for the API layer.
//!
//! These tests spin up a real HTTP server on a random port backed by an
//! offline engine (hashing embeddings, in-process index and cache).

use parley_api::{create_router, AppState};
use parley_memory::MemoryConfig;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// Spin up a test server on a random port and return the base URL.
async fn start_test_server() -> String {
    let state = Arc::new(AppState::new(MemoryConfig::offline()).unwrap());
    let router = create_router(state, Some(vec!["*".to_string()]));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{}", addr)
}

/// Helper to GET a URL and return (status, body_string).
async fn get(base: &str, path: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

/// Helper to POST JSON and return (status, body_string).
async fn post_json(base: &str, path: &str, json: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .header("content-type", "application/json")
        .body(json.to_string())
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

/// Helper to DELETE a URL and return (status, body_string).
async fn delete(base: &str, path: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .delete(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

// ============================================================================
// Health and stats
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let base = start_test_server().await;
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);

    let json = parse(&body);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["cache"]["backend"], "memory");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_stats_reflect_queries() {
    let base = start_test_server().await;
    post_json(
        &base,
        "/api/v1/users/alice/sessions/s1/context",
        r#"{"query": "what did I pay for rent?"}"#,
    )
    .await;

    let (status, body) = get(&base, "/api/v1/stats?minutes=5&user_id=alice").await;
    assert_eq!(status, 200);
    let json = parse(&body);
    assert_eq!(json["period_minutes"], 5);
    assert_eq!(json["metrics"]["total_queries"], 1);
    assert_eq!(json["engine"]["vector_backend"], "memory");
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_turns_and_context_resolve_references() {
    let base = start_test_server().await;

    let (status, body) = post_json(
        &base,
        "/api/v1/users/alice/sessions/s1/turns",
        r#"{"role": "user", "content": "How much is my Netflix subscription?"}"#,
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(parse(&body)["turn"]["entities"][0], "Netflix");

    let (status, body) = post_json(
        &base,
        "/api/v1/users/alice/sessions/s1/context",
        r#"{"query": "Cancel it"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let json = parse(&body);
    assert_eq!(json["resolved_query"], "Cancel Netflix");
    assert_eq!(json["recent_turns"].as_array().unwrap().len(), 1);
    assert!(json["prompt"].as_str().unwrap().contains("## Mentioned Entities"));
}

#[tokio::test]
async fn test_clear_session() {
    let base = start_test_server().await;
    for content in ["first", "second"] {
        let body = format!(r#"{{"role": "user", "content": "{content}"}}"#);
        post_json(&base, "/api/v1/users/bob/sessions/s1/turns", &body).await;
    }

    let (status, body) = delete(&base, "/api/v1/users/bob/sessions/s1").await;
    assert_eq!(status, 200);
    assert_eq!(parse(&body)["turns_deleted"], 2);

    let (_, body) = post_json(&base, "/api/v1/users/bob/sessions/s1/context", r#"{"query": "hello"}"#).await;
    assert!(parse(&body)["recent_turns"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_input_errors_are_bad_requests() {
    let base = start_test_server().await;

    let (status, body) = post_json(
        &base,
        "/api/v1/users/alice/sessions/s1/turns",
        r#"{"role": "user", "content": "   "}"#,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(parse(&body)["code"], "INVALID_INPUT");

    let (status, _) = post_json(&base, "/api/v1/users/alice/sessions/s1/context", r#"{"query": ""}"#).await;
    assert_eq!(status, 400);

    // Unknown role never reaches the engine
    let (status, _) = post_json(
        &base,
        "/api/v1/users/alice/sessions/s1/turns",
        r#"{"role": "system", "content": "hi"}"#,
    )
    .await;
    assert_eq!(status, 422);
}

// ============================================================================
// Notes
// ============================================================================

#[tokio::test]
async fn test_note_lifecycle() {
    let base = start_test_server().await;
    let text = "Rent of 1200 is due on the first";

    let (status, body) = post_json(
        &base,
        "/api/v1/users/carol/notes",
        &format!(r#"{{"note_id": "rent", "content": "{text}"}}"#),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(parse(&body)["note_id"], "rent");

    let search = format!(r#"{{"query": "{text}", "limit": 3}}"#);
    let (status, body) = post_json(&base, "/api/v1/users/carol/notes/search", &search).await;
    assert_eq!(status, 200);
    let results = parse(&body)["results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["note_id"], "rent");

    // Other tenants see nothing
    let (_, body) = post_json(&base, "/api/v1/users/dave/notes/search", &search).await;
    assert!(parse(&body)["results"].as_array().unwrap().is_empty());
    let (status, _) = delete(&base, "/api/v1/users/dave/notes/rent").await;
    assert_eq!(status, 404);

    let (status, _) = delete(&base, "/api/v1/users/carol/notes/rent").await;
    assert_eq!(status, 204);
    let (status, body) = delete(&base, "/api/v1/users/carol/notes/rent").await;
    assert_eq!(status, 404);
    assert_eq!(parse(&body)["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_forget_user() {
    let base = start_test_server().await;
    post_json(
        &base,
        "/api/v1/users/erin/sessions/s1/turns",
        r#"{"role": "user", "content": "Hulu renews in May"}"#,
    )
    .await;
    post_json(&base, "/api/v1/users/erin/notes", r#"{"content": "Hulu costs 8 a month"}"#).await;

    let (status, body) = delete(&base, "/api/v1/users/erin").await;
    assert_eq!(status, 200);
    let json = parse(&body);
    assert_eq!(json["sessions_cleared"], 1);
    assert_eq!(json["conversations_deleted"], 1);
    assert_eq!(json["notes_deleted"], 1);
}
