// HTTP surface tests: the full router in front of an in-process mock
// upstream.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{json, Value};

use glm_tool::api::{router, AppState};
use glm_tool::config::AppConfig;
use glm_tool::image::ImagePipeline;
use glm_tool::proxy::Proxy;
use glm_tool::vision::VisionClient;

const SSE_BODY: &str = "data: {\"delta\":\"hel\"}\n\ndata: {\"delta\":\"lo\"}\n\ndata: [DONE]\n\n";

static LAST_STREAM_BODY: Lazy<Mutex<Option<Value>>> = Lazy::new(|| Mutex::new(None));

async fn upstream_chat(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if body["model"].as_str() == Some("boom") {
        return (StatusCode::BAD_GATEWAY, "bad gateway").into_response();
    }

    if body["stream"].as_bool() == Some(true) {
        *LAST_STREAM_BODY.lock() = Some(body);
        let mut response = Response::new(Body::from(SSE_BODY));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            "text/event-stream".parse().unwrap(),
        );
        return response;
    }

    Json(json!({
        "object": "chat.completion",
        "echo": body,
        "auth": headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    }))
    .into_response()
}

async fn upstream_models(headers: HeaderMap) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{ "id": "glm-4.6" }],
        "auth": headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    }))
}

async fn upstream_messages(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "type": "message",
        "echo": body,
        "auth": headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        "anthropic_version": headers
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    }))
}

async fn upstream_count_tokens(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "input_tokens": 42, "echo": body }))
}

/// Spawn the mock upstream and the proxy under test; returns the proxy's
/// base URL.
async fn spawn_proxy() -> String {
    let upstream = Router::new()
        .route("/chat/completions", post(upstream_chat))
        .route("/models", get(upstream_models))
        .route("/v1/messages", post(upstream_messages))
        .route("/v1/messages/count_tokens", post(upstream_count_tokens));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });

    let config = AppConfig {
        target_api_url: upstream_url.clone(),
        anthropic_api_url: upstream_url,
        ..AppConfig::default()
    };
    let state = AppState {
        proxy: Arc::new(Proxy::new(&config)),
        pipeline: Arc::new(ImagePipeline::new(VisionClient::default(), None)),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_url = format!("http://{}", listener.local_addr().unwrap());
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    proxy_url
}

#[tokio::test]
async fn health_check() {
    let base = spawn_proxy().await;

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok", "service": "glm-tool" }));
}

#[tokio::test]
async fn chat_completions_requires_auth() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({ "model": "glm-4.6", "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"]["type"].as_str(),
        Some("authentication_error")
    );
}

#[tokio::test]
async fn chat_completions_rejects_malformed_json() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .header("Authorization", "Bearer sk-test")
        .header("Content-Type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"]["type"].as_str(),
        Some("invalid_request_error")
    );
}

#[tokio::test]
async fn chat_completions_forwards_auth_verbatim() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .header("Authorization", "Bearer sk-test")
        .json(&json!({ "model": "glm-4.6", "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["auth"].as_str(), Some("Bearer sk-test"));
    assert_eq!(body["echo"]["model"].as_str(), Some("glm-4.6"));
}

#[tokio::test]
async fn upstream_error_becomes_proxy_error() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .header("Authorization", "Bearer sk-test")
        .json(&json!({ "model": "boom", "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"].as_str(), Some("proxy_error"));
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("502"));
    assert!(message.contains("bad gateway"));
}

#[tokio::test]
async fn streaming_passthrough_is_byte_identical() {
    let base = spawn_proxy().await;

    // Streaming requests skip the image middleware entirely: the inline
    // image must reach the upstream untouched.
    let request = json!({
        "model": "glm-4.6",
        "stream": true,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAA" } },
                { "type": "text", "text": "hi" }
            ]
        }]
    });
    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .header("Authorization", "Bearer sk-test")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let body = response.text().await.unwrap();
    assert_eq!(body, SSE_BODY);

    assert_eq!(LAST_STREAM_BODY.lock().take(), Some(request));
}

#[tokio::test]
async fn models_list_forwards() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .get(format!("{}/v1/models", base))
        .header("Authorization", "Bearer sk-test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"][0]["id"].as_str(), Some("glm-4.6"));
    assert_eq!(body["auth"].as_str(), Some("Bearer sk-test"));

    let response = reqwest::Client::new()
        .get(format!("{}/v1/models", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn anthropic_messages_accepts_x_api_key() {
    let base = spawn_proxy().await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", base))
        .header("x-api-key", "sk-anthropic")
        .json(&json!({ "model": "glm-4.6", "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["auth"].as_str(), Some("sk-anthropic"));
    assert_eq!(body["anthropic_version"].as_str(), Some("2023-06-01"));
}

#[tokio::test]
async fn count_tokens_forwards_without_middleware() {
    let base = spawn_proxy().await;

    let request = json!({
        "model": "glm-4.6",
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image", "source": { "media_type": "image/png", "data": "AAA" } }
            ]
        }]
    });
    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages/count_tokens", base))
        .header("Authorization", "Bearer sk-test")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["input_tokens"].as_u64(), Some(42));
    // The image reaches the upstream untouched: no vision offload on this
    // route.
    assert_eq!(body["echo"], request);
}
