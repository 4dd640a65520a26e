// API request handlers

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use super::{streaming, AppState};
use crate::debuglog;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "glm-tool" }))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Ok(mut request_data) = serde_json::from_str::<Value>(&body) else {
        tracing::warn!("failed to parse request body");
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid request body",
            "invalid_request_error",
        );
    };

    let Some(auth_header) = authorization_header(&headers) else {
        tracing::warn!("missing Authorization header");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing API key",
            "authentication_error",
        );
    };

    if is_stream(&request_data) {
        // Streaming requests pass through untouched; the image middleware
        // only runs on buffered request bodies.
        tracing::info!("handling streaming request");
        match state.proxy.stream_chat(&request_data, &auth_header).await {
            Ok(upstream) => streaming::sse_passthrough(upstream),
            Err(e) => {
                tracing::warn!("failed to forward streaming request: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &e.to_string(),
                    "proxy_error",
                )
            }
        }
    } else {
        state
            .pipeline
            .process_openai(&mut request_data, &auth_header)
            .await;

        let result = state.proxy.forward_chat(&request_data, &auth_header).await;
        debuglog::log_request(Some(&request_data), result.as_ref().ok(), result.as_ref().err());

        match result {
            Ok(response) => Json(response).into_response(),
            Err(e) => {
                tracing::warn!("failed to forward request: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &e.to_string(),
                    "proxy_error",
                )
            }
        }
    }
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(auth_header) = authorization_header(&headers) else {
        tracing::warn!("missing Authorization header");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing API key",
            "authentication_error",
        );
    };

    tracing::info!("handling models list request");

    let result = state.proxy.forward_get("models", &auth_header).await;
    debuglog::log_request(None, result.as_ref().ok(), result.as_ref().err());

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::warn!("failed to forward request: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "proxy_error",
            )
        }
    }
}

pub async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Ok(mut request_data) = serde_json::from_str::<Value>(&body) else {
        tracing::warn!("failed to parse Anthropic request body");
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid request body",
            "invalid_request_error",
        );
    };

    let Some(auth_header) = anthropic_auth(&headers) else {
        tracing::warn!("missing Authorization or x-api-key header");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing API key",
            "authentication_error",
        );
    };

    if is_stream(&request_data) {
        tracing::info!("handling Anthropic streaming request");
        match state
            .proxy
            .stream_anthropic(&request_data, &auth_header)
            .await
        {
            Ok(upstream) => streaming::sse_passthrough(upstream),
            Err(e) => {
                tracing::warn!("failed to forward Anthropic streaming request: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &e.to_string(),
                    "proxy_error",
                )
            }
        }
    } else {
        state
            .pipeline
            .process_anthropic(&mut request_data, &auth_header)
            .await;

        let result = state
            .proxy
            .forward_anthropic(&request_data, &auth_header)
            .await;
        debuglog::log_request(Some(&request_data), result.as_ref().ok(), result.as_ref().err());

        match result {
            Ok(response) => Json(response).into_response(),
            Err(e) => {
                tracing::warn!("failed to forward Anthropic request: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &e.to_string(),
                    "proxy_error",
                )
            }
        }
    }
}

pub async fn anthropic_count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Ok(request_data) = serde_json::from_str::<Value>(&body) else {
        tracing::warn!("failed to parse Anthropic count_tokens request body");
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid request body",
            "invalid_request_error",
        );
    };

    let Some(auth_header) = anthropic_auth(&headers) else {
        tracing::warn!("missing Authorization or x-api-key header");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing API key",
            "authentication_error",
        );
    };

    let result = state
        .proxy
        .forward_count_tokens(&request_data, &auth_header)
        .await;
    debuglog::log_request(Some(&request_data), result.as_ref().ok(), result.as_ref().err());

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::warn!("failed to forward Anthropic count_tokens request: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "proxy_error",
            )
        }
    }
}

fn is_stream(request: &Value) -> bool {
    request
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn authorization_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Anthropic clients may send the key in `x-api-key` instead of
/// `Authorization`; either is forwarded upstream verbatim.
fn anthropic_auth(headers: &HeaderMap) -> Option<String> {
    authorization_header(headers).or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn error_response(status: StatusCode, message: &str, error_type: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_stream() {
        assert!(is_stream(&json!({ "stream": true })));
        assert!(!is_stream(&json!({ "stream": false })));
        assert!(!is_stream(&json!({})));
        assert!(!is_stream(&json!({ "stream": "true" })));
    }

    #[test]
    fn test_anthropic_auth_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(anthropic_auth(&headers), None);

        headers.insert("x-api-key", "sk-fallback".parse().unwrap());
        assert_eq!(anthropic_auth(&headers).as_deref(), Some("sk-fallback"));

        headers.insert(header::AUTHORIZATION, "Bearer sk-main".parse().unwrap());
        assert_eq!(anthropic_auth(&headers).as_deref(), Some("Bearer sk-main"));
    }
}
