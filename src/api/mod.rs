// HTTP API server module

use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::image::ImagePipeline;
use crate::proxy::Proxy;

pub mod handlers;
pub mod streaming;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub pipeline: Arc<ImagePipeline>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/messages", post(handlers::anthropic_messages))
        .route(
            "/v1/messages/count_tokens",
            post(handlers::anthropic_count_tokens),
        )
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<()> {
    let config = crate::config::get();
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState {
        proxy: Arc::new(Proxy::new(&config)),
        pipeline: Arc::new(ImagePipeline::from_globals()),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
