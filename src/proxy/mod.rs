// Upstream forwarding for both wire formats, JSON and streaming

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::config::AppConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct Proxy {
    target_url: String,
    anthropic_url: String,
    client: reqwest::Client,
    /// Streams can run far longer than a request/response exchange, so they
    /// go through a client without an overall deadline.
    stream_client: reqwest::Client,
}

impl Proxy {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            target_url: config.target_api_url.clone(),
            anthropic_url: config.anthropic_api_url.clone(),
            client,
            stream_client,
        }
    }

    /// POST an OpenAI-style chat request upstream and return the parsed
    /// JSON response. The client's Authorization header passes through
    /// verbatim.
    pub async fn forward_chat(&self, request: &Value, auth_header: &str) -> Result<Value> {
        let url = format!("{}/chat/completions", self.target_url);
        tracing::info!("forwarding request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .json(request)
            .send()
            .await
            .context("failed to send upstream request")?;

        read_json_response(response).await
    }

    /// GET an opaque endpoint (e.g. `models`) from the OpenAI-style target.
    pub async fn forward_get(&self, endpoint: &str, auth_header: &str) -> Result<Value> {
        let url = format!("{}/{}", self.target_url, endpoint);
        tracing::info!("forwarding GET request to {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", auth_header)
            .send()
            .await
            .context("failed to send upstream request")?;

        read_json_response(response).await
    }

    pub async fn forward_anthropic(&self, request: &Value, auth_header: &str) -> Result<Value> {
        let url = format!("{}/v1/messages", self.anthropic_url);
        tracing::info!("forwarding Anthropic request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .context("failed to send upstream request")?;

        read_json_response(response).await
    }

    pub async fn forward_count_tokens(&self, request: &Value, auth_header: &str) -> Result<Value> {
        let url = format!("{}/v1/messages/count_tokens", self.anthropic_url);
        tracing::info!("forwarding Anthropic count_tokens request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .context("failed to send upstream request")?;

        read_json_response(response).await
    }

    /// Open a streaming chat request upstream. A non-200 status is read to
    /// completion and returned as an error before any byte reaches the
    /// client.
    pub async fn stream_chat(&self, request: &Value, auth_header: &str) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.target_url);
        tracing::info!("forwarding streaming request to {}", url);

        let response = self
            .stream_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .context("failed to send upstream request")?;

        check_stream_status(response).await
    }

    pub async fn stream_anthropic(
        &self,
        request: &Value,
        auth_header: &str,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.anthropic_url);
        tracing::info!("forwarding Anthropic streaming request to {}", url);

        let response = self
            .stream_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .context("failed to send upstream request")?;

        check_stream_status(response).await
    }
}

async fn read_json_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("failed to read upstream response")?;

    tracing::debug!("upstream status: {}", status);

    if !status.is_success() {
        return Err(anyhow!(
            "upstream API error (status {}): {}",
            status.as_u16(),
            body
        ));
    }

    serde_json::from_str(&body).context("failed to parse upstream response")
}

async fn check_stream_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!(
            "upstream API error (status {}): {}",
            status.as_u16(),
            body
        ));
    }
    Ok(response)
}
