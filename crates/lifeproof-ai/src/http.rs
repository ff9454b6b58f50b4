//! [`ModelClient`] over the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::{InvocationError, ModelClient, ModelRequest};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

pub struct AnthropicClient {
    client: reqwest::Client,
    messages_url: String,
    api_key: String,
}

impl AnthropicClient {
    /// `endpoint` is a base URL like `https://api.anthropic.com`, or the full
    /// messages URL.
    pub fn new(endpoint: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            messages_url: messages_url(endpoint),
            api_key: api_key.into(),
        }
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }
}

fn messages_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with(MESSAGES_PATH) {
        base.to_string()
    } else {
        format!("{base}{MESSAGES_PATH}")
    }
}

/// Throttling, overload and server faults are worth retrying; other client
/// errors are not.
fn classify_status(status: StatusCode, body: &str) -> InvocationError {
    let msg = format!("{status}: {body}");
    let retryable = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || status.as_u16() == 529;
    if retryable {
        InvocationError::Retryable(msg)
    } else {
        InvocationError::NonRetryable(msg)
    }
}

fn classify_transport(err: &reqwest::Error) -> InvocationError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        InvocationError::Retryable(err.to_string())
    } else {
        InvocationError::NonRetryable(err.to_string())
    }
}

fn extract_text(body: &str) -> Result<String, InvocationError> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| InvocationError::NonRetryable(format!("invalid messages response: {e}")))?;
    Ok(parsed
        .content
        .iter()
        .filter(|part| part.content_type == "text")
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n"))
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, InvocationError> {
        let payload = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        debug!(url = %self.messages_url, model = %request.model, "invoking model");
        let resp = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        extract_text(&body)
    }
}
