use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::app::ports::{GenerationPort, GenerationRequest};
use crate::config::GenerationConfig;
use crate::constants::API_KEY_VARS;
use crate::error::GenerationError;
use crate::observability::metrics;

// ============================================================================
// Chat-completions wire types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI-compatible chat-completions client with API key failover.
///
/// Keys are tried starting from the last one that worked. A 429 moves on to the next key;
/// once every key has been rate limited the call fails with `RateLimited`.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_keys: Vec<String>,
    current_key: AtomicUsize,
    timeout_secs: u64,
}

impl ChatCompletionsClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        if config.api_keys.is_empty() {
            return Err(GenerationError::NotConfigured(
                format!("no API key found in {}", API_KEY_VARS.join(", ")),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            api_keys: config.api_keys.clone(),
            current_key: AtomicUsize::new(0),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn call_with_key(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout_secs)
                } else {
                    GenerationError::Transient(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &error_text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(format!("unreadable response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| GenerationError::Transient("response carried no choices".into()))
    }
}

#[async_trait]
impl GenerationPort for ChatCompletionsClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let key_count = self.api_keys.len();
        let start = self.current_key.load(Ordering::Relaxed) % key_count;
        let mut last_limit = String::new();

        for offset in 0..key_count {
            let index = (start + offset) % key_count;
            match self.call_with_key(&self.api_keys[index], request).await {
                Ok(content) => {
                    if index != start {
                        self.current_key.store(index, Ordering::Relaxed);
                    }
                    metrics::generation::call_finished("ok");
                    debug!(
                        table_id = %request.table_id,
                        reply = %content.chars().take(300).collect::<String>(),
                        "Generation reply received"
                    );
                    return Ok(content);
                }
                Err(GenerationError::RateLimited(message)) => {
                    warn!(
                        table_id = %request.table_id,
                        key = index + 1,
                        "API key rate limited: {}",
                        message
                    );
                    metrics::generation::key_rotated();
                    last_limit = message;
                }
                Err(other) => {
                    metrics::generation::call_finished(outcome_label(&other));
                    return Err(other);
                }
            }
        }

        metrics::generation::call_finished("rate_limited");
        Err(GenerationError::RateLimited(format!(
            "all {} API keys rate limited; last: {}",
            key_count, last_limit
        )))
    }
}

/// Maps a non-success HTTP status to the error taxonomy the orchestrator retries on
pub fn classify_failure(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        429 => GenerationError::RateLimited(message),
        408 => GenerationError::Transient(format!("{}: {}", status, message)),
        500..=599 => GenerationError::Transient(format!("{}: {}", status, message)),
        _ => GenerationError::Rejected { status, message },
    }
}

fn outcome_label(err: &GenerationError) -> &'static str {
    match err {
        GenerationError::Transient(_) => "transient",
        GenerationError::RateLimited(_) => "rate_limited",
        GenerationError::Timeout(_) => "timeout",
        GenerationError::Rejected { .. } => "rejected",
        GenerationError::NotConfigured(_) => "not_configured",
    }
}
