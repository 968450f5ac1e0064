use super::json::{extract_json_object, JsonExtractError};
use crate::config::{ExtractionConfig, RetryConfig};
use crate::error::Result;
use async_trait::async_trait;
use metrics::{counter, histogram};
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

const RATE_LIMITED: u16 = 429;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },

    #[error("unreadable upstream response: {0}")]
    InvalidResponse(String),

    #[error("upstream response had no message content")]
    EmptyContent,

    #[error("no JSON object in response")]
    NoJson,

    #[error("malformed JSON in response: {0}")]
    MalformedJson(serde_json::Error),

    #[error("extraction result described no event")]
    NoEvent,

    #[error("still rate limited after {attempts} attempts ({waited_ms} ms waited)")]
    RateLimitExhausted { attempts: u32, waited_ms: u64 },

    #[error("no extraction client configured")]
    NotConfigured,
}

impl From<JsonExtractError> for ExtractionError {
    fn from(err: JsonExtractError) -> Self {
        match err {
            JsonExtractError::NotFound => ExtractionError::NoJson,
            JsonExtractError::Malformed(e) => ExtractionError::MalformedJson(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Request body for the upstream chat-completions endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

/// Transport to the upstream text-generation service
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> std::result::Result<CompletionResponse, ExtractionError>;
}

/// Anything that turns a prompt into a decoded JSON object
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, prompt: &str) -> std::result::Result<Value, ExtractionError>;
}

pub struct ReqwestCompletionBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ReqwestCompletionBackend {
    pub fn new(config: &ExtractionConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionBackend for ReqwestCompletionBackend {
    async fn send(&self, request: &CompletionRequest) -> std::result::Result<CompletionResponse, ExtractionError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp
            .text()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        Ok(CompletionResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Bounded exponential backoff with jitter for rate-limited calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_wait: Duration::from_millis(config.max_total_wait_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). `Retry-After` wins when longer.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff = Duration::from_millis(base_ms.saturating_mul(1u64 << exponent)).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
        let delay = backoff + Duration::from_millis(jitter_ms);
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

/// Client for the upstream text-generation service.
///
/// Sends the prompt at a fixed low temperature, retries on 429 within the
/// retry policy, and decodes the first JSON object of the returned message.
pub struct TextExtractionClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl TextExtractionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &ExtractionConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Build a client talking HTTP to the configured endpoint with the given key
    pub fn from_config(config: &ExtractionConfig, api_key: String) -> Result<Self> {
        let backend = ReqwestCompletionBackend::new(config, api_key)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    fn request(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    fn message_content(body: &str) -> std::result::Result<String, ExtractionError> {
        let envelope: Value = serde_json::from_str(body)
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
        envelope["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or(ExtractionError::EmptyContent)
    }
}

#[async_trait]
impl TextExtractor for TextExtractionClient {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn extract(&self, prompt: &str) -> std::result::Result<Value, ExtractionError> {
        let request = self.request(prompt);
        let started = Instant::now();
        let mut waited = Duration::ZERO;
        let mut attempts = 0;

        while attempts < self.retry.max_attempts {
            attempts += 1;
            counter!("ingest_extraction_attempts_total").increment(1);
            let response = self.backend.send(&request).await?;

            if response.status == RATE_LIMITED {
                counter!("ingest_extraction_rate_limited_total").increment(1);
                if attempts == self.retry.max_attempts {
                    break;
                }
                let delay = self.retry.delay_for(attempts, response.retry_after);
                if waited + delay > self.retry.max_total_wait {
                    warn!(attempts, waited_ms = waited.as_millis() as u64, "Rate-limit wait budget exhausted");
                    break;
                }
                warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Rate limited by upstream, backing off");
                tokio::time::sleep(delay).await;
                waited += delay;
                continue;
            }

            if !(200..300).contains(&response.status) {
                return Err(ExtractionError::UpstreamStatus {
                    status: response.status,
                });
            }

            let content = Self::message_content(&response.body)?;
            debug!(chars = content.len(), "Received extraction response");
            histogram!("ingest_extraction_duration_seconds").record(started.elapsed().as_secs_f64());
            return Ok(extract_json_object(&content)?);
        }

        Err(ExtractionError::RateLimitExhausted {
            attempts,
            waited_ms: waited.as_millis() as u64,
        })
    }
}
