use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{
    ApiError, BatchEmbedRequest, BatchEmbedResponse, Content, EmbedContentRequest, ErrorEnvelope,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig,
};
use crate::config::{SearchConfig, Secret};
use crate::error::ConfigError;
use crate::rank::embed::{EmbedError, Embedder};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;
const TEMPERATURE: f32 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("AI quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("AI request rejected: {0}")]
    InvalidRequest(String),

    #[error("AI API rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("AI request timed out")]
    Timeout,

    #[error("AI server error ({code}): {message}")]
    ServerError { code: u16, message: String },

    #[error("AI API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("AI returned an empty completion")]
    Empty,

    #[error("Network error: {0}")]
    Network(reqwest::Error),
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout
        } else {
            CompletionError::Network(e)
        }
    }
}

impl CompletionError {
    /// Every failure is worth another attempt except a request the provider
    /// has already declared invalid or whose credentials it rejected.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            CompletionError::InvalidRequest(_) | CompletionError::Unauthorized(_)
        )
    }

    pub fn as_fatal(&self) -> Option<ConfigError> {
        match self {
            CompletionError::Unauthorized(message) => Some(ConfigError::CredentialRejected {
                credential: "GEMINI_API_KEY",
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt_text: String,
    /// Upper bound on generated tokens.
    pub max_output_length: u32,
}

/// Abstraction over the AI completion service used for translation and summaries.
/// Implemented by `GeminiClient` for production; mock implementations used in tests.
pub trait CompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Calls `client` up to `max_attempts` times, backing off between retriable failures.
pub async fn complete_with_retry(
    client: &impl CompletionClient,
    request: &CompletionRequest,
    max_attempts: u32,
) -> Result<String, CompletionError> {
    let mut last_err = None;
    for attempt in 0..max_attempts.max(1) {
        match client.complete(request).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retriable() => {
                if attempt + 1 < max_attempts {
                    let delay_ms = jittered_backoff(attempt);
                    debug!(attempt = attempt + 1, delay_ms, error = %e, "retrying completion");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(CompletionError::Empty))
}

/// Equal jitter backoff: base/2 + rand(0, base/2), base capped at `MAX_BACKOFF_MS`.
fn jittered_backoff(attempt: u32) -> u64 {
    let base = INITIAL_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    let half = base / 2;
    half + fastrand::u64(..half.max(1))
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Secret,
    model: String,
    embedding_model: String,
    timeout: Duration,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: Client, config: &SearchConfig) -> Self {
        Self {
            http,
            api_key: config.credentials.ai_api_key.clone(),
            model: config.ai_model.clone(),
            embedding_model: config.embedding_model.clone(),
            timeout: config.ai_timeout(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Points the client at a different API root, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn post<T: Serialize>(
        &self,
        method: &str,
        model: &str,
        body: &T,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/{}:{}", self.base_url, model, method);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            return Ok(text);
        }

        let classified = match serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(|env| env.error)
        {
            Some(err) => classify_api_error(&err, status),
            None => {
                let end = text.floor_char_boundary(200);
                classify_status(status, format!("HTTP {status}: {}", &text[..end]))
            }
        };
        warn!(error = %classified, method, "Gemini API error");
        Err(classified)
    }
}

impl CompletionClient for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user_text(&request.prompt_text)],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_length,
                temperature: TEMPERATURE,
            },
        };

        let text = self.post("generateContent", &self.model, &body).await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::ServerError {
                code: 200,
                message: format!("malformed response: {e}"),
            })?;

        if let Some(err) = &parsed.error {
            return Err(classify_api_error(err, StatusCode::OK));
        }

        debug!(model = %self.model, "completion received");
        parsed.text().ok_or_else(|| {
            warn!("Gemini returned empty completion (safety filter or empty response)");
            CompletionError::Empty
        })
    }
}

impl Embedder for GeminiClient {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model_path = format!("models/{}", self.embedding_model);
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| EmbedContentRequest {
                    model: model_path.clone(),
                    content: Content {
                        parts: vec![super::types::Part {
                            text: (*t).to_string(),
                        }],
                        role: None,
                    },
                })
                .collect(),
        };

        let text = self
            .post("batchEmbedContents", &self.embedding_model, &body)
            .await?;
        let parsed: BatchEmbedResponse =
            serde_json::from_str(&text).map_err(|e| EmbedError::Malformed(e.to_string()))?;
        if let Some(err) = &parsed.error {
            return Err(classify_api_error(err, StatusCode::OK).into());
        }
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: parsed.embeddings.len(),
            });
        }
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

fn classify_api_error(err: &ApiError, status: StatusCode) -> CompletionError {
    let message = err
        .message
        .clone()
        .unwrap_or_else(|| "Unknown error".to_string());
    match err.status.as_deref() {
        Some("RESOURCE_EXHAUSTED") => return CompletionError::QuotaExceeded(message),
        Some("UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            return CompletionError::Unauthorized(message);
        }
        _ => {}
    }
    let code = err
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(status);
    classify_status(code, message)
}

fn classify_status(status: StatusCode, message: String) -> CompletionError {
    let code = status.as_u16();
    match code {
        429 => CompletionError::QuotaExceeded(message),
        403 if message.to_ascii_lowercase().contains("quota") => {
            CompletionError::QuotaExceeded(message)
        }
        401 | 403 => CompletionError::Unauthorized(message),
        400 if message.to_ascii_lowercase().contains("api key") => {
            CompletionError::Unauthorized(message)
        }
        400 | 404 => CompletionError::InvalidRequest(message),
        408 | 504 => CompletionError::Timeout,
        500..=599 => CompletionError::ServerError { code, message },
        _ => CompletionError::Api { code, message },
    }
}
