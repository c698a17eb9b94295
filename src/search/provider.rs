use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{SearchConfig, Secret};
use crate::error::ConfigError;
use crate::types::Language;

const API_BASE: &str = "https://www.googleapis.com/customsearch/v1";
/// The Custom Search API returns at most this many results per request.
pub const PROVIDER_MAX_RESULTS: usize = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("search quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("search API rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("search API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("malformed search response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(reqwest::Error),
}

impl From<reqwest::Error> for ProviderError {
    /// The request URL carries the engine id and query; it stays out of logs.
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e.without_url())
    }
}

impl ProviderError {
    /// A rejected key means every later request fails too.
    pub fn as_fatal(&self) -> Option<ConfigError> {
        match self {
            ProviderError::Unauthorized(message) => Some(ConfigError::CredentialRejected {
                credential: "GOOGLE_API_KEY",
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query_text: String,
    pub result_count: usize,
    pub language_hint: Language,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Abstraction for the web search provider.
/// Implemented by `GoogleSearch` for production; mock implementations used in tests.
pub trait SearchProvider {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Item>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

/// Google Programmable Search (Custom Search JSON API) client.
#[derive(Clone)]
pub struct GoogleSearch {
    http: Client,
    api_key: Secret,
    engine_id: Secret,
    base_url: String,
}

impl GoogleSearch {
    pub fn new(http: Client, config: &SearchConfig) -> Self {
        Self {
            http,
            api_key: config.credentials.search_api_key.clone(),
            engine_id: config.credentials.search_engine_id.clone(),
            base_url: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    fn request_url(&self, request: &SearchRequest) -> Result<url::Url, ProviderError> {
        let num = request.result_count.clamp(1, PROVIDER_MAX_RESULTS).to_string();
        let mut params = vec![
            ("cx", self.engine_id.expose()),
            ("q", request.query_text.as_str()),
            ("num", num.as_str()),
            ("hl", request.language_hint.code()),
        ];
        if request.language_hint == Language::En {
            params.push(("lr", "lang_en"));
        }
        url::Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| ProviderError::Malformed(format!("bad endpoint: {e}")))
    }
}

impl SearchProvider for GoogleSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let url = self.request_url(request)?;

        let response = self
            .http
            .get(url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .and_then(|e| e.error)
            {
                Some(err) => (
                    err.code.unwrap_or(status.as_u16()),
                    err.message.unwrap_or_default(),
                ),
                None => {
                    let end = text.floor_char_boundary(200);
                    (status.as_u16(), format!("HTTP {status}: {}", &text[..end]))
                }
            };
            let err = classify(code, message);
            warn!(error = %err, "search provider error");
            return Err(err);
        }

        let body: SearchResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(classify(
                err.code.unwrap_or(0),
                err.message.unwrap_or_default(),
            ));
        }

        debug!(hits = body.items.len(), "search provider responded");
        Ok(body
            .items
            .into_iter()
            .map(|item| SearchHit {
                url: item.link,
                title: item.title,
                snippet: item.snippet,
            })
            .collect())
    }
}

fn classify(code: u16, message: String) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    let quota = code == StatusCode::TOO_MANY_REQUESTS.as_u16()
        || (code == StatusCode::FORBIDDEN.as_u16()
            && (lower.contains("limit") || lower.contains("quota")));
    let unauthorized = code == StatusCode::UNAUTHORIZED.as_u16()
        || code == StatusCode::FORBIDDEN.as_u16()
        || (code == StatusCode::BAD_REQUEST.as_u16() && lower.contains("api key"));
    if quota {
        ProviderError::QuotaExceeded(message)
    } else if unauthorized {
        ProviderError::Unauthorized(message)
    } else {
        ProviderError::Api { code, message }
    }
}
