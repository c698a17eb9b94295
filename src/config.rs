//! Search configuration, built once at process start and passed by reference.
//!
//! [`SearchConfig::default()`] gives working defaults for everything except
//! credentials. The binary fills those in with [`SearchConfig::from_env`];
//! nothing else in the crate reads the environment.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

const DEFAULT_DENYLIST: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "reddit.com",
    "linkedin.com",
    "pinterest.com",
    "tumblr.com",
    "snapchat.com",
    "youtube.com",
];

const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".jpg", ".jpeg", ".png", ".gif", ".zip",
];

const PRICE_KEYWORDS: &[&str] = &[
    "price", "rate", "cost", "deal", "offer", "discount", "purchase", "मूल्य", "भाउ",
];
const PRICE_SITES: &[&str] = &["daraz.com.np", "*.com.np"];

/// Upper bound on `summary_max_attempts`.
pub const MAX_SUMMARY_ATTEMPTS: u32 = 10;

/// A secret that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Custom Search JSON API key.
    pub search_api_key: Secret,
    /// Programmable Search Engine id (`cx`).
    pub search_engine_id: Secret,
    /// Gemini API key used for translation, embeddings and summaries.
    pub ai_api_key: Secret,
}

impl Credentials {
    fn from_env() -> Self {
        let ai_key = env_nonempty("GEMINI_API_KEY").or_else(|| env_nonempty("GOOGLE_AI_STUDIO_KEY"));
        Self {
            search_api_key: Secret::new(env_nonempty("GOOGLE_API_KEY").unwrap_or_default()),
            search_engine_id: Secret::new(
                env_nonempty("GOOGLE_SEARCH_ENGINE_ID").unwrap_or_default(),
            ),
            ai_api_key: Secret::new(ai_key.unwrap_or_default()),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmbeddingBackend {
    /// Gemini text embeddings (semantic).
    #[default]
    Gemini,
    /// Offline feature-hashing embedder (lexical, deterministic).
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Generic,
    /// Product pages: JSON-LD and price/stock/rating markup.
    Structured,
    /// Rate listings laid out as two-column tables.
    Tables,
}

/// Maps a host glob (`daraz.com.np`, `*.example.org`) to an extraction strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    pub pattern: String,
    pub strategy: StrategyKind,
}

impl ExtractionRule {
    pub fn new(pattern: &str, strategy: StrategyKind) -> Self {
        Self {
            pattern: pattern.to_string(),
            strategy,
        }
    }
}

/// Restricts retrieval to `sites` when the search text contains any of
/// `keywords` (whole words, plural `s` allowed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteBias {
    pub keywords: Vec<String>,
    pub sites: Vec<String>,
}

impl SiteBias {
    pub fn new(keywords: &[&str], sites: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            sites: sites.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        text.split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase())
            .any(|word| {
                self.keywords
                    .iter()
                    .any(|k| word == *k || word.strip_suffix('s') == Some(k.as_str()))
            })
    }

    /// `(site:a OR site:b)`
    pub fn operator(&self) -> String {
        let sites: Vec<String> = self.sites.iter().map(|s| format!("site:{s}")).collect();
        format!("({})", sites.join(" OR "))
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub credentials: Credentials,
    /// Candidates requested from the provider. Clamped to the provider limit.
    pub max_results: usize,
    pub relevance_high_threshold: f32,
    pub relevance_floor: f32,
    pub fetch_timeout_ms: u64,
    pub fetch_concurrency_limit: usize,
    pub request_deadline_ms: u64,
    /// Host patterns dropped before fetching. A bare domain also covers its subdomains.
    pub social_media_denylist: Vec<String>,
    /// URL path suffixes that never point at readable pages.
    pub blocked_extensions: Vec<String>,
    pub per_document_char_budget: usize,
    /// Extracted text shorter than this is not scored.
    pub min_document_chars: usize,
    pub english_search_pass: bool,
    pub localize_summary: bool,
    pub fallback_summary_docs: usize,
    pub ai_model: String,
    pub embedding_model: String,
    pub ai_timeout_ms: u64,
    pub summary_max_attempts: u32,
    pub summary_max_output_tokens: u32,
    pub embedding_backend: EmbeddingBackend,
    pub passage_words: usize,
    pub max_passages: usize,
    pub extraction_rules: Vec<ExtractionRule>,
    /// Site restrictions appended to matching search text. First match wins.
    pub site_bias: Vec<SiteBias>,
    /// Extra time ranking may take once the request deadline has passed.
    pub ranking_grace_ms: u64,
    /// Skips the internal-host guard. Only for local testing.
    pub allow_private_hosts: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            max_results: 10,
            relevance_high_threshold: 0.80,
            relevance_floor: 0.30,
            fetch_timeout_ms: 10_000,
            fetch_concurrency_limit: 5,
            request_deadline_ms: 45_000,
            social_media_denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            blocked_extensions: DEFAULT_BLOCKED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            per_document_char_budget: 2_000,
            min_document_chars: 200,
            english_search_pass: true,
            localize_summary: false,
            fallback_summary_docs: 3,
            ai_model: DEFAULT_AI_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            ai_timeout_ms: 20_000,
            summary_max_attempts: 2,
            summary_max_output_tokens: 1_024,
            embedding_backend: EmbeddingBackend::Gemini,
            passage_words: 120,
            max_passages: 8,
            extraction_rules: vec![
                ExtractionRule::new("daraz.com.np", StrategyKind::Structured),
                ExtractionRule::new("daraz.com", StrategyKind::Structured),
                ExtractionRule::new("hamropatro.com", StrategyKind::Tables),
            ],
            site_bias: vec![SiteBias::new(PRICE_KEYWORDS, PRICE_SITES)],
            ranking_grace_ms: 5_000,
            allow_private_hosts: false,
        }
    }
}

impl SearchConfig {
    /// Defaults plus credentials and model names from the environment.
    pub fn from_env() -> Self {
        let mut config = Self {
            credentials: Credentials::from_env(),
            ..Self::default()
        };
        if let Some(model) = env_nonempty("GEMINI_MODEL") {
            config.ai_model = model;
        }
        config
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }

    pub fn ranking_grace(&self) -> Duration {
        Duration::from_millis(self.ranking_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let creds = &self.credentials;
        if creds.search_api_key.is_empty() {
            return Err(ConfigError::MissingCredential("GOOGLE_API_KEY"));
        }
        if creds.search_engine_id.is_empty() {
            return Err(ConfigError::MissingCredential("GOOGLE_SEARCH_ENGINE_ID"));
        }
        if creds.ai_api_key.is_empty() {
            return Err(ConfigError::MissingCredential("GEMINI_API_KEY"));
        }

        let high = self.relevance_high_threshold;
        let floor = self.relevance_floor;
        if !(0.0..=1.0).contains(&high) {
            return Err(invalid("relevance_high_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&floor) {
            return Err(invalid("relevance_floor must be within [0, 1]"));
        }
        if floor > high {
            return Err(invalid(
                "relevance_floor must not exceed relevance_high_threshold",
            ));
        }

        for (value, name) in [
            (self.max_results, "max_results"),
            (self.fetch_concurrency_limit, "fetch_concurrency_limit"),
            (self.per_document_char_budget, "per_document_char_budget"),
            (self.passage_words, "passage_words"),
            (self.max_passages, "max_passages"),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be greater than 0")));
            }
        }
        for (value, name) in [
            (self.fetch_timeout_ms, "fetch_timeout_ms"),
            (self.request_deadline_ms, "request_deadline_ms"),
            (self.ai_timeout_ms, "ai_timeout_ms"),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be greater than 0")));
            }
        }
        if !(1..=MAX_SUMMARY_ATTEMPTS).contains(&self.summary_max_attempts) {
            return Err(invalid(&format!(
                "summary_max_attempts must be within [1, {MAX_SUMMARY_ATTEMPTS}]"
            )));
        }
        if self
            .site_bias
            .iter()
            .any(|b| b.keywords.is_empty() || b.sites.is_empty())
        {
            return Err(invalid("site_bias rules need keywords and sites"));
        }
        if self.ai_model.trim().is_empty() || self.embedding_model.trim().is_empty() {
            return Err(invalid("model names must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
pub(crate) fn test_config() -> SearchConfig {
    SearchConfig {
        credentials: Credentials {
            search_api_key: Secret::new("search-key"),
            search_engine_id: Secret::new("engine-id"),
            ai_api_key: Secret::new("ai-key"),
        },
        ..SearchConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SearchConfig::default();
        assert_eq!(config.max_results, 10);
        assert!((config.relevance_high_threshold - 0.80).abs() < f32::EPSILON);
        assert!((config.relevance_floor - 0.30).abs() < f32::EPSILON);
        assert!(config.social_media_denylist.iter().any(|d| d == "facebook.com"));
        assert_eq!(config.embedding_backend, EmbeddingBackend::Gemini);
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn defaults_without_credentials_fail_validation() {
        let err = SearchConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("GOOGLE_API_KEY")));
    }

    #[test]
    fn missing_ai_key_is_reported() {
        let mut config = test_config();
        config.credentials.ai_api_key = Secret::new("  ");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn complete_config_validates() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn floor_above_high_rejected() {
        let config = SearchConfig {
            relevance_floor: 0.9,
            relevance_high_threshold: 0.8,
            ..test_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("relevance_floor"));
    }

    #[test]
    fn nan_threshold_rejected() {
        let config = SearchConfig {
            relevance_high_threshold: f32::NAN,
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_limits_rejected() {
        let config = SearchConfig {
            fetch_concurrency_limit: 0,
            ..test_config()
        };
        assert!(config.validate().unwrap_err().to_string().contains("fetch_concurrency_limit"));

        let config = SearchConfig {
            request_deadline_ms: 0,
            ..test_config()
        };
        assert!(config.validate().unwrap_err().to_string().contains("request_deadline_ms"));
    }

    #[test]
    fn attempts_are_bounded() {
        for attempts in [0, MAX_SUMMARY_ATTEMPTS + 1, u32::MAX] {
            let config = SearchConfig {
                summary_max_attempts: attempts,
                ..test_config()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("summary_max_attempts"), "{attempts}");
        }
    }

    #[test]
    fn price_words_trigger_site_bias() {
        let bias = &SearchConfig::default().site_bias[0];
        assert!(bias.matches("iPhone 15 price in Nepal"));
        assert!(bias.matches("best laptop deals?"));
        assert!(bias.matches("आजको सुनको भाउ"));
        assert!(!bias.matches("separate concerns"));
        assert!(!bias.matches("best electric cars 2024"));
        assert_eq!(bias.operator(), "(site:daraz.com.np OR site:*.com.np)");
    }

    #[test]
    fn empty_site_bias_rejected() {
        let config = SearchConfig {
            site_bias: vec![SiteBias::new(&["price"], &[])],
            ..test_config()
        };
        assert!(config.validate().unwrap_err().to_string().contains("site_bias"));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let rendered = format!("{:?}", test_config().credentials);
        assert!(!rendered.contains("search-key"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
