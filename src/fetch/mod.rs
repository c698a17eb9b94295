//! Per-candidate page retrieval and text extraction. A fetch never fails:
//! every problem ends up as a `FetchStatus` on the returned `Document`.

pub mod extractor;
pub mod guard;
mod strategies;

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::ConfigError;
use crate::query::detect_language;
use crate::types::{Candidate, Document, FetchStatus};
pub use extractor::{ContentExtractor, Extracted, ExtractorRegistry, GenericExtractor};
pub use guard::{DnsResolver, HostGuard, TokioDnsResolver};
pub use strategies::{StructuredExtractor, TableExtractor};

use extractor::collapse_whitespace;
use guard::redact_credentials;

const MAX_RESPONSE_BYTES: usize = 10_000_000;
/// How far into an HTML body a `<meta charset>` is looked for.
const META_CHARSET_WINDOW: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL: must be HTTP(S)")]
    InvalidScheme,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("blocked: internal/private host not allowed")]
    InternalHost,

    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    #[error("fetch failed: status {0}")]
    Status(u16),

    #[error("response too large (>{} bytes)", MAX_RESPONSE_BYTES)]
    TooLarge,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("fetch timed out")]
    Timeout,
}

impl FetchError {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchError::InternalHost => FetchStatus::Blocked,
            FetchError::Status(401 | 403 | 429) => FetchStatus::Blocked,
            _ => FetchStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    PlainText,
}

struct Page {
    final_url: String,
    body: String,
    kind: BodyKind,
}

pub struct ContentFetcher<R = TokioDnsResolver> {
    http: Client,
    registry: ExtractorRegistry,
    guard: HostGuard<R>,
    timeout: Duration,
}

impl ContentFetcher<TokioDnsResolver> {
    pub fn new(http: Client, config: &SearchConfig) -> Result<Self, ConfigError> {
        Self::with_resolver(http, config, TokioDnsResolver)
    }
}

impl<R: DnsResolver> ContentFetcher<R> {
    pub fn with_resolver(
        http: Client,
        config: &SearchConfig,
        resolver: R,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            http,
            registry: ExtractorRegistry::from_config(config)?,
            guard: HostGuard::new(resolver, config.allow_private_hosts),
            timeout: config.fetch_timeout(),
        })
    }

    /// Retrieves and extracts one candidate within the per-fetch timeout.
    pub async fn fetch(&self, candidate: &Candidate) -> Document {
        let outcome = match tokio::time::timeout(self.timeout, self.fetch_page(&candidate.url)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %redact_credentials(&candidate.url), error = %e, "fetch failed");
                return Document::unfetched(candidate, e.status());
            }
        };

        let extracted = match page.kind {
            BodyKind::Html => self.registry.extract(&page.body, &page.final_url),
            BodyKind::PlainText => Extracted {
                title: None,
                text: page
                    .body
                    .lines()
                    .map(collapse_whitespace)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
        };

        if extracted.text.trim().is_empty() {
            debug!(url = %redact_credentials(&candidate.url), "page had no extractable text");
            return Document::unfetched(candidate, FetchStatus::Empty);
        }

        debug!(
            url = %redact_credentials(&page.final_url),
            bytes = page.body.len(),
            chars = extracted.text.chars().count(),
            "page fetched"
        );

        let title = if candidate.title.trim().is_empty() {
            extracted.title.unwrap_or_else(|| candidate.url.clone())
        } else {
            candidate.title.clone()
        };
        Document {
            url: candidate.url.clone(),
            title,
            snippet: candidate.snippet.clone(),
            source_rank: candidate.source_rank,
            language: detect_language(&extracted.text),
            extracted_text: extracted.text,
            fetch_status: FetchStatus::Ok,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        self.guard.check(url).await?;
        let page = download(&self.http, url).await?;

        // Redirects may land somewhere the original URL did not point.
        if page.final_url != url {
            self.guard.check(&page.final_url).await?;
        }
        Ok(page)
    }
}

async fn download(client: &Client, url: &str) -> Result<Page, FetchError> {
    let response = client
        .get(url)
        .header("User-Agent", crate::USER_AGENT)
        .header("Accept", "text/html,application/xhtml+xml,text/plain;q=0.9")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let kind = body_kind(content_type.as_deref())?;

    if let Some(len) = response.content_length()
        && len as usize > MAX_RESPONSE_BYTES
    {
        return Err(FetchError::TooLarge);
    }

    let mut bytes = Vec::new();
    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        bytes.extend_from_slice(&chunk);
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge);
        }
    }

    let encoding = content_type
        .as_deref()
        .and_then(header_charset)
        .or_else(|| (kind == BodyKind::Html).then(|| meta_charset(&bytes)).flatten())
        .unwrap_or(UTF_8);
    // decode() prefers a byte-order mark over the declared encoding
    let (body, _, _) = encoding.decode(&bytes);

    Ok(Page {
        final_url,
        body: body.into_owned(),
        kind,
    })
}

/// A missing header is treated as HTML.
fn body_kind(content_type: Option<&str>) -> Result<BodyKind, FetchError> {
    let Some(content_type) = content_type else {
        return Ok(BodyKind::Html);
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" | "" => Ok(BodyKind::Html),
        "text/plain" => Ok(BodyKind::PlainText),
        _ => Err(FetchError::UnsupportedContentType(mime)),
    }
}

fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| Encoding::for_label(label.trim().trim_matches('"').as_bytes()))
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_CHARSET_WINDOW)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    Encoding::for_label(label.as_bytes())
}
