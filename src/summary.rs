//! Multi-source synthesis of the high-relevance tier.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::ConfigError;
use crate::gemini::{CompletionClient, CompletionRequest, complete_with_retry};
use crate::query::{QueryTranslator, normalize_text};
use crate::types::{Language, Query, ScoredDocument};

pub const INSUFFICIENT_SOURCES: &str =
    "Insufficient relevant sources were found to answer this query.";
const FALLBACK_HEADER: &str = "An AI summary could not be generated. Top sources:";
/// Characters of extracted text used when a document has no snippet.
const FALLBACK_EXCERPT_CHARS: usize = 200;
const SOURCE_FIELD_TOKENS: u32 = 256;
const LOCALIZE_CONCURRENCY: usize = 4;

pub struct SummarySynthesizer<'a, C> {
    client: &'a C,
    char_budget: usize,
    max_attempts: u32,
    max_output_tokens: u32,
    fallback_docs: usize,
    localize: bool,
}

impl<'a, C: CompletionClient> SummarySynthesizer<'a, C> {
    pub fn new(client: &'a C, config: &SearchConfig) -> Self {
        Self {
            client,
            char_budget: config.per_document_char_budget,
            max_attempts: config.summary_max_attempts,
            max_output_tokens: config.summary_max_output_tokens,
            fallback_docs: config.fallback_summary_docs,
            localize: config.localize_summary,
        }
    }

    /// One synthesis request over `documents` (already in rank order). No
    /// documents yields [`INSUFFICIENT_SOURCES`], a failed call the
    /// title/snippet fallback. Only a rejected AI key is an error.
    pub async fn synthesize(
        &self,
        query: &Query,
        documents: &[ScoredDocument],
    ) -> Result<String, ConfigError> {
        if documents.is_empty() {
            debug!("no high-relevance documents, skipping synthesis");
            return Ok(INSUFFICIENT_SOURCES.to_string());
        }

        let request = CompletionRequest {
            prompt_text: self.prompt(query, documents),
            max_output_length: self.max_output_tokens,
        };

        let summary = match complete_with_retry(self.client, &request, self.max_attempts).await {
            Ok(text) => collapse_blank_lines(&text),
            Err(e) => {
                if let Some(fatal) = e.as_fatal() {
                    return Err(fatal);
                }
                warn!(error = %e, "summary synthesis failed, using source fallback");
                return Ok(fallback_summary(documents, self.fallback_docs));
            }
        };
        if summary.is_empty() {
            warn!("summary synthesis returned no text, using source fallback");
            return Ok(fallback_summary(documents, self.fallback_docs));
        }

        info!(sources = documents.len(), chars = summary.chars().count(), "summary synthesized");
        if self.localizes(query) {
            return Ok(self.localized(summary, query.detected_language).await);
        }
        Ok(summary)
    }

    /// Translates source titles and snippets into the query's language when
    /// localization is on. Fields that fail to translate stay in English.
    pub async fn localize_sources<'d>(
        &self,
        query: &Query,
        documents: impl IntoIterator<Item = &'d mut ScoredDocument>,
    ) {
        if !self.localizes(query) {
            return;
        }
        let language = query.detected_language;
        let translator = QueryTranslator::new(self.client, false);
        let fields = documents
            .into_iter()
            .flat_map(|scored| [&mut scored.document.title, &mut scored.document.snippet])
            .filter(|field| !field.trim().is_empty());

        stream::iter(fields)
            .for_each_concurrent(LOCALIZE_CONCURRENCY, |field| {
                let translator = &translator;
                async move {
                    let result = translator
                        .translate(field.as_str(), Language::En, language, SOURCE_FIELD_TOKENS)
                        .await;
                    match result {
                        Ok(text) => *field = normalize_text(&text),
                        Err(e) => debug!(error = %e, %language, "source field localization failed"),
                    }
                }
            })
            .await;
    }

    fn localizes(&self, query: &Query) -> bool {
        self.localize && query.detected_language != Language::En
    }

    /// Best effort: the English summary is kept if translation fails.
    async fn localized(&self, summary: String, language: Language) -> String {
        let translator = QueryTranslator::new(self.client, false);
        match translator
            .translate(&summary, Language::En, language, self.max_output_tokens)
            .await
        {
            Ok(text) => collapse_blank_lines(&text),
            Err(e) => {
                warn!(error = %e, %language, "summary localization failed, keeping English");
                summary
            }
        }
    }

    fn prompt(&self, query: &Query, documents: &[ScoredDocument]) -> String {
        let question = match &query.translated_text {
            Some(english) => format!("\"{}\" (in English: \"{english}\")", query.normalized_text),
            None => format!("\"{}\"", query.normalized_text),
        };

        let mut prompt = format!(
            "Write a comprehensive summary answering the query {question} using the sources below.\n\n\
             Requirements:\n\
             - Answer the query directly; for a specific question give the direct answer first.\n\
             - Synthesize across sources instead of summarizing each one in turn.\n\
             - Attribute claims with source numbers like [1] or [2][3].\n\
             - Include specific facts, figures and dates when available.\n\
             - Where sources disagree, say so and cite each side.\n\
             - If information seems outdated or uncertain, say so.\n\
             - Write in English, in clear paragraphs.\n\nSources:\n"
        );
        for (i, scored) in documents.iter().enumerate() {
            let doc = &scored.document;
            prompt.push_str(&format!(
                "\n[{n}] {title}\nURL: {url}\nRelevance: {score:.2}\n{text}\n",
                n = i + 1,
                title = doc.title,
                url = doc.url,
                score = scored.relevance_score,
                text = truncate_chars(&doc.extracted_text, self.char_budget),
            ));
        }
        prompt
    }
}

/// Deterministic `title: snippet` digest of the first `limit` documents.
pub fn fallback_summary(documents: &[ScoredDocument], limit: usize) -> String {
    let lines: Vec<String> = documents
        .iter()
        .take(limit.max(1))
        .map(|scored| {
            let doc = &scored.document;
            let snippet = doc.snippet.trim();
            let excerpt = if snippet.is_empty() {
                truncate_chars(doc.extracted_text.trim(), FALLBACK_EXCERPT_CHARS)
            } else {
                snippet
            };
            format!("- {}: {}", doc.title.trim(), excerpt.replace('\n', " "))
        })
        .collect();
    format!("{FALLBACK_HEADER}\n{}", lines.join("\n"))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Trims trailing spaces and keeps at most one blank line between paragraphs.
fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.trim().lines().map(str::trim_end) {
        if line.is_empty() && out.last().is_some_and(|prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}
