//! Query normalization, language detection and best-effort translation.

mod lang;

pub use lang::{detect_language, normalize_text};

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::gemini::{CompletionClient, CompletionError, CompletionRequest};
use crate::types::{Language, Query};

const QUERY_TRANSLATION_TOKENS: u32 = 128;

pub struct QueryTranslator<'a, C> {
    client: &'a C,
    english_search_pass: bool,
}

impl<'a, C: CompletionClient> QueryTranslator<'a, C> {
    pub fn new(client: &'a C, english_search_pass: bool) -> Self {
        Self {
            client,
            english_search_pass,
        }
    }

    /// A failed translation leaves `translated_text` unset and retrieval
    /// continues in the original language. Only a rejected AI key is an error.
    pub async fn normalize(&self, raw_text: &str) -> Result<Query, ConfigError> {
        let normalized_text = normalize_text(raw_text);
        let detected_language = detect_language(&normalized_text);

        let translated_text = if detected_language != Language::En
            && self.english_search_pass
            && !normalized_text.is_empty()
        {
            match self
                .translate(
                    &normalized_text,
                    detected_language,
                    Language::En,
                    QUERY_TRANSLATION_TOKENS,
                )
                .await
            {
                Ok(text) => first_line(&text).filter(|t| *t != normalized_text),
                Err(e) => {
                    if let Some(fatal) = e.as_fatal() {
                        return Err(fatal);
                    }
                    warn!(error = %e, "query translation failed, searching in original language");
                    None
                }
            }
        } else {
            None
        };

        debug!(
            language = %detected_language,
            translated = translated_text.is_some(),
            "query normalized"
        );
        Ok(Query {
            raw_text: raw_text.to_string(),
            detected_language,
            normalized_text,
            translated_text,
        })
    }

    /// One attempt, no retry.
    pub async fn translate(
        &self,
        text: &str,
        from: Language,
        to: Language,
        max_output_length: u32,
    ) -> Result<String, CompletionError> {
        let request = CompletionRequest {
            prompt_text: translation_prompt(text, from, to),
            max_output_length,
        };
        let translated = self.client.complete(&request).await?;
        let trimmed = translated.trim();
        if trimmed.is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(trimmed.to_string())
    }
}

fn translation_prompt(text: &str, from: Language, to: Language) -> String {
    format!(
        "Translate the following {from} text to {to}.\n\
         Keep numbers, dates, names and technical terms accurate; keep a term in \
         English if that is how it is normally written in {to}.\n\
         Keep the paragraph structure.\n\
         Reply with the translation only, without explanations or quotes.\n\n\
         Text:\n{text}",
        from = from.name(),
        to = to.name(),
    )
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(|l| l.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”'))
        .find(|l| !l.is_empty())
        .map(normalize_text)
}
