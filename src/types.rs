//! Values that flow between pipeline stages.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ne,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ne => "ne",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ne => "Nepali",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A normalized user query. Built once by the translator and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub raw_text: String,
    pub detected_language: Language,
    pub normalized_text: String,
    pub translated_text: Option<String>,
}

impl Query {
    /// Text used for retrieval and scoring: the English translation when one
    /// exists, otherwise the normalized original.
    pub fn search_text(&self) -> &str {
        self.translated_text
            .as_deref()
            .unwrap_or(&self.normalized_text)
    }

    /// Language of [`Query::search_text`].
    pub fn search_language(&self) -> Language {
        if self.translated_text.is_some() {
            Language::En
        } else {
            self.detected_language
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Zero-based position in the provider's response.
    pub source_rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Ok,
    Blocked,
    Empty,
    Error,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Blocked => "blocked",
            FetchStatus::Empty => "empty",
            FetchStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source_rank: usize,
    pub extracted_text: String,
    pub fetch_status: FetchStatus,
    pub language: Language,
}

impl Document {
    /// A document for a candidate that could not be fetched or yielded no text.
    pub fn unfetched(candidate: &Candidate, status: FetchStatus) -> Self {
        Self {
            url: candidate.url.clone(),
            title: candidate.title.clone(),
            snippet: candidate.snippet.clone(),
            source_rank: candidate.source_rank,
            extracted_text: String::new(),
            fetch_status: status,
            language: Language::En,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fetch_status == FetchStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Related,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    pub relevance_score: f32,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub candidates: usize,
    pub fetched_ok: usize,
    pub fetch_failed: usize,
    pub discarded: usize,
}

/// Final artifact of one search request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub summary_text: String,
    pub high_relevance: Vec<ScoredDocument>,
    pub related: Vec<ScoredDocument>,
    pub query_echo: Query,
    pub stats: SearchStats,
}
