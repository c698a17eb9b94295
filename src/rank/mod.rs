//! Relevance scoring: embeds the query and each document's passages, scores a
//! document by its best-matching passage, then assigns tiers.

pub mod embed;
pub mod tier;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::ConfigError;
use crate::types::{Document, Query, ScoredDocument, Tier};
use embed::{Embedder, cosine_similarity};
use tier::Thresholds;

pub struct RelevanceRanker<'a, E> {
    embedder: &'a E,
    thresholds: Thresholds,
    min_document_chars: usize,
    passage_words: usize,
    max_passages: usize,
    concurrency: usize,
    deadline: Option<Instant>,
}

impl<'a, E: Embedder> RelevanceRanker<'a, E> {
    pub fn new(embedder: &'a E, config: &SearchConfig) -> Self {
        Self {
            embedder,
            thresholds: Thresholds::from_config(config),
            min_document_chars: config.min_document_chars,
            passage_words: config.passage_words,
            max_passages: config.max_passages,
            concurrency: config.fetch_concurrency_limit.max(1),
            deadline: None,
        }
    }

    /// Documents still unscored at `deadline` are discarded.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Scores every document, preserving input order. Unfetched or too-short
    /// documents get score 0 and are discarded without touching the embedder.
    /// Only a rejected embedding credential is returned as an error.
    pub async fn score(
        &self,
        query: &Query,
        documents: Vec<Document>,
    ) -> Result<Vec<ScoredDocument>, ConfigError> {
        let embedded = self.before_deadline(self.embedder.embed(query.search_text()));
        let query_vector = match embedded.await {
            Some(Ok(v)) => Some(v),
            Some(Err(e)) => {
                if let Some(fatal) = e.as_fatal() {
                    return Err(fatal);
                }
                warn!(error = %e, "query embedding failed, all documents score 0");
                None
            }
            None => {
                warn!("ranking deadline reached before the query was embedded");
                None
            }
        };

        let scored: Vec<ScoredDocument> = stream::iter(documents)
            .map(|doc| {
                let query_vector = query_vector.as_deref();
                async move {
                    let score = match query_vector {
                        Some(q) if self.is_scorable(&doc) => {
                            match self.before_deadline(self.score_document(q, &doc)).await {
                                Some(score) => score,
                                None => {
                                    warn!(url = %doc.url, "ranking deadline reached, discarding");
                                    None
                                }
                            }
                        }
                        _ => None,
                    };
                    match score {
                        Some(s) => ScoredDocument {
                            tier: self.thresholds.tier(s),
                            relevance_score: s,
                            document: doc,
                        },
                        None => ScoredDocument {
                            document: doc,
                            relevance_score: 0.0,
                            tier: Tier::Discarded,
                        },
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;
        Ok(scored)
    }

    async fn before_deadline<T>(&self, future: impl Future<Output = T>) -> Option<T> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
            None => Some(future.await),
        }
    }

    fn is_scorable(&self, doc: &Document) -> bool {
        doc.is_ok() && doc.extracted_text.chars().count() >= self.min_document_chars
    }

    async fn score_document(&self, query_vector: &[f32], doc: &Document) -> Option<f32> {
        let passages = split_passages(&doc.extracted_text, self.passage_words, self.max_passages);
        let refs: Vec<&str> = passages.iter().map(String::as_str).collect();

        let vectors = match self.embedder.embed_batch(&refs).await {
            Ok(v) => v,
            Err(e) => {
                warn!(url = %doc.url, error = %e, "document embedding failed");
                return None;
            }
        };

        let best = vectors
            .iter()
            .map(|v| clamp_unit(cosine_similarity(query_vector, v)))
            .fold(0.0_f32, f32::max);
        debug!(url = %doc.url, passages = refs.len(), score = best, "document scored");
        Some(best)
    }
}

fn clamp_unit(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Consecutive windows of `words` words, at most `max` of them.
fn split_passages(text: &str, words: usize, max: usize) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens
        .chunks(words.max(1))
        .take(max.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}
