use tracing::{debug, warn};

use super::provider::{PROVIDER_MAX_RESULTS, SearchProvider, SearchRequest};
use crate::config::SiteBias;
use crate::error::ConfigError;
use crate::types::{Candidate, Language};

pub struct CandidateRetriever<'a, P> {
    provider: &'a P,
    site_bias: &'a [SiteBias],
}

impl<'a, P: SearchProvider> CandidateRetriever<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            site_bias: &[],
        }
    }

    pub fn with_site_bias(mut self, site_bias: &'a [SiteBias]) -> Self {
        self.site_bias = site_bias;
        self
    }

    /// One provider call. Provider failures degrade to an empty list; the
    /// requested count is clamped to what the provider can return. Only a
    /// rejected credential is returned as an error.
    pub async fn retrieve(
        &self,
        query_text: &str,
        max_results: usize,
        language_hint: Language,
    ) -> Result<Vec<Candidate>, ConfigError> {
        if query_text.trim().is_empty() {
            warn!("empty query, skipping retrieval");
            return Ok(Vec::new());
        }

        let result_count = max_results.clamp(1, PROVIDER_MAX_RESULTS);
        let request = SearchRequest {
            query_text: self.biased(query_text),
            result_count,
            language_hint,
        };

        let hits = match self.provider.search(&request).await {
            Ok(hits) => hits,
            Err(e) => {
                if let Some(fatal) = e.as_fatal() {
                    return Err(fatal);
                }
                warn!(error = %e, "search provider failed, continuing with no candidates");
                return Ok(Vec::new());
            }
        };

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .enumerate()
            .filter(|(_, hit)| !hit.url.trim().is_empty())
            .take(result_count)
            .map(|(source_rank, hit)| Candidate {
                url: hit.url.trim().to_string(),
                title: hit.title,
                snippet: hit.snippet,
                source_rank,
            })
            .collect();

        debug!(count = candidates.len(), "candidates retrieved");
        Ok(candidates)
    }

    fn biased(&self, query_text: &str) -> String {
        match self.site_bias.iter().find(|b| b.matches(query_text)) {
            Some(bias) => {
                let operator = bias.operator();
                debug!(sites = %operator, "restricting search to biased sites");
                format!("{query_text} {operator}")
            }
            None => query_text.to_string(),
        }
    }
}
