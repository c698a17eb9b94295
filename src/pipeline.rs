//! Request orchestration: normalize → retrieve → filter → fetch → rank →
//! summarize. Only configuration problems surface as errors.

use std::fmt;
use std::pin::pin;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{EmbeddingBackend, SearchConfig};
use crate::error::ConfigError;
use crate::fetch::{ContentFetcher, DnsResolver};
use crate::filter::NoiseFilter;
use crate::gemini::{CompletionClient, GeminiClient};
use crate::query::QueryTranslator;
use crate::rank::RelevanceRanker;
use crate::rank::embed::{Embedder, EmbeddingModel, HashEmbedder};
use crate::rank::tier::partition;
use crate::search::{CandidateRetriever, GoogleSearch, SearchProvider};
use crate::summary::SummarySynthesizer;
use crate::types::{Candidate, Document, FetchStatus, SearchResult, SearchStats};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Client-wide ceiling; individual calls set tighter timeouts.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Normalizing,
    Retrieving,
    Filtering,
    Fetching,
    Ranking,
    Summarizing,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Normalizing => "normalizing",
            PipelineStage::Retrieving => "retrieving",
            PipelineStage::Filtering => "filtering",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Ranking => "ranking",
            PipelineStage::Summarizing => "summarizing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Runs one search with the production Google and Gemini clients.
///
/// Fails only when `config` is unusable (missing or rejected credentials, bad
/// thresholds or domain patterns); every other problem degrades the returned
/// result.
pub async fn run_search(
    raw_query_text: &str,
    config: &SearchConfig,
) -> Result<SearchResult, ConfigError> {
    let services = Services::build(config)
        .inspect_err(|e| error!(stage = %PipelineStage::Failed, error = %e, "search aborted"))?;

    let pipeline = Pipeline::new(
        config,
        &services.search,
        &services.gemini,
        &services.embedder,
        &services.fetcher,
        &services.filter,
    );
    pipeline.run(raw_query_text).await
}

struct Services {
    search: GoogleSearch,
    gemini: GeminiClient,
    embedder: EmbeddingModel,
    fetcher: ContentFetcher,
    filter: NoiseFilter,
}

impl Services {
    fn build(config: &SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        let gemini = GeminiClient::new(http.clone(), config);
        let embedder = match config.embedding_backend {
            EmbeddingBackend::Gemini => EmbeddingModel::Gemini(gemini.clone()),
            EmbeddingBackend::Hash => EmbeddingModel::Hash(HashEmbedder::default()),
        };
        Ok(Self {
            search: GoogleSearch::new(http.clone(), config),
            fetcher: ContentFetcher::new(http, config)?,
            filter: NoiseFilter::from_config(config)?,
            gemini,
            embedder,
        })
    }
}

/// The pipeline over injectable collaborators.
pub struct Pipeline<'a, S, C, E, R> {
    config: &'a SearchConfig,
    provider: &'a S,
    completion: &'a C,
    embedder: &'a E,
    fetcher: &'a ContentFetcher<R>,
    filter: &'a NoiseFilter,
}

impl<'a, S, C, E, R> Pipeline<'a, S, C, E, R>
where
    S: SearchProvider,
    C: CompletionClient,
    E: Embedder,
    R: DnsResolver,
{
    pub fn new(
        config: &'a SearchConfig,
        provider: &'a S,
        completion: &'a C,
        embedder: &'a E,
        fetcher: &'a ContentFetcher<R>,
        filter: &'a NoiseFilter,
    ) -> Self {
        Self {
            config,
            provider,
            completion,
            embedder,
            fetcher,
            filter,
        }
    }

    /// Reaches `Done` and returns a result, possibly with empty tiers and a
    /// placeholder summary. A provider rejecting a credential aborts the run.
    pub async fn run(&self, raw_query_text: &str) -> Result<SearchResult, ConfigError> {
        self.run_stages(raw_query_text)
            .await
            .inspect_err(|e| error!(stage = %PipelineStage::Failed, error = %e, "search aborted"))
    }

    async fn run_stages(&self, raw_query_text: &str) -> Result<SearchResult, ConfigError> {
        let deadline = Instant::now() + self.config.request_deadline();

        debug!(stage = %PipelineStage::Normalizing, "stage started");
        let query = QueryTranslator::new(self.completion, self.config.english_search_pass)
            .normalize(raw_query_text)
            .await?;

        debug!(stage = %PipelineStage::Retrieving, "stage started");
        let candidates = CandidateRetriever::new(self.provider)
            .with_site_bias(&self.config.site_bias)
            .retrieve(
                query.search_text(),
                self.config.max_results,
                query.search_language(),
            )
            .await?;

        debug!(stage = %PipelineStage::Filtering, count = candidates.len(), "stage started");
        let candidates = self.filter.filter(candidates);

        debug!(stage = %PipelineStage::Fetching, count = candidates.len(), "stage started");
        let documents = self.fetch_all(&candidates, deadline).await;
        let fetched_ok = documents.iter().filter(|d| d.is_ok()).count();

        debug!(stage = %PipelineStage::Ranking, count = fetched_ok, "stage started");
        let ranking_deadline = deadline.max(Instant::now()) + self.config.ranking_grace();
        let scored = RelevanceRanker::new(self.embedder, self.config)
            .with_deadline(ranking_deadline)
            .score(&query, documents)
            .await?;
        let mut tiers = partition(scored);

        debug!(stage = %PipelineStage::Summarizing, count = tiers.high.len(), "stage started");
        let synthesizer = SummarySynthesizer::new(self.completion, self.config);
        let summary_text = synthesizer.synthesize(&query, &tiers.high).await?;
        synthesizer
            .localize_sources(&query, tiers.high.iter_mut().chain(tiers.related.iter_mut()))
            .await;

        let stats = SearchStats {
            candidates: candidates.len(),
            fetched_ok,
            fetch_failed: candidates.len() - fetched_ok,
            discarded: tiers.discarded,
        };
        info!(
            stage = %PipelineStage::Done,
            high = tiers.high.len(),
            related = tiers.related.len(),
            discarded = tiers.discarded,
            "search complete"
        );

        Ok(SearchResult {
            summary_text,
            high_relevance: tiers.high,
            related: tiers.related,
            query_echo: query,
            stats,
        })
    }

    /// Fetches concurrently up to the configured limit. Fetches still running
    /// at `deadline` are abandoned and recorded as errors. Output order
    /// follows `candidates`.
    async fn fetch_all(&self, candidates: &[Candidate], deadline: Instant) -> Vec<Document> {
        let mut slots: Vec<Option<Document>> = vec![None; candidates.len()];
        let mut fetches = pin!(
            stream::iter(candidates.iter().enumerate())
                .map(|(i, candidate)| async move { (i, self.fetcher.fetch(candidate).await) })
                .buffer_unordered(self.config.fetch_concurrency_limit.max(1))
        );

        loop {
            match tokio::time::timeout_at(deadline, fetches.next()).await {
                Ok(Some((i, document))) => slots[i] = Some(document),
                Ok(None) => break,
                Err(_) => {
                    let pending = slots.iter().filter(|s| s.is_none()).count();
                    warn!(pending, "request deadline reached, abandoning in-flight fetches");
                    break;
                }
            }
        }

        slots
            .into_iter()
            .zip(candidates)
            .map(|(slot, candidate)| {
                slot.unwrap_or_else(|| Document::unfetched(candidate, FetchStatus::Error))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::gemini::CompletionError;
    use crate::rank::embed::EmbedError;
    use crate::search::ProviderError;
    use crate::summary::{INSUFFICIENT_SOURCES, fallback_summary};
    use crate::testing::{ScriptedCompletion, ScriptedSearch};
    use crate::types::Language;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Texts mentioning "electric" point one way, everything else the other.
    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("electric") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn ev_page(i: usize) -> String {
        format!(
            "<html><head><title>EV review {i}</title></head><body><main>\
             <p>Review {i}: the electric hatchback we tested this year offers a real-world range \
             of well over four hundred kilometres on a single charge.</p>\
             <p>Charging from ten to eighty percent on a fast charger took about twenty minutes, \
             and the electric motor delivers instant torque in city traffic.</p>\
             </main></body></html>"
        )
    }

    async fn serve_pages(server: &MockServer, count: usize, slow: &[usize]) -> Vec<String> {
        for i in 0..count {
            let mut response = ResponseTemplate::new(200).set_body_raw(ev_page(i), "text/html");
            if slow.contains(&i) {
                response = response.set_delay(Duration::from_secs(3));
            }
            Mock::given(method("GET"))
                .and(path(format!("/ev/{i}")))
                .respond_with(response)
                .mount(server)
                .await;
        }
        (0..count).map(|i| format!("{}/ev/{i}", server.uri())).collect()
    }

    fn local_config() -> SearchConfig {
        SearchConfig {
            allow_private_hosts: true,
            fetch_timeout_ms: 500,
            ..test_config()
        }
    }

    async fn try_run(
        config: &SearchConfig,
        provider: &ScriptedSearch,
        completion: &ScriptedCompletion,
        query: &str,
    ) -> Result<SearchResult, ConfigError> {
        let fetcher = ContentFetcher::new(Client::new(), config).unwrap();
        let filter = NoiseFilter::from_config(config).unwrap();
        Pipeline::new(config, provider, completion, &KeywordEmbedder, &fetcher, &filter)
            .run(query)
            .await
    }

    async fn run(
        config: &SearchConfig,
        provider: &ScriptedSearch,
        completion: &ScriptedCompletion,
        query: &str,
    ) -> SearchResult {
        try_run(config, provider, completion, query).await.unwrap()
    }

    #[tokio::test]
    async fn relevant_pages_become_high_tier_despite_one_timeout() {
        let server = MockServer::start().await;
        let urls = serve_pages(&server, 5, &[4]).await;
        let provider = ScriptedSearch::hits(&urls);
        let completion =
            ScriptedCompletion::new(vec![Ok("Four strong picks [1][2][3][4].".into())]);

        let result = run(&local_config(), &provider, &completion, "best electric cars 2024").await;

        assert_eq!(result.high_relevance.len(), 4);
        assert!(result.related.is_empty());
        assert_eq!(result.summary_text, "Four strong picks [1][2][3][4].");
        assert!(result.high_relevance.iter().all(|d| d.relevance_score >= 0.8));
        assert!(result.high_relevance.iter().all(|d| d.document.url != urls[4]));
        assert_eq!(
            result.stats,
            SearchStats {
                candidates: 5,
                fetched_ok: 4,
                fetch_failed: 1,
                discarded: 1,
            }
        );

        let prompts = completion.prompts();
        assert_eq!(prompts.len(), 1);
        for url in &urls[..4] {
            assert!(prompts[0].contains(url.as_str()));
        }
        assert_eq!(result.query_echo.detected_language, Language::En);
    }

    #[tokio::test]
    async fn failed_translation_searches_in_nepali() {
        let provider = ScriptedSearch::new(Ok(vec![]));
        let completion = ScriptedCompletion::new(vec![Err(CompletionError::ServerError {
            code: 503,
            message: "overloaded".into(),
        })]);

        let result = run(&local_config(), &provider, &completion, "नेपालको राजधानी").await;

        assert_eq!(result.query_echo.detected_language, Language::Ne);
        assert!(result.query_echo.translated_text.is_none());
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query_text, "नेपालको राजधानी");
        assert_eq!(requests[0].language_hint, Language::Ne);
        assert_eq!(result.summary_text, INSUFFICIENT_SOURCES);
    }

    #[tokio::test]
    async fn social_only_candidates_yield_empty_tiers() {
        let provider = ScriptedSearch::hits(&[
            "https://www.facebook.com/evnepal".to_string(),
            "https://www.instagram.com/p/abc".to_string(),
            "https://twitter.com/ev/status/1".to_string(),
        ]);
        let completion = ScriptedCompletion::new(vec![]);

        let result = run(&local_config(), &provider, &completion, "electric cars nepal").await;

        assert!(result.high_relevance.is_empty());
        assert!(result.related.is_empty());
        assert_eq!(result.stats, SearchStats::default());
        assert_eq!(result.summary_text, INSUFFICIENT_SOURCES);
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_source_digest() {
        let server = MockServer::start().await;
        let urls = serve_pages(&server, 3, &[]).await;
        let provider = ScriptedSearch::hits(&urls);
        let completion = ScriptedCompletion::new(vec![Err(CompletionError::InvalidRequest(
            "blocked prompt".into(),
        ))]);

        let result = run(&local_config(), &provider, &completion, "best electric cars 2024").await;

        assert_eq!(result.high_relevance.len(), 3);
        assert_eq!(result.summary_text, fallback_summary(&result.high_relevance, 3));
        assert!(result.summary_text.contains("- Source 0: Snippet 0"));
        assert!(result.summary_text.contains("- Source 2: Snippet 2"));
    }

    #[tokio::test]
    async fn empty_retrieval_still_completes() {
        let provider = ScriptedSearch::new(Err(ProviderError::QuotaExceeded("daily".into())));
        let completion = ScriptedCompletion::new(vec![]);

        let result = run(&local_config(), &provider, &completion, "best electric cars 2024").await;

        assert!(result.high_relevance.is_empty());
        assert!(result.related.is_empty());
        assert_eq!(result.summary_text, INSUFFICIENT_SOURCES);
        assert_eq!(result.query_echo.normalized_text, "best electric cars 2024");
    }

    #[tokio::test]
    async fn deadline_abandons_slow_fetches() {
        let server = MockServer::start().await;
        let urls = serve_pages(&server, 2, &[1]).await;
        let provider = ScriptedSearch::hits(&urls);
        let completion = ScriptedCompletion::new(vec![Ok("One source [1].".into())]);
        let config = SearchConfig {
            fetch_timeout_ms: 10_000,
            request_deadline_ms: 600,
            ..local_config()
        };

        let started = std::time::Instant::now();
        let result = run(&config, &provider, &completion, "best electric cars 2024").await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.high_relevance.len(), 1);
        assert_eq!(result.high_relevance[0].document.url, urls[0]);
        assert_eq!(result.stats.fetch_failed, 1);
    }

    #[tokio::test]
    async fn unrelated_pages_are_never_tiered_high() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recipes"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><main><p>Momo dough needs flour, water and a pinch of salt. \
                 Rest it for thirty minutes before rolling thin wrappers for the filling.</p>\
                 <p>Steam the dumplings for ten to twelve minutes and serve them hot with a \
                 tomato and sesame achar on the side.</p></main></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;
        let provider = ScriptedSearch::hits(&[format!("{}/recipes", server.uri())]);
        let completion = ScriptedCompletion::new(vec![]);

        let result = run(&local_config(), &provider, &completion, "best electric cars 2024").await;

        assert!(result.high_relevance.is_empty());
        assert!(result.related.is_empty());
        assert_eq!(result.stats.discarded, 1);
        assert_eq!(result.summary_text, INSUFFICIENT_SOURCES);
    }

    #[tokio::test]
    async fn rejected_search_key_aborts_the_run() {
        let provider = ScriptedSearch::new(Err(ProviderError::Unauthorized(
            "API key not valid. Please pass a valid API key.".into(),
        )));
        let completion = ScriptedCompletion::new(vec![]);

        let err = try_run(&local_config(), &provider, &completion, "best electric cars 2024")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::CredentialRejected { credential: "GOOGLE_API_KEY", .. }
        ));
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn rejected_ai_key_aborts_the_run() {
        let server = MockServer::start().await;
        let urls = serve_pages(&server, 2, &[]).await;
        let provider = ScriptedSearch::hits(&urls);
        let completion = ScriptedCompletion::new(vec![Err(CompletionError::Unauthorized(
            "API key not valid".into(),
        ))]);

        let err = try_run(&local_config(), &provider, &completion, "best electric cars 2024")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::CredentialRejected { credential: "GEMINI_API_KEY", .. }
        ));
    }

    #[tokio::test]
    async fn price_queries_are_biased_towards_local_shops() {
        let provider = ScriptedSearch::new(Ok(vec![]));
        let completion = ScriptedCompletion::new(vec![]);

        let result = run(&local_config(), &provider, &completion, "iphone 15 price").await;

        assert_eq!(
            provider.requests()[0].query_text,
            "iphone 15 price (site:daraz.com.np OR site:*.com.np)"
        );
        assert_eq!(result.query_echo.normalized_text, "iphone 15 price");
    }

    #[tokio::test]
    async fn localized_run_translates_sources() {
        let server = MockServer::start().await;
        let urls = serve_pages(&server, 1, &[]).await;
        let provider = ScriptedSearch::hits(&urls);
        let completion = ScriptedCompletion::new(vec![
            Ok("electric cars".into()),
            Ok("One electric review [1].".into()),
            Ok("एउटा समीक्षा [1]।".into()),
            Ok("स्रोत".into()),
            Ok("स्रोत".into()),
        ]);
        let config = SearchConfig {
            localize_summary: true,
            ..local_config()
        };

        let result = run(&config, &provider, &completion, "विद्युतीय कार").await;

        assert_eq!(result.summary_text, "एउटा समीक्षा [1]।");
        assert_eq!(result.high_relevance.len(), 1);
        let doc = &result.high_relevance[0].document;
        assert_eq!(doc.title, "स्रोत");
        assert_eq!(doc.snippet, "स्रोत");
        assert_eq!(completion.prompts().len(), 5);
    }

    #[tokio::test]
    async fn run_search_rejects_missing_credentials() {
        let err = run_search("anything", &SearchConfig::default()).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(_)));
    }

    #[test]
    fn stage_names() {
        assert_eq!(PipelineStage::Summarizing.to_string(), "summarizing");
        assert_eq!(PipelineStage::Failed.to_string(), "failed");
    }
}
