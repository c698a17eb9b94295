//! Scripted collaborators shared by the summary and pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::gemini::{CompletionClient, CompletionError, CompletionRequest};
use crate::search::provider::{ProviderError, SearchHit, SearchProvider, SearchRequest};

/// Replays queued completions in order; an exhausted script answers `Empty`.
pub(crate) struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<String, CompletionError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub(crate) fn new(responses: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(request.prompt_text.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::Empty))
    }
}

pub(crate) struct ScriptedSearch {
    response: Mutex<Option<Result<Vec<SearchHit>, ProviderError>>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSearch {
    pub(crate) fn new(response: Result<Vec<SearchHit>, ProviderError>) -> Self {
        Self {
            response: Mutex::new(Some(response)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn hits(urls: &[String]) -> Self {
        Self::new(Ok(urls
            .iter()
            .enumerate()
            .map(|(i, url)| SearchHit {
                url: url.clone(),
                title: format!("Source {i}"),
                snippet: format!("Snippet {i}"),
            })
            .collect()))
    }

    pub(crate) fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SearchProvider for ScriptedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.response.lock().unwrap().take().unwrap_or(Ok(Vec::new()))
    }
}
