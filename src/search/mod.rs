//! Candidate retrieval from the web search provider.

pub mod provider;
mod retriever;

pub use provider::{GoogleSearch, ProviderError, SearchHit, SearchProvider, SearchRequest};
pub use retriever::CandidateRetriever;
