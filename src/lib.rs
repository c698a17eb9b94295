//! Bilingual (English/Nepali) web search: retrieves candidate pages, extracts
//! their text, ranks them by semantic relevance and summarizes the best ones.

pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod gemini;
pub mod pipeline;
pub mod query;
pub mod rank;
pub mod report;
pub mod search;
pub mod summary;
pub mod types;

#[cfg(test)]
mod testing;

pub const USER_AGENT: &str = concat!("khoj/", env!("CARGO_PKG_VERSION"));

pub use config::SearchConfig;
pub use error::ConfigError;
pub use pipeline::{Pipeline, PipelineStage, run_search};
pub use types::{Document, FetchStatus, Language, Query, ScoredDocument, SearchResult, Tier};
