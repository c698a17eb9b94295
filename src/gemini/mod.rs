//! Gemini API client: text completions for translation and summaries, batch embeddings for ranking.

pub mod client;
pub mod types;

pub use client::{
    CompletionClient, CompletionError, CompletionRequest, GeminiClient, complete_with_retry,
};
