//! Embedding backends and vector math for relevance scoring.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::gemini::{CompletionError, GeminiClient};

pub const HASH_DIMENSION: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const BIGRAM_WEIGHT: f32 = 0.5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Provider(#[from] CompletionError),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
}

impl EmbedError {
    pub fn as_fatal(&self) -> Option<ConfigError> {
        match self {
            EmbedError::Provider(e) => e.as_fatal(),
            _ => None,
        }
    }
}

/// Turns text into dense vectors. Must return one vector per input, in order,
/// and the same vector for the same text on every call.
pub trait Embedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or(EmbedError::CountMismatch { expected: 1, got: 0 })
    }
}

/// Feature-hashing embedder: lowercased unigrams and bigrams hashed with
/// FNV-1a into a fixed number of buckets, log-scaled and L2-normalized.
///
/// Lexical only. Scores run lower than with a semantic model, so thresholds
/// usually need lowering when this backend is selected.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut buckets: HashMap<usize, f32> = HashMap::new();

        for token in &tokens {
            *buckets.entry(self.bucket(token.as_bytes())).or_default() += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            *buckets.entry(self.bucket(bigram.as_bytes())).or_default() += BIGRAM_WEIGHT;
        }

        let mut vector = vec![0.0; self.dimension];
        for (index, count) in buckets {
            vector[index] = (1.0 + count).ln();
        }
        l2_normalize(&vector)
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        (fnv1a_hash(bytes) % self.dimension as u64) as usize
    }
}

impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// The embedding backend chosen in configuration.
#[derive(Clone)]
pub enum EmbeddingModel {
    Gemini(GeminiClient),
    Hash(HashEmbedder),
}

impl Embedder for EmbeddingModel {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            EmbeddingModel::Gemini(client) => client.embed_batch(texts).await,
            EmbeddingModel::Hash(hash) => hash.embed_batch(texts).await,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || c == '।' || c == '॥')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

pub fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Returns a zero vector if the input has zero norm.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|x| x * x).sum();
    if norm_sq < f32::EPSILON {
        return vec![0.0; vec.len()];
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|x| x * inv_norm).collect()
}

/// Cosine similarity; 0.0 if either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_empty_is_offset_basis() {
        assert_eq!(fnv1a_hash(b""), FNV_OFFSET_BASIS);
        assert_ne!(fnv1a_hash(b"a"), fnv1a_hash(b"b"));
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_or_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn l2_normalize_produces_unit_norm() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn tokenize_drops_stop_words_and_punctuation() {
        assert_eq!(
            tokenize("The price of Gold, today!"),
            vec!["price", "gold", "today"]
        );
    }

    #[test]
    fn tokenize_splits_devanagari_danda() {
        assert_eq!(tokenize("सुनको भाउ। आज"), vec!["सुनको", "भाउ", "आज"]);
    }

    #[test]
    fn hash_embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed_text("electric cars with long range");
        let b = embedder.embed_text("electric cars with long range");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_DIMENSION);
    }

    #[test]
    fn hash_embedding_ranks_overlap_higher() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed_text("best electric cars 2024");
        let related = embedder.embed_text("The best electric cars of 2024 ranked by range");
        let unrelated = embedder.embed_text("Chocolate cake recipe with butter frosting");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn hash_embedding_of_empty_text_is_zero() {
        let v = HashEmbedder::default().embed_text("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn embed_returns_single_vector() {
        let embedder = EmbeddingModel::Hash(HashEmbedder::new(16));
        let v = embedder.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
