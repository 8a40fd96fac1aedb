//! Vector Embeddings for Semantic Retrieval
//!
//! Skill descriptions are embedded through a local Ollama instance and
//! compared by cosine similarity. Query embeddings go through an LRU
//! cache so repeated curator lookups stay cheap. The [`Embedder`] trait
//! is the seam that lets tests substitute a deterministic stub.

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;

use crate::retry::{ExternalError, RetryPolicy};

/// Embedding service configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Ollama API URL
    pub ollama_url: String,
    /// Embedding model name
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            ollama_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Anything that can turn text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Fails as a whole; partial results would
    /// leave the caller unsure which cache entries to trust.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Ollama-backed embedder with query caching and bounded retry.
pub struct OllamaEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
    /// LRU cache for query embeddings (1000 entries, 1 hour TTL)
    cache: Cache<String, Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Ok(Self {
            config,
            client,
            retry,
            cache,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(EmbeddingConfig::default(), RetryPolicy::default())
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        let url = format!("{}/api/embeddings", self.config.ollama_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.config.model,
                "prompt": text,
            }))
            .send()
            .await
            .map_err(ExternalError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::from_status(status, body));
        }

        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            ExternalError::Permanent(format!("unparseable embedding response: {}", e))
        })?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cache_key = text.trim().to_string();
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let embedding = self
            .retry
            .run("embedding", || self.request_embedding(text))
            .await
            .context("Embedding request failed")?;

        self.cache.insert(cache_key, embedding.clone()).await;
        Ok(embedding)
    }
}

/// Cosine similarity: dot(a,b) / (|a| * |b|). Zero-magnitude or
/// mismatched vectors resolve to 0, never a division error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deterministic embedder for tests: hand-assigned vectors per
    /// phrase, with a stable fallback axis for unknown text.
    pub struct StubEmbedder {
        vectors: Mutex<HashMap<String, Vec<f32>>>,
        pub dimension: usize,
    }

    impl StubEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self {
                vectors: Mutex::new(HashMap::new()),
                dimension,
            }
        }

        pub fn assign(&self, text: &str, vector: Vec<f32>) {
            self.vectors
                .lock()
                .unwrap()
                .insert(text.to_string(), vector);
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if let Some(v) = self.vectors.lock().unwrap().get(text) {
                return Ok(v.clone());
            }
            let mut v = vec![0.0; self.dimension];
            let idx = text.bytes().map(|b| b as usize).sum::<usize>() % self.dimension;
            v[idx] = 1.0;
            Ok(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_zero_magnitude_is_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let unit = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&zero, &unit), 0.0);
        assert_eq!(cosine_similarity(&unit, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_stub_embedder_batch() {
        use test_support::StubEmbedder;
        let stub = StubEmbedder::new(4);
        stub.assign("alpha", vec![1.0, 0.0, 0.0, 0.0]);
        let out = stub
            .embed_batch(&["alpha".to_string(), "anything else".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![1.0, 0.0, 0.0, 0.0]);
    }
}
