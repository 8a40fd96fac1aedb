//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::cleanup::CleanupPolicy;
use crate::curator::CurationPolicy;
use crate::embeddings::EmbeddingConfig;
use crate::retry::RetryPolicy;

/// Pipeline configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key (required for reflection/curation)
    pub anthropic_api_key: Option<String>,

    /// Override for the reasoning model name
    pub model: Option<String>,

    /// Root directory of the on-disk skill store
    pub skills_dir: PathBuf,

    /// Ollama URL for embeddings
    pub ollama_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Cosine floor for consumer/curator retrieval
    pub retrieval_threshold: f32,

    /// Result cap for retrieval
    pub retrieval_limit: usize,

    /// Cosine floor for the cleanup duplicate scan
    pub dedup_threshold: f32,

    /// Model turns allowed per curation item
    pub max_curation_rounds: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        let model = std::env::var("SKILLBOOK_MODEL").ok();

        let skills_dir = std::env::var("SKILLBOOK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("skillbook")
            });

        let ollama_url = std::env::var("OLLAMA_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());

        let embedding_model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string());

        let retrieval_threshold = std::env::var("SKILLBOOK_RETRIEVAL_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.4);

        let retrieval_limit = std::env::var("SKILLBOOK_RETRIEVAL_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let dedup_threshold = std::env::var("SKILLBOOK_DEDUP_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.85);

        let max_curation_rounds = std::env::var("SKILLBOOK_MAX_ROUNDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6);

        Ok(Self {
            anthropic_api_key,
            model,
            skills_dir,
            ollama_url,
            embedding_model,
            retrieval_threshold,
            retrieval_limit,
            dedup_threshold,
            max_curation_rounds,
        })
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            ollama_url: self.ollama_url.clone(),
            model: self.embedding_model.clone(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn curation_policy(&self) -> CurationPolicy {
        CurationPolicy {
            max_rounds: self.max_curation_rounds,
            retrieval_threshold: self.retrieval_threshold,
            retrieval_limit: self.retrieval_limit,
        }
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy {
            dedup_threshold: self.dedup_threshold,
            ..CleanupPolicy::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}
