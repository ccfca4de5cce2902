//! Embedding configuration and index compatibility checks.

use crate::types::KnowledgeConfig;
use folio_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Identity of the embedding space: vectors from two configs are comparable
/// only if provider, model and dimensions all agree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram", "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Service base URL, if the provider is remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
        }
    }
}

impl From<&KnowledgeConfig> for EmbeddingConfig {
    fn from(config: &KnowledgeConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            dimensions: config.embedding_dim,
            endpoint: config.endpoint.clone(),
        }
    }
}

impl EmbeddingConfig {
    /// Validate that an index built with `other` can be queried with `self`.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::InvalidConfiguration(format!(
                "Provider mismatch: index built with '{}', configured '{}'. Rebuild the index.",
                other.provider, self.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::InvalidConfiguration(format!(
                "Model mismatch: index built with '{}', configured '{}'. Rebuild the index.",
                other.model, self.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::DimensionMismatch {
                expected: other.dimensions,
                actual: self.dimensions,
            });
        }

        Ok(())
    }
}
