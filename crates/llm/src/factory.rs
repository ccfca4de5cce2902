//! Generation provider factory.
//!
//! Resolves a provider name from configuration into a client implementation.

use crate::client::LlmClient;
use crate::providers::OllamaClient;
use folio_core::{AppError, AppResult};
use std::sync::Arc;

/// Create a generation client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama")
/// * `endpoint` - Optional custom endpoint URL
///
/// # Errors
/// Returns `InvalidConfiguration` if the provider is unknown.
pub fn create_client(provider: &str, endpoint: Option<&str>) -> AppResult<Arc<dyn LlmClient>> {
    match provider.to_lowercase().as_str() {
        "ollama" => {
            let client = match endpoint {
                Some(base_url) => OllamaClient::with_base_url(base_url),
                None => OllamaClient::new(),
            };
            Ok(Arc::new(client))
        }
        _ => Err(AppError::InvalidConfiguration(format!(
            "Unknown generation provider: {}",
            provider
        ))),
    }
}
