//! Embedding service capability.
//!
//! Provides provider-agnostic embedding generation. Providers make one call
//! per invocation; timeouts and retries are applied by the callers through
//! `folio_llm::call_with_retry`.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
