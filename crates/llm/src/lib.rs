//! Generation-service integration for Folio.
//!
//! This crate provides a provider-agnostic abstraction over the language
//! model that writes grounded answers, plus the bounded timeout/retry/
//! cancellation helper shared by every outbound service call.
//!
//! # Providers
//! - **Ollama**: Local LLM runtime (default)
//!
//! # Example
//! ```no_run
//! use folio_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Who is the duke?", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod retry;

// Re-export main types
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::OllamaClient;
pub use retry::{call_with_retry, CancelHandle, CancelToken, RetryPolicy, ServiceKind};
