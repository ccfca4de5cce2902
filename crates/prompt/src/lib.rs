//! Prompt system for Folio.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions (`.folio/prompts/<id>.yml`)
//! - A built-in grounded-answer definition used when no override exists
//! - Handlebars template rendering

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use loader::{default_prompt, load_prompt, resolve_prompt, DEFAULT_PROMPT_ID};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptBehavior, PromptDefinition};
