//! Knowledge system type definitions.

use chrono::{DateTime, Utc};
use folio_core::{AppError, AppResult};
use folio_llm::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `chars` characters: `ceil(chars / 4)`.
pub fn estimate_tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Stable passage identifier; equal to the passage's ordinal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PassageId(pub u32);

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable unit of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,

    /// Position in chunk order, starting at 0
    pub ordinal: u32,

    /// Start offset in Unicode scalar values (inclusive)
    pub char_start: usize,

    /// End offset in Unicode scalar values (exclusive)
    pub char_end: usize,

    /// Exact slice of the source text
    pub text: String,

    /// SHA-256 of `text`, hex encoded
    pub hash: String,

    /// Set once at index build time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Passage {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens_for_chars(self.char_len())
    }

    /// Attach the embedding computed at build time.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A passage paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Arc<Passage>,
    pub score: f32,
}

impl ScoredPassage {
    pub fn id(&self) -> PassageId {
        self.passage.id
    }
}

/// Ranked search output: unique by id, score-descending, at most top-K long.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
}

impl RetrievalResult {
    pub fn new(passages: Vec<ScoredPassage>) -> Self {
        Self { passages }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.passages.first().map(|p| p.score)
    }

    pub fn ids(&self) -> Vec<PassageId> {
        self.passages.iter().map(ScoredPassage::id).collect()
    }
}

/// Why no grounded answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Retrieval found nothing relevant enough
    InsufficientEvidence,
    /// The generation service reported the context does not hold the answer
    ModelDeclined,
}

/// Outcome of the grounding policy.
#[derive(Debug, Clone)]
pub enum GroundingDecision {
    Grounded(Vec<ScoredPassage>),
    Refused(RefusalReason),
}

impl GroundingDecision {
    pub fn is_grounded(&self) -> bool {
        matches!(self, Self::Grounded(_))
    }
}

/// A question plus its embedding, computed during retrieval.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

impl Query {
    /// Reject blank questions before any service is called.
    pub fn new(text: impl Into<String>) -> AppResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AppError::InvalidQuery(
                "Question must not be empty".to_string(),
            ));
        }
        Ok(Self {
            text,
            embedding: None,
        })
    }
}

/// Response to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,

    /// Passages the answer relies on; empty when refused
    pub citations: Vec<PassageId>,

    pub answered: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<RefusalReason>,
}

impl Answer {
    pub fn grounded(text: impl Into<String>, citations: Vec<PassageId>) -> Self {
        Self {
            text: text.into(),
            citations,
            answered: true,
            refusal: None,
        }
    }

    pub fn refused(text: impl Into<String>, reason: RefusalReason) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            answered: false,
            refusal: Some(reason),
        }
    }
}

/// Knowledge configuration, stored at `.folio/index/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Embedding provider: "trigram" or "ollama"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Embedding model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimension
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Embedding service base URL (Ollama only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Maximum passage length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive passages
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Passages requested from the index per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Token budget for the context window
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Refuse when the best score is below this
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Word-set Jaccard similarity at which passages count as duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Retries after the first attempt for each service call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Per-attempt deadline for embedding calls
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Per-attempt deadline for generation calls
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
}

fn default_provider() -> String {
    "trigram".to_string()
}

fn default_model() -> String {
    "trigram-v1".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_chunk_size() -> usize {
    1200
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    1500
}

fn default_min_score() -> f32 {
    0.35
}

fn default_dedup_threshold() -> f32 {
    0.9
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_generate_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_answer_tokens() -> u32 {
    512
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            embedding_dim: default_embedding_dim(),
            endpoint: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            max_context_tokens: default_max_context_tokens(),
            min_score: default_min_score(),
            dedup_threshold: default_dedup_threshold(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            embed_timeout_secs: default_embed_timeout_secs(),
            generate_timeout_secs: default_generate_timeout_secs(),
            temperature: default_temperature(),
            max_answer_tokens: default_max_answer_tokens(),
        }
    }
}

impl KnowledgeConfig {
    /// Check every numeric contract.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(AppError::InvalidConfiguration(msg));

        if self.provider.trim().is_empty() || self.model.trim().is_empty() {
            return invalid("Embedding provider and model must be set".to_string());
        }
        if self.embedding_dim == 0 {
            return invalid("embedding_dim must be greater than 0".to_string());
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than 0".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            return invalid("top_k must be at least 1".to_string());
        }
        let passage_tokens = estimate_tokens_for_chars(self.chunk_size);
        if self.max_context_tokens < passage_tokens {
            return invalid(format!(
                "max_context_tokens ({}) cannot fit one full passage ({} tokens)",
                self.max_context_tokens, passage_tokens
            ));
        }
        if !self.min_score.is_finite() || !(-1.0..=1.0).contains(&self.min_score) {
            return invalid(format!(
                "min_score must be within [-1, 1], got {}",
                self.min_score
            ));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return invalid(format!(
                "dedup_threshold must be within (0, 1], got {}",
                self.dedup_threshold
            ));
        }
        if self.embed_timeout_secs == 0 || self.generate_timeout_secs == 0 {
            return invalid("Service timeouts must be greater than 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            ));
        }
        if self.max_answer_tokens == 0 {
            return invalid("max_answer_tokens must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn embed_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_secs(self.embed_timeout_secs),
        )
    }

    pub fn generate_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_secs(self.generate_timeout_secs),
        )
    }
}

/// Statistics from an index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStats {
    pub passages: usize,
    pub dimension: usize,
    pub source_chars: usize,
    pub duration_secs: f64,
    pub index_path: PathBuf,
}

/// Summary of a persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub passages: usize,
    pub dimension: usize,
    pub provider: String,
    pub model: String,
    pub generation: String,
    pub built_at: DateTime<Utc>,
    pub source_sha256: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub index_path: PathBuf,
    pub size_bytes: u64,
}

/// A cited passage resolved for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedPassage {
    pub id: PassageId,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// Result of the `ask` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResult {
    pub answer: Answer,
    pub sources: Vec<CitedPassage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(KnowledgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let config = KnowledgeConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            max_context_tokens: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_budget_must_fit_one_passage() {
        let config = KnowledgeConfig {
            chunk_size: 1200,
            max_context_tokens: 299,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KnowledgeConfig {
            max_context_tokens: 300,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_thresholds() {
        let bad_score = KnowledgeConfig {
            min_score: f32::NAN,
            ..Default::default()
        };
        assert!(bad_score.validate().is_err());

        let bad_dedup = KnowledgeConfig {
            dedup_threshold: 0.0,
            ..Default::default()
        };
        assert!(bad_dedup.validate().is_err());

        let no_results = KnowledgeConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(no_results.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: KnowledgeConfig = serde_yaml::from_str("chunk_size: 400\nmin_score: 0.5\n").unwrap();
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.min_score, 0.5);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.provider, "trigram");
    }

    #[test]
    fn test_blank_query_is_rejected() {
        assert!(matches!(Query::new("   \n"), Err(AppError::InvalidQuery(_))));
        assert!(Query::new("Who?").is_ok());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens_for_chars(0), 0);
        assert_eq!(estimate_tokens_for_chars(1), 1);
        assert_eq!(estimate_tokens_for_chars(4), 1);
        assert_eq!(estimate_tokens_for_chars(5), 2);
    }

    #[test]
    fn test_refused_answer_has_no_citations() {
        let answer = Answer::refused("no", RefusalReason::InsufficientEvidence);
        assert!(!answer.answered);
        assert!(answer.citations.is_empty());
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains("insufficient_evidence"));
    }
}
