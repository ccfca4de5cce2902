//! Query-time retrieval: embed, search, deduplicate, fit the token budget.

use crate::embeddings::EmbeddingProvider;
use crate::index::EmbeddingIndex;
use crate::types::{estimate_tokens_for_chars, KnowledgeConfig, Query, RetrievalResult, ScoredPassage};
use folio_core::AppResult;
use folio_llm::{call_with_retry, CancelToken, RetryPolicy, ServiceKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Estimated token count of `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_for_chars(text.chars().count())
}

/// Selects the context passages for a query.
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    top_k: usize,
    token_budget: usize,
    dedup_threshold: f32,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &KnowledgeConfig) -> Self {
        Self {
            provider,
            policy: config.embed_policy(),
            top_k: config.top_k,
            token_budget: config.max_context_tokens,
            dedup_threshold: config.dedup_threshold,
        }
    }

    /// Replace the retry policy for the query embedding call.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Embed `query` (storing the vector on it) and return the ranked,
    /// deduplicated passages that fit the token budget.
    ///
    /// Never reorders the index ranking. `DimensionMismatch` from the index
    /// propagates unchanged.
    #[instrument(skip_all, fields(top_k = self.top_k, budget = self.token_budget))]
    pub async fn retrieve(
        &self,
        query: &mut Query,
        index: &EmbeddingIndex,
        cancel: &CancelToken,
    ) -> AppResult<RetrievalResult> {
        let text = query.text.as_str();
        let provider = &self.provider;
        let embedding = call_with_retry(&self.policy, ServiceKind::Embedding, cancel, || {
            provider.embed(text)
        })
        .await?;

        let ranked = index.search(&embedding, self.top_k)?;
        query.embedding = Some(embedding);

        let found = ranked.len();
        let unique = deduplicate(ranked, self.dedup_threshold);
        let deduped = unique.len();
        let fitted = fit_budget(unique, self.token_budget);

        debug!(
            found,
            after_dedup = deduped,
            kept = fitted.len(),
            top_score = ?fitted.top_score(),
            "Retrieved passages"
        );

        Ok(fitted)
    }
}

/// Lowercased alphanumeric words of `text`.
fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two word sets; 0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Drop passages whose word set is at least `threshold` similar to a
/// higher-ranked passage already kept.
pub fn deduplicate(result: RetrievalResult, threshold: f32) -> RetrievalResult {
    let mut kept: Vec<(ScoredPassage, HashSet<String>)> = Vec::with_capacity(result.len());

    for candidate in result.passages {
        let words = word_set(&candidate.passage.text);
        let duplicate = kept
            .iter()
            .any(|(_, existing)| jaccard(existing, &words) >= threshold);

        if duplicate {
            debug!(passage = %candidate.id(), "Dropping near-duplicate passage");
        } else {
            kept.push((candidate, words));
        }
    }

    RetrievalResult::new(kept.into_iter().map(|(p, _)| p).collect())
}

/// Longest ranked prefix whose cumulative estimated tokens fit `budget`.
pub fn fit_budget(result: RetrievalResult, budget: usize) -> RetrievalResult {
    let mut used = 0;
    let passages = result
        .passages
        .into_iter()
        .take_while(|p| {
            used += p.passage.estimated_tokens();
            used <= budget
        })
        .collect();

    RetrievalResult::new(passages)
}
