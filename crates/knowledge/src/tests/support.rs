//! Service doubles and fixtures shared by the cross-module tests.

use crate::chunker;
use crate::embeddings::EmbeddingProvider;
use crate::index::{EmbeddingIndex, IndexHandle, IndexMetadata};
use crate::pipeline::QueryPipeline;
use crate::retriever::Retriever;
use crate::synthesizer::Synthesizer;
use crate::types::{KnowledgeConfig, PassageId};
use async_trait::async_trait;
use folio_core::{AppError, AppResult};
use folio_llm::{CancelToken, LlmClient, LlmRequest, LlmResponse, RetryPolicy};
use folio_prompt::default_prompt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SCENARIO: &str =
    "Chapter 1. The duke arrived at dusk. ... Chapter 2. She refused his offer.";

pub const SCENARIO_ANSWER: &str = "She refused his offer.\nCITED: 2";

const VOCAB: &[&str] = &["she", "refused", "offer", "duke", "arrived", "dusk", "chapter"];

/// Bag-of-words embedder over a fixed vocabulary. Words outside it
/// contribute nothing, so unrelated text embeds to the zero vector.
#[derive(Debug, Default)]
pub struct VocabEmbedder {
    pub calls: AtomicUsize,
}

impl VocabEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    fn provider_name(&self) -> &str {
        "vocab"
    }

    fn model_name(&self) -> &str {
        "vocab-v1"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0.0; VOCAB.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if let Some(slot) = VOCAB.iter().position(|v| *v == word) {
                vector[slot] += 1.0;
            }
        }
        Ok(vector)
    }
}

/// Embedder whose calls never finish within any sensible timeout.
#[derive(Debug, Default)]
pub struct SlowEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn provider_name(&self) -> &str {
        "vocab"
    }

    fn model_name(&self) -> &str {
        "vocab-v1"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![0.0; VOCAB.len()])
    }
}

/// Vocabulary embedder that starts failing on call number `fail_from`
/// (1-based) and keeps failing.
#[derive(Debug)]
pub struct FailingEmbedder {
    inner: VocabEmbedder,
    fail_from: usize,
}

impl FailingEmbedder {
    pub fn failing_from(fail_from: usize) -> Self {
        Self {
            inner: VocabEmbedder::default(),
            fail_from,
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn provider_name(&self) -> &str {
        "vocab"
    }

    fn model_name(&self) -> &str {
        "vocab-v1"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let vector = self.inner.embed(text).await?;
        if self.inner.calls() >= self.fail_from {
            return Err(AppError::EmbeddingService(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(vector)
    }
}

/// Claims the vocabulary dimension but returns shorter vectors.
#[derive(Debug, Default)]
pub struct TruncatingEmbedder;

#[async_trait]
impl EmbeddingProvider for TruncatingEmbedder {
    fn provider_name(&self) -> &str {
        "vocab"
    }

    fn model_name(&self) -> &str {
        "vocab-v1"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
        Ok(vec![1.0; VOCAB.len() - 2])
    }
}

/// Generation double that always gives the same reply and keeps the last
/// request it saw.
pub struct ScriptedGenerator {
    reply: String,
    pub calls: AtomicUsize,
    last: Mutex<Option<LlmRequest>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids of the `[Passage N]` tags in the last system message, in order.
    pub fn context_ids(&self) -> Vec<PassageId> {
        let last = self.last.lock().unwrap();
        let system = last
            .as_ref()
            .and_then(|r| r.system.as_deref())
            .unwrap_or_default();

        system
            .split("[Passage ")
            .skip(1)
            .filter_map(|rest| rest.split(']').next())
            .filter_map(|id| id.parse::<u32>().ok())
            .map(PassageId)
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedGenerator {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        Ok(LlmResponse::text(&self.reply, &request.model))
    }
}

/// Generation double whose service is always down.
#[derive(Default)]
pub struct FailingGenerator {
    pub calls: AtomicUsize,
}

impl FailingGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for FailingGenerator {
    fn provider_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &LlmRequest) -> AppResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::GenerationService(
            "Ollama API error (503): model is loading".to_string(),
        ))
    }
}

pub fn scenario_config() -> KnowledgeConfig {
    KnowledgeConfig {
        provider: "vocab".to_string(),
        model: "vocab-v1".to_string(),
        embedding_dim: VOCAB.len(),
        chunk_size: 40,
        chunk_overlap: 10,
        top_k: 3,
        min_score: 0.3,
        ..Default::default()
    }
}

/// Millisecond-scale policy so timeout tests finish quickly.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(1),
        Duration::from_millis(20),
    )
}

pub async fn build(
    source: &str,
    config: &KnowledgeConfig,
    provider: &dyn EmbeddingProvider,
) -> EmbeddingIndex {
    let passages = chunker::chunk(source, config.chunk_size, config.chunk_overlap).unwrap();
    let metadata = IndexMetadata::new(provider, source, config.chunk_size, config.chunk_overlap);

    EmbeddingIndex::build(
        passages,
        provider,
        metadata,
        &config.embed_policy(),
        &CancelToken::never(),
    )
    .await
    .unwrap()
}

pub fn pipeline(
    index: EmbeddingIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn LlmClient>,
    config: &KnowledgeConfig,
) -> QueryPipeline {
    QueryPipeline::new(
        Arc::new(IndexHandle::new(index)),
        Retriever::new(embedder, config),
        Synthesizer::new(generator, "test-model", default_prompt(), config),
        config.min_score,
    )
}
