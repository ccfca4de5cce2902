//! In-memory embedding index with exact cosine search.
//!
//! An [`EmbeddingIndex`] is immutable once built. Readers share it through
//! `Arc`; [`IndexHandle`] swaps in a rebuilt index without disturbing
//! queries that already hold a snapshot.

use crate::embeddings::EmbeddingProvider;
use crate::types::{Passage, PassageId, RetrievalResult, ScoredPassage};
use chrono::{DateTime, Utc};
use folio_core::{AppError, AppResult};
use folio_llm::{call_with_retry, CancelToken, RetryPolicy, ServiceKind};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Embedding calls in flight while building.
const BUILD_CONCURRENCY: usize = 4;

/// Provenance of an index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub provider: String,
    pub model: String,
    pub dimension: usize,

    /// Random id distinguishing one build from the next
    pub generation: String,

    pub built_at: DateTime<Utc>,

    /// SHA-256 of the full source text, hex encoded
    pub source_sha256: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexMetadata {
    /// Metadata for a fresh build of `source` with `provider`.
    pub fn new(
        provider: &dyn EmbeddingProvider,
        source: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            provider: provider.provider_name().to_string(),
            model: provider.model_name().to_string(),
            dimension: provider.dimensions(),
            generation: uuid::Uuid::new_v4().to_string(),
            built_at: Utc::now(),
            source_sha256: crate::chunker::calculate_hash(source),
            chunk_size,
            chunk_overlap,
        }
    }
}

/// Passages with embeddings, searchable by cosine similarity.
#[derive(Debug)]
pub struct EmbeddingIndex {
    metadata: IndexMetadata,
    passages: Vec<Arc<Passage>>,
    norms: Vec<f32>,
}

impl EmbeddingIndex {
    /// Embed every passage (one call each) and build the index.
    ///
    /// Any failure abandons the whole build. A vector of the wrong size is a
    /// `DimensionMismatch`; non-finite components are an `EmbeddingService`
    /// error.
    pub async fn build(
        passages: Vec<Passage>,
        provider: &dyn EmbeddingProvider,
        metadata: IndexMetadata,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> AppResult<Self> {
        let start = Instant::now();
        let dimension = metadata.dimension;
        let count = passages.len();

        tracing::info!(
            passages = count,
            provider = %metadata.provider,
            model = %metadata.model,
            "Embedding passages"
        );

        let embedded: Vec<Passage> = stream::iter(passages.into_iter().map(|passage| async move {
            let vector = call_with_retry(policy, ServiceKind::Embedding, cancel, || {
                provider.embed(&passage.text)
            })
            .await?;
            check_vector(&vector, dimension)?;
            Ok::<_, AppError>(passage.with_embedding(vector))
        }))
        .buffered(BUILD_CONCURRENCY)
        .try_collect()
        .await?;

        let index = Self::from_parts(metadata, embedded)?;

        tracing::info!(
            passages = count,
            dimension,
            "Built embedding index in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(index)
    }

    /// Assemble an index from already-embedded passages.
    ///
    /// Passages must be in ordinal order with ids equal to ordinals, and each
    /// must carry a finite embedding of `metadata.dimension` components.
    pub fn from_parts(metadata: IndexMetadata, passages: Vec<Passage>) -> AppResult<Self> {
        if metadata.dimension == 0 {
            return Err(AppError::InvalidConfiguration(
                "Index dimension must be greater than 0".to_string(),
            ));
        }

        let mut shared = Vec::with_capacity(passages.len());
        let mut norms = Vec::with_capacity(passages.len());

        for (position, passage) in passages.into_iter().enumerate() {
            if passage.ordinal as usize != position || passage.id != PassageId(passage.ordinal) {
                return Err(AppError::Index(format!(
                    "Passage {} is out of order at position {}",
                    passage.id, position
                )));
            }

            let embedding = passage.embedding.as_ref().ok_or_else(|| {
                AppError::Index(format!("Passage {} has no embedding", passage.id))
            })?;
            check_vector(embedding, metadata.dimension)?;

            norms.push(norm(embedding));
            shared.push(Arc::new(passage));
        }

        Ok(Self {
            metadata,
            passages: shared,
            norms,
        })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passages(&self) -> &[Arc<Passage>] {
        &self.passages
    }

    pub fn get(&self, id: PassageId) -> Option<&Arc<Passage>> {
        self.passages.get(id.0 as usize)
    }

    /// The `k` passages most similar to `query`, best first.
    ///
    /// Exact linear scan. Equal scores rank the lower ordinal first.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<RetrievalResult> {
        if k == 0 {
            return Err(AppError::InvalidConfiguration(
                "k must be at least 1".to_string(),
            ));
        }
        if query.len() != self.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(AppError::EmbeddingService(
                "Query embedding has non-finite components".to_string(),
            ));
        }

        let query_norm = norm(query);

        let mut scored: Vec<(usize, f32)> = self
            .passages
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (passage, &passage_norm))| {
                let embedding = passage.embedding.as_deref().unwrap_or_default();
                (i, cosine_with_norms(query, query_norm, embedding, passage_norm))
            })
            .collect();

        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(k);

        let passages = scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: Arc::clone(&self.passages[i]),
                score,
            })
            .collect();

        Ok(RetrievalResult::new(passages))
    }
}

/// Shared, atomically replaceable reference to the current index.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<EmbeddingIndex>>,
}

impl IndexHandle {
    pub fn new(index: EmbeddingIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// The index as of now. Holders keep it alive across later publishes.
    pub fn snapshot(&self) -> Arc<EmbeddingIndex> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the index wholesale, returning the previous one.
    pub fn publish(&self, index: EmbeddingIndex) -> Arc<EmbeddingIndex> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(
            generation = %index.metadata().generation,
            passages = index.len(),
            "Publishing new index"
        );
        std::mem::replace(&mut *guard, Arc::new(index))
    }
}

fn check_vector(vector: &[f32], dimension: usize) -> AppResult<()> {
    if vector.len() != dimension {
        return Err(AppError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::EmbeddingService(
            "Embedding has non-finite components".to_string(),
        ));
    }
    Ok(())
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Cosine similarity; 0 when either vector has zero norm or lengths differ.
#[cfg(test)]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    cosine_with_norms(a, norm(a), b, norm(b))
}
