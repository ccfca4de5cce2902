//! Grounded question answering over a single book.
//!
//! Provides local-first RAG: the source is chunked into overlapping passages,
//! embedded, persisted to SQLite, and queried through a
//! retrieve → ground → synthesize pipeline that refuses rather than answer
//! from outside the text.

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod grounding;
pub mod index;
pub mod pipeline;
pub mod retriever;
pub mod source;
pub mod store;
pub mod synthesizer;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use index::{EmbeddingIndex, IndexHandle, IndexMetadata};
pub use pipeline::{QueryPipeline, QueryStage};
pub use retriever::Retriever;
pub use synthesizer::Synthesizer;
pub use types::{
    Answer, AskResult, BuildStats, CitedPassage, GroundingDecision, IndexStats, KnowledgeConfig,
    Passage, PassageId, Query, RefusalReason, RetrievalResult, ScoredPassage,
};

use embeddings::{create_provider, EmbeddingConfig};
use folio_core::{AppConfig, AppResult};
use folio_llm::{create_client, CancelToken};
use folio_prompt::{resolve_prompt, DEFAULT_PROMPT_ID};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Per-build overrides of the stored chunking settings.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    /// File name glob applied when the source is a directory
    pub filter: Option<String>,
}

/// Chunk, embed and persist `source_path`, replacing any existing index.
///
/// Overrides are written back to the knowledge config so later queries use
/// the same settings.
pub async fn build_index(
    workspace: &Path,
    source_path: &Path,
    options: IndexOptions,
) -> AppResult<BuildStats> {
    let start = Instant::now();

    tracing::info!("Starting index build for {:?}", source_path);

    let mut config = config::load_config(workspace)?;
    if let Some(size) = options.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = options.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    config.validate()?;

    let text = source::load_source(source_path, options.filter.as_deref())?;
    let passages = chunker::chunk(&text, config.chunk_size, config.chunk_overlap)?;

    let provider = create_provider(&EmbeddingConfig::from(&config))?;
    let metadata = IndexMetadata::new(
        provider.as_ref(),
        &text,
        config.chunk_size,
        config.chunk_overlap,
    );

    let index = EmbeddingIndex::build(
        passages,
        provider.as_ref(),
        metadata,
        &config.embed_policy(),
        &CancelToken::never(),
    )
    .await?;

    let index_path = config::get_index_path(workspace);
    store::save(&index, &index_path)?;
    config::save_config(workspace, &config)?;

    let duration = start.elapsed();

    tracing::info!(
        "Index build completed: {} passages, {} dimensions in {:.2}s",
        index.len(),
        index.dimension(),
        duration.as_secs_f64()
    );

    Ok(BuildStats {
        passages: index.len(),
        dimension: index.dimension(),
        source_chars: text.chars().count(),
        duration_secs: duration.as_secs_f64(),
        index_path,
    })
}

/// Load the persisted index and wire up a query pipeline for it.
///
/// Fails with `InvalidConfiguration` or `DimensionMismatch` when the
/// configured embedding space differs from the one the index was built in.
pub fn open_pipeline(workspace: &Path, app: &AppConfig) -> AppResult<QueryPipeline> {
    let mut config = config::load_config(workspace)?;
    apply_provider_settings(&mut config, app);
    config.validate()?;

    let index = store::load(&config::get_index_path(workspace))?;

    let embedding = EmbeddingConfig::from(&config);
    let built_with = EmbeddingConfig {
        provider: index.metadata().provider.clone(),
        model: index.metadata().model.clone(),
        dimensions: index.dimension(),
        endpoint: None,
    };
    embedding.validate_consistency(&built_with)?;

    let provider = create_provider(&embedding)?;
    let client = create_client(&app.provider, app.provider_endpoint(&app.provider))?;
    let prompt = resolve_prompt(workspace, DEFAULT_PROMPT_ID)?;

    tracing::debug!(
        passages = index.len(),
        generation = %index.metadata().generation,
        provider = %app.provider,
        model = %app.model,
        "Opened query pipeline"
    );

    Ok(QueryPipeline::new(
        Arc::new(IndexHandle::new(index)),
        Retriever::new(provider, &config),
        Synthesizer::new(client, app.model.clone(), prompt, &config),
        config.min_score,
    ))
}

/// A generation timeout set on the active provider replaces the stored one.
pub(crate) fn apply_provider_settings(config: &mut KnowledgeConfig, app: &AppConfig) {
    if let Some(secs) = app.provider_timeout_secs(&app.provider) {
        config.generate_timeout_secs = secs;
    }
}

/// Answer one question from the persisted index.
pub async fn ask(workspace: &Path, app: &AppConfig, question: &str) -> AppResult<AskResult> {
    tracing::info!("Answering question against {:?}", workspace);

    let pipeline = open_pipeline(workspace, app)?;
    pipeline.ask(question, &CancelToken::never()).await
}

/// Describe the persisted index.
pub fn stats(workspace: &Path) -> AppResult<IndexStats> {
    let index_path = config::get_index_path(workspace);
    let index = store::load(&index_path)?;
    let meta = index.metadata();

    let size_bytes = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);

    Ok(IndexStats {
        passages: index.len(),
        dimension: index.dimension(),
        provider: meta.provider.clone(),
        model: meta.model.clone(),
        generation: meta.generation.clone(),
        built_at: meta.built_at,
        source_sha256: meta.source_sha256.clone(),
        chunk_size: meta.chunk_size,
        chunk_overlap: meta.chunk_overlap,
        index_path,
        size_bytes,
    })
}

/// Delete the persisted index. Returns `false` when there was none.
pub fn clean(workspace: &Path) -> AppResult<bool> {
    let index_path = config::get_index_path(workspace);
    if !index_path.exists() {
        tracing::info!("No index to remove at {:?}", index_path);
        return Ok(false);
    }

    std::fs::remove_file(&index_path)?;
    tracing::info!("Removed index at {:?}", index_path);
    Ok(true)
}
