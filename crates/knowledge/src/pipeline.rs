//! One question in, one [`Answer`] out.

use crate::grounding;
use crate::index::{EmbeddingIndex, IndexHandle};
use crate::retriever::Retriever;
use crate::synthesizer::Synthesizer;
use crate::types::{Answer, AskResult, CitedPassage, GroundingDecision, Query};
use folio_core::AppResult;
use folio_llm::CancelToken;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Progress of a single query through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Retrieved,
    Grounded,
    Refused,
    Answered,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Retrieved => "retrieved",
            Self::Grounded => "grounded",
            Self::Refused => "refused",
            Self::Answered => "answered",
        };
        f.write_str(name)
    }
}

/// Retrieve, ground and synthesize against the current index.
///
/// Each query takes its own snapshot of the index when received, so a
/// concurrent [`IndexHandle::publish`] never changes what it searches.
pub struct QueryPipeline {
    handle: Arc<IndexHandle>,
    retriever: Retriever,
    synthesizer: Synthesizer,
    min_score: f32,
}

impl QueryPipeline {
    pub fn new(
        handle: Arc<IndexHandle>,
        retriever: Retriever,
        synthesizer: Synthesizer,
        min_score: f32,
    ) -> Self {
        Self {
            handle,
            retriever,
            synthesizer,
            min_score,
        }
    }

    pub async fn answer(&self, question: &str) -> AppResult<Answer> {
        self.answer_with_cancel(question, &CancelToken::never()).await
    }

    pub async fn answer_with_cancel(
        &self,
        question: &str,
        cancel: &CancelToken,
    ) -> AppResult<Answer> {
        let (answer, _) = self.run(question, cancel).await?;
        Ok(answer)
    }

    /// Answer and resolve the cited passages against the same index snapshot
    /// the answer was grounded on.
    pub async fn ask(&self, question: &str, cancel: &CancelToken) -> AppResult<AskResult> {
        let (answer, index) = self.run(question, cancel).await?;

        let sources = answer
            .citations
            .iter()
            .filter_map(|id| index.get(*id))
            .map(|p| CitedPassage {
                id: p.id,
                char_start: p.char_start,
                char_end: p.char_end,
                text: p.text.clone(),
            })
            .collect();

        Ok(AskResult { answer, sources })
    }

    #[instrument(skip_all, fields(question_len = question.len()))]
    async fn run(
        &self,
        question: &str,
        cancel: &CancelToken,
    ) -> AppResult<(Answer, Arc<EmbeddingIndex>)> {
        let mut query = Query::new(question)?;
        let index = self.handle.snapshot();
        debug!(stage = %QueryStage::Received, generation = %index.metadata().generation);

        let retrieved = self.retriever.retrieve(&mut query, &index, cancel).await?;
        debug!(stage = %QueryStage::Retrieved, passages = retrieved.len());

        let decision = grounding::decide(&retrieved, self.min_score);
        let stage = match &decision {
            GroundingDecision::Grounded(_) => QueryStage::Grounded,
            GroundingDecision::Refused(_) => QueryStage::Refused,
        };
        debug!(stage = %stage, top_score = ?retrieved.top_score());

        let answer = self.synthesizer.synthesize(&query, decision, cancel).await?;
        info!(
            stage = %QueryStage::Answered,
            answered = answer.answered,
            citations = answer.citations.len(),
            "Query complete"
        );

        Ok((answer, index))
    }
}
