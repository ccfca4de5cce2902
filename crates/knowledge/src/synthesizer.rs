//! Answer synthesis from grounded passages.
//!
//! The generation service sees the passages as a tagged context block in the
//! system message and the question as the prompt. It must either answer from
//! that context and finish with a `CITED: <ids>` line, or reply with the
//! `INSUFFICIENT_CONTEXT` sentinel.

use crate::types::{Answer, GroundingDecision, KnowledgeConfig, PassageId, Query, RefusalReason, ScoredPassage};
use folio_core::{AppError, AppResult};
use folio_llm::{call_with_retry, CancelToken, LlmClient, LlmRequest, LlmResponse, RetryPolicy, ServiceKind};
use folio_prompt::{build_prompt, PromptDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Returned whenever no grounded answer can be given.
pub const REFUSAL_MESSAGE: &str =
    "I can't answer that from this book: the text does not contain enough information.";

/// Reply the model gives when the context lacks the answer.
pub const INSUFFICIENT_CONTEXT_SENTINEL: &str = "INSUFFICIENT_CONTEXT";

/// Prefix of the trailing line listing the passages used.
pub const CITED_PREFIX: &str = "CITED:";

const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Render passages in ranked order, each tagged with its id.
pub fn build_context(passages: &[ScoredPassage]) -> String {
    passages
        .iter()
        .map(|p| format!("[Passage {}]\n{}", p.id(), p.passage.text.trim()))
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

/// Turns a grounding decision into an [`Answer`].
pub struct Synthesizer {
    client: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
    policy: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
}

impl Synthesizer {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        prompt: PromptDefinition,
        config: &KnowledgeConfig,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            prompt,
            policy: config.generate_policy(),
            temperature: config.temperature,
            max_tokens: config.max_answer_tokens,
        }
    }

    /// Produce the answer. A refused decision never reaches the generation
    /// service; service failures propagate as errors, never as refusals.
    #[instrument(skip_all, fields(provider = self.client.provider_name(), model = %self.model))]
    pub async fn synthesize(
        &self,
        query: &Query,
        decision: GroundingDecision,
        cancel: &CancelToken,
    ) -> AppResult<Answer> {
        let passages = match decision {
            GroundingDecision::Refused(reason) => {
                debug!(?reason, "Refusing without generation");
                return Ok(Answer::refused(REFUSAL_MESSAGE, reason));
            }
            GroundingDecision::Grounded(passages) => passages,
        };

        let request = self.build_request(query, &passages)?;
        let client = &self.client;
        let response = call_with_retry(&self.policy, ServiceKind::Generation, cancel, || {
            client.complete(&request)
        })
        .await?;

        let context_ids: Vec<PassageId> = passages.iter().map(|p| p.id()).collect();
        let answer = interpret_response(&response, &context_ids)?;

        info!(
            answered = answer.answered,
            citations = answer.citations.len(),
            "Synthesized answer"
        );
        Ok(answer)
    }

    fn build_request(&self, query: &Query, passages: &[ScoredPassage]) -> AppResult<LlmRequest> {
        let mut variables = HashMap::new();
        variables.insert("question".to_string(), query.text.trim().to_string());
        variables.insert("context".to_string(), build_context(passages));
        variables.insert(
            "sentinel".to_string(),
            INSUFFICIENT_CONTEXT_SENTINEL.to_string(),
        );
        variables.insert("cited_prefix".to_string(), CITED_PREFIX.to_string());

        let built = build_prompt(&self.prompt, variables)?;

        Ok(LlmRequest::new(built.user, &self.model)
            .with_system(built.system)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens))
    }
}

/// Apply the response protocol to a generation result.
fn interpret_response(response: &LlmResponse, context_ids: &[PassageId]) -> AppResult<Answer> {
    if response.insufficient_context == Some(true) {
        return Ok(Answer::refused(REFUSAL_MESSAGE, RefusalReason::ModelDeclined));
    }

    let (body, reported) = split_citations(&response.content);

    if declines(&body) {
        return Ok(Answer::refused(REFUSAL_MESSAGE, RefusalReason::ModelDeclined));
    }
    if body.is_empty() {
        return Err(AppError::GenerationService(
            "Generation service returned an empty answer".to_string(),
        ));
    }

    let mut citations: Vec<PassageId> = Vec::new();
    for id in reported {
        if context_ids.contains(&id) && !citations.contains(&id) {
            citations.push(id);
        }
    }
    if citations.is_empty() {
        citations = context_ids.to_vec();
    }

    Ok(Answer::grounded(body, citations))
}

/// Whether `body` opens with the sentinel, ignoring case, surrounding
/// quotes or markup, and trailing punctuation.
fn declines(body: &str) -> bool {
    let head = body.trim_start_matches(|c: char| !c.is_alphanumeric());
    head.get(..INSUFFICIENT_CONTEXT_SENTINEL.len())
        .is_some_and(|h| h.eq_ignore_ascii_case(INSUFFICIENT_CONTEXT_SENTINEL))
}

/// Separate the answer body from its last `CITED:` line.
fn split_citations(content: &str) -> (String, Vec<PassageId>) {
    let lines: Vec<&str> = content.lines().collect();
    let cited_at = lines
        .iter()
        .rposition(|line| cited_ids(line).is_some());

    match cited_at {
        Some(at) => {
            let ids = cited_ids(lines[at]).unwrap_or_default();
            let body = lines
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != at)
                .map(|(_, line)| *line)
                .collect::<Vec<_>>()
                .join("\n");
            (body.trim().to_string(), ids)
        }
        None => (content.trim().to_string(), Vec::new()),
    }
}

/// Ids on a `CITED:` line, accepting forms like `2, 5`, `[2] [5]` or
/// `Passage 2`. `None` when the line is not a citation line.
fn cited_ids(line: &str) -> Option<Vec<PassageId>> {
    let trimmed = line.trim();
    let head = trimmed.get(..CITED_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(CITED_PREFIX) {
        return None;
    }

    let ids = trimmed[CITED_PREFIX.len()..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u32>().ok())
        .map(PassageId)
        .collect();
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Passage;
    use async_trait::async_trait;
    use folio_prompt::default_prompt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingClient {
        reply: LlmResponse,
        calls: AtomicUsize,
        last: Mutex<Option<LlmRequest>>,
    }

    impl RecordingClient {
        fn replying(content: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: LlmResponse::text(content, "test"),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        fn provider_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn scored(id: u32, text: &str) -> ScoredPassage {
        ScoredPassage {
            passage: Arc::new(Passage {
                id: PassageId(id),
                ordinal: id,
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
                hash: String::new(),
                embedding: None,
            }),
            score: 0.8,
        }
    }

    fn synthesizer(client: Arc<RecordingClient>) -> Synthesizer {
        Synthesizer::new(client, "llama3.2", default_prompt(), &KnowledgeConfig::default())
    }

    fn grounded() -> GroundingDecision {
        GroundingDecision::Grounded(vec![
            scored(2, "She refused his offer."),
            scored(0, "The duke arrived at dusk."),
        ])
    }

    #[test]
    fn test_build_context() {
        let context = build_context(&[scored(3, "First."), scored(1, " Second. ")]);
        assert_eq!(context, "[Passage 3]\nFirst.\n\n---\n\n[Passage 1]\nSecond.");
    }

    #[test]
    fn test_cited_ids() {
        assert_eq!(cited_ids("CITED: 2, 5"), Some(vec![PassageId(2), PassageId(5)]));
        assert_eq!(cited_ids("  cited: [Passage 7]"), Some(vec![PassageId(7)]));
        assert_eq!(cited_ids("CITED:"), Some(vec![]));
        assert_eq!(cited_ids("She cited: nothing"), None);
        assert_eq!(cited_ids("é"), None);
    }

    #[tokio::test]
    async fn test_refused_decision_skips_generation() {
        let client = RecordingClient::replying("unused");
        let synth = synthesizer(client.clone());
        let query = Query::new("Who won the World Cup in 2022?").unwrap();

        let answer = synth
            .synthesize(
                &query,
                GroundingDecision::Refused(RefusalReason::InsufficientEvidence),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(!answer.answered);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.text, REFUSAL_MESSAGE);
        assert_eq!(answer.refusal, Some(RefusalReason::InsufficientEvidence));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_with_citations() {
        let client = RecordingClient::replying("She refused his offer.\nCITED: 2, 9, 2");
        let synth = synthesizer(client.clone());
        let query = Query::new("What did she do?").unwrap();

        let answer = synth
            .synthesize(&query, grounded(), &CancelToken::never())
            .await
            .unwrap();

        assert!(answer.answered);
        assert_eq!(answer.text, "She refused his offer.");
        // 9 was never in the context; the duplicate 2 collapses
        assert_eq!(answer.citations, vec![PassageId(2)]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let request = client.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.prompt, "What did she do?");
        let system = request.system.unwrap();
        assert!(system.contains("[Passage 2]\nShe refused his offer."));
        assert!(system.contains(INSUFFICIENT_CONTEXT_SENTINEL));
        assert!(system.contains(CITED_PREFIX));
    }

    #[tokio::test]
    async fn test_missing_citations_fall_back_to_context() {
        let client = RecordingClient::replying("She refused him.");
        let answer = synthesizer(client)
            .synthesize(&Query::new("q").unwrap(), grounded(), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(answer.citations, vec![PassageId(2), PassageId(0)]);
    }

    #[tokio::test]
    async fn test_sentinel_is_model_declined() {
        let client = RecordingClient::replying("  INSUFFICIENT_CONTEXT \n");
        let answer = synthesizer(client)
            .synthesize(&Query::new("q").unwrap(), grounded(), &CancelToken::never())
            .await
            .unwrap();

        assert!(!answer.answered);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.refusal, Some(RefusalReason::ModelDeclined));
    }

    #[test]
    fn test_sentinel_variants_are_model_declined() {
        for reply in [
            "INSUFFICIENT_CONTEXT.",
            "insufficient_context",
            "`INSUFFICIENT_CONTEXT`",
            "Insufficient_Context!\nCITED: 2",
            "INSUFFICIENT_CONTEXT: the passages never mention this.",
        ] {
            let response = LlmResponse::text(reply, "test");
            let answer = interpret_response(&response, &[PassageId(2)]).unwrap();
            assert!(!answer.answered, "{:?} was treated as an answer", reply);
            assert!(answer.citations.is_empty());
            assert_eq!(answer.refusal, Some(RefusalReason::ModelDeclined));
        }
    }

    #[test]
    fn test_sentinel_mentioned_mid_answer_is_not_a_refusal() {
        let response = LlmResponse::text("She refused him; no INSUFFICIENT_CONTEXT here.\nCITED: 2", "test");
        let answer = interpret_response(&response, &[PassageId(2)]).unwrap();
        assert!(answer.answered);
    }

    #[test]
    fn test_structured_flag_is_model_declined() {
        let mut response = LlmResponse::text("Some text anyway", "test");
        response.insufficient_context = Some(true);

        let answer = interpret_response(&response, &[PassageId(1)]).unwrap();
        assert_eq!(answer.refusal, Some(RefusalReason::ModelDeclined));
    }

    #[test]
    fn test_empty_answer_is_service_error() {
        let response = LlmResponse::text("\nCITED: 1\n", "test");
        let result = interpret_response(&response, &[PassageId(1)]);
        assert!(matches!(result, Err(AppError::GenerationService(_))));
    }
}
