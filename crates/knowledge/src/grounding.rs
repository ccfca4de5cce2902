//! Decides whether retrieved evidence is strong enough to answer from.

use crate::types::{GroundingDecision, RefusalReason, RetrievalResult};

/// Ground on the retrieved passages when the best score reaches `min_score`.
///
/// A top score exactly equal to the threshold is grounded.
pub fn decide(result: &RetrievalResult, min_score: f32) -> GroundingDecision {
    match result.top_score() {
        Some(top) if top >= min_score => GroundingDecision::Grounded(result.passages.clone()),
        Some(top) => {
            tracing::debug!(top, min_score, "Best passage below relevance threshold");
            GroundingDecision::Refused(RefusalReason::InsufficientEvidence)
        }
        None => GroundingDecision::Refused(RefusalReason::InsufficientEvidence),
    }
}
