use serde::{Deserialize, Serialize};

use crate::core::types::{clamp_confidence, ConfidenceBand, MatchType};
use crate::matching::engine::MatchResult;
use crate::utils::{count_to_f64, ratio};

/// Best outcome for one requirement against one facility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementOutcome {
    /// Position of the requirement in the manifest's requirement list
    pub requirement_index: usize,

    /// Position of the satisfying capability in the facility's list
    pub capability_index: Option<usize>,

    pub optional: bool,

    pub result: MatchResult,
}

impl RequirementOutcome {
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.result.matched
    }
}

/// Weights for aggregate facility confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Credit for a direct, heuristic or semantic match
    pub match_weight: f64,
    /// Credit for an accepted substitution
    pub substitution_weight: f64,
    /// Multiplier applied when a required requirement is unmatched
    pub unmatched_required_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            match_weight: 1.0,
            substitution_weight: 0.7,
            unmatched_required_penalty: 0.5,
        }
    }
}

/// Facility-level score against a full requirement list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub requirement_count: usize,
    pub matched_count: usize,
    pub substitution_count: usize,
    pub unmatched_required_count: usize,

    /// Sum of per-requirement credits
    pub weighted_matches: f64,

    /// Aggregate confidence in `[0, 1]`
    pub confidence: f64,

    pub band: ConfidenceBand,

    /// Weakest tier any matched requirement relied on
    pub match_type: MatchType,
}

impl MatchScore {
    /// Aggregate confidence: weighted matches over total requirements, halved
    /// (by default) if any non-optional requirement is unmatched.
    ///
    /// A facility without capabilities, or an empty requirement list, scores 0.0.
    #[must_use]
    pub fn calculate(
        outcomes: &[RequirementOutcome],
        capability_count: usize,
        weights: &ScoringWeights,
    ) -> Self {
        let mut matched_count = 0;
        let mut substitution_count = 0;
        let mut unmatched_required_count = 0;
        let mut weighted_matches = 0.0;

        for outcome in outcomes {
            if outcome.is_matched() {
                matched_count += 1;
                if outcome.result.match_type == MatchType::Substitution {
                    substitution_count += 1;
                    weighted_matches += weights.substitution_weight;
                } else {
                    weighted_matches += weights.match_weight;
                }
            } else if !outcome.optional {
                unmatched_required_count += 1;
            }
        }

        let confidence = if capability_count == 0 {
            0.0
        } else {
            let base = ratio(weighted_matches, count_to_f64(outcomes.len()));
            if unmatched_required_count > 0 {
                clamp_confidence(base * weights.unmatched_required_penalty)
            } else {
                clamp_confidence(base)
            }
        };

        let match_type = MatchType::weakest(
            outcomes
                .iter()
                .filter(|o| o.is_matched())
                .map(|o| o.result.match_type),
        );

        Self {
            requirement_count: outcomes.len(),
            matched_count,
            substitution_count,
            unmatched_required_count,
            weighted_matches,
            confidence,
            band: ConfidenceBand::from_score(confidence),
            match_type,
        }
    }
}
