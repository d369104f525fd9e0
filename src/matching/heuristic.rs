use std::sync::Arc;

use crate::core::types::{clamp_confidence, MatchType};
use crate::matching::engine::{MatchResult, RuleReference};
use crate::matching::normalize::normalize_term;
use crate::rules::rule::{HeuristicRule, RuleDirection, RuleType};
use crate::rules::{RuleManager, RuleStore};

/// Confidence ceiling for bidirectional rules
const BIDIRECTIONAL_CAP: f64 = 0.95;
/// Reduction applied to one-way rules
const UNIDIRECTIONAL_PENALTY: f64 = 0.05;
/// One-way reduction never takes confidence below this
const UNIDIRECTIONAL_FLOOR: f64 = 0.70;

/// The best rule found for a pair of labels
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: HeuristicRule,
    pub confidence: f64,
    /// e.g. "Abbreviation expansion: cnc ↔ computer numerical control"
    pub detail: String,
}

/// Rule-based label matcher.
///
/// Holds no state besides the rule manager; every call works against the
/// store snapshot current at the start of the call.
#[derive(Debug, Clone)]
pub struct HeuristicMatcher {
    rules: Arc<RuleManager>,
}

impl HeuristicMatcher {
    pub fn new(rules: Arc<RuleManager>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleManager> {
        &self.rules
    }

    /// Highest-confidence applicable rule for `(text1, text2)` in `domain`
    #[must_use]
    pub fn find_best_rule(&self, text1: &str, text2: &str, domain: &str) -> Option<RuleMatch> {
        best_rule(&self.rules.snapshot(), text1, text2, domain)
    }

    /// Match two labels against the domain's rules
    #[must_use]
    pub fn match_labels(&self, text1: &str, text2: &str, domain: &str) -> MatchResult {
        let store = self.rules.snapshot();
        match_with_store(&store, text1, text2, domain)
    }

    /// One result per capability label, all evaluated against the same store snapshot
    #[must_use]
    pub fn batch_match<S: AsRef<str>>(
        &self,
        requirement: &str,
        capabilities: &[S],
        domain: &str,
    ) -> Vec<MatchResult> {
        let store = self.rules.snapshot();
        capabilities
            .iter()
            .map(|capability| match_with_store(&store, requirement, capability.as_ref(), domain))
            .collect()
    }
}

pub fn match_with_store(store: &RuleStore, text1: &str, text2: &str, domain: &str) -> MatchResult {
    match best_rule(store, text1, text2, domain) {
        Some(found) => {
            let match_type = if found.rule.rule_type == RuleType::Substitution {
                MatchType::Substitution
            } else {
                MatchType::Heuristic
            };
            MatchResult {
                requirement: text1.to_string(),
                capability: text2.to_string(),
                matched: true,
                confidence: found.confidence,
                match_type,
                rule_used: Some(RuleReference::from(&found.rule)),
                transformation_details: vec![
                    found.detail,
                    format!(
                        "Rule '{}' ({}), confidence {:.2}",
                        found.rule.id, found.rule.domain, found.confidence
                    ),
                ],
                domain: domain.to_string(),
            }
        }
        None => MatchResult::unmatched(text1, text2, domain),
    }
}

fn best_rule(store: &RuleStore, text1: &str, text2: &str, domain: &str) -> Option<RuleMatch> {
    let t1 = normalize_term(text1);
    let t2 = normalize_term(text2);
    if t1.is_empty() || t2.is_empty() {
        return None;
    }

    let mut best: Option<(&HeuristicRule, f64)> = None;
    for rule in store.candidate_rules(domain, &t1, &t2) {
        if !rule_applies(rule, &t1, &t2) {
            continue;
        }
        let confidence = rule_confidence(rule);
        // Strictly greater: the first rule in id order wins ties
        if best.map_or(true, |(_, c)| confidence > c) {
            best = Some((rule, confidence));
        }
    }

    best.map(|(rule, confidence)| {
        tracing::debug!(
            "Rule '{}' matched '{}' / '{}' in {} ({:.2})",
            rule.id,
            t1,
            t2,
            domain,
            confidence
        );
        RuleMatch {
            detail: describe_transformation(rule, &t1, &t2),
            rule: rule.clone(),
            confidence,
        }
    })
}

/// Applicability test on already-normalized labels.
///
/// A rule applies when its direction allows `text1 = key, text2 ∈ values`
/// (forward) or `text2 = key, text1 ∈ values` (reverse), or when both labels
/// are values of the same key.
#[must_use]
pub fn rule_applies(rule: &HeuristicRule, text1: &str, text2: &str) -> bool {
    let key = normalize_term(&rule.key);
    let values: Vec<String> = rule.values.iter().map(|v| normalize_term(v)).collect();
    let in_values = |text: &str| values.iter().any(|v| v == text);

    (rule.direction.allows_forward() && text1 == key && in_values(text2))
        || (rule.direction.allows_reverse() && text2 == key && in_values(text1))
        || (in_values(text1) && in_values(text2))
}

/// Confidence a rule yields when it applies.
///
/// Base confidence, capped by rule type, then adjusted for direction:
/// bidirectional rules are capped at 0.95, one-way rules lose 0.05 but the
/// reduction stops at 0.70 (it never raises a lower base).
#[must_use]
pub fn rule_confidence(rule: &HeuristicRule) -> f64 {
    let typed = rule.base_confidence.min(rule.rule_type.confidence_cap());

    let directed = match rule.direction {
        RuleDirection::Bidirectional => typed.min(BIDIRECTIONAL_CAP),
        RuleDirection::Forward | RuleDirection::Reverse => {
            if typed > UNIDIRECTIONAL_FLOOR {
                (typed - UNIDIRECTIONAL_PENALTY).max(UNIDIRECTIONAL_FLOOR)
            } else {
                typed
            }
        }
    };

    clamp_confidence(directed)
}

fn describe_transformation(rule: &HeuristicRule, text1: &str, text2: &str) -> String {
    format!(
        "{}: {} {} {}",
        rule.rule_type.description(),
        text1,
        rule.direction.arrow(),
        text2
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::HeuristicRuleSet;

    fn rule(
        id: &str,
        rule_type: RuleType,
        key: &str,
        values: &[&str],
        direction: RuleDirection,
        base: f64,
    ) -> HeuristicRule {
        HeuristicRule::new(
            id,
            rule_type,
            key,
            values.iter().map(|v| (*v).to_string()).collect(),
            direction,
            base,
            "manufacturing",
        )
        .unwrap()
    }

    fn matcher_with(rules: Vec<HeuristicRule>) -> HeuristicMatcher {
        let mut set = HeuristicRuleSet::new("manufacturing", "1.0.0");
        for r in rules {
            set.add_rule(r).unwrap();
        }
        let manager = RuleManager::from_store(RuleStore::from_sets([set]));
        HeuristicMatcher::new(Arc::new(manager))
    }

    #[test]
    fn test_cnc_abbreviation() {
        let matcher = matcher_with(vec![rule(
            "cnc",
            RuleType::Abbreviation,
            "cnc",
            &["computer numerical control"],
            RuleDirection::Bidirectional,
            0.9,
        )]);

        let result = matcher.match_labels("cnc", "computer numerical control", "manufacturing");
        assert!(result.matched);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert!(result.confidence <= 0.95);
        assert_eq!(result.match_type, MatchType::Heuristic);
        assert_eq!(
            result.transformation_details[0],
            "Abbreviation expansion: cnc ↔ computer numerical control"
        );

        // Case and surrounding whitespace do not matter, and the rule works in reverse
        let reversed = matcher.match_labels(" Computer Numerical Control", "CNC ", "manufacturing");
        assert!(reversed.matched);
    }

    #[test]
    fn test_direction_restrictions() {
        let matcher = matcher_with(vec![rule(
            "laser",
            RuleType::Synonym,
            "laser cutting",
            &["laser cutter"],
            RuleDirection::Forward,
            0.8,
        )]);

        assert!(matcher
            .match_labels("laser cutting", "laser cutter", "manufacturing")
            .matched);
        assert!(!matcher
            .match_labels("laser cutter", "laser cutting", "manufacturing")
            .matched);
    }

    #[test]
    fn test_two_values_of_same_key_match() {
        let matcher = matcher_with(vec![rule(
            "fdm",
            RuleType::Abbreviation,
            "fdm",
            &["fused deposition modeling", "fused filament fabrication"],
            RuleDirection::Forward,
            0.9,
        )]);

        let result = matcher.match_labels(
            "fused filament fabrication",
            "fused deposition modeling",
            "manufacturing",
        );
        assert!(result.matched);
    }

    #[test]
    fn test_confidence_caps_by_type() {
        let synonym = rule("s", RuleType::Synonym, "a", &["b"], RuleDirection::Bidirectional, 1.0);
        assert!((rule_confidence(&synonym) - 0.90).abs() < 1e-9);

        let substitution =
            rule("s", RuleType::Substitution, "a", &["b"], RuleDirection::Bidirectional, 1.0);
        assert!((rule_confidence(&substitution) - 0.85).abs() < 1e-9);

        let equivalent =
            rule("e", RuleType::Equivalent, "a", &["b"], RuleDirection::Bidirectional, 1.0);
        assert!((rule_confidence(&equivalent) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_unidirectional_adjustment() {
        let high = rule("f", RuleType::Equivalent, "a", &["b"], RuleDirection::Forward, 0.9);
        assert!((rule_confidence(&high) - 0.85).abs() < 1e-9);

        let near_floor = rule("f", RuleType::Equivalent, "a", &["b"], RuleDirection::Reverse, 0.72);
        assert!((rule_confidence(&near_floor) - 0.70).abs() < 1e-9);

        let low = rule("f", RuleType::Equivalent, "a", &["b"], RuleDirection::Forward, 0.5);
        assert!((rule_confidence(&low) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bidirectional_never_lower_than_one_way() {
        let types = [
            RuleType::Abbreviation,
            RuleType::Synonym,
            RuleType::Equivalent,
            RuleType::Substitution,
            RuleType::Normalization,
        ];
        for rule_type in types {
            for step in 0..=100 {
                let base = f64::from(step) / 100.0;
                let both = rule("x", rule_type, "a", &["b"], RuleDirection::Bidirectional, base);
                let forward = rule("x", rule_type, "a", &["b"], RuleDirection::Forward, base);
                let reverse = rule("x", rule_type, "a", &["b"], RuleDirection::Reverse, base);
                let c = rule_confidence(&both);
                assert!(c >= rule_confidence(&forward), "{rule_type} at {base}");
                assert!(c >= rule_confidence(&reverse), "{rule_type} at {base}");
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn test_best_rule_wins() {
        let matcher = matcher_with(vec![
            rule("a_low", RuleType::Synonym, "mill", &["milling"], RuleDirection::Forward, 0.75),
            rule("b_high", RuleType::Abbreviation, "mill", &["milling"], RuleDirection::Bidirectional, 0.9),
        ]);

        let best = matcher.find_best_rule("mill", "milling", "manufacturing").unwrap();
        assert_eq!(best.rule.id, "b_high");
    }

    #[test]
    fn test_substitution_rule_tags_result() {
        let matcher = matcher_with(vec![rule(
            "plasma",
            RuleType::Substitution,
            "plasma cutting",
            &["laser cutting"],
            RuleDirection::Forward,
            0.8,
        )]);
        let result = matcher.match_labels("plasma cutting", "laser cutting", "manufacturing");
        assert_eq!(result.match_type, MatchType::Substitution);
        assert_eq!(result.rule_used.unwrap().rule_type, RuleType::Substitution);
    }

    #[test]
    fn test_batch_match() {
        let matcher = matcher_with(vec![rule(
            "cnc",
            RuleType::Abbreviation,
            "cnc",
            &["computer numerical control"],
            RuleDirection::Bidirectional,
            0.9,
        )]);

        let results = matcher.batch_match(
            "cnc",
            &["computer numerical control", "welding"],
            "manufacturing",
        );
        assert_eq!(results.len(), 2);
        assert!(results[0].matched);
        assert!(!results[1].matched);
        assert!((results[1].confidence - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_domain_never_matches() {
        let matcher = matcher_with(vec![rule(
            "cnc",
            RuleType::Abbreviation,
            "cnc",
            &["computer numerical control"],
            RuleDirection::Bidirectional,
            0.9,
        )]);
        assert!(!matcher
            .match_labels("cnc", "computer numerical control", "cooking")
            .matched);
    }
}
