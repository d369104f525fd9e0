use futures::future::{AbortRegistration, Abortable};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::core::types::{clamp_confidence, Capability, Facility, MatchType, Requirement};
use crate::matching::heuristic::{match_with_store, HeuristicMatcher};
use crate::matching::normalize::normalize_label;
use crate::matching::scoring::{MatchScore, RequirementOutcome, ScoringWeights};
use crate::matching::semantic::SemanticSimilarity;
use crate::matching::solution::{DuplicatePolicy, SolutionMetrics, SolutionSet, SupplyTreeSolution};
use crate::matching::tree_builder::build_supply_tree;
use crate::rules::rule::{HeuristicRule, RuleType};
use crate::rules::{RuleManager, RuleStore};
use crate::supply_tree::SupplyTreeError;

/// Default minimum heuristic confidence for a rule match to count
pub const DEFAULT_HEURISTIC_THRESHOLD: f64 = 0.7;
/// Default minimum similarity for a semantic match to count
pub const DEFAULT_SEMANTIC_THRESHOLD: f64 = 0.4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("No requirements to match")]
    EmptyRequirements,

    #[error("Match request cancelled")]
    Cancelled,

    #[error("Supply tree for facility '{facility_id}' is invalid: {source}")]
    InvalidTree {
        facility_id: String,
        #[source]
        source: SupplyTreeError,
    },
}

/// When a facility counts as a candidate for a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionPolicy {
    /// At least one requirement matches at least one capability
    #[default]
    AnyRequirement,
    /// Every non-optional requirement matches (and at least one requirement does)
    AllRequired,
}

impl SatisfactionPolicy {
    #[must_use]
    pub fn is_satisfied(self, outcomes: &[RequirementOutcome]) -> bool {
        let any = outcomes.iter().any(RequirementOutcome::is_matched);
        match self {
            Self::AnyRequirement => any,
            Self::AllRequired => {
                any && outcomes
                    .iter()
                    .all(|o| o.optional || o.is_matched())
            }
        }
    }
}

/// Configuration for the match cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub heuristic_threshold: f64,
    pub semantic_threshold: f64,
    /// Credit an accepted substitution earns, and the confidence of a declared substitution
    pub substitution_weight: f64,
    pub unmatched_required_penalty: f64,
    /// Facility evaluations and semantic calls in flight at once
    pub max_concurrency: usize,
    pub semantic_timeout_ms: u64,
    pub facility_timeout_ms: u64,
    pub satisfaction_policy: SatisfactionPolicy,
    pub duplicate_policy: DuplicatePolicy,
    /// Solutions scoring below this are dropped
    pub min_score: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            heuristic_threshold: DEFAULT_HEURISTIC_THRESHOLD,
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            substitution_weight: 0.7,
            unmatched_required_penalty: 0.5,
            max_concurrency: 8,
            semantic_timeout_ms: 5_000,
            facility_timeout_ms: 30_000,
            satisfaction_policy: SatisfactionPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
            min_score: 0.0,
        }
    }
}

impl MatchingConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file; missing fields take defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, has an unknown
    /// extension, or holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&text)?,
            Some("json") => serde_json::from_str(&text)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("heuristic_threshold", self.heuristic_threshold),
            ("semantic_threshold", self.semantic_threshold),
            ("substitution_weight", self.substitution_weight),
            ("unmatched_required_penalty", self.unmatched_required_penalty),
            ("min_score", self.min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn semantic_timeout(&self) -> Duration {
        Duration::from_millis(self.semantic_timeout_ms)
    }

    #[must_use]
    pub fn facility_timeout(&self) -> Duration {
        Duration::from_millis(self.facility_timeout_ms)
    }

    #[must_use]
    pub fn scoring_weights(&self) -> ScoringWeights {
        ScoringWeights {
            substitution_weight: self.substitution_weight,
            unmatched_required_penalty: self.unmatched_required_penalty,
            ..ScoringWeights::default()
        }
    }

    /// Effective fan-out width; never below one
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Which rule produced a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleReference {
    pub domain: String,
    pub id: String,
    pub rule_type: RuleType,
}

impl From<&HeuristicRule> for RuleReference {
    fn from(rule: &HeuristicRule) -> Self {
        Self {
            domain: rule.domain.clone(),
            id: rule.id.clone(),
            rule_type: rule.rule_type,
        }
    }
}

/// Outcome of matching one requirement label against one capability label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub requirement: String,
    pub capability: String,
    pub matched: bool,
    pub confidence: f64,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_used: Option<RuleReference>,
    #[serde(default)]
    pub transformation_details: Vec<String>,
    pub domain: String,
}

impl MatchResult {
    pub fn unmatched(
        requirement: impl Into<String>,
        capability: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            requirement: requirement.into(),
            capability: capability.into(),
            matched: false,
            confidence: 0.0,
            match_type: MatchType::Unknown,
            rule_used: None,
            transformation_details: Vec::new(),
            domain: domain.into(),
        }
    }

    fn accepted(
        requirement: &str,
        capability: &str,
        domain: &str,
        confidence: f64,
        match_type: MatchType,
        detail: String,
    ) -> Self {
        Self {
            matched: true,
            confidence: clamp_confidence(confidence),
            match_type,
            transformation_details: vec![detail],
            ..Self::unmatched(requirement, capability, domain)
        }
    }

    #[must_use]
    fn with_detail(mut self, detail: String) -> Self {
        self.transformation_details.push(detail);
        self
    }
}

/// A facility's per-requirement outcomes and aggregate score
#[derive(Debug, Clone, Serialize)]
pub struct FacilityEvaluation {
    pub facility_id: String,
    pub facility_name: String,
    pub outcomes: Vec<RequirementOutcome>,
    pub score: MatchScore,
    /// Passed the configured satisfaction policy
    pub is_candidate: bool,
    /// A semantic call timed out, failed, or was skipped at the deadline
    pub semantic_degraded: bool,
}

enum SemanticVerdict {
    Accepted(f64),
    Rejected(f64),
    Degraded,
}

/// The direct → heuristic → semantic matching cascade.
///
/// Constructed once at start-up and shared; every request works against the
/// rule-store snapshot current when it started.
pub struct MatchCascade {
    heuristic: HeuristicMatcher,
    semantic: Option<Arc<dyn SemanticSimilarity>>,
    config: MatchingConfig,
    /// Bounds in-flight semantic calls across all facilities
    semantic_permits: Arc<Semaphore>,
}

impl MatchCascade {
    pub fn new(rules: Arc<RuleManager>, config: MatchingConfig) -> Self {
        let semantic_permits = Arc::new(Semaphore::new(config.concurrency()));
        Self {
            heuristic: HeuristicMatcher::new(rules),
            semantic: None,
            config,
            semantic_permits,
        }
    }

    #[must_use]
    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticSimilarity>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    #[must_use]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    #[must_use]
    pub fn heuristic(&self) -> &HeuristicMatcher {
        &self.heuristic
    }

    #[must_use]
    pub fn has_semantic(&self) -> bool {
        self.semantic.is_some()
    }

    /// Direct, declared-substitution and heuristic tiers for one pair.
    ///
    /// Returns `None` if none of them accepts the pair.
    #[must_use]
    pub fn match_static(
        &self,
        store: &RuleStore,
        requirement: &Requirement,
        capability: &Capability,
        domain: &str,
    ) -> Option<MatchResult> {
        let req_label = normalize_label(&requirement.name);
        let cap_label = normalize_label(&capability.name);
        if req_label.is_empty() || cap_label.is_empty() {
            return None;
        }

        if req_label == cap_label {
            tracing::debug!("Direct match '{}' = '{}'", requirement.name, capability.name);
            return Some(MatchResult::accepted(
                &requirement.name,
                &capability.name,
                domain,
                1.0,
                MatchType::Direct,
                format!("Direct match: {req_label}"),
            ));
        }

        if capability
            .substitutes_for()
            .iter()
            .any(|label| normalize_label(label) == req_label)
        {
            tracing::debug!(
                "'{}' declares it substitutes for '{}'",
                capability.name,
                requirement.name
            );
            return Some(MatchResult::accepted(
                &requirement.name,
                &capability.name,
                domain,
                self.config.substitution_weight,
                MatchType::Substitution,
                format!("Declared substitution: {cap_label} substitutes for {req_label}"),
            ));
        }

        // Rules are keyed by trimmed, lower-cased terms; retry on the
        // separator-normalized labels so "laser_cutting" still hits "laser cutting"
        let mut result = match_with_store(store, &requirement.name, &capability.name, domain);
        if !result.matched {
            result = match_with_store(store, &req_label, &cap_label, domain);
            result.requirement.clone_from(&requirement.name);
            result.capability.clone_from(&capability.name);
        }

        if !result.matched {
            return None;
        }
        if result.confidence < self.config.heuristic_threshold {
            tracing::debug!(
                "Rule match '{}' / '{}' below threshold ({:.2} < {:.2})",
                requirement.name,
                capability.name,
                result.confidence,
                self.config.heuristic_threshold
            );
            return None;
        }
        Some(result)
    }

    /// Full cascade for a single pair against the current rule store
    pub async fn match_pair(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        domain: &str,
    ) -> MatchResult {
        let store = self.heuristic.rules().snapshot();
        if let Some(result) = self.match_static(&store, requirement, capability, domain) {
            return result;
        }

        let Some(semantic) = &self.semantic else {
            return MatchResult::unmatched(&requirement.name, &capability.name, domain);
        };
        let deadline = Instant::now() + self.config.semantic_timeout();
        let req_label = normalize_label(&requirement.name);
        let cap_label = normalize_label(&capability.name);
        match self
            .semantic_tier(semantic.as_ref(), &req_label, &cap_label, deadline)
            .await
        {
            SemanticVerdict::Accepted(score) => {
                self.semantic_result(requirement, capability, domain, score)
            }
            SemanticVerdict::Rejected(score) => {
                MatchResult::unmatched(&requirement.name, &capability.name, domain).with_detail(
                    format!(
                        "Semantic similarity {score:.2} below threshold {:.2}",
                        self.config.semantic_threshold
                    ),
                )
            }
            SemanticVerdict::Degraded => {
                MatchResult::unmatched(&requirement.name, &capability.name, domain)
                    .with_detail("Semantic similarity unavailable".to_string())
            }
        }
    }

    fn semantic_result(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        domain: &str,
        score: f64,
    ) -> MatchResult {
        MatchResult::accepted(
            &requirement.name,
            &capability.name,
            domain,
            score,
            MatchType::Semantic,
            format!(
                "Semantic similarity {score:.2} (threshold {:.2})",
                self.config.semantic_threshold
            ),
        )
    }

    /// One semantic call, bounded by the shared permit pool, the per-call
    /// timeout and the facility deadline
    async fn semantic_tier(
        &self,
        semantic: &dyn SemanticSimilarity,
        req_label: &str,
        cap_label: &str,
        deadline: Instant,
    ) -> SemanticVerdict {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return SemanticVerdict::Degraded;
        }
        let budget = remaining.min(self.config.semantic_timeout());

        let call = async {
            let _permit = self.semantic_permits.acquire().await.ok()?;
            Some(semantic.similarity(req_label, cap_label).await)
        };

        match tokio::time::timeout(budget, call).await {
            Ok(Some(Ok(score))) => {
                let score = clamp_confidence(score);
                if score >= self.config.semantic_threshold {
                    SemanticVerdict::Accepted(score)
                } else {
                    SemanticVerdict::Rejected(score)
                }
            }
            Ok(Some(Err(e))) => {
                tracing::warn!("Semantic similarity failed for '{}' / '{}': {}", req_label, cap_label, e);
                SemanticVerdict::Degraded
            }
            Ok(None) => SemanticVerdict::Degraded,
            Err(_) => {
                tracing::warn!(
                    "Semantic similarity timed out after {:?} for '{}' / '{}'",
                    budget,
                    req_label,
                    cap_label
                );
                SemanticVerdict::Degraded
            }
        }
    }

    /// Best outcome for one requirement over all of a facility's capabilities.
    ///
    /// The cheap tiers run over every capability first; the semantic tier is
    /// only consulted when none of them matched. Returns the outcome and
    /// whether the semantic tier was degraded.
    async fn match_requirement(
        &self,
        store: &RuleStore,
        index: usize,
        requirement: &Requirement,
        facility: &Facility,
        domain: &str,
        deadline: Instant,
    ) -> (RequirementOutcome, bool) {
        let mut best: Option<(usize, MatchResult)> = None;
        for (j, capability) in facility.capabilities.iter().enumerate() {
            let Some(result) = self.match_static(store, requirement, capability, domain) else {
                continue;
            };
            let direct = result.match_type == MatchType::Direct;
            if best
                .as_ref()
                .map_or(true, |(_, b)| result.confidence > b.confidence)
            {
                best = Some((j, result));
            }
            if direct {
                break;
            }
        }

        let mut degraded = false;
        if best.is_none() && !facility.capabilities.is_empty() {
            if let Some(semantic) = &self.semantic {
                let req_label = normalize_label(&requirement.name);
                let req_label = req_label.as_str();
                let semantic = semantic.as_ref();

                let verdicts: Vec<(usize, SemanticVerdict)> =
                    stream::iter(
                        facility
                            .capabilities
                            .iter()
                            .enumerate()
                            .map(|(j, capability)| async move {
                                let cap_label = normalize_label(&capability.name);
                                let verdict =
                                    self.semantic_tier(semantic, req_label, &cap_label, deadline).await;
                                (j, verdict)
                            })
                            .collect::<Vec<_>>(),
                    )
                        .buffer_unordered(self.config.concurrency())
                        .collect()
                        .await;

                let mut best_score: Option<(usize, f64)> = None;
                for (j, verdict) in verdicts {
                    match verdict {
                        SemanticVerdict::Accepted(score) => {
                            let better = best_score.map_or(true, |(bj, bs)| {
                                score > bs || ((score - bs).abs() < f64::EPSILON && j < bj)
                            });
                            if better {
                                best_score = Some((j, score));
                            }
                        }
                        SemanticVerdict::Rejected(_) => {}
                        SemanticVerdict::Degraded => degraded = true,
                    }
                }

                best = best_score.map(|(j, score)| {
                    (
                        j,
                        self.semantic_result(requirement, &facility.capabilities[j], domain, score),
                    )
                });
            }
        }

        let outcome = match best {
            Some((j, result)) => RequirementOutcome {
                requirement_index: index,
                capability_index: Some(j),
                optional: requirement.optional,
                result,
            },
            None => {
                let mut result = MatchResult::unmatched(&requirement.name, "", domain).with_detail(
                    format!("No capability of '{}' satisfies '{}'", facility.name, requirement.name),
                );
                if degraded {
                    result = result.with_detail("Semantic tier degraded".to_string());
                }
                RequirementOutcome {
                    requirement_index: index,
                    capability_index: None,
                    optional: requirement.optional,
                    result,
                }
            }
        };

        (outcome, degraded)
    }

    /// Evaluate one facility against the full requirement list
    pub async fn evaluate_facility(
        &self,
        requirements: &[Requirement],
        facility: &Facility,
        domain: &str,
    ) -> FacilityEvaluation {
        let store = self.heuristic.rules().snapshot();
        self.evaluate_with_store(&store, requirements, facility, domain)
            .await
    }

    async fn evaluate_with_store(
        &self,
        store: &RuleStore,
        requirements: &[Requirement],
        facility: &Facility,
        domain: &str,
    ) -> FacilityEvaluation {
        let deadline = Instant::now() + self.config.facility_timeout();

        let mut outcomes = Vec::with_capacity(requirements.len());
        let mut semantic_degraded = false;
        for (index, requirement) in requirements.iter().enumerate() {
            let (outcome, degraded) = self
                .match_requirement(store, index, requirement, facility, domain, deadline)
                .await;
            semantic_degraded |= degraded;
            outcomes.push(outcome);
        }

        let score = MatchScore::calculate(
            &outcomes,
            facility.capabilities.len(),
            &self.config.scoring_weights(),
        );
        let is_candidate = self.config.satisfaction_policy.is_satisfied(&outcomes);

        tracing::debug!(
            "Facility '{}': {}/{} requirements matched, confidence {:.2}{}",
            facility.id,
            score.matched_count,
            score.requirement_count,
            score.confidence,
            if semantic_degraded { " (semantic degraded)" } else { "" }
        );

        FacilityEvaluation {
            facility_id: facility.id.clone(),
            facility_name: facility.name.clone(),
            outcomes,
            score,
            is_candidate,
            semantic_degraded,
        }
    }

    /// Match a manifest's requirements against every facility.
    ///
    /// Facilities are evaluated concurrently (up to `max_concurrency`), each
    /// candidate becomes a supply tree, and the solutions are de-duplicated by
    /// facility identity.
    ///
    /// # Errors
    ///
    /// Returns an error if `requirements` is empty or a built tree fails
    /// snapshot validation.
    pub async fn find_solutions(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
        domain: &str,
    ) -> Result<SolutionSet, MatchError> {
        if requirements.is_empty() {
            return Err(MatchError::EmptyRequirements);
        }

        let store = self.heuristic.rules().snapshot();
        let store = store.as_ref();
        tracing::info!(
            "Matching {} requirements against {} facilities ({})",
            requirements.len(),
            facilities.len(),
            domain
        );

        let evaluations: Vec<(&Facility, FacilityEvaluation)> = stream::iter(
            facilities
                .iter()
                .map(|facility| async move {
                    let evaluation = self
                        .evaluate_with_store(store, requirements, facility, domain)
                        .await;
                    (facility, evaluation)
                })
                .collect::<Vec<_>>(),
        )
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        let mut solutions = SolutionSet::new(self.config.duplicate_policy);
        for (facility, evaluation) in evaluations {
            if !evaluation.is_candidate {
                continue;
            }
            if evaluation.score.confidence < self.config.min_score {
                tracing::debug!(
                    "Facility '{}' below minimum score ({:.2})",
                    facility.id,
                    evaluation.score.confidence
                );
                continue;
            }

            let tree = build_supply_tree(manifest_id, requirements, facility, &evaluation, domain)
                .map_err(|source| MatchError::InvalidTree {
                    facility_id: facility.id.clone(),
                    source,
                })?;
            let metrics = SolutionMetrics::new(
                facilities.len(),
                facility.capabilities.len(),
                &evaluation,
            );
            solutions.insert(SupplyTreeSolution::new(
                tree,
                evaluation.score.confidence,
                metrics,
            ));
        }

        tracing::info!("Found {} solutions", solutions.len());
        Ok(solutions)
    }

    /// [`find_solutions`](Self::find_solutions) that stops when `registration`'s
    /// handle is aborted, dropping every in-flight similarity call.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Cancelled`] on abort, otherwise as `find_solutions`.
    pub async fn find_solutions_abortable(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
        domain: &str,
        registration: AbortRegistration,
    ) -> Result<SolutionSet, MatchError> {
        Abortable::new(
            self.find_solutions(manifest_id, requirements, facilities, domain),
            registration,
        )
        .await
        .map_err(|_| MatchError::Cancelled)?
    }
}
