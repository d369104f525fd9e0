//! Requirement/capability matching and confidence scoring.
//!
//! This module provides the matching cascade:
//!
//! - [`MatchCascade`]: main entry point; evaluates facilities and builds solutions
//! - [`HeuristicMatcher`]: rule-based label matching against the rule store
//! - [`SemanticSimilarity`]: injected similarity collaborator
//! - [`MatchScore`]: aggregate facility confidence
//!
//! ## Matching Algorithm
//!
//! Each (requirement, capability) pair is tried against increasingly
//! expensive strategies, stopping at the first that accepts:
//!
//! 1. **Direct**: normalized labels are equal (confidence 1.0)
//! 2. **Declared substitution**: the capability lists the requirement in `substitutes_for`
//! 3. **Heuristic**: the best applicable rule, accepted at or above `heuristic_threshold`
//! 4. **Semantic**: similarity of the normalized labels, accepted at or above
//!    `semantic_threshold`; bounded in concurrency and time
//!
//! ## Scoring
//!
//! A facility's confidence is the weighted share of matched requirements
//! (substitutions earn `substitution_weight`), multiplied by
//! `unmatched_required_penalty` if any non-optional requirement is unmatched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use supply_matcher::{Capability, Facility, Requirement};
//! use supply_matcher::matching::{MatchCascade, MatchingConfig};
//! use supply_matcher::rules::RuleManager;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let rules = Arc::new(RuleManager::embedded()?);
//! let cascade = MatchCascade::new(rules, MatchingConfig::default());
//!
//! let requirements = vec![Requirement::new("CNC")];
//! let facilities = vec![Facility::new("shop-1", "Machine Shop")
//!     .with_capabilities(vec![Capability::new("computer numerical control", "process")])];
//!
//! let solutions = cascade
//!     .find_solutions("bracket", &requirements, &facilities, "manufacturing")
//!     .await?;
//! for solution in solutions.into_ranked() {
//!     println!("{}: {:.2}", solution.facility_id(), solution.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod heuristic;
pub mod normalize;
pub mod scoring;
pub mod semantic;
pub mod solution;
pub mod tree_builder;

pub use engine::{
    ConfigError, FacilityEvaluation, MatchCascade, MatchError, MatchResult, MatchingConfig,
    RuleReference, SatisfactionPolicy,
};
pub use heuristic::{HeuristicMatcher, RuleMatch};
pub use scoring::{MatchScore, RequirementOutcome, ScoringWeights};
pub use semantic::{FnSimilarity, SemanticError, SemanticSimilarity, TokenOverlapSimilarity};
pub use solution::{DuplicatePolicy, SolutionMetrics, SolutionSet, SupplyTreeSolution};
