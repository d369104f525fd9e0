use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::core::types::ConfidenceBand;
use crate::matching::engine::FacilityEvaluation;
use crate::supply_tree::SupplyTree;

/// Which instance survives when two solutions share a facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The first inserted instance wins
    #[default]
    KeepFirst,
    /// The higher-scoring instance wins; ties keep the first
    KeepHighestScore,
}

/// Counts describing how a solution was reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionMetrics {
    /// Facilities considered in the request
    pub facility_count: usize,
    pub requirement_count: usize,
    /// Capabilities of the matched facility
    pub capability_count: usize,
    pub matched_requirement_count: usize,
    pub substitution_count: usize,
    pub semantic_degraded: bool,
}

impl SolutionMetrics {
    #[must_use]
    pub fn new(facility_count: usize, capability_count: usize, evaluation: &FacilityEvaluation) -> Self {
        Self {
            facility_count,
            requirement_count: evaluation.score.requirement_count,
            capability_count,
            matched_requirement_count: evaluation.score.matched_count,
            substitution_count: evaluation.score.substitution_count,
            semantic_degraded: evaluation.semantic_degraded,
        }
    }
}

/// A supply tree with its score.
///
/// Equality and hashing use the matched facility's identity only, so two
/// solutions for the same facility are the same element of a set whatever
/// their scores or trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyTreeSolution {
    pub tree: SupplyTree,
    pub score: f64,
    pub metrics: SolutionMetrics,
}

impl SupplyTreeSolution {
    pub fn new(tree: SupplyTree, score: f64, metrics: SolutionMetrics) -> Self {
        Self { tree, score, metrics }
    }

    /// Facility identity; trees without a match summary fall back to their own id
    #[must_use]
    pub fn facility_id(&self) -> &str {
        self.tree.facility_id().unwrap_or(&self.tree.id)
    }

    #[must_use]
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.score)
    }
}

impl PartialEq for SupplyTreeSolution {
    fn eq(&self, other: &Self) -> bool {
        self.facility_id() == other.facility_id()
    }
}

impl Eq for SupplyTreeSolution {}

impl Hash for SupplyTreeSolution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.facility_id().hash(state);
    }
}

/// Solutions de-duplicated by facility identity, in insertion order
#[derive(Debug, Clone, Default)]
pub struct SolutionSet {
    policy: DuplicatePolicy,
    solutions: Vec<SupplyTreeSolution>,
    by_facility: HashMap<String, usize>,
}

impl SolutionSet {
    #[must_use]
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            solutions: Vec::new(),
            by_facility: HashMap::new(),
        }
    }

    /// Insert a solution; returns true if it is now the set's element for its facility
    pub fn insert(&mut self, solution: SupplyTreeSolution) -> bool {
        let facility_id = solution.facility_id().to_string();
        match self.by_facility.get(&facility_id) {
            None => {
                self.by_facility.insert(facility_id, self.solutions.len());
                self.solutions.push(solution);
                true
            }
            Some(&idx) => {
                let replace = self.policy == DuplicatePolicy::KeepHighestScore
                    && solution.score > self.solutions[idx].score;
                if replace {
                    tracing::debug!(
                        "Replacing solution for '{}' ({:.2} -> {:.2})",
                        facility_id,
                        self.solutions[idx].score,
                        solution.score
                    );
                    self.solutions[idx] = solution;
                } else {
                    tracing::debug!("Dropping duplicate solution for '{}'", facility_id);
                }
                replace
            }
        }
    }

    #[must_use]
    pub fn get(&self, facility_id: &str) -> Option<&SupplyTreeSolution> {
        self.by_facility.get(facility_id).map(|&i| &self.solutions[i])
    }

    #[must_use]
    pub fn contains(&self, facility_id: &str) -> bool {
        self.by_facility.contains_key(facility_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupplyTreeSolution> {
        self.solutions.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    /// Highest score first; equal scores by facility id
    #[must_use]
    pub fn into_ranked(self) -> Vec<SupplyTreeSolution> {
        let mut solutions = self.solutions;
        solutions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.facility_id().cmp(b.facility_id()))
        });
        solutions
    }
}

impl Extend<SupplyTreeSolution> for SolutionSet {
    fn extend<T: IntoIterator<Item = SupplyTreeSolution>>(&mut self, iter: T) {
        for solution in iter {
            self.insert(solution);
        }
    }
}

impl IntoIterator for SolutionSet {
    type Item = SupplyTreeSolution;
    type IntoIter = std::vec::IntoIter<SupplyTreeSolution>;

    fn into_iter(self) -> Self::IntoIter {
        self.solutions.into_iter()
    }
}
