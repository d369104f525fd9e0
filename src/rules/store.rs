use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::matching::normalize::normalize_term;
use crate::rules::rule::{HeuristicRule, HeuristicRuleSet, RuleType};

/// Immutable, domain-partitioned collection of heuristic rules with lookup indexes.
///
/// A store is never modified after construction; updates build a new store and
/// swap it in (see [`crate::rules::RuleManager`]).
#[derive(Debug, Clone)]
pub struct RuleStore {
    /// Rule sets keyed by domain
    sets: BTreeMap<String, HeuristicRuleSet>,

    /// Index: domain -> normalized term (key or value) -> ids of rules mentioning it
    term_index: HashMap<String, HashMap<String, BTreeSet<String>>>,

    /// When this store was built
    pub loaded_at: DateTime<Utc>,
}

impl RuleStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: BTreeMap::new(),
            term_index: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Build a store from complete rule sets; a later set for the same domain replaces an earlier one
    pub fn from_sets<I: IntoIterator<Item = HeuristicRuleSet>>(sets: I) -> Self {
        let mut store = Self::new();
        for set in sets {
            store.index_set(&set);
            store.sets.insert(set.domain.clone(), set);
        }
        store
    }

    fn index_set(&mut self, set: &HeuristicRuleSet) {
        let domain_index = self.term_index.entry(set.domain.clone()).or_default();
        domain_index.clear();

        for rule in set.rules() {
            for term in std::iter::once(&rule.key).chain(rule.values.iter()) {
                domain_index
                    .entry(normalize_term(term))
                    .or_default()
                    .insert(rule.id.clone());
            }
        }
    }

    /// Copy of this store with one domain's set replaced (or added)
    #[must_use]
    pub fn with_set(&self, set: HeuristicRuleSet) -> Self {
        let mut sets: Vec<HeuristicRuleSet> = self
            .sets
            .values()
            .filter(|s| s.domain != set.domain)
            .cloned()
            .collect();
        sets.push(set);
        Self::from_sets(sets)
    }

    #[must_use]
    pub fn rule_set(&self, domain: &str) -> Option<&HeuristicRuleSet> {
        self.sets.get(domain)
    }

    #[must_use]
    pub fn rule(&self, domain: &str, id: &str) -> Option<&HeuristicRule> {
        self.sets.get(domain).and_then(|set| set.get(id))
    }

    #[must_use]
    pub fn rules_by_type(&self, domain: &str, rule_type: RuleType) -> Vec<&HeuristicRule> {
        self.sets
            .get(domain)
            .map(|set| set.rules_by_type(rule_type).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn rules_by_tag<'a>(&'a self, domain: &str, tag: &'a str) -> Vec<&'a HeuristicRule> {
        self.sets
            .get(domain)
            .map(|set| set.rules_by_tag(tag).collect())
            .unwrap_or_default()
    }

    /// Domains with a rule set, in sorted order
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    /// Rules in `domain` that mention both normalized terms, ordered by rule id.
    ///
    /// Any rule that can apply to a pair must mention both of its terms,
    /// so this is the complete candidate list for the applicability test.
    #[must_use]
    pub fn candidate_rules(&self, domain: &str, term1: &str, term2: &str) -> Vec<&HeuristicRule> {
        let Some(index) = self.term_index.get(domain) else {
            return Vec::new();
        };
        let (Some(first), Some(second)) = (index.get(term1), index.get(term2)) else {
            return Vec::new();
        };

        first
            .intersection(second)
            .filter_map(|id| self.rule(domain, id))
            .collect()
    }

    /// Number of domains in the store
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[must_use]
    pub fn total_rules(&self) -> usize {
        self.sets.values().map(HeuristicRuleSet::len).sum()
    }

    /// Same domains with the same rule content (timestamps ignored)
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.sets.len() == other.sets.len()
            && self
                .sets
                .iter()
                .all(|(domain, set)| other.sets.get(domain).is_some_and(|o| set.same_content(o)))
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
