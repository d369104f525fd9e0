use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::core::types::{Capability, Facility, Requirement};
use crate::matching::{MatchCascade, MatchResult};
use crate::rules::RuleStore;
use crate::supply_tree::SupplyTree;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("No matching module registered under '{0}'")]
    UnknownModule(String),

    #[error("Invalid settings for module '{key}': {reason}")]
    InvalidSettings { key: String, reason: String },

    #[error("Module '{key}' failed: {reason}")]
    Failed { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: MatchStatus, to: MatchStatus },
}

/// Lifecycle of one orchestrated match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    #[default]
    Pending,
    InProgress,
    PartiallyMatched,
    FullyMatched,
    NoMatch,
    Error,
}

impl MatchStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    /// Pending → InProgress | Error; InProgress → any terminal state
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::InProgress | Self::Error),
            Self::InProgress => next.is_terminal(),
            _ => false,
        }
    }

    /// # Errors
    ///
    /// Returns an error if `next` is not reachable from the current state.
    pub fn advance(&mut self, next: Self) -> Result<(), OrchestratorError> {
        if !self.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// Converts normalized inputs into a domain's native types
pub trait DomainAdapter: Send + Sync + 'static {
    type Manifest: Send + Sync;
    type Facility: Send + Sync;

    fn domain(&self) -> &str;

    fn to_manifest(&self, manifest_id: &str, requirements: &[Requirement]) -> Self::Manifest;

    fn to_facility(&self, facility: &Facility) -> Self::Facility;

    /// Module line-up used when no configuration is supplied
    fn default_modules(&self) -> Vec<ModuleSettings>;
}

/// A tree a module produced for one facility
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub tree: SupplyTree,
    pub confidence: f64,
}

/// Shared state handed to every module call of one match
pub struct ModuleContext {
    pub cascade: Arc<MatchCascade>,
    pub store: Arc<RuleStore>,
    pub domain: String,
}

impl ModuleContext {
    pub fn new(cascade: Arc<MatchCascade>, domain: impl Into<String>) -> Self {
        let store = cascade.heuristic().rules().snapshot();
        Self {
            cascade,
            store,
            domain: domain.into(),
        }
    }

    /// Direct, declared-substitution or heuristic match of two labels
    #[must_use]
    pub fn labels_match(&self, requirement: &str, capability: &Capability) -> Option<MatchResult> {
        self.cascade.match_static(
            &self.store,
            &Requirement::new(requirement),
            capability,
            &self.domain,
        )
    }

    /// Strongest static match for `requirement` among `candidates`; ties go to
    /// the earliest candidate
    pub fn best_match<'a>(
        &self,
        requirement: &str,
        candidates: impl IntoIterator<Item = (usize, &'a Capability)>,
    ) -> Option<(usize, &'a Capability, MatchResult)> {
        candidates
            .into_iter()
            .filter_map(|(i, capability)| {
                self.labels_match(requirement, capability)
                    .map(|result| (i, capability, result))
            })
            .max_by(|a, b| {
                a.2.confidence
                    .total_cmp(&b.2.confidence)
                    .then_with(|| b.0.cmp(&a.0))
            })
    }
}

/// A domain-specific matching strategy
#[async_trait]
pub trait MatchingModule<A: DomainAdapter>: Send + Sync {
    fn key(&self) -> &str;

    /// Try to build a supply tree for `facility`; `Ok(None)` means this
    /// module has nothing to offer for it
    async fn match_facility(
        &self,
        manifest: &A::Manifest,
        facility: &A::Facility,
        context: &ModuleContext,
    ) -> Result<Option<ModuleOutcome>, ModuleError>;
}

/// Configuration of one module slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    pub key: String,
    /// Lower runs first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl ModuleSettings {
    pub fn new(key: impl Into<String>, priority: i32) -> Self {
        Self {
            key: key.into(),
            priority,
            enabled: true,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Boolean option, `default` when absent
    ///
    /// # Errors
    ///
    /// Returns an error if the option is present but not a boolean.
    pub fn bool_option(&self, name: &str, default: bool) -> Result<bool, ModuleError> {
        match self.options.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.invalid(name, other)),
        }
    }

    /// Numeric option in `[0, 1]`, `default` when absent
    ///
    /// # Errors
    ///
    /// Returns an error if the option is present but not a number in range.
    pub fn fraction_option(&self, name: &str, default: f64) -> Result<f64, ModuleError> {
        match self.options.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|f| (0.0..=1.0).contains(f))
                .ok_or_else(|| self.invalid(name, value)),
        }
    }

    fn invalid(&self, name: &str, value: &Value) -> ModuleError {
        ModuleError::InvalidSettings {
            key: self.key.clone(),
            reason: format!("option '{name}' has unexpected value {value}"),
        }
    }
}

/// Module line-up for one domain orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub modules: Vec<ModuleSettings>,
}

type ModuleFactory<A> =
    Box<dyn Fn(&ModuleSettings) -> Result<Box<dyn MatchingModule<A>>, ModuleError> + Send + Sync>;

/// Configuration key → module constructor, resolved at start-up
pub struct ModuleRegistry<A: DomainAdapter> {
    factories: HashMap<String, ModuleFactory<A>>,
}

impl<A: DomainAdapter> Default for ModuleRegistry<A> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<A: DomainAdapter> ModuleRegistry<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleSettings) -> Result<Box<dyn MatchingModule<A>>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
    }

    /// # Errors
    ///
    /// Returns an error if no factory is registered under the key or the
    /// factory rejects the settings.
    pub fn create(&self, settings: &ModuleSettings) -> Result<Box<dyn MatchingModule<A>>, ModuleError> {
        let factory = self
            .factories
            .get(&settings.key)
            .ok_or_else(|| ModuleError::UnknownModule(settings.key.clone()))?;
        factory(settings)
    }

    #[must_use]
    pub fn keys(&self) -> BTreeSet<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Where a tree came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum TreeSource {
    Module(String),
    Cascade,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratedTree {
    pub facility_id: String,
    pub source: TreeSource,
    pub confidence: f64,
    pub tree: SupplyTree,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOutcome {
    pub status: MatchStatus,
    pub trees: Vec<OrchestratedTree>,
    /// Whether the base cascade had to step in
    pub used_fallback: bool,
    /// Non-fatal problems met along the way
    pub errors: Vec<String>,
}

impl OrchestrationOutcome {
    fn failed(message: String) -> Self {
        Self {
            status: MatchStatus::Error,
            trees: Vec::new(),
            used_fallback: false,
            errors: vec![message],
        }
    }
}

/// Object-safe face of a domain orchestrator, as stored in the domain registry
#[async_trait]
pub trait Orchestrate: Send + Sync {
    fn domain(&self) -> &str;

    async fn orchestrate(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
    ) -> OrchestrationOutcome;
}

/// Runs a domain's matching modules, falling back to the base cascade
pub struct DomainOrchestrator<A: DomainAdapter> {
    adapter: A,
    registry: ModuleRegistry<A>,
    config: OrchestratorConfig,
    cascade: Arc<MatchCascade>,
    modules: Vec<Box<dyn MatchingModule<A>>>,
    initialized: bool,
}

impl<A: DomainAdapter> DomainOrchestrator<A> {
    /// Orchestrator with the adapter's default module line-up
    pub fn new(adapter: A, registry: ModuleRegistry<A>, cascade: Arc<MatchCascade>) -> Self {
        let config = OrchestratorConfig {
            modules: adapter.default_modules(),
        };
        Self::with_config(adapter, registry, cascade, config)
    }

    pub fn with_config(
        adapter: A,
        registry: ModuleRegistry<A>,
        cascade: Arc<MatchCascade>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            adapter,
            registry,
            config,
            cascade,
            modules: Vec::new(),
            initialized: false,
        }
    }

    /// Instantiate enabled modules in priority order; modules that fail to
    /// instantiate are logged and left out. Returns the number instantiated.
    pub fn initialize(&mut self) -> usize {
        if self.initialized {
            return self.modules.len();
        }

        let mut settings: Vec<&ModuleSettings> =
            self.config.modules.iter().filter(|m| m.enabled).collect();
        settings.sort_by_key(|m| m.priority);

        for module_settings in settings {
            match self.registry.create(module_settings) {
                Ok(module) => {
                    tracing::debug!(
                        "Initialized module '{}' for {}",
                        module_settings.key,
                        self.adapter.domain()
                    );
                    self.modules.push(module);
                }
                Err(e) => {
                    tracing::warn!("Skipping module '{}': {}", module_settings.key, e);
                }
            }
        }

        self.initialized = true;
        self.modules.len()
    }

    /// Keys of the instantiated modules, in run order
    #[must_use]
    pub fn module_keys(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.key()).collect()
    }

    /// Match normalized inputs.
    ///
    /// Facilities are evaluated concurrently (up to the cascade's
    /// `max_concurrency`), each against every module in priority order. A
    /// module that errors is excluded from facilities that have not reached it
    /// yet. If no module produced any tree, the base cascade runs once per
    /// facility instead. Trees are reported in facility input order.
    pub async fn run(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
    ) -> OrchestrationOutcome {
        let domain = self.adapter.domain();
        let mut status = MatchStatus::Pending;

        if requirements.is_empty() {
            return OrchestrationOutcome::failed("No requirements to match".to_string());
        }
        if facilities.iter().all(|f| f.capabilities.is_empty()) {
            return OrchestrationOutcome::failed("No capabilities to match against".to_string());
        }
        if let Err(outcome) = transition(&mut status, MatchStatus::InProgress) {
            return outcome;
        }

        let manifest = self.adapter.to_manifest(manifest_id, requirements);
        let context = ModuleContext::new(Arc::clone(&self.cascade), domain);
        let concurrency = self.cascade.config().concurrency();
        let excluded: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

        let mut per_facility: Vec<(usize, Vec<OrchestratedTree>, Vec<String>)> =
            stream::iter(
                facilities
                    .iter()
                    .enumerate()
                    .map(|(index, facility)| {
                        let (manifest, context, excluded) = (&manifest, &context, &excluded);
                        async move {
                            let (trees, errors) =
                                self.run_modules(manifest, facility, context, excluded).await;
                            (index, trees, errors)
                        }
                    })
                    .collect::<Vec<_>>(),
            )
                .buffer_unordered(concurrency)
                .collect()
                .await;
        per_facility.sort_by_key(|(index, _, _)| *index);

        let mut trees = Vec::new();
        let mut errors = Vec::new();
        for (_, facility_trees, facility_errors) in per_facility {
            trees.extend(facility_trees);
            errors.extend(facility_errors);
        }

        let used_fallback = trees.is_empty();
        if used_fallback {
            tracing::debug!("No module produced a tree for {}; using the base cascade", manifest_id);
            let mut results: Vec<_> = stream::iter(
                facilities
                    .iter()
                    .enumerate()
                    .map(|(index, facility)| async move {
                        let solutions = self
                            .cascade
                            .find_solutions(manifest_id, requirements, std::slice::from_ref(facility), domain)
                            .await;
                        (index, facility, solutions)
                    })
                    .collect::<Vec<_>>(),
            )
                .buffer_unordered(concurrency)
                .collect()
                .await;
            results.sort_by_key(|(index, _, _)| *index);

            for (_, facility, solutions) in results {
                match solutions {
                    Ok(solutions) => trees.extend(solutions.into_iter().map(|s| OrchestratedTree {
                        facility_id: facility.id.clone(),
                        source: TreeSource::Cascade,
                        confidence: s.score,
                        tree: s.tree,
                    })),
                    Err(e) => {
                        tracing::warn!("Cascade failed for facility '{}': {}", facility.id, e);
                        errors.push(e.to_string());
                    }
                }
            }
        }

        let inputs: HashSet<&str> = facilities.iter().map(|f| f.id.as_str()).collect();
        let produced: HashSet<&str> = trees.iter().map(|t| t.facility_id.as_str()).collect();
        let final_status = if produced.is_empty() {
            MatchStatus::NoMatch
        } else if produced.len() == inputs.len() {
            MatchStatus::FullyMatched
        } else {
            MatchStatus::PartiallyMatched
        };
        if let Err(outcome) = transition(&mut status, final_status) {
            return outcome;
        }

        tracing::info!(
            "{}: {} trees for {}/{} facilities ({:?})",
            domain,
            trees.len(),
            produced.len(),
            inputs.len(),
            status
        );

        OrchestrationOutcome {
            status,
            trees,
            used_fallback,
            errors,
        }
    }

    /// Every module that is still in play, against one facility
    async fn run_modules(
        &self,
        manifest: &A::Manifest,
        facility: &Facility,
        context: &ModuleContext,
        excluded: &Mutex<HashSet<String>>,
    ) -> (Vec<OrchestratedTree>, Vec<String>) {
        let native = self.adapter.to_facility(facility);
        let mut trees = Vec::new();
        let mut errors = Vec::new();

        for module in &self.modules {
            let skip = lock(excluded).contains(module.key());
            if skip {
                continue;
            }
            match module.match_facility(manifest, &native, context).await {
                Ok(Some(outcome)) => trees.push(OrchestratedTree {
                    facility_id: facility.id.clone(),
                    source: TreeSource::Module(module.key().to_string()),
                    confidence: outcome.confidence,
                    tree: outcome.tree,
                }),
                Ok(None) => {}
                Err(e) => {
                    // Concurrent facilities may hit the same failure; report it once
                    let first = lock(excluded).insert(module.key().to_string());
                    if first {
                        tracing::warn!("Module '{}' excluded from this run: {}", module.key(), e);
                        errors.push(e.to_string());
                    }
                }
            }
        }

        (trees, errors)
    }
}

fn lock(excluded: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match excluded.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Advance `status`, or turn a rejected transition into an error outcome
fn transition(status: &mut MatchStatus, next: MatchStatus) -> Result<(), OrchestrationOutcome> {
    status.advance(next).map_err(|e| {
        tracing::error!("{}", e);
        OrchestrationOutcome::failed(e.to_string())
    })
}

#[async_trait]
impl<A: DomainAdapter> Orchestrate for DomainOrchestrator<A> {
    fn domain(&self) -> &str {
        self.adapter.domain()
    }

    async fn orchestrate(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
    ) -> OrchestrationOutcome {
        self.run(manifest_id, requirements, facilities).await
    }
}
