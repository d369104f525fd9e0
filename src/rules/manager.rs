use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::task::JoinSet;

use crate::rules::rule::{HeuristicRule, HeuristicRuleSet, RuleError, RuleType};
use crate::rules::store::RuleStore;

/// Rule sets compiled into the binary (validated by build.rs)
const EMBEDDED_RULE_SETS: [(&str, &str); 2] = [
    (
        "manufacturing.yaml",
        include_str!("../../rules/manufacturing.yaml"),
    ),
    ("cooking.yaml", include_str!("../../rules/cooking.yaml")),
];

/// Output format for exported rule sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSetFormat {
    Yaml,
    Json,
}

impl RuleSetFormat {
    /// Pick the format from a file extension (`yaml`, `yml`, `json`)
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Some(Self::Yaml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }

    fn parse(self, text: &str) -> Result<HeuristicRuleSet, RuleError> {
        match self {
            Self::Yaml => HeuristicRuleSet::from_yaml(text),
            Self::Json => HeuristicRuleSet::from_json(text),
        }
    }
}

/// Outcome of loading a rules directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Domains that were loaded, in sorted order
    pub loaded: Vec<String>,
    /// Files that were skipped and why
    pub failures: Vec<(PathBuf, RuleError)>,
}

impl LoadReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the rule store and its lifecycle.
///
/// Readers take a snapshot (`Arc<RuleStore>`) and keep using it for the rest
/// of their work; `reload` and the admin updates build a complete new store
/// and swap it in, so a reader never sees a partially rebuilt store.
#[derive(Debug)]
pub struct RuleManager {
    rules_dir: Option<PathBuf>,
    store: RwLock<Arc<RuleStore>>,
    initialized: AtomicBool,
}

impl RuleManager {
    /// Manager that loads rule sets from `rules_dir` on [`initialize`](Self::initialize)
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: Some(rules_dir.into()),
            store: RwLock::new(Arc::new(RuleStore::new())),
            initialized: AtomicBool::new(false),
        }
    }

    /// Manager over an already-built store (no backing directory)
    #[must_use]
    pub fn from_store(store: RuleStore) -> Self {
        Self {
            rules_dir: None,
            store: RwLock::new(Arc::new(store)),
            initialized: AtomicBool::new(true),
        }
    }

    /// Manager over the rule sets compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded rule set does not parse.
    pub fn embedded() -> Result<Self, RuleError> {
        let sets = EMBEDDED_RULE_SETS
            .iter()
            .map(|(_, text)| HeuristicRuleSet::from_yaml(text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_store(RuleStore::from_sets(sets)))
    }

    #[must_use]
    pub fn rules_dir(&self) -> Option<&Path> {
        self.rules_dir.as_deref()
    }

    /// Current store snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleStore> {
        match self.store.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, store: RuleStore) {
        let store = Arc::new(store);
        match self.store.write() {
            Ok(mut guard) => *guard = store,
            Err(poisoned) => *poisoned.into_inner() = store,
        }
    }

    /// Load the rules directory once; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules directory does not exist. Individual
    /// malformed files are reported in the [`LoadReport`], not as errors.
    pub async fn initialize(&self) -> Result<LoadReport, RuleError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(LoadReport {
                loaded: self.snapshot().domains(),
                failures: Vec::new(),
            });
        }
        let report = self.reload().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(report)
    }

    /// Rebuild the store from the rules directory and swap it in atomically.
    ///
    /// Managers without a backing directory keep their current store.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules directory does not exist; the current
    /// store stays in place.
    pub async fn reload(&self) -> Result<LoadReport, RuleError> {
        let Some(dir) = self.rules_dir.clone() else {
            return Ok(LoadReport {
                loaded: self.snapshot().domains(),
                failures: Vec::new(),
            });
        };

        let (store, report) = load_directory(&dir).await?;
        tracing::info!(
            "Loaded {} rules across {} domains from {}",
            store.total_rules(),
            store.len(),
            dir.display()
        );
        self.swap(store);
        Ok(report)
    }

    /// Add or replace a rule in its domain's set (creating the set if needed)
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be added to its domain's set.
    pub fn add_rule(&self, rule: HeuristicRule) -> Result<Option<HeuristicRule>, RuleError> {
        let current = self.snapshot();
        let mut set = current
            .rule_set(&rule.domain)
            .cloned()
            .unwrap_or_else(|| HeuristicRuleSet::new(rule.domain.clone(), "1.0.0"));
        let replaced = set.add_rule(rule)?;
        self.swap(current.with_set(set));
        Ok(replaced)
    }

    /// Remove a rule from a domain's set
    ///
    /// # Errors
    ///
    /// Returns an error if the domain has no rule set.
    pub fn remove_rule(&self, domain: &str, id: &str) -> Result<Option<HeuristicRule>, RuleError> {
        let current = self.snapshot();
        let mut set = current
            .rule_set(domain)
            .cloned()
            .ok_or_else(|| RuleError::UnknownDomain(domain.to_string()))?;
        let removed = set.remove_rule(id);
        if removed.is_some() {
            self.swap(current.with_set(set));
        }
        Ok(removed)
    }

    #[must_use]
    pub fn get_rule_set(&self, domain: &str) -> Option<HeuristicRuleSet> {
        self.snapshot().rule_set(domain).cloned()
    }

    #[must_use]
    pub fn get_rule(&self, domain: &str, id: &str) -> Option<HeuristicRule> {
        self.snapshot().rule(domain, id).cloned()
    }

    #[must_use]
    pub fn get_rules_by_type(&self, domain: &str, rule_type: RuleType) -> Vec<HeuristicRule> {
        self.snapshot()
            .rules_by_type(domain, rule_type)
            .into_iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_rules_by_tag(&self, domain: &str, tag: &str) -> Vec<HeuristicRule> {
        self.snapshot()
            .rules_by_tag(domain, tag)
            .into_iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn list_domains(&self) -> Vec<String> {
        self.snapshot().domains()
    }

    /// Render a domain's rule set in the rule set file format
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is unknown or serialization fails.
    pub fn export(&self, domain: &str, format: RuleSetFormat) -> Result<String, RuleError> {
        let store = self.snapshot();
        let set = store
            .rule_set(domain)
            .ok_or_else(|| RuleError::UnknownDomain(domain.to_string()))?;
        match format {
            RuleSetFormat::Yaml => set.to_yaml(),
            RuleSetFormat::Json => set.to_json(),
        }
    }
}

/// Read every rule set file in `dir` concurrently and build a store.
///
/// One file per domain; a second file for an already-loaded domain is
/// reported as a failure. Files are processed in path order so the outcome
/// does not depend on task completion order.
async fn load_directory(dir: &Path) -> Result<(RuleStore, LoadReport), RuleError> {
    if !dir.is_dir() {
        return Err(RuleError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && RuleSetFormat::from_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut tasks = JoinSet::new();
    for (order, path) in paths.into_iter().enumerate() {
        tasks.spawn(async move {
            let result = load_file(&path).await;
            (order, path, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => return Err(RuleError::TaskFailed(e.to_string())),
        }
    }
    results.sort_by_key(|(order, _, _)| *order);

    let mut report = LoadReport::default();
    let mut seen = BTreeSet::new();
    let mut sets = Vec::new();

    for (_, path, result) in results {
        match result {
            Ok(set) if !seen.insert(set.domain.clone()) => {
                tracing::warn!(
                    "Skipping {}: domain '{}' already loaded",
                    path.display(),
                    set.domain
                );
                report.failures.push((
                    path.clone(),
                    RuleError::DuplicateDomain {
                        domain: set.domain,
                        path,
                    },
                ));
            }
            Ok(set) => {
                tracing::debug!(
                    "Loaded {} rules for domain '{}' from {}",
                    set.len(),
                    set.domain,
                    path.display()
                );
                sets.push(set);
            }
            Err(e) => {
                tracing::warn!("Skipping rule set {}: {}", path.display(), e);
                report.failures.push((path, e));
            }
        }
    }

    report.loaded = seen.into_iter().collect();
    Ok((RuleStore::from_sets(sets), report))
}

async fn load_file(path: &Path) -> Result<HeuristicRuleSet, RuleError> {
    let format = RuleSetFormat::from_path(path)
        .ok_or_else(|| RuleError::UnsupportedFormat(path.to_path_buf()))?;
    let text = tokio::fs::read_to_string(path).await?;
    format.parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::RuleDirection;

    #[test]
    fn test_embedded_rule_sets_load() {
        let manager = RuleManager::embedded().unwrap();
        let domains = manager.list_domains();
        assert!(domains.contains(&"manufacturing".to_string()));
        assert!(domains.contains(&"cooking".to_string()));
        assert!(manager
            .get_rules_by_type("manufacturing", RuleType::Abbreviation)
            .iter()
            .any(|r| r.key == "cnc"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            RuleSetFormat::from_path(Path::new("a/b.YML")),
            Some(RuleSetFormat::Yaml)
        );
        assert_eq!(
            RuleSetFormat::from_path(Path::new("b.json")),
            Some(RuleSetFormat::Json)
        );
        assert_eq!(RuleSetFormat::from_path(Path::new("README.md")), None);
    }

    #[test]
    fn test_add_rule_is_copy_on_write() {
        let manager = RuleManager::embedded().unwrap();
        let before = manager.snapshot();

        let rule = HeuristicRule::new(
            "smd_abbrev",
            RuleType::Abbreviation,
            "smd",
            vec!["surface mount device".to_string()],
            RuleDirection::Bidirectional,
            0.9,
            "manufacturing",
        )
        .unwrap();
        manager.add_rule(rule).unwrap();

        assert!(before.rule("manufacturing", "smd_abbrev").is_none());
        assert!(manager.get_rule("manufacturing", "smd_abbrev").is_some());

        let removed = manager.remove_rule("manufacturing", "smd_abbrev").unwrap();
        assert!(removed.is_some());
        assert!(manager.get_rule("manufacturing", "smd_abbrev").is_none());
    }

    #[test]
    fn test_remove_rule_unknown_domain() {
        let manager = RuleManager::from_store(RuleStore::new());
        assert!(matches!(
            manager.remove_rule("nope", "x"),
            Err(RuleError::UnknownDomain(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_without_directory_keeps_store() {
        let manager = RuleManager::embedded().unwrap();
        let report = manager.reload().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.loaded, manager.list_domains());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let manager = RuleManager::new("/definitely/not/a/rules/dir");
        assert!(matches!(
            manager.initialize().await,
            Err(RuleError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_export_unknown_domain() {
        let manager = RuleManager::embedded().unwrap();
        assert!(manager.export("astronomy", RuleSetFormat::Yaml).is_err());
        let yaml = manager.export("cooking", RuleSetFormat::Yaml).unwrap();
        assert!(yaml.contains("domain: cooking"));
    }
}
