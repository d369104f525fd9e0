use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::core::types::{Capability, Facility, Requirement};
use crate::domain::orchestrator::Orchestrate;
use crate::domain::DomainError;
use crate::matching::{MatchCascade, SolutionSet};
use crate::supply_tree::{SupplyTree, TreeValidation};

/// Floor applied to a keyword score when at least one keyword hit
const KEYWORD_FLOOR: f64 = 0.1;
const EXPLICIT_CONFIDENCE: f64 = 1.0;
const TYPE_MAPPING_CONFIDENCE: f64 = 0.9;
const SINGLE_DOMAIN_CONFIDENCE: f64 = 0.5;

/// Turns raw domain documents into normalized requirements and capabilities
pub trait Extractor: Send + Sync {
    fn domain(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the document does not hold requirements in the
    /// expected shape.
    fn extract_requirements(&self, document: &Value) -> Result<Vec<Requirement>, DomainError>;

    /// # Errors
    ///
    /// Returns an error if the document does not hold facilities in the
    /// expected shape.
    fn extract_facilities(&self, document: &Value) -> Result<Vec<Facility>, DomainError>;
}

/// Produces solutions for normalized inputs of one domain
#[async_trait]
pub trait DomainMatcher: Send + Sync {
    fn domain(&self) -> &str;

    async fn find_solutions(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
    ) -> Result<SolutionSet, DomainError>;
}

/// Checks supply trees produced for one domain
pub trait Validator: Send + Sync {
    fn domain(&self) -> &str;

    fn validate(&self, tree: &SupplyTree) -> TreeValidation;
}

/// Descriptive data for a registered domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMetadata {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Input document types that belong to this domain (e.g. "okh", "recipe")
    #[serde(default)]
    pub input_types: Vec<String>,
    /// Words whose presence suggests this domain
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_enabled() -> bool {
    true
}

impl DomainMetadata {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            version: default_version(),
            input_types: Vec::new(),
            keywords: Vec::new(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_input_types<I, S>(mut self, input_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_types = input_types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// The components registered for one domain
#[derive(Clone)]
pub struct DomainServices {
    pub metadata: DomainMetadata,
    pub extractor: Arc<dyn Extractor>,
    pub matcher: Arc<dyn DomainMatcher>,
    pub validator: Arc<dyn Validator>,
    pub orchestrator: Option<Arc<dyn Orchestrate>>,
}

impl std::fmt::Debug for DomainServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainServices")
            .field("metadata", &self.metadata)
            .field("orchestrator", &self.orchestrator.is_some())
            .finish_non_exhaustive()
    }
}

/// How a domain was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Explicit,
    TypeMapping,
    Keywords,
    SingleDomain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDetection {
    pub domain: String,
    pub confidence: f64,
    pub method: DetectionMethod,
    /// Other candidate domains with their scores, best first
    #[serde(default)]
    pub alternatives: Vec<(String, f64)>,
}

/// What domain detection looks at for a requirement/capability pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionSubject {
    pub requirement_domain: Option<String>,
    pub capability_domain: Option<String>,
    pub requirement_type: Option<String>,
    pub capability_type: Option<String>,
    /// Free text from both sides, used for keyword scoring
    pub text: String,
}

impl DetectionSubject {
    /// Build from a normalized pair
    #[must_use]
    pub fn from_pair(requirement: &Requirement, capability: &Capability) -> Self {
        let mut text = vec![requirement.name.clone(), capability.name.clone()];
        text.extend(requirement.required_tools.iter().cloned());
        text.extend(requirement.materials());
        if !capability.capability_type.is_empty() {
            text.push(capability.capability_type.clone());
        }
        Self {
            requirement_domain: requirement.domain.clone(),
            capability_domain: capability.domain.clone(),
            requirement_type: None,
            capability_type: None,
            text: text.join(" "),
        }
    }

    /// Build from two raw documents: reads their `domain` and `type` fields
    /// and collects every string value for keyword scoring
    #[must_use]
    pub fn from_documents(requirement: &Value, capability: &Value) -> Self {
        let field = |doc: &Value, key: &str| doc.get(key).and_then(Value::as_str).map(str::to_string);
        let mut text = Vec::new();
        collect_strings(requirement, &mut text);
        collect_strings(capability, &mut text);
        Self {
            requirement_domain: field(requirement, "domain"),
            capability_domain: field(capability, "domain"),
            requirement_type: field(requirement, "type"),
            capability_type: field(capability, "type"),
            text: text.join(" "),
        }
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[derive(Default)]
struct RegistryState {
    domains: BTreeMap<String, DomainServices>,
    /// Input type (lower-case) -> domain
    type_map: HashMap<String, String>,
}

/// Process-wide registry of domain implementations.
///
/// Registration is rare and takes the write lock; lookups clone the
/// `DomainServices` bundle (a handful of `Arc`s) out of the read lock.
#[derive(Default)]
pub struct DomainRegistry {
    state: RwLock<RegistryState>,
}

impl DomainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&RegistryState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut RegistryState) -> T) -> T {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Register a domain's components.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is already registered or a component
    /// reports a different domain than `metadata.name`.
    pub fn register_domain(
        &self,
        metadata: DomainMetadata,
        extractor: Arc<dyn Extractor>,
        matcher: Arc<dyn DomainMatcher>,
        validator: Arc<dyn Validator>,
        orchestrator: Option<Arc<dyn Orchestrate>>,
    ) -> Result<(), DomainError> {
        let name = metadata.name.clone();
        check_component(&name, "extractor", extractor.domain())?;
        check_component(&name, "matcher", matcher.domain())?;
        check_component(&name, "validator", validator.domain())?;
        if let Some(orchestrator) = &orchestrator {
            check_component(&name, "orchestrator", orchestrator.domain())?;
        }

        self.write(|state| {
            if state.domains.contains_key(&name) {
                return Err(DomainError::AlreadyRegistered(name.clone()));
            }
            for input_type in &metadata.input_types {
                state
                    .type_map
                    .insert(input_type.to_lowercase(), name.clone());
            }
            state.domains.insert(
                name.clone(),
                DomainServices {
                    metadata,
                    extractor,
                    matcher,
                    validator,
                    orchestrator,
                },
            );
            Ok(())
        })?;

        tracing::info!("Registered domain '{}'", name);
        Ok(())
    }

    /// Enable or disable a registered domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is unknown.
    pub fn set_enabled(&self, domain: &str, enabled: bool) -> Result<(), DomainError> {
        self.write(|state| {
            let services = state
                .domains
                .get_mut(domain)
                .ok_or_else(|| DomainError::UnknownDomain(domain.to_string()))?;
            services.metadata.enabled = enabled;
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns an error if the domain is unknown or disabled.
    pub fn get_domain_services(&self, domain: &str) -> Result<DomainServices, DomainError> {
        self.read(|state| match state.domains.get(domain) {
            None => Err(DomainError::UnknownDomain(domain.to_string())),
            Some(services) if !services.metadata.enabled => {
                Err(DomainError::Disabled(domain.to_string()))
            }
            Some(services) => Ok(services.clone()),
        })
    }

    /// Metadata of registered domains, sorted by name
    #[must_use]
    pub fn list_domains(&self, include_disabled: bool) -> Vec<DomainMetadata> {
        self.read(|state| {
            state
                .domains
                .values()
                .filter(|s| include_disabled || s.metadata.enabled)
                .map(|s| s.metadata.clone())
                .collect()
        })
    }

    /// Decide which domain a requirement/capability pair belongs to.
    ///
    /// Tried in order: explicit domain fields, the input-type table, keyword
    /// scoring, then the only enabled domain if there is exactly one.
    ///
    /// # Errors
    ///
    /// Returns an error if explicit domains disagree, or nothing decides.
    pub fn detect_domain(&self, subject: &DetectionSubject) -> Result<DomainDetection, DomainError> {
        if let (Some(requirement), Some(capability)) =
            (&subject.requirement_domain, &subject.capability_domain)
        {
            if requirement != capability {
                return Err(DomainError::Conflict {
                    requirement: requirement.clone(),
                    capability: capability.clone(),
                });
            }
            return Ok(DomainDetection {
                domain: requirement.clone(),
                confidence: EXPLICIT_CONFIDENCE,
                method: DetectionMethod::Explicit,
                alternatives: Vec::new(),
            });
        }

        self.read(|state| {
            let enabled: Vec<&DomainServices> = state
                .domains
                .values()
                .filter(|s| s.metadata.enabled)
                .collect();

            if let Some(domain) = type_mapping(state, subject) {
                return Ok(DomainDetection {
                    domain,
                    confidence: TYPE_MAPPING_CONFIDENCE,
                    method: DetectionMethod::TypeMapping,
                    alternatives: Vec::new(),
                });
            }

            let mut scores: Vec<(String, f64)> = enabled
                .iter()
                .map(|s| (s.metadata.name.clone(), keyword_score(&s.metadata.keywords, &subject.text)))
                .filter(|(_, score)| *score > 0.0)
                .collect();
            scores.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            if !scores.is_empty() {
                let (domain, confidence) = scores.remove(0);
                return Ok(DomainDetection {
                    domain,
                    confidence,
                    method: DetectionMethod::Keywords,
                    alternatives: scores,
                });
            }

            if let [only] = enabled.as_slice() {
                return Ok(DomainDetection {
                    domain: only.metadata.name.clone(),
                    confidence: SINGLE_DOMAIN_CONFIDENCE,
                    method: DetectionMethod::SingleDomain,
                    alternatives: Vec::new(),
                });
            }

            Err(DomainError::DetectionFailed)
        })
    }
}

fn check_component(domain: &str, component: &'static str, found: &str) -> Result<(), DomainError> {
    if found == domain {
        Ok(())
    } else {
        Err(DomainError::ComponentMismatch {
            component,
            expected: domain.to_string(),
            found: found.to_string(),
        })
    }
}

/// Domain for the subject's input types; both sides must agree when both are known
fn type_mapping(state: &RegistryState, subject: &DetectionSubject) -> Option<String> {
    let lookup = |t: &Option<String>| {
        t.as_ref()
            .and_then(|t| state.type_map.get(&t.to_lowercase()))
            .filter(|d| state.domains.get(*d).is_some_and(|s| s.metadata.enabled))
    };
    match (lookup(&subject.requirement_type), lookup(&subject.capability_type)) {
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        (Some(a), None) if subject.capability_type.is_none() => Some(a.clone()),
        (None, Some(b)) if subject.requirement_type.is_none() => Some(b.clone()),
        _ => None,
    }
}

/// Share of `keywords` found in `text`, floored at 0.1 when any hit
fn keyword_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|k| text.contains(&k.to_lowercase()))
        .count();
    if hits == 0 {
        return 0.0;
    }
    let score = crate::utils::ratio(
        crate::utils::count_to_f64(hits),
        crate::utils::count_to_f64(keywords.len()),
    );
    score.max(KEYWORD_FLOOR).min(1.0)
}

/// Extracts from JSON documents holding `requirements` / `facilities` arrays
/// (or a bare array)
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    domain: String,
}

impl JsonExtractor {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    fn items<'a>(document: &'a Value, key: &str) -> Result<&'a Value, DomainError> {
        if document.is_array() {
            return Ok(document);
        }
        document
            .get(key)
            .filter(|v| v.is_array())
            .ok_or_else(|| DomainError::Extraction(format!("expected an array or a '{key}' array")))
    }
}

impl Extractor for JsonExtractor {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn extract_requirements(&self, document: &Value) -> Result<Vec<Requirement>, DomainError> {
        let items = Self::items(document, "requirements")?;
        let mut requirements: Vec<Requirement> = serde_json::from_value(items.clone())?;
        for requirement in &mut requirements {
            requirement.domain.get_or_insert_with(|| self.domain.clone());
        }
        Ok(requirements)
    }

    fn extract_facilities(&self, document: &Value) -> Result<Vec<Facility>, DomainError> {
        let items = Self::items(document, "facilities")?;
        let mut facilities: Vec<Facility> = serde_json::from_value(items.clone())?;
        for facility in &mut facilities {
            facility.domain.get_or_insert_with(|| self.domain.clone());
        }
        Ok(facilities)
    }
}

/// [`DomainMatcher`] backed by the shared match cascade
pub struct CascadeMatcher {
    domain: String,
    cascade: Arc<MatchCascade>,
}

impl CascadeMatcher {
    pub fn new(domain: impl Into<String>, cascade: Arc<MatchCascade>) -> Self {
        Self {
            domain: domain.into(),
            cascade,
        }
    }
}

#[async_trait]
impl DomainMatcher for CascadeMatcher {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn find_solutions(
        &self,
        manifest_id: &str,
        requirements: &[Requirement],
        facilities: &[Facility],
    ) -> Result<SolutionSet, DomainError> {
        Ok(self
            .cascade
            .find_solutions(manifest_id, requirements, facilities, &self.domain)
            .await?)
    }
}

/// Structural supply-tree validation plus a domain check on the tree metadata
#[derive(Debug, Clone)]
pub struct SupplyTreeValidator {
    domain: String,
}

impl SupplyTreeValidator {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }
}

impl Validator for SupplyTreeValidator {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn validate(&self, tree: &SupplyTree) -> TreeValidation {
        let mut validation = tree.validate();
        if let Some(domain) = tree.metadata.get("domain").and_then(Value::as_str) {
            if domain != self.domain {
                validation
                    .issues
                    .push(format!("Tree belongs to domain '{domain}', not '{}'", self.domain));
            }
        }
        validation
    }
}
