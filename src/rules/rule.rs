use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule '{0}' has an empty key")]
    EmptyKey(String),

    #[error("Rule '{0}' has no values")]
    EmptyValues(String),

    #[error("Rule '{id}' has base confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { id: String, confidence: f64 },

    #[error("Rule '{0}' has an empty id")]
    EmptyId(String),

    #[error("Rule '{id}' belongs to domain '{rule_domain}', not '{set_domain}'")]
    DomainMismatch {
        id: String,
        rule_domain: String,
        set_domain: String,
    },

    #[error("Rule '{0}' does not name a domain")]
    MissingDomain(String),

    #[error("Failed to read rule set: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML rule set: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON rule set: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported rule set file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Rules directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Duplicate rule set for domain '{domain}' in {path}")]
    DuplicateDomain { domain: String, path: PathBuf },

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Rule loading task failed: {0}")]
    TaskFailed(String),
}

/// Kind of knowledge a rule encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// `cnc` stands for `computer numerical control`
    Abbreviation,
    /// Different words for the same thing
    Synonym,
    /// Interchangeable for matching purposes
    Equivalent,
    /// One can be used in place of the other
    Substitution,
    /// Spelling/formatting variants
    Normalization,
}

impl RuleType {
    /// Upper bound on the confidence a rule of this type may produce
    #[must_use]
    pub fn confidence_cap(self) -> f64 {
        match self {
            Self::Abbreviation | Self::Normalization => 0.95,
            Self::Synonym => 0.90,
            Self::Substitution => 0.85,
            Self::Equivalent => 1.0,
        }
    }

    /// Label used in transformation details
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Abbreviation => "Abbreviation expansion",
            Self::Synonym => "Synonym match",
            Self::Equivalent => "Equivalent term",
            Self::Substitution => "Substitution",
            Self::Normalization => "Normalization",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abbreviation => write!(f, "abbreviation"),
            Self::Synonym => write!(f, "synonym"),
            Self::Equivalent => write!(f, "equivalent"),
            Self::Substitution => write!(f, "substitution"),
            Self::Normalization => write!(f, "normalization"),
        }
    }
}

/// Which way a rule may be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    #[default]
    Bidirectional,
    /// key (requirement side) -> value (capability side)
    Forward,
    /// value (requirement side) -> key (capability side)
    Reverse,
}

impl RuleDirection {
    #[must_use]
    pub fn allows_forward(self) -> bool {
        matches!(self, Self::Bidirectional | Self::Forward)
    }

    #[must_use]
    pub fn allows_reverse(self) -> bool {
        matches!(self, Self::Bidirectional | Self::Reverse)
    }

    #[must_use]
    pub fn arrow(self) -> &'static str {
        match self {
            Self::Bidirectional => "↔",
            Self::Forward => "→",
            Self::Reverse => "←",
        }
    }
}

/// A single heuristic rule.
///
/// Construction enforces a non-empty id and key, at least one value and
/// `0 <= base_confidence <= 1`; a rule that exists is always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord")]
pub struct HeuristicRule {
    pub id: String,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    pub key: String,

    pub values: Vec<String>,

    pub direction: RuleDirection,

    pub base_confidence: f64,

    pub domain: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Where the rule came from (a standard, a person, an import)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl HeuristicRule {
    /// Create a validated rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or key is empty, `values` is empty (or contains
    /// only blank strings), or `base_confidence` is outside `[0, 1]`.
    pub fn new(
        id: impl Into<String>,
        rule_type: RuleType,
        key: impl Into<String>,
        values: Vec<String>,
        direction: RuleDirection,
        base_confidence: f64,
        domain: impl Into<String>,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let key = key.into();

        if id.trim().is_empty() {
            return Err(RuleError::EmptyId(key));
        }
        if key.trim().is_empty() {
            return Err(RuleError::EmptyKey(id));
        }
        if values.iter().all(|v| v.trim().is_empty()) {
            return Err(RuleError::EmptyValues(id));
        }
        if !(0.0..=1.0).contains(&base_confidence) {
            return Err(RuleError::ConfidenceOutOfRange {
                id,
                confidence: base_confidence,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id,
            rule_type,
            key,
            values,
            direction,
            base_confidence,
            domain: domain.into(),
            description: String::new(),
            source: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// On-disk shape of a rule; id and domain may be inherited from the enclosing set
#[derive(Debug, Clone, Deserialize)]
pub struct RuleRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub direction: RuleDirection,
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_base_confidence() -> f64 {
    0.8
}

impl RuleRecord {
    /// Validate this record into a rule, filling in id/domain from the enclosing set
    ///
    /// # Errors
    ///
    /// Returns an error if no domain is available or the rule is malformed.
    pub fn into_rule(
        self,
        fallback_id: Option<&str>,
        fallback_domain: Option<&str>,
    ) -> Result<HeuristicRule, RuleError> {
        let id = self
            .id
            .or_else(|| fallback_id.map(str::to_string))
            .unwrap_or_else(|| self.key.clone());
        let domain = self
            .domain
            .or_else(|| fallback_domain.map(str::to_string))
            .ok_or_else(|| RuleError::MissingDomain(id.clone()))?;

        let mut rule = HeuristicRule::new(
            id,
            self.rule_type,
            self.key,
            self.values,
            self.direction,
            self.base_confidence,
            domain,
        )?;
        rule.description = self.description.unwrap_or_default();
        rule.source = self.source;
        rule.tags = self.tags;
        if let Some(created_at) = self.created_at {
            rule.created_at = created_at;
        }
        rule.updated_at = self.updated_at.unwrap_or(rule.created_at);
        Ok(rule)
    }
}

impl TryFrom<RuleRecord> for HeuristicRule {
    type Error = RuleError;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        record.into_rule(None, None)
    }
}

/// Serializable rule set file format
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetFile {
    pub domain: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Rule set as written back out (rules carry their id and domain explicitly)
#[derive(Serialize)]
struct RuleSetDocument<'a> {
    domain: &'a str,
    version: &'a str,
    description: &'a str,
    rules: &'a BTreeMap<String, HeuristicRule>,
    metadata: &'a BTreeMap<String, Value>,
}

/// All rules of one domain
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicRuleSet {
    pub domain: String,
    pub version: String,
    pub description: String,
    /// Rules keyed by id; iteration order is by id
    rules: BTreeMap<String, HeuristicRule>,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HeuristicRuleSet {
    pub fn new(domain: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.into(),
            version: version.into(),
            description: String::new(),
            rules: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a set from its file representation.
    ///
    /// # Errors
    ///
    /// Returns the first invalid rule or a rule that names another domain.
    pub fn from_file(file: RuleSetFile) -> Result<Self, RuleError> {
        let mut set = Self::new(file.domain, file.version);
        set.description = file.description;
        set.metadata = file.metadata;

        for (rule_id, record) in file.rules {
            let rule = record.into_rule(Some(&rule_id), Some(&set.domain))?;
            if rule.domain != set.domain {
                return Err(RuleError::DomainMismatch {
                    id: rule.id,
                    rule_domain: rule.domain,
                    set_domain: set.domain,
                });
            }
            set.rules.insert(rule.id.clone(), rule);
        }
        Ok(set)
    }

    /// Parse a YAML rule set document
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML, unknown rule types/directions, or invalid rules.
    pub fn from_yaml(text: &str) -> Result<Self, RuleError> {
        let file: RuleSetFile = serde_yaml::from_str(text)?;
        Self::from_file(file)
    }

    /// Parse a JSON rule set document
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON, unknown rule types/directions, or invalid rules.
    pub fn from_json(text: &str) -> Result<Self, RuleError> {
        let file: RuleSetFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    /// Render in the YAML rule set file format
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, RuleError> {
        Ok(serde_yaml::to_string(&self.document())?)
    }

    /// Render in the JSON rule set file format
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, RuleError> {
        Ok(serde_json::to_string_pretty(&self.document())?)
    }

    fn document(&self) -> RuleSetDocument<'_> {
        RuleSetDocument {
            domain: &self.domain,
            version: &self.version,
            description: &self.description,
            rules: &self.rules,
            metadata: &self.metadata,
        }
    }

    /// Add or replace a rule, returning the rule it replaced
    ///
    /// # Errors
    ///
    /// Returns an error if the rule belongs to a different domain.
    pub fn add_rule(&mut self, rule: HeuristicRule) -> Result<Option<HeuristicRule>, RuleError> {
        if rule.domain != self.domain {
            return Err(RuleError::DomainMismatch {
                id: rule.id,
                rule_domain: rule.domain,
                set_domain: self.domain.clone(),
            });
        }
        self.updated_at = Utc::now();
        Ok(self.rules.insert(rule.id.clone(), rule))
    }

    pub fn remove_rule(&mut self, id: &str) -> Option<HeuristicRule> {
        let removed = self.rules.remove(id);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&HeuristicRule> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &HeuristicRule> {
        self.rules.values()
    }

    pub fn rules_by_type(&self, rule_type: RuleType) -> impl Iterator<Item = &HeuristicRule> {
        self.rules.values().filter(move |r| r.rule_type == rule_type)
    }

    pub fn rules_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a HeuristicRule> {
        self.rules.values().filter(move |r| r.has_tag(tag))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Same domain, version and rule content (timestamps ignored)
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.version == other.version
            && self.rules.len() == other.rules.len()
            && self.rules.iter().zip(other.rules.iter()).all(|((a_id, a), (b_id, b))| {
                a_id == b_id
                    && a.rule_type == b.rule_type
                    && a.key == b.key
                    && a.values == b.values
                    && a.direction == b.direction
                    && (a.base_confidence - b.base_confidence).abs() < f64::EPSILON
                    && a.tags == b.tags
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cnc_rule() -> HeuristicRule {
        HeuristicRule::new(
            "cnc_abbrev",
            RuleType::Abbreviation,
            "cnc",
            vec!["computer numerical control".to_string()],
            RuleDirection::Bidirectional,
            0.9,
            "manufacturing",
        )
        .unwrap()
    }

    #[test]
    fn test_rule_validation() {
        let ok = cnc_rule();
        assert_eq!(ok.key, "cnc");

        let empty_key = HeuristicRule::new(
            "r",
            RuleType::Synonym,
            "  ",
            vec!["x".to_string()],
            RuleDirection::Forward,
            0.5,
            "d",
        );
        assert!(matches!(empty_key, Err(RuleError::EmptyKey(_))));

        let empty_values =
            HeuristicRule::new("r", RuleType::Synonym, "k", vec![], RuleDirection::Forward, 0.5, "d");
        assert!(matches!(empty_values, Err(RuleError::EmptyValues(_))));

        for bad in [-0.01, 1.01, f64::NAN] {
            let result = HeuristicRule::new(
                "r",
                RuleType::Synonym,
                "k",
                vec!["v".to_string()],
                RuleDirection::Forward,
                bad,
                "d",
            );
            assert!(matches!(result, Err(RuleError::ConfidenceOutOfRange { .. })));
        }
    }

    #[test]
    fn test_type_caps() {
        assert!((RuleType::Abbreviation.confidence_cap() - 0.95).abs() < f64::EPSILON);
        assert!((RuleType::Normalization.confidence_cap() - 0.95).abs() < f64::EPSILON);
        assert!((RuleType::Synonym.confidence_cap() - 0.90).abs() < f64::EPSILON);
        assert!((RuleType::Substitution.confidence_cap() - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_yaml_rule_set() {
        let yaml = r"
domain: manufacturing
version: 1.2.0
description: test rules
rules:
  cnc_abbrev:
    type: abbreviation
    key: cnc
    values: [computer numerical control]
    direction: bidirectional
    base_confidence: 0.9
    tags: [machining]
  mill_syn:
    type: synonym
    key: milling
    values: [cnc milling, machining]
";
        let set = HeuristicRuleSet::from_yaml(yaml).unwrap();
        assert_eq!(set.domain, "manufacturing");
        assert_eq!(set.version, "1.2.0");
        assert_eq!(set.len(), 2);

        let rule = set.get("mill_syn").unwrap();
        assert_eq!(rule.domain, "manufacturing");
        assert_eq!(rule.direction, RuleDirection::Bidirectional);
        assert_eq!(set.rules_by_tag("machining").count(), 1);
        assert_eq!(set.rules_by_type(RuleType::Synonym).count(), 1);
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let yaml = r"
domain: manufacturing
rules:
  bad:
    type: acronym
    key: cnc
    values: [computer numerical control]
";
        assert!(matches!(
            HeuristicRuleSet::from_yaml(yaml),
            Err(RuleError::YamlError(_))
        ));
    }

    #[test]
    fn test_unknown_direction_is_parse_error() {
        let json = r#"{"domain": "cooking", "rules": {"r": {"type": "synonym", "key": "a", "values": ["b"], "direction": "sideways"}}}"#;
        assert!(matches!(
            HeuristicRuleSet::from_json(json),
            Err(RuleError::JsonError(_))
        ));
    }

    #[test]
    fn test_rule_from_other_domain_rejected() {
        let yaml = r"
domain: manufacturing
rules:
  r:
    type: synonym
    key: a
    values: [b]
    domain: cooking
";
        assert!(matches!(
            HeuristicRuleSet::from_yaml(yaml),
            Err(RuleError::DomainMismatch { .. })
        ));
    }

    #[test]
    fn test_add_and_remove_bump_updated_at() {
        let mut set = HeuristicRuleSet::new("manufacturing", "1.0.0");
        let before = set.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(set.add_rule(cnc_rule()).unwrap().is_none());
        let after_add = set.updated_at;
        assert!(after_add > before);

        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(set.remove_rule("cnc_abbrev").is_some());
        assert!(set.updated_at > after_add);

        let unchanged = set.updated_at;
        assert!(set.remove_rule("cnc_abbrev").is_none());
        assert_eq!(set.updated_at, unchanged);
    }

    #[test]
    fn test_export_round_trip_content() {
        let mut set = HeuristicRuleSet::new("manufacturing", "1.0.0");
        set.add_rule(cnc_rule().with_tags(["machining"])).unwrap();

        let yaml = set.to_yaml().unwrap();
        let reparsed = HeuristicRuleSet::from_yaml(&yaml).unwrap();
        assert!(set.same_content(&reparsed));

        let json = set.to_json().unwrap();
        let reparsed = HeuristicRuleSet::from_json(&json).unwrap();
        assert!(set.same_content(&reparsed));
    }
}
