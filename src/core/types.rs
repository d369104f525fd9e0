use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parameter keys under which a capability may declare what it substitutes for
const SUBSTITUTES_FOR_KEYS: [&str; 3] = ["substitutes_for", "substitutesFor", "substitutes"];

/// Clamp a confidence value into `[0, 1]`.
///
/// NaN is treated as no confidence at all.
#[must_use]
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A normalized requirement extracted from a design manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Label used for matching (e.g. a process name)
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, Value>,

    /// Tools needed to carry out this requirement, in the order they are used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Optional requirements never trigger the unmatched-required penalty
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl Requirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            constraints: BTreeMap::new(),
            required_tools: Vec::new(),
            domain: None,
            optional: false,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Materials named by the `material` / `materials` parameters
    #[must_use]
    pub fn materials(&self) -> Vec<String> {
        ["material", "materials"]
            .iter()
            .filter_map(|key| self.parameters.get(*key))
            .flat_map(string_values)
            .collect()
    }
}

/// A normalized capability extracted from a facility record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,

    /// Kind of capability, e.g. "process", "equipment", "material"
    #[serde(rename = "type", default)]
    pub capability_type: String,

    /// Free-form parameters; may carry a `substitutes_for` declaration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limitations: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, capability_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability_type: capability_type.into(),
            parameters: BTreeMap::new(),
            limitations: BTreeMap::new(),
            domain: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Labels this capability explicitly declares it can substitute for.
    ///
    /// The declaration may be a list of strings, a mapping (its keys are used),
    /// or a single string.
    #[must_use]
    pub fn substitutes_for(&self) -> Vec<String> {
        SUBSTITUTES_FOR_KEYS
            .iter()
            .filter_map(|key| self.parameters.get(*key))
            .flat_map(string_values)
            .collect()
    }
}

/// Collect the string values out of a list, mapping (keys) or single string
fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// A facility: the unit solutions are computed and de-duplicated by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    /// Stable identity of the facility
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub capabilities: Vec<Capability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Facility {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            location: None,
            domain: None,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// How a requirement was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Normalized labels are identical
    Direct,
    /// A synonym/abbreviation/normalization rule fired
    Heuristic,
    /// A substitution rule fired or the capability declared the substitution
    Substitution,
    /// The semantic-similarity collaborator accepted the pair
    Semantic,
    /// Not matched, or no information about how
    #[default]
    Unknown,
}

impl MatchType {
    /// Rank used to report the weakest tier a solution relied on
    fn weakness(self) -> u8 {
        match self {
            Self::Direct => 0,
            Self::Heuristic => 1,
            Self::Semantic => 2,
            Self::Substitution => 3,
            Self::Unknown => 4,
        }
    }

    /// Weakest tier among the given match types, ignoring `Unknown`.
    ///
    /// Returns `Unknown` when nothing matched.
    pub fn weakest<I: IntoIterator<Item = MatchType>>(types: I) -> Self {
        types
            .into_iter()
            .filter(|t| *t != Self::Unknown)
            .max_by_key(|t| t.weakness())
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Substitution => write!(f, "substitution"),
            Self::Semantic => write!(f, "semantic"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Human-readable confidence level for a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
    Exact,
}

impl ConfidenceBand {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 1.0 {
            Self::Exact
        } else if score >= 0.85 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp_confidence() {
        assert!((clamp_confidence(1.7) - 1.0).abs() < f64::EPSILON);
        assert!((clamp_confidence(-0.3) - 0.0).abs() < f64::EPSILON);
        assert!((clamp_confidence(0.42) - 0.42).abs() < f64::EPSILON);
        assert!((clamp_confidence(f64::NAN) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_substitutes_for_shapes() {
        let list = Capability::new("laser cutting", "process")
            .with_parameter("substitutes_for", json!(["plasma cutting", "waterjet cutting"]));
        assert_eq!(
            list.substitutes_for(),
            vec!["plasma cutting".to_string(), "waterjet cutting".to_string()]
        );

        let map = Capability::new("laser cutting", "process")
            .with_parameter("substitutesFor", json!({"plasma cutting": 0.8}));
        assert_eq!(map.substitutes_for(), vec!["plasma cutting".to_string()]);

        let single = Capability::new("laser cutting", "process")
            .with_parameter("substitutes_for", "plasma cutting");
        assert_eq!(single.substitutes_for(), vec!["plasma cutting".to_string()]);

        let none = Capability::new("laser cutting", "process");
        assert!(none.substitutes_for().is_empty());
    }

    #[test]
    fn test_requirement_materials() {
        let req = Requirement::new("3D printing")
            .with_parameter("material", "PLA")
            .with_parameter("materials", json!(["PETG"]));
        assert_eq!(req.materials(), vec!["PLA".to_string(), "PETG".to_string()]);
    }

    #[test]
    fn test_weakest_match_type() {
        assert_eq!(
            MatchType::weakest([MatchType::Direct, MatchType::Heuristic]),
            MatchType::Heuristic
        );
        assert_eq!(
            MatchType::weakest([MatchType::Substitution, MatchType::Semantic]),
            MatchType::Substitution
        );
        assert_eq!(
            MatchType::weakest([MatchType::Unknown, MatchType::Direct]),
            MatchType::Direct
        );
        assert_eq!(MatchType::weakest([]), MatchType::Unknown);
    }

    #[test]
    fn test_capability_type_field_name() {
        let cap: Capability =
            serde_json::from_value(json!({"name": "milling", "type": "process"})).unwrap();
        assert_eq!(cap.capability_type, "process");
    }

    #[test]
    fn test_confidence_band() {
        assert_eq!(ConfidenceBand::from_score(1.0), ConfidenceBand::Exact);
        assert_eq!(ConfidenceBand::from_score(0.9), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(0.7), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(0.2), ConfidenceBand::Low);
    }
}
