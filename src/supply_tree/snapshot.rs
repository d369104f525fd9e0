use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::uri::ResourceUri;

/// Point-in-time copy of a requirement- or capability-space document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub uri: ResourceUri,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResourceSnapshot {
    pub fn new(uri: ResourceUri, content: Value) -> Self {
        Self {
            uri,
            content,
            timestamp: Utc::now(),
            version: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Resolve `target` inside this snapshot.
    ///
    /// The target must live in the same document (space and identifier) and
    /// below this snapshot's own path; the remaining path segments and the
    /// fragment are then navigated through the content. Null values count as
    /// unresolved.
    #[must_use]
    pub fn resolve(&self, target: &ResourceUri) -> Option<&Value> {
        if target.space != self.uri.space || target.identifier != self.uri.identifier {
            return None;
        }
        let remaining = target.path.strip_prefix(self.uri.path.as_slice())?;

        let fragment = match (&self.uri.fragment, &target.fragment) {
            (None, fragment) => fragment.as_deref(),
            (Some(own), Some(wanted)) if own == wanted && remaining.is_empty() => None,
            _ => return None,
        };

        navigate(&self.content, remaining, fragment)
    }
}

/// Walk `value` along `path` then `fragment`.
///
/// Object members are looked up by key and array elements by index. Returns
/// `None` for a missing step or a null result.
#[must_use]
pub fn navigate<'a, S: AsRef<str>>(
    value: &'a Value,
    path: &[S],
    fragment: Option<&str>,
) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.iter().map(|s| s.as_ref()).chain(fragment) {
        current = step(current, segment)?;
    }
    (!current.is_null()).then_some(current)
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
