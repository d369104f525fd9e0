use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("Missing '://' separator in resource URI: {0}")]
    MissingScheme(String),

    #[error("Unknown resource space '{0}'")]
    UnknownSpace(String),

    #[error("Resource URI has an empty identifier: {0}")]
    EmptyIdentifier(String),

    #[error("Invalid percent-encoding in resource URI component '{0}'")]
    InvalidEncoding(String),
}

fn decode(component: &str) -> Result<String, UriError> {
    urlencoding::decode(component)
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| UriError::InvalidEncoding(component.to_string()))
}

/// Which side of a match a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceSpace {
    /// Documents describing what a design needs
    RequirementSpace,
    /// Documents describing what a facility can do
    CapabilitySpace,
}

impl ResourceSpace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequirementSpace => "requirement-space",
            Self::CapabilitySpace => "capability-space",
        }
    }
}

impl std::fmt::Display for ResourceSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceSpace {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requirement-space" => Ok(Self::RequirementSpace),
            "capability-space" => Ok(Self::CapabilitySpace),
            other => Err(UriError::UnknownSpace(other.to_string())),
        }
    }
}

/// A typed reference into a requirement or capability document.
///
/// Canonical form: `space://identifier/seg1/seg2#fragment`. Each component is
/// percent-encoded, so identifiers like `okw/fablab-1` survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceUri {
    pub space: ResourceSpace,
    pub identifier: String,
    pub path: Vec<String>,
    pub fragment: Option<String>,
}

impl ResourceUri {
    pub fn new(space: ResourceSpace, identifier: impl Into<String>) -> Self {
        Self {
            space,
            identifier: identifier.into(),
            path: Vec::new(),
            fragment: None,
        }
    }

    pub fn requirement(identifier: impl Into<String>) -> Self {
        Self::new(ResourceSpace::RequirementSpace, identifier)
    }

    pub fn capability(identifier: impl Into<String>) -> Self {
        Self::new(ResourceSpace::CapabilitySpace, identifier)
    }

    /// Append one path segment
    #[must_use]
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    #[must_use]
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// The document-level URI (`space://identifier`) this reference points into
    #[must_use]
    pub fn base(&self) -> Self {
        Self::new(self.space, self.identifier.clone())
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.path.is_empty() && self.fragment.is_none()
    }
}

impl std::fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.space, urlencoding::encode(&self.identifier))?;
        for segment in &self.path {
            write!(f, "/{}", urlencoding::encode(segment))?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", urlencoding::encode(fragment))?;
        }
        Ok(())
    }
}

impl FromStr for ResourceUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (space, rest) = s
            .split_once("://")
            .ok_or_else(|| UriError::MissingScheme(s.to_string()))?;
        let space: ResourceSpace = space.parse()?;

        let (location, fragment) = match rest.split_once('#') {
            Some((location, fragment)) => (location, Some(decode(fragment)?)),
            None => (rest, None),
        };

        let mut segments = location.split('/');
        let identifier = decode(segments.next().unwrap_or_default())?;
        if identifier.is_empty() {
            return Err(UriError::EmptyIdentifier(s.to_string()));
        }

        Ok(Self {
            space,
            identifier,
            path: segments.map(decode).collect::<Result<_, _>>()?,
            fragment,
        })
    }
}

impl TryFrom<String> for ResourceUri {
    type Error = UriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceUri> for String {
    fn from(uri: ResourceUri) -> Self {
        uri.to_string()
    }
}
