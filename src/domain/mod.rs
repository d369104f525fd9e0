//! Pluggable problem domains.
//!
//! - [`DomainRegistry`]: registers per-domain components and detects which
//!   domain a requirement/capability pair belongs to
//! - [`DomainOrchestrator`]: runs a domain's matching modules in priority
//!   order, falling back to the base [`MatchCascade`](crate::matching::MatchCascade)
//! - [`manufacturing`] and [`cooking`]: the built-in domains
//! - [`build_default_registry`]: start-up assembly of the built-in domains

pub mod cooking;
pub mod defaults;
pub mod manufacturing;
pub mod orchestrator;
pub mod registry;

use thiserror::Error;

use crate::matching::MatchError;

pub use defaults::build_default_registry;
pub use orchestrator::{
    DomainAdapter, DomainOrchestrator, MatchStatus, MatchingModule, ModuleContext, ModuleError,
    ModuleOutcome, ModuleRegistry, ModuleSettings, Orchestrate, OrchestratedTree,
    OrchestrationOutcome, OrchestratorConfig, OrchestratorError, TreeSource,
};
pub use registry::{
    CascadeMatcher, DetectionMethod, DetectionSubject, DomainDetection, DomainMatcher,
    DomainMetadata, DomainRegistry, DomainServices, Extractor, JsonExtractor,
    SupplyTreeValidator, Validator,
};

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Domain '{0}' is disabled")]
    Disabled(String),

    #[error("Domain '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("The {component} is for domain '{found}', expected '{expected}'")]
    ComponentMismatch {
        component: &'static str,
        expected: String,
        found: String,
    },

    #[error("Requirement domain '{requirement}' conflicts with capability domain '{capability}'")]
    Conflict {
        requirement: String,
        capability: String,
    },

    #[error("Could not determine a domain")]
    DetectionFailed,

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Match(#[from] MatchError),
}
