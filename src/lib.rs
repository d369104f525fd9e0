//! # supply-matcher
//!
//! A library for matching what a hardware design needs against what facilities can do.
//!
//! Requirements (processes, tools, materials) extracted from a design manifest rarely
//! use the same words as the capability records of the facilities that could build it:
//! "CNC" against "computer numerical control", "pcb_assembly" against "PCB Assembly",
//! "butter" against "margarine". `supply-matcher` bridges the gap with a cascade of
//! increasingly expensive strategies and reports each result as an explainable
//! supply tree.
//!
//! ## Features
//!
//! - **Direct matching**: normalized label comparison, taxonomy URLs included
//! - **Heuristic rules**: domain-partitioned abbreviation/synonym/substitution rules,
//!   hot-reloadable without disturbing in-flight matches
//! - **Semantic fallback**: any injected similarity function, bounded in concurrency and time
//! - **Supply trees**: acyclic workflows whose steps reference point-in-time snapshots
//!   of the requirements and capabilities they connect
//! - **Domains**: manufacturing and cooking built in, each with its own matching module
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use supply_matcher::{Capability, Facility, MatchCascade, MatchingConfig, Requirement};
//! use supply_matcher::rules::RuleManager;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // Load the embedded rule sets
//! let rules = Arc::new(RuleManager::embedded()?);
//! let cascade = MatchCascade::new(rules, MatchingConfig::default());
//!
//! let requirements = vec![Requirement::new("CNC"), Requirement::new("pcb_assembly")];
//! let facilities = vec![Facility::new("fab-1", "Fab Lab").with_capabilities(vec![
//!     Capability::new("computer numerical control", "process"),
//!     Capability::new("PCB Assembly", "process"),
//! ])];
//!
//! let solutions = cascade
//!     .find_solutions("controller-board", &requirements, &facilities, "manufacturing")
//!     .await?;
//! for solution in solutions.into_ranked() {
//!     println!("{}: {:.1}%", solution.facility_id(), solution.score * 100.0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Requirement, capability and facility types, resource URIs
//! - [`rules`]: Heuristic rule model, store and manager
//! - [`matching`]: Match cascade, scoring and solution sets
//! - [`supply_tree`]: Workflow DAGs, snapshots and supply trees
//! - [`domain`]: Domain registry, orchestrator and the built-in domains
//! - [`cli`]: Command-line interface implementation

pub mod cli;
pub mod core;
pub mod domain;
pub mod matching;
pub mod rules;
pub mod supply_tree;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::types::*;
pub use crate::core::uri::{ResourceSpace, ResourceUri};
pub use domain::{DomainOrchestrator, DomainRegistry, MatchStatus};
pub use matching::engine::{MatchCascade, MatchResult, MatchingConfig};
pub use matching::solution::{SolutionSet, SupplyTreeSolution};
pub use rules::{HeuristicRule, RuleManager, RuleStore};
pub use supply_tree::{SupplyTree, Workflow, WorkflowNode};
