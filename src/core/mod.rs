//! Core data types for requirement/capability matching.
//!
//! This module provides the fundamental types used throughout the library:
//!
//! - [`Requirement`]: A normalized unit of "what a design needs" (a process, tool, material)
//! - [`Capability`]: A normalized unit of "what a facility can do"
//! - [`Facility`]: A named collection of capabilities, the unit that solutions are ranked by
//! - [`MatchType`], [`ConfidenceBand`]: Result classification types
//! - [`ResourceUri`]: A typed, path-addressable reference into a requirement or capability document
//!
//! ## Labels
//!
//! Requirements and capabilities are compared by their `name` label. Labels come from
//! many sources and use different conventions:
//!
//! | Source                 | Example                                      |
//! |------------------------|----------------------------------------------|
//! | Free text              | `PCB Assembly`                               |
//! | Snake/kebab identifiers| `pcb_assembly`, `pcb-assembly`               |
//! | Taxonomy URL           | `https://en.wikipedia.org/wiki/PCB_assembly` |
//!
//! All three normalize to the same direct-match key (see [`crate::matching::normalize`]).
//! Anything beyond that (abbreviations, synonyms, substitutions) is expressed through
//! heuristic rules, never through ad hoc string munging.

pub mod types;
pub mod uri;

pub use types::{
    clamp_confidence, Capability, ConfidenceBand, Facility, MatchType, Requirement,
};
pub use uri::{ResourceSpace, ResourceUri, UriError};
