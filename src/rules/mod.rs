//! Heuristic rule storage and lifecycle.
//!
//! Rules encode matching knowledge that plain normalization cannot: abbreviations
//! (`cnc` ↔ `computer numerical control`), synonyms, equivalents, substitutions and
//! spelling normalizations. Rules are grouped into one [`HeuristicRuleSet`] per
//! domain, and all sets together form an immutable [`RuleStore`].
//!
//! ## Rule set files
//!
//! One file per domain, YAML or JSON:
//!
//! ```yaml
//! domain: manufacturing
//! version: "1.0.0"
//! rules:
//!   cnc_abbreviation:
//!     type: abbreviation          # abbreviation | synonym | equivalent | substitution | normalization
//!     key: cnc
//!     values: [computer numerical control]
//!     direction: bidirectional    # bidirectional | forward | reverse
//!     base_confidence: 0.9
//!     tags: [machining]
//! ```
//!
//! A malformed file is logged and skipped; the remaining files still load.
//!
//! ## Example
//!
//! ```rust,no_run
//! use supply_matcher::rules::RuleManager;
//!
//! # async fn run() -> Result<(), supply_matcher::rules::RuleError> {
//! let manager = RuleManager::new("rules/");
//! let report = manager.initialize().await?;
//! for (path, error) in &report.failures {
//!     eprintln!("skipped {}: {error}", path.display());
//! }
//!
//! // Readers hold a snapshot; a concurrent reload never changes it underneath them
//! let store = manager.snapshot();
//! println!("{} rules in {} domains", store.total_rules(), store.len());
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod rule;
pub mod store;

pub use manager::{LoadReport, RuleManager, RuleSetFormat};
pub use rule::{HeuristicRule, HeuristicRuleSet, RuleDirection, RuleError, RuleType};
pub use store::RuleStore;
