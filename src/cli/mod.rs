//! Command-line interface for supply-matcher.
//!
//! This module implements the CLI using clap. Available commands:
//!
//! - **match**: Match a requirements document against a facilities document
//! - **rules**: List, show, test or export heuristic rules
//! - **tree**: Validate or show a serialized supply tree
//!
//! ## Usage
//!
//! ```text
//! # Rank facilities for a manifest (domain auto-detected)
//! supply-matcher match requirements.json facilities.json
//!
//! # Run the domain's matching modules instead of the plain cascade
//! supply-matcher match requirements.json facilities.json --orchestrate
//!
//! # JSON output for scripting
//! supply-matcher match requirements.json facilities.json --format json
//!
//! # Which rule links two labels?
//! supply-matcher rules test cnc "computer numerical control" --domain manufacturing
//!
//! # Check a saved tree
//! supply-matcher tree validate tree.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::rules::RuleManager;

pub mod match_cmd;
pub mod rules;
pub mod tree;

#[derive(Parser)]
#[command(name = "supply-matcher")]
#[command(version)]
#[command(about = "Match manufacturing and other requirements against facility capabilities")]
#[command(
    long_about = "supply-matcher matches what a design needs against what facilities can do.\n\nEach requirement/capability pair goes through a cascade of increasingly expensive strategies:\n- Direct comparison of normalized labels\n- Heuristic rules (abbreviations, synonyms, substitutions)\n- Semantic similarity\n\nCandidate facilities are scored and returned as supply trees: workflows whose steps reference the requirements and capabilities they connect."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Match requirements against facilities
    Match(match_cmd::MatchArgs),

    /// Inspect heuristic rules
    Rules(rules::RulesArgs),

    /// Work with serialized supply trees
    Tree(tree::TreeArgs),
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Rule source shared by the commands that match labels
#[derive(clap::Args, Debug, Clone)]
pub struct RulesSource {
    /// Directory of rule set files (defaults to the built-in rule sets)
    #[arg(long, value_name = "DIR")]
    pub rules: Option<PathBuf>,
}

impl RulesSource {
    /// Load the rule manager; skipped rule files are reported on stderr
    pub async fn load(&self, verbose: bool) -> anyhow::Result<Arc<RuleManager>> {
        let Some(dir) = &self.rules else {
            return Ok(Arc::new(RuleManager::embedded()?));
        };
        let manager = RuleManager::new(dir);
        let report = manager.initialize().await?;
        for (path, error) in &report.failures {
            eprintln!("Warning: skipped {}: {}", path.display(), error);
        }
        if verbose {
            eprintln!(
                "Loaded rule sets for {} from {}",
                report.loaded.join(", "),
                dir.display()
            );
        }
        Ok(Arc::new(manager))
    }
}

/// Read and parse a JSON document
pub fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
}

/// Current-thread runtime for one command
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
