use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::{read_json, OutputFormat};
use crate::supply_tree::SupplyTree;

#[derive(Args)]
pub struct TreeArgs {
    #[command(subcommand)]
    pub command: TreeCommands,
}

#[derive(Subcommand)]
pub enum TreeCommands {
    /// Check a supply tree: acyclic workflows, valid connections, resolvable references
    Validate {
        /// Supply tree JSON, or a solution object holding one under `tree`
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Print a supply tree's workflows in execution order
    Show {
        #[arg(required = true)]
        file: PathBuf,
    },
}

pub fn run(args: TreeArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    match args.command {
        TreeCommands::Validate { file } => run_validate(&file, format),
        TreeCommands::Show { file } => run_show(&file, format),
    }
}

fn load_tree(path: &Path) -> anyhow::Result<SupplyTree> {
    let mut document = read_json(path)?;
    if let Some(tree) = document.get_mut("tree") {
        document = tree.take();
    }
    serde_json::from_value(document)
        .map_err(|e| anyhow::anyhow!("{} is not a valid supply tree: {}", path.display(), e))
}

fn run_validate(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let tree = load_tree(path)?;
    let validation = tree.validate();

    match format {
        OutputFormat::Text => {
            if validation.is_valid() {
                println!("Supply tree {} is valid", tree.id);
            } else {
                println!("Supply tree {} is INVALID:", tree.id);
                for issue in &validation.issues {
                    println!("  - {issue}");
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "tree_id": tree.id,
                "valid": validation.is_valid(),
                "issues": validation.issues,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if !validation.is_valid() {
        anyhow::bail!("{} validation issue(s)", validation.issues.len());
    }
    Ok(())
}

fn run_show(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let tree = load_tree(path)?;

    if let OutputFormat::Json = format {
        println!("{}", tree.to_json()?);
        return Ok(());
    }

    println!("Supply tree {}", tree.id);
    println!("{}", "=".repeat(60));
    println!("Created: {}", tree.creation_time.to_rfc3339());
    if let Some(summary) = &tree.summary {
        println!(
            "Facility: {} ({}), confidence {:.2}, {}",
            summary.facility_name, summary.facility_id, summary.confidence, summary.match_type
        );
    }

    for workflow in tree.workflows() {
        println!("\nWorkflow '{}' ({} steps)", workflow.name, workflow.len());
        let order = workflow.topological_order()?;
        for (step, node) in order.into_iter().enumerate() {
            println!("  {}. {}", step + 1, node.name);
            for uri in node.references() {
                match tree.resolve(uri) {
                    Some(value) => println!("       {uri} = {}", compact(value)),
                    None => println!("       {uri} (unresolved)"),
                }
            }
        }
    }

    if !tree.connections().is_empty() {
        println!("\nConnections:");
        for c in tree.connections() {
            println!(
                "  {}/{} -> {}/{} ({})",
                c.source_workflow, c.source_node, c.target_workflow, c.target_node, c.connection_type
            );
        }
    }
    Ok(())
}

/// One-line rendering of a snapshot value
fn compact(value: &serde_json::Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        let head: String = text.chars().take(57).collect();
        format!("{head}...")
    } else {
        text
    }
}
