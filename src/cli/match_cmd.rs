use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde_json::json;

use crate::cli::{read_json, runtime, OutputFormat, RulesSource};
use crate::domain::{build_default_registry, DetectionSubject, DomainDetection, OrchestrationOutcome};
use crate::matching::{MatchCascade, MatchingConfig, SupplyTreeSolution, TokenOverlapSimilarity};

#[derive(Args)]
pub struct MatchArgs {
    /// Requirements document (JSON: a `requirements` array or a bare array)
    #[arg(required = true)]
    pub requirements: PathBuf,

    /// Facilities document (JSON: a `facilities` array or a bare array)
    #[arg(required = true)]
    pub facilities: PathBuf,

    /// Domain to match in (detected from the documents when omitted)
    #[arg(long)]
    pub domain: Option<String>,

    /// Manifest identifier used in the supply trees (defaults to the file stem)
    #[arg(long)]
    pub manifest_id: Option<String>,

    /// Matching configuration file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub rules: RulesSource,

    /// Skip the semantic tier
    #[arg(long)]
    pub no_semantic: bool,

    /// Run the domain's matching modules instead of the plain cascade
    #[arg(long)]
    pub orchestrate: bool,

    /// Number of solutions to show
    #[arg(short = 'n', long, default_value = "10")]
    pub top: usize,
}

pub fn run(args: MatchArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    runtime()?.block_on(run_async(args, format, verbose))
}

async fn run_async(args: MatchArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let requirements_doc = read_json(&args.requirements)?;
    let facilities_doc = read_json(&args.facilities)?;

    let config = match &args.config {
        Some(path) => MatchingConfig::load(path)?,
        None => MatchingConfig::default(),
    };
    let rules = args.rules.load(verbose).await?;
    let mut cascade = MatchCascade::new(rules, config);
    if !args.no_semantic {
        cascade = cascade.with_semantic(Arc::new(TokenOverlapSimilarity));
    }
    let cascade = Arc::new(cascade);
    let registry = build_default_registry(Arc::clone(&cascade), &BTreeMap::new())?;

    let (domain, detection) = match &args.domain {
        Some(domain) => (domain.clone(), None),
        None => {
            let detection = registry.detect_domain(&DetectionSubject::from_documents(
                &requirements_doc,
                &facilities_doc,
            ))?;
            (detection.domain.clone(), Some(detection))
        }
    };
    let services = registry.get_domain_services(&domain)?;

    let requirements = services.extractor.extract_requirements(&requirements_doc)?;
    let facilities = services.extractor.extract_facilities(&facilities_doc)?;
    let manifest_id = args.manifest_id.clone().unwrap_or_else(|| {
        args.requirements
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("manifest")
            .to_string()
    });

    if verbose {
        eprintln!(
            "Matching {} requirements against {} facilities in domain '{}'",
            requirements.len(),
            facilities.len(),
            domain
        );
    }

    if args.orchestrate {
        let orchestrator = services
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("Domain '{}' has no orchestrator", domain))?;
        let outcome = orchestrator
            .orchestrate(&manifest_id, &requirements, &facilities)
            .await;
        match format {
            OutputFormat::Text => print_text_outcome(&manifest_id, &domain, &outcome, args.top),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        }
        return Ok(());
    }

    let solutions = services
        .matcher
        .find_solutions(&manifest_id, &requirements, &facilities)
        .await?
        .into_ranked();

    match format {
        OutputFormat::Text => {
            print_text_solutions(&manifest_id, &domain, detection.as_ref(), &solutions, args.top);
        }
        OutputFormat::Json => {
            let shown: Vec<&SupplyTreeSolution> = solutions.iter().take(args.top).collect();
            let output = json!({
                "manifest_id": manifest_id,
                "domain": domain,
                "detection": detection,
                "solution_count": solutions.len(),
                "solutions": shown,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_text_solutions(
    manifest_id: &str,
    domain: &str,
    detection: Option<&DomainDetection>,
    solutions: &[SupplyTreeSolution],
    top: usize,
) {
    println!("Solutions for '{manifest_id}'");
    println!("{}", "=".repeat(60));
    match detection {
        Some(d) => println!(
            "Domain: {} (detected by {:?}, confidence {:.2})",
            domain, d.method, d.confidence
        ),
        None => println!("Domain: {domain}"),
    }

    if solutions.is_empty() {
        println!("\nNo facility can satisfy these requirements.");
        return;
    }

    for (rank, solution) in solutions.iter().take(top).enumerate() {
        let summary = solution.tree.summary.as_ref();
        println!(
            "\n#{} {} ({})",
            rank + 1,
            summary.map_or(solution.facility_id(), |s| s.facility_name.as_str()),
            solution.facility_id()
        );
        println!("   Score: {:.2} [{}]", solution.score, solution.band());
        println!(
            "   Requirements matched: {}/{}",
            solution.metrics.matched_requirement_count, solution.metrics.requirement_count
        );
        if let Some(summary) = summary {
            println!("   Match type: {}", summary.match_type);
            if !summary.matched_capabilities.is_empty() {
                println!("   Capabilities: {}", summary.matched_capabilities.join(", "));
            }
            if !summary.required_materials.is_empty() {
                println!("   Materials: {}", summary.required_materials.join(", "));
            }
        }
        if solution.metrics.semantic_degraded {
            println!("   Note: semantic matching timed out; heuristic and direct results only");
        }
    }

    if solutions.len() > top {
        println!("\n... and {} more", solutions.len() - top);
    }
}

fn print_text_outcome(manifest_id: &str, domain: &str, outcome: &OrchestrationOutcome, top: usize) {
    println!("Orchestrated match for '{manifest_id}' ({domain})");
    println!("{}", "=".repeat(60));
    println!("Status: {:?}", outcome.status);
    if outcome.used_fallback {
        println!("No matching module produced a tree; used the base cascade");
    }

    for tree in outcome.trees.iter().take(top) {
        let source = match &tree.source {
            crate::domain::TreeSource::Module(key) => key.as_str(),
            crate::domain::TreeSource::Cascade => "cascade",
        };
        println!(
            "  {} confidence {:.2} via {} ({} workflow steps)",
            tree.facility_id,
            tree.confidence,
            source,
            tree.tree.workflows().map(crate::supply_tree::Workflow::len).sum::<usize>()
        );
    }

    for error in &outcome.errors {
        println!("  Warning: {error}");
    }
}
