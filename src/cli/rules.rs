use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};

use crate::cli::{runtime, OutputFormat, RulesSource};
use crate::core::types::{Capability, Requirement};
use crate::matching::{MatchCascade, MatchingConfig, TokenOverlapSimilarity};
use crate::rules::{HeuristicRule, RuleManager, RuleSetFormat, RuleType};

#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommands,

    #[command(flatten)]
    pub source: RulesSource,
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List rules, optionally filtered
    List {
        /// Only this domain
        #[arg(long)]
        domain: Option<String>,

        /// Only rules of this type
        #[arg(long = "type", value_enum)]
        rule_type: Option<RuleTypeArg>,

        /// Only rules carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Show one rule
    Show {
        #[arg(required = true)]
        domain: String,

        #[arg(required = true)]
        id: String,
    },

    /// Run two labels through the match cascade
    Test {
        /// Requirement label
        #[arg(required = true)]
        requirement: String,

        /// Capability label
        #[arg(required = true)]
        capability: String,

        #[arg(long, default_value = "manufacturing")]
        domain: String,

        /// Skip the semantic tier
        #[arg(long)]
        no_semantic: bool,
    },

    /// Export a domain's rule set
    Export {
        #[arg(required = true)]
        domain: String,

        /// Output file (.yaml/.yml or .json); prints YAML to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum RuleTypeArg {
    Abbreviation,
    Synonym,
    Equivalent,
    Substitution,
    Normalization,
}

impl From<RuleTypeArg> for RuleType {
    fn from(arg: RuleTypeArg) -> Self {
        match arg {
            RuleTypeArg::Abbreviation => RuleType::Abbreviation,
            RuleTypeArg::Synonym => RuleType::Synonym,
            RuleTypeArg::Equivalent => RuleType::Equivalent,
            RuleTypeArg::Substitution => RuleType::Substitution,
            RuleTypeArg::Normalization => RuleType::Normalization,
        }
    }
}

pub fn run(args: RulesArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let runtime = runtime()?;
    let manager = runtime.block_on(args.source.load(verbose))?;

    match args.command {
        RulesCommands::List {
            domain,
            rule_type,
            tag,
        } => run_list(&manager, domain, rule_type.map(RuleType::from), tag.as_deref(), format),
        RulesCommands::Show { domain, id } => run_show(&manager, &domain, &id, format),
        RulesCommands::Test {
            requirement,
            capability,
            domain,
            no_semantic,
        } => {
            let mut cascade = MatchCascade::new(manager, MatchingConfig::default());
            if !no_semantic {
                cascade = cascade.with_semantic(Arc::new(TokenOverlapSimilarity));
            }
            let result = runtime.block_on(cascade.match_pair(
                &Requirement::new(&requirement),
                &Capability::new(&capability, ""),
                &domain,
            ));
            match format {
                OutputFormat::Text => {
                    if result.matched {
                        println!(
                            "MATCH ({}) confidence {:.2}",
                            result.match_type, result.confidence
                        );
                    } else {
                        println!("NO MATCH");
                    }
                    if let Some(rule) = &result.rule_used {
                        println!("Rule: {} ({}, {})", rule.id, rule.rule_type, rule.domain);
                    }
                    for detail in &result.transformation_details {
                        println!("  {detail}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
            Ok(())
        }
        RulesCommands::Export { domain, output } => match output {
            Some(path) => {
                let format = RuleSetFormat::from_path(&path).ok_or_else(|| {
                    anyhow::anyhow!("Unsupported rule set extension: {}", path.display())
                })?;
                std::fs::write(&path, manager.export(&domain, format)?)?;
                eprintln!("Exported '{}' rules to {}", domain, path.display());
                Ok(())
            }
            None => {
                print!("{}", manager.export(&domain, RuleSetFormat::Yaml)?);
                Ok(())
            }
        },
    }
}

fn run_list(
    manager: &RuleManager,
    domain: Option<String>,
    rule_type: Option<RuleType>,
    tag: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let domains = match domain {
        Some(domain) => vec![domain],
        None => manager.list_domains(),
    };

    let mut rules: Vec<HeuristicRule> = Vec::new();
    for domain in &domains {
        let candidates = match rule_type {
            Some(rule_type) => manager.get_rules_by_type(domain, rule_type),
            None => manager
                .get_rule_set(domain)
                .ok_or_else(|| anyhow::anyhow!("Unknown rule domain: {}", domain))?
                .rules()
                .cloned()
                .collect(),
        };
        rules.extend(
            candidates
                .into_iter()
                .filter(|r| tag.map_or(true, |t| r.has_tag(t))),
        );
    }

    match format {
        OutputFormat::Text => {
            println!("{:<28} {:<14} {:<13} {:>5}  RULE", "ID", "DOMAIN", "TYPE", "CONF");
            println!("{}", "-".repeat(80));
            for rule in &rules {
                println!(
                    "{:<28} {:<14} {:<13} {:>5.2}  {} {} {}",
                    rule.id,
                    rule.domain,
                    rule.rule_type,
                    rule.base_confidence,
                    rule.key,
                    rule.direction.arrow(),
                    rule.values.join(" | ")
                );
            }
            println!("\nTotal: {} rules", rules.len());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rules)?),
    }
    Ok(())
}

fn run_show(manager: &RuleManager, domain: &str, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let rule = manager
        .get_rule(domain, id)
        .ok_or_else(|| anyhow::anyhow!("Rule '{}' not found in domain '{}'", id, domain))?;

    match format {
        OutputFormat::Text => {
            println!("Rule: {}", rule.id);
            println!("{}", "=".repeat(60));
            println!("Domain:          {}", rule.domain);
            println!("Type:            {}", rule.rule_type);
            println!("Key:             {}", rule.key);
            println!("Values:          {}", rule.values.join(", "));
            println!("Direction:       {:?}", rule.direction);
            println!("Base confidence: {:.2}", rule.base_confidence);
            println!(
                "Effective:       {:.2}",
                crate::matching::heuristic::rule_confidence(&rule)
            );
            if !rule.description.is_empty() {
                println!("Description:     {}", rule.description);
            }
            if !rule.tags.is_empty() {
                let tags: Vec<&str> = rule.tags.iter().map(String::as_str).collect();
                println!("Tags:            {}", tags.join(", "));
            }
            println!("Updated:         {}", rule.updated_at.to_rfc3339());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rule)?),
    }
    Ok(())
}
