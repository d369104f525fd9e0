use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::orchestrator::{
    DomainAdapter, DomainOrchestrator, ModuleRegistry, Orchestrate, OrchestratorConfig,
};
use crate::domain::registry::{
    CascadeMatcher, DomainMetadata, DomainRegistry, JsonExtractor, SupplyTreeValidator,
};
use crate::domain::{cooking, manufacturing, DomainError};
use crate::matching::MatchCascade;

const MANUFACTURING_KEYWORDS: [&str; 16] = [
    "cnc", "milling", "turning", "lathe", "welding", "machining", "3d printing", "additive",
    "laser cutting", "pcb", "soldering", "injection molding", "assembly", "sheet metal",
    "anodizing", "fabrication",
];

const COOKING_KEYWORDS: [&str; 16] = [
    "bake", "roast", "saute", "fry", "boil", "simmer", "whisk", "oven", "mixer", "recipe",
    "kitchen", "butter", "flour", "tablespoon", "teaspoon", "ingredient",
];

/// Registry holding the built-in `manufacturing` and `cooking` domains.
///
/// `modules` overrides a domain's module line-up by domain name; domains not
/// listed use their adapter's defaults.
///
/// # Errors
///
/// Returns an error if a domain fails to register.
pub fn build_default_registry(
    cascade: Arc<MatchCascade>,
    modules: &BTreeMap<String, OrchestratorConfig>,
) -> Result<DomainRegistry, DomainError> {
    let registry = DomainRegistry::new();

    register(
        &registry,
        DomainMetadata::new(manufacturing::DOMAIN, "Manufacturing")
            .with_description("Hardware design manifests (OKH) against facility records (OKW)")
            .with_input_types(["okh", "okw", "manifest", "facility"])
            .with_keywords(MANUFACTURING_KEYWORDS),
        orchestrator(
            manufacturing::ManufacturingAdapter,
            manufacturing::module_registry(),
            &cascade,
            modules.get(manufacturing::DOMAIN),
        ),
        &cascade,
    )?;

    register(
        &registry,
        DomainMetadata::new(cooking::DOMAIN, "Cooking")
            .with_description("Recipes against kitchens")
            .with_input_types(["recipe", "kitchen"])
            .with_keywords(COOKING_KEYWORDS),
        orchestrator(
            cooking::CookingAdapter,
            cooking::module_registry(),
            &cascade,
            modules.get(cooking::DOMAIN),
        ),
        &cascade,
    )?;

    Ok(registry)
}

fn orchestrator<A: DomainAdapter>(
    adapter: A,
    registry: ModuleRegistry<A>,
    cascade: &Arc<MatchCascade>,
    config: Option<&OrchestratorConfig>,
) -> Arc<dyn Orchestrate> {
    let mut orchestrator = match config {
        Some(config) => {
            DomainOrchestrator::with_config(adapter, registry, Arc::clone(cascade), config.clone())
        }
        None => DomainOrchestrator::new(adapter, registry, Arc::clone(cascade)),
    };
    let count = orchestrator.initialize();
    tracing::debug!("{} orchestrator ready with {} modules", orchestrator.domain(), count);
    Arc::new(orchestrator)
}

fn register(
    registry: &DomainRegistry,
    metadata: DomainMetadata,
    orchestrator: Arc<dyn Orchestrate>,
    cascade: &Arc<MatchCascade>,
) -> Result<(), DomainError> {
    let name = metadata.name.clone();
    registry.register_domain(
        metadata,
        Arc::new(JsonExtractor::new(&name)),
        Arc::new(CascadeMatcher::new(&name, Arc::clone(cascade))),
        Arc::new(SupplyTreeValidator::new(&name)),
        Some(orchestrator),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Capability, Facility, Requirement};
    use crate::domain::registry::{DetectionMethod, DetectionSubject};
    use crate::domain::{MatchStatus, ModuleSettings, TreeSource};
    use crate::matching::MatchingConfig;
    use crate::rules::RuleManager;

    fn cascade() -> Arc<MatchCascade> {
        Arc::new(MatchCascade::new(
            Arc::new(RuleManager::embedded().unwrap()),
            MatchingConfig::default(),
        ))
    }

    #[test]
    fn test_both_domains_registered() {
        let registry = build_default_registry(cascade(), &BTreeMap::new()).unwrap();
        let names: Vec<String> = registry.list_domains(false).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["cooking", "manufacturing"]);

        let detection = registry
            .detect_domain(&DetectionSubject {
                requirement_type: Some("okh".to_string()),
                capability_type: Some("OKW".to_string()),
                ..DetectionSubject::default()
            })
            .unwrap();
        assert_eq!(detection.domain, "manufacturing");
        assert_eq!(detection.method, DetectionMethod::TypeMapping);
    }

    #[tokio::test]
    async fn test_orchestrator_uses_domain_module() {
        let registry = build_default_registry(cascade(), &BTreeMap::new()).unwrap();
        let services = registry.get_domain_services("cooking").unwrap();
        let orchestrator = services.orchestrator.unwrap();

        let outcome = orchestrator
            .orchestrate(
                "toast",
                &[Requirement::new("bake")],
                &[Facility::new("k1", "Kitchen")
                    .with_capabilities(vec![Capability::new("oven roast", "technique")])],
            )
            .await;
        assert_eq!(outcome.status, MatchStatus::FullyMatched);
        assert!(!outcome.used_fallback);
        assert_eq!(
            outcome.trees[0].source,
            TreeSource::Module(cooking::TECHNIQUE_COVERAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_disabled_modules_fall_back_to_cascade() {
        let mut settings = ModuleSettings::new(manufacturing::PROCESS_COVERAGE, 0);
        settings.enabled = false;
        let modules = BTreeMap::from([(
            manufacturing::DOMAIN.to_string(),
            OrchestratorConfig {
                modules: vec![settings],
            },
        )]);
        let registry = build_default_registry(cascade(), &modules).unwrap();
        let orchestrator = registry
            .get_domain_services("manufacturing")
            .unwrap()
            .orchestrator
            .unwrap();

        let outcome = orchestrator
            .orchestrate(
                "bracket",
                &[Requirement::new("cnc")],
                &[Facility::new("shop", "Shop").with_capabilities(vec![Capability::new(
                    "computer numerical control",
                    "process",
                )])],
            )
            .await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.status, MatchStatus::FullyMatched);
        assert_eq!(outcome.trees[0].source, TreeSource::Cascade);
    }
}
