//! Cooking domain: recipes against kitchens.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::core::types::{clamp_confidence, Capability, Facility, MatchType, Requirement};
use crate::domain::orchestrator::{
    DomainAdapter, MatchingModule, ModuleContext, ModuleError, ModuleOutcome, ModuleRegistry,
    ModuleSettings,
};
use crate::matching::tree_builder::TreeBuilder;
use crate::supply_tree::{MatchSummary, SupplyTreeError};
use crate::utils::{count_to_f64, ratio};

pub const DOMAIN: &str = "cooking";
pub const TECHNIQUE_COVERAGE: &str = "technique_coverage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeStep {
    pub index: usize,
    pub technique: String,
    pub equipment: Vec<String>,
    pub ingredients: Vec<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub id: String,
    pub steps: Vec<RecipeStep>,
    pub requirements: Vec<Requirement>,
}

/// A kitchen; the index lists point into `capabilities`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kitchen {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub techniques: Vec<usize>,
    pub appliances: Vec<usize>,
    pub pantry: Vec<usize>,
}

impl Kitchen {
    fn pick<'a>(
        &'a self,
        indices: &'a [usize],
    ) -> impl Iterator<Item = (usize, &'a Capability)> + Clone + 'a {
        indices
            .iter()
            .filter_map(|&i| self.capabilities.get(i).map(|c| (i, c)))
    }
}

/// Ingredients listed under `ingredients`, falling back to `material(s)`
fn ingredients(requirement: &Requirement) -> Vec<String> {
    match requirement.parameters.get("ingredients") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => requirement.materials(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CookingAdapter;

impl DomainAdapter for CookingAdapter {
    type Manifest = Recipe;
    type Facility = Kitchen;

    fn domain(&self) -> &str {
        DOMAIN
    }

    fn to_manifest(&self, manifest_id: &str, requirements: &[Requirement]) -> Recipe {
        Recipe {
            id: manifest_id.to_string(),
            steps: requirements
                .iter()
                .enumerate()
                .map(|(index, r)| RecipeStep {
                    index,
                    technique: r.name.clone(),
                    equipment: r.required_tools.clone(),
                    ingredients: ingredients(r),
                    optional: r.optional,
                })
                .collect(),
            requirements: requirements.to_vec(),
        }
    }

    fn to_facility(&self, facility: &Facility) -> Kitchen {
        let mut kitchen = Kitchen {
            id: facility.id.clone(),
            name: facility.name.clone(),
            capabilities: facility.capabilities.clone(),
            techniques: Vec::new(),
            appliances: Vec::new(),
            pantry: Vec::new(),
        };
        for (i, capability) in facility.capabilities.iter().enumerate() {
            match capability.capability_type.to_lowercase().as_str() {
                "equipment" | "appliance" | "tool" => kitchen.appliances.push(i),
                "ingredient" | "material" => kitchen.pantry.push(i),
                _ => kitchen.techniques.push(i),
            }
        }
        kitchen
    }

    fn default_modules(&self) -> Vec<ModuleSettings> {
        vec![ModuleSettings::new(TECHNIQUE_COVERAGE, 10)]
    }
}

#[must_use]
pub fn module_registry() -> ModuleRegistry<CookingAdapter> {
    let mut registry = ModuleRegistry::new();
    registry.register(TECHNIQUE_COVERAGE, |settings: &ModuleSettings| {
        Ok(Box::new(TechniqueCoverageModule::from_settings(settings)?)
            as Box<dyn MatchingModule<CookingAdapter>>)
    });
    registry
}

/// A kitchen can cook a recipe when it covers each step's technique and,
/// optionally, its equipment and ingredients.
///
/// Options: `check_equipment` (default true), `check_ingredients` (default
/// false), `allow_partial` (default false).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechniqueCoverageModule {
    check_equipment: bool,
    check_ingredients: bool,
    allow_partial: bool,
}

impl Default for TechniqueCoverageModule {
    fn default() -> Self {
        Self {
            check_equipment: true,
            check_ingredients: false,
            allow_partial: false,
        }
    }
}

impl TechniqueCoverageModule {
    /// # Errors
    ///
    /// Returns an error if an option is not a boolean.
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self, ModuleError> {
        let defaults = Self::default();
        Ok(Self {
            check_equipment: settings.bool_option("check_equipment", defaults.check_equipment)?,
            check_ingredients: settings
                .bool_option("check_ingredients", defaults.check_ingredients)?,
            allow_partial: settings.bool_option("allow_partial", defaults.allow_partial)?,
        })
    }

    /// Weakest match type of every label in `labels`, or `None` if one is missing
    fn cover_all<'a>(
        context: &ModuleContext,
        labels: &[String],
        candidates: impl Iterator<Item = (usize, &'a Capability)> + Clone,
    ) -> Option<Vec<MatchType>> {
        labels
            .iter()
            .map(|label| {
                candidates
                    .clone()
                    .find_map(|(_, c)| context.labels_match(label, c))
                    .map(|r| r.match_type)
            })
            .collect()
    }

    fn failed(source: SupplyTreeError) -> ModuleError {
        ModuleError::Failed {
            key: TECHNIQUE_COVERAGE.to_string(),
            reason: source.to_string(),
        }
    }
}

struct CookedStep<'a> {
    step: &'a RecipeStep,
    capability_index: usize,
    capability: &'a str,
    confidence: f64,
    match_type: MatchType,
}

#[async_trait]
impl MatchingModule<CookingAdapter> for TechniqueCoverageModule {
    fn key(&self) -> &str {
        TECHNIQUE_COVERAGE
    }

    async fn match_facility(
        &self,
        recipe: &Recipe,
        kitchen: &Kitchen,
        context: &ModuleContext,
    ) -> Result<Option<ModuleOutcome>, ModuleError> {
        let mut cooked = Vec::new();
        let mut missing = 0usize;

        for step in &recipe.steps {
            let technique = context.best_match(&step.technique, kitchen.pick(&kitchen.techniques));
            let equipment = if self.check_equipment {
                Self::cover_all(context, &step.equipment, kitchen.pick(&kitchen.appliances))
            } else {
                Some(Vec::new())
            };
            let ingredients = if self.check_ingredients {
                Self::cover_all(context, &step.ingredients, kitchen.pick(&kitchen.pantry))
            } else {
                Some(Vec::new())
            };

            match (technique, equipment, ingredients) {
                (Some((capability_index, capability, result)), Some(tools), Some(pantry)) => {
                    let match_type = MatchType::weakest(
                        std::iter::once(result.match_type).chain(tools).chain(pantry),
                    );
                    cooked.push(CookedStep {
                        step,
                        capability_index,
                        capability: &capability.name,
                        confidence: result.confidence,
                        match_type,
                    });
                }
                _ if !step.optional => missing += 1,
                _ => {}
            }
        }

        if cooked.is_empty() || (missing > 0 && !self.allow_partial) {
            return Ok(None);
        }

        let coverage = ratio(count_to_f64(cooked.len()), count_to_f64(recipe.steps.len()));
        let mean = ratio(
            cooked.iter().map(|c| c.confidence).sum(),
            count_to_f64(cooked.len()),
        );
        let confidence = clamp_confidence(mean * coverage);

        let mut builder = TreeBuilder::new(&recipe.id, &kitchen.id, &kitchen.name);
        for c in &cooked {
            let inputs = BTreeMap::from([
                ("equipment".to_string(), json!(c.step.equipment)),
                ("ingredients".to_string(), json!(c.step.ingredients)),
            ]);
            let outputs = BTreeMap::from([
                ("technique".to_string(), Value::String(c.capability.to_string())),
                ("match_type".to_string(), json!(c.match_type)),
            ]);
            builder
                .add_step(&c.step.technique, c.step.index, Some(c.capability_index), inputs, outputs)
                .map_err(Self::failed)?;
        }
        let requirements =
            serde_json::to_value(&recipe.requirements).map_err(|e| Self::failed(e.into()))?;
        let capabilities =
            serde_json::to_value(&kitchen.capabilities).map_err(|e| Self::failed(e.into()))?;
        builder
            .snapshot_requirements(requirements)
            .snapshot_capabilities(&kitchen.name, capabilities)
            .metadata("domain", json!(DOMAIN))
            .metadata("module", json!(TECHNIQUE_COVERAGE));

        let mut techniques: Vec<String> = Vec::new();
        for c in &cooked {
            if !techniques.iter().any(|t| t == c.capability) {
                techniques.push(c.capability.to_string());
            }
        }
        let mut ingredients_needed: Vec<String> = Vec::new();
        for ingredient in recipe.steps.iter().flat_map(|s| &s.ingredients) {
            if !ingredients_needed.contains(ingredient) {
                ingredients_needed.push(ingredient.clone());
            }
        }

        let tree = builder
            .finish(MatchSummary {
                facility_id: kitchen.id.clone(),
                facility_name: kitchen.name.clone(),
                confidence,
                matched_capabilities: techniques,
                required_materials: ingredients_needed,
                match_type: MatchType::weakest(cooked.iter().map(|c| c.match_type)),
            })
            .map_err(Self::failed)?;

        Ok(Some(ModuleOutcome { tree, confidence }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{MatchCascade, MatchingConfig};
    use crate::rules::RuleManager;
    use std::sync::Arc;

    fn context() -> ModuleContext {
        let cascade = MatchCascade::new(
            Arc::new(RuleManager::embedded().unwrap()),
            MatchingConfig::default(),
        );
        ModuleContext::new(Arc::new(cascade), DOMAIN)
    }

    fn kitchen() -> Kitchen {
        CookingAdapter.to_facility(&Facility::new("k1", "Test Kitchen").with_capabilities(vec![
            Capability::new("pan fry", "technique"),
            Capability::new("hand mixer", "appliance"),
            Capability::new("margarine", "ingredient"),
        ]))
    }

    fn omelette() -> Recipe {
        CookingAdapter.to_manifest(
            "omelette",
            &[Requirement::new("saute")
                .with_tools(["whisk"])
                .with_parameter("ingredients", json!(["butter"]))],
        )
    }

    #[test]
    fn test_adapter() {
        let kitchen = kitchen();
        assert_eq!(kitchen.techniques, vec![0]);
        assert_eq!(kitchen.appliances, vec![1]);
        assert_eq!(kitchen.pantry, vec![2]);
        assert_eq!(omelette().steps[0].ingredients, vec!["butter"]);
        assert_eq!(omelette().steps[0].equipment, vec!["whisk"]);
    }

    #[tokio::test]
    async fn test_equipment_substitution_weakens_step() {
        let outcome = TechniqueCoverageModule::default()
            .match_facility(&omelette(), &kitchen(), &context())
            .await
            .unwrap()
            .unwrap();
        let summary = outcome.tree.summary.as_ref().unwrap();
        assert_eq!(summary.match_type, MatchType::Substitution);
        assert_eq!(summary.matched_capabilities, vec!["pan fry"]);
        assert_eq!(summary.required_materials, vec!["butter"]);
        assert!((outcome.confidence - 0.85).abs() < 1e-9);
        assert!(outcome.tree.validate().is_valid());
    }

    #[tokio::test]
    async fn test_missing_equipment_and_ingredients() {
        let bare = CookingAdapter.to_facility(
            &Facility::new("k2", "Bare Kitchen")
                .with_capabilities(vec![Capability::new("pan fry", "technique")]),
        );
        assert!(TechniqueCoverageModule::default()
            .match_facility(&omelette(), &bare, &context())
            .await
            .unwrap()
            .is_none());

        let lenient = TechniqueCoverageModule::from_settings(
            &ModuleSettings::new(TECHNIQUE_COVERAGE, 0).with_option("check_equipment", false),
        )
        .unwrap();
        assert!(lenient
            .match_facility(&omelette(), &bare, &context())
            .await
            .unwrap()
            .is_some());

        let strict = TechniqueCoverageModule::from_settings(
            &ModuleSettings::new(TECHNIQUE_COVERAGE, 0)
                .with_option("check_equipment", false)
                .with_option("check_ingredients", true),
        )
        .unwrap();
        assert!(strict
            .match_facility(&omelette(), &bare, &context())
            .await
            .unwrap()
            .is_none());
        assert!(strict
            .match_facility(&omelette(), &kitchen(), &context())
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_bad_option_type() {
        let settings = ModuleSettings::new(TECHNIQUE_COVERAGE, 0).with_option("allow_partial", "yes");
        assert!(matches!(
            module_registry().create(&settings),
            Err(ModuleError::InvalidSettings { .. })
        ));
    }
}
