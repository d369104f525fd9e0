//! Manufacturing domain: design manifests (OKH) against facility records (OKW).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::core::types::{Capability, Facility, MatchType, Requirement};
use crate::domain::orchestrator::{
    DomainAdapter, MatchingModule, ModuleContext, ModuleError, ModuleOutcome, ModuleRegistry,
    ModuleSettings,
};
use crate::matching::normalize::normalize_label;
use crate::matching::tree_builder::{required_materials, TreeBuilder};
use crate::supply_tree::{MatchSummary, SupplyTreeError};

pub const DOMAIN: &str = "manufacturing";
pub const PROCESS_COVERAGE: &str = "process_coverage";

/// One manufacturing step of a design manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStep {
    /// Position of the originating requirement
    pub index: usize,
    pub process: String,
    pub materials: Vec<String>,
    pub tools: Vec<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturingManifest {
    pub id: String,
    pub steps: Vec<ProcessStep>,
    /// Normalized requirements the steps were built from
    pub requirements: Vec<Requirement>,
}

/// A facility record split by capability kind.
///
/// `processes` and `equipment` hold indices into `capabilities`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturingFacility {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub processes: Vec<usize>,
    pub equipment: Vec<usize>,
    /// Normalized material names the facility stocks
    pub materials: Vec<String>,
}

impl ManufacturingFacility {
    /// Capabilities a process step can be carried out with, in record order
    fn step_candidates(&self) -> impl Iterator<Item = (usize, &Capability)> {
        let mut indices: Vec<usize> = self.processes.iter().chain(&self.equipment).copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|i| self.capabilities.get(i).map(|c| (i, c)))
    }

    fn stocks(&self, material: &str) -> bool {
        let material = normalize_label(material);
        self.materials.iter().any(|m| *m == material)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManufacturingAdapter;

impl DomainAdapter for ManufacturingAdapter {
    type Manifest = ManufacturingManifest;
    type Facility = ManufacturingFacility;

    fn domain(&self) -> &str {
        DOMAIN
    }

    fn to_manifest(&self, manifest_id: &str, requirements: &[Requirement]) -> ManufacturingManifest {
        let steps = requirements
            .iter()
            .enumerate()
            .map(|(index, r)| ProcessStep {
                index,
                process: r.name.clone(),
                materials: r.materials(),
                tools: r.required_tools.clone(),
                optional: r.optional,
            })
            .collect();
        ManufacturingManifest {
            id: manifest_id.to_string(),
            steps,
            requirements: requirements.to_vec(),
        }
    }

    fn to_facility(&self, facility: &Facility) -> ManufacturingFacility {
        let mut processes = Vec::new();
        let mut equipment = Vec::new();
        let mut materials = Vec::new();
        for (i, capability) in facility.capabilities.iter().enumerate() {
            match capability.capability_type.to_lowercase().as_str() {
                "equipment" | "machine" | "tool" => equipment.push(i),
                "material" => materials.push(normalize_label(&capability.name)),
                _ => processes.push(i),
            }
        }
        ManufacturingFacility {
            id: facility.id.clone(),
            name: facility.name.clone(),
            capabilities: facility.capabilities.clone(),
            processes,
            equipment,
            materials,
        }
    }

    fn default_modules(&self) -> Vec<ModuleSettings> {
        vec![ModuleSettings::new(PROCESS_COVERAGE, 10)]
    }
}

/// Module registry with every manufacturing module
#[must_use]
pub fn module_registry() -> ModuleRegistry<ManufacturingAdapter> {
    let mut registry = ModuleRegistry::new();
    registry.register(PROCESS_COVERAGE, |settings: &ModuleSettings| {
        Ok(Box::new(ProcessCoverageModule::from_settings(settings)?)
            as Box<dyn MatchingModule<ManufacturingAdapter>>)
    });
    registry
}

/// Builds a tree when the facility can carry out the manifest's process steps.
///
/// Options:
/// - `require_all` (bool, default true): every non-optional step must be covered
/// - `check_materials` (bool, default false): a step only counts as covered
///   if the facility stocks all of its materials
/// - `min_confidence` (0..=1, default 0.0): trees below this are dropped
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCoverageModule {
    require_all: bool,
    check_materials: bool,
    min_confidence: f64,
}

impl Default for ProcessCoverageModule {
    fn default() -> Self {
        Self {
            require_all: true,
            check_materials: false,
            min_confidence: 0.0,
        }
    }
}

impl ProcessCoverageModule {
    /// # Errors
    ///
    /// Returns an error if an option has the wrong type or range.
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self, ModuleError> {
        let defaults = Self::default();
        Ok(Self {
            require_all: settings.bool_option("require_all", defaults.require_all)?,
            check_materials: settings.bool_option("check_materials", defaults.check_materials)?,
            min_confidence: settings.fraction_option("min_confidence", defaults.min_confidence)?,
        })
    }

    fn failed(source: SupplyTreeError) -> ModuleError {
        ModuleError::Failed {
            key: PROCESS_COVERAGE.to_string(),
            reason: source.to_string(),
        }
    }
}

struct CoveredStep<'a> {
    step: &'a ProcessStep,
    capability_index: usize,
    capability: &'a str,
    confidence: f64,
    match_type: MatchType,
}

#[async_trait]
impl MatchingModule<ManufacturingAdapter> for ProcessCoverageModule {
    fn key(&self) -> &str {
        PROCESS_COVERAGE
    }

    async fn match_facility(
        &self,
        manifest: &ManufacturingManifest,
        facility: &ManufacturingFacility,
        context: &ModuleContext,
    ) -> Result<Option<ModuleOutcome>, ModuleError> {
        let mut covered = Vec::new();
        let mut missing_required = 0usize;

        for step in &manifest.steps {
            let hit = context.best_match(&step.process, facility.step_candidates());
            let materials_ok = !self.check_materials || step.materials.iter().all(|m| facility.stocks(m));

            match hit {
                Some((capability_index, capability, result)) if materials_ok => {
                    covered.push(CoveredStep {
                        step,
                        capability_index,
                        capability: &capability.name,
                        confidence: result.confidence,
                        match_type: result.match_type,
                    });
                }
                _ if !step.optional => missing_required += 1,
                _ => {}
            }
        }

        if covered.is_empty() || (self.require_all && missing_required > 0) {
            tracing::debug!(
                "{}: '{}' covers {}/{} steps",
                PROCESS_COVERAGE,
                facility.id,
                covered.len(),
                manifest.steps.len()
            );
            return Ok(None);
        }

        let coverage = crate::utils::ratio(
            crate::utils::count_to_f64(covered.len()),
            crate::utils::count_to_f64(manifest.steps.len()),
        );
        let mean = crate::utils::ratio(
            covered.iter().map(|c| c.confidence).sum(),
            crate::utils::count_to_f64(covered.len()),
        );
        let confidence = crate::core::types::clamp_confidence(mean * coverage);
        if confidence < self.min_confidence {
            return Ok(None);
        }

        let mut builder = TreeBuilder::new(&manifest.id, &facility.id, &facility.name);
        for c in &covered {
            let inputs = BTreeMap::from([
                ("materials".to_string(), json!(c.step.materials)),
                ("tools".to_string(), json!(c.step.tools)),
            ]);
            let outputs = BTreeMap::from([
                ("satisfied_by".to_string(), Value::String(c.capability.to_string())),
                ("match_type".to_string(), json!(c.match_type)),
                ("confidence".to_string(), json!(c.confidence)),
            ]);
            builder
                .add_step(&c.step.process, c.step.index, Some(c.capability_index), inputs, outputs)
                .map_err(Self::failed)?;
        }
        let requirements = serde_json::to_value(&manifest.requirements)
            .map_err(|e| Self::failed(e.into()))?;
        let capabilities = serde_json::to_value(&facility.capabilities)
            .map_err(|e| Self::failed(e.into()))?;
        builder
            .snapshot_requirements(requirements)
            .snapshot_capabilities(&facility.name, capabilities)
            .metadata("domain", json!(DOMAIN))
            .metadata("module", json!(PROCESS_COVERAGE));

        let mut matched_capabilities: Vec<String> = Vec::new();
        for c in &covered {
            if !matched_capabilities.iter().any(|m| m == c.capability) {
                matched_capabilities.push(c.capability.to_string());
            }
        }
        let tree = builder
            .finish(MatchSummary {
                facility_id: facility.id.clone(),
                facility_name: facility.name.clone(),
                confidence,
                matched_capabilities,
                required_materials: required_materials(&manifest.requirements),
                match_type: MatchType::weakest(covered.iter().map(|c| c.match_type)),
            })
            .map_err(Self::failed)?;

        Ok(Some(ModuleOutcome { tree, confidence }))
    }
}
