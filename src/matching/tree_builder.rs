use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::core::types::{Facility, Requirement};
use crate::core::uri::ResourceUri;
use crate::matching::engine::FacilityEvaluation;
use crate::supply_tree::{MatchSummary, SupplyTree, SupplyTreeError, Workflow, WorkflowNode};

/// Reference to requirement `index` of manifest `manifest_id`
#[must_use]
pub fn requirement_uri(manifest_id: &str, index: usize) -> ResourceUri {
    ResourceUri::requirement(manifest_id)
        .join("requirements")
        .join(index.to_string())
}

/// Reference to capability `index` of facility `facility_id`
#[must_use]
pub fn capability_uri(facility_id: &str, index: usize) -> ResourceUri {
    ResourceUri::capability(facility_id)
        .join("capabilities")
        .join(index.to_string())
}

/// Incremental builder for a single-workflow supply tree.
///
/// Steps are chained in the order they are added. [`finish`](Self::finish)
/// checks every node reference against the snapshots before handing the
/// tree out.
pub struct TreeBuilder {
    tree: SupplyTree,
    workflow: Workflow,
    manifest_id: String,
    facility_id: String,
    previous: Option<String>,
}

impl TreeBuilder {
    pub fn new(manifest_id: &str, facility_id: &str, facility_name: &str) -> Self {
        Self {
            tree: SupplyTree::new(),
            workflow: Workflow::new(format!("{manifest_id} at {facility_name}")),
            manifest_id: manifest_id.to_string(),
            facility_id: facility_id.to_string(),
            previous: None,
        }
    }

    /// Append a step satisfying requirement `requirement_index` with
    /// capability `capability_index`, after the previous step.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be added to the workflow.
    pub fn add_step(
        &mut self,
        name: &str,
        requirement_index: usize,
        capability_index: Option<usize>,
        inputs: BTreeMap<String, Value>,
        outputs: BTreeMap<String, Value>,
    ) -> Result<&mut Self, SupplyTreeError> {
        let mut node = WorkflowNode::new(name)
            .with_requirement_ref(requirement_uri(&self.manifest_id, requirement_index));
        if let Some(capability_index) = capability_index {
            node = node.with_capability_ref(capability_uri(&self.facility_id, capability_index));
        }
        node.input_requirements = inputs;
        node.output_specifications = outputs;

        let node_id = node.id.clone();
        self.workflow.add_node(node, self.previous.iter())?;
        self.previous = Some(node_id);
        Ok(self)
    }

    /// Snapshot the requirement-space document; `requirements` must be
    /// indexable by the requirement indices used in steps
    pub fn snapshot_requirements(&mut self, requirements: Value) -> &mut Self {
        self.tree.add_snapshot(
            ResourceUri::requirement(&self.manifest_id),
            json!({"id": self.manifest_id, "requirements": requirements}),
        );
        self
    }

    /// Snapshot the capability-space document; `capabilities` must be
    /// indexable by the capability indices used in steps
    pub fn snapshot_capabilities(&mut self, name: &str, capabilities: Value) -> &mut Self {
        self.tree.add_snapshot(
            ResourceUri::capability(&self.facility_id),
            json!({"id": self.facility_id, "name": name, "capabilities": capabilities}),
        );
        self
    }

    pub fn metadata(&mut self, key: &str, value: Value) -> &mut Self {
        self.tree.metadata.insert(key.to_string(), value);
        self
    }

    /// # Errors
    ///
    /// Returns an error if the workflow is cyclic or a node reference does
    /// not resolve through the snapshots.
    pub fn finish(self, summary: MatchSummary) -> Result<SupplyTree, SupplyTreeError> {
        let Self {
            mut tree,
            workflow,
            manifest_id,
            ..
        } = self;

        tree.metadata
            .insert("manifest_id".to_string(), json!(manifest_id));
        tree.metadata
            .insert("workflow_id".to_string(), json!(workflow.id));
        tree.add_workflow(workflow)?;
        tree.summary = Some(summary);

        let unresolved: Vec<String> = tree
            .unresolved_references()
            .into_iter()
            .map(|(_, _, uri)| uri.to_string())
            .collect();
        if !unresolved.is_empty() {
            return Err(SupplyTreeError::UnresolvedReferences {
                tree: tree.id.clone(),
                references: unresolved,
            });
        }
        Ok(tree)
    }
}

/// Build the supply tree for one evaluated facility.
///
/// Matched requirements become a chain of workflow nodes in manifest order,
/// each referencing its requirement and the capability that satisfied it.
///
/// # Errors
///
/// Returns an error if the workflow cannot be built, the inputs cannot be
/// snapshotted, or a node reference does not resolve.
pub fn build_supply_tree(
    manifest_id: &str,
    requirements: &[Requirement],
    facility: &Facility,
    evaluation: &FacilityEvaluation,
    domain: &str,
) -> Result<SupplyTree, SupplyTreeError> {
    let mut builder = TreeBuilder::new(manifest_id, &facility.id, &facility.name);

    for outcome in evaluation.outcomes.iter().filter(|o| o.is_matched()) {
        let Some(requirement) = requirements.get(outcome.requirement_index) else {
            continue;
        };
        let outputs = BTreeMap::from([
            (
                "satisfied_by".to_string(),
                Value::String(outcome.result.capability.clone()),
            ),
            ("match_type".to_string(), json!(outcome.result.match_type)),
            ("confidence".to_string(), json!(outcome.result.confidence)),
        ]);
        builder.add_step(
            &requirement.name,
            outcome.requirement_index,
            outcome.capability_index,
            requirement.parameters.clone(),
            outputs,
        )?;
    }

    builder
        .snapshot_requirements(serde_json::to_value(requirements)?)
        .snapshot_capabilities(&facility.name, serde_json::to_value(&facility.capabilities)?)
        .metadata("domain", json!(domain))
        .metadata("match_results", serde_json::to_value(&evaluation.outcomes)?);
    if evaluation.semantic_degraded {
        builder.metadata("semantic_degraded", json!(true));
    }

    builder.finish(MatchSummary {
        facility_id: facility.id.clone(),
        facility_name: facility.name.clone(),
        confidence: evaluation.score.confidence,
        matched_capabilities: matched_capabilities(evaluation),
        required_materials: required_materials(requirements),
        match_type: evaluation.score.match_type,
    })
}

/// Distinct satisfying capability names, in manifest order
fn matched_capabilities(evaluation: &FacilityEvaluation) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for outcome in evaluation.outcomes.iter().filter(|o| o.is_matched()) {
        if !names.contains(&outcome.result.capability) {
            names.push(outcome.result.capability.clone());
        }
    }
    names
}

/// Distinct materials named by the requirements, in manifest order
#[must_use]
pub fn required_materials(requirements: &[Requirement]) -> Vec<String> {
    let mut materials: Vec<String> = Vec::new();
    for material in requirements.iter().flat_map(Requirement::materials) {
        if !materials.contains(&material) {
            materials.push(material);
        }
    }
    materials
}
