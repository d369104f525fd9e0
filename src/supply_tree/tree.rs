use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::types::MatchType;
use crate::core::uri::ResourceUri;
use crate::supply_tree::snapshot::ResourceSnapshot;
use crate::supply_tree::workflow::Workflow;
use crate::supply_tree::SupplyTreeError;

/// Link from a node in one workflow to a node in another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConnection {
    pub source_workflow: String,
    pub source_node: String,
    pub target_workflow: String,
    pub target_node: String,
    pub connection_type: String,
}

impl WorkflowConnection {
    pub fn new(
        source: (&str, &str),
        target: (&str, &str),
        connection_type: impl Into<String>,
    ) -> Self {
        Self {
            source_workflow: source.0.to_string(),
            source_node: source.1.to_string(),
            target_workflow: target.0.to_string(),
            target_node: target.1.to_string(),
            connection_type: connection_type.into(),
        }
    }
}

/// Which facility a tree was built for and how well it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub facility_id: String,
    pub facility_name: String,
    pub confidence: f64,
    #[serde(default)]
    pub matched_capabilities: Vec<String>,
    #[serde(default)]
    pub required_materials: Vec<String>,
    /// Weakest tier any matched requirement relied on
    pub match_type: MatchType,
}

/// Outcome of [`SupplyTree::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeValidation {
    pub issues: Vec<String>,
}

impl TreeValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A production plan: workflows, their connections and the snapshots their
/// nodes reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyTree {
    pub id: String,

    #[serde(default)]
    workflows: BTreeMap<String, Workflow>,

    #[serde(default)]
    connections: Vec<WorkflowConnection>,

    /// Keyed by canonical URI string
    #[serde(default)]
    snapshots: BTreeMap<String, ResourceSnapshot>,

    pub creation_time: DateTime<Utc>,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MatchSummary>,
}

impl Default for SupplyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SupplyTree {
    /// Empty tree with a fresh random id
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflows: BTreeMap::new(),
            connections: Vec::new(),
            snapshots: BTreeMap::new(),
            creation_time: Utc::now(),
            metadata: BTreeMap::new(),
            summary: None,
        }
    }

    /// Add (or replace) a workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not acyclic.
    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<(), SupplyTreeError> {
        if !workflow.validate() {
            return Err(SupplyTreeError::InvalidWorkflow(workflow.id));
        }
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Connect two workflow nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either workflow or either node does not exist.
    pub fn connect_workflows(&mut self, connection: WorkflowConnection) -> Result<(), SupplyTreeError> {
        self.check_endpoint(&connection.source_workflow, &connection.source_node)?;
        self.check_endpoint(&connection.target_workflow, &connection.target_node)?;
        self.connections.push(connection);
        Ok(())
    }

    fn check_endpoint(&self, workflow_id: &str, node_id: &str) -> Result<(), SupplyTreeError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| SupplyTreeError::UnknownWorkflow(workflow_id.to_string()))?;
        if workflow.node(node_id).is_none() {
            return Err(SupplyTreeError::UnknownNode(node_id.to_string()));
        }
        Ok(())
    }

    /// Snapshot `content` under `uri`; a second snapshot of the same URI replaces the first
    pub fn add_snapshot(&mut self, uri: ResourceUri, content: Value) -> &ResourceSnapshot {
        self.insert_snapshot(ResourceSnapshot::new(uri, content))
    }

    pub fn insert_snapshot(&mut self, snapshot: ResourceSnapshot) -> &ResourceSnapshot {
        let key = snapshot.uri.to_string();
        self.snapshots.insert(key.clone(), snapshot);
        &self.snapshots[&key]
    }

    #[must_use]
    pub fn snapshot(&self, uri: &ResourceUri) -> Option<&ResourceSnapshot> {
        self.snapshots.get(&uri.to_string())
    }

    /// Resolve a reference through the snapshots.
    ///
    /// An exact snapshot of `uri` wins; otherwise the snapshot of the
    /// document-level URI is navigated by the reference's path and fragment.
    #[must_use]
    pub fn resolve(&self, uri: &ResourceUri) -> Option<&Value> {
        if let Some(snapshot) = self.snapshots.get(&uri.to_string()) {
            return (!snapshot.content.is_null()).then_some(&snapshot.content);
        }
        self.snapshots
            .get(&uri.base().to_string())
            .and_then(|snapshot| snapshot.resolve(uri))
    }

    /// True iff every node reference resolves to a non-null snapshot value
    #[must_use]
    pub fn validate_snapshot(&self) -> bool {
        self.unresolved_references().is_empty()
    }

    /// References no snapshot resolves, as `(workflow id, node id, uri)`
    #[must_use]
    pub fn unresolved_references(&self) -> Vec<(&str, &str, &ResourceUri)> {
        self.workflows
            .values()
            .flat_map(|workflow| {
                workflow.nodes().flat_map(move |node| {
                    node.references()
                        .map(move |uri| (workflow.id.as_str(), node.id.as_str(), uri))
                })
            })
            .filter(|(_, _, uri)| self.resolve(uri).is_none())
            .collect()
    }

    /// Full structural check: acyclic workflows, resolvable connections and snapshots
    #[must_use]
    pub fn validate(&self) -> TreeValidation {
        let mut issues = Vec::new();

        for workflow in self.workflows.values() {
            if !workflow.validate() {
                issues.push(format!("Workflow '{}' contains a cycle", workflow.id));
            }
        }

        for connection in &self.connections {
            for (workflow_id, node_id) in [
                (&connection.source_workflow, &connection.source_node),
                (&connection.target_workflow, &connection.target_node),
            ] {
                if let Err(e) = self.check_endpoint(workflow_id, node_id) {
                    issues.push(format!("Connection endpoint {workflow_id}/{node_id}: {e}"));
                }
            }
        }

        for (workflow_id, node_id, uri) in self.unresolved_references() {
            issues.push(format!(
                "Node '{node_id}' in workflow '{workflow_id}' references unresolvable {uri}"
            ));
        }

        TreeValidation { issues }
    }

    #[must_use]
    pub fn workflow(&self, id: &str) -> Option<&Workflow> {
        self.workflows.get(id)
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    #[must_use]
    pub fn connections(&self) -> &[WorkflowConnection] {
        &self.connections
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &ResourceSnapshot> {
        self.snapshots.values()
    }

    /// Identity of the facility this tree was built for
    #[must_use]
    pub fn facility_id(&self) -> Option<&str> {
        self.summary.as_ref().map(|s| s.facility_id.as_str())
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, SupplyTreeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if the document is malformed, a workflow in it is
    /// cyclic, or a workflow or snapshot is stored under a key other than its
    /// own id.
    pub fn from_json(json: &str) -> Result<Self, SupplyTreeError> {
        let tree: Self = serde_json::from_str(json)?;
        tree.check_keys()?;
        Ok(tree)
    }

    fn check_keys(&self) -> Result<(), SupplyTreeError> {
        for (key, workflow) in &self.workflows {
            if *key != workflow.id {
                return Err(SupplyTreeError::MismatchedKey {
                    kind: "Workflow",
                    key: key.clone(),
                    id: workflow.id.clone(),
                });
            }
        }
        for (key, snapshot) in &self.snapshots {
            let uri = snapshot.uri.to_string();
            if *key != uri {
                return Err(SupplyTreeError::MismatchedKey {
                    kind: "Snapshot",
                    key: key.clone(),
                    id: uri,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply_tree::workflow::WorkflowNode;
    use serde_json::json;

    fn tree_with_refs() -> SupplyTree {
        let mut workflow = Workflow::with_id("wf", "main");
        let node = WorkflowNode::with_id("n1", "cnc milling")
            .with_requirement_ref(ResourceUri::requirement("widget").join("requirements").join("0"))
            .with_capability_ref(ResourceUri::capability("shop").join("capabilities").join("0"));
        workflow.add_node(node, Vec::<&str>::new()).unwrap();

        let mut tree = SupplyTree::with_id("tree");
        tree.add_workflow(workflow).unwrap();
        tree
    }

    #[test]
    fn test_validate_snapshot_requires_every_reference() {
        let mut tree = tree_with_refs();
        assert!(!tree.validate_snapshot());

        tree.add_snapshot(
            ResourceUri::requirement("widget"),
            json!({"requirements": [{"name": "cnc milling"}]}),
        );
        assert!(!tree.validate_snapshot());
        assert_eq!(tree.unresolved_references().len(), 1);

        tree.add_snapshot(
            ResourceUri::capability("shop"),
            json!({"capabilities": [{"name": "milling"}]}),
        );
        assert!(tree.validate_snapshot());
        assert!(tree.validate().is_valid());
    }

    #[test]
    fn test_null_snapshot_value_is_invalid() {
        let mut tree = tree_with_refs();
        tree.add_snapshot(ResourceUri::requirement("widget"), json!({"requirements": [null]}));
        tree.add_snapshot(
            ResourceUri::capability("shop"),
            json!({"capabilities": [{"name": "milling"}]}),
        );
        assert!(!tree.validate_snapshot());
    }

    #[test]
    fn test_snapshot_overwrite() {
        let mut tree = SupplyTree::new();
        let uri = ResourceUri::requirement("widget");
        tree.add_snapshot(uri.clone(), json!({"v": 1}));
        tree.add_snapshot(uri.clone(), json!({"v": 2}));
        assert_eq!(tree.snapshots().count(), 1);
        assert_eq!(tree.snapshot(&uri).unwrap().content["v"], 2);
    }

    #[test]
    fn test_connect_workflows_checks_endpoints() {
        let mut tree = tree_with_refs();
        let mut second = Workflow::with_id("wf2", "finishing");
        second
            .add_node(WorkflowNode::with_id("n2", "anodizing"), Vec::<&str>::new())
            .unwrap();
        tree.add_workflow(second).unwrap();

        tree.connect_workflows(WorkflowConnection::new(("wf", "n1"), ("wf2", "n2"), "sequential"))
            .unwrap();
        assert_eq!(tree.connections().len(), 1);

        assert!(matches!(
            tree.connect_workflows(WorkflowConnection::new(("wf", "n1"), ("nope", "n2"), "x")),
            Err(SupplyTreeError::UnknownWorkflow(_))
        ));
        assert!(matches!(
            tree.connect_workflows(WorkflowConnection::new(("wf", "zz"), ("wf2", "n2"), "x")),
            Err(SupplyTreeError::UnknownNode(_))
        ));
        assert_eq!(tree.connections().len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let mut tree = tree_with_refs();
        tree.add_snapshot(
            ResourceUri::requirement("widget"),
            json!({"requirements": [{"name": "cnc milling"}]}),
        );
        tree.metadata.insert("domain".to_string(), json!("manufacturing"));
        tree.summary = Some(MatchSummary {
            facility_id: "shop".to_string(),
            facility_name: "Shop".to_string(),
            confidence: 0.9,
            matched_capabilities: vec!["milling".to_string()],
            required_materials: vec![],
            match_type: MatchType::Heuristic,
        });

        let json = tree.to_json().unwrap();
        let back = SupplyTree::from_json(&json).unwrap();
        assert_eq!(back, tree);

        let doc: Value = serde_json::from_str(&json).unwrap();
        assert!(doc["snapshots"]["requirement-space://widget"]["timestamp"].is_string());
        assert_eq!(doc["workflows"]["wf"]["nodes"][0]["id"], "n1");
    }

    #[test]
    fn test_from_json_rejects_mismatched_keys() {
        let mut tree = tree_with_refs();
        tree.add_snapshot(ResourceUri::requirement("widget"), json!({"requirements": []}));
        let doc: Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();

        let mut renamed = doc.clone();
        let workflow = renamed["workflows"]["wf"].take();
        renamed["workflows"] = json!({ "other": workflow });
        assert!(matches!(
            SupplyTree::from_json(&renamed.to_string()),
            Err(SupplyTreeError::MismatchedKey { kind: "Workflow", .. })
        ));

        let mut moved = doc;
        let snapshot = moved["snapshots"]["requirement-space://widget"].take();
        moved["snapshots"] = json!({ "requirement-space://gadget": snapshot });
        assert!(matches!(
            SupplyTree::from_json(&moved.to_string()),
            Err(SupplyTreeError::MismatchedKey { kind: "Snapshot", .. })
        ));
    }
}
