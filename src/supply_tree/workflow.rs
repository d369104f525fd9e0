use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use crate::core::uri::ResourceUri;
use crate::supply_tree::SupplyTreeError;

/// One step of a production workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,

    pub name: String,

    /// What this step needs, as references into requirement-space documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirement_refs: Vec<ResourceUri>,

    /// What satisfies it, as references into capability-space documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_refs: Vec<ResourceUri>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_requirements: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_specifications: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<Duration>,
}

impl WorkflowNode {
    /// Node with a fresh random id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            requirement_refs: Vec::new(),
            capability_refs: Vec::new(),
            input_requirements: BTreeMap::new(),
            output_specifications: BTreeMap::new(),
            estimated_time: None,
        }
    }

    #[must_use]
    pub fn with_requirement_ref(mut self, uri: ResourceUri) -> Self {
        self.requirement_refs.push(uri);
        self
    }

    #[must_use]
    pub fn with_capability_ref(mut self, uri: ResourceUri) -> Self {
        self.capability_refs.push(uri);
        self
    }

    /// All resource references of this node, requirements first
    pub fn references(&self) -> impl Iterator<Item = &ResourceUri> {
        self.requirement_refs.iter().chain(self.capability_refs.iter())
    }
}

/// A directed acyclic graph of workflow nodes.
///
/// Nodes live in an arena indexed by position; edges are adjacency sets of
/// arena indices. Every mutation keeps the graph acyclic: an edge that would
/// close a cycle is rejected and leaves the graph unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WorkflowDocument", try_from = "WorkflowDocument")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    nodes: Vec<WorkflowNode>,
    index: HashMap<String, usize>,
    successors: Vec<BTreeSet<usize>>,
    predecessors: Vec<BTreeSet<usize>>,
    entry_points: BTreeSet<String>,
    exit_points: BTreeSet<String>,
}

impl Workflow {
    /// Empty workflow with a fresh random id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            entry_points: BTreeSet::new(),
            exit_points: BTreeSet::new(),
        }
    }

    /// Add a node that runs after each of `dependencies`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node id is already present or a dependency is
    /// unknown; the workflow is unchanged in that case.
    pub fn add_node<I, S>(&mut self, node: WorkflowNode, dependencies: I) -> Result<(), SupplyTreeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.index.contains_key(&node.id) {
            return Err(SupplyTreeError::DuplicateNode(node.id));
        }

        let mut dependency_indices = BTreeSet::new();
        for dependency in dependencies {
            let dependency = dependency.as_ref();
            let idx = self
                .index
                .get(dependency)
                .copied()
                .ok_or_else(|| SupplyTreeError::UnknownNode(dependency.to_string()))?;
            dependency_indices.insert(idx);
        }

        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.successors.push(BTreeSet::new());
        self.predecessors.push(BTreeSet::new());
        self.nodes.push(node);

        // Edges into a brand-new node cannot close a cycle
        for &dependency in &dependency_indices {
            self.successors[dependency].insert(idx);
            self.predecessors[idx].insert(dependency);
        }

        self.refresh_endpoints();
        Ok(())
    }

    /// Add an edge `from -> to` between existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either node is unknown or the edge would create a
    /// cycle; the workflow is unchanged in that case.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), SupplyTreeError> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;

        if from_idx == to_idx || self.reaches(to_idx, from_idx) {
            return Err(SupplyTreeError::CycleDetected {
                workflow: self.id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.successors[from_idx].insert(to_idx);
        self.predecessors[to_idx].insert(from_idx);
        self.refresh_endpoints();
        Ok(())
    }

    fn node_index(&self, id: &str) -> Result<usize, SupplyTreeError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| SupplyTreeError::UnknownNode(id.to_string()))
    }

    /// Is `target` reachable from `start` along edges?
    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if std::mem::replace(&mut seen[current], true) {
                continue;
            }
            stack.extend(self.successors[current].iter().copied());
        }
        false
    }

    fn refresh_endpoints(&mut self) {
        self.entry_points = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.predecessors[*i].is_empty())
            .map(|(_, n)| n.id.clone())
            .collect();
        self.exit_points = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.successors[*i].is_empty())
            .map(|(_, n)| n.id.clone())
            .collect();
    }

    /// True iff the graph is acyclic
    #[must_use]
    pub fn validate(&self) -> bool {
        self.topological_indices().is_some()
    }

    /// Kahn's algorithm; ties are broken by insertion order
    fn topological_indices(&self) -> Option<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &next in &self.successors[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    /// Nodes in dependency order
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<&WorkflowNode>, SupplyTreeError> {
        self.topological_indices()
            .map(|order| order.into_iter().map(|i| &self.nodes[i]).collect())
            .ok_or_else(|| SupplyTreeError::InvalidWorkflow(self.id.clone()))
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter()
    }

    /// Edges as `(source id, target id)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.successors.iter().enumerate().flat_map(move |(from, targets)| {
            targets
                .iter()
                .map(move |&to| (self.nodes[from].id.as_str(), self.nodes[to].id.as_str()))
        })
    }

    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&WorkflowNode> {
        self.index
            .get(id)
            .map(|&i| self.successors[i].iter().map(|&s| &self.nodes[s]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&WorkflowNode> {
        self.index
            .get(id)
            .map(|&i| self.predecessors[i].iter().map(|&p| &self.nodes[p]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn entry_points(&self) -> &BTreeSet<String> {
        &self.entry_points
    }

    #[must_use]
    pub fn exit_points(&self) -> &BTreeSet<String> {
        &self.exit_points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    source: String,
    target: String,
}

/// Serialized workflow subgraph: node list plus edge list
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowDocument {
    id: String,
    name: String,
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    edges: Vec<EdgeRecord>,
    #[serde(default)]
    entry_points: BTreeSet<String>,
    #[serde(default)]
    exit_points: BTreeSet<String>,
}

impl From<Workflow> for WorkflowDocument {
    fn from(workflow: Workflow) -> Self {
        let edges = workflow
            .edges()
            .map(|(source, target)| EdgeRecord {
                source: source.to_string(),
                target: target.to_string(),
            })
            .collect();
        Self {
            id: workflow.id,
            name: workflow.name,
            nodes: workflow.nodes,
            edges,
            entry_points: workflow.entry_points,
            exit_points: workflow.exit_points,
        }
    }
}

impl TryFrom<WorkflowDocument> for Workflow {
    type Error = SupplyTreeError;

    fn try_from(document: WorkflowDocument) -> Result<Self, Self::Error> {
        let mut workflow = Workflow::with_id(document.id, document.name);
        for node in document.nodes {
            workflow.add_node(node, std::iter::empty::<&str>())?;
        }
        for edge in &document.edges {
            workflow.add_edge(&edge.source, &edge.target)?;
        }
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> WorkflowNode {
        WorkflowNode::with_id(id, id.to_uppercase())
    }

    fn chain() -> Workflow {
        let mut wf = Workflow::with_id("wf", "chain");
        wf.add_node(node("a"), Vec::<&str>::new()).unwrap();
        wf.add_node(node("b"), ["a"]).unwrap();
        wf.add_node(node("c"), ["b"]).unwrap();
        wf
    }

    #[test]
    fn test_entry_and_exit_points() {
        let mut wf = chain();
        assert_eq!(wf.entry_points().iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(wf.exit_points().iter().collect::<Vec<_>>(), vec!["c"]);

        wf.add_node(node("d"), ["a"]).unwrap();
        assert_eq!(
            wf.exit_points().iter().cloned().collect::<Vec<_>>(),
            vec!["c".to_string(), "d".to_string()]
        );
        assert!(wf.validate());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut wf = chain();
        let err = wf.add_node(node("x"), ["missing"]).unwrap_err();
        assert!(matches!(err, SupplyTreeError::UnknownNode(id) if id == "missing"));
        assert_eq!(wf.len(), 3);
        assert!(wf.node("x").is_none());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut wf = chain();
        assert!(matches!(
            wf.add_node(node("a"), Vec::<&str>::new()),
            Err(SupplyTreeError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut wf = chain();
        let before: Vec<(String, String)> = wf
            .edges()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();

        let err = wf.add_edge("c", "a").unwrap_err();
        assert!(matches!(err, SupplyTreeError::CycleDetected { .. }));
        assert!(matches!(
            wf.add_edge("b", "b"),
            Err(SupplyTreeError::CycleDetected { .. })
        ));

        let after: Vec<(String, String)> = wf
            .edges()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(before, after);
        assert!(wf.validate());
        assert_eq!(wf.entry_points().len(), 1);
    }

    #[test]
    fn test_add_edge_updates_endpoints() {
        let mut wf = Workflow::with_id("wf", "pair");
        wf.add_node(node("a"), Vec::<&str>::new()).unwrap();
        wf.add_node(node("b"), Vec::<&str>::new()).unwrap();
        assert_eq!(wf.entry_points().len(), 2);

        wf.add_edge("a", "b").unwrap();
        assert_eq!(wf.entry_points().iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(wf.exit_points().iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(wf.successors("a")[0].id, "b");
        assert_eq!(wf.predecessors("b")[0].id, "a");
    }

    #[test]
    fn test_topological_order() {
        let mut wf = chain();
        wf.add_node(node("d"), ["a", "c"]).unwrap();
        let order: Vec<&str> = wf
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_serialization_rebuilds_graph() {
        let wf = chain();
        let json = serde_json::to_value(&wf).unwrap();
        assert_eq!(json["edges"].as_array().unwrap().len(), 2);
        assert_eq!(json["entry_points"][0], "a");

        let back: Workflow = serde_json::from_value(json).unwrap();
        assert_eq!(back, wf);
    }

    #[test]
    fn test_deserializing_cycle_fails() {
        let json = serde_json::json!({
            "id": "wf",
            "name": "loop",
            "nodes": [
                {"id": "a", "name": "A"},
                {"id": "b", "name": "B"}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        });
        assert!(serde_json::from_value::<Workflow>(json).is_err());
    }
}
