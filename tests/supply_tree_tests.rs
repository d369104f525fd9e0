//! Supply tree structure, snapshots and serialization

use std::sync::Arc;

use serde_json::json;
use supply_matcher::core::uri::UriError;
use supply_matcher::rules::RuleManager;
use supply_matcher::supply_tree::{SupplyTreeError, WorkflowConnection};
use supply_matcher::{
    Capability, Facility, MatchCascade, MatchingConfig, Requirement, ResourceSpace, ResourceUri,
    SupplyTree, Workflow, WorkflowNode,
};

fn node(id: &str) -> WorkflowNode {
    WorkflowNode::with_id(id, id)
}

/// cut -> {drill, bend} -> weld
fn diamond(id: &str) -> Workflow {
    let mut wf = Workflow::with_id(id, "bracket");
    wf.add_node(node("cut"), Vec::<&str>::new()).unwrap();
    wf.add_node(node("drill"), ["cut"]).unwrap();
    wf.add_node(node("bend"), ["cut"]).unwrap();
    wf.add_node(node("weld"), ["drill", "bend"]).unwrap();
    wf
}

#[test]
fn test_diamond_order_and_endpoints() {
    let wf = diamond("wf");
    let order: Vec<&str> = wf
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(order, vec!["cut", "drill", "bend", "weld"]);
    assert_eq!(wf.entry_points().len(), 1);
    assert!(wf.exit_points().contains("weld"));
    assert_eq!(wf.predecessors("weld").len(), 2);
}

#[test]
fn test_back_edge_is_rejected() {
    let mut wf = diamond("wf");
    let edges_before = wf.edges().count();

    let err = wf.add_edge("weld", "cut").unwrap_err();
    assert!(matches!(err, SupplyTreeError::CycleDetected { .. }));
    assert_eq!(wf.edges().count(), edges_before);
    assert!(wf.validate());

    // Self-loops close a cycle too
    assert!(wf.add_edge("bend", "bend").is_err());
    // A forward shortcut is fine
    wf.add_edge("cut", "weld").unwrap();
}

#[test]
fn test_cyclic_document_is_rejected() {
    let document = json!({
        "id": "tree",
        "creation_time": "2024-01-01T00:00:00Z",
        "workflows": {
            "wf": {
                "id": "wf",
                "name": "loop",
                "nodes": [{"id": "a", "name": "a"}, {"id": "b", "name": "b"}],
                "edges": [
                    {"source": "a", "target": "b"},
                    {"source": "b", "target": "a"}
                ]
            }
        }
    });
    let err = SupplyTree::from_json(&document.to_string()).unwrap_err();
    assert!(matches!(err, SupplyTreeError::Json(_)));
}

#[test]
fn test_snapshots_resolve_by_path() {
    let design = ResourceUri::requirement("bracket");
    let shop = ResourceUri::capability("shop");

    let mut wf = Workflow::with_id("wf", "bracket");
    wf.add_node(
        node("cut")
            .with_requirement_ref(design.clone().join("requirements").join("0").with_fragment("name"))
            .with_capability_ref(shop.clone().join("capabilities").join("1")),
        Vec::<&str>::new(),
    )
    .unwrap();

    let mut tree = SupplyTree::with_id("tree");
    tree.add_workflow(wf).unwrap();
    assert!(!tree.validate_snapshot());
    assert_eq!(tree.unresolved_references().len(), 2);

    tree.add_snapshot(design, json!({"requirements": [{"name": "laser cutting"}]}));
    tree.add_snapshot(
        shop,
        json!({"capabilities": [{"name": "welding"}, {"name": "laser cutter"}]}),
    );

    assert!(tree.validate_snapshot());
    assert!(tree.validate().is_valid());
    let cut = "requirement-space://bracket/requirements/0#name".parse().unwrap();
    assert_eq!(tree.resolve(&cut), Some(&json!("laser cutting")));
}

#[test]
fn test_null_or_out_of_range_reference_is_unresolved() {
    let doc = ResourceUri::requirement("doc");
    let mut wf = Workflow::with_id("wf", "w");
    wf.add_node(
        node("a").with_requirement_ref(doc.clone().with_fragment("notes")),
        Vec::<&str>::new(),
    )
    .unwrap();
    wf.add_node(
        node("b").with_requirement_ref(doc.clone().join("steps").join("5")),
        Vec::<&str>::new(),
    )
    .unwrap();

    let mut tree = SupplyTree::with_id("tree");
    tree.add_workflow(wf).unwrap();
    tree.add_snapshot(doc, json!({"notes": null, "steps": [1, 2]}));

    let validation = tree.validate();
    assert_eq!(validation.issues.len(), 2);
    assert!(!tree.validate_snapshot());
}

#[test]
fn test_connections_and_round_trip() {
    let mut tree = SupplyTree::with_id("tree");
    tree.add_workflow(diamond("frame")).unwrap();
    tree.add_workflow(diamond("finish")).unwrap();

    tree.connect_workflows(WorkflowConnection::new(
        ("frame", "weld"),
        ("finish", "cut"),
        "material_flow",
    ))
    .unwrap();
    assert!(matches!(
        tree.connect_workflows(WorkflowConnection::new(
            ("frame", "weld"),
            ("paint", "cut"),
            "material_flow",
        )),
        Err(SupplyTreeError::UnknownWorkflow(_))
    ));
    assert!(matches!(
        tree.connect_workflows(WorkflowConnection::new(
            ("frame", "polish"),
            ("finish", "cut"),
            "material_flow",
        )),
        Err(SupplyTreeError::UnknownNode(_))
    ));
    assert_eq!(tree.connections().len(), 1);

    tree.metadata.insert("domain".to_string(), json!("manufacturing"));
    tree.add_snapshot(ResourceUri::capability("shop"), json!({"name": "Shop", "bays": 3}));

    let restored = SupplyTree::from_json(&tree.to_json().unwrap()).unwrap();
    assert_eq!(restored, tree);
    assert_eq!(restored.workflow("frame").unwrap().edges().count(), 4);
}

#[test]
fn test_uri_parsing() {
    let uri: ResourceUri = "capability-space://shop/capabilities/0#name".parse().unwrap();
    assert_eq!(uri.space, ResourceSpace::CapabilitySpace);
    assert_eq!(uri.base(), ResourceUri::capability("shop"));
    assert_eq!(uri.to_string().parse::<ResourceUri>().unwrap(), uri);

    assert!(matches!(
        "shop/capabilities".parse::<ResourceUri>(),
        Err(UriError::MissingScheme(_))
    ));
    assert!(matches!(
        "tool-space://shop".parse::<ResourceUri>(),
        Err(UriError::UnknownSpace(_))
    ));
    assert!(matches!(
        "requirement-space://".parse::<ResourceUri>(),
        Err(UriError::EmptyIdentifier(_))
    ));
}

#[tokio::test]
async fn test_built_tree_snapshots_are_point_in_time() {
    let rules = Arc::new(RuleManager::embedded().unwrap());
    let cascade = MatchCascade::new(rules, MatchingConfig::default());

    let requirements = vec![Requirement::new("CNC"), Requirement::new("laser cutting")];
    let mut facility = Facility::new("shop", "Shop").with_capabilities(vec![
        Capability::new("computer numerical control", "process"),
        Capability::new("laser cutter", "equipment"),
    ]);

    let solutions = cascade
        .find_solutions("bracket", &requirements, std::slice::from_ref(&facility), "manufacturing")
        .await
        .unwrap();
    let tree = solutions.get("shop").unwrap().tree.clone();
    assert!(tree.validate_snapshot());

    // Later edits to the source do not reach the tree
    facility.capabilities[0].name = "plasma cutting".to_string();
    let matched: Vec<String> = tree
        .workflows()
        .flat_map(|wf| wf.nodes())
        .flat_map(|n| n.capability_refs.iter())
        .filter_map(|uri| tree.resolve(uri))
        .filter_map(|value| value.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    assert!(matched.contains(&"computer numerical control".to_string()));
    assert!(!matched.contains(&"plasma cutting".to_string()));
}

#[tokio::test]
async fn test_namespaced_facility_id_survives_reload() {
    let rules = Arc::new(RuleManager::embedded().unwrap());
    let cascade = MatchCascade::new(rules, MatchingConfig::default());
    let facility = Facility::new("okw/fablab-1", "Fab Lab #1")
        .with_capabilities(vec![Capability::new("computer numerical control", "process")]);

    let solutions = cascade
        .find_solutions("designs/bracket", &[Requirement::new("CNC")], &[facility], "manufacturing")
        .await
        .unwrap();
    let tree = solutions.get("okw/fablab-1").unwrap().tree.clone();
    assert!(tree.validate_snapshot());

    let restored = SupplyTree::from_json(&tree.to_json().unwrap()).unwrap();
    assert_eq!(restored, tree);
    assert!(restored.validate_snapshot());
    assert!(restored.validate().is_valid());

    let capability_refs: Vec<&ResourceUri> = restored
        .workflows()
        .flat_map(|wf| wf.nodes())
        .flat_map(|n| n.capability_refs.iter())
        .collect();
    assert!(!capability_refs.is_empty());
    for uri in capability_refs {
        assert_eq!(uri.identifier, "okw/fablab-1");
        assert!(restored.resolve(uri).is_some());
    }
}
