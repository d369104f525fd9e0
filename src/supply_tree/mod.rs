//! Supply tree: the DAG-based result model.
//!
//! A [`SupplyTree`] holds one or more [`Workflow`]s (acyclic graphs of
//! [`WorkflowNode`]s), [`WorkflowConnection`]s between them, and the
//! [`ResourceSnapshot`]s that node references resolve against. Trees are
//! validated against their own snapshots before they are reported.

pub mod snapshot;
pub mod tree;
pub mod workflow;

use thiserror::Error;

pub use snapshot::ResourceSnapshot;
pub use tree::{MatchSummary, SupplyTree, TreeValidation, WorkflowConnection};
pub use workflow::{Workflow, WorkflowNode};

#[derive(Error, Debug)]
pub enum SupplyTreeError {
    #[error("Edge {from} -> {to} would create a cycle in workflow '{workflow}'")]
    CycleDetected {
        workflow: String,
        from: String,
        to: String,
    },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Workflow '{0}' is not acyclic")]
    InvalidWorkflow(String),

    #[error("Supply tree {tree} has unresolvable references: {references:?}")]
    UnresolvedReferences {
        tree: String,
        references: Vec<String>,
    },

    #[error("{kind} stored under key '{key}' has id '{id}'")]
    MismatchedKey {
        kind: &'static str,
        key: String,
        id: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
