//! Subtree deletion.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::path::{ClosureIndex, NodeId, PathId};

/// Node and closure rows to hard-delete for a set of subtree roots.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeletePlan {
    pub nodes: Vec<NodeId>,
    pub paths: Vec<PathId>,
}

impl DeletePlan {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.paths.is_empty()
    }
}

/// Collects every descendant of `roots` (roots included) and every row that
/// references any of them. Ids missing from the index are ignored.
pub fn plan_delete(index: &ClosureIndex, roots: &[NodeId]) -> DeletePlan {
    let nodes: BTreeSet<NodeId> = roots
        .iter()
        .flat_map(|&root| index.subtree(root))
        .map(|entry| entry.node)
        .collect();

    let paths: BTreeSet<PathId> = index
        .rows()
        .filter(|row| {
            row.ancestor.is_some_and(|node| nodes.contains(&node))
                || row.descendant.is_some_and(|node| nodes.contains(&node))
        })
        .map(|row| row.id)
        .collect();

    tracing::debug!(roots = ?roots, nodes = nodes.len(), paths = paths.len(), "planned subtree deletion");
    DeletePlan {
        nodes: nodes.into_iter().collect(),
        paths: paths.into_iter().collect(),
    }
}
