//! Old and new lineage of every subtree moved by an update batch.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NodeId, PathEntry};
use crate::sorter::OrderedMove;

/// Parent and ancestor path of a node, nearest ancestor first.
///
/// Depths count edges from the edited node, so the parent sits at depth 1.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Lineage {
    pub parent: Option<NodeId>,
    pub ancestors: Vec<PathEntry>,
}

impl Lineage {
    fn from_chain(chain: impl IntoIterator<Item = NodeId>) -> Self {
        let ancestors: Vec<PathEntry> = chain
            .into_iter()
            .zip(1..)
            .map(|(node, depth)| PathEntry { node, depth })
            .collect();
        Self {
            parent: ancestors.first().map(|entry| entry.node),
            ancestors,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ancestors.iter().map(|entry| entry.node)
    }
}

/// Everything the reconciler needs to rewrite the paths of one moved subtree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EditTree {
    /// Position of the request in the caller's batch.
    pub origin: usize,
    pub node: NodeId,
    pub old: Lineage,
    pub new: Lineage,
    pub dependency: Option<NodeId>,
    /// Descendants that move together with `node`, the node itself first at
    /// depth 0. Subtrees of other moved nodes are left to their own edit.
    pub descendants: Vec<PathEntry>,
}

/// Builds edit trees for moves already sorted by dependency.
pub fn build_edit_trees(index: &ClosureIndex, sorted: &[OrderedMove]) -> Result<Vec<EditTree>> {
    let moved: HashSet<NodeId> = sorted.iter().map(|ordered| ordered.mv.node).collect();
    let mut resolved: HashMap<NodeId, Lineage> = HashMap::with_capacity(sorted.len());
    let mut trees = Vec::with_capacity(sorted.len());

    for ordered in sorted {
        let node = ordered.mv.node;
        if !index.contains_node(node) {
            return Err(HierarchyError::UnknownNode(node));
        }

        let old = Lineage {
            parent: index.parent(node),
            ancestors: index.ancestors(node),
        };
        let new = new_lineage(index, ordered, &resolved)?;
        let descendants = retained_descendants(index, node, &moved);

        tracing::debug!(
            node,
            dependency = ?ordered.dependency,
            old = ?old.nodes().collect::<Vec<_>>(),
            new = ?new.nodes().collect::<Vec<_>>(),
            descendants = ?descendants.iter().map(|e| e.node).collect::<Vec<_>>(),
            "edit tree"
        );

        resolved.insert(node, new.clone());
        trees.push(EditTree {
            origin: ordered.mv.origin,
            node,
            old,
            new,
            dependency: ordered.dependency,
            descendants,
        });
    }

    Ok(trees)
}

fn new_lineage(
    index: &ClosureIndex,
    ordered: &OrderedMove,
    resolved: &HashMap<NodeId, Lineage>,
) -> Result<Lineage> {
    let Some(parent) = ordered.mv.parent else {
        return Ok(Lineage::default());
    };
    if !index.contains_node(parent) {
        return Err(HierarchyError::UnknownNode(parent));
    }

    let committed = std::iter::once(parent).chain(index.ancestors(parent).into_iter().map(|e| e.node));

    let Some(dependency) = ordered.dependency else {
        return Ok(Lineage::from_chain(committed));
    };

    // The committed chain from the new parent up to the dependency does not
    // move; everything above the dependency is whatever it was resolved to.
    let above = resolved.get(&dependency).ok_or_else(|| {
        HierarchyError::invariant(format!(
            "node {dependency} must be resolved before node {}",
            ordered.mv.node
        ))
    })?;

    let mut chain = Vec::new();
    for node in committed {
        chain.push(node);
        if node == dependency {
            chain.extend(above.nodes());
            return Ok(Lineage::from_chain(chain));
        }
    }

    Err(HierarchyError::invariant(format!(
        "node {dependency} is not an ancestor of new parent {parent}"
    )))
}

fn retained_descendants(
    index: &ClosureIndex,
    node: NodeId,
    moved: &HashSet<NodeId>,
) -> Vec<PathEntry> {
    let subtree = index.subtree(node);
    let excluded: HashSet<NodeId> = subtree
        .iter()
        .filter(|entry| entry.node != node && moved.contains(&entry.node))
        .flat_map(|entry| index.subtree(entry.node))
        .map(|entry| entry.node)
        .collect();

    subtree
        .into_iter()
        .filter(|entry| !excluded.contains(&entry.node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathRow;
    use crate::sorter::{sort_updates, Move};

    /// 1 -> 2 -> 3 -> 4 and 10 -> 11
    fn index() -> ClosureIndex {
        let parents = [(1, None), (2, Some(1)), (3, Some(2)), (4, Some(3)), (10, None), (11, Some(10))];
        let mut rows = Vec::new();
        let mut next = 1;
        for &(node, _) in &parents {
            let mut depth = 0;
            let mut current = Some(node);
            while let Some(ancestor) = current {
                rows.push(PathRow::new(next, ancestor, node, depth));
                next += 1;
                depth += 1;
                current = parents.iter().find(|(n, _)| *n == ancestor).and_then(|(_, p)| *p);
            }
        }
        ClosureIndex::from_rows(rows)
    }

    fn nodes(entries: &[PathEntry]) -> Vec<NodeId> {
        entries.iter().map(|e| e.node).collect()
    }

    #[test]
    fn plain_move_takes_parent_lineage() {
        let index = index();
        let sorted = sort_updates(&index, &[Move { origin: 0, node: 3, parent: Some(11) }]).unwrap();
        let trees = build_edit_trees(&index, &sorted).unwrap();

        assert_eq!(nodes(&trees[0].old.ancestors), vec![2, 1]);
        assert_eq!(nodes(&trees[0].new.ancestors), vec![11, 10]);
        assert_eq!(trees[0].new.parent, Some(11));
        assert_eq!(nodes(&trees[0].descendants), vec![3, 4]);
    }

    #[test]
    fn chained_move_follows_dependency() {
        let index = index();
        // 2 becomes a child of 11 and 4 is lifted directly under 2 in the same batch.
        let moves = [
            Move { origin: 0, node: 4, parent: Some(2) },
            Move { origin: 1, node: 2, parent: Some(11) },
        ];
        let sorted = sort_updates(&index, &moves).unwrap();
        let trees = build_edit_trees(&index, &sorted).unwrap();

        assert_eq!(trees[0].node, 2);
        assert_eq!(nodes(&trees[0].descendants), vec![2, 3]);
        assert_eq!(trees[1].node, 4);
        assert_eq!(nodes(&trees[1].new.ancestors), vec![2, 11, 10]);
        let depths: Vec<i32> = trees[1].new.ancestors.iter().map(|e| e.depth).collect();
        assert_eq!(depths, vec![1, 2, 3]);
    }

    #[test]
    fn move_to_root_has_no_ancestors() {
        let index = index();
        let sorted = sort_updates(&index, &[Move { origin: 0, node: 2, parent: None }]).unwrap();
        let trees = build_edit_trees(&index, &sorted).unwrap();
        assert!(trees[0].new.ancestors.is_empty());
        assert_eq!(trees[0].new.parent, None);
    }
}
