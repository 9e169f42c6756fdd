//! Ancestor, descendant and root lookups over a [`ClosureIndex`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::path::{ClosureIndex, NodeId, PathEntry};

/// How far a lookup may walk from the starting node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DepthLimit {
    #[default]
    Unlimited,
    AtMost(u32),
}

impl DepthLimit {
    /// Negative values mean unlimited, matching the `-1` sentinel hosts tend to send.
    pub fn from_signed(depth: i64) -> Self {
        match u32::try_from(depth) {
            Ok(depth) => Self::AtMost(depth),
            Err(_) if depth < 0 => Self::Unlimited,
            Err(_) => Self::AtMost(u32::MAX),
        }
    }

    pub fn admits(&self, depth: i32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::AtMost(limit) => i64::from(depth) <= i64::from(*limit),
        }
    }

    pub(crate) fn max_depth(&self) -> Option<i32> {
        match self {
            Self::Unlimited => None,
            Self::AtMost(limit) => Some(i32::try_from(*limit).unwrap_or(i32::MAX)),
        }
    }
}

/// Ancestors of `node`, nearest first.
pub fn ancestors_of(
    index: &ClosureIndex,
    node: NodeId,
    limit: DepthLimit,
    include_self: bool,
) -> Vec<PathEntry> {
    index
        .rows_to(node)
        .into_iter()
        .filter(|row| limit.admits(row.depth) && (include_self || row.depth > 0))
        .filter_map(|row| {
            row.ancestor.map(|ancestor| PathEntry {
                node: ancestor,
                depth: row.depth,
            })
        })
        .collect()
}

/// Descendants of `node` ordered by depth, then by id.
pub fn descendants_of(
    index: &ClosureIndex,
    node: NodeId,
    limit: DepthLimit,
    include_self: bool,
) -> Vec<PathEntry> {
    index
        .subtree(node)
        .into_iter()
        .filter(|entry| limit.admits(entry.depth) && (include_self || entry.depth > 0))
        .collect()
}

/// Nodes that are nobody's descendant at depth 1 or more.
pub fn roots(index: &ClosureIndex) -> Vec<NodeId> {
    let nested: HashSet<NodeId> = index
        .rows()
        .filter(|row| row.depth > 0)
        .filter_map(|row| row.descendant)
        .collect();
    index
        .nodes()
        .into_iter()
        .filter(|node| !nested.contains(node))
        .collect()
}

pub fn is_ancestor_of(index: &ClosureIndex, ancestor: NodeId, descendant: NodeId) -> bool {
    index
        .find(ancestor, descendant)
        .is_some_and(|row| row.depth > 0)
}

/// A node with its children, rebuilt from closure rows.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.height())
            .max()
            .unwrap_or(0)
    }
}

/// Rebuilds every tree stored in the index, roots and children ascending by id.
pub fn forest(index: &ClosureIndex) -> Vec<TreeNode> {
    let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for row in index.rows().filter(|row| row.depth == 1) {
        if let Some((parent, child)) = row.pair() {
            children.entry(parent).or_default().push(child);
        }
    }
    for list in children.values_mut() {
        list.sort_unstable();
    }

    fn build(id: NodeId, children: &BTreeMap<NodeId, Vec<NodeId>>) -> TreeNode {
        TreeNode {
            id,
            children: children
                .get(&id)
                .into_iter()
                .flatten()
                .map(|&child| build(child, children))
                .collect(),
        }
    }

    roots(index)
        .into_iter()
        .map(|root| build(root, &children))
        .collect()
}
