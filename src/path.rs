//! Closure-table rows and an in-memory index over a fragment of the table.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Identifier of a node owned by the host application.
pub type NodeId = i64;

/// Primary key of a closure-table row.
pub type PathId = i64;

/// A persisted closure-table row.
///
/// `ancestor` and `descendant` are only `None` while a row is nulled out in the
/// middle of a plan application; committed rows always carry both ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PathRow {
    pub id: PathId,
    pub ancestor: Option<NodeId>,
    pub descendant: Option<NodeId>,
    pub depth: i32,
}

impl PathRow {
    pub fn new(id: PathId, ancestor: NodeId, descendant: NodeId, depth: i32) -> Self {
        Self {
            id,
            ancestor: Some(ancestor),
            descendant: Some(descendant),
            depth,
        }
    }

    /// The `(ancestor, descendant)` key, if the row is live.
    pub fn pair(&self) -> Option<(NodeId, NodeId)> {
        match (self.ancestor, self.descendant) {
            (Some(a), Some(d)) => Some((a, d)),
            _ => None,
        }
    }
}

/// A closure-table row that has not been assigned an id yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NewPath {
    pub ancestor: NodeId,
    pub descendant: NodeId,
    pub depth: i32,
}

impl NewPath {
    pub fn new(ancestor: NodeId, descendant: NodeId, depth: i32) -> Self {
        Self {
            ancestor,
            descendant,
            depth,
        }
    }

    pub fn pair(&self) -> (NodeId, NodeId) {
        (self.ancestor, self.descendant)
    }
}

/// Node id together with its distance from the node a query started at.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PathEntry {
    pub node: NodeId,
    pub depth: i32,
}

/// In-memory view over a set of closure rows.
///
/// Planners only ever read from an index, so the same code runs against a full
/// table held in memory and against the fragment a repository loads for one
/// batch.
#[derive(Clone, Debug, Default)]
pub struct ClosureIndex {
    rows: BTreeMap<PathId, PathRow>,
    by_pair: HashMap<(NodeId, NodeId), PathId>,
    by_ancestor: HashMap<NodeId, BTreeSet<PathId>>,
    by_descendant: HashMap<NodeId, BTreeSet<PathId>>,
}

impl ClosureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = PathRow>) -> Self {
        let mut index = Self::new();
        index.extend(rows);
        index
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = PathRow>) {
        for row in rows {
            self.insert(row);
        }
    }

    /// Adds or replaces a row, keeping every lookup in sync.
    pub fn insert(&mut self, row: PathRow) {
        self.remove(row.id);
        if let Some((ancestor, descendant)) = row.pair() {
            self.by_pair.insert((ancestor, descendant), row.id);
            self.by_ancestor.entry(ancestor).or_default().insert(row.id);
            self.by_descendant
                .entry(descendant)
                .or_default()
                .insert(row.id);
        }
        self.rows.insert(row.id, row);
    }

    pub fn remove(&mut self, id: PathId) -> Option<PathRow> {
        let row = self.rows.remove(&id)?;
        if let Some((ancestor, descendant)) = row.pair() {
            if self.by_pair.get(&(ancestor, descendant)) == Some(&id) {
                self.by_pair.remove(&(ancestor, descendant));
            }
            if let Some(ids) = self.by_ancestor.get_mut(&ancestor) {
                ids.remove(&id);
            }
            if let Some(ids) = self.by_descendant.get_mut(&descendant) {
                ids.remove(&id);
            }
        }
        Some(row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, id: PathId) -> Option<&PathRow> {
        self.rows.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &PathRow> {
        self.rows.values()
    }

    pub fn find(&self, ancestor: NodeId, descendant: NodeId) -> Option<&PathRow> {
        self.by_pair
            .get(&(ancestor, descendant))
            .and_then(|id| self.rows.get(id))
    }

    /// Whether the node has its self row in this index.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.by_pair.contains_key(&(node, node))
    }

    /// Every node that owns a self row, ascending.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .by_pair
            .keys()
            .filter(|(a, d)| a == d)
            .map(|(a, _)| *a)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Rows ending at `descendant`, nearest ancestor first.
    pub fn rows_to(&self, descendant: NodeId) -> Vec<&PathRow> {
        let mut rows: Vec<&PathRow> = self
            .by_descendant
            .get(&descendant)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
            .collect();
        rows.sort_by_key(|row| (row.depth, row.ancestor));
        rows
    }

    /// Rows starting at `ancestor`, shallowest descendant first.
    pub fn rows_from(&self, ancestor: NodeId) -> Vec<&PathRow> {
        let mut rows: Vec<&PathRow> = self
            .by_ancestor
            .get(&ancestor)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
            .collect();
        rows.sort_by_key(|row| (row.depth, row.descendant));
        rows
    }

    /// Committed ancestors of `node` (depth >= 1), nearest first.
    pub fn ancestors(&self, node: NodeId) -> Vec<PathEntry> {
        self.rows_to(node)
            .into_iter()
            .filter(|row| row.depth > 0)
            .filter_map(|row| {
                row.ancestor.map(|ancestor| PathEntry {
                    node: ancestor,
                    depth: row.depth,
                })
            })
            .collect()
    }

    /// Descendants of `node` including the node itself at depth 0.
    pub fn subtree(&self, node: NodeId) -> Vec<PathEntry> {
        self.rows_from(node)
            .into_iter()
            .filter_map(|row| {
                row.descendant.map(|descendant| PathEntry {
                    node: descendant,
                    depth: row.depth,
                })
            })
            .collect()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.rows_to(node)
            .into_iter()
            .find(|row| row.depth == 1)
            .and_then(|row| row.ancestor)
    }
}
