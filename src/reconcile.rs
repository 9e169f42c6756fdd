//! Maps moved subtrees onto closure-row writes.
//!
//! For every edit tree the target rows are `new ancestors x retained
//! descendants`. Existing rows are reused before anything is created:
//!
//! 1. an old row of the same subtree that already holds the target pair,
//! 2. any other old row of the same subtree,
//! 3. a row left over by an earlier subtree of the batch,
//! 4. a new row.
//!
//! Rows still unused once every subtree is processed are deleted. Because
//! updates reassign pairs to existing row ids, a row can be asked to take a
//! pair that another row still holds; such holders are nulled out before any
//! update is applied.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::delta::EditTree;
use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NewPath, NodeId, PathId, PathRow};

/// New content for an existing closure row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PathUpdate {
    pub id: PathId,
    pub ancestor: NodeId,
    pub descendant: NodeId,
    pub depth: i32,
}

/// Row writes for one update batch.
///
/// Apply inside a single transaction in field order: `nullify`, `update`,
/// `create`, `delete`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathPlan {
    /// Rows whose ancestor and descendant must be set to NULL first.
    pub nullify: Vec<PathId>,
    pub update: Vec<PathUpdate>,
    pub create: Vec<NewPath>,
    pub delete: Vec<PathId>,
}

impl PathPlan {
    pub fn is_empty(&self) -> bool {
        self.nullify.is_empty()
            && self.update.is_empty()
            && self.create.is_empty()
            && self.delete.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum Writer {
    Row(PathId),
    Created(usize),
}

/// Everything already assigned while building one plan.
///
/// Threaded through every subtree of the batch so a row id or a target pair
/// handed out twice is caught before anything is written.
#[derive(Debug, Default)]
pub struct PlanTrace {
    rows: HashMap<PathId, (NodeId, NodeId)>,
    pairs: HashMap<(NodeId, NodeId), Writer>,
}

impl PlanTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_assigned(&self, id: PathId) -> bool {
        self.rows.contains_key(&id)
    }

    fn claim_pair(&mut self, pair: (NodeId, NodeId), writer: Writer) -> Result<()> {
        if let Some(previous) = self.pairs.insert(pair, writer) {
            tracing::error!(?pair, ?previous, ?writer, "duplicate closure path in plan");
            return Err(HierarchyError::conflict(
                Some(pair.0),
                Some(pair.1),
                format!("assigned by both {previous:?} and {writer:?}"),
            ));
        }
        Ok(())
    }

    fn claim_row(&mut self, id: PathId, pair: (NodeId, NodeId)) -> Result<()> {
        if let Some(previous) = self.rows.insert(id, pair) {
            tracing::error!(path_id = id, ?previous, ?pair, "closure row reused twice");
            return Err(HierarchyError::conflict(
                Some(pair.0),
                Some(pair.1),
                format!("row {id} already assigned to {previous:?}"),
            ));
        }
        self.claim_pair(pair, Writer::Row(id))
    }

    fn claim_new(&mut self, pair: (NodeId, NodeId), position: usize) -> Result<()> {
        self.claim_pair(pair, Writer::Created(position))
    }
}

/// Builds a [`PathPlan`] for edit trees sorted by dependency.
pub fn reconcile(index: &ClosureIndex, trees: &[EditTree]) -> Result<PathPlan> {
    let mut reconciler = PathReconciler::new(index);
    for tree in trees {
        reconciler.add_tree(tree)?;
    }
    reconciler.finish()
}

/// Incremental form of [`reconcile`], one edit tree at a time.
#[derive(Debug)]
pub struct PathReconciler<'a> {
    index: &'a ClosureIndex,
    trace: PlanTrace,
    recycled: VecDeque<PathId>,
    kept: BTreeSet<PathId>,
    plan: PathPlan,
}

impl<'a> PathReconciler<'a> {
    pub fn new(index: &'a ClosureIndex) -> Self {
        Self {
            index,
            trace: PlanTrace::new(),
            recycled: VecDeque::new(),
            kept: BTreeSet::new(),
            plan: PathPlan::default(),
        }
    }

    pub fn add_tree(&mut self, tree: &EditTree) -> Result<()> {
        let old_rows = self.old_rows(tree);
        let held: HashMap<(NodeId, NodeId), PathId> = old_rows
            .iter()
            .filter_map(|row| row.pair().map(|pair| (pair, row.id)))
            .collect();

        let mut targets = Vec::with_capacity(tree.new.ancestors.len() * tree.descendants.len());
        for ancestor in &tree.new.ancestors {
            for descendant in &tree.descendants {
                targets.push(NewPath::new(
                    ancestor.node,
                    descendant.node,
                    ancestor.depth + descendant.depth,
                ));
            }
        }

        // Rows that already hold their target pair keep it.
        let mut claimed: HashSet<PathId> = HashSet::new();
        let mut pending = Vec::new();
        for target in targets {
            match held.get(&target.pair()) {
                Some(&id) => {
                    claimed.insert(id);
                    self.assign(id, target)?;
                }
                None => pending.push(target),
            }
        }

        let mut spare = old_rows
            .iter()
            .map(|row| row.id)
            .filter(|id| !claimed.contains(id));
        let (mut reused, mut recycled, mut created) = (0usize, 0usize, 0usize);
        for target in pending {
            if let Some(id) = spare.next() {
                reused += 1;
                self.assign(id, target)?;
            } else if let Some(id) = self.recycled.pop_front() {
                recycled += 1;
                self.assign(id, target)?;
            } else {
                created += 1;
                self.trace.claim_new(target.pair(), self.plan.create.len())?;
                self.plan.create.push(target);
            }
        }
        let leftover: Vec<PathId> = spare.collect();

        tracing::debug!(
            node = tree.node,
            old_rows = old_rows.len(),
            kept = claimed.len(),
            reused,
            recycled,
            created,
            leftover = leftover.len(),
            "reconciled edit tree"
        );
        self.recycled.extend(leftover);
        Ok(())
    }

    /// Rows linking the old ancestors of the subtree to its retained
    /// descendants, grouped by descendant.
    fn old_rows(&self, tree: &EditTree) -> Vec<PathRow> {
        let mut rows = Vec::with_capacity(tree.old.ancestors.len() * tree.descendants.len());
        for descendant in &tree.descendants {
            for ancestor in &tree.old.ancestors {
                match self.index.find(ancestor.node, descendant.node) {
                    Some(row) if !self.trace.is_assigned(row.id) => rows.push(*row),
                    Some(_) => {}
                    None => tracing::warn!(
                        ancestor = ancestor.node,
                        descendant = descendant.node,
                        "closure path missing, it will be recreated"
                    ),
                }
            }
        }
        rows
    }

    fn assign(&mut self, id: PathId, target: NewPath) -> Result<()> {
        self.trace.claim_row(id, target.pair())?;
        let unchanged = self.index.row(id).is_some_and(|row| {
            row.pair() == Some(target.pair()) && row.depth == target.depth
        });
        if unchanged {
            self.kept.insert(id);
        } else {
            self.plan.update.push(PathUpdate {
                id,
                ancestor: target.ancestor,
                descendant: target.descendant,
                depth: target.depth,
            });
        }
        Ok(())
    }

    /// Queues leftovers for deletion and works out which rows must be nulled
    /// out so that no write collides with a pair still held by another row.
    ///
    /// A holder the batch does not otherwise touch is a stale duplicate of a
    /// path being written; it is nulled out and deleted along with the
    /// leftovers.
    pub fn finish(self) -> Result<PathPlan> {
        let Self {
            index,
            trace,
            recycled,
            kept,
            mut plan,
        } = self;

        let mut delete: BTreeSet<PathId> = recycled.into_iter().collect();
        let touched: HashSet<PathId> = plan
            .update
            .iter()
            .map(|update| update.id)
            .chain(delete.iter().copied())
            .chain(kept.iter().copied())
            .collect();

        let mut nullify = BTreeSet::new();
        for (&pair, &writer) in &trace.pairs {
            let Some(holder) = index.find(pair.0, pair.1) else {
                continue;
            };
            if writer == Writer::Row(holder.id) {
                continue;
            }
            if !touched.contains(&holder.id) {
                tracing::warn!(
                    ?pair,
                    holder = holder.id,
                    ?writer,
                    "stale closure path superseded"
                );
                delete.insert(holder.id);
            }
            nullify.insert(holder.id);
        }
        plan.nullify = nullify.into_iter().collect();
        plan.delete = delete.into_iter().collect();

        tracing::debug!(
            nullify = ?plan.nullify,
            update = plan.update.len(),
            create = plan.create.len(),
            delete = ?plan.delete,
            "closure path plan ready"
        );
        Ok(plan)
    }
}
