//! Batch planning over a [`PathStore`].
//!
//! The `plan_*` functions only read; the remaining async functions also write
//! through the store and are meant to run inside the caller's transaction.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::cascade::{self, DeletePlan};
use crate::cycle::{CrossTreeDetector, CycleDetector, FreshBatchDetector};
use crate::delta::{build_edit_trees, EditTree};
use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NewPath, NodeId, PathEntry, PathRow};
use crate::query::{self, DepthLimit};
use crate::reconcile::{reconcile, PathPlan};
use crate::request::EditRequest;
use crate::sorter::{sort_creation, sort_updates, CreateStep, Move, ParentRef};
use crate::store::PathStore;

/// Creation order for a batch of new nodes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreatePlan {
    steps: Vec<CreateStep>,
}

impl CreatePlan {
    /// Steps in insertion order. A step's parent is either committed or an
    /// earlier step.
    pub fn steps(&self) -> &[CreateStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Committed parents referenced by the batch, ascending.
    pub fn existing_parents(&self) -> Vec<NodeId> {
        self.steps
            .iter()
            .filter_map(|step| match step.parent {
                ParentRef::Existing(parent) => Some(parent),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn tracker(&self) -> InsertionTracker<'_> {
        InsertionTracker {
            plan: self,
            lineages: vec![None; self.steps.len()],
            seen: HashSet::with_capacity(self.steps.len()),
        }
    }
}

/// Validates and orders a creation batch.
///
/// `node_id` is ignored on creation; ids are minted by the host once a step
/// is inserted.
pub fn plan_create(requests: &[EditRequest]) -> Result<CreatePlan> {
    FreshBatchDetector.ensure_acyclic(requests)?;
    let steps = sort_creation(requests)?;
    Ok(CreatePlan { steps })
}

/// Produces closure rows for the steps of a [`CreatePlan`] as their ids
/// become known.
#[derive(Debug)]
pub struct InsertionTracker<'p> {
    plan: &'p CreatePlan,
    /// Ancestors of each recorded step, self first at depth 0.
    lineages: Vec<Option<Vec<PathEntry>>>,
    seen: HashSet<NodeId>,
}

impl InsertionTracker<'_> {
    /// Records the id minted for step `position` and returns the rows to
    /// insert for it.
    ///
    /// `parent_paths` must contain every row whose descendant is the step's
    /// committed parent; it is ignored for roots and batch-local parents.
    pub fn record(
        &mut self,
        position: usize,
        node_id: NodeId,
        parent_paths: &[PathRow],
    ) -> Result<Vec<NewPath>> {
        let step = self.plan.steps.get(position).ok_or_else(|| {
            HierarchyError::invariant(format!("creation step {position} does not exist"))
        })?;
        if !self.seen.insert(node_id) {
            return Err(HierarchyError::invalid(
                step.origin,
                format!("node id {node_id} was minted twice"),
            ));
        }

        let mut lineage = vec![PathEntry {
            node: node_id,
            depth: 0,
        }];
        match step.parent {
            ParentRef::Root => {}
            ParentRef::Existing(parent) => {
                let mut above: Vec<PathEntry> = parent_paths
                    .iter()
                    .filter(|row| row.descendant == Some(parent))
                    .filter_map(|row| {
                        row.ancestor.map(|node| PathEntry {
                            node,
                            depth: row.depth + 1,
                        })
                    })
                    .collect();
                if !above.iter().any(|entry| entry.node == parent && entry.depth == 1) {
                    return Err(HierarchyError::UnknownNode(parent));
                }
                above.sort_by_key(|entry| (entry.depth, entry.node));
                lineage.extend(above);
            }
            ParentRef::Step(at) => {
                let above = self.lineages.get(at).and_then(Option::as_ref).ok_or_else(|| {
                    HierarchyError::invariant(format!(
                        "step {position} recorded before its parent step {at}"
                    ))
                })?;
                lineage.extend(above.iter().map(|entry| PathEntry {
                    node: entry.node,
                    depth: entry.depth + 1,
                }));
            }
        }

        let rows = lineage
            .iter()
            .map(|entry| NewPath::new(entry.node, node_id, entry.depth))
            .collect();
        self.lineages[position] = Some(lineage);
        Ok(rows)
    }
}

/// Creates a batch of nodes through `store`.
///
/// `mint` is called once per step in insertion order and returns the id the
/// host assigned. The result holds the minted ids by request position.
pub async fn create_nodes<S, F>(store: &S, requests: &[EditRequest], mut mint: F) -> Result<Vec<NodeId>>
where
    S: PathStore + ?Sized,
    F: FnMut(&CreateStep) -> NodeId,
{
    let plan = plan_create(requests)?;
    let parents = ClosureIndex::from_rows(store.paths_to(&plan.existing_parents()).await?);

    let mut tracker = plan.tracker();
    let mut ids = vec![0; requests.len()];
    let mut rows = Vec::new();
    for (position, step) in plan.steps().iter().enumerate() {
        let node_id = mint(step);
        let parent_paths: Vec<PathRow> = match step.parent {
            ParentRef::Existing(parent) => parents.rows_to(parent).into_iter().copied().collect(),
            _ => Vec::new(),
        };
        rows.extend(tracker.record(position, node_id, &parent_paths)?);
        ids[step.origin] = node_id;
    }

    store.insert_paths(&rows).await?;
    tracing::info!(nodes = ids.len(), paths = rows.len(), "created hierarchy nodes");
    Ok(ids)
}

/// Everything an update batch will change.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UpdatePlan {
    /// Request positions of the moves, in the order they were resolved.
    pub order: Vec<usize>,
    pub trees: Vec<EditTree>,
    pub paths: PathPlan,
    /// Request positions that leave their node where it already is.
    pub skipped: Vec<usize>,
}

/// Plans an update batch against rows already loaded into `index`.
///
/// The index must hold every row to and from the edited nodes, every row to
/// their descendants and every row to the requested parents.
pub fn plan_update_in(index: &ClosureIndex, requests: &[EditRequest]) -> Result<UpdatePlan> {
    let mut seen = HashSet::with_capacity(requests.len());
    let mut moves = Vec::new();
    let mut skipped = Vec::new();

    for (idx, request) in requests.iter().enumerate() {
        let node = request
            .node_id
            .ok_or_else(|| HierarchyError::invalid(idx, "an update must name its node"))?;
        if request.new_parent.is_some() {
            return Err(HierarchyError::invalid(
                idx,
                "batch-local parents are only allowed while creating nodes",
            ));
        }
        if !seen.insert(node) {
            return Err(HierarchyError::invalid(
                idx,
                format!("node {node} is edited more than once"),
            ));
        }
        if !index.contains_node(node) {
            return Err(HierarchyError::UnknownNode(node));
        }
        if let Some(parent) = request.exist_parent {
            if !index.contains_node(parent) {
                return Err(HierarchyError::UnknownNode(parent));
            }
        }

        if index.parent(node) == request.exist_parent {
            skipped.push(idx);
        } else {
            moves.push(Move {
                origin: idx,
                node,
                parent: request.exist_parent,
            });
        }
    }

    let moved: Vec<EditRequest> = moves
        .iter()
        .map(|mv| EditRequest::reparent(mv.node, mv.parent))
        .collect();
    let groups = CrossTreeDetector::new(index).detect(&moved)?;
    if !groups.is_empty() {
        let involved: BTreeSet<usize> = groups
            .into_iter()
            .flatten()
            .map(|at| moves[at].origin)
            .collect();
        tracing::debug!(requests = ?involved, "update batch rejected, loop detected");
        return Err(HierarchyError::CycleDetected {
            requests: involved.into_iter().collect(),
        });
    }

    let sorted = sort_updates(index, &moves)?;
    let trees = build_edit_trees(index, &sorted)?;
    let paths = reconcile(index, &trees)?;

    Ok(UpdatePlan {
        order: sorted.iter().map(|ordered| ordered.mv.origin).collect(),
        trees,
        paths,
        skipped,
    })
}

/// Loads the rows an update batch touches and plans it.
pub async fn plan_update<S>(store: &S, requests: &[EditRequest]) -> Result<UpdatePlan>
where
    S: PathStore + ?Sized,
{
    let edited: Vec<NodeId> = requests.iter().filter_map(|r| r.node_id).collect();
    let below = store.paths_from(&edited).await?;

    let mut targets: BTreeSet<NodeId> = below.iter().filter_map(|row| row.descendant).collect();
    targets.extend(edited.iter().copied());
    targets.extend(requests.iter().filter_map(|r| r.exist_parent));
    let targets: Vec<NodeId> = targets.into_iter().collect();

    let mut index = ClosureIndex::from_rows(below);
    index.extend(store.paths_to(&targets).await?);
    tracing::debug!(requests = requests.len(), rows = index.len(), "loaded update fragment");

    plan_update_in(&index, requests)
}

/// Plans and applies an update batch.
pub async fn update_nodes<S>(store: &S, requests: &[EditRequest]) -> Result<UpdatePlan>
where
    S: PathStore + ?Sized,
{
    let plan = plan_update(store, requests).await?;
    store.apply_plan(&plan.paths).await?;
    tracing::info!(
        moved = plan.order.len(),
        skipped = plan.skipped.len(),
        nullified = plan.paths.nullify.len(),
        updated = plan.paths.update.len(),
        created = plan.paths.create.len(),
        deleted = plan.paths.delete.len(),
        "applied hierarchy update"
    );
    Ok(plan)
}

/// Collects the subtrees below `roots` and every row referencing them.
pub async fn plan_delete<S>(store: &S, roots: &[NodeId]) -> Result<DeletePlan>
where
    S: PathStore + ?Sized,
{
    let below = store.paths_from(roots).await?;
    let nodes: Vec<NodeId> = below
        .iter()
        .filter_map(|row| row.descendant)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut index = ClosureIndex::from_rows(below);
    index.extend(store.paths_to(&nodes).await?);
    Ok(cascade::plan_delete(&index, roots))
}

/// Removes the closure rows of the subtrees below `roots`. Node records are
/// the host's to delete, using [`DeletePlan::nodes`].
pub async fn delete_subtrees<S>(store: &S, roots: &[NodeId]) -> Result<DeletePlan>
where
    S: PathStore + ?Sized,
{
    let plan = plan_delete(store, roots).await?;
    if !plan.paths.is_empty() {
        store.delete_paths(&plan.paths).await?;
    }
    tracing::info!(nodes = plan.nodes.len(), paths = plan.paths.len(), "deleted hierarchy subtrees");
    Ok(plan)
}

pub async fn ancestors_of<S>(
    store: &S,
    node: NodeId,
    limit: DepthLimit,
    include_self: bool,
) -> Result<Vec<PathEntry>>
where
    S: PathStore + ?Sized,
{
    let index = ClosureIndex::from_rows(store.paths_to(&[node]).await?);
    Ok(query::ancestors_of(&index, node, limit, include_self))
}

pub async fn descendants_of<S>(
    store: &S,
    node: NodeId,
    limit: DepthLimit,
    include_self: bool,
) -> Result<Vec<PathEntry>>
where
    S: PathStore + ?Sized,
{
    let index = ClosureIndex::from_rows(store.paths_from(&[node]).await?);
    Ok(query::descendants_of(&index, node, limit, include_self))
}

pub async fn parent_of<S>(store: &S, node: NodeId) -> Result<Option<NodeId>>
where
    S: PathStore + ?Sized,
{
    let index = ClosureIndex::from_rows(store.paths_to(&[node]).await?);
    if !index.contains_node(node) {
        return Err(HierarchyError::UnknownNode(node));
    }
    Ok(index.parent(node))
}

pub async fn roots<S>(store: &S) -> Result<Vec<NodeId>>
where
    S: PathStore + ?Sized,
{
    store.roots().await
}
