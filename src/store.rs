//! Storage seam for closure rows.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NewPath, NodeId, PathId, PathRow};
use crate::reconcile::{PathPlan, PathUpdate};

/// Read and write access to a closure table.
///
/// Implementations are expected to run inside whatever transaction the caller
/// opened; the engine never commits on its own.
#[async_trait]
pub trait PathStore: Send + Sync {
    /// Rows whose descendant is one of `nodes`.
    async fn paths_to(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>>;

    /// Rows whose ancestor is one of `nodes`.
    async fn paths_from(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>>;

    /// Nodes that are nobody's descendant at depth 1 or more, ascending.
    async fn roots(&self) -> Result<Vec<NodeId>>;

    async fn insert_paths(&self, rows: &[NewPath]) -> Result<()>;

    async fn update_paths(&self, updates: &[PathUpdate]) -> Result<()>;

    /// Sets ancestor and descendant of the given rows to NULL.
    async fn nullify_paths(&self, ids: &[PathId]) -> Result<()>;

    async fn delete_paths(&self, ids: &[PathId]) -> Result<()>;

    /// Applies a plan in the only order that keeps pairs unique throughout.
    async fn apply_plan(&self, plan: &PathPlan) -> Result<()> {
        if !plan.nullify.is_empty() {
            self.nullify_paths(&plan.nullify).await?;
        }
        if !plan.update.is_empty() {
            self.update_paths(&plan.update).await?;
        }
        if !plan.create.is_empty() {
            self.insert_paths(&plan.create).await?;
        }
        if !plan.delete.is_empty() {
            self.delete_paths(&plan.delete).await?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    index: ClosureIndex,
    next_id: PathId,
}

impl MemoryState {
    fn ensure_free(&self, id: Option<PathId>, ancestor: NodeId, descendant: NodeId) -> Result<()> {
        match self.index.find(ancestor, descendant) {
            Some(holder) if Some(holder.id) != id => Err(HierarchyError::StoreConstraint(format!(
                "({ancestor}, {descendant}) is already stored in row {}",
                holder.id
            ))),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, rows: &[NewPath]) -> Result<()> {
        for row in rows {
            self.ensure_free(None, row.ancestor, row.descendant)?;
            self.next_id += 1;
            let id = self.next_id;
            self.index
                .insert(PathRow::new(id, row.ancestor, row.descendant, row.depth));
        }
        Ok(())
    }

    fn update(&mut self, updates: &[PathUpdate]) -> Result<()> {
        for update in updates {
            if self.index.row(update.id).is_none() {
                return Err(HierarchyError::StoreConstraint(format!(
                    "row {} does not exist",
                    update.id
                )));
            }
            self.ensure_free(Some(update.id), update.ancestor, update.descendant)?;
            self.index.insert(PathRow::new(
                update.id,
                update.ancestor,
                update.descendant,
                update.depth,
            ));
        }
        Ok(())
    }

    fn nullify(&mut self, ids: &[PathId]) {
        for &id in ids {
            if let Some(row) = self.index.row(id).copied() {
                self.index.insert(PathRow {
                    ancestor: None,
                    descendant: None,
                    ..row
                });
            }
        }
    }

    fn delete(&mut self, ids: &[PathId]) {
        for &id in ids {
            self.index.remove(id);
        }
    }
}

/// Closure table kept in memory, with the same uniqueness rule a database
/// would enforce on `(ancestor, descendant)`.
///
/// Every write call, [`PathStore::apply_plan`] included, is all-or-nothing.
/// Useful for hosts that keep small hierarchies in memory and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from `(node, parent)` links. Parents must be listed
    /// before their children.
    pub fn from_parents(links: &[(NodeId, Option<NodeId>)]) -> Result<Self> {
        let store = Self::new();
        {
            let mut state = store.lock()?;
            for &(node, parent) in links {
                let mut rows = vec![NewPath::new(node, node, 0)];
                if let Some(parent) = parent {
                    if !state.index.contains_node(parent) {
                        return Err(HierarchyError::UnknownNode(parent));
                    }
                    rows.extend(
                        state
                            .index
                            .rows_to(parent)
                            .into_iter()
                            .filter_map(|row| row.ancestor.map(|a| (a, row.depth)))
                            .map(|(ancestor, depth)| NewPath::new(ancestor, node, depth + 1))
                            .collect::<Vec<_>>(),
                    );
                }
                state.insert(&rows)?;
            }
        }
        Ok(store)
    }

    /// Copy of every row currently stored.
    pub fn snapshot(&self) -> Result<ClosureIndex> {
        Ok(self.lock()?.index.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| HierarchyError::invariant("memory store lock poisoned"))
    }

    /// Runs `write` against a copy of the rows and keeps the copy only if every
    /// write succeeded.
    fn commit<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut MemoryState) -> Result<()>,
    {
        let mut state = self.lock()?;
        let mut staged = state.clone();
        write(&mut staged)?;
        *state = staged;
        Ok(())
    }
}

#[async_trait]
impl PathStore for MemoryStore {
    async fn paths_to(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>> {
        let state = self.lock()?;
        Ok(nodes
            .iter()
            .flat_map(|&node| state.index.rows_to(node))
            .copied()
            .collect())
    }

    async fn paths_from(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>> {
        let state = self.lock()?;
        Ok(nodes
            .iter()
            .flat_map(|&node| state.index.rows_from(node))
            .copied()
            .collect())
    }

    async fn roots(&self) -> Result<Vec<NodeId>> {
        Ok(crate::query::roots(&self.lock()?.index))
    }

    async fn insert_paths(&self, rows: &[NewPath]) -> Result<()> {
        self.commit(|state| state.insert(rows))
    }

    async fn update_paths(&self, updates: &[PathUpdate]) -> Result<()> {
        self.commit(|state| state.update(updates))
    }

    async fn nullify_paths(&self, ids: &[PathId]) -> Result<()> {
        self.commit(|state| {
            state.nullify(ids);
            Ok(())
        })
    }

    async fn delete_paths(&self, ids: &[PathId]) -> Result<()> {
        self.commit(|state| {
            state.delete(ids);
            Ok(())
        })
    }

    /// All four phases land together or not at all.
    async fn apply_plan(&self, plan: &PathPlan) -> Result<()> {
        self.commit(|state| {
            state.nullify(&plan.nullify);
            state.update(&plan.update)?;
            state.insert(&plan.create)?;
            state.delete(&plan.delete);
            Ok(())
        })
    }
}
