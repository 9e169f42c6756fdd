use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Value,
};

use crate::cascade::DeletePlan;
use crate::config::HierarchyConfig;
use crate::engine::{self, UpdatePlan};
use crate::error::{HierarchyError, Result};
use crate::lock::LockedTransaction;
use crate::path::{ClosureIndex, NewPath, NodeId, PathEntry, PathId, PathRow};
use crate::query::DepthLimit;
use crate::reconcile::PathUpdate;
use crate::request::EditRequest;
use crate::sorter::ParentRef;
use crate::store::PathStore;
use crate::traits::HierarchyModel;

/// Repository exposing the batch operations and queries for a given model.
#[derive(Debug, Default)]
pub struct HierarchyRepository<M>
where
    M: HierarchyModel,
{
    _marker: PhantomData<M>,
}

impl<M> HierarchyRepository<M>
where
    M: HierarchyModel,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static HierarchyConfig {
        M::hierarchy_config()
    }

    fn ensure_postgres(conn: &impl ConnectionTrait) -> Result<()> {
        if conn.get_database_backend() == DbBackend::Postgres {
            Ok(())
        } else {
            Err(HierarchyError::UnsupportedBackend)
        }
    }

    /// [`PathStore`] view of the closure table over `conn`.
    pub fn paths<'c, C: ConnectionTrait>(&self, conn: &'c C) -> SeaOrmPaths<'c, M, C> {
        SeaOrmPaths {
            conn,
            _marker: PhantomData,
        }
    }

    /// Inserts one node per request together with its closure rows.
    ///
    /// `payloads[i]` is the record inserted for `requests[i]`; the models are
    /// returned in the same order.
    pub async fn create_batch(
        &self,
        db: &DatabaseConnection,
        requests: &[EditRequest],
        payloads: Vec<M::ActiveModel>,
    ) -> Result<Vec<M>> {
        Self::ensure_postgres(db)?;
        if payloads.len() != requests.len() {
            return Err(HierarchyError::invalid(
                payloads.len().min(requests.len()),
                format!(
                    "{} requests were given {} records",
                    requests.len(),
                    payloads.len()
                ),
            ));
        }

        let guard = LockedTransaction::acquire(self.config().advisory_lock_strategy(), db).await?;
        let result = self
            .create_batch_on(guard.connection(), requests, payloads)
            .await;
        self.finish(guard, result).await
    }

    pub async fn update_batch(
        &self,
        db: &DatabaseConnection,
        requests: &[EditRequest],
    ) -> Result<UpdatePlan> {
        Self::ensure_postgres(db)?;
        let guard = LockedTransaction::acquire(self.config().advisory_lock_strategy(), db).await?;
        let result = engine::update_nodes(&self.paths(guard.connection()), requests).await;
        self.finish(guard, result).await
    }

    /// Deletes the subtrees below `roots`: closure rows first, then nodes.
    pub async fn delete_subtrees(
        &self,
        db: &DatabaseConnection,
        roots: &[NodeId],
    ) -> Result<DeletePlan> {
        Self::ensure_postgres(db)?;
        let guard = LockedTransaction::acquire(self.config().advisory_lock_strategy(), db).await?;
        let result = self.delete_subtrees_on(guard.connection(), roots).await;
        self.finish(guard, result).await
    }

    async fn finish<T>(&self, guard: LockedTransaction, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                guard.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if err.is_user_error() {
                    tracing::debug!(
                        table = self.config().path_table(),
                        error = %err,
                        "hierarchy batch rejected"
                    );
                } else {
                    tracing::error!(
                        table = self.config().path_table(),
                        error = %err,
                        "hierarchy batch failed, rolling back"
                    );
                }
                let _ = guard.rollback().await;
                Err(err)
            }
        }
    }

    async fn create_batch_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        requests: &[EditRequest],
        payloads: Vec<M::ActiveModel>,
    ) -> Result<Vec<M>> {
        let plan = engine::plan_create(requests)?;
        let store = self.paths(conn);
        let parents = ClosureIndex::from_rows(store.paths_to(&plan.existing_parents()).await?);

        let mut payloads: Vec<Option<M::ActiveModel>> = payloads.into_iter().map(Some).collect();
        let mut models: Vec<Option<M>> = vec![None; requests.len()];
        let mut tracker = plan.tracker();
        let mut rows = Vec::new();

        for (position, step) in plan.steps().iter().enumerate() {
            let active = payloads[step.origin].take().ok_or_else(|| {
                HierarchyError::invariant(format!("record for request #{} used twice", step.origin))
            })?;
            let model = active.insert(conn).await.map_err(HierarchyError::from_db)?;
            let parent_paths: Vec<PathRow> = match step.parent {
                ParentRef::Existing(parent) => {
                    parents.rows_to(parent).into_iter().copied().collect()
                }
                _ => Vec::new(),
            };
            rows.extend(tracker.record(position, model.node_id(), &parent_paths)?);
            models[step.origin] = Some(model);
        }

        store.insert_paths(&rows).await?;
        tracing::info!(
            entity = self.config().entity_name(),
            table = self.config().path_table(),
            nodes = requests.len(),
            paths = rows.len(),
            "created hierarchy nodes"
        );

        models
            .into_iter()
            .enumerate()
            .map(|(idx, model)| {
                model.ok_or_else(|| HierarchyError::invariant(format!("request #{idx} was not inserted")))
            })
            .collect()
    }

    async fn delete_subtrees_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        roots: &[NodeId],
    ) -> Result<DeletePlan> {
        let plan = engine::delete_subtrees(&self.paths(conn), roots).await?;
        if !plan.nodes.is_empty() {
            M::Entity::delete_many()
                .filter(M::id_column().is_in(plan.nodes.iter().copied()))
                .exec(conn)
                .await?;
        }
        Ok(plan)
    }

    pub async fn ancestors_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: NodeId,
        limit: DepthLimit,
        include_self: bool,
    ) -> Result<Vec<PathEntry>> {
        Self::ensure_postgres(conn)?;
        let mut query = M::PathEntity::find().filter(M::path_descendant_column().eq(node));
        query = Self::bound_depth(query, limit, include_self);
        let rows = query
            .order_by_asc(M::path_depth_column())
            .order_by_asc(M::path_ancestor_column())
            .all(conn)
            .await?;

        Ok(rows
            .iter()
            .map(M::path_row)
            .filter_map(|row| row.ancestor.map(|node| PathEntry { node, depth: row.depth }))
            .collect())
    }

    pub async fn descendants_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: NodeId,
        limit: DepthLimit,
        include_self: bool,
    ) -> Result<Vec<PathEntry>> {
        Self::ensure_postgres(conn)?;
        let mut query = M::PathEntity::find().filter(M::path_ancestor_column().eq(node));
        query = Self::bound_depth(query, limit, include_self);
        let rows = query
            .order_by_asc(M::path_depth_column())
            .order_by_asc(M::path_descendant_column())
            .all(conn)
            .await?;

        Ok(rows
            .iter()
            .map(M::path_row)
            .filter_map(|row| row.descendant.map(|node| PathEntry { node, depth: row.depth }))
            .collect())
    }

    pub async fn roots<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<NodeId>> {
        Self::ensure_postgres(conn)?;
        self.paths(conn).roots().await
    }

    /// Ancestor records of `node`, nearest first.
    pub async fn ancestor_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: NodeId,
        limit: DepthLimit,
    ) -> Result<Vec<M>> {
        let entries = self.ancestors_of(conn, node, limit, false).await?;
        self.load_in_order(conn, &entries).await
    }

    /// Descendant records of `node`, shallowest first.
    pub async fn descendant_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: NodeId,
        limit: DepthLimit,
    ) -> Result<Vec<M>> {
        let entries = self.descendants_of(conn, node, limit, false).await?;
        self.load_in_order(conn, &entries).await
    }

    pub async fn root_nodes<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>> {
        let ids = self.roots(conn).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let models = M::Entity::find()
            .filter(M::id_column().is_in(ids))
            .order_by_asc(M::id_column())
            .all(conn)
            .await?;
        Ok(models)
    }

    pub async fn parent<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Option<M>> {
        let entries = self
            .ancestors_of(conn, model.node_id(), DepthLimit::AtMost(1), false)
            .await?;
        Ok(self.load_in_order(conn, &entries).await?.into_iter().next())
    }

    pub async fn children<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>> {
        let entries = self
            .descendants_of(conn, model.node_id(), DepthLimit::AtMost(1), false)
            .await?;
        self.load_in_order(conn, &entries).await
    }

    fn bound_depth(
        mut query: sea_orm::Select<M::PathEntity>,
        limit: DepthLimit,
        include_self: bool,
    ) -> sea_orm::Select<M::PathEntity> {
        if let Some(max) = limit.max_depth() {
            query = query.filter(M::path_depth_column().lte(max));
        }
        if !include_self {
            query = query.filter(M::path_depth_column().gt(0));
        }
        query
    }

    async fn load_in_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        entries: &[PathEntry],
    ) -> Result<Vec<M>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<NodeId, M> = M::Entity::find()
            .filter(M::id_column().is_in(entries.iter().map(|entry| entry.node)))
            .all(conn)
            .await?
            .into_iter()
            .map(|model| (model.node_id(), model))
            .collect();

        Ok(entries
            .iter()
            .filter_map(|entry| by_id.remove(&entry.node))
            .collect())
    }
}

/// Closure table of `M` reached through a SeaORM connection or transaction.
pub struct SeaOrmPaths<'c, M, C> {
    conn: &'c C,
    _marker: PhantomData<M>,
}

impl<'c, M, C> SeaOrmPaths<'c, M, C>
where
    M: HierarchyModel,
    C: ConnectionTrait,
{
    async fn load(
        &self,
        column: <M::PathEntity as EntityTrait>::Column,
        nodes: &[NodeId],
    ) -> Result<Vec<PathRow>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = M::PathEntity::find()
            .filter(column.is_in(nodes.iter().copied()))
            .order_by_asc(M::path_id_column())
            .all(self.conn)
            .await?;
        Ok(rows.iter().map(M::path_row).collect())
    }
}

#[async_trait]
impl<'c, M, C> PathStore for SeaOrmPaths<'c, M, C>
where
    M: HierarchyModel,
    C: ConnectionTrait,
{
    async fn paths_to(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>> {
        self.load(M::path_descendant_column(), nodes).await
    }

    async fn paths_from(&self, nodes: &[NodeId]) -> Result<Vec<PathRow>> {
        self.load(M::path_ancestor_column(), nodes).await
    }

    async fn roots(&self) -> Result<Vec<NodeId>> {
        let nested = Query::select()
            .column(M::path_descendant_column())
            .from(M::PathEntity::default())
            .and_where(M::path_depth_column().gt(0))
            .to_owned();

        let ids: Vec<Option<i64>> = M::PathEntity::find()
            .select_only()
            .column(M::path_descendant_column())
            .filter(M::path_depth_column().eq(0))
            .filter(M::path_descendant_column().not_in_subquery(nested))
            .order_by_asc(M::path_descendant_column())
            .into_tuple()
            .all(self.conn)
            .await?;
        Ok(ids.into_iter().flatten().collect())
    }

    async fn insert_paths(&self, rows: &[NewPath]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        M::PathEntity::insert_many(rows.iter().copied().map(M::build_path))
            .exec(self.conn)
            .await
            .map_err(HierarchyError::from_db)?;
        Ok(())
    }

    async fn update_paths(&self, updates: &[PathUpdate]) -> Result<()> {
        for update in updates {
            M::PathEntity::update_many()
                .col_expr(M::path_ancestor_column(), Expr::value(update.ancestor))
                .col_expr(M::path_descendant_column(), Expr::value(update.descendant))
                .col_expr(M::path_depth_column(), Expr::value(update.depth))
                .filter(M::path_id_column().eq(update.id))
                .exec(self.conn)
                .await
                .map_err(HierarchyError::from_db)?;
        }
        Ok(())
    }

    async fn nullify_paths(&self, ids: &[PathId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        M::PathEntity::update_many()
            .col_expr(M::path_ancestor_column(), Expr::value(Value::BigInt(None)))
            .col_expr(M::path_descendant_column(), Expr::value(Value::BigInt(None)))
            .filter(M::path_id_column().is_in(ids.iter().copied()))
            .exec(self.conn)
            .await
            .map_err(HierarchyError::from_db)?;
        Ok(())
    }

    async fn delete_paths(&self, ids: &[PathId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        M::PathEntity::delete_many()
            .filter(M::path_id_column().is_in(ids.iter().copied()))
            .exec(self.conn)
            .await
            .map_err(HierarchyError::from_db)?;
        Ok(())
    }
}
