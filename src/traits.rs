use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel};

use crate::config::HierarchyConfig;
use crate::path::{NewPath, NodeId, PathRow};

/// Trait implemented by SeaORM `Model` types whose hierarchy is kept in a
/// closure table.
///
/// Implementations are normally provided by `#[derive(HierarchyModel)]`. The
/// closure entity needs a primary key `id`, nullable `BIGINT` ancestor and
/// descendant columns and an `INTEGER` depth column.
pub trait HierarchyModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;

    type PathEntity: EntityTrait<Model = Self::PathModel>;
    type PathModel: Clone + Send + Sync + 'static + FromQueryResult;
    type PathActiveModel: ActiveModelTrait<Entity = Self::PathEntity> + ActiveModelBehavior + Send;

    fn hierarchy_config() -> &'static HierarchyConfig;

    fn node_id(&self) -> NodeId;
    fn id_column() -> <Self::Entity as EntityTrait>::Column;

    fn path_id_column() -> <Self::PathEntity as EntityTrait>::Column;
    fn path_ancestor_column() -> <Self::PathEntity as EntityTrait>::Column;
    fn path_descendant_column() -> <Self::PathEntity as EntityTrait>::Column;
    fn path_depth_column() -> <Self::PathEntity as EntityTrait>::Column;

    fn path_row(model: &Self::PathModel) -> PathRow;
    fn build_path(path: NewPath) -> Self::PathActiveModel;
}
