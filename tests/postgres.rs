use closure_hierarchy::{DepthLimit, EditRequest, HierarchyError, HierarchyRepository, NewPath, PathStore};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Database, DatabaseConnection, DbBackend, Statement};

mod entity {
    pub mod node {
        use closure_hierarchy::HierarchyModelDerive as HierarchyModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, HierarchyModel)]
        #[sea_orm(table_name = "nodes")]
        #[hierarchy(path_module = "crate::entity::node_path", path_table = "node_paths")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod node_path {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "node_paths")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub ancestor: Option<i64>,
            pub descendant: Option<i64>,
            pub depth: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::node;

fn named(name: &str) -> node::ActiveModel {
    node::ActiveModel {
        name: ActiveValue::Set(name.to_owned()),
        ..Default::default()
    }
}

fn names(models: &[node::Model]) -> Vec<&str> {
    models.iter().map(|model| model.name.as_str()).collect()
}

#[tokio::test]
async fn batch_edits_round_trip_through_postgres() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = setup_database().await? else {
        return Ok(());
    };
    truncate_tables(&db).await?;

    let repo = HierarchyRepository::<node::Model>::new();

    // root -> (child -> leaf), other
    let created = repo
        .create_batch(
            &db,
            &[
                EditRequest::under_request(1),
                EditRequest::root(),
                EditRequest::under_request(0),
                EditRequest::root(),
            ],
            vec![named("child"), named("root"), named("leaf"), named("other")],
        )
        .await?;
    assert_eq!(names(&created), vec!["child", "root", "leaf", "other"]);
    let (child, root, leaf, other) = (&created[0], &created[1], &created[2], &created[3]);

    let err = repo
        .paths(&db)
        .insert_paths(&[NewPath::new(root.id, child.id, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::StoreConstraint(_)));

    let ancestors = repo.ancestor_nodes(&db, leaf.id, DepthLimit::Unlimited).await?;
    assert_eq!(names(&ancestors), vec!["child", "root"]);
    let roots = repo.root_nodes(&db).await?;
    assert_eq!(names(&roots), vec!["root", "other"]);

    // Move the child subtree under `other` and lift the leaf to the root level.
    repo.update_batch(
        &db,
        &[
            EditRequest::reparent(child.id, Some(other.id)),
            EditRequest::reparent(leaf.id, None),
        ],
    )
    .await?;
    let parent = repo.parent(&db, child).await?;
    assert_eq!(parent.as_ref().map(|model| model.id), Some(other.id));
    assert!(repo.children(&db, root).await?.is_empty());
    assert_eq!(repo.roots(&db).await?, vec![root.id, other.id, leaf.id]);

    let err = repo
        .update_batch(&db, &[EditRequest::reparent(other.id, Some(child.id))])
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::CycleDetected { .. }));

    let plan = repo.delete_subtrees(&db, &[other.id]).await?;
    let mut doomed = vec![child.id, other.id];
    doomed.sort_unstable();
    assert_eq!(plan.nodes, doomed);
    let remaining = repo.root_nodes(&db).await?;
    assert_eq!(names(&remaining), vec!["root", "leaf"]);
    assert!(repo
        .descendants_of(&db, other.id, DepthLimit::Unlimited, true)
        .await?
        .is_empty());

    Ok(())
}

async fn setup_database() -> Result<Option<DatabaseConnection>, sea_orm::DbErr> {
    let url = match std::env::var("CLOSURE_HIERARCHY_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => return Ok(None),
    };

    Database::connect(url).await.map(Some)
}

async fn truncate_tables(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS node_paths (
            id BIGSERIAL PRIMARY KEY,
            ancestor BIGINT REFERENCES nodes(id) ON DELETE CASCADE,
            descendant BIGINT REFERENCES nodes(id) ON DELETE CASCADE,
            depth INTEGER NOT NULL,
            UNIQUE (ancestor, descendant)
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "TRUNCATE TABLE node_paths RESTART IDENTITY CASCADE;",
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "TRUNCATE TABLE nodes RESTART IDENTITY CASCADE;",
    ))
    .await?;

    Ok(())
}
