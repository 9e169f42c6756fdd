//! Closure-table hierarchies for SeaORM.
//!
//! Every `(ancestor, descendant)` pair of a forest is stored as one row with
//! its depth, so ancestor and descendant lookups are single queries. This
//! crate keeps that table consistent under batch edits:
//!
//! * creating many nodes at once, parents possibly created by the same batch,
//! * moving subtrees in batches, including moves that depend on each other,
//! * deleting whole subtrees.
//!
//! Planning is pure and works on a [`ClosureIndex`]; the [`engine`] module
//! drives it through any [`PathStore`], and [`HierarchyRepository`] binds it
//! to a SeaORM entity inside a locked PostgreSQL transaction.

pub mod cascade;
pub mod config;
pub mod cycle;
pub mod delta;
pub mod engine;
pub mod error;
pub mod lock;
pub mod path;
pub mod query;
pub mod reconcile;
pub mod repository;
pub mod request;
pub mod sorter;
pub mod store;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{AdvisoryLockStrategy, HierarchyConfig, HierarchyOptions};
    pub use crate::error::{HierarchyError, Result};
    pub use crate::path::{NodeId, PathEntry};
    pub use crate::query::DepthLimit;
    pub use crate::repository::HierarchyRepository;
    pub use crate::request::{EditForm, EditRequest};
    pub use crate::traits::HierarchyModel;
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell;
}

pub use closure_hierarchy_macros::HierarchyModel as HierarchyModelDerive;
#[doc(hidden)]
pub use closure_hierarchy_macros::HierarchyModel;
pub use config::{AdvisoryLockKey, AdvisoryLockStrategy, HierarchyConfig, HierarchyOptions};
pub use cycle::{CrossTreeDetector, CycleDetector, FreshBatchDetector};
pub use engine::{CreatePlan, InsertionTracker, UpdatePlan};
pub use error::{HierarchyError, Result};
pub use path::{ClosureIndex, NewPath, NodeId, PathEntry, PathId, PathRow};
pub use query::{DepthLimit, TreeNode};
pub use reconcile::{PathPlan, PathUpdate};
pub use repository::{HierarchyRepository, SeaOrmPaths};
pub use request::{EditForm, EditRequest};
pub use store::{MemoryStore, PathStore};
pub use traits::HierarchyModel;
