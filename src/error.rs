use thiserror::Error;

use crate::path::NodeId;

/// Errors returned by the closure-hierarchy planners and repository.
#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("closure-hierarchy currently supports PostgreSQL connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("malformed edit batch: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{} will form a loop, which is not allowed in a closure table", list_requests(.requests))]
    CycleDetected { requests: Vec<usize> },

    #[error("request #{request} refers to batch index {parent}, which does not exist")]
    UnresolvableDependency { request: usize, parent: usize },

    #[error("request #{request} is invalid: {reason}")]
    InvalidRequest { request: usize, reason: String },

    #[error("node {0} does not exist in the closure table")]
    UnknownNode(NodeId),

    #[error("conflicting closure path ({ancestor:?} -> {descendant:?}): {detail}")]
    PathConflict {
        ancestor: Option<NodeId>,
        descendant: Option<NodeId>,
        detail: String,
    },

    #[error("store rejected a closure path write: {0}")]
    StoreConstraint(String),

    #[error("closure-hierarchy invariant violation: {0}")]
    Invariant(String),
}

impl HierarchyError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn invalid(request: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            request,
            reason: reason.into(),
        }
    }

    pub fn conflict(
        ancestor: Option<NodeId>,
        descendant: Option<NodeId>,
        detail: impl Into<String>,
    ) -> Self {
        Self::PathConflict {
            ancestor,
            descendant,
            detail: detail.into(),
        }
    }

    /// Whether the caller can fix the error by resubmitting a corrected batch.
    ///
    /// Path conflicts, constraint violations and invariant failures mean the
    /// closure table is already inconsistent and are reported as internal errors.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::UnresolvableDependency { .. }
                | Self::InvalidRequest { .. }
                | Self::UnknownNode(_)
                | Self::Json(_)
        )
    }

    /// Maps unique violations reported by the database onto [`HierarchyError::StoreConstraint`].
    pub(crate) fn from_db(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) => Self::StoreConstraint(detail),
            _ => Self::Database(err),
        }
    }
}

fn list_requests(requests: &[usize]) -> String {
    requests
        .iter()
        .map(|idx| format!("request #{idx}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T, E = HierarchyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_constraint_database_errors_pass_through() {
        let err = HierarchyError::from_db(sea_orm::DbErr::Custom("connection reset".into()));
        assert!(matches!(err, HierarchyError::Database(_)));
        assert!(!err.is_user_error());
    }

    #[test]
    fn cycle_message_lists_requests() {
        let err = HierarchyError::CycleDetected { requests: vec![0, 2] };
        assert!(err.to_string().contains("request #0, request #2"));
    }
}
