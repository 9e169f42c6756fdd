//! Edit requests submitted by the host application.

use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::path::NodeId;

/// One pending structural change inside a batch.
///
/// * `node_id`: the node being edited; unset for nodes created by the batch.
/// * `exist_parent`: an already committed parent, or unset for a root.
/// * `new_parent`: position of another request in the same batch that will
///   become the parent. Only meaningful while creating nodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EditRequest {
    #[serde(default, alias = "id", deserialize_with = "lenient")]
    pub node_id: Option<NodeId>,
    #[serde(default, deserialize_with = "lenient")]
    pub exist_parent: Option<NodeId>,
    #[serde(default, deserialize_with = "lenient")]
    pub new_parent: Option<usize>,
}

impl EditRequest {
    /// A new root node.
    pub fn root() -> Self {
        Self::default()
    }

    /// A new node placed under a committed parent.
    pub fn under(parent: NodeId) -> Self {
        Self {
            exist_parent: Some(parent),
            ..Self::default()
        }
    }

    /// A new node placed under the node created by request `index` of the same batch.
    pub fn under_request(index: usize) -> Self {
        Self {
            new_parent: Some(index),
            ..Self::default()
        }
    }

    /// Moves an existing node under `parent`, or makes it a root when `parent` is `None`.
    pub fn reparent(node: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            node_id: Some(node),
            exist_parent: parent,
            new_parent: None,
        }
    }

    /// Parses a JSON array of form-like objects.
    ///
    /// Ids may be numbers or numeric strings; `null` and `""` mean "unset".
    pub fn parse_batch(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Read access to whatever form type the host uses for edit input.
///
/// Implement this for the host's own form struct instead of converting every
/// form by hand; [`requests_from_forms`] turns a slice of forms into a batch.
///
/// Forms are only read. Batch-local parents that sorting rewrites to sorted
/// positions come back through [`CreatePlan::steps`](crate::CreatePlan::steps)
/// and are never set on the form.
pub trait EditForm {
    fn node_id(&self) -> Option<NodeId>;
    fn exist_parent(&self) -> Option<NodeId>;
    fn new_parent(&self) -> Option<usize>;

    fn to_request(&self) -> EditRequest {
        EditRequest {
            node_id: self.node_id(),
            exist_parent: self.exist_parent(),
            new_parent: self.new_parent(),
        }
    }
}

impl EditForm for EditRequest {
    fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    fn exist_parent(&self) -> Option<NodeId> {
        self.exist_parent
    }

    fn new_parent(&self) -> Option<usize> {
        self.new_parent
    }

    fn to_request(&self) -> EditRequest {
        *self
    }
}

pub fn requests_from_forms<F: EditForm>(forms: &[F]) -> Vec<EditRequest> {
    forms.iter().map(EditForm::to_request).collect()
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<i64>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(raw) if raw.trim().is_empty() => Ok(None),
        Value::String(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("`{raw}` is not a valid id"))),
        Value::Number(number) => number
            .as_i64()
            .and_then(|value| T::try_from(value).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("`{number}` is not a valid id"))),
        other => Err(D::Error::custom(format!("unexpected id value {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_like_input() {
        let batch = EditRequest::parse_batch(
            r#"[
                {"id": "", "exist_parent": 12, "new_parent": null},
                {"exist_parent": "", "new_parent": "0"},
                {"id": "7", "exist_parent": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(batch[0], EditRequest::under(12));
        assert_eq!(batch[1], EditRequest::under_request(0));
        assert_eq!(batch[2], EditRequest::reparent(7, None));
    }

    #[test]
    fn rejects_negative_batch_index() {
        let err = EditRequest::parse_batch(r#"[{"new_parent": -1}]"#).unwrap_err();
        assert!(err.is_user_error());
    }

    struct TagForm {
        id: Option<i64>,
        parent: Option<i64>,
    }

    impl EditForm for TagForm {
        fn node_id(&self) -> Option<NodeId> {
            self.id
        }

        fn exist_parent(&self) -> Option<NodeId> {
            self.parent
        }

        fn new_parent(&self) -> Option<usize> {
            None
        }
    }

    #[test]
    fn adapts_host_forms() {
        let forms = [TagForm {
            id: Some(3),
            parent: Some(1),
        }];
        assert_eq!(
            requests_from_forms(&forms),
            vec![EditRequest::reparent(3, Some(1))]
        );
    }
}
