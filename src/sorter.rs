//! Dependency ordering for edit batches.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::cycle::{CycleDetector, FreshBatchDetector};
use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NodeId};
use crate::request::EditRequest;

/// Where a node created by the batch hangs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ParentRef {
    Root,
    /// A node committed before the batch started.
    Existing(NodeId),
    /// The node created by an earlier step, by position in the sorted order.
    Step(usize),
}

/// One creation in dependency order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct CreateStep {
    /// Position of the request in the caller's batch.
    pub origin: usize,
    pub parent: ParentRef,
}

/// Orders creation requests so every request comes after the request it names
/// as `new_parent`, rewriting that reference to the parent's sorted position.
///
/// Requests without a batch-local parent keep their relative order at the
/// front. A committed `exist_parent` takes precedence over `new_parent`.
pub fn sort_creation(requests: &[EditRequest]) -> Result<Vec<CreateStep>> {
    let mut sorted = Vec::with_capacity(requests.len());
    let mut position: Vec<Option<usize>> = vec![None; requests.len()];
    let mut deferred = Vec::new();

    for (idx, request) in requests.iter().enumerate() {
        let parent = match (request.exist_parent, request.new_parent) {
            (Some(parent), _) => ParentRef::Existing(parent),
            (None, None) => ParentRef::Root,
            (None, Some(parent)) => {
                if parent >= requests.len() {
                    return Err(HierarchyError::UnresolvableDependency {
                        request: idx,
                        parent,
                    });
                }
                deferred.push((idx, parent));
                continue;
            }
        };
        position[idx] = Some(sorted.len());
        sorted.push(CreateStep {
            origin: idx,
            parent,
        });
    }

    let mut passes = 0;
    while !deferred.is_empty() {
        passes += 1;
        let before = deferred.len();
        deferred.retain(|&(idx, parent)| match position[parent] {
            Some(at) => {
                position[idx] = Some(sorted.len());
                sorted.push(CreateStep {
                    origin: idx,
                    parent: ParentRef::Step(at),
                });
                false
            }
            None => true,
        });

        if deferred.len() == before {
            // Only a loop can stall the scan; name its members precisely.
            FreshBatchDetector.ensure_acyclic(requests)?;
            return Err(HierarchyError::CycleDetected {
                requests: deferred.iter().map(|&(idx, _)| idx).collect(),
            });
        }
    }

    tracing::debug!(
        requests = requests.len(),
        passes,
        order = ?sorted.iter().map(|step| step.origin).collect::<Vec<_>>(),
        "sorted creation batch"
    );
    Ok(sorted)
}

/// A committed node that changes parent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Move {
    /// Position of the request in the caller's batch.
    pub origin: usize,
    pub node: NodeId,
    pub parent: Option<NodeId>,
}

/// A move in dependency order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct OrderedMove {
    pub mv: Move,
    /// The nearest moved node at or above the new parent, if any. Its new
    /// ancestor path has to be known before this move can be resolved.
    pub dependency: Option<NodeId>,
}

/// Orders moves so that each comes after its dependency.
pub fn sort_updates(index: &ClosureIndex, moves: &[Move]) -> Result<Vec<OrderedMove>> {
    let moved: HashSet<NodeId> = moves.iter().map(|mv| mv.node).collect();
    let mut sorted = Vec::with_capacity(moves.len());
    let mut emitted = HashSet::with_capacity(moves.len());
    let mut deferred = Vec::new();

    for mv in moves {
        let dependency = match mv.parent {
            Some(parent) => dependency_of(index, &moved, mv, parent)?,
            None => None,
        };
        match dependency {
            None => {
                emitted.insert(mv.node);
                sorted.push(OrderedMove {
                    mv: *mv,
                    dependency,
                });
            }
            Some(_) => deferred.push(OrderedMove {
                mv: *mv,
                dependency,
            }),
        }
    }

    let dependencies: HashMap<NodeId, Option<NodeId>> = deferred
        .iter()
        .map(|ordered| (ordered.mv.node, ordered.dependency))
        .collect();
    tracing::debug!(?dependencies, "update dependencies");

    while !deferred.is_empty() {
        let before = deferred.len();
        deferred.retain(|ordered| {
            let ready = ordered
                .dependency
                .map_or(true, |dependency| emitted.contains(&dependency));
            if ready {
                emitted.insert(ordered.mv.node);
                sorted.push(*ordered);
            }
            !ready
        });
        if deferred.len() == before {
            let mut requests: Vec<usize> = deferred.iter().map(|o| o.mv.origin).collect();
            requests.sort_unstable();
            return Err(HierarchyError::CycleDetected { requests });
        }
    }

    Ok(sorted)
}

/// Walks from the new parent upwards and returns the first moved node other
/// than the moving node itself. Meeting the moving node first means the new
/// parent lies in its own subtree with nothing in between moving away.
fn dependency_of(
    index: &ClosureIndex,
    moved: &HashSet<NodeId>,
    mv: &Move,
    parent: NodeId,
) -> Result<Option<NodeId>> {
    let chain = std::iter::once(parent).chain(index.ancestors(parent).into_iter().map(|e| e.node));
    for node in chain {
        if node == mv.node {
            return Err(HierarchyError::CycleDetected {
                requests: vec![mv.origin],
            });
        }
        if moved.contains(&node) {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathRow;

    #[test]
    fn independent_requests_keep_their_order() {
        let requests = [
            EditRequest::under_request(2),
            EditRequest::root(),
            EditRequest::under(10),
            EditRequest::under_request(0),
        ];
        let steps = sort_creation(&requests).unwrap();
        let origins: Vec<usize> = steps.iter().map(|s| s.origin).collect();
        assert_eq!(origins, vec![1, 2, 0, 3]);
        assert_eq!(steps[2].parent, ParentRef::Step(1));
        assert_eq!(steps[3].parent, ParentRef::Step(2));
    }

    #[test]
    fn deep_chain_declared_backwards() {
        let requests = [
            EditRequest::under_request(1),
            EditRequest::under_request(2),
            EditRequest::under_request(3),
            EditRequest::root(),
        ];
        let steps = sort_creation(&requests).unwrap();
        let origins: Vec<usize> = steps.iter().map(|s| s.origin).collect();
        assert_eq!(origins, vec![3, 2, 1, 0]);
        for (at, step) in steps.iter().enumerate().skip(1) {
            assert_eq!(step.parent, ParentRef::Step(at - 1));
        }
    }

    #[test]
    fn stalled_scan_reports_only_the_loop() {
        let requests = [
            EditRequest::under_request(1),
            EditRequest::under_request(0),
            EditRequest::under_request(1),
        ];
        match sort_creation(&requests).unwrap_err() {
            HierarchyError::CycleDetected { requests } => assert_eq!(requests, vec![0, 1]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn dangling_batch_index() {
        let err = sort_creation(&[EditRequest::root(), EditRequest::under_request(9)]).unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::UnresolvableDependency {
                request: 1,
                parent: 9
            }
        ));
    }

    #[test]
    fn moves_wait_for_the_node_above_their_new_parent() {
        // 1 -> 2 -> 3, 4
        let index = ClosureIndex::from_rows([
            PathRow::new(1, 1, 1, 0),
            PathRow::new(2, 2, 2, 0),
            PathRow::new(3, 3, 3, 0),
            PathRow::new(4, 4, 4, 0),
            PathRow::new(5, 1, 2, 1),
            PathRow::new(6, 2, 3, 1),
            PathRow::new(7, 1, 3, 2),
        ]);
        let moves = [
            Move {
                origin: 0,
                node: 4,
                parent: Some(3),
            },
            Move {
                origin: 1,
                node: 2,
                parent: None,
            },
        ];
        let sorted = sort_updates(&index, &moves).unwrap();
        assert_eq!(sorted[0].mv.node, 2);
        assert_eq!(sorted[1].mv.node, 4);
        assert_eq!(sorted[1].dependency, Some(2));
    }
}
