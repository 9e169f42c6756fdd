//! Loop detection for edit batches.
//!
//! Both strategies reduce a batch to a graph whose vertices are request
//! indices and report every strongly connected component that forms a loop.

use std::collections::HashMap;

use crate::error::{HierarchyError, Result};
use crate::path::{ClosureIndex, NodeId};
use crate::request::EditRequest;

/// Finds groups of requests that would form a loop once committed.
pub trait CycleDetector {
    /// Every loop found, each group holding ascending request indices.
    /// An empty result means the batch is acyclic.
    fn detect(&self, requests: &[EditRequest]) -> Result<Vec<Vec<usize>>>;

    /// Fails with [`HierarchyError::CycleDetected`] naming every request in any loop.
    fn ensure_acyclic(&self, requests: &[EditRequest]) -> Result<()> {
        let groups = self.detect(requests)?;
        if groups.is_empty() {
            return Ok(());
        }
        let mut involved: Vec<usize> = groups.into_iter().flatten().collect();
        involved.sort_unstable();
        involved.dedup();
        tracing::debug!(requests = ?involved, "edit batch rejected, loop detected");
        Err(HierarchyError::CycleDetected { requests: involved })
    }
}

/// Strategy for batches that only create nodes.
///
/// New nodes can only point at each other through `new_parent`, and a node
/// hanging off a committed parent cannot take part in a loop, so only
/// batch-local edges are considered.
#[derive(Clone, Copy, Debug, Default)]
pub struct FreshBatchDetector;

impl CycleDetector for FreshBatchDetector {
    fn detect(&self, requests: &[EditRequest]) -> Result<Vec<Vec<usize>>> {
        let mut graph = vec![Vec::new(); requests.len()];
        for (idx, request) in requests.iter().enumerate() {
            if request.exist_parent.is_some() {
                continue;
            }
            if let Some(parent) = request.new_parent {
                if parent >= requests.len() {
                    return Err(HierarchyError::UnresolvableDependency {
                        request: idx,
                        parent,
                    });
                }
                graph[parent].push(idx);
            }
        }
        Ok(loops(&graph))
    }
}

/// Strategy for batches that move committed nodes.
///
/// A proposed parent may already sit inside the subtree of the node being
/// moved, so every batch edge is resolved against the committed ancestors of
/// the proposed parent before searching for loops.
#[derive(Clone, Copy, Debug)]
pub struct CrossTreeDetector<'a> {
    index: &'a ClosureIndex,
}

impl<'a> CrossTreeDetector<'a> {
    pub fn new(index: &'a ClosureIndex) -> Self {
        Self { index }
    }

    /// Position of every edited node inside the batch.
    fn positions(requests: &[EditRequest]) -> Result<HashMap<NodeId, usize>> {
        let mut positions = HashMap::with_capacity(requests.len());
        for (idx, request) in requests.iter().enumerate() {
            let node = request
                .node_id
                .ok_or_else(|| HierarchyError::invalid(idx, "an update must name its node"))?;
            if positions.insert(node, idx).is_some() {
                return Err(HierarchyError::invalid(
                    idx,
                    format!("node {node} is edited more than once"),
                ));
            }
        }
        Ok(positions)
    }
}

impl CycleDetector for CrossTreeDetector<'_> {
    fn detect(&self, requests: &[EditRequest]) -> Result<Vec<Vec<usize>>> {
        let positions = Self::positions(requests)?;
        let mut graph = vec![Vec::new(); requests.len()];

        for (idx, request) in requests.iter().enumerate() {
            let Some(parent) = request.exist_parent else {
                continue;
            };
            if !self.index.contains_node(parent) {
                return Err(HierarchyError::UnknownNode(parent));
            }

            // The parent's final position is decided by the nearest edited
            // node at or above it; unedited nodes keep their committed parent.
            let anchor = std::iter::once(parent)
                .chain(self.index.ancestors(parent).into_iter().map(|e| e.node))
                .find_map(|node| positions.get(&node).copied());

            if let Some(anchor) = anchor {
                graph[anchor].push(idx);
            }
        }

        Ok(loops(&graph))
    }
}

/// Strongly connected components that form loops: more than one member, or a
/// single member with an edge to itself.
fn loops(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    tarjan(graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph[component[0]].contains(&component[0])
        })
        .map(|mut component| {
            component.sort_unstable();
            component
        })
        .collect()
}

/// Iterative Tarjan SCC over vertices `0..graph.len()`.
fn tarjan(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = graph.len();
    let mut order = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut counter = 0;

    for start in 0..n {
        if order[start] != UNVISITED {
            continue;
        }
        // (vertex, next edge to inspect)
        let mut frames = vec![(start, 0usize)];
        order[start] = counter;
        low[start] = counter;
        counter += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&mut (vertex, ref mut edge)) = frames.last_mut() {
            if let Some(&next) = graph[vertex].get(*edge) {
                *edge += 1;
                if order[next] == UNVISITED {
                    order[next] = counter;
                    low[next] = counter;
                    counter += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    frames.push((next, 0));
                } else if on_stack[next] {
                    low[vertex] = low[vertex].min(order[next]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                low[parent] = low[parent].min(low[vertex]);
            }
            if low[vertex] == order[vertex] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == vertex {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}
