#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};

use closure_hierarchy::{ClosureIndex, NodeId};

pub type Links = BTreeMap<NodeId, Option<NodeId>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every `(ancestor, descendant, depth)` a closure table must hold for `links`.
pub fn closure_of(links: &Links) -> Vec<(NodeId, NodeId, i32)> {
    let mut rows = Vec::new();
    for &node in links.keys() {
        let mut depth = 0;
        let mut current = Some(node);
        while let Some(ancestor) = current {
            rows.push((ancestor, node, depth));
            depth += 1;
            current = links.get(&ancestor).copied().flatten();
            assert!(depth as usize <= links.len(), "links contain a loop");
        }
    }
    rows.sort_unstable();
    rows
}

/// Rows of `index` as sorted triples; nulled rows show up as `-1`.
pub fn triples(index: &ClosureIndex) -> Vec<(NodeId, NodeId, i32)> {
    let mut rows: Vec<_> = index
        .rows()
        .map(|row| {
            (
                row.ancestor.unwrap_or(-1),
                row.descendant.unwrap_or(-1),
                row.depth,
            )
        })
        .collect();
    rows.sort_unstable();
    rows
}

pub fn has_loop(links: &Links) -> bool {
    links.keys().any(|&start| {
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(node) = current {
            if !seen.insert(node) {
                return true;
            }
            current = links.get(&node).copied().flatten();
        }
        false
    })
}
