mod common;

use std::collections::HashSet;

use closure_hierarchy::engine::{create_nodes, update_nodes};
use closure_hierarchy::{EditRequest, HierarchyError, MemoryStore, NodeId};
use proptest::prelude::*;

use common::{closure_of, has_loop, triples, Links};

fn node(index: usize) -> NodeId {
    index as NodeId + 1
}

/// Parent of node `i` is `None` or a node listed before it.
fn forest() -> impl Strategy<Value = Vec<Option<usize>>> {
    (1usize..12).prop_flat_map(|size| {
        (0..size)
            .map(|i| {
                if i == 0 {
                    Just(None).boxed()
                } else {
                    proptest::option::of(0..i).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn forest_and_moves() -> impl Strategy<Value = (Vec<Option<usize>>, Vec<(usize, Option<usize>)>)> {
    forest().prop_flat_map(|parents| {
        let size = parents.len();
        let moves = proptest::collection::vec((0..size, proptest::option::of(0..size)), 0..=size);
        (Just(parents), moves)
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn committed(parents: &[Option<usize>]) -> (MemoryStore, Links) {
    let links: Vec<(NodeId, Option<NodeId>)> = parents
        .iter()
        .enumerate()
        .map(|(i, parent)| (node(i), parent.map(node)))
        .collect();
    let store = MemoryStore::from_parents(&links).unwrap();
    (store, links.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn applied_moves_match_rebuilt_closure((parents, moves) in forest_and_moves()) {
        let (store, initial) = committed(&parents);

        let mut seen = HashSet::new();
        let requests: Vec<EditRequest> = moves
            .into_iter()
            .filter(|(moved, _)| seen.insert(*moved))
            .map(|(moved, parent)| EditRequest::reparent(node(moved), parent.map(node)))
            .collect();

        let mut expected = initial.clone();
        for request in &requests {
            let moved = request.node_id.unwrap();
            expected.insert(moved, request.exist_parent);
        }

        let result = runtime().block_on(update_nodes(&store, &requests));
        let after = store.snapshot().unwrap();

        if has_loop(&expected) {
            prop_assert!(
                matches!(result, Err(HierarchyError::CycleDetected { .. })),
                "expected a loop, got {:?}",
                result
            );
            prop_assert_eq!(triples(&after), closure_of(&initial));
        } else {
            let plan = result.unwrap();
            prop_assert_eq!(plan.order.len() + plan.skipped.len(), requests.len());
            prop_assert_eq!(triples(&after), closure_of(&expected));
        }
    }

    #[test]
    fn created_batches_match_rebuilt_closure(
        parents in forest(),
        picks in proptest::collection::vec((0u8..3, any::<prop::sample::Index>()), 1..10),
    ) {
        let (store, mut expected) = committed(&parents);
        let requests: Vec<EditRequest> = picks
            .iter()
            .map(|(kind, pick)| match kind {
                0 => EditRequest::root(),
                1 => EditRequest::under(node(pick.index(parents.len()))),
                _ => EditRequest::under_request(pick.index(picks.len())),
            })
            .collect();

        // Batch-local references only: a loop among them is a loop of the batch.
        let local: Links = requests
            .iter()
            .enumerate()
            .map(|(i, request)| (i as NodeId, request.new_parent.map(|p| p as NodeId)))
            .collect();

        let mut next = 100;
        let result = runtime().block_on(create_nodes(&store, &requests, |_| {
            next += 1;
            next
        }));

        if has_loop(&local) {
            prop_assert!(
                matches!(result, Err(HierarchyError::CycleDetected { .. })),
                "expected a loop, got {:?}",
                result
            );
            prop_assert_eq!(triples(&store.snapshot().unwrap()), closure_of(&expected));
        } else {
            let ids = result.unwrap();
            for (request, id) in requests.iter().zip(&ids) {
                let parent = match (request.exist_parent, request.new_parent) {
                    (Some(parent), _) => Some(parent),
                    (None, Some(at)) => Some(ids[at]),
                    (None, None) => None,
                };
                expected.insert(*id, parent);
            }
            prop_assert_eq!(triples(&store.snapshot().unwrap()), closure_of(&expected));
        }
    }
}
