use super::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Store tracking how many records each (block, key) pair holds
#[derive(Default)]
struct MemStore {
    records: HashMap<(BlockId, BPlusKey), usize>,
}

impl MemStore {
    fn add(&mut self, block: BlockId, key: BPlusKey) {
        *self.records.entry((block, key)).or_default() += 1;
    }
}

impl RecordStore for MemStore {
    fn delete_records(&mut self, block: BlockId, key: BPlusKey) -> usize {
        self.records.remove(&(block, key)).unwrap_or(0)
    }
}

/// Insert into both tree and store
fn insert(tree: &mut BPlusTree, store: &mut MemStore, key: BPlusKey, block: BlockId) {
    tree.insert(key, block).unwrap();
    store.add(block, key);
}

fn chain_blocks(tree: &BPlusTree, key: BPlusKey) -> Vec<BlockId> {
    tree.search(key).map(|c| c.blocks().collect()).unwrap_or_default()
}

#[test]
fn test_new_rejects_degenerate_sizes() {
    assert!(matches!(
        BPlusTree::new(1, 4),
        Err(BPlusTreeError::InvalidMaxKeys(1))
    ));
    assert!(matches!(
        BPlusTree::new(4, 0),
        Err(BPlusTreeError::InvalidOverflowCapacity(0))
    ));
}

#[test]
fn test_empty_tree() {
    let tree = BPlusTree::new(4, 2).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.node_count(), 0);
    assert_eq!(tree.overflow_segment_count(), 0);
    assert!(tree.root_keys().is_empty());
    assert!(tree.first_child_keys().is_none());
    assert!(tree.search(1).is_none());
    assert!(tree.range_query(1, 10).unwrap().is_empty());
    tree.check_invariants().unwrap();
}

#[test]
fn test_single_insert() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    tree.insert(42, 7).unwrap();

    assert_eq!(tree.height(), 1);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.key_count(), 1);
    assert_eq!(tree.overflow_segment_count(), 1);
    assert_eq!(tree.root_keys(), vec![42]);
    assert_eq!(chain_blocks(&tree, 42), vec![7]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_leaf_split_sequence() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    for (block, key) in [10, 20, 5, 6, 12, 30, 7, 17].into_iter().enumerate() {
        tree.insert(key, block).unwrap();
        tree.check_invariants().unwrap();
    }

    assert_eq!(tree.leaf_keys(), vec![5, 6, 7, 10, 12, 17, 20, 30]);
    assert_eq!(tree.root_keys(), vec![12]);
    assert_eq!(tree.first_child_keys(), Some(vec![5, 6, 7, 10]));
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.node_count(), 3);

    // Every key has exactly its own block
    assert_eq!(chain_blocks(&tree, 10), vec![0]);
    assert_eq!(chain_blocks(&tree, 17), vec![7]);
}

#[test]
fn test_split_at_fifth_insert() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    for key in [10, 20, 5, 6] {
        tree.insert(key, 0).unwrap();
    }
    assert_eq!(tree.height(), 1);

    tree.insert(12, 0).unwrap();
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.root_keys(), vec![12]);
    assert_eq!(tree.first_child_keys(), Some(vec![5, 6, 10]));
}

#[test]
fn test_many_inserts_grow_height() {
    let mut tree = BPlusTree::new(3, 2).unwrap();
    for key in 0..200 {
        tree.insert(key, key as BlockId).unwrap();
    }
    tree.check_invariants().unwrap();

    assert!(tree.height() >= 4);
    assert_eq!(tree.key_count(), 200);
    assert_eq!(tree.leaf_keys(), (0..200).collect::<Vec<_>>());
    for key in 0..200 {
        assert_eq!(chain_blocks(&tree, key), vec![key as BlockId]);
    }
}

#[test]
fn test_reverse_and_even_max_keys() {
    for max_keys in [2, 4, 6] {
        let mut tree = BPlusTree::new(max_keys, 3).unwrap();
        for key in (0..100).rev() {
            tree.insert(key, 0).unwrap();
            tree.check_invariants().unwrap();
        }
        assert_eq!(tree.leaf_keys(), (0..100).collect::<Vec<_>>());
    }
}

#[test]
fn test_duplicates_fill_overflow_segments() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    for block in 0..5 {
        tree.insert(100, block).unwrap();
    }

    // One index key, blocks spread over ceil(5/2) segments
    assert_eq!(tree.key_count(), 1);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.overflow_segment_count(), 3);

    let chain = tree.search(100).unwrap();
    assert_eq!(chain.segment_count(), 3);
    assert_eq!(chain.len(), 5);
    assert_eq!(chain.blocks().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_duplicate_key_releases_chain() {
    let mut tree = BPlusTree::new(4, 1).unwrap();
    let mut store = MemStore::default();
    insert(&mut tree, &mut store, 50, 0);
    let before = tree.overflow_segment_count();

    for block in [3, 4, 5] {
        insert(&mut tree, &mut store, 100, block);
    }
    assert_eq!(tree.overflow_segment_count(), before + 3);

    let outcome = tree.delete_by_key(100, &mut store).unwrap();
    assert_eq!(outcome.segments_freed, 3);
    assert_eq!(outcome.records_deleted, 3);
    assert_eq!(outcome.nodes_removed, 0);
    assert_eq!(tree.overflow_segment_count(), before);
    assert!(tree.search(100).is_none());
    assert_eq!(chain_blocks(&tree, 50), vec![0]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_missing_key() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();

    // Empty tree
    let outcome = tree.delete_by_key(1, &mut store).unwrap();
    assert_eq!(outcome, DeleteOutcome::default());

    for key in 0..20 {
        insert(&mut tree, &mut store, key * 2, 0);
    }
    let nodes = tree.node_count();
    let outcome = tree.delete_by_key(7, &mut store).unwrap();
    assert_eq!(outcome, DeleteOutcome::default());
    assert_eq!(tree.node_count(), nodes);
    assert_eq!(tree.key_count(), 20);
}

#[test]
fn test_delete_first_key_updates_separator() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();
    for key in [10, 20, 5, 6, 12, 30, 7, 17] {
        insert(&mut tree, &mut store, key, 0);
    }
    assert_eq!(tree.root_keys(), vec![12]);

    // Right leaf [12, 17, 20, 30] loses its first key without underflow
    tree.delete_by_key(12, &mut store).unwrap();
    assert_eq!(tree.root_keys(), vec![17]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_borrows_from_left() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();
    for key in [10, 20, 5, 6, 12, 30, 7] {
        insert(&mut tree, &mut store, key, 0);
    }
    // Leaves [5, 6, 7, 10] [12, 20, 30]; min leaf size is 2
    tree.delete_by_key(30, &mut store).unwrap();
    tree.delete_by_key(20, &mut store).unwrap();

    assert_eq!(tree.root_keys(), vec![10]);
    assert_eq!(tree.leaf_keys(), vec![5, 6, 7, 10, 12]);
    assert_eq!(tree.node_count(), 3);
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_borrows_from_right() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();
    for key in [10, 20, 5, 6, 12, 30, 17] {
        insert(&mut tree, &mut store, key, 0);
    }
    // Leaves [5, 6, 10] [12, 17, 20, 30]
    tree.delete_by_key(5, &mut store).unwrap();
    tree.delete_by_key(6, &mut store).unwrap();

    assert_eq!(tree.root_keys(), vec![17]);
    assert_eq!(tree.first_child_keys(), Some(vec![10, 12]));
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_merge_collapses_root() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();
    for key in [10, 20, 5, 6, 12] {
        insert(&mut tree, &mut store, key, 0);
    }
    // Leaves [5, 6, 10] [12, 20]
    assert_eq!(tree.node_count(), 3);

    // Left leaf drops to the minimum, so it cannot lend
    let outcome = tree.delete_by_key(5, &mut store).unwrap();
    assert_eq!(outcome.nodes_removed, 0);

    let outcome = tree.delete_by_key(20, &mut store).unwrap();
    // Leaf merge frees one node, the root collapse another
    assert_eq!(outcome.nodes_removed, 2);
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.root_keys(), vec![6, 10, 12]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_merge_right_refreshes_ancestor_separator() {
    let mut tree = BPlusTree::new(2, 2).unwrap();
    let mut store = MemStore::default();
    for key in 1..=7 {
        insert(&mut tree, &mut store, key, 0);
    }
    // Root [5] over [3] ([1, 2] [3, 4]) and [7] ([5, 6] [7])
    assert_eq!(tree.root_keys(), vec![5]);
    assert_eq!(tree.height(), 3);

    tree.delete_by_key(5, &mut store).unwrap();
    assert_eq!(tree.root_keys(), vec![6]);

    // Leaf [6] empties at slot 0 and takes in [7]; the root separator must follow
    let outcome = tree.delete_by_key(6, &mut store).unwrap();
    assert_eq!(outcome.nodes_removed, 3);
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.root_keys(), vec![3, 7]);
    assert_eq!(tree.leaf_keys(), vec![1, 2, 3, 4, 7]);
    tree.check_invariants().unwrap();
}

#[test]
fn test_delete_all_keys_empties_tree() {
    for max_keys in [2, 3, 4, 5] {
        let mut tree = BPlusTree::new(max_keys, 2).unwrap();
        let mut store = MemStore::default();
        for key in 0..60 {
            insert(&mut tree, &mut store, key, (key % 7) as BlockId);
            insert(&mut tree, &mut store, key, (key % 5) as BlockId);
        }

        let mut removed = 0;
        // Interleave deletions from both ends and the middle
        let order: Vec<BPlusKey> = (0..30).flat_map(|i| [i, 59 - i]).collect();
        for key in order {
            let outcome = tree.delete_by_key(key, &mut store).unwrap();
            assert!(outcome.records_deleted >= 1);
            removed += outcome.nodes_removed;
            tree.check_invariants().unwrap();
            assert!(tree.search(key).is_none());
        }

        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.node_count(), 0);
        assert_eq!(tree.overflow_segment_count(), 0);
        assert!(removed > 0);
        assert!(store.records.is_empty());
    }
}

#[test]
fn test_last_key_removes_root_leaf() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    let mut store = MemStore::default();
    insert(&mut tree, &mut store, 1, 0);

    let outcome = tree.delete_by_key(1, &mut store).unwrap();
    assert_eq!(outcome.nodes_removed, 1);
    assert_eq!(outcome.records_deleted, 1);
    assert!(tree.is_empty());
    assert_eq!(tree.root_node_id(), None);
    assert_eq!(tree.first_leaf_id(), None);

    // Tree is usable again
    tree.insert(2, 1).unwrap();
    assert_eq!(tree.leaf_keys(), vec![2]);
    assert!(tree.root_node_id().is_some());
    assert_eq!(tree.first_leaf_id(), tree.root_node_id());
    tree.check_invariants().unwrap();
}

#[test]
fn test_range_query_rejects_bad_bounds() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    tree.insert(5, 0).unwrap();

    assert!(matches!(
        tree.range_query(5, 5),
        Err(BPlusTreeError::InvalidRange { start: 5, end: 5 })
    ));
    assert!(matches!(
        tree.range_query(5, 3),
        Err(BPlusTreeError::InvalidRange { start: 5, end: 3 })
    ));
}

#[test]
fn test_range_query_crosses_leaves() {
    let mut tree = BPlusTree::new(3, 2).unwrap();
    for key in (0..100).step_by(5) {
        tree.insert(key, key as BlockId).unwrap();
    }

    let keys: Vec<_> = tree
        .range_query(12, 41)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![15, 20, 25, 30, 35, 40]);

    // Bounds are inclusive
    let keys: Vec<_> = tree
        .range_query(15, 40)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![15, 20, 25, 30, 35, 40]);

    // Past the last key
    assert!(tree.range_query(200, 300).unwrap().is_empty());
    // Below the first key
    let keys: Vec<_> = tree
        .range_query(-10, 5)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![0, 5]);
}

#[test]
fn test_search_traced_counts_path() {
    let mut tree = BPlusTree::new(3, 2).unwrap();
    for key in 0..50 {
        tree.insert(key, 0).unwrap();
    }

    let (chain, access) = tree.search_traced(25, 2);
    assert!(chain.is_some());
    assert_eq!(access.nodes_accessed, tree.height());
    assert_eq!(access.visited.len(), 2);
    assert_eq!(access.visited[0], tree.root_keys());

    let (chain, access) = tree.search_traced(1000, 10);
    assert!(chain.is_none());
    assert_eq!(access.nodes_accessed, tree.height());
    assert_eq!(access.visited.len(), tree.height());
}

#[test]
fn test_range_traced_counts_leaves() {
    let mut tree = BPlusTree::new(4, 2).unwrap();
    for key in [10, 20, 5, 6, 12, 30, 7, 17] {
        tree.insert(key, 0).unwrap();
    }

    // Root, then both leaves
    let (results, access) = tree.range_query_traced(6, 18, 5).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(access.nodes_accessed, 3);
    assert_eq!(access.visited[0], vec![12]);

    // Stops in the first leaf when the end key is found there
    let (results, access) = tree.range_query_traced(5, 10, 5).unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(access.nodes_accessed, 2);
}

#[test]
fn test_iter() {
    let mut tree = BPlusTree::new(3, 2).unwrap();
    for key in [5, 3, 8, 1, 9, 2] {
        tree.insert(key, key as BlockId).unwrap();
    }
    tree.insert(3, 30).unwrap();

    let entries: Vec<_> = tree
        .iter()
        .map(|(k, c)| (k, c.blocks().collect::<Vec<_>>()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (1, vec![1]),
            (2, vec![2]),
            (3, vec![3, 30]),
            (5, vec![5]),
            (8, vec![8]),
            (9, vec![9]),
        ]
    );
}

#[test]
fn test_node_slots_are_recycled() {
    let mut tree = BPlusTree::new(2, 1).unwrap();
    let mut store = MemStore::default();
    let mut arena_sizes = Vec::new();
    for round in 0..3 {
        for key in 0..40 {
            insert(&mut tree, &mut store, key, round);
        }
        for key in 0..40 {
            tree.delete_by_key(key, &mut store).unwrap();
        }
        assert!(tree.is_empty());
        arena_sizes.push((tree.nodes.len(), tree.chains.len()));
    }
    // Later rounds reuse the slots freed by the first
    assert!(arena_sizes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_overfull_leaf_is_rejected() {
    let mut tree = BPlusTree::new(2, 2).unwrap();
    tree.insert(1, 0).unwrap();
    tree.insert(2, 0).unwrap();

    let root = tree.root_node_id().unwrap();
    let chain = tree.leaf(root).unwrap().chains[1];
    tree.leaf_mut(root).unwrap().insert_at(2, 3, chain);

    assert!(matches!(
        tree.check_invariants(),
        Err(BPlusTreeError::InvariantViolation(_))
    ));

    let nodes = tree.node_count();
    assert!(matches!(
        tree.insert(4, 0),
        Err(BPlusTreeError::InvariantViolation(_))
    ));
    // Duplicates take the same check
    assert!(matches!(
        tree.insert(1, 7),
        Err(BPlusTreeError::InvariantViolation(_))
    ));
    assert_eq!(tree.node_count(), nodes);
    assert_eq!(tree.key_count(), 2);
    assert_eq!(tree.leaf_keys(), vec![1, 2, 3]);
    assert_eq!(chain_blocks(&tree, 1), vec![0]);
}

#[test]
fn test_overfull_internal_node_is_rejected() {
    let mut tree = BPlusTree::new(2, 2).unwrap();
    for key in 1..=5 {
        tree.insert(key, 0).unwrap();
    }
    // Root [3, 5] over [1, 2] [3, 4] [5]
    assert_eq!(tree.root_keys(), vec![3, 5]);

    let root = tree.root_node_id().unwrap();
    let chain = tree.allocate_chain(9);
    let extra = tree.allocate_node(BPlusNode::Leaf(LeafNode::with_entries(vec![100], vec![chain])));
    let node = tree.internal_mut(root).unwrap();
    node.keys.push(100);
    node.children.push(extra);

    assert!(matches!(
        tree.check_invariants(),
        Err(BPlusTreeError::InvariantViolation(_))
    ));

    let nodes = tree.node_count();
    // 0 would split the full leftmost leaf, 6 would fit without a split
    for key in [0, 6] {
        assert!(matches!(
            tree.insert(key, 0),
            Err(BPlusTreeError::InvariantViolation(_))
        ));
    }
    assert_eq!(tree.node_count(), nodes);
    assert_eq!(tree.key_count(), 5);
    assert_eq!(tree.leaf_keys(), vec![1, 2, 3, 4, 5]);
    assert_eq!(tree.root_keys(), vec![3, 5, 100]);
}

// ========== Model-based property tests ==========

#[derive(Debug, Clone)]
enum Op {
    Insert(BPlusKey, BlockId),
    Delete(BPlusKey),
    Range(BPlusKey, BPlusKey),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..120i64, 0..16usize).prop_map(|(k, b)| Op::Insert(k, b)),
        2 => (0..120i64).prop_map(Op::Delete),
        1 => (0..120i64, 0..120i64).prop_map(|(a, b)| Op::Range(a, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_matches_btreemap_model(
        max_keys in 2usize..7,
        capacity in 1usize..4,
        ops in prop::collection::vec(op_strategy(), 1..300),
    ) {
        let mut tree = BPlusTree::new(max_keys, capacity).unwrap();
        let mut store = MemStore::default();
        let mut model: BTreeMap<BPlusKey, Vec<BlockId>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, block) => {
                    insert(&mut tree, &mut store, key, block);
                    model.entry(key).or_default().push(block);
                }
                Op::Delete(key) => {
                    let outcome = tree.delete_by_key(key, &mut store).unwrap();
                    match model.remove(&key) {
                        Some(blocks) => {
                            prop_assert_eq!(outcome.records_deleted, blocks.len());
                            prop_assert_eq!(outcome.segments_freed, blocks.len().div_ceil(capacity));
                        }
                        None => prop_assert_eq!(outcome, DeleteOutcome::default()),
                    }
                }
                Op::Range(start, end) => {
                    let result = tree.range_query(start, end);
                    if end <= start {
                        prop_assert!(result.is_err());
                    } else {
                        let got: Vec<_> = result
                            .unwrap()
                            .into_iter()
                            .map(|(k, c)| (k, c.blocks().collect::<Vec<_>>()))
                            .collect();
                        let want: Vec<_> = model
                            .range(start..=end)
                            .map(|(&k, b)| (k, b.clone()))
                            .collect();
                        prop_assert_eq!(got, want);
                    }
                }
            }

            prop_assert!(tree.check_invariants().is_ok(), "{:?}", tree.check_invariants());
        }

        prop_assert_eq!(tree.leaf_keys(), model.keys().copied().collect::<Vec<_>>());
        let segments: usize = model.values().map(|b| b.len().div_ceil(capacity)).sum();
        prop_assert_eq!(tree.overflow_segment_count(), segments);
        for (&key, blocks) in &model {
            prop_assert_eq!(&chain_blocks(&tree, key), blocks);
        }
    }
}
