//! B+ Tree index over block-resident records
//!
//! This module provides the index structure used to locate records by an
//! integer key. It supports:
//! - Duplicate keys, stored once per leaf with an overflow chain of block
//!   references (see [`OverflowChain`])
//! - Point lookups and inclusive range queries (via linked leaf nodes)
//! - Deletion with borrow/merge rebalancing
//!
//! Nodes and chains live in arenas addressed by [`NodeId`] / [`ChainId`].
//! Parents are never searched for: every mutation records its descent path
//! and walks it back up.

mod error;
mod node;
mod overflow;
#[cfg(test)]
mod tests;

pub use error::{BPlusTreeError, BPlusTreeResult};
pub use node::{BPlusNode, InternalNode, LeafNode, NodeId};
pub use overflow::{ChainId, ChainRelease, OverflowChain, OverflowSegment};

use serde::Serialize;
use tracing::{debug, trace};

use crate::record::{BlockId, RecordStore};

/// Key type for B+ tree
pub type BPlusKey = i64;

/// Root-to-leaf descent: (internal node, child index followed)
type Path = Vec<(NodeId, usize)>;

/// Nodes touched by a lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeAccess {
    /// Internal and leaf nodes visited
    pub nodes_accessed: usize,
    /// Keys of the first few visited nodes, in visit order
    pub visited: Vec<Vec<BPlusKey>>,
}

impl NodeAccess {
    fn record(&mut self, keys: &[BPlusKey], keep: usize) {
        self.nodes_accessed += 1;
        if self.visited.len() < keep {
            self.visited.push(keys.to_vec());
        }
    }
}

/// Result of deleting a key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// Tree nodes freed by merges and root collapses
    pub nodes_removed: usize,
    /// Overflow segments freed with the key's chain
    pub segments_freed: usize,
    /// Records the store reported deleted
    pub records_deleted: usize,
}

/// B+ Tree data structure
///
/// `max_keys` (N) bounds every node:
/// - Every node holds at most N keys
/// - Leaves (except root) hold at least `floor((N+1)/2)` keys
/// - Internal nodes (except root) hold at least `floor(N/2)` keys
///
/// `overflow_capacity` (M) bounds the references per overflow segment.
#[derive(Debug)]
pub struct BPlusTree {
    /// Root node ID (None if tree is empty)
    root: Option<NodeId>,

    /// Max keys per node
    max_keys: usize,

    /// Max block references per overflow segment
    overflow_capacity: usize,

    /// Node storage
    nodes: Vec<Option<BPlusNode>>,

    /// Free list for recycling deleted nodes
    free_list: Vec<NodeId>,

    /// Live nodes
    node_count: usize,

    /// Overflow chain storage
    chains: Vec<Option<OverflowChain>>,

    /// Free list for recycling released chains
    free_chains: Vec<ChainId>,

    /// Live overflow segments across all chains
    overflow_segments: usize,

    /// First leaf node (for full range scans)
    first_leaf: Option<NodeId>,

    /// Number of distinct keys in the tree
    key_count: usize,
}

impl BPlusTree {
    /// Create a new empty B+ tree
    ///
    /// # Arguments
    /// * `max_keys` - Maximum keys per node (must be >= 2)
    /// * `overflow_capacity` - Maximum block references per overflow segment (must be >= 1)
    pub fn new(max_keys: usize, overflow_capacity: usize) -> BPlusTreeResult<Self> {
        if max_keys < 2 {
            return Err(BPlusTreeError::InvalidMaxKeys(max_keys));
        }
        if overflow_capacity == 0 {
            return Err(BPlusTreeError::InvalidOverflowCapacity(overflow_capacity));
        }

        Ok(Self {
            root: None,
            max_keys,
            overflow_capacity,
            nodes: Vec::new(),
            free_list: Vec::new(),
            node_count: 0,
            chains: Vec::new(),
            free_chains: Vec::new(),
            overflow_segments: 0,
            first_leaf: None,
            key_count: 0,
        })
    }

    /// Maximum keys per node (N)
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Maximum block references per overflow segment (M)
    pub fn overflow_capacity(&self) -> usize {
        self.overflow_capacity
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of distinct keys in the tree
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Number of live overflow segments
    pub fn overflow_segment_count(&self) -> usize {
        self.overflow_segments
    }

    /// Get tree height (0 when empty, 1 for single leaf, 2+ with internal nodes)
    pub fn height(&self) -> usize {
        match self.root_node_id() {
            None => 0,
            Some(root_id) => {
                let mut height = 1;
                let mut current = root_id;

                while let Some(BPlusNode::Internal(node)) = self.get_node(current) {
                    match node.children.first() {
                        Some(&child_id) => {
                            current = child_id;
                            height += 1;
                        }
                        None => break,
                    }
                }

                height
            }
        }
    }

    /// Minimum keys in a non-root leaf
    fn min_leaf_keys(&self) -> usize {
        (self.max_keys + 1) / 2
    }

    /// Minimum keys in a non-root internal node
    fn min_internal_keys(&self) -> usize {
        self.max_keys / 2
    }

    /// Entries kept by the left half of a leaf split (of N+1 entries)
    fn leaf_split_point(&self) -> usize {
        (self.max_keys + 1).div_ceil(2)
    }

    /// Keys kept by the left half of an internal split (of N+1 keys);
    /// the next key is promoted
    fn internal_split_point(&self) -> usize {
        self.max_keys.div_ceil(2)
    }

    // ========== Node Management ==========

    /// Allocate a new node, returning its ID
    fn allocate_node(&mut self, node: BPlusNode) -> NodeId {
        self.node_count += 1;
        if let Some(id) = self.free_list.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Some(node));
            id
        }
    }

    /// Remove a node from storage, adding its slot to the free list
    fn take_node(&mut self, id: NodeId) -> BPlusTreeResult<BPlusNode> {
        let node = self
            .nodes
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(BPlusTreeError::NodeNotFound(id))?;
        self.free_list.push(id);
        self.node_count -= 1;
        Ok(node)
    }

    fn take_leaf(&mut self, id: NodeId) -> BPlusTreeResult<LeafNode> {
        match self.take_node(id)? {
            BPlusNode::Leaf(leaf) => Ok(leaf),
            BPlusNode::Internal(_) => Err(BPlusTreeError::InvalidState(format!(
                "node {} is not a leaf",
                id
            ))),
        }
    }

    fn take_internal(&mut self, id: NodeId) -> BPlusTreeResult<InternalNode> {
        match self.take_node(id)? {
            BPlusNode::Internal(node) => Ok(node),
            BPlusNode::Leaf(_) => Err(BPlusTreeError::InvalidState(format!(
                "node {} is not an internal node",
                id
            ))),
        }
    }

    /// Get a reference to a node by ID
    pub fn get_node(&self, id: NodeId) -> Option<&BPlusNode> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    /// Get a mutable reference to a node by ID
    fn get_node_mut(&mut self, id: NodeId) -> Option<&mut BPlusNode> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut())
    }

    fn leaf(&self, id: NodeId) -> BPlusTreeResult<&LeafNode> {
        self.get_node(id)
            .and_then(|n| n.as_leaf())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn leaf_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut LeafNode> {
        self.get_node_mut(id)
            .and_then(|n| n.as_leaf_mut())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn internal(&self, id: NodeId) -> BPlusTreeResult<&InternalNode> {
        self.get_node(id)
            .and_then(|n| n.as_internal())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn internal_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut InternalNode> {
        self.get_node_mut(id)
            .and_then(|n| n.as_internal_mut())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    /// Get the root node ID
    pub fn root_node_id(&self) -> Option<NodeId> {
        self.root
    }

    /// Get the first leaf node ID
    pub fn first_leaf_id(&self) -> Option<NodeId> {
        self.first_leaf
    }

    /// Keys of the root node (empty when the tree is empty)
    pub fn root_keys(&self) -> Vec<BPlusKey> {
        self.root
            .and_then(|id| self.get_node(id))
            .map(|n| n.keys().to_vec())
            .unwrap_or_default()
    }

    /// Keys of the root's first child, if the root is an internal node
    pub fn first_child_keys(&self) -> Option<Vec<BPlusKey>> {
        let root = self.internal(self.root?).ok()?;
        let child = self.get_node(*root.children.first()?)?;
        Some(child.keys().to_vec())
    }

    // ========== Overflow Chains ==========

    fn allocate_chain(&mut self, block: BlockId) -> ChainId {
        let chain = OverflowChain::new(block, self.overflow_capacity);
        self.overflow_segments += chain.segment_count();
        if let Some(id) = self.free_chains.pop() {
            self.chains[id] = Some(chain);
            id
        } else {
            let id = self.chains.len();
            self.chains.push(Some(chain));
            id
        }
    }

    fn take_chain(&mut self, id: ChainId) -> BPlusTreeResult<OverflowChain> {
        let chain = self
            .chains
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(BPlusTreeError::ChainNotFound(id))?;
        self.free_chains.push(id);
        Ok(chain)
    }

    /// Get an overflow chain by ID
    pub fn chain(&self, id: ChainId) -> Option<&OverflowChain> {
        self.chains.get(id).and_then(|c| c.as_ref())
    }

    fn chain_ref(&self, id: ChainId) -> BPlusTreeResult<&OverflowChain> {
        self.chain(id).ok_or(BPlusTreeError::ChainNotFound(id))
    }

    // ========== Search Operations ==========

    /// Search for a key, returning its overflow chain
    pub fn search(&self, key: BPlusKey) -> Option<&OverflowChain> {
        self.search_traced(key, 0).0
    }

    /// Search for a key, also reporting the nodes visited
    /// (keys of at most `keep` nodes are retained)
    pub fn search_traced(&self, key: BPlusKey, keep: usize) -> (Option<&OverflowChain>, NodeAccess) {
        let mut access = NodeAccess::default();
        let mut current = match self.root {
            Some(id) => id,
            None => return (None, access),
        };

        loop {
            match self.get_node(current) {
                Some(BPlusNode::Internal(node)) => {
                    access.record(&node.keys, keep);
                    current = node.children[node.find_child_index(key)];
                }
                Some(BPlusNode::Leaf(leaf)) => {
                    access.record(&leaf.keys, keep);
                    let chain = leaf.search(key).and_then(|id| self.chain(id));
                    return (chain, access);
                }
                None => return (None, access),
            }
        }
    }

    /// Range search: every key with `start <= key <= end`, ascending, with its chain
    ///
    /// `end` must be strictly greater than `start`.
    pub fn range_query(
        &self,
        start: BPlusKey,
        end: BPlusKey,
    ) -> BPlusTreeResult<Vec<(BPlusKey, &OverflowChain)>> {
        self.range_query_traced(start, end, 0)
            .map(|(results, _)| results)
    }

    /// Range search, also reporting the nodes visited
    pub fn range_query_traced(
        &self,
        start: BPlusKey,
        end: BPlusKey,
        keep: usize,
    ) -> BPlusTreeResult<(Vec<(BPlusKey, &OverflowChain)>, NodeAccess)> {
        if end <= start {
            return Err(BPlusTreeError::InvalidRange { start, end });
        }

        let mut results = Vec::new();
        let mut access = NodeAccess::default();

        let mut current = match self.root {
            Some(id) => id,
            None => return Ok((results, access)),
        };

        // Descend to the leaf that would hold `start`
        while let BPlusNode::Internal(node) = self
            .get_node(current)
            .ok_or(BPlusTreeError::NodeNotFound(current))?
        {
            access.record(&node.keys, keep);
            current = node.children[node.find_child_index(start)];
        }

        // Scan through leaf nodes
        let mut next_leaf = Some(current);
        'leaves: while let Some(id) = next_leaf {
            let leaf = self.leaf(id)?;
            access.record(&leaf.keys, keep);

            for (i, &k) in leaf.keys.iter().enumerate() {
                if k > end {
                    break 'leaves;
                }
                if k >= start {
                    results.push((k, self.chain_ref(leaf.chains[i])?));
                }
                if k == end {
                    break 'leaves;
                }
            }

            next_leaf = leaf.next;
        }

        Ok((results, access))
    }

    /// Find the leaf node that should contain the given key and the path from root to it
    fn find_leaf_with_path(&self, key: BPlusKey) -> BPlusTreeResult<(NodeId, Path)> {
        let mut current = self
            .root
            .ok_or_else(|| BPlusTreeError::InvalidState("tree is empty".to_string()))?;
        let mut path = Vec::new();

        loop {
            match self
                .get_node(current)
                .ok_or(BPlusTreeError::NodeNotFound(current))?
            {
                BPlusNode::Leaf(_) => return Ok((current, path)),
                BPlusNode::Internal(node) => {
                    let child_idx = node.find_child_index(key);
                    path.push((current, child_idx));
                    current = node.children[child_idx];
                }
            }
        }
    }

    /// Left and right siblings of `parent.children[child_idx]`
    fn siblings(
        &self,
        parent_id: NodeId,
        child_idx: usize,
    ) -> BPlusTreeResult<(Option<NodeId>, Option<NodeId>)> {
        let parent = self.internal(parent_id)?;
        let left = child_idx
            .checked_sub(1)
            .and_then(|i| parent.children.get(i))
            .copied();
        let right = parent.children.get(child_idx + 1).copied();
        Ok((left, right))
    }

    // ========== Insert Operations ==========

    /// Insert a key with a reference to the block holding its record
    ///
    /// A key already present gets the block appended to its overflow chain;
    /// the tree shape does not change.
    pub fn insert(&mut self, key: BPlusKey, block: BlockId) -> BPlusTreeResult<()> {
        if self.root.is_none() {
            // Create first leaf as root
            let chain = self.allocate_chain(block);
            let leaf = LeafNode::with_entries(vec![key], vec![chain]);
            let leaf_id = self.allocate_node(BPlusNode::Leaf(leaf));
            self.root = Some(leaf_id);
            self.first_leaf = Some(leaf_id);
            self.key_count = 1;
            return Ok(());
        }

        let (leaf_id, path) = self.find_leaf_with_path(key)?;

        // Nothing is mutated while a node on the path is already over capacity
        for &(ancestor, _) in &path {
            let node = self.internal(ancestor)?;
            if node.len() > self.max_keys {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "internal node {} holds {} keys, max is {}",
                    ancestor,
                    node.len(),
                    self.max_keys
                )));
            }
        }

        let position = {
            let leaf = self.leaf(leaf_id)?;
            if leaf.len() > self.max_keys {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "leaf {} holds {} keys, max is {}",
                    leaf_id,
                    leaf.len(),
                    self.max_keys
                )));
            }
            leaf.locate(key)
        };

        let index = match position {
            Ok(existing) => {
                // Duplicate: no new index key, only a new block reference
                let chain_id = self.leaf(leaf_id)?.chains[existing];
                let chain = self
                    .chains
                    .get_mut(chain_id)
                    .and_then(|c| c.as_mut())
                    .ok_or(BPlusTreeError::ChainNotFound(chain_id))?;
                if chain.push(block) {
                    self.overflow_segments += 1;
                    trace!(key, chain = chain_id, "linked new overflow segment");
                }
                return Ok(());
            }
            Err(index) => index,
        };

        let chain_id = self.allocate_chain(block);
        self.key_count += 1;

        let max_keys = self.max_keys;
        let leaf = self.leaf_mut(leaf_id)?;
        leaf.insert_at(index, key, chain_id);

        if leaf.len() > max_keys {
            self.split_leaf(leaf_id, path)?;
        }

        Ok(())
    }

    /// Split an overflowing leaf node
    fn split_leaf(&mut self, leaf_id: NodeId, path: Path) -> BPlusTreeResult<()> {
        let split_at = self.leaf_split_point();

        let right = self.leaf_mut(leaf_id)?.split(split_at);
        let separator = right
            .min_key()
            .ok_or_else(|| BPlusTreeError::InvalidState("empty right half".to_string()))?;

        // Link the new leaf; it inherited the old sibling link
        let right_id = self.allocate_node(BPlusNode::Leaf(right));
        self.leaf_mut(leaf_id)?.next = Some(right_id);

        trace!(left = leaf_id, right = right_id, separator, "split leaf");

        self.insert_into_parent(path, leaf_id, separator, right_id)
    }

    /// Insert a separator and new right child into the parent after a split,
    /// splitting ancestors as long as they overflow
    fn insert_into_parent(
        &mut self,
        mut path: Path,
        left_id: NodeId,
        key: BPlusKey,
        right_id: NodeId,
    ) -> BPlusTreeResult<()> {
        let max_keys = self.max_keys;
        let split_at = self.internal_split_point();

        let (mut left_id, mut key, mut right_id) = (left_id, key, right_id);

        while let Some((parent_id, child_idx)) = path.pop() {
            let parent = self.internal_mut(parent_id)?;
            if parent.len() > max_keys {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "internal node {} holds {} keys, max is {}",
                    parent_id,
                    parent.len(),
                    max_keys
                )));
            }

            parent.insert_child(child_idx, key, right_id);
            if parent.len() <= max_keys {
                return Ok(());
            }

            // Parent overflows: the key after the left half moves up
            let (promoted, right) = parent.split(split_at)?;
            let new_right = self.allocate_node(BPlusNode::Internal(right));

            trace!(left = parent_id, right = new_right, promoted, "split internal node");

            left_id = parent_id;
            key = promoted;
            right_id = new_right;
        }

        // Split the root - create new root
        let new_root = InternalNode::new(vec![key], vec![left_id, right_id]);
        let new_root_id = self.allocate_node(BPlusNode::Internal(new_root));
        self.root = Some(new_root_id);

        debug!(root = new_root_id, height = self.height(), "tree grew a level");

        Ok(())
    }

    // ========== Delete Operations ==========

    /// Delete a key and every record carrying it
    ///
    /// The key's overflow chain is walked and `store` is asked to drop the
    /// key's records from each referenced block. A missing key (or an empty
    /// tree) yields an all-zero outcome.
    pub fn delete_by_key<S>(&mut self, key: BPlusKey, store: &mut S) -> BPlusTreeResult<DeleteOutcome>
    where
        S: RecordStore + ?Sized,
    {
        let mut outcome = DeleteOutcome::default();

        if self.root.is_none() {
            return Ok(outcome);
        }

        let (leaf_id, path) = self.find_leaf_with_path(key)?;

        let index = match self.leaf(leaf_id)?.locate(key) {
            Ok(index) => index,
            Err(_) => return Ok(outcome),
        };

        let (_, chain_id) = self.leaf_mut(leaf_id)?.remove_at(index);
        let release = self.take_chain(chain_id)?.release(key, store);
        self.overflow_segments -= release.segments_freed;
        self.key_count -= 1;
        outcome.segments_freed = release.segments_freed;
        outcome.records_deleted = release.records_deleted;

        // Leaf is root: no minimum
        if path.is_empty() {
            if self.leaf(leaf_id)?.is_empty() {
                // Tree is now empty
                self.take_node(leaf_id)?;
                self.root = None;
                self.first_leaf = None;
                outcome.nodes_removed = 1;
            }
            debug!(key, ?outcome, "deleted key from root leaf");
            return Ok(outcome);
        }

        if index == 0 {
            if let Some(first) = self.leaf(leaf_id)?.min_key() {
                self.update_separator(&path, first)?;
            }
        }

        if self.leaf(leaf_id)?.len() < self.min_leaf_keys() {
            outcome.nodes_removed = self.handle_leaf_underflow(leaf_id, path)?;
        }

        debug!(key, ?outcome, "deleted key");

        Ok(outcome)
    }

    /// The leaf at the end of `path` has a new first key: fix the separator
    /// that bounds it on the left, which sits at the lowest ancestor where the
    /// path does not take the first child
    fn update_separator(&mut self, path: &[(NodeId, usize)], key: BPlusKey) -> BPlusTreeResult<()> {
        for &(ancestor, child_idx) in path.iter().rev() {
            if child_idx > 0 {
                self.internal_mut(ancestor)?.keys[child_idx - 1] = key;
                break;
            }
        }
        Ok(())
    }

    /// Rebalance an underflowing leaf, returning the number of nodes freed
    ///
    /// Priority: borrow from left, borrow from right, merge into left, merge right in.
    fn handle_leaf_underflow(&mut self, leaf_id: NodeId, mut path: Path) -> BPlusTreeResult<usize> {
        let (parent_id, child_idx) = *path
            .last()
            .ok_or_else(|| BPlusTreeError::InvalidState("leaf underflow at root".to_string()))?;
        let min_keys = self.min_leaf_keys();
        let (left_sibling, right_sibling) = self.siblings(parent_id, child_idx)?;

        if let Some(left_id) = left_sibling {
            if self.leaf(left_id)?.len() > min_keys {
                // Borrow from left sibling (take its last entry)
                let (key, chain) = {
                    let left = self.leaf_mut(left_id)?;
                    let last = left.len() - 1;
                    left.remove_at(last)
                };
                self.leaf_mut(leaf_id)?.insert_at(0, key, chain);
                self.internal_mut(parent_id)?.keys[child_idx - 1] = key;

                trace!(leaf = leaf_id, from = left_id, key, "leaf borrowed from left");
                return Ok(0);
            }
        }

        if let Some(right_id) = right_sibling {
            if self.leaf(right_id)?.len() > min_keys {
                // Borrow from right sibling (take its first entry)
                let (key, chain) = self.leaf_mut(right_id)?.remove_at(0);
                let was_empty = {
                    let leaf = self.leaf_mut(leaf_id)?;
                    let was_empty = leaf.is_empty();
                    let end = leaf.len();
                    leaf.insert_at(end, key, chain);
                    was_empty
                };

                let right_first = self
                    .leaf(right_id)?
                    .min_key()
                    .ok_or_else(|| BPlusTreeError::InvalidState("right sibling drained".to_string()))?;
                self.internal_mut(parent_id)?.keys[child_idx] = right_first;

                if was_empty {
                    self.update_separator(&path, key)?;
                }

                trace!(leaf = leaf_id, from = right_id, key, "leaf borrowed from right");
                return Ok(0);
            }
        }

        path.pop();

        if let Some(left_id) = left_sibling {
            // Merge into left sibling, dropping this leaf
            let leaf = self.take_leaf(leaf_id)?;
            self.leaf_mut(left_id)?.absorb(leaf);

            trace!(survivor = left_id, removed = leaf_id, "merged leaf into left sibling");
            return Ok(1 + self.remove_internal(parent_id, child_idx - 1, child_idx, path)?);
        }

        if let Some(right_id) = right_sibling {
            // Merge right sibling into this leaf
            let right = self.take_leaf(right_id)?;
            let leaf = self.leaf_mut(leaf_id)?;
            let was_empty = leaf.is_empty();
            leaf.absorb(right);

            // An emptied leaf now starts with the sibling's first key
            if was_empty {
                if let Some(first) = self.leaf(leaf_id)?.min_key() {
                    self.update_separator(&path, first)?;
                }
            }

            trace!(survivor = leaf_id, removed = right_id, "merged right sibling into leaf");
            return Ok(1 + self.remove_internal(parent_id, child_idx, child_idx + 1, path)?);
        }

        Err(BPlusTreeError::InvalidState(format!(
            "leaf {} has no sibling",
            leaf_id
        )))
    }

    /// Remove a separator and the pointer to a freed child from `node_id`,
    /// then repair underflow level by level up `path` (the ancestors of `node_id`).
    /// Returns the number of nodes freed.
    fn remove_internal(
        &mut self,
        node_id: NodeId,
        key_index: usize,
        child_index: usize,
        mut path: Path,
    ) -> BPlusTreeResult<usize> {
        let min_keys = self.min_internal_keys();
        let mut removed = 0;
        let (mut node_id, mut key_index, mut child_index) = (node_id, key_index, child_index);

        loop {
            self.internal_mut(node_id)?
                .remove_child(key_index, child_index);

            let (parent_id, idx) = match path.last() {
                Some(&entry) => entry,
                None => {
                    // Root: no minimum, but a single child replaces it
                    let root = self.internal(node_id)?;
                    if root.children.len() == 1 {
                        let new_root = root.children[0];
                        self.take_node(node_id)?;
                        self.root = Some(new_root);
                        removed += 1;
                        debug!(root = new_root, "collapsed root");
                    }
                    return Ok(removed);
                }
            };

            if self.internal(node_id)?.len() >= min_keys {
                return Ok(removed);
            }

            let (left_sibling, right_sibling) = self.siblings(parent_id, idx)?;

            if let Some(left_id) = left_sibling {
                if self.internal(left_id)?.len() > min_keys {
                    // Rotate left sibling's last child through the parent
                    let (key, child) = {
                        let left = self.internal_mut(left_id)?;
                        match (left.keys.pop(), left.children.pop()) {
                            (Some(key), Some(child)) => (key, child),
                            _ => {
                                return Err(BPlusTreeError::InvalidState(format!(
                                    "internal node {} is empty",
                                    left_id
                                )));
                            }
                        }
                    };
                    let separator =
                        std::mem::replace(&mut self.internal_mut(parent_id)?.keys[idx - 1], key);
                    let node = self.internal_mut(node_id)?;
                    node.keys.insert(0, separator);
                    node.children.insert(0, child);

                    trace!(node = node_id, from = left_id, "internal node borrowed from left");
                    return Ok(removed);
                }
            }

            if let Some(right_id) = right_sibling {
                if self.internal(right_id)?.len() > min_keys {
                    // Rotate right sibling's first child through the parent
                    let (key, child) = self.internal_mut(right_id)?.remove_child(0, 0);
                    let separator =
                        std::mem::replace(&mut self.internal_mut(parent_id)?.keys[idx], key);
                    let node = self.internal_mut(node_id)?;
                    node.keys.push(separator);
                    node.children.push(child);

                    trace!(node = node_id, from = right_id, "internal node borrowed from right");
                    return Ok(removed);
                }
            }

            path.pop();

            if let Some(left_id) = left_sibling {
                // Pull the separator down and append this node to the left sibling
                let node = self.take_internal(node_id)?;
                let separator = self.internal(parent_id)?.keys[idx - 1];
                let left = self.internal_mut(left_id)?;
                left.keys.push(separator);
                left.keys.extend(node.keys);
                left.children.extend(node.children);
                removed += 1;

                trace!(survivor = left_id, removed = node_id, "merged internal node into left sibling");
                node_id = parent_id;
                key_index = idx - 1;
                child_index = idx;
                continue;
            }

            if let Some(right_id) = right_sibling {
                // Pull the separator down and append the right sibling to this node
                let right = self.take_internal(right_id)?;
                let separator = self.internal(parent_id)?.keys[idx];
                let node = self.internal_mut(node_id)?;
                node.keys.push(separator);
                node.keys.extend(right.keys);
                node.children.extend(right.children);
                removed += 1;

                trace!(survivor = node_id, removed = right_id, "merged right sibling into internal node");
                node_id = parent_id;
                key_index = idx;
                child_index = idx + 1;
                continue;
            }

            return Err(BPlusTreeError::InvalidState(format!(
                "internal node {} has no sibling",
                node_id
            )));
        }
    }

    // ========== Validation ==========

    /// Verify every structural invariant, reporting the first violation
    ///
    /// Checks key order and bounds per node, minimum occupancy below the
    /// root, uniform leaf depth, separator ranges, the sibling-link order,
    /// overflow chain shape, and the node/key/segment counters.
    pub fn check_invariants(&self) -> BPlusTreeResult<()> {
        let violation = |msg: String| Err(BPlusTreeError::InvariantViolation(msg));

        let root = match self.root {
            Some(root) => root,
            None => {
                if self.node_count != 0 || self.key_count != 0 || self.overflow_segments != 0 {
                    return violation(format!(
                        "empty tree reports {} nodes, {} keys, {} segments",
                        self.node_count, self.key_count, self.overflow_segments
                    ));
                }
                return Ok(());
            }
        };

        // (node, depth, lower bound inclusive, upper bound exclusive)
        let mut stack = vec![(root, 1usize, None::<BPlusKey>, None::<BPlusKey>)];
        let mut leaves_in_order = Vec::new();
        let mut leaf_depth = None;
        let mut reachable = 0;
        let mut segments = 0;

        while let Some((id, depth, lower, upper)) = stack.pop() {
            reachable += 1;
            let node = self
                .get_node(id)
                .ok_or(BPlusTreeError::NodeNotFound(id))?;
            let keys = node.keys();

            if keys.len() > self.max_keys {
                return violation(format!("node {} holds {} keys", id, keys.len()));
            }
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return violation(format!("node {} keys not strictly increasing", id));
            }
            if let (Some(lo), Some(&first)) = (lower, keys.first()) {
                if first < lo {
                    return violation(format!("node {} key {} below bound {}", id, first, lo));
                }
            }
            if let (Some(hi), Some(&last)) = (upper, keys.last()) {
                if last >= hi {
                    return violation(format!("node {} key {} not below bound {}", id, last, hi));
                }
            }

            match node {
                BPlusNode::Leaf(leaf) => {
                    if id != root && leaf.len() < self.min_leaf_keys() {
                        return violation(format!("leaf {} underflows with {} keys", id, leaf.len()));
                    }
                    if leaf.chains.len() != leaf.keys.len() {
                        return violation(format!("leaf {} keys/chains length mismatch", id));
                    }
                    match leaf_depth {
                        None => leaf_depth = Some(depth),
                        Some(d) if d != depth => {
                            return violation(format!("leaf {} at depth {}, expected {}", id, depth, d));
                        }
                        Some(_) => {}
                    }
                    for &chain_id in &leaf.chains {
                        let chain = self.chain_ref(chain_id)?;
                        let (tail, full) = chain
                            .segments()
                            .split_last()
                            .ok_or(BPlusTreeError::ChainNotFound(chain_id))?;
                        if tail.is_empty() || full.iter().any(|s| s.len() != chain.capacity()) {
                            return violation(format!("chain {} has a partial inner segment", chain_id));
                        }
                        segments += chain.segment_count();
                    }
                    leaves_in_order.push(id);
                }
                BPlusNode::Internal(internal) => {
                    if id != root && internal.len() < self.min_internal_keys() {
                        return violation(format!(
                            "internal node {} underflows with {} keys",
                            id,
                            internal.len()
                        ));
                    }
                    if internal.children.len() != internal.keys.len() + 1 {
                        return violation(format!("internal node {} child count mismatch", id));
                    }
                    // Push right-to-left so leaves pop in key order
                    for (i, &child) in internal.children.iter().enumerate().rev() {
                        let lo = if i == 0 { lower } else { Some(internal.keys[i - 1]) };
                        let hi = internal.keys.get(i).copied().or(upper);
                        stack.push((child, depth + 1, lo, hi));
                    }
                }
            }
        }

        if reachable != self.node_count {
            return violation(format!(
                "{} nodes reachable, {} counted",
                reachable, self.node_count
            ));
        }
        if segments != self.overflow_segments {
            return violation(format!(
                "{} overflow segments reachable, {} counted",
                segments, self.overflow_segments
            ));
        }

        // The sibling links must visit exactly the leaves in key order
        let mut linked = Vec::with_capacity(leaves_in_order.len());
        let mut current = self.first_leaf;
        while let Some(id) = current {
            if linked.len() > leaves_in_order.len() {
                return violation("sibling links form a cycle".to_string());
            }
            linked.push(id);
            current = self.leaf(id)?.next;
        }
        if linked != leaves_in_order {
            return violation("sibling links disagree with tree order".to_string());
        }

        let keys = self.leaf_keys();
        if keys.len() != self.key_count {
            return violation(format!("{} keys linked, {} counted", keys.len(), self.key_count));
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return violation("leaf keys not strictly ascending".to_string());
        }

        Ok(())
    }

    // ========== Iterator ==========

    /// All keys in ascending order, following sibling links
    pub fn leaf_keys(&self) -> Vec<BPlusKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Iterate over all keys and their chains in key order
    pub fn iter(&self) -> BPlusTreeIter<'_> {
        BPlusTreeIter::new(self)
    }
}

/// Iterator over B+ tree entries
pub struct BPlusTreeIter<'a> {
    tree: &'a BPlusTree,
    current_leaf: Option<NodeId>,
    current_idx: usize,
}

impl<'a> BPlusTreeIter<'a> {
    fn new(tree: &'a BPlusTree) -> Self {
        Self {
            tree,
            current_leaf: tree.first_leaf,
            current_idx: 0,
        }
    }
}

impl<'a> Iterator for BPlusTreeIter<'a> {
    type Item = (BPlusKey, &'a OverflowChain);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.current_leaf?;
            let leaf = self.tree.get_node(leaf_id)?.as_leaf()?;

            if self.current_idx < leaf.len() {
                let key = leaf.keys[self.current_idx];
                let chain = self.tree.chain(leaf.chains[self.current_idx])?;
                self.current_idx += 1;
                return Some((key, chain));
            }

            // Move to next leaf
            self.current_leaf = leaf.next;
            self.current_idx = 0;
        }
    }
}
