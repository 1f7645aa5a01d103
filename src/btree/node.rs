use std::cmp::Ordering;

use super::BPlusKey;
use super::error::{BPlusTreeError, BPlusTreeResult};
use super::overflow::ChainId;

/// Node identifier (index into node storage)
pub type NodeId = usize;

/// Internal node: separator keys and child pointers
///
/// - `children.len() == keys.len() + 1`
/// - children[0] covers keys `< keys[0]`
/// - children[i] covers keys in `[keys[i-1], keys[i])`
/// - the last child covers keys `>= keys[last]`
#[derive(Debug, Clone)]
pub struct InternalNode {
    /// Separator keys (strictly increasing)
    pub keys: Vec<BPlusKey>,
    /// Child node IDs
    pub children: Vec<NodeId>,
}

impl InternalNode {
    /// Create a new internal node with given keys and children
    pub fn new(keys: Vec<BPlusKey>, children: Vec<NodeId>) -> Self {
        debug_assert_eq!(keys.len() + 1, children.len());
        Self { keys, children }
    }

    /// Number of separator keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if node has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find the child index to follow for a given key
    /// Returns the index of the first key strictly greater than the search
    /// key, or the last child if there is none (upper bound)
    pub fn find_child_index(&self, key: BPlusKey) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Insert a separator at `index` with the new child directly to its right
    /// Used after child `index` split into itself and `child`
    pub fn insert_child(&mut self, index: usize, key: BPlusKey, child: NodeId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Remove the separator at `key_index` and the child at `child_index`
    pub fn remove_child(&mut self, key_index: usize, child_index: usize) -> (BPlusKey, NodeId) {
        let key = self.keys.remove(key_index);
        let child = self.children.remove(child_index);
        (key, child)
    }

    /// Split an overflowing node
    ///
    /// This node keeps the first `left_keys` keys (and one more child); the
    /// key after them is removed from both halves and returned for insertion
    /// into the parent together with the new right sibling. Fails without
    /// touching the node when it has no key after the first `left_keys`.
    pub fn split(&mut self, left_keys: usize) -> BPlusTreeResult<(BPlusKey, InternalNode)> {
        if left_keys >= self.keys.len() || self.children.len() != self.keys.len() + 1 {
            return Err(BPlusTreeError::InvalidState(format!(
                "cannot split internal node with {} keys after {} keys",
                self.keys.len(),
                left_keys
            )));
        }

        let right_keys = self.keys.split_off(left_keys + 1);
        let right_children = self.children.split_off(left_keys + 1);
        let promoted = self.keys.pop().ok_or_else(|| {
            BPlusTreeError::InvalidState("internal split found no key to promote".to_string())
        })?;

        Ok((promoted, InternalNode::new(right_keys, right_children)))
    }
}

/// Leaf node: keys with their overflow chains, linked to the next leaf
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    /// Keys (sorted, no duplicates)
    pub keys: Vec<BPlusKey>,
    /// Overflow chain per key (parallel to `keys`)
    pub chains: Vec<ChainId>,
    /// Link to next leaf for range queries
    pub next: Option<NodeId>,
}

impl LeafNode {
    /// Create a leaf node with given entries
    pub fn with_entries(keys: Vec<BPlusKey>, chains: Vec<ChainId>) -> Self {
        debug_assert_eq!(keys.len(), chains.len());
        Self {
            keys,
            chains,
            next: None,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if leaf is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Scan for a key
    /// `Ok(i)` if keys[i] == key, otherwise `Err(i)` with the sorted insert position.
    /// Stops at the first larger key.
    pub fn locate(&self, key: BPlusKey) -> Result<usize, usize> {
        for (i, &k) in self.keys.iter().enumerate() {
            match k.cmp(&key) {
                Ordering::Equal => return Ok(i),
                Ordering::Greater => return Err(i),
                Ordering::Less => {}
            }
        }
        Err(self.keys.len())
    }

    /// Search for a key, return its overflow chain
    pub fn search(&self, key: BPlusKey) -> Option<ChainId> {
        self.locate(key).ok().map(|i| self.chains[i])
    }

    /// Insert an entry at a known position
    pub fn insert_at(&mut self, index: usize, key: BPlusKey, chain: ChainId) {
        self.keys.insert(index, key);
        self.chains.insert(index, chain);
    }

    /// Remove the entry at `index`
    pub fn remove_at(&mut self, index: usize) -> (BPlusKey, ChainId) {
        (self.keys.remove(index), self.chains.remove(index))
    }

    /// Get the minimum key in this leaf
    pub fn min_key(&self) -> Option<BPlusKey> {
        self.keys.first().copied()
    }

    /// Split this leaf node, returning the new right sibling
    /// This node keeps the first `left_len` entries, the new node gets the rest
    /// and inherits this node's sibling link.
    pub fn split(&mut self, left_len: usize) -> LeafNode {
        let right_keys = self.keys.split_off(left_len);
        let right_chains = self.chains.split_off(left_len);

        let mut right = LeafNode::with_entries(right_keys, right_chains);
        right.next = self.next.take();

        right
    }

    /// Append all entries of `right` and take over its sibling link
    pub fn absorb(&mut self, right: LeafNode) {
        self.keys.extend(right.keys);
        self.chains.extend(right.chains);
        self.next = right.next;
    }
}

/// B+ tree node (either internal or leaf)
///
/// The variant is fixed when the node is allocated; splits and merges move
/// entries between nodes instead of retagging them.
#[derive(Debug, Clone)]
pub enum BPlusNode {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl BPlusNode {
    /// Keys stored in this node
    pub fn keys(&self) -> &[BPlusKey] {
        match self {
            BPlusNode::Internal(node) => &node.keys,
            BPlusNode::Leaf(node) => &node.keys,
        }
    }

    /// Number of keys in this node
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Check if node holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Get as internal node reference
    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            BPlusNode::Internal(node) => Some(node),
            BPlusNode::Leaf(_) => None,
        }
    }

    /// Get as internal node mutable reference
    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            BPlusNode::Internal(node) => Some(node),
            BPlusNode::Leaf(_) => None,
        }
    }

    /// Get as leaf node reference
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            BPlusNode::Internal(_) => None,
            BPlusNode::Leaf(node) => Some(node),
        }
    }

    /// Get as leaf node mutable reference
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            BPlusNode::Internal(_) => None,
            BPlusNode::Leaf(node) => Some(node),
        }
    }
}
