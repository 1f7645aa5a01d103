use serde::Serialize;

use super::error::{StorageError, StorageResult};
use crate::record::RECORD_SIZE;

/// Width of a node or block pointer
const POINTER_SIZE: usize = 8;

/// Width of one stored key
const KEY_SIZE: usize = 4;

/// Leaf flag carried by every node
const FLAG_SIZE: usize = 1;

/// Block-size dependent parameters shared by the disk and the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockLayout {
    pub block_size: usize,
    pub records_per_block: usize,
    /// Max keys per index node (N)
    pub max_keys: usize,
    /// Max block references per overflow segment (M)
    pub overflow_capacity: usize,
}

impl BlockLayout {
    /// Derive the layout for a block size
    pub fn new(block_size: usize) -> StorageResult<Self> {
        let layout = Self {
            block_size,
            records_per_block: records_per_block(block_size),
            max_keys: max_keys(block_size),
            overflow_capacity: overflow_capacity(block_size),
        };

        if layout.records_per_block == 0 || layout.max_keys < 2 || layout.overflow_capacity == 0 {
            return Err(StorageError::InvalidBlockSize(block_size));
        }

        Ok(layout)
    }
}

/// Records that fit in one block
pub fn records_per_block(block_size: usize) -> usize {
    block_size / RECORD_SIZE
}

/// Bytes a node with `n` keys occupies: n+1 pointers, n keys, the leaf flag,
/// then padding up to pointer alignment
fn node_bytes(n: usize) -> usize {
    let padding = if n % 2 == 1 { 3 } else { 7 };
    POINTER_SIZE * (n + 1) + KEY_SIZE * n + FLAG_SIZE + padding
}

/// Largest key count whose node fits in one block
pub fn max_keys(block_size: usize) -> usize {
    let mut n = block_size / (POINTER_SIZE + KEY_SIZE);
    while n > 0 && node_bytes(n) > block_size {
        n -= 1;
    }
    n
}

/// Block references per overflow segment, after its next pointer
pub fn overflow_capacity(block_size: usize) -> usize {
    block_size.saturating_sub(POINTER_SIZE) / POINTER_SIZE
}
