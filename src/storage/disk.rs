use tracing::debug;

use super::error::{StorageError, StorageResult};
use crate::btree::BPlusKey;
use crate::record::{Block, BlockId, RECORD_SIZE, Record, RecordStore};

/// Simulated disk: an append-only list of fixed-size blocks under a byte ceiling
#[derive(Debug)]
pub struct Disk {
    blocks: Vec<Block>,
    block_size: usize,
    capacity: usize,
}

impl Disk {
    /// Create an empty disk
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_size,
            capacity,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether one more block fits under the capacity
    pub fn has_capacity(&self) -> bool {
        (self.blocks.len() + 1) * self.block_size <= self.capacity
    }

    /// Store a block, returning its ID
    pub fn add_block(&mut self, block: Block) -> StorageResult<BlockId> {
        if !self.has_capacity() {
            return Err(StorageError::DiskFull {
                blocks: self.blocks.len(),
                block_size: self.block_size,
                capacity: self.capacity,
            });
        }
        self.blocks.push(block);
        Ok(self.blocks.len() - 1)
    }

    /// Allocate an empty block
    pub fn allocate_block(&mut self, max_records: usize) -> StorageResult<BlockId> {
        let id = self.add_block(Block::new(max_records))?;
        debug!(block = id, "allocated block");
        Ok(id)
    }

    /// Append a record to the last block, allocating a new one when it is full
    pub fn append_record(&mut self, record: Record, max_records: usize) -> StorageResult<BlockId> {
        let has_room = self.blocks.last().is_some_and(Block::has_capacity);
        let id = if has_room {
            self.blocks.len() - 1
        } else {
            self.allocate_block(max_records)?
        };
        self.block_mut(id)?.add(record)?;
        Ok(id)
    }

    /// Get a block by ID
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    fn block_mut(&mut self, id: BlockId) -> StorageResult<&mut Block> {
        self.blocks
            .get_mut(id)
            .ok_or(StorageError::BlockNotFound(id))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes used counting whole blocks
    pub fn size_by_blocks(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    /// Bytes used counting only stored records
    pub fn size_by_records(&self) -> usize {
        self.record_count() * RECORD_SIZE
    }

    pub fn record_count(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }
}

impl RecordStore for Disk {
    fn delete_records(&mut self, block: BlockId, key: BPlusKey) -> usize {
        self.blocks
            .get_mut(block)
            .map_or(0, |b| b.delete_by_key(key))
    }
}
