//! Duplicate-key storage for leaf entries
//!
//! Every distinct key in a leaf owns one [`OverflowChain`]: a forward list of
//! bounded segments holding references to the blocks that store records with
//! that key. All segments except the tail are full; the tail holds at least
//! one reference.

use crate::record::{BlockId, RecordStore};

use super::BPlusKey;

/// Overflow chain identifier (index into chain storage)
pub type ChainId = usize;

/// One bounded segment of an overflow chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowSegment {
    blocks: Vec<BlockId>,
}

impl OverflowSegment {
    fn with_block(block: BlockId, capacity: usize) -> Self {
        let mut blocks = Vec::with_capacity(capacity);
        blocks.push(block);
        Self { blocks }
    }

    /// Block references in this segment
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Number of references held
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if segment is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Block references for all records sharing one key
#[derive(Debug, Clone)]
pub struct OverflowChain {
    segments: Vec<OverflowSegment>,
    capacity: usize,
}

/// What tearing down a chain released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainRelease {
    pub segments_freed: usize,
    pub records_deleted: usize,
}

impl OverflowChain {
    /// Start a chain holding a single reference
    pub fn new(block: BlockId, capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            segments: vec![OverflowSegment::with_block(block, capacity)],
            capacity,
        }
    }

    /// Append a reference to the tail segment, linking a new tail when full.
    /// Returns true if a new segment was created.
    pub fn push(&mut self, block: BlockId) -> bool {
        match self.segments.last_mut() {
            Some(tail) if tail.len() < self.capacity => {
                tail.blocks.push(block);
                false
            }
            _ => {
                self.segments
                    .push(OverflowSegment::with_block(block, self.capacity));
                true
            }
        }
    }

    /// Segments from head to tail
    pub fn segments(&self) -> &[OverflowSegment] {
        &self.segments
    }

    /// Number of linked segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Maximum references per segment
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total references across all segments
    pub fn len(&self) -> usize {
        self.segments.iter().map(OverflowSegment::len).sum()
    }

    /// Check if the chain holds no references
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(OverflowSegment::is_empty)
    }

    /// Walk every referenced block in insertion order
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.segments.iter().flat_map(|s| s.blocks.iter().copied())
    }

    /// Tear the chain down: ask the store to delete the key's records from
    /// every referenced block, then free each segment
    pub fn release<S>(self, key: BPlusKey, store: &mut S) -> ChainRelease
    where
        S: RecordStore + ?Sized,
    {
        let mut release = ChainRelease::default();
        for segment in self.segments {
            for block in segment.blocks {
                release.records_deleted += store.delete_records(block, key);
            }
            release.segments_freed += 1;
        }
        release
    }
}
