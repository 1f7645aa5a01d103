use thiserror::Error;

use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Disk full: {blocks} blocks of {block_size}B exhaust {capacity}B")]
    DiskFull {
        blocks: usize,
        block_size: usize,
        capacity: usize,
    },

    #[error("Block not found: block_id={0}")]
    BlockNotFound(usize),

    #[error("Invalid block size: {0}B cannot hold a record and an index node")]
    InvalidBlockSize(usize),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

pub type StorageResult<T> = Result<T, StorageError>;
