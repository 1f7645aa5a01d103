use std::io;
use thiserror::Error;

use crate::btree::BPlusTreeError;
use crate::record::RecordError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: RecordError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] BPlusTreeError),
}

pub type LoadResult<T> = Result<T, LoadError>;
