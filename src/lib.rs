pub mod btree;
pub mod config;
pub mod loader;
pub mod record;
pub mod report;
pub mod storage;

pub use btree::{
    BPlusKey, BPlusNode, BPlusTree, BPlusTreeError, BPlusTreeResult, DeleteOutcome, NodeAccess,
    OverflowChain,
};
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use loader::{LoadError, LoadResult, LoadSummary, load_reader, load_tsv};
pub use record::{Block, BlockId, Record, RecordError, RecordResult, RecordStore};
pub use report::Experiments;
pub use storage::{BlockLayout, DISK_CAPACITY, Disk, StorageError, StorageResult};
