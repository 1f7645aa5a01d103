mod block;
mod error;
mod record;

pub use block::Block;
pub use error::{RecordError, RecordResult};
pub use record::{MOVIE_ID_LEN, RECORD_SIZE, Record};

use crate::btree::BPlusKey;

/// Identifier of a block inside its store (index into the store's block list)
///
/// Overflow chains hold these as non-owning references; the block itself is
/// owned by whatever implements [`RecordStore`].
pub type BlockId = usize;

/// The record-store operations the index is allowed to call back into.
///
/// The index never reads record payloads. It only asks the store to drop
/// every record carrying a key when that key is deleted from the tree.
pub trait RecordStore {
    /// Delete all records with `key` from the block `block`, returning how
    /// many were removed. Unknown blocks remove nothing.
    fn delete_records(&mut self, block: BlockId, key: BPlusKey) -> usize;
}
