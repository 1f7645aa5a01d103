mod disk;
mod error;
mod sizing;

pub use disk::Disk;
pub use error::{StorageError, StorageResult};
pub use sizing::BlockLayout;

/// Simulated disk capacity in bytes (500MB)
pub const DISK_CAPACITY: usize = 500_000_000;

/// Bytes per megabyte when reporting sizes
pub const MB: usize = 1_000_000;

/// Block sizes offered at startup
pub const SUPPORTED_BLOCK_SIZES: [usize; 2] = [200, 500];
