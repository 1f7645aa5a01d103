//! TSV ingestion
//!
//! Rows are `tconst<TAB>averageRating<TAB>numVotes` after a header row.
//! Records are packed into blocks in file order and every record's vote
//! count is indexed with the block that holds it.

mod error;

pub use error::{LoadError, LoadResult};

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::btree::BPlusTree;
use crate::record::Record;
use crate::storage::{BlockLayout, Disk};

/// Totals from one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub records: usize,
    pub blocks: usize,
}

/// Load a TSV file into `disk` and index it in `tree`
pub fn load_tsv<P: AsRef<Path>>(
    path: P,
    layout: &BlockLayout,
    disk: &mut Disk,
    tree: &mut BPlusTree,
) -> LoadResult<LoadSummary> {
    let path = path.as_ref();
    info!(path = %path.display(), block_size = layout.block_size, "loading data");
    let file = File::open(path)?;
    load_reader(file, layout, disk, tree)
}

/// Load TSV rows from any reader
pub fn load_reader<R: Read>(
    reader: R,
    layout: &BlockLayout,
    disk: &mut Disk,
    tree: &mut BPlusTree,
) -> LoadResult<LoadSummary> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .from_reader(reader);

    let blocks_before = disk.block_count();
    let mut summary = LoadSummary::default();

    for (index, row) in reader.records().enumerate() {
        let row = row?;
        // Header is line 1
        let line = row
            .position()
            .map_or(index as u64 + 2, |p| p.line());

        let record = Record::from_fields(row.iter()).map_err(|source| LoadError::Row { line, source })?;
        let key = record.key();
        let block = disk.append_record(record, layout.records_per_block)?;
        tree.insert(key, block)?;

        summary.records += 1;
    }

    summary.blocks = disk.block_count() - blocks_before;

    debug!(
        nodes = tree.node_count(),
        height = tree.height(),
        overflow_segments = tree.overflow_segment_count(),
        "index built"
    );
    info!(records = summary.records, blocks = summary.blocks, "data loaded");

    Ok(summary)
}
