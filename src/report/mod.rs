//! The five experiments run after loading: storage footprint, tree shape,
//! point search, range search and deletion.

use ahash::AHashSet;
use prettytable::{Table, row};
use serde::Serialize;
use tracing::info;

use crate::btree::{BPlusKey, BPlusTree, BPlusTreeResult, NodeAccess, OverflowChain};
use crate::config::EngineConfig;
use crate::record::BlockId;
use crate::storage::{Disk, MB};

/// Experiment 1: bytes used by data, index and overflow segments
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    pub block_size: usize,
    pub blocks: usize,
    pub records: usize,
    pub data_bytes: usize,
    pub data_bytes_by_records: usize,
    pub index_nodes: usize,
    pub index_bytes: usize,
    pub overflow_segments: usize,
    pub overflow_bytes: usize,
    pub total_bytes: usize,
}

/// Experiment 2 (and the tail of 5): tree parameters and shape
#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub max_keys: usize,
    pub overflow_capacity: usize,
    pub nodes: usize,
    pub height: usize,
    pub root_keys: Vec<BPlusKey>,
    pub first_child_keys: Option<Vec<BPlusKey>>,
    pub overflow_segments: usize,
}

/// Records of one accessed data block
#[derive(Debug, Clone, Serialize)]
pub struct BlockContents {
    pub block: BlockId,
    pub movie_ids: Vec<String>,
}

/// Experiments 3 and 4: cost and result of a lookup
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub description: String,
    pub index_nodes_accessed: usize,
    pub index_nodes: Vec<Vec<BPlusKey>>,
    pub keys_matched: usize,
    pub data_blocks_accessed: usize,
    pub data_blocks: Vec<BlockContents>,
    pub records: usize,
    pub average_rating: f64,
}

/// Experiment 5: deleting one key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub key: BPlusKey,
    pub nodes_removed: usize,
    pub segments_freed: usize,
    pub records_deleted: usize,
    pub tree: TreeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Experiments {
    pub storage: StorageReport,
    pub tree: TreeReport,
    pub search: QueryReport,
    pub range: QueryReport,
    pub delete: DeleteReport,
}

impl Experiments {
    /// Run all five experiments; the last one mutates `disk` and `tree`
    pub fn run(config: &EngineConfig, disk: &mut Disk, tree: &mut BPlusTree) -> BPlusTreeResult<Self> {
        let storage = StorageReport::collect(disk, tree);
        let tree_report = TreeReport::collect(tree);

        let (chain, access) = tree.search_traced(config.search_key, config.max_nodes_to_print);
        let search = QueryReport::collect(
            format!("numVotes = {}", config.search_key),
            chain.map(|c| (config.search_key, c)),
            access,
            disk,
            config.max_blocks_to_print,
        );

        let (entries, access) =
            tree.range_query_traced(config.range_start, config.range_end, config.max_nodes_to_print)?;
        let range = QueryReport::collect(
            format!("{} <= numVotes <= {}", config.range_start, config.range_end),
            entries,
            access,
            disk,
            config.max_blocks_to_print,
        );

        let outcome = tree.delete_by_key(config.delete_key, disk)?;
        info!(key = config.delete_key, nodes_removed = outcome.nodes_removed, "delete experiment done");
        let delete = DeleteReport {
            key: config.delete_key,
            nodes_removed: outcome.nodes_removed,
            segments_freed: outcome.segments_freed,
            records_deleted: outcome.records_deleted,
            tree: TreeReport::collect(tree),
        };

        Ok(Self {
            storage,
            tree: tree_report,
            search,
            range,
            delete,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render every experiment as a table
    pub fn tables(&self) -> Vec<Table> {
        vec![
            self.storage.table(),
            self.tree.table("Experiment 2: B+ tree"),
            self.search.table("Experiment 3: search"),
            self.range.table("Experiment 4: range search"),
            self.delete.table(),
        ]
    }

    pub fn print_tables(&self) {
        for table in self.tables() {
            table.printstd();
            println!();
        }
    }
}

impl StorageReport {
    fn collect(disk: &Disk, tree: &BPlusTree) -> Self {
        let block_size = disk.block_size();
        let index_bytes = tree.node_count() * block_size;
        let overflow_bytes = tree.overflow_segment_count() * block_size;
        Self {
            block_size,
            blocks: disk.block_count(),
            records: disk.record_count(),
            data_bytes: disk.size_by_blocks(),
            data_bytes_by_records: disk.size_by_records(),
            index_nodes: tree.node_count(),
            index_bytes,
            overflow_segments: tree.overflow_segment_count(),
            overflow_bytes,
            total_bytes: disk.size_by_blocks() + index_bytes + overflow_bytes,
        }
    }

    fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_titles(row!["Experiment 1: storage", format!("{}B blocks", self.block_size)]);
        table.add_row(row!["Data blocks", self.blocks]);
        table.add_row(row!["Records", self.records]);
        table.add_row(row!["Relational data (by blocks)", megabytes(self.data_bytes)]);
        table.add_row(row!["Relational data (by records)", megabytes(self.data_bytes_by_records)]);
        table.add_row(row!["Index nodes", self.index_nodes]);
        table.add_row(row!["Index size", megabytes(self.index_bytes)]);
        table.add_row(row!["Overflow segments", self.overflow_segments]);
        table.add_row(row!["Overflow size", megabytes(self.overflow_bytes)]);
        table.add_row(row!["Database size", megabytes(self.total_bytes)]);
        table
    }
}

impl TreeReport {
    fn collect(tree: &BPlusTree) -> Self {
        Self {
            max_keys: tree.max_keys(),
            overflow_capacity: tree.overflow_capacity(),
            nodes: tree.node_count(),
            height: tree.height(),
            root_keys: tree.root_keys(),
            first_child_keys: tree.first_child_keys(),
            overflow_segments: tree.overflow_segment_count(),
        }
    }

    fn add_rows(&self, table: &mut Table) {
        table.add_row(row!["Nodes", self.nodes]);
        table.add_row(row!["Height", self.height]);
        let first_child = match &self.first_child_keys {
            Some(keys) => format_keys(keys),
            None => "-".to_string(),
        };
        table.add_row(row!["Root keys", format_keys(&self.root_keys)]);
        table.add_row(row!["Root's first child keys", first_child]);
        table.add_row(row!["Overflow segments", self.overflow_segments]);
    }

    fn table(&self, title: &str) -> Table {
        let mut table = Table::new();
        table.set_titles(row![title, ""]);
        table.add_row(row!["Max keys (n)", self.max_keys]);
        table.add_row(row!["Block refs per overflow segment", self.overflow_capacity]);
        self.add_rows(&mut table);
        table
    }
}

impl QueryReport {
    /// Walk the chains of every matched key, reading each referenced block once per key
    fn collect<'a, I>(
        description: String,
        entries: I,
        access: NodeAccess,
        disk: &Disk,
        max_blocks: usize,
    ) -> Self
    where
        I: IntoIterator<Item = (BPlusKey, &'a OverflowChain)>,
    {
        let mut accessed = AHashSet::new();
        let mut data_blocks = Vec::new();
        let mut keys_matched = 0;
        let mut records = 0;
        let mut rating_total = 0.0f64;

        for (key, chain) in entries {
            keys_matched += 1;
            let mut read_for_key = AHashSet::new();

            for block_id in chain.blocks() {
                if !read_for_key.insert(block_id) {
                    continue;
                }
                let Some(block) = disk.block(block_id) else {
                    continue;
                };

                if accessed.insert(block_id) && data_blocks.len() < max_blocks {
                    data_blocks.push(BlockContents {
                        block: block_id,
                        movie_ids: block.records().iter().map(|r| r.movie_id.clone()).collect(),
                    });
                }

                for record in block.query_by_key(key) {
                    records += 1;
                    rating_total += f64::from(record.average_rating);
                }
            }
        }

        let average_rating = if records == 0 {
            0.0
        } else {
            rating_total / records as f64
        };

        Self {
            description,
            index_nodes_accessed: access.nodes_accessed,
            index_nodes: access.visited,
            keys_matched,
            data_blocks_accessed: accessed.len(),
            data_blocks,
            records,
            average_rating,
        }
    }

    fn table(&self, title: &str) -> Table {
        let mut table = Table::new();
        table.set_titles(row![title, self.description]);
        table.add_row(row!["Index nodes accessed", self.index_nodes_accessed]);
        for (i, keys) in self.index_nodes.iter().enumerate() {
            table.add_row(row![format!("  index node {}", i + 1), format_keys(keys)]);
        }
        table.add_row(row!["Keys matched", self.keys_matched]);
        table.add_row(row!["Data blocks accessed", self.data_blocks_accessed]);
        for contents in &self.data_blocks {
            table.add_row(row![
                format!("  data block {}", contents.block),
                contents.movie_ids.join(" ")
            ]);
        }
        table.add_row(row!["Records", self.records]);
        table.add_row(row!["Average of averageRating", format!("{:.4}", self.average_rating)]);
        table
    }
}

impl DeleteReport {
    fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_titles(row!["Experiment 5: delete", format!("numVotes = {}", self.key)]);
        table.add_row(row!["Nodes removed", self.nodes_removed]);
        table.add_row(row!["Overflow segments freed", self.segments_freed]);
        table.add_row(row!["Records deleted", self.records_deleted]);
        self.tree.add_rows(&mut table);
        table
    }
}

fn megabytes(bytes: usize) -> String {
    format!("{:.4} MB", bytes as f64 / MB as f64)
}

fn format_keys(keys: &[BPlusKey]) -> String {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    format!("[{}]", keys.join(", "))
}
