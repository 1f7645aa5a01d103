use super::error::{RecordError, RecordResult};
use super::record::Record;
use crate::btree::BPlusKey;

/// A fixed-capacity group of records, the unit of simulated disk allocation
#[derive(Debug, Clone)]
pub struct Block {
    records: Vec<Record>,
    max_records: usize,
}

impl Block {
    /// Create an empty block holding at most `max_records` records
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records),
            max_records,
        }
    }

    /// Number of records currently stored
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if block is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records this block accepts
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Whether one more record fits
    pub fn has_capacity(&self) -> bool {
        self.records.len() < self.max_records
    }

    /// All records in insertion order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Append a record
    pub fn add(&mut self, record: Record) -> RecordResult<()> {
        if !self.has_capacity() {
            return Err(RecordError::BlockFull(self.max_records));
        }
        self.records.push(record);
        Ok(())
    }

    /// Delete every record whose key equals `key`, returning the count removed
    pub fn delete_by_key(&mut self, key: BPlusKey) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.key() != key);
        before - self.records.len()
    }

    /// All records whose key equals `key`
    pub fn query_by_key(&self, key: BPlusKey) -> Vec<&Record> {
        self.records.iter().filter(|r| r.key() == key).collect()
    }
}
