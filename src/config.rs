use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::btree::BPlusKey;
use crate::storage::DISK_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one run of the experiments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per block; prompted for when unset
    pub block_size: Option<usize>,
    pub disk_capacity: usize,
    pub data_path: PathBuf,
    pub search_key: BPlusKey,
    pub range_start: BPlusKey,
    pub range_end: BPlusKey,
    pub delete_key: BPlusKey,
    /// Index nodes whose keys are shown per query
    pub max_nodes_to_print: usize,
    /// Data blocks whose records are shown per query
    pub max_blocks_to_print: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: None,
            disk_capacity: DISK_CAPACITY,
            data_path: PathBuf::from("./data/data.tsv"),
            search_key: 500,
            range_start: 30_000,
            range_end: 40_000,
            delete_key: 1_000,
            max_nodes_to_print: 5,
            max_blocks_to_print: 5,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(&self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.range_end <= self.range_start {
            return Err(ConfigError::Invalid(format!(
                "range_end ({}) must be greater than range_start ({})",
                self.range_end, self.range_start
            )));
        }
        if self.disk_capacity == 0 {
            return Err(ConfigError::Invalid("disk_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
