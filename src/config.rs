//! Configuration for flatstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{FlatError, Result};

/// Main configuration for a flatstore database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Base directory shared by every table of the database
    /// Internal structure (per table `T`):
    ///   {data_dir}/
    ///     ├── T_data           (append-only version log)
    ///     ├── T_index          (primary index document)
    ///     ├── T_index_<field>  (one per secondary index)
    ///     ├── T_log            (audit journal)
    ///     └── T_schema         (optional schema)
    pub data_dir: PathBuf,

    /// How hard appends and index persists push bytes to disk
    pub sync_strategy: SyncStrategy,

    /// Keep the `*.bak.<ts>` snapshot after a successful compaction
    pub keep_compaction_backup: bool,

    // -------------------------------------------------------------------------
    // Table Configuration
    // -------------------------------------------------------------------------
    /// Max records held by each table's in-memory read cache (0 disables it)
    pub cache_capacity: usize,

    /// Journal every mutation to the per-table audit log
    pub audit_enabled: bool,
}

/// Durability strategy for file writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append and every index persist (safest, slowest)
    EveryWrite,

    /// Leave flushing to the OS page cache (fast, loses data on power failure)
    OsBuffered,
}

impl SyncStrategy {
    /// Whether writes must be synced before returning
    pub fn is_durable(self) -> bool {
        matches!(self, SyncStrategy::EveryWrite)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./flatstore_data"),
            sync_strategy: SyncStrategy::EveryWrite,
            keep_compaction_backup: false,
            cache_capacity: 1000,
            audit_enabled: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings no table can be opened with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(FlatError::Config("data_dir must not be empty".to_string()));
        }
        if self.data_dir.is_file() {
            return Err(FlatError::Config(format!(
                "data_dir {:?} is a file, not a directory",
                self.data_dir
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all tables)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Keep compaction backups instead of deleting them on success
    pub fn keep_compaction_backup(mut self, keep: bool) -> Self {
        self.config.keep_compaction_backup = keep;
        self
    }

    /// Set the per-table record cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Enable or disable the audit journal
    pub fn audit_enabled(mut self, enabled: bool) -> Self {
        self.config.audit_enabled = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
