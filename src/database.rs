//! Database Module
//!
//! Registry of tables sharing one data directory.
//!
//! ## Responsibilities
//! - Register tables and hand out shared engines
//! - Fan maintenance out over every table (compaction, backup, clear)
//! - Own the metrics sink every table reports to

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{FlatError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::query::QueryHandler;
use crate::table::{CompactionReport, TableEngine};
use crate::validation::validate_identifier;

/// Per-table results of a fan-out operation
pub type TableResults<T> = BTreeMap<String, Result<T>>;

/// Entry point: a data directory and its registered tables
pub struct Database {
    config: Config,
    metrics: Arc<dyn MetricsSink>,
    tables: RwLock<BTreeMap<String, Arc<TableEngine>>>,
}

impl Database {
    /// Open the database rooted at `config.data_dir`, without metrics
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Open with a metrics sink shared by every table
    pub fn open_with_metrics(config: Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        tracing::debug!("Opened database at {:?}", config.data_dir);

        Ok(Self {
            config,
            metrics,
            tables: RwLock::new(BTreeMap::new()),
        })
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register table `name`, opening (or creating) its files
    ///
    /// Registering an already registered name returns the existing engine.
    pub fn register_table(&self, name: &str) -> Result<Arc<TableEngine>> {
        validate_identifier("table", name)?;

        if let Some(table) = self.tables.read().get(name) {
            return Ok(Arc::clone(table));
        }

        let mut tables = self.tables.write();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(TableEngine::open(name, &self.config, Arc::clone(&self.metrics))?);
        tables.insert(name.to_string(), Arc::clone(&table));

        tracing::info!("Registered table {}", name);
        Ok(table)
    }

    /// Register every table that has a data file in the data directory
    ///
    /// Returns the names found, in order.
    pub fn register_existing_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let name = match file_name.to_str().and_then(|n| n.strip_suffix("_data")) {
                Some(name) if validate_identifier("table", name).is_ok() => name.to_string(),
                _ => continue,
            };
            self.register_table(&name)?;
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Engine of a registered table
    pub fn table(&self, name: &str) -> Result<Arc<TableEngine>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FlatError::TableNotRegistered(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Registered table names in order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Unregister table `name`; its files stay on disk
    pub fn drop_table(&self, name: &str) -> bool {
        let dropped = self.tables.write().remove(name).is_some();
        if dropped {
            tracing::info!("Unregistered table {}", name);
        }
        dropped
    }

    // =========================================================================
    // Fan-out Maintenance
    // =========================================================================

    /// Compact every registered table
    pub fn compact_all_tables(&self) -> TableResults<CompactionReport> {
        self.for_each_table(|table| table.compact())
    }

    /// Copy every table's files into `dir`
    pub fn create_backup(&self, dir: &Path) -> TableResults<Vec<PathBuf>> {
        if let Err(e) = fs::create_dir_all(dir) {
            let message = e.to_string();
            return self
                .table_names()
                .into_iter()
                .map(|name| {
                    let error = std::io::Error::new(e.kind(), message.clone());
                    (name, Err(FlatError::Io(error)))
                })
                .collect();
        }
        self.for_each_table(|table| table.backup(dir))
    }

    /// Remove every record of every table
    pub fn clear_database(&self) -> TableResults<()> {
        self.for_each_table(|table| table.clear())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Fluent query builder over this database
    pub fn query(&self) -> QueryHandler<'_> {
        QueryHandler::new(self)
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Run `f` on every table, collecting each result
    fn for_each_table<T, F>(&self, f: F) -> TableResults<T>
    where
        F: Fn(&TableEngine) -> Result<T>,
    {
        // Snapshot so a slow table never blocks registration
        let tables: Vec<(String, Arc<TableEngine>)> = self
            .tables
            .read()
            .iter()
            .map(|(name, table)| (name.clone(), Arc::clone(table)))
            .collect();

        tables
            .into_iter()
            .map(|(name, table)| {
                let result = f(&table);
                if let Err(e) = &result {
                    tracing::warn!("{}: maintenance failed: {}", name, e);
                }
                (name, result)
            })
            .collect()
    }
}
