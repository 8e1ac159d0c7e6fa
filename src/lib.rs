//! # flatstore
//!
//! An embedded, flat-file record store with:
//! - Append-only JSON-lines data logs with tombstoned versions
//! - Persisted byte-offset primary index and per-field secondary indexes
//! - Cross-process safety through advisory file locks
//! - Compaction with backup and restore on failure
//! - Per-table audit journal
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              QueryHandler  (fluent builder)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Database (table registry)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Arc<TableEngine>
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      TableEngine                             │
//! │        (versioning, cache, schema, compensation)             │
//! └──────┬───────────────────┬──────────────────────┬───────────┘
//!        │                   │                      │
//!        ▼                   ▼                      ▼
//!  ┌───────────┐     ┌──────────────┐       ┌─────────────┐
//!  │ LogStore  │     │  IndexStore  │       │  AuditLog   │
//!  │  T_data   │     │ T_index[_f]  │       │   T_log     │
//!  └───────────┘     └──────────────┘       └─────────────┘
//!        └──────────── fs (flock, atomic rename) ───┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod metrics;

pub mod fs;
pub mod record;
pub mod validation;

pub mod audit;
pub mod index;
pub mod log;

pub mod database;
pub mod query;
pub mod table;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use database::Database;
pub use error::{FlatError, Result};
pub use metrics::{Metrics, MetricsSink, NoopMetrics};
pub use query::{QueryHandler, SortDirection};
pub use record::{Record, Value};
pub use table::{BulkOutcome, Condition, Operator, TableEngine};
pub use validation::FieldType;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of flatstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
