//! Engine metrics
//!
//! The engine reports what it does to an injectable [`MetricsSink`].
//! There is no global collector: pass an `Arc<Metrics>` to
//! `Database::open_with_metrics` to observe a database, or rely on the
//! default [`NoopMetrics`].
//!
//! All [`Metrics`] counters are `AtomicU64`, so recording is lock-free and
//! safe from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which index document a persist rewrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPersist {
    /// Id counter bump from `next_id`
    Counter,
    /// Primary offset map (single write or batch merge)
    Offsets,
    /// A secondary index bucket file
    Secondary,
}

/// Engine operations timed by the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Select,
    Find,
    Compact,
}

/// Receiver for engine events. Every method defaults to a no-op.
pub trait MetricsSink: Send + Sync {
    /// A version was appended to a data file
    fn record_append(&self, _table: &str, _bytes: u64) {}

    /// A version was read back by offset
    fn record_read(&self, _table: &str) {}

    /// Record cache lookup
    fn record_cache(&self, _table: &str, _hit: bool) {}

    /// An index document was rewritten on disk
    fn record_index_persist(&self, _table: &str, _kind: IndexPersist) {}

    /// A completed operation and its latency
    fn record_operation(&self, _table: &str, _op: Operation, _elapsed: Duration) {}

    /// A compaction finished
    fn record_compaction(&self, _table: &str, _bytes_before: u64, _bytes_after: u64) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Atomic counter collector
#[derive(Debug, Default)]
pub struct Metrics {
    // ========================================================================
    // Log I/O
    // ========================================================================
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    reads: AtomicU64,

    // ========================================================================
    // Cache
    // ========================================================================
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // ========================================================================
    // Index persists
    // ========================================================================
    counter_persists: AtomicU64,
    offset_persists: AtomicU64,
    secondary_persists: AtomicU64,

    // ========================================================================
    // Operations
    // ========================================================================
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    selects: AtomicU64,
    finds: AtomicU64,
    compactions: AtomicU64,
    bytes_reclaimed: AtomicU64,
    operation_micros: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub bytes_appended: u64,
    pub reads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub counter_persists: u64,
    pub offset_persists: u64,
    pub secondary_persists: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub selects: u64,
    pub finds: u64,
    pub compactions: u64,
    pub bytes_reclaimed: u64,
    pub operation_micros: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            appends: load(&self.appends),
            bytes_appended: load(&self.bytes_appended),
            reads: load(&self.reads),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            counter_persists: load(&self.counter_persists),
            offset_persists: load(&self.offset_persists),
            secondary_persists: load(&self.secondary_persists),
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            deletes: load(&self.deletes),
            selects: load(&self.selects),
            finds: load(&self.finds),
            compactions: load(&self.compactions),
            bytes_reclaimed: load(&self.bytes_reclaimed),
            operation_micros: load(&self.operation_micros),
        }
    }
}

impl MetricsSink for Metrics {
    fn record_append(&self, _table: &str, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_read(&self, _table: &str) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cache(&self, _table: &str, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_index_persist(&self, _table: &str, kind: IndexPersist) {
        let counter = match kind {
            IndexPersist::Counter => &self.counter_persists,
            IndexPersist::Offsets => &self.offset_persists,
            IndexPersist::Secondary => &self.secondary_persists,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_operation(&self, _table: &str, op: Operation, elapsed: Duration) {
        let counter = match op {
            Operation::Insert => &self.inserts,
            Operation::Update => &self.updates,
            Operation::Delete => &self.deletes,
            Operation::Select => &self.selects,
            Operation::Find => &self.finds,
            Operation::Compact => &self.compactions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.operation_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_compaction(&self, _table: &str, bytes_before: u64, bytes_after: u64) {
        self.bytes_reclaimed
            .fetch_add(bytes_before.saturating_sub(bytes_after), Ordering::Relaxed);
    }
}
