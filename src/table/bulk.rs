//! Bulk Operations
//!
//! Batched insert/update/delete. Each record goes through the same path as
//! its single-record counterpart, except primary index changes are staged
//! and committed with one document write at the end of the batch. The id
//! counter is still persisted per record.
//!
//! A failing record does not abort the batch; its outcome is `Failed`.

use std::time::Instant;

use crate::error::{FlatError, Result};
use crate::metrics::Operation;
use crate::record::Record;

use super::{IndexWrite, TableEngine, UpdateOutcome};

/// Per-record result of a bulk operation
#[derive(Debug)]
pub enum BulkOutcome {
    Inserted(u64),
    Updated(u64),
    /// The update changed nothing; no version was written
    Unchanged(u64),
    Deleted(u64),
    /// The id was not live
    NotFound(u64),
    Failed {
        id: Option<u64>,
        error: FlatError,
    },
}

impl BulkOutcome {
    /// Id the outcome refers to, if known
    pub fn id(&self) -> Option<u64> {
        match self {
            BulkOutcome::Inserted(id)
            | BulkOutcome::Updated(id)
            | BulkOutcome::Unchanged(id)
            | BulkOutcome::Deleted(id)
            | BulkOutcome::NotFound(id) => Some(*id),
            BulkOutcome::Failed { id, .. } => *id,
        }
    }

    /// Whether the record was written (or needed no write)
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BulkOutcome::Inserted(_)
                | BulkOutcome::Updated(_)
                | BulkOutcome::Unchanged(_)
                | BulkOutcome::Deleted(_)
        )
    }
}

impl TableEngine {
    /// Insert many records; outcomes are in input order
    pub fn bulk_insert(&self, records: Vec<Record>) -> Result<Vec<BulkOutcome>> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let started = Instant::now();
            let outcome = match self.insert_locked(&mut index, record, IndexWrite::Deferred) {
                Ok(id) => BulkOutcome::Inserted(id),
                Err(error) => BulkOutcome::Failed { id: None, error },
            };
            self.metrics
                .record_operation(&self.name, Operation::Insert, started.elapsed());
            outcomes.push(outcome);
        }

        index.commit()?;
        self.log_batch("insert", &outcomes);
        Ok(outcomes)
    }

    /// Apply many `(id, changes)` merges; outcomes are in input order
    pub fn bulk_update(&self, updates: Vec<(u64, Record)>) -> Result<Vec<BulkOutcome>> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let mut outcomes = Vec::with_capacity(updates.len());
        for (id, changes) in updates {
            let started = Instant::now();
            let outcome = match self.update_locked(&mut index, id, changes, IndexWrite::Deferred) {
                Ok(UpdateOutcome::Updated) => BulkOutcome::Updated(id),
                Ok(UpdateOutcome::Unchanged) => BulkOutcome::Unchanged(id),
                Ok(UpdateOutcome::NotFound) => BulkOutcome::NotFound(id),
                Err(error) => BulkOutcome::Failed {
                    id: Some(id),
                    error,
                },
            };
            self.metrics
                .record_operation(&self.name, Operation::Update, started.elapsed());
            outcomes.push(outcome);
        }

        index.commit()?;
        self.log_batch("update", &outcomes);
        Ok(outcomes)
    }

    /// Delete many ids; outcomes are in input order
    pub fn bulk_delete(&self, ids: Vec<u64>) -> Result<Vec<BulkOutcome>> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let started = Instant::now();
            let outcome = match self.delete_locked(&mut index, id, IndexWrite::Deferred) {
                Ok(true) => BulkOutcome::Deleted(id),
                Ok(false) => BulkOutcome::NotFound(id),
                Err(error) => BulkOutcome::Failed {
                    id: Some(id),
                    error,
                },
            };
            self.metrics
                .record_operation(&self.name, Operation::Delete, started.elapsed());
            outcomes.push(outcome);
        }

        index.commit()?;
        self.log_batch("delete", &outcomes);
        Ok(outcomes)
    }

    fn log_batch(&self, kind: &str, outcomes: &[BulkOutcome]) {
        let failed = outcomes.iter().filter(|o| matches!(o, BulkOutcome::Failed { .. })).count();
        if failed > 0 {
            tracing::warn!(
                "{}: bulk {} finished with {} of {} records failed",
                self.name,
                kind,
                failed,
                outcomes.len()
            );
        } else {
            tracing::debug!("{}: bulk {} of {} records", self.name, kind, outcomes.len());
        }
    }
}
