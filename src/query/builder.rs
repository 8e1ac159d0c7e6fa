//! Query Builder

use std::sync::Arc;

use crate::database::Database;
use crate::error::{FlatError, Result};
use crate::record::{Record, Value};
use crate::table::{BulkOutcome, Condition, TableEngine};

use super::order::{compare_by_field, SortDirection};

/// Fluent builder; every terminal resets the builder
///
/// Builder errors (such as an unknown operator) are held until the next
/// terminal, which then fails with them.
pub struct QueryHandler<'a> {
    db: &'a Database,
    table: Option<String>,
    conditions: Vec<Condition>,
    data: Option<Record>,
    fields: Option<Vec<String>>,
    order: Option<(String, SortDirection)>,
    limit: Option<usize>,
    offset: usize,
    pending_error: Option<FlatError>,
}

impl<'a> QueryHandler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            table: None,
            conditions: Vec::new(),
            data: None,
            fields: None,
            order: None,
            limit: None,
            offset: 0,
            pending_error: None,
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    /// Target table; clears everything set before
    pub fn table(&mut self, name: &str) -> &mut Self {
        let db = self.db;
        *self = Self::new(db);
        self.table = Some(name.to_string());
        self
    }

    /// AND a `field op value` predicate
    pub fn where_(&mut self, field: &str, op: &str, value: impl Into<Value>) -> &mut Self {
        match Condition::parse(field, op, value) {
            Ok(condition) => self.conditions.push(condition),
            Err(e) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
        }
        self
    }

    /// AND a `field = value` predicate
    pub fn where_eq(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.conditions.push(Condition::eq(field, value));
        self
    }

    /// Payload for `insert`/`update`
    pub fn data(&mut self, data: Record) -> &mut Self {
        self.data = Some(data);
        self
    }

    /// Project results onto `fields`
    pub fn select<S: AsRef<str>>(&mut self, fields: &[S]) -> &mut Self {
        self.fields = Some(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub fn order_by(&mut self, field: &str, direction: SortDirection) -> &mut Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    pub fn limit(&mut self, n: usize) -> &mut Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: usize) -> &mut Self {
        self.offset = n;
        self
    }

    // =========================================================================
    // Terminals
    // =========================================================================

    /// Insert the `data` payload; returns the new id
    pub fn insert(&mut self) -> Result<u64> {
        let query = self.take()?;
        let data = query.require_data("insert")?;
        query.engine()?.insert(data)
    }

    /// Merge the `data` payload into every matching record
    ///
    /// Returns the number of records updated (including ones the merge did
    /// not change).
    pub fn update(&mut self) -> Result<usize> {
        let query = self.take()?;
        let data = query.require_data("update")?;
        let engine = query.engine()?;
        let ids = query.matching_ids(&engine)?;

        match ids.as_slice() {
            [] => Ok(0),
            [id] => Ok(usize::from(engine.update(*id, data)?)),
            _ => {
                let updates = ids.into_iter().map(|id| (id, data.clone())).collect();
                count_successes(engine.bulk_update(updates)?)
            }
        }
    }

    /// Delete every matching record; returns how many were deleted
    pub fn delete(&mut self) -> Result<usize> {
        let query = self.take()?;
        let engine = query.engine()?;
        let ids = query.matching_ids(&engine)?;

        match ids.as_slice() {
            [] => Ok(0),
            [id] => Ok(usize::from(engine.delete(*id)?)),
            _ => count_successes(engine.bulk_delete(ids)?),
        }
    }

    /// Matching records after ordering, pagination and projection
    pub fn find(&mut self) -> Result<Vec<Record>> {
        let query = self.take()?;
        query.run()
    }

    /// First matching record
    pub fn first(&mut self) -> Result<Option<Record>> {
        let mut query = self.take()?;
        query.limit = Some(1);
        Ok(query.run()?.into_iter().next())
    }

    /// Whether any record matches
    pub fn exists(&mut self) -> Result<bool> {
        Ok(self.first()?.is_some())
    }

    /// Number of matching records (ignores pagination)
    pub fn count(&mut self) -> Result<usize> {
        let query = self.take()?;
        let engine = query.engine()?;
        if query.conditions.is_empty() {
            return engine.count();
        }
        Ok(engine.find(&query.conditions, None, 0)?.len())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Move the built query out, leaving a fresh builder behind
    fn take(&mut self) -> Result<QueryHandler<'a>> {
        let db = self.db;
        let mut query = std::mem::replace(self, Self::new(db));
        match query.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(query),
        }
    }

    fn engine(&self) -> Result<Arc<TableEngine>> {
        match &self.table {
            Some(name) => self.db.table(name),
            None => Err(FlatError::Query("no table selected; call table() first".to_string())),
        }
    }

    fn require_data(&self, terminal: &str) -> Result<Record> {
        self.data
            .clone()
            .ok_or_else(|| FlatError::Query(format!("{} requires data()", terminal)))
    }

    fn matching_ids(&self, engine: &TableEngine) -> Result<Vec<u64>> {
        Ok(engine
            .find(&self.conditions, None, 0)?
            .iter()
            .filter_map(Record::id)
            .collect())
    }

    fn run(&self) -> Result<Vec<Record>> {
        let engine = self.engine()?;

        let records = match &self.order {
            // Unordered: the engine paginates in id order
            None => engine.find(&self.conditions, self.limit, self.offset)?,
            Some((field, direction)) => {
                let mut records = engine.find(&self.conditions, None, 0)?;
                records.sort_by(|a, b| {
                    let ordering = compare_by_field(a, b, field);
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                });
                records
                    .into_iter()
                    .skip(self.offset)
                    .take(self.limit.unwrap_or(usize::MAX))
                    .collect()
            }
        };

        Ok(match &self.fields {
            Some(fields) => records.iter().map(|r| r.project(fields)).collect(),
            None => records,
        })
    }
}

/// Successful records of a bulk run, or the first per-record error
fn count_successes(outcomes: Vec<BulkOutcome>) -> Result<usize> {
    let mut count = 0;
    for outcome in outcomes {
        match outcome {
            BulkOutcome::Failed { error, .. } => return Err(error),
            outcome if outcome.is_success() => count += 1,
            _ => {}
        }
    }
    Ok(count)
}
