//! Core capture traits and types.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use thiserror::Error;

use crate::report::Report;
use crate::storage::{Instance, SnapshotMetrics};

/// Cell text standing in for SQL NULL.
///
/// Distinct from the empty string, which is a legitimate column value.
pub const NULL_CELL: &str = "NULL";

/// Errors that prevent or abort a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The instance definition can't be served (unsupported engine kind).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unreachable host, authentication failure or ping timeout.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Failure of a single diagnostic query.
///
/// Recovered inside the capture: it becomes one line of the summary's error
/// log and an empty table.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query didn't finish within its timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The driver or the server rejected the query.
    #[error("{0}")]
    Database(String),
}

/// Ordered rows of ordered string cells, as returned by one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, `NULL` where a row is too short.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |row| cell(row, index))
    }
}

/// Cell `index` of `row`; rows shorter than expected read as NULL.
pub fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or(NULL_CELL)
}

static EMPTY_TABLE: RawTable = RawTable { rows: Vec::new() };

/// A named diagnostic query of a dialect battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticQuery {
    /// Short name used as the error-log prefix and the result key.
    pub name: &'static str,
    /// Opaque SQL text sent as-is.
    pub sql: &'static str,
}

/// A query built at capture time from earlier results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpQuery {
    pub name: &'static str,
    pub sql: String,
}

/// Tables collected during one capture, keyed by query name.
///
/// A failed or skipped query reads back as an empty table.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    tables: HashMap<&'static str, RawTable>,
}

impl QueryResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, table: RawTable) {
        self.tables.insert(name, table);
    }

    /// Table produced by query `name`.
    pub fn get(&self, name: &str) -> &RawTable {
        self.tables.get(name).unwrap_or(&EMPTY_TABLE)
    }

    /// Builder form of [`insert`](Self::insert), handy for fixtures.
    pub fn with(mut self, name: &'static str, rows: Vec<Vec<String>>) -> Self {
        self.insert(name, RawTable::new(rows));
        self
    }
}

/// Executes diagnostic SQL against one live instance.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run `sql`, giving up after `timeout`.
    async fn query(&self, sql: &str, timeout: Duration) -> Result<RawTable, QueryError>;
}

/// Per-engine capture logic.
///
/// Implementations are zero-sized markers; the shared driver
/// [`run_capture`](crate::capture::run_capture) is monomorphized per dialect.
pub trait Dialect {
    /// Name used in log fields.
    const NAME: &'static str;

    /// The fixed battery, executed sequentially in this order.
    fn queries() -> &'static [DiagnosticQuery];

    /// Optional query derived from the battery's results.
    ///
    /// `None` means there is nothing to look up.
    fn follow_up(_results: &QueryResults) -> Option<FollowUpQuery> {
        None
    }

    /// Reduce raw tables to summary metrics. Must be pure.
    fn reduce(results: &QueryResults) -> SnapshotMetrics;

    /// Lay the tables out as a report.
    fn report(
        instance: &Instance,
        captured_at: DateTime<Local>,
        results: &QueryResults,
        metrics: &SnapshotMetrics,
    ) -> Report;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_reads_empty() {
        let results = QueryResults::new().with("act_sess", vec![vec!["1".into()]]);
        assert_eq!(results.get("act_sess").len(), 1);
        assert!(results.get("txn").is_empty());
    }

    #[test]
    fn test_short_row_reads_null() {
        let table = RawTable::new(vec![vec!["a".into(), "b".into()], vec!["c".into()]]);
        let col: Vec<&str> = table.column(1).collect();
        assert_eq!(col, vec!["b", NULL_CELL]);
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "query timed out after 10s");
    }
}
