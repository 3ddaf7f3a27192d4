//! Column helpers shared by the dialect reductions.
//!
//! Durations and counts arrive as text. NULL, empty or garbage cells count as
//! zero, and maxima scan every row instead of trusting the query's ordering.

use crate::capture::RawTable;

/// Queries running longer than this many seconds count as big.
pub const BIG_QUERY_SECONDS: f64 = 10.0;

/// Parse a numeric cell; anything unparseable or non-finite is 0.
pub fn number(cell: &str) -> f64 {
    match cell.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Parse a duration cell rounded to whole seconds.
pub fn seconds(cell: &str) -> i64 {
    number(cell).round() as i64
}

/// Rows whose column value satisfies `pred`.
pub fn count_where(table: &RawTable, column: usize, pred: impl Fn(&str) -> bool) -> i64 {
    table.column(column).filter(|v| pred(v)).count() as i64
}

/// Rows whose duration column is strictly above [`BIG_QUERY_SECONDS`].
pub fn count_big(table: &RawTable, column: usize) -> i64 {
    count_where(table, column, |v| number(v) > BIG_QUERY_SECONDS)
}

/// Largest duration in a column, 0 for an empty table.
pub fn max_seconds(table: &RawTable, column: usize) -> i64 {
    table.column(column).map(seconds).max().unwrap_or(0).max(0)
}

/// Largest duration among rows accepted by `filter`.
pub fn max_seconds_where(
    table: &RawTable,
    column: usize,
    filter_column: usize,
    filter: impl Fn(&str) -> bool,
) -> i64 {
    table
        .rows
        .iter()
        .filter(|row| filter(crate::capture::cell(row, filter_column)))
        .map(|row| seconds(crate::capture::cell(row, column)))
        .max()
        .unwrap_or(0)
        .max(0)
}

/// Sum of a count column.
pub fn sum(table: &RawTable, column: usize) -> i64 {
    table.column(column).map(seconds).sum()
}

/// Row count as a metric value.
pub fn rows(table: &RawTable) -> i64 {
    table.len() as i64
}
