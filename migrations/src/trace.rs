//! Tracing helpers for state queries and transaction lifecycle.
//!
//! These keep event names and fields uniform across drivers.

/// Emit a debug-level event with the SQL text a driver is about to run.
///
/// ```ignore
/// trace_query!(DRIVER, &sql);
/// ```
#[macro_export]
#[doc(hidden)]
macro_rules! trace_query {
    ($driver:expr, $sql:expr) => {
        ::tracing::debug!(driver = $driver, sql = %$sql, "shiftsql.query");
    };
}

/// Emit an event for transaction lifecycle (begin, commit, rollback).
///
/// ```ignore
/// trace_tx!("begin", "sqlite.rusqlite");
/// ```
#[macro_export]
#[doc(hidden)]
macro_rules! trace_tx {
    ($event:literal, $driver:expr) => {
        ::tracing::debug!(event = $event, driver = $driver, "shiftsql.transaction");
    };
}
