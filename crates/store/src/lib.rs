//! `queryjobs-store` — job registry, view generation and result-set storage.
//!
//! Trait seams with two implementations each: Postgres (sqlx) for service
//! use and in-memory for tests/dev. View DDL generation is a pure module
//! shared by both.

use queryjobs_core::{QjError, QjResult};
use sqlx::postgres::PgRow;
use sqlx::Row;

pub mod registry;
pub mod result_sets;
pub mod schema;
pub mod views;

pub use registry::{InMemoryJobRegistry, JobRegistry, PostgresJobRegistry};
pub use result_sets::{InMemoryResultSetStore, PostgresResultSetStore, ResultSetStore};

/// Persistence failures propagate unretried; the operation name keeps the
/// message diagnosable without a backtrace.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QjError {
    QjError::storage(format!("{operation}: {err}"))
}

pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> QjResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| QjError::storage(format!("column {name}: {e}")))
}
