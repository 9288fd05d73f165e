//! SQLite connection bootstrap and schema checks.
//!
//! # Responsibility
//! - Open and configure SQLite connections for sessions.
//! - Materialize or verify the tables described by a built `Model`.
//!
//! # Invariants
//! - Returned connections have pragmas from `ConnectionOptions` applied.
//! - A session is only handed a connection whose schema matches the model.

use thiserror::Error;

mod open;
pub mod schema;

pub use open::{open_db, open_db_in_memory, ConnectionOptions};
pub use schema::{create_schema, verify_schema};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("store is missing required table `{0}`")]
    MissingRequiredTable(String),
    #[error("store is missing required column `{column}` in table `{table}`")]
    MissingRequiredColumn { table: String, column: String },
    #[error("column `{table}.{column}` is declared `{found}`, model expects `{expected}`")]
    ColumnTypeMismatch {
        table: String,
        column: String,
        expected: String,
        found: String,
    },
}
