//! Repository and unit-of-work error taxonomy.

use crate::db::DbError;
use crate::model::ModelError;
use rusqlite::ErrorCode;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    /// A single-result lookup matched nothing.
    #[error("no {entity} matched the criteria")]
    NotFound { entity: &'static str },
    /// A single-result lookup matched more than one row.
    #[error("{count} {entity} rows matched a single-result criteria")]
    MultipleMatches { entity: &'static str, count: usize },
    #[error("{entity} has no field `{field}`")]
    UnknownField { entity: &'static str, field: String },
    #[error("{entity} has no relation `{relation}`")]
    UnknownRelation {
        entity: &'static str,
        relation: String,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid value for field `{field}`: {message}")]
    InvalidValue { field: String, message: String },
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),
    /// Persisted data cannot be converted back into the mapped field type.
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("entity {0} is not mapped in the model")]
    Unmapped(&'static str),
    /// The store rejected the commit (constraint violation, lost row).
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),
    /// Connection or transport failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        let code = match &value {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::ConstraintViolation) => Self::PersistenceConflict(value.to_string()),
            Some(ErrorCode::OperationInterrupted) => Self::Cancelled,
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly
                | ErrorCode::NotADatabase,
            ) => Self::StoreUnavailable(value.to_string()),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}
