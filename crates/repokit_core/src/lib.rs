//! Generic repository and unit-of-work data access over SQLite.
//! Entities are described once with [`entity!`]; repositories, queries and
//! commits work for every mapped type through that description.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod session;
pub mod uow;

pub use config::{ConfigError, LoggingConfig, SchemaMode, StoreConfig};
pub use db::{DbError, DbResult};
pub use logging::{init_logging, logging_status, LoggingError};
pub use model::{
    get_field, has_field, set_field, ColumnType, DecimalPrecisionConvention, Entity,
    EntityDescriptor, FieldKind, FieldType, Model, ModelBuilder, ModelError, SchemaConvention,
    Value,
};
pub use query::{Criteria, Query, QueryTracking};
pub use repo::{RepoError, RepoResult, Repository};
pub use session::{EntryState, PersistenceSession};
pub use uow::{SessionFactory, UnitOfWork, UnitTransaction};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
