//! Predicate queries: criteria AST, SQL compilation and lazy query handles.

pub mod criteria;
pub mod lazy;
pub mod sql;

pub use criteria::{escape_like, CompareOp, Criteria, FieldRef};
pub use lazy::Query;

/// Whether rows returned by a query are attached to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryTracking {
    /// Returned rows are tracked as `Unchanged`.
    #[default]
    Tracking,
    /// Returned rows are detached snapshots.
    NoTracking,
}

impl QueryTracking {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::NoTracking => "no_tracking",
        }
    }
}
