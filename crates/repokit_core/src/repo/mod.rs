//! Generic repositories over mapped entity types.

pub mod error;
pub mod repository;

pub use error::{RepoError, RepoResult};
pub use repository::Repository;
