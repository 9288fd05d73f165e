//! Name-driven field access for generic import/export and mapping pipelines.
//!
//! # Responsibility
//! - Check, read and write entity fields whose names are only known at run time.
//!
//! # Invariants
//! - Field existence is validated before any assignment; type mismatches are
//!   reported as `InvalidValue`, never as a store error.
//! - Text assigned to a UUID field is parsed; text fields keep text verbatim.

use crate::model::value::{FieldKind, Value};
use crate::model::Entity;
use crate::repo::{RepoError, RepoResult};
use uuid::Uuid;

/// Returns whether entity type `T` declares a persisted field called `name`.
pub fn has_field<T: Entity>(name: &str) -> bool {
    T::descriptor().field(name).is_some()
}

/// Reads one field of `entity` by name.
pub fn get_field<T: Entity>(entity: &T, name: &str) -> RepoResult<Value> {
    let descriptor = T::descriptor();
    let field = descriptor.field(name).ok_or_else(|| RepoError::UnknownField {
        entity: descriptor.type_name,
        field: name.to_string(),
    })?;
    Ok((field.get)(entity))
}

/// Writes one field of `entity` by name.
///
/// A `Null` value is ignored. Text written to a UUID field is parsed first;
/// every other value is passed to the field as-is.
///
/// # Errors
/// - `UnknownField` when `T` has no field called `name`.
/// - `InvalidValue` when the value cannot be converted to the field type.
pub fn set_field<T: Entity>(entity: &mut T, name: &str, value: impl Into<Value>) -> RepoResult<()> {
    let value = value.into();
    if value.is_null() {
        return Ok(());
    }

    let descriptor = T::descriptor();
    let field = descriptor.field(name).ok_or_else(|| RepoError::UnknownField {
        entity: descriptor.type_name,
        field: name.to_string(),
    })?;

    let value = match value {
        Value::Text(text) if field.kind == FieldKind::Uuid => match Uuid::parse_str(text.trim()) {
            Ok(id) => Value::Uuid(id),
            Err(_) => Value::Text(text),
        },
        other => other,
    };

    (field.set)(entity, value).map_err(|source| RepoError::InvalidValue {
        field: field.name.to_string(),
        message: source.to_string(),
    })
}
