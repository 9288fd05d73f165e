//! Entity model: per-type capability tables and the built storage model.
//!
//! # Responsibility
//! - Describe every entity type through a compile-time registered
//!   `EntityDescriptor` (table, key, typed field accessors, relations).
//! - Build the entity-to-storage `Model` once and apply schema conventions.
//!
//! # Invariants
//! - Field order in a descriptor is the column order in storage.
//! - Field access by name never uses runtime type inspection; it goes through
//!   the function pointers registered in the descriptor.

pub mod accessor;
pub mod builder;
pub mod convention;
pub mod value;

pub use accessor::{get_field, has_field, set_field};
pub use builder::{ColumnModel, EntityModel, Model, ModelBuilder, ModelError};
pub use convention::{ColumnType, DecimalPrecisionConvention, SchemaConvention};
pub use value::{FieldKind, FieldType, Value, ValueError};

use crate::repo::RepoResult;
use crate::session::PersistenceSession;
use std::fmt::Debug;

/// An application record persisted through the repository layer.
///
/// Implementations are normally generated with [`entity!`](crate::entity).
pub trait Entity: Clone + Default + Debug + 'static {
    fn descriptor() -> &'static EntityDescriptor<Self>;
}

/// Reads one field of `T` as a `Value`.
pub type FieldGetter<T> = fn(&T) -> Value;
/// Writes one field of `T` from a `Value`.
pub type FieldSetter<T> = fn(&mut T, Value) -> Result<(), ValueError>;
/// Populates one navigation property of `T` using the owning session.
pub type RelationLoader<T> = fn(&mut PersistenceSession, &mut T) -> RepoResult<()>;

/// One persisted field of an entity type.
pub struct FieldDef<T> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub get: FieldGetter<T>,
    pub set: FieldSetter<T>,
}

/// A named related-entity loader usable as an eager-load directive.
pub struct Relation<T> {
    pub name: &'static str,
    pub load: RelationLoader<T>,
}

/// Capability table for one entity type.
pub struct EntityDescriptor<T> {
    pub type_name: &'static str,
    pub table: &'static str,
    pub key: &'static str,
    pub fields: Vec<FieldDef<T>>,
    pub relations: Vec<Relation<T>>,
}

impl<T> EntityDescriptor<T> {
    pub fn field(&self, name: &str) -> Option<&FieldDef<T>> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation<T>> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Snapshot of all field values in declaration order.
    pub fn values(&self, entity: &T) -> Vec<Value> {
        self.fields.iter().map(|field| (field.get)(entity)).collect()
    }

    /// Writes `values` (declaration order) onto `entity`.
    pub fn apply(&self, entity: &mut T, values: Vec<Value>) -> RepoResult<()> {
        for (field, value) in self.fields.iter().zip(values) {
            (field.set)(entity, value).map_err(|source| crate::repo::RepoError::InvalidValue {
                field: field.name.to_string(),
                message: source.to_string(),
            })?;
        }
        Ok(())
    }
}

impl<T: Default> EntityDescriptor<T> {
    /// Builds a fresh entity from a full value row.
    pub fn materialize(&self, values: Vec<Value>) -> RepoResult<T> {
        let mut entity = T::default();
        self.apply(&mut entity, values)?;
        Ok(entity)
    }
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::OnceCell;
}

/// Implements [`Entity`] for a struct by registering its persisted fields.
///
/// ```ignore
/// entity! {
///     Order in "orders" {
///         key: id,
///         fields: { id: Uuid, customer_id: Uuid, total: Decimal },
///         relations: { "customer" => load_customer },
///     }
/// }
/// ```
///
/// Column names equal field names. Fields not listed (navigation properties)
/// are left at their `Default` value when rows are materialized.
#[macro_export]
macro_rules! entity {
    (
        $ty:ident in $table:literal {
            key: $key:ident,
            fields: { $($field:ident : $fty:ty),+ $(,)? }
            $(, relations: { $($rel:literal => $loader:path),* $(,)? })?
            $(,)?
        }
    ) => {
        impl $crate::model::Entity for $ty {
            fn descriptor() -> &'static $crate::model::EntityDescriptor<Self> {
                static DESCRIPTOR: $crate::model::__private::OnceCell<
                    $crate::model::EntityDescriptor<$ty>,
                > = $crate::model::__private::OnceCell::new();
                DESCRIPTOR.get_or_init(|| $crate::model::EntityDescriptor {
                    type_name: stringify!($ty),
                    table: $table,
                    key: stringify!($key),
                    fields: vec![
                        $(
                            $crate::model::FieldDef {
                                name: stringify!($field),
                                kind: <$fty as $crate::model::FieldType>::KIND,
                                nullable: <$fty as $crate::model::FieldType>::NULLABLE,
                                get: |entity: &$ty| {
                                    $crate::model::FieldType::to_value(&entity.$field)
                                },
                                set: |entity: &mut $ty, value: $crate::model::Value| {
                                    entity.$field =
                                        <$fty as $crate::model::FieldType>::from_value(value)?;
                                    Ok(())
                                },
                            }
                        ),+
                    ],
                    relations: vec![
                        $($(
                            $crate::model::Relation { name: $rel, load: $loader }
                        ),*)?
                    ],
                })
            }
        }
    };
}
