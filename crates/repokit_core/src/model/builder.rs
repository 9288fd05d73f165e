//! Entity-to-storage model construction.
//!
//! # Responsibility
//! - Turn registered entity descriptors into table/column mappings.
//! - Apply schema conventions exactly once, at build time.
//!
//! # Invariants
//! - The mandated `DecimalPrecisionConvention` runs last and for every entity;
//!   there is no per-type opt-out.
//! - Conventions only replace column types, and every replacement must fit
//!   the field kind; names, nullability and the key are fixed by the entity.
//! - A built `Model` is immutable and shared by sessions through `Arc`.

use crate::model::convention::{ColumnType, DecimalPrecisionConvention, SchemaConvention};
use crate::model::value::FieldKind;
use crate::model::Entity;
use indexmap::IndexMap;
use log::info;
use std::any::TypeId;
use std::collections::HashSet;

/// Invalid entity registration detected while building the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("entity {entity} declares key `{key}` which is not one of its fields")]
    MissingKey {
        entity: &'static str,
        key: &'static str,
    },
    #[error("entity {entity} declares nullable key `{key}`")]
    NullableKey {
        entity: &'static str,
        key: &'static str,
    },
    #[error("entity {entity} declares field `{field}` more than once")]
    DuplicateField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("convention {convention} maps {entity}.{column} to {column_type}, which cannot hold its values")]
    IncompatibleColumnType {
        entity: &'static str,
        column: &'static str,
        convention: &'static str,
        column_type: String,
    },
    #[error("table `{table}` is mapped by both {first} and {second}")]
    DuplicateTable {
        table: &'static str,
        first: &'static str,
        second: &'static str,
    },
}

/// Storage mapping of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnModel {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub column_type: ColumnType,
}

/// Storage mapping of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityModel {
    pub type_name: &'static str,
    pub table: &'static str,
    pub key_index: usize,
    pub columns: Vec<ColumnModel>,
    type_id: TypeId,
}

impl EntityModel {
    pub fn key_column(&self) -> &ColumnModel {
        &self.columns[self.key_index]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnModel> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn maps<T: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    fn from_entity<T: Entity>() -> Result<Self, ModelError> {
        let descriptor = T::descriptor();
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            if !seen.insert(field.name) {
                return Err(ModelError::DuplicateField {
                    entity: descriptor.type_name,
                    field: field.name,
                });
            }
            columns.push(ColumnModel {
                name: field.name,
                kind: field.kind,
                nullable: field.nullable,
                column_type: ColumnType::default_for(field.kind),
            });
        }

        let key_index = descriptor
            .field_index(descriptor.key)
            .ok_or(ModelError::MissingKey {
                entity: descriptor.type_name,
                key: descriptor.key,
            })?;
        if columns[key_index].nullable {
            return Err(ModelError::NullableKey {
                entity: descriptor.type_name,
                key: descriptor.key,
            });
        }

        Ok(Self {
            type_name: descriptor.type_name,
            table: descriptor.table,
            key_index,
            columns,
            type_id: TypeId::of::<T>(),
        })
    }
}

type EntityFactory = fn() -> Result<EntityModel, ModelError>;

/// Collects entity registrations and conventions, then builds a `Model`.
#[derive(Default)]
pub struct ModelBuilder {
    factories: Vec<EntityFactory>,
    conventions: Vec<Box<dyn SchemaConvention>>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entity type.
    pub fn entity<T: Entity>(mut self) -> Self {
        self.factories.push(EntityModel::from_entity::<T>);
        self
    }

    /// Registers an additional convention.
    ///
    /// Extra conventions run before the mandated decimal convention.
    pub fn convention(mut self, convention: impl SchemaConvention + 'static) -> Self {
        self.conventions.push(Box::new(convention));
        self
    }

    pub fn build(self) -> Result<Model, ModelError> {
        let mandated = DecimalPrecisionConvention::standard();
        let mut entities: IndexMap<&'static str, EntityModel> = IndexMap::new();

        for factory in self.factories {
            let mut entity = factory()?;
            for convention in &self.conventions {
                apply_convention(convention.as_ref(), &mut entity)?;
            }
            apply_convention(&mandated, &mut entity)?;

            if let Some(existing) = entities.get(entity.table) {
                if existing.type_id == entity.type_id {
                    continue;
                }
                return Err(ModelError::DuplicateTable {
                    table: entity.table,
                    first: existing.type_name,
                    second: entity.type_name,
                });
            }
            entities.insert(entity.table, entity);
        }

        let decimal_columns = entities
            .values()
            .flat_map(|entity| entity.columns.iter())
            .filter(|column| column.kind == FieldKind::Decimal)
            .count();
        info!(
            "event=model_build module=model status=ok entities={} decimal_columns={} conventions={}",
            entities.len(),
            decimal_columns,
            self.conventions.len() + 1
        );

        Ok(Model { entities })
    }
}

fn apply_convention(
    convention: &dyn SchemaConvention,
    entity: &mut EntityModel,
) -> Result<(), ModelError> {
    for index in 0..entity.columns.len() {
        let column = &entity.columns[index];
        let Some(column_type) = convention.column_type(entity, column) else {
            continue;
        };
        if !column_type.fits(column.kind) {
            return Err(ModelError::IncompatibleColumnType {
                entity: entity.type_name,
                column: column.name,
                convention: convention.name(),
                column_type: column_type.to_string(),
            });
        }
        entity.columns[index].column_type = column_type;
    }
    Ok(())
}

/// The built entity-to-storage mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    entities: IndexMap<&'static str, EntityModel>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    pub fn entity_by_table(&self, table: &str) -> Option<&EntityModel> {
        self.entities.get(table)
    }

    /// Returns the mapping for `T`, or `None` when `T` was not registered.
    pub fn entity_of<T: Entity>(&self) -> Option<&EntityModel> {
        self.entities
            .get(T::descriptor().table)
            .filter(|entity| entity.maps::<T>())
    }
}
