//! Column types and model-build-time schema conventions.
//!
//! # Invariants
//! - After `DecimalPrecisionConvention::standard()` runs, every decimal
//!   column of every entity is `DECIMAL(17, 3)`.
//! - A convention can only replace column types; it never renames, adds,
//!   removes or re-keys columns.

use crate::model::builder::{ColumnModel, EntityModel};
use crate::model::value::FieldKind;
use std::fmt::{Display, Formatter};

/// Precision mandated for every fixed-point column.
pub const DECIMAL_PRECISION: u8 = 17;
/// Scale mandated for every fixed-point column.
pub const DECIMAL_SCALE: u8 = 3;

/// Storage column type of one mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Integer,
    Real,
    Decimal { precision: u8, scale: u8 },
    Text,
    Uuid,
}

impl ColumnType {
    /// Default column type for a field kind, before conventions run.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Boolean,
            FieldKind::Integer => Self::Integer,
            FieldKind::Real => Self::Real,
            FieldKind::Decimal => Self::Decimal {
                precision: 18,
                scale: 2,
            },
            FieldKind::Text => Self::Text,
            FieldKind::Uuid => Self::Uuid,
        }
    }

    /// Declared SQL type used in DDL and checked during schema verification.
    pub fn sql_type(&self) -> String {
        match self {
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            Self::Text | Self::Uuid => "TEXT".to_string(),
        }
    }

    /// Whether a column of this type can hold values of `kind`.
    ///
    /// Decimals are limited to 18 digits so whole values fit an INTEGER.
    pub fn fits(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (Self::Decimal { precision, scale }, FieldKind::Decimal) => {
                *precision > 0 && *precision <= 18 && scale <= precision
            }
            (Self::Boolean, FieldKind::Bool)
            | (Self::Integer, FieldKind::Integer)
            | (Self::Real, FieldKind::Real)
            | (Self::Text, FieldKind::Text)
            | (Self::Uuid, FieldKind::Uuid) => true,
            _ => false,
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql_type())
    }
}

/// A rule applied to every column once, while the model is being built.
pub trait SchemaConvention: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replacement type for `column`, or `None` to keep the current one.
    ///
    /// The builder rejects a replacement that does not fit the field kind.
    fn column_type(&self, entity: &EntityModel, column: &ColumnModel) -> Option<ColumnType>;
}

/// Rewrites every decimal column to a fixed precision and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalPrecisionConvention {
    pub precision: u8,
    pub scale: u8,
}

impl DecimalPrecisionConvention {
    /// The schema-wide `DECIMAL(17, 3)` rule.
    pub const fn standard() -> Self {
        Self {
            precision: DECIMAL_PRECISION,
            scale: DECIMAL_SCALE,
        }
    }
}

impl SchemaConvention for DecimalPrecisionConvention {
    fn name(&self) -> &'static str {
        "decimal_precision"
    }

    fn column_type(&self, _entity: &EntityModel, column: &ColumnModel) -> Option<ColumnType> {
        (column.kind == FieldKind::Decimal).then_some(ColumnType::Decimal {
            precision: self.precision,
            scale: self.scale,
        })
    }
}
