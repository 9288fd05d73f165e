//! Field value vocabulary shared by entities, criteria and the storage codec.
//!
//! # Responsibility
//! - Define the closed set of value shapes an entity field may hold.
//! - Convert between Rust field types and `Value` through `FieldType`.
//!
//! # Invariants
//! - `FieldType::from_value(x.to_value())` returns a value equal to `x`.
//! - `Value::Null` is only accepted by nullable (`Option<_>`) field types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Logical kind of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Integer,
    Real,
    /// Fixed-point decimal; column precision/scale come from the built model.
    Decimal,
    Text,
    Uuid,
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// One field value, independent of the owning entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value shape, used in conversion errors.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Canonical text used to key tracked entities by identity.
    ///
    /// Returns `None` for `Null`, which is never a valid identity.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Decimal(value) => Some(value.normalize().to_string()),
            Self::Text(value) => Some(value.clone()),
            Self::Uuid(value) => Some(value.hyphenated().to_string()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Uuid(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion failure between a `Value` and a typed field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} value, found {found}")]
pub struct ValueError {
    pub expected: FieldKind,
    pub found: &'static str,
}

impl ValueError {
    fn new(expected: FieldKind, found: &Value) -> Self {
        Self {
            expected,
            found: found.shape(),
        }
    }
}

/// Rust types that can back an entity field.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(value) => Ok(value),
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for i64 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(value) => Ok(value),
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for i32 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(value) => {
                i32::try_from(value).map_err(|_| ValueError::new(Self::KIND, &Value::Integer(value)))
            }
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for f64 {
    const KIND: FieldKind = FieldKind::Real;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Real(value) => Ok(value),
            Value::Integer(value) => Ok(value as f64),
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for Decimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn to_value(&self) -> Value {
        Value::Decimal(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Decimal(value) => Ok(value),
            Value::Integer(value) => Ok(Decimal::from(value)),
            Value::Text(text) => {
                Decimal::from_str(text.trim()).map_err(|_| ValueError::new(Self::KIND, &Value::Text(text)))
            }
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(value) => Ok(value),
            Value::Uuid(value) => Ok(value.hyphenated().to_string()),
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl FieldType for Uuid {
    const KIND: FieldKind = FieldKind::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Uuid(value) => Ok(value),
            Value::Text(text) => {
                Uuid::parse_str(text.trim()).map_err(|_| ValueError::new(Self::KIND, &Value::Text(text)))
            }
            other => Err(ValueError::new(Self::KIND, &other)),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, FieldType, Value};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn non_nullable_types_reject_null() {
        let err = String::from_value(Value::Null).unwrap_err();
        assert_eq!(err.expected, FieldKind::Text);
        assert_eq!(err.found, "null");
    }

    #[test]
    fn optional_types_accept_null() {
        assert_eq!(Option::<Decimal>::from_value(Value::Null).unwrap(), None);
        assert!(<Option<Decimal> as FieldType>::NULLABLE);
        assert_eq!(<Option<Decimal> as FieldType>::KIND, FieldKind::Decimal);
    }

    #[test]
    fn uuid_accepts_text_form() {
        let id = Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap();
        let parsed = Uuid::from_value(Value::from("123e4567-e89b-12d3-a456-426614174000")).unwrap();
        assert_eq!(parsed, id);
        assert!(Uuid::from_value(Value::from("not-a-uuid")).is_err());
    }

    #[test]
    fn key_text_is_stable_for_equal_decimals() {
        let a = Value::Decimal(Decimal::new(1250, 2));
        let b = Value::Decimal(Decimal::new(12500, 3));
        assert_eq!(a.key_text(), b.key_text());
        assert_eq!(Value::Null.key_text(), None);
    }
}
