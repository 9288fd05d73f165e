//! Conversion between domain `Value`s and SQLite storage values.
//!
//! # Invariants
//! - A `DECIMAL(p, s)` column holds the plain number, rounded half away from
//!   zero to `s` digits: INTEGER when it is whole, REAL otherwise. Values
//!   needing more than `p` digits, or that REAL cannot hold exactly, are
//!   rejected.
//! - Decimal reads accept INTEGER, REAL and numeric TEXT so rows written by
//!   plain SQL decode to the same value.
//! - UUIDs are stored as lowercase hyphenated TEXT; booleans as 0/1.
//! - `normalize` returns exactly what a round trip through the store yields.

use crate::model::{ColumnModel, ColumnType, FieldKind, Value};
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use uuid::Uuid;

/// Coerces a value to the column's kind without touching the store.
///
/// Used for criteria literals and staged entity values alike.
pub(crate) fn coerce(value: Value, column: &ColumnModel) -> RepoResult<Value> {
    let coerced = match (column.kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Bool, Value::Bool(flag)) => Value::Bool(flag),
        (FieldKind::Bool, Value::Integer(0)) => Value::Bool(false),
        (FieldKind::Bool, Value::Integer(1)) => Value::Bool(true),
        (FieldKind::Integer, Value::Integer(number)) => Value::Integer(number),
        (FieldKind::Real, Value::Real(number)) => Value::Real(number),
        (FieldKind::Real, Value::Integer(number)) => Value::Real(number as f64),
        (FieldKind::Text, Value::Text(text)) => Value::Text(text),
        (FieldKind::Text, Value::Uuid(id)) => Value::Text(id.hyphenated().to_string()),
        (FieldKind::Uuid, Value::Uuid(id)) => Value::Uuid(id),
        (FieldKind::Uuid, Value::Text(text)) => match Uuid::parse_str(text.trim()) {
            Ok(id) => Value::Uuid(id),
            Err(_) => return Err(invalid(column, format!("`{text}` is not a uuid"))),
        },
        (FieldKind::Decimal, Value::Decimal(number)) => Value::Decimal(number),
        (FieldKind::Decimal, Value::Integer(number)) => Value::Decimal(Decimal::from(number)),
        (FieldKind::Decimal, Value::Real(number)) => match Decimal::try_from(number) {
            Ok(number) => Value::Decimal(number),
            Err(_) => return Err(invalid(column, format!("{number} is not a finite decimal"))),
        },
        (FieldKind::Decimal, Value::Text(text)) => match Decimal::from_str(text.trim()) {
            Ok(number) => Value::Decimal(number),
            Err(_) => return Err(invalid(column, format!("`{text}` is not a decimal"))),
        },
        (kind, other) => {
            return Err(invalid(
                column,
                format!("expected {kind} value, found {}", other.shape()),
            ))
        }
    };

    match coerced {
        Value::Decimal(number) => {
            let rounded = fit_decimal(number, column)?;
            encode_decimal(rounded, column)?;
            Ok(Value::Decimal(rounded))
        }
        other => Ok(other),
    }
}

/// Coerces and checks nullability of a staged entity value.
pub(crate) fn normalize(value: Value, column: &ColumnModel) -> RepoResult<Value> {
    if value.is_null() && !column.nullable {
        return Err(invalid(column, "value is required".to_string()));
    }
    coerce(value, column)
}

/// Storage form of a value already coerced for `column`.
pub(crate) fn to_storage(value: &Value, column: &ColumnModel) -> RepoResult<SqlValue> {
    let stored = match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Integer(number) => SqlValue::Integer(*number),
        Value::Real(number) => SqlValue::Real(*number),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Uuid(id) => SqlValue::Text(id.hyphenated().to_string()),
        Value::Decimal(number) => encode_decimal(fit_decimal(*number, column)?, column)?,
    };
    Ok(stored)
}

/// Reads one stored column back into a domain value.
pub(crate) fn from_storage(stored: ValueRef<'_>, column: &ColumnModel, table: &str) -> RepoResult<Value> {
    let corrupt = |detail: &str| {
        RepoError::InvalidData(format!("{detail} in {table}.{}", column.name))
    };

    let value = match (column.kind, stored) {
        (_, ValueRef::Null) => {
            if !column.nullable {
                return Err(corrupt("null value"));
            }
            Value::Null
        }
        (FieldKind::Bool, ValueRef::Integer(0)) => Value::Bool(false),
        (FieldKind::Bool, ValueRef::Integer(1)) => Value::Bool(true),
        (FieldKind::Integer, ValueRef::Integer(number)) => Value::Integer(number),
        (FieldKind::Real, ValueRef::Real(number)) => Value::Real(number),
        (FieldKind::Real, ValueRef::Integer(number)) => Value::Real(number as f64),
        (FieldKind::Decimal, ValueRef::Integer(whole)) => {
            Value::Decimal(round_to_scale(Decimal::from(whole), column))
        }
        (FieldKind::Decimal, ValueRef::Real(number)) => match Decimal::try_from(number) {
            Ok(number) => Value::Decimal(round_to_scale(number, column)),
            Err(_) => return Err(corrupt("non-finite decimal")),
        },
        (FieldKind::Decimal, ValueRef::Text(bytes)) => {
            let parsed = std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| Decimal::from_str(text.trim()).ok());
            match parsed {
                Some(number) => Value::Decimal(round_to_scale(number, column)),
                None => return Err(corrupt("non-numeric decimal text")),
            }
        }
        (FieldKind::Text, ValueRef::Text(bytes)) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => return Err(corrupt("non utf-8 text")),
        },
        (FieldKind::Uuid, ValueRef::Text(bytes)) => {
            let parsed = std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| Uuid::parse_str(text).ok());
            match parsed {
                Some(id) => Value::Uuid(id),
                None => return Err(corrupt("invalid uuid value")),
            }
        }
        (kind, _) => return Err(corrupt(&format!("unexpected storage class for {kind}"))),
    };
    Ok(value)
}

fn decimal_shape(column: &ColumnModel) -> (u8, u8) {
    match column.column_type {
        ColumnType::Decimal { precision, scale } => (precision, scale),
        _ => (28, 0),
    }
}

fn round_to_scale(number: Decimal, column: &ColumnModel) -> Decimal {
    let (_, scale) = decimal_shape(column);
    let mut rounded =
        number.round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(u32::from(scale));
    rounded
}

/// Rounds to the column scale and checks the precision.
fn fit_decimal(number: Decimal, column: &ColumnModel) -> RepoResult<Decimal> {
    let (precision, scale) = decimal_shape(column);
    let rounded = round_to_scale(number, column);
    let limit = 10_i128.pow(u32::from(precision));
    if rounded.mantissa().abs() >= limit {
        return Err(invalid(
            column,
            format!("{number} exceeds DECIMAL({precision}, {scale})"),
        ));
    }
    Ok(rounded)
}

/// INTEGER for whole values, REAL otherwise.
fn encode_decimal(rounded: Decimal, column: &ColumnModel) -> RepoResult<SqlValue> {
    if rounded.fract().is_zero() {
        return rounded
            .trunc()
            .to_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| invalid(column, format!("{rounded} does not fit INTEGER")));
    }

    let real: f64 = rounded
        .normalize()
        .to_string()
        .parse()
        .map_err(|_| invalid(column, format!("{rounded} is not a finite number")))?;
    let stored_back = Decimal::try_from(real).map(|back| round_to_scale(back, column));
    if stored_back.ok() != Some(rounded) {
        return Err(invalid(
            column,
            format!("{rounded} has too many significant digits to store exactly"),
        ));
    }
    Ok(SqlValue::Real(real))
}

fn invalid(column: &ColumnModel, message: String) -> RepoError {
    RepoError::InvalidValue {
        field: column.name.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::{coerce, from_storage, normalize, to_storage};
    use crate::model::{ColumnModel, ColumnType, FieldKind, Value};
    use crate::repo::RepoError;
    use rusqlite::types::{Value as SqlValue, ValueRef};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn decimal_column() -> ColumnModel {
        ColumnModel {
            name: "total",
            kind: FieldKind::Decimal,
            nullable: false,
            column_type: ColumnType::Decimal {
                precision: 17,
                scale: 3,
            },
        }
    }

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    #[test]
    fn decimals_are_stored_as_plain_numbers() {
        let column = decimal_column();
        assert_eq!(
            to_storage(&Value::Decimal(dec("12.5")), &column).unwrap(),
            SqlValue::Real(12.5)
        );
        assert_eq!(
            to_storage(&Value::Decimal(dec("12.000")), &column).unwrap(),
            SqlValue::Integer(12)
        );

        let read = from_storage(ValueRef::Real(12.5), &column, "orders").unwrap();
        assert_eq!(read, Value::Decimal(dec("12.500")));
    }

    #[test]
    fn decimals_written_by_plain_sql_are_read_back() {
        let column = decimal_column();
        let whole = from_storage(ValueRef::Integer(12), &column, "orders").unwrap();
        assert_eq!(whole, Value::Decimal(dec("12.000")));

        let text = from_storage(ValueRef::Text(b"7.25"), &column, "orders").unwrap();
        assert_eq!(text, Value::Decimal(dec("7.250")));

        let rounded = from_storage(ValueRef::Real(3.1416), &column, "orders").unwrap();
        assert_eq!(rounded, Value::Decimal(dec("3.142")));

        assert!(matches!(
            from_storage(ValueRef::Text(b"lots"), &column, "orders"),
            Err(RepoError::InvalidData(_))
        ));
    }

    #[test]
    fn decimals_real_cannot_hold_exactly_are_rejected() {
        let column = decimal_column();
        assert!(coerce(Value::Decimal(dec("123456789.125")), &column).is_ok());
        let err = coerce(Value::Decimal(dec("99999999999999.999")), &column).unwrap_err();
        assert!(matches!(err, RepoError::InvalidValue { field, .. } if field == "total"));
        assert!(coerce(Value::Decimal(dec("99999999999999")), &column).is_ok());
    }

    #[test]
    fn decimals_round_half_away_from_zero_to_scale() {
        let column = decimal_column();
        assert_eq!(
            coerce(Value::Decimal(dec("1.0005")), &column).unwrap(),
            Value::Decimal(dec("1.001"))
        );
        assert_eq!(
            coerce(Value::Decimal(dec("-1.0005")), &column).unwrap(),
            Value::Decimal(dec("-1.001"))
        );
    }

    #[test]
    fn decimals_beyond_precision_are_rejected() {
        let column = decimal_column();
        assert!(coerce(Value::Decimal(dec("-99999999999999")), &column).is_ok());
        let err = coerce(Value::Decimal(dec("100000000000000")), &column).unwrap_err();
        assert!(matches!(err, RepoError::InvalidValue { field, .. } if field == "total"));
    }

    #[test]
    fn null_is_rejected_for_required_columns_only() {
        let column = decimal_column();
        assert!(normalize(Value::Null, &column).is_err());

        let optional = ColumnModel {
            nullable: true,
            ..decimal_column()
        };
        assert_eq!(normalize(Value::Null, &optional).unwrap(), Value::Null);
    }

    #[test]
    fn corrupt_storage_is_reported_as_invalid_data() {
        let column = ColumnModel {
            name: "id",
            kind: FieldKind::Uuid,
            nullable: false,
            column_type: ColumnType::Uuid,
        };
        let err = from_storage(ValueRef::Text(b"nope"), &column, "orders").unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(message) if message.contains("orders.id")));
    }
}
