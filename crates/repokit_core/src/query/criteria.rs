//! Serializable predicate AST over entity fields.
//!
//! # Responsibility
//! - Represent filters as data that can be compiled to SQL or evaluated in
//!   process against tracked entity values.
//! - Resolve field references and coerce literals against a mapped entity.
//!
//! # Invariants
//! - Both evaluation paths use SQL three-valued logic over the storage form
//!   of values (see `session::codec`), so they select the same rows.
//! - `LIKE` is ASCII case-insensitive with `%`, `_` and `\` as escape.

use crate::model::{EntityModel, FieldKind, Value};
use crate::repo::{RepoError, RepoResult};
use crate::session::codec;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Not;

/// Escape character used by `LIKE` patterns.
pub const LIKE_ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// A predicate selecting a subset of entities of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Criteria {
    All,
    Compare {
        field: String,
        cmp: CompareOp,
        value: Value,
    },
    IsNull {
        field: String,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Like {
        field: String,
        pattern: String,
    },
    And {
        all: Vec<Criteria>,
    },
    Or {
        any: Vec<Criteria>,
    },
    Not {
        criteria: Box<Criteria>,
    },
}

impl Default for Criteria {
    fn default() -> Self {
        Self::All
    }
}

impl Criteria {
    pub fn all() -> Self {
        Self::All
    }

    /// Starts a predicate on one field.
    pub fn field(name: impl Into<String>) -> FieldRef {
        FieldRef(name.into())
    }

    pub fn and(self, other: Criteria) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (Self::And { mut all }, Self::And { all: rest }) => {
                all.extend(rest);
                Self::And { all }
            }
            (Self::And { mut all }, other) => {
                all.push(other);
                Self::And { all }
            }
            (left, right) => Self::And {
                all: vec![left, right],
            },
        }
    }

    pub fn or(self, other: Criteria) -> Self {
        match (self, other) {
            (Self::Or { mut any }, Self::Or { any: rest }) => {
                any.extend(rest);
                Self::Or { any }
            }
            (Self::Or { mut any }, other) => {
                any.push(other);
                Self::Or { any }
            }
            (left, right) => Self::Or {
                any: vec![left, right],
            },
        }
    }

    /// Validates field references and coerces literals for `entity`.
    pub(crate) fn resolve(&self, entity: &EntityModel) -> RepoResult<Criteria> {
        let resolved = match self {
            Self::All => Self::All,
            Self::Compare { field, cmp, value } => {
                let column = column_of(entity, field)?;
                Self::Compare {
                    field: field.clone(),
                    cmp: *cmp,
                    value: codec::coerce(value.clone(), column)?,
                }
            }
            Self::IsNull { field } => {
                column_of(entity, field)?;
                Self::IsNull {
                    field: field.clone(),
                }
            }
            Self::In { field, values } => {
                let column = column_of(entity, field)?;
                let values = values
                    .iter()
                    .map(|value| codec::coerce(value.clone(), column))
                    .collect::<RepoResult<Vec<_>>>()?;
                Self::In {
                    field: field.clone(),
                    values,
                }
            }
            Self::Like { field, pattern } => {
                let column = column_of(entity, field)?;
                if !matches!(column.kind, FieldKind::Text | FieldKind::Uuid) {
                    return Err(RepoError::InvalidCriteria(format!(
                        "LIKE requires a text field, `{field}` is {}",
                        column.kind
                    )));
                }
                Self::Like {
                    field: field.clone(),
                    pattern: pattern.clone(),
                }
            }
            Self::And { all } => Self::And {
                all: all
                    .iter()
                    .map(|criteria| criteria.resolve(entity))
                    .collect::<RepoResult<Vec<_>>>()?,
            },
            Self::Or { any } => Self::Or {
                any: any
                    .iter()
                    .map(|criteria| criteria.resolve(entity))
                    .collect::<RepoResult<Vec<_>>>()?,
            },
            Self::Not { criteria } => Self::Not {
                criteria: Box::new(criteria.resolve(entity)?),
            },
        };
        Ok(resolved)
    }

    /// Evaluates a resolved criteria against one row of current values.
    ///
    /// Returns `None` for SQL `UNKNOWN`.
    pub(crate) fn evaluate(&self, entity: &EntityModel, row: &[Value]) -> RepoResult<Option<bool>> {
        let outcome = match self {
            Self::All => Some(true),
            Self::Compare { field, cmp, value } => {
                let (left, column) = stored_field(entity, row, field)?;
                let right = codec::to_storage(value, column)?;
                compare_storage(&left, &right).map(|ordering| cmp.holds(ordering))
            }
            Self::IsNull { field } => {
                let (stored, _) = stored_field(entity, row, field)?;
                Some(stored == SqlValue::Null)
            }
            Self::In { field, values } => {
                let (left, column) = stored_field(entity, row, field)?;
                if left == SqlValue::Null {
                    return Ok(None);
                }
                let mut saw_unknown = false;
                let mut matched = false;
                for value in values {
                    match compare_storage(&left, &codec::to_storage(value, column)?) {
                        Some(Ordering::Equal) => {
                            matched = true;
                            break;
                        }
                        Some(_) => {}
                        None => saw_unknown = true,
                    }
                }
                if matched {
                    Some(true)
                } else if saw_unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Self::Like { field, pattern } => {
                let (stored, _) = stored_field(entity, row, field)?;
                match stored {
                    SqlValue::Text(text) => Some(like_regex(pattern)?.is_match(&text.to_ascii_lowercase())),
                    SqlValue::Null => None,
                    _ => Some(false),
                }
            }
            Self::And { all } => {
                let mut outcome = Some(true);
                for criteria in all {
                    match criteria.evaluate(entity, row)? {
                        Some(false) => return Ok(Some(false)),
                        None => outcome = None,
                        Some(true) => {}
                    }
                }
                outcome
            }
            Self::Or { any } => {
                let mut outcome = Some(false);
                for criteria in any {
                    match criteria.evaluate(entity, row)? {
                        Some(true) => return Ok(Some(true)),
                        None => outcome = None,
                        Some(false) => {}
                    }
                }
                outcome
            }
            Self::Not { criteria } => criteria.evaluate(entity, row)?.map(|value| !value),
        };
        Ok(outcome)
    }

    /// `true` only when the criteria evaluates to SQL `TRUE`.
    pub(crate) fn matches(&self, entity: &EntityModel, row: &[Value]) -> RepoResult<bool> {
        Ok(self.evaluate(entity, row)? == Some(true))
    }
}

impl Not for Criteria {
    type Output = Criteria;

    fn not(self) -> Self::Output {
        match self {
            Self::Not { criteria } => *criteria,
            other => Self::Not {
                criteria: Box::new(other),
            },
        }
    }
}

/// Builder for predicates on a single field.
#[derive(Debug, Clone)]
pub struct FieldRef(String);

impl FieldRef {
    fn compare(self, cmp: CompareOp, value: impl Into<Value>) -> Criteria {
        Criteria::Compare {
            field: self.0,
            cmp,
            value: value.into(),
        }
    }

    /// Equality. Comparing with `Null` never matches; use `is_null`.
    pub fn eq(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Criteria {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_null(self) -> Criteria {
        Criteria::IsNull { field: self.0 }
    }

    pub fn is_not_null(self) -> Criteria {
        !self.is_null()
    }

    pub fn one_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Criteria {
        Criteria::In {
            field: self.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw `LIKE` pattern (`%`, `_`, `\` escape).
    pub fn like(self, pattern: impl Into<String>) -> Criteria {
        Criteria::Like {
            field: self.0,
            pattern: pattern.into(),
        }
    }

    pub fn starts_with(self, prefix: &str) -> Criteria {
        self.like(format!("{}%", escape_like(prefix)))
    }

    pub fn contains(self, fragment: &str) -> Criteria {
        self.like(format!("%{}%", escape_like(fragment)))
    }
}

/// Escapes `LIKE` wildcards so `text` matches literally.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_') || ch == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

fn column_of<'m>(entity: &'m EntityModel, field: &str) -> RepoResult<&'m crate::model::ColumnModel> {
    entity.column(field).ok_or_else(|| RepoError::UnknownField {
        entity: entity.type_name,
        field: field.to_string(),
    })
}

fn stored_field<'m>(
    entity: &'m EntityModel,
    row: &[Value],
    field: &str,
) -> RepoResult<(SqlValue, &'m crate::model::ColumnModel)> {
    let index = entity.column_index(field).ok_or_else(|| RepoError::UnknownField {
        entity: entity.type_name,
        field: field.to_string(),
    })?;
    let column = &entity.columns[index];
    let value = row.get(index).unwrap_or(&Value::Null);
    Ok((codec::to_storage(value, column)?, column))
}

/// SQLite ordering of two storage values; `None` when either side is NULL.
fn compare_storage(left: &SqlValue, right: &SqlValue) -> Option<Ordering> {
    match (left, right) {
        (SqlValue::Null, _) | (_, SqlValue::Null) => None,
        (SqlValue::Integer(a), SqlValue::Integer(b)) => Some(a.cmp(b)),
        (SqlValue::Integer(a), SqlValue::Real(b)) => (*a as f64).partial_cmp(b),
        (SqlValue::Real(a), SqlValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (SqlValue::Real(a), SqlValue::Real(b)) => a.partial_cmp(b),
        (SqlValue::Text(a), SqlValue::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (SqlValue::Blob(a), SqlValue::Blob(b)) => Some(a.cmp(b)),
        // numeric < text < blob
        (SqlValue::Integer(_) | SqlValue::Real(_), _) => Some(Ordering::Less),
        (_, SqlValue::Integer(_) | SqlValue::Real(_)) => Some(Ordering::Greater),
        (SqlValue::Text(_), SqlValue::Blob(_)) => Some(Ordering::Less),
        (SqlValue::Blob(_), SqlValue::Text(_)) => Some(Ordering::Greater),
    }
}

/// Translates a `LIKE` pattern into an anchored regex over ASCII-lowercased text.
fn like_regex(pattern: &str) -> RepoResult<Regex> {
    let mut source = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            LIKE_ESCAPE => {
                if let Some(literal) = chars.next() {
                    source.push_str(&regex::escape(&literal.to_ascii_lowercase().to_string()));
                }
            }
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_ascii_lowercase().to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|err| RepoError::InvalidCriteria(format!("bad LIKE pattern `{pattern}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{compare_storage, escape_like, like_regex, Criteria};
    use rusqlite::types::Value as SqlValue;
    use std::cmp::Ordering;

    #[test]
    fn and_flattens_and_drops_all() {
        let a = Criteria::field("a").eq(1);
        let b = Criteria::field("b").eq(2);
        let c = Criteria::field("c").eq(3);
        let combined = Criteria::all().and(a.clone()).and(b.clone()).and(c.clone());
        assert_eq!(combined, Criteria::And { all: vec![a, b, c] });
    }

    #[test]
    fn double_negation_cancels() {
        let a = Criteria::field("a").is_null();
        assert_eq!(!!a.clone(), a);
    }

    #[test]
    fn like_translation_honors_wildcards_and_escape() {
        let regex = like_regex("ac_e%").unwrap();
        assert!(regex.is_match("acme corp"));
        assert!(!regex.is_match("ace"));

        let literal = like_regex(&format!("{}%", escape_like("50%_off"))).unwrap();
        assert!(literal.is_match("50%_off today"));
        assert!(!literal.is_match("50x_off today"));
    }

    #[test]
    fn null_compares_as_unknown() {
        assert_eq!(compare_storage(&SqlValue::Null, &SqlValue::Integer(1)), None);
        assert_eq!(
            compare_storage(&SqlValue::Integer(1), &SqlValue::Text("1".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn criteria_round_trips_through_json() {
        let criteria = Criteria::field("status")
            .eq("open")
            .or(!Criteria::field("total").is_null());
        let json = serde_json::to_string(&criteria).unwrap();
        let back: Criteria = serde_json::from_str(&json).unwrap();
        assert_eq!(back, criteria);
    }
}
