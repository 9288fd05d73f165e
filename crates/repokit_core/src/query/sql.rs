//! Compilation of resolved criteria into SQLite `WHERE` clauses.
//!
//! # Invariants
//! - Literals are always bound as parameters, never inlined.
//! - Bound values use the same storage encoding as entity writes.

use crate::db::schema::quote_ident;
use crate::model::EntityModel;
use crate::query::criteria::{Criteria, LIKE_ESCAPE};
use crate::repo::{RepoError, RepoResult};
use crate::session::codec;
use rusqlite::types::Value as SqlValue;

/// A `WHERE` clause body and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

/// Compiles a criteria already resolved against `entity`.
pub fn compile(criteria: &Criteria, entity: &EntityModel) -> RepoResult<SqlFilter> {
    let mut params = Vec::new();
    let clause = compile_into(criteria, entity, &mut params)?;
    Ok(SqlFilter { clause, params })
}

fn compile_into(criteria: &Criteria, entity: &EntityModel, params: &mut Vec<SqlValue>) -> RepoResult<String> {
    let sql = match criteria {
        Criteria::All => "1".to_string(),
        Criteria::Compare { field, cmp, value } => {
            let column = column(entity, field)?;
            params.push(codec::to_storage(value, column)?);
            format!("{} {} ?", quote_ident(column.name), cmp.sql())
        }
        Criteria::IsNull { field } => {
            let column = column(entity, field)?;
            format!("{} IS NULL", quote_ident(column.name))
        }
        Criteria::In { field, values } => {
            let column = column(entity, field)?;
            if values.is_empty() {
                return Ok("0".to_string());
            }
            for value in values {
                params.push(codec::to_storage(value, column)?);
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({placeholders})", quote_ident(column.name))
        }
        Criteria::Like { field, pattern } => {
            let column = column(entity, field)?;
            params.push(SqlValue::Text(pattern.clone()));
            format!("{} LIKE ? ESCAPE '{LIKE_ESCAPE}'", quote_ident(column.name))
        }
        Criteria::And { all } => join(all, " AND ", "1", entity, params)?,
        Criteria::Or { any } => join(any, " OR ", "0", entity, params)?,
        Criteria::Not { criteria } => {
            format!("NOT ({})", compile_into(criteria, entity, params)?)
        }
    };
    Ok(sql)
}

fn join(
    parts: &[Criteria],
    separator: &str,
    empty: &str,
    entity: &EntityModel,
    params: &mut Vec<SqlValue>,
) -> RepoResult<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let compiled = parts
        .iter()
        .map(|part| compile_into(part, entity, params).map(|sql| format!("({sql})")))
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(compiled.join(separator))
}

fn column<'m>(entity: &'m EntityModel, field: &str) -> RepoResult<&'m crate::model::ColumnModel> {
    entity.column(field).ok_or_else(|| RepoError::UnknownField {
        entity: entity.type_name,
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::model::Model;
    use crate::query::criteria::Criteria;
    use rusqlite::types::Value as SqlValue;
    use rust_decimal::Decimal;

    #[derive(Debug, Clone, Default)]
    struct Invoice {
        number: i64,
        amount: Decimal,
        memo: Option<String>,
    }

    crate::entity! {
        Invoice in "invoices" {
            key: number,
            fields: { number: i64, amount: Decimal, memo: Option<String> },
        }
    }

    fn model() -> Model {
        Model::builder().entity::<Invoice>().build().unwrap()
    }

    #[test]
    fn compiles_nested_criteria_with_bound_params() {
        let model = model();
        let entity = model.entity_of::<Invoice>().unwrap();
        let criteria = Criteria::field("amount")
            .ge(Decimal::new(105, 1))
            .and(Criteria::field("memo").is_null().or(Criteria::field("memo").starts_with("a_b")))
            .resolve(entity)
            .unwrap();

        let filter = compile(&criteria, entity).unwrap();
        assert_eq!(
            filter.clause,
            r#"("amount" >= ?) AND (("memo" IS NULL) OR ("memo" LIKE ? ESCAPE '\'))"#
        );
        assert_eq!(
            filter.params,
            vec![SqlValue::Real(10.5), SqlValue::Text("a\\_b%".to_string())]
        );
    }

    #[test]
    fn empty_in_list_selects_nothing() {
        let model = model();
        let entity = model.entity_of::<Invoice>().unwrap();
        let criteria = Criteria::field("number")
            .one_of(Vec::<i64>::new())
            .resolve(entity)
            .unwrap();
        let filter = compile(&criteria, entity).unwrap();
        assert_eq!(filter.clause, "0");
        assert!(filter.params.is_empty());
    }

    #[test]
    fn negation_wraps_inner_clause() {
        let model = model();
        let entity = model.entity_of::<Invoice>().unwrap();
        let criteria = (!Criteria::field("number").one_of([1, 2]))
            .resolve(entity)
            .unwrap();
        let filter = compile(&criteria, entity).unwrap();
        assert_eq!(filter.clause, r#"NOT ("number" IN (?, ?))"#);
        assert_eq!(filter.params, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);
    }
}
