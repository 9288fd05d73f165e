//! Schema bootstrap and verification driven by the built model.
//!
//! # Responsibility
//! - Create missing tables for every mapped entity.
//! - Verify that a live store has every mapped table and column, and that
//!   decimal columns carry the model's declared `DECIMAL(p, s)` type.
//!
//! # Invariants
//! - `create_schema` is idempotent (`CREATE TABLE IF NOT EXISTS`).
//! - Schema creation runs in one transaction.

use super::{DbError, DbResult};
use crate::model::{ColumnType, EntityModel, Model};
use log::info;
use rusqlite::Connection;

/// Quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Creates tables for every entity in `model` that does not exist yet.
pub fn create_schema(conn: &mut Connection, model: &Model) -> DbResult<()> {
    let tx = conn.transaction()?;
    for entity in model.entities() {
        tx.execute_batch(&create_table_sql(entity))?;
    }
    tx.commit()?;

    info!(
        "event=schema_create module=db status=ok entities={}",
        model.entities().count()
    );
    Ok(())
}

/// Checks that the live store matches `model`.
pub fn verify_schema(conn: &Connection, model: &Model) -> DbResult<()> {
    for entity in model.entities() {
        let columns = table_columns(conn, entity.table)?;
        if columns.is_empty() {
            return Err(DbError::MissingRequiredTable(entity.table.to_string()));
        }

        for column in &entity.columns {
            let declared = columns
                .iter()
                .find(|(name, _)| name == column.name)
                .map(|(_, declared)| declared)
                .ok_or_else(|| DbError::MissingRequiredColumn {
                    table: entity.table.to_string(),
                    column: column.name.to_string(),
                })?;

            if let ColumnType::Decimal { .. } = column.column_type {
                let expected = column.column_type.sql_type();
                if normalize_declared_type(declared) != normalize_declared_type(&expected) {
                    return Err(DbError::ColumnTypeMismatch {
                        table: entity.table.to_string(),
                        column: column.name.to_string(),
                        expected,
                        found: declared.clone(),
                    });
                }
            }
        }
    }

    info!(
        "event=schema_verify module=db status=ok entities={}",
        model.entities().count()
    );
    Ok(())
}

/// DDL for one mapped entity.
///
/// `DECIMAL(p, s)` columns get NUMERIC affinity and hold plain numbers:
/// INTEGER when whole, REAL otherwise. Raw SQL may write either form.
pub fn create_table_sql(entity: &EntityModel) -> String {
    let mut definitions: Vec<String> = entity
        .columns
        .iter()
        .map(|column| {
            let null_clause = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "{} {}{}",
                quote_ident(column.name),
                column.column_type.sql_type(),
                null_clause
            )
        })
        .collect();
    definitions.push(format!(
        "PRIMARY KEY ({})",
        quote_ident(entity.key_column().name)
    ));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_ident(entity.table),
        definitions.join(",\n    ")
    )
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let declared: String = row.get(2)?;
        columns.push((name, declared));
    }
    Ok(columns)
}

fn normalize_declared_type(declared: &str) -> String {
    declared
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::{normalize_declared_type, quote_ident};

    #[test]
    fn declared_types_compare_without_whitespace_or_case() {
        assert_eq!(
            normalize_declared_type("decimal(17,3)"),
            normalize_declared_type("DECIMAL(17, 3)")
        );
        assert_ne!(
            normalize_declared_type("DECIMAL(18, 2)"),
            normalize_declared_type("DECIMAL(17, 3)")
        );
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
