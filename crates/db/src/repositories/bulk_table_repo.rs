//! Generic JSON row writes for caller-owned tables.
//!
//! Rows arrive as JSON objects and are expanded server-side with
//! `jsonb_populate_recordset`. Inserts and updates run one statement per
//! distinct key set, so a key missing from a row is never written as NULL.
//! Table and column names are validated identifiers; values are always bound.

use std::collections::BTreeSet;

use sqlx::PgConnection;
use verso_core::bulk::BulkOperationKind;
use verso_core::transaction::{quote_identifier, validate_identifier};

use crate::store::StoreError;

pub struct BulkTableRepo;

impl BulkTableRepo {
    /// Write a batch of rows. Updates and deletes match on `id`.
    pub async fn write(
        conn: &mut PgConnection,
        table: &str,
        kind: BulkOperationKind,
        rows: &[serde_json::Value],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = checked(table)?;

        let groups = match kind {
            BulkOperationKind::Delete => {
                if rows.iter().any(|row| !row.is_object()) {
                    return Err(StoreError::InvalidRow("bulk rows must be JSON objects".into()));
                }
                vec![(vec![quote_identifier("id")], rows.to_vec())]
            }
            BulkOperationKind::Insert | BulkOperationKind::Update => group_by_columns(rows)?,
        };

        let mut affected = 0;
        for (columns, group) in groups {
            let query = statement(&table, kind, &columns)?;
            let payload = serde_json::Value::Array(group);
            let result = sqlx::query(&query).bind(payload).execute(&mut *conn).await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    /// Count rows whose `column` equals the JSON `value`.
    pub async fn count_matching(
        conn: &mut PgConnection,
        table: &str,
        column: &str,
        value: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let table = checked(table)?;
        let column = checked(column)?;
        let query = format!("SELECT COUNT(*) FROM {table} WHERE to_jsonb({column}) = $1");
        let row: (i64,) = sqlx::query_as(&query).bind(value).fetch_one(conn).await?;
        Ok(row.0)
    }
}

fn checked(name: &str) -> Result<String, StoreError> {
    validate_identifier("identifier", name).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
    Ok(quote_identifier(name))
}

/// SQL for one group of rows sharing the quoted `columns`.
fn statement(table: &str, kind: BulkOperationKind, columns: &[String]) -> Result<String, StoreError> {
    let query = match kind {
        BulkOperationKind::Insert => {
            let cols = columns.join(", ");
            format!(
                "INSERT INTO {table} ({cols}) \
                 SELECT {cols} FROM jsonb_populate_recordset(NULL::{table}, $1)"
            )
        }
        BulkOperationKind::Update => {
            let assignments: Vec<String> = columns
                .iter()
                .filter(|c| c.as_str() != "\"id\"")
                .map(|c| format!("{c} = src.{c}"))
                .collect();
            if assignments.is_empty() {
                return Err(StoreError::InvalidRow(
                    "update rows need at least one column besides id".into(),
                ));
            }
            format!(
                "UPDATE {table} AS target SET {} \
                 FROM jsonb_populate_recordset(NULL::{table}, $1) AS src \
                 WHERE target.id = src.id",
                assignments.join(", ")
            )
        }
        BulkOperationKind::Delete => format!(
            "DELETE FROM {table} \
             WHERE id IN (SELECT id FROM jsonb_populate_recordset(NULL::{table}, $1))"
        ),
    };
    Ok(query)
}

/// Split rows into groups with identical key sets, in first-seen order.
/// Each group carries its quoted, sorted column list.
fn group_by_columns(
    rows: &[serde_json::Value],
) -> Result<Vec<(Vec<String>, Vec<serde_json::Value>)>, StoreError> {
    let mut groups: Vec<(Vec<String>, Vec<serde_json::Value>)> = Vec::new();
    for row in rows {
        let object = row
            .as_object()
            .ok_or_else(|| StoreError::InvalidRow("bulk rows must be JSON objects".into()))?;
        let columns = object
            .keys()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(checked)
            .collect::<Result<Vec<_>, _>>()?;
        match groups.iter_mut().find(|(existing, _)| *existing == columns) {
            Some((_, group)) => group.push(row.clone()),
            None => groups.push((columns, vec![row.clone()])),
        }
    }
    Ok(groups)
}
