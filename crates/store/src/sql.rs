//! SQL statement builders.
//!
//! Turns a [`TableSpec`] plus a [`Filter`] into dialect-specific SQL with
//! positional placeholders. Identifiers are validated, checked against the
//! table's declared columns and double-quoted. `null` values are never bound;
//! they are written inline as `NULL` / `IS NULL`.
//!
//! ```ignore
//! let stmt = build_select(Dialect::Postgres, &table, &filter, None)?;
//! // SELECT "id", "name" FROM "models" WHERE "name" = $1
//! ```

use serde_json::Value;

use repository::{Condition, Filter, Record, StoreError, TableSpec};

use crate::config::Dialect;

/// A bindable, non-null parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Param {
    /// `None` for `null`; objects and arrays bind as their JSON text.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            }),
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }
}

/// SQL text and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Placeholder allocation for one statement.
struct Binder {
    dialect: Dialect,
    params: Vec<Param>,
}

impl Binder {
    fn new(dialect: Dialect) -> Self {
        Self { dialect, params: Vec::new() }
    }

    /// Placeholder for `value`, or `NULL` for a null value.
    fn bind(&mut self, value: &Value) -> String {
        match Param::from_value(value) {
            None => "NULL".to_string(),
            Some(param) => {
                self.params.push(param);
                match self.dialect {
                    Dialect::Postgres => format!("${}", self.params.len()),
                    Dialect::Sqlite => "?".to_string(),
                }
            }
        }
    }

    fn finish(self, sql: String) -> Statement {
        Statement { sql, params: self.params }
    }
}

/// `SELECT <declared columns> FROM <table> [WHERE …] [LIMIT n]`.
pub fn build_select(
    dialect: Dialect,
    table: &TableSpec,
    filter: &Filter,
    limit: Option<u64>,
) -> Result<Statement, StoreError> {
    let mut binder = Binder::new(dialect);
    let mut sql = format!("SELECT {} FROM {}", column_list(table)?, table_name(table)?);
    append_where(&mut sql, &mut binder, table, filter)?;
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(binder.finish(sql))
}

/// `INSERT INTO <table> (…) VALUES (…) RETURNING <declared columns>`.
pub fn build_insert(dialect: Dialect, table: &TableSpec, record: &Record) -> Result<Statement, StoreError> {
    let mut binder = Binder::new(dialect);
    let name = table_name(table)?;
    let returning = column_list(table)?;

    let sql = if record.is_empty() {
        format!("INSERT INTO {name} DEFAULT VALUES RETURNING {returning}")
    } else {
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (column, value) in record {
            columns.push(column_name(table, column)?);
            values.push(binder.bind(value));
        }
        format!(
            "INSERT INTO {name} ({}) VALUES ({}) RETURNING {returning}",
            columns.join(", "),
            values.join(", ")
        )
    };
    Ok(binder.finish(sql))
}

/// `UPDATE <table> SET … [WHERE …]`.
pub fn build_update(
    dialect: Dialect,
    table: &TableSpec,
    values: &Record,
    filter: &Filter,
) -> Result<Statement, StoreError> {
    if values.is_empty() {
        return Err(StoreError::InvalidIdentifier { kind: "column list", ident: String::new() });
    }
    let mut binder = Binder::new(dialect);
    let mut assignments = Vec::with_capacity(values.len());
    for (column, value) in values {
        assignments.push(format!("{} = {}", column_name(table, column)?, binder.bind(value)));
    }
    let mut sql = format!("UPDATE {} SET {}", table_name(table)?, assignments.join(", "));
    append_where(&mut sql, &mut binder, table, filter)?;
    Ok(binder.finish(sql))
}

/// `DELETE FROM <table> [WHERE …]`.
pub fn build_delete(dialect: Dialect, table: &TableSpec, filter: &Filter) -> Result<Statement, StoreError> {
    let mut binder = Binder::new(dialect);
    let mut sql = format!("DELETE FROM {}", table_name(table)?);
    append_where(&mut sql, &mut binder, table, filter)?;
    Ok(binder.finish(sql))
}

fn append_where(
    sql: &mut String,
    binder: &mut Binder,
    table: &TableSpec,
    filter: &Filter,
) -> Result<(), StoreError> {
    if filter.is_empty() {
        return Ok(());
    }
    sql.push_str(" WHERE ");
    sql.push_str(&conjunction(binder, table, filter.conditions())?);
    Ok(())
}

fn conjunction(binder: &mut Binder, table: &TableSpec, conditions: &[Condition]) -> Result<String, StoreError> {
    let mut clauses = Vec::with_capacity(conditions.len());
    for condition in conditions {
        clauses.push(render(binder, table, condition)?);
    }
    Ok(clauses.join(" AND "))
}

fn render(binder: &mut Binder, table: &TableSpec, condition: &Condition) -> Result<String, StoreError> {
    match condition {
        Condition::Eq(column, value) => {
            let column = column_name(table, column)?;
            if value.is_null() {
                Ok(format!("{column} IS NULL"))
            } else {
                Ok(format!("{column} = {}", binder.bind(value)))
            }
        }
        Condition::In(column, values) => {
            let column = column_name(table, column)?;
            let (nulls, values): (Vec<&Value>, Vec<&Value>) = values.iter().partition(|v| v.is_null());
            let membership = if values.is_empty() {
                "1 = 0".to_string()
            } else {
                let placeholders: Vec<String> = values.into_iter().map(|v| binder.bind(v)).collect();
                format!("{column} IN ({})", placeholders.join(", "))
            };
            if nulls.is_empty() {
                Ok(membership)
            } else {
                Ok(format!("({membership} OR {column} IS NULL)"))
            }
        }
        Condition::Not(inner) if inner.is_empty() => Ok("1 = 0".to_string()),
        // Unknown (a NULL comparison) counts as no match, so the row is kept.
        Condition::Not(inner) => Ok(format!("NOT COALESCE(({}), FALSE)", conjunction(binder, table, inner)?)),
    }
}

fn table_name(table: &TableSpec) -> Result<String, StoreError> {
    identifier(table.table, "table")
}

fn column_name(table: &TableSpec, column: &str) -> Result<String, StoreError> {
    if !table.columns().any(|c| c == column) {
        return Err(StoreError::InvalidIdentifier { kind: "column", ident: column.to_string() });
    }
    identifier(column, "column")
}

fn column_list(table: &TableSpec) -> Result<String, StoreError> {
    let columns = table
        .columns()
        .map(|c| identifier(c, "column"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns.join(", "))
}

fn identifier(ident: &str, kind: &'static str) -> Result<String, StoreError> {
    if is_valid_identifier(ident) {
        Ok(format!("\"{ident}\""))
    } else {
        Err(StoreError::InvalidIdentifier { kind, ident: ident.to_string() })
    }
}

fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
