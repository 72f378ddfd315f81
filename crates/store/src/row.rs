//! Decoding `AnyRow`s into records, guided by the declared field types.

use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{Any, Decode, Row, Type};

use repository::{Field, FieldType, Record, StoreError, TableSpec};

/// One record per row, holding every declared column.
pub(crate) fn decode_rows(table: &TableSpec, rows: &[AnyRow]) -> Result<Vec<Record>, StoreError> {
    rows.iter().map(|row| decode_row(table, row)).collect()
}

pub(crate) fn decode_row(table: &TableSpec, row: &AnyRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for field in table.fields {
        let value = decode_field(row, field).map_err(|err| StoreError::Decode {
            table: table.table.to_string(),
            message: format!("column '{}': {err}", field.name),
        })?;
        record.insert(field.name.to_string(), value);
    }
    Ok(record)
}

fn get<T>(row: &AnyRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: for<'r> Decode<'r, Any> + Type<Any>,
{
    row.try_get::<Option<T>, _>(column)
}

fn decode_field(row: &AnyRow, field: &Field) -> Result<Value, sqlx::Error> {
    let column = field.name;
    let value = match field.ty {
        FieldType::Integer => get::<i64>(row, column)
            .or_else(|_| get::<i32>(row, column).map(|v| v.map(i64::from)))?
            .map(Value::from),
        FieldType::Number => get::<f64>(row, column)
            .or_else(|_| get::<i64>(row, column).map(|v| v.map(|i| i as f64)))?
            .map(Value::from),
        // SQLite has no boolean storage class; 0/1 integers come back instead.
        FieldType::Boolean => get::<bool>(row, column)
            .or_else(|_| get::<i64>(row, column).map(|v| v.map(|i| i != 0)))?
            .map(Value::from),
        FieldType::String | FieldType::Uuid | FieldType::DateTime => {
            get::<String>(row, column)?.map(Value::from)
        }
        FieldType::Object | FieldType::Array => match get::<String>(row, column)? {
            Some(text) => Some(serde_json::from_str(&text).map_err(|e| sqlx::Error::Decode(Box::new(e)))?),
            None => None,
        },
        FieldType::Any => decode_untyped(row, column)?,
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_untyped(row: &AnyRow, column: &str) -> Result<Option<Value>, sqlx::Error> {
    if let Ok(v) = get::<i64>(row, column) {
        return Ok(v.map(Value::from));
    }
    if let Ok(v) = get::<f64>(row, column) {
        return Ok(v.map(Value::from));
    }
    if let Ok(v) = get::<bool>(row, column) {
        return Ok(v.map(Value::from));
    }
    Ok(get::<String>(row, column)?.map(Value::from))
}
