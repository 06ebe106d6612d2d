//! Conversion between Meridian's `Value` scalar type and rusqlite's
//! wire representation.

use meridian_core::{Error, Result, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;

/// Convert bound parameters into rusqlite's dynamic `Value` so
/// `params_from_iter` can bind them without per-type dispatch.
pub fn to_sql_params(params: &[Value]) -> Vec<SqlValue> {
    params.iter().map(to_sql_value).collect()
}

fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// Read column `idx` out of `row` as a `Value`, regardless of its
/// underlying SQLite storage class.
pub fn from_sql_value(row: &Row<'_>, idx: usize) -> Result<Value> {
    let raw: SqlValue = row
        .get(idx)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(match raw {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Int(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Blob(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_maps_to_integer() {
        match to_sql_value(&Value::Bool(true)) {
            SqlValue::Integer(1) => {}
            other => panic!("expected Integer(1), got {other:?}"),
        }
    }
}
