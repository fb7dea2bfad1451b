//! Conversions between JSON values and dynamically typed SQLite rows.
//!
//! Synced tables are only known at runtime, so rows travel as
//! `serde_json::Value`s instead of `FromRow` structs.

use base64::Engine as _;
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A parameter for a façade query.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    /// Bound as its decimal string.
    BigInt(i128),
    Real(f64),
    Text(String),
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<i128> for Param {
    fn from(v: i128) -> Self {
        Param::BigInt(v)
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(Param::Int)
            .unwrap_or(Param::BigInt(v.into()))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Real(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Param::Null)
    }
}

impl Param {
    /// Parse a CLI argument: integers, then reals, then `null`, else text.
    pub fn parse_arg(arg: &str) -> Self {
        if let Ok(i) = arg.parse::<i64>() {
            return Param::Int(i);
        }
        if let Ok(i) = arg.parse::<i128>() {
            return Param::BigInt(i);
        }
        if let Ok(f) = arg.parse::<f64>() {
            return Param::Real(f);
        }
        if arg == "null" {
            return Param::Null;
        }
        Param::Text(arg.to_string())
    }
}

pub fn bind_param<'q>(query: SqliteQuery<'q>, param: &Param) -> SqliteQuery<'q> {
    match param {
        Param::Null => query.bind(None::<String>),
        Param::Bool(b) => query.bind(*b),
        Param::Int(i) => query.bind(*i),
        Param::BigInt(i) => query.bind(i.to_string()),
        Param::Real(f) => query.bind(*f),
        Param::Text(s) => query.bind(s.clone()),
    }
}

/// Bind a JSON value. Arrays and objects are stored as JSON text.
pub fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// All column values of a row, in column order.
pub fn row_to_values(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.columns().len())
        .map(|index| column_value(row, index))
        .collect()
}

/// A row as a map of column name to value.
pub fn row_to_map(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, index)?);
    }
    Ok(map)
}
