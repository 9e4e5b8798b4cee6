//! Dynamically typed SQL values and row decoding.

use repograph_core::{EntityId, FieldKind};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::RepositoryResult;

/// A value bound to a statement parameter.
///
/// Booleans bind as integers and structured values as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(int) => SqlValue::Integer(int),
                None => number.as_f64().map_or(SqlValue::Null, SqlValue::Real),
            },
            Value::String(text) => SqlValue::Text(text.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        }
    }
}

impl From<&EntityId> for SqlValue {
    fn from(id: &EntityId) -> Self {
        match id {
            EntityId::Int(value) => SqlValue::Integer(*value),
            EntityId::Text(text) => SqlValue::Text(text.clone()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(text: &str) -> Self {
        SqlValue::Text(text.to_owned())
    }
}

impl sqlx::Type<sqlx::Sqlite> for SqlValue {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(_ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        true
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        match self {
            SqlValue::Null => Ok(sqlx::encode::IsNull::Yes),
            SqlValue::Integer(value) => <i64 as sqlx::Encode<'q, sqlx::Sqlite>>::encode_by_ref(value, buf),
            SqlValue::Real(value) => <f64 as sqlx::Encode<'q, sqlx::Sqlite>>::encode_by_ref(value, buf),
            SqlValue::Text(value) => <String as sqlx::Encode<'q, sqlx::Sqlite>>::encode_by_ref(value, buf),
        }
    }
}

/// A fetched row as `(column label, value)` pairs in select order.
pub type RowValues = Vec<(String, Value)>;

/// Decode every column of `row` by its storage class.
pub fn decode_row(row: &SqliteRow) -> RepositoryResult<RowValues> {
    let mut values = Vec::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(idx)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    Value::from(row.try_get_unchecked::<f64, _>(idx)?)
                }
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                    Value::from(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::from(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        values.push((column.name().to_owned(), value));
    }

    Ok(values)
}

/// Convert a stored value back to the shape its attribute kind expects.
pub fn coerce(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::Boolean, Value::Number(number)) => Value::Bool(number.as_i64().unwrap_or(0) != 0),
        (FieldKind::Float, Value::Number(number)) => {
            number.as_f64().map_or(Value::Number(number), Value::from)
        }
        (FieldKind::Json | FieldKind::Entity | FieldKind::EntityList, Value::String(text)) => {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        (_, value) => value,
    }
}
