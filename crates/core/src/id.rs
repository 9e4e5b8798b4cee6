//! Entity identifiers.
//!
//! Entities are identified either by an integer or by a string. The two kinds
//! never compare against each other: ordering a mix of them is an error rather
//! than an arbitrary choice.

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// Identifier of an entity within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    /// Human readable name of the identifier kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityId::Int(_) => "integer",
            EntityId::Text(_) => "string",
        }
    }

    /// Compare two identifiers, failing when their kinds differ.
    pub fn try_cmp(&self, other: &Self) -> ModelResult<Ordering> {
        match (self, other) {
            (EntityId::Int(a), EntityId::Int(b)) => Ok(a.cmp(b)),
            (EntityId::Text(a), EntityId::Text(b)) => Ok(a.cmp(b)),
            _ => Err(ModelError::IncompatibleIds {
                left: self.to_string(),
                left_kind: self.kind(),
                right: other.to_string(),
                right_kind: other.kind(),
            }),
        }
    }

    /// Negative integer ids mark entities whose id the repository must assign.
    pub fn is_unassigned(&self) -> bool {
        matches!(self, EntityId::Int(value) if *value < 0)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntityId::Int(value) => Some(*value),
            EntityId::Text(_) => None,
        }
    }

    /// Read an identifier out of a record value.
    ///
    /// Only integral numbers and strings are identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(EntityId::Int),
            Value::String(text) => Some(EntityId::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Int(value) => Value::from(*value),
            EntityId::Text(text) => Value::from(text.as_str()),
        }
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.try_cmp(other).ok()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(value) => fmt::Display::fmt(value, f),
            EntityId::Text(text) => fmt::Display::fmt(text, f),
        }
    }
}

macro_rules! impl_int_id {
    ($($t:ty),*) => {
        $(
            impl From<$t> for EntityId {
                fn from(value: $t) -> Self {
                    EntityId::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_int_id!(i8, i16, i32, i64, u8, u16, u32);

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Text(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_owned())
    }
}

impl From<&String> for EntityId {
    fn from(value: &String) -> Self {
        EntityId::Text(value.clone())
    }
}
