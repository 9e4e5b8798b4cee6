//! Runtime description of an entity type.
//!
//! Backends never see concrete entity structs: they work on [`Record`]s and use
//! the [`EntitySchema`] to know which attributes a type has and how each one is
//! stored.

use core::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::id::EntityId;

/// Attribute map of one entity.
pub type Record = serde_json::Map<String, Value>;

/// Name of the identity attribute every entity carries.
pub const ID_FIELD: &str = "id";

/// Storage shape of an attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    /// Either an integer or a string id.
    Identifier,
    /// Arbitrary structured value, stored as JSON text by relational backends.
    Json,
    /// A nested entity.
    Entity,
    /// A list of nested entities.
    EntityList,
}

impl FieldKind {
    /// Whether the attribute holds other entities.
    pub fn is_relation(self) -> bool {
        matches!(self, FieldKind::Entity | FieldKind::EntityList)
    }
}

/// Compile-time mapping from a Rust type to its [`FieldKind`].
pub trait FieldType {
    const KIND: FieldKind;
    const NULLABLE: bool = false;
}

macro_rules! impl_field_type {
    ($kind:expr => $($t:ty),*) => {
        $(
            impl FieldType for $t {
                const KIND: FieldKind = $kind;
            }
        )*
    };
}

impl_field_type!(FieldKind::Integer => i8, i16, i32, i64, u8, u16, u32, u64, usize);
impl_field_type!(FieldKind::Float => f32, f64);
impl_field_type!(FieldKind::Text => String, char);
impl_field_type!(FieldKind::Boolean => bool);
impl_field_type!(FieldKind::Timestamp => DateTime<Utc>, NaiveDateTime, NaiveDate);
impl_field_type!(FieldKind::Identifier => EntityId);
impl_field_type!(FieldKind::Json => Value);

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;
}

impl<T: FieldType> FieldType for Vec<T> {
    const KIND: FieldKind = match T::KIND {
        FieldKind::Entity => FieldKind::EntityList,
        _ => FieldKind::Json,
    };
}

impl<T: FieldType> FieldType for BTreeMap<String, T> {
    const KIND: FieldKind = FieldKind::Json;
}

impl<T: FieldType> FieldType for HashMap<String, T> {
    const KIND: FieldKind = FieldKind::Json;
}

/// One declared attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name,
            kind,
            nullable,
        }
    }

    /// Describe an attribute of Rust type `T`.
    pub const fn of<T: FieldType>(name: &'static str) -> Self {
        Self::new(name, T::KIND, T::NULLABLE)
    }
}

/// Schema of an entity type.
///
/// Two schemas are equal when they describe the same type, which is decided by
/// the class name.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    type_name: &'static str,
    class_name: String,
    fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Build a schema. The identity field must be declared.
    pub fn new(type_name: &'static str, fields: Vec<FieldDef>) -> Self {
        Self {
            type_name,
            class_name: type_name.to_lowercase(),
            fields,
        }
    }

    /// Name of the Rust type, used in messages.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Lowercase type name; doubles as the table name and discriminator.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn id_field(&self) -> Option<&FieldDef> {
        self.field(ID_FIELD)
    }

    /// Every declared attribute name mapped to null.
    pub fn attributes(&self) -> Record {
        self.fields
            .iter()
            .map(|field| (field.name.to_owned(), Value::Null))
            .collect()
    }

    /// Extract the identity of a record of this type.
    pub fn id_of(&self, record: &Record) -> ModelResult<EntityId> {
        let value = record.get(ID_FIELD).ok_or_else(|| {
            ModelError::invalid_record(self.type_name, "missing the id attribute")
        })?;

        EntityId::from_value(value).ok_or_else(|| {
            ModelError::invalid_record(self.type_name, format!("{value} is not a valid id"))
        })
    }

    /// Fill attributes missing from a record with their empty values.
    ///
    /// Lists of entities default to `[]`; every other nullable or nested
    /// attribute defaults to null.
    pub fn fill_defaults(&self, record: &mut Record) {
        for field in &self.fields {
            if record.contains_key(field.name) {
                continue;
            }
            let value = match field.kind {
                FieldKind::EntityList => Value::Array(Vec::new()),
                FieldKind::Entity => Value::Null,
                _ if field.nullable => Value::Null,
                _ => continue,
            };
            record.insert(field.name.to_owned(), value);
        }
    }

    /// Sort records of this type by id.
    ///
    /// Fails when the records mix integer and string ids.
    pub fn sort_records(&self, records: &mut Vec<Record>) -> ModelResult<()> {
        let ids = records
            .iter()
            .map(|record| self.id_of(record))
            .collect::<ModelResult<Vec<_>>>()?;

        if let Some(first) = ids.first() {
            for id in &ids[1..] {
                first.try_cmp(id)?;
            }
        }

        let mut keyed: Vec<(EntityId, Record)> = ids.into_iter().zip(records.drain(..)).collect();
        keyed.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        records.extend(keyed.into_iter().map(|(_, record)| record));
        Ok(())
    }
}

impl PartialEq for EntitySchema {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
    }
}

impl Eq for EntitySchema {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book_schema() -> EntitySchema {
        EntitySchema::new(
            "Book",
            vec![
                FieldDef::of::<i64>("id"),
                FieldDef::of::<String>("title"),
                FieldDef::of::<Option<String>>("summary"),
                FieldDef::of::<Vec<String>>("tags"),
            ],
        )
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn class_name_is_lowercase_type_name() {
        let schema = book_schema();
        assert_eq!(schema.type_name(), "Book");
        assert_eq!(schema.class_name(), "book");
    }

    #[test]
    fn field_kinds_follow_rust_types() {
        let schema = book_schema();
        assert_eq!(schema.field("id").unwrap().kind, FieldKind::Integer);
        assert!(schema.field("summary").unwrap().nullable);
        assert_eq!(schema.field("tags").unwrap().kind, FieldKind::Json);
        assert!(!schema.has_field("author"));
    }

    #[test]
    fn attributes_lists_every_field() {
        let attributes = book_schema().attributes();
        let names: Vec<&str> = attributes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["id", "summary", "tags", "title"]);
        assert!(attributes.values().all(Value::is_null));
    }

    #[test]
    fn id_of_rejects_missing_or_invalid_ids() {
        let schema = book_schema();
        assert_eq!(
            schema.id_of(&record(json!({"id": 3}))).unwrap(),
            EntityId::Int(3)
        );
        assert!(schema.id_of(&record(json!({"title": "x"}))).is_err());
        assert!(schema.id_of(&record(json!({"id": [1]}))).is_err());
    }

    #[test]
    fn fill_defaults_only_touches_nullable_fields() {
        let schema = book_schema();
        let mut partial = record(json!({"id": 1, "title": "Dune"}));
        schema.fill_defaults(&mut partial);
        assert_eq!(partial.get("summary"), Some(&Value::Null));
        assert!(!partial.contains_key("tags"));
    }

    #[test]
    fn sort_records_orders_by_id() {
        let schema = book_schema();
        let mut records = vec![
            record(json!({"id": 3})),
            record(json!({"id": 1})),
            record(json!({"id": 2})),
        ];
        schema.sort_records(&mut records).unwrap();
        let ids: Vec<i64> = records
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn sort_records_rejects_mixed_ids() {
        let schema = book_schema();
        let mut records = vec![record(json!({"id": 3})), record(json!({"id": "a"}))];
        assert!(matches!(
            schema.sort_records(&mut records),
            Err(ModelError::IncompatibleIds { .. })
        ));
    }
}
