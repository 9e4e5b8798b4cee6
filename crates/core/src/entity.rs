//! Entities: identifiable records with a declared schema.
//!
//! Entity identity is the id alone. Two values of the same entity type with the
//! same id are the same entity, whatever their other attributes say. The
//! [`entity!`](crate::entity!) macro derives that behaviour together with the
//! schema, so user types normally never implement [`Entity`] by hand.

use core::cmp::Ordering;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::id::EntityId;
use crate::schema::{EntitySchema, Record};

/// An identifiable model type that repositories can store.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    /// Declared attributes of the type.
    fn schema() -> &'static EntitySchema;

    /// Identity of this entity.
    fn id(&self) -> EntityId;

    /// Lowercase type name.
    fn class_name() -> &'static str {
        Self::schema().class_name()
    }

    /// Attribute map of this entity, nested entities included.
    fn to_record(&self) -> ModelResult<Record> {
        match serde_json::to_value(self) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(other) => Err(ModelError::invalid_record(
                Self::schema().type_name(),
                format!("serialized to {other} instead of an attribute map"),
            )),
            Err(e) => Err(ModelError::invalid_record(
                Self::schema().type_name(),
                e.to_string(),
            )),
        }
    }

    /// Rebuild an entity from its attribute map.
    fn from_record(record: Record) -> ModelResult<Self> {
        serde_json::from_value(Value::Object(record))
            .map_err(|e| ModelError::invalid_record(Self::schema().type_name(), e.to_string()))
    }

    /// Order two entities by id.
    fn compare(&self, other: &Self) -> ModelResult<Ordering> {
        self.id().try_cmp(&other.id())
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// Sort entities by id, failing on mixed id kinds.
pub fn sort_by_id<E: Entity>(entities: &mut [E]) -> ModelResult<()> {
    if let Some((first, rest)) = entities.split_first() {
        for entity in rest {
            first.compare(entity)?;
        }
    }
    entities.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
    Ok(())
}

/// Declare an entity struct.
///
/// The first field must be `id`. The macro derives `Debug`, `Clone` and the
/// serde traits, implements [`Entity`] with a schema built from the field
/// types, and implements equality, hashing and ordering on the id alone.
///
/// The calling crate needs `serde` as a dependency.
///
/// ```ignore
/// repograph_core::entity! {
///     pub struct Book {
///         pub id: i64,
///         pub title: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(#[$id_meta:meta])*
            $id_vis:vis id: $id_ty:ty,
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $(#[$id_meta])*
            $id_vis id: $id_ty,
            $(
                $(#[$field_meta])*
                $field_vis $field: $field_ty,
            )*
        }

        impl $crate::Entity for $name {
            fn schema() -> &'static $crate::EntitySchema {
                static SCHEMA: ::std::sync::OnceLock<$crate::EntitySchema> =
                    ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    $crate::EntitySchema::new(
                        stringify!($name),
                        vec![
                            $crate::FieldDef::of::<$id_ty>("id"),
                            $($crate::FieldDef::of::<$field_ty>(stringify!($field)),)*
                        ],
                    )
                })
            }

            fn id(&self) -> $crate::EntityId {
                $crate::EntityId::from(self.id.clone())
            }
        }

        impl $crate::FieldType for $name {
            const KIND: $crate::FieldKind = $crate::FieldKind::Entity;
        }

        impl ::core::cmp::PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                $crate::Entity::same_identity(self, other)
            }
        }

        impl ::core::cmp::Eq for $name {}

        impl ::core::hash::Hash for $name {
            fn hash<H: ::core::hash::Hasher>(&self, state: &mut H) {
                ::core::hash::Hash::hash(&$crate::Entity::id(self), state);
            }
        }

        impl ::core::cmp::PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> ::core::option::Option<::core::cmp::Ordering> {
                $crate::Entity::compare(self, other).ok()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::hash::{DefaultHasher, Hash, Hasher};

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::schema::FieldKind;

    crate::entity! {
        struct Book {
            id: i64,
            title: String,
            summary: Option<String>,
        }
    }

    crate::entity! {
        struct Author {
            pub id: String,
            pub name: String,
            #[serde(default)]
            pub books: Vec<Book>,
        }
    }

    crate::entity! {
        struct Tag {
            id: EntityId,
        }
    }

    fn book(id: i64, title: &str) -> Book {
        Book {
            id,
            title: title.into(),
            summary: None,
        }
    }

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn schema_describes_declared_fields() {
        let schema = Author::schema();
        assert_eq!(schema.type_name(), "Author");
        assert_eq!(Author::class_name(), "author");
        assert_eq!(schema.field("id").unwrap().kind, FieldKind::Text);
        assert_eq!(schema.field("books").unwrap().kind, FieldKind::EntityList);
        assert_eq!(Tag::schema().field("id").unwrap().kind, FieldKind::Identifier);
    }

    #[test]
    fn equality_is_identity() {
        assert_eq!(book(1, "Dune"), book(1, "Emma"));
        assert_ne!(book(1, "Dune"), book(2, "Dune"));
        assert_eq!(hash_of(&book(1, "Dune")), hash_of(&EntityId::from(1)));

        let set: HashSet<Book> = [book(1, "a"), book(1, "b"), book(2, "c")].into();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn records_carry_nested_entities() {
        let author = Author {
            id: "a1".into(),
            name: "Frank".into(),
            books: vec![book(1, "Dune")],
        };

        let record = author.to_record().unwrap();
        assert_eq!(record["books"][0]["title"], json!("Dune"));

        let back = Author::from_record(record).unwrap();
        assert_eq!(back.books, vec![book(1, "Dune")]);
    }

    #[test]
    fn from_record_rejects_wrong_shapes() {
        let record = match json!({"id": "not a number", "title": "x"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(matches!(
            Book::from_record(record),
            Err(ModelError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn mixed_id_kinds_cannot_be_ordered() {
        let mut tags = vec![
            Tag { id: EntityId::from(1) },
            Tag { id: EntityId::from("b") },
        ];
        assert!(sort_by_id(&mut tags).is_err());
        assert_eq!(tags[0].partial_cmp(&tags[1]), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn sort_by_id_orders_books(ids in proptest::collection::vec(any::<i64>(), 0..32)) {
            let mut books: Vec<Book> = ids.iter().map(|id| book(*id, "t")).collect();
            sort_by_id(&mut books).unwrap();

            let mut expected = ids.clone();
            expected.sort();
            let sorted: Vec<i64> = books.iter().map(|b| b.id).collect();
            prop_assert_eq!(sorted, expected);
        }
    }
}
