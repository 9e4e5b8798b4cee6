//! `repograph-core` entity model building blocks.
//!
//! This crate describes *what* is stored (entities, their schemas and the
//! relationships between them) without any storage concerns.

pub mod entity;
pub mod error;
pub mod id;
pub mod mapper;
pub mod relationship;
pub mod schema;

pub use entity::{Entity, sort_by_id};
pub use error::{ModelError, ModelResult};
pub use id::EntityId;
pub use mapper::Mapper;
pub use relationship::{CompositionKeys, Link, Relationship, RelationshipBuilder, RelationshipKind};
pub use schema::{EntitySchema, FieldDef, FieldKind, FieldType, ID_FIELD, Record};
