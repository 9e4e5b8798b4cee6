//! Relationships between entity types.
//!
//! A relationship links a *source* type to a *destination* type:
//!
//! - **Extension**: the source is a specialisation of the destination. Both
//!   share the id, the source carries the destination's attributes plus its
//!   own.
//! - **Single composition**: the source holds one destination entity (or none)
//!   in an attribute, referenced through a foreign key.
//! - **Multiple composition**: the source holds a list of destination entities
//!   in an attribute, linked through a join table.

use crate::entity::Entity;
use crate::error::{ModelError, ModelResult};
use crate::schema::{EntitySchema, FieldKind, ID_FIELD};

/// The three relationship kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    Extension,
    SingleComposition,
    MultipleComposition,
}

/// Keys tying a composing source to its destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositionKeys {
    /// Source attribute holding the reference (foreign key for single
    /// composition, the joined key for multiple composition).
    pub source_id: String,
    /// Destination attribute the reference points to.
    pub destination_id: String,
    /// Source attribute holding the nested entity or list.
    pub source_attribute: String,
}

/// Kind-specific settings of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Link {
    Extension,
    SingleComposition(CompositionKeys),
    MultipleComposition(CompositionKeys),
}

/// A validated relationship between two entity types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    source: &'static EntitySchema,
    destination: &'static EntitySchema,
    link: Link,
}

impl Relationship {
    /// Start declaring a relationship from `S` to `D`.
    pub fn builder<S: Entity, D: Entity>(kind: RelationshipKind) -> RelationshipBuilder {
        RelationshipBuilder::new(S::schema(), D::schema(), kind)
    }

    /// `S` extends `D`.
    pub fn extension<S: Entity, D: Entity>() -> ModelResult<Self> {
        Self::builder::<S, D>(RelationshipKind::Extension).build()
    }

    /// `S` holds at most one `D`, with default keys.
    pub fn composition<S: Entity, D: Entity>() -> ModelResult<Self> {
        Self::builder::<S, D>(RelationshipKind::SingleComposition).build()
    }

    /// `S` holds a list of `D`, with default keys.
    pub fn multiple_composition<S: Entity, D: Entity>() -> ModelResult<Self> {
        Self::builder::<S, D>(RelationshipKind::MultipleComposition).build()
    }

    pub fn source(&self) -> &'static EntitySchema {
        self.source
    }

    pub fn destination(&self) -> &'static EntitySchema {
        self.destination
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn kind(&self) -> RelationshipKind {
        match self.link {
            Link::Extension => RelationshipKind::Extension,
            Link::SingleComposition(_) => RelationshipKind::SingleComposition,
            Link::MultipleComposition(_) => RelationshipKind::MultipleComposition,
        }
    }

    pub fn is_variant(&self, kind: RelationshipKind) -> bool {
        self.kind() == kind
    }

    pub fn is_source(&self, schema: &EntitySchema) -> bool {
        self.source == schema
    }

    pub fn is_destination(&self, schema: &EntitySchema) -> bool {
        self.destination == schema
    }

    /// Whether `entity` is an instance of the source type.
    pub fn is_source_of<E: Entity>(&self, _entity: &E) -> bool {
        self.is_source(E::schema())
    }

    /// Whether `entity` is an instance of the destination type.
    pub fn is_destination_of<E: Entity>(&self, _entity: &E) -> bool {
        self.is_destination(E::schema())
    }

    /// Keys of a composition; `None` for extensions.
    pub fn composition_keys(&self) -> Option<&CompositionKeys> {
        match &self.link {
            Link::Extension => None,
            Link::SingleComposition(keys) | Link::MultipleComposition(keys) => Some(keys),
        }
    }

    /// Join table name of a multiple composition:
    /// `<source>_<destination>_relationship`.
    pub fn join_table(&self) -> String {
        format!(
            "{}_{}_relationship",
            self.source.class_name(),
            self.destination.class_name()
        )
    }

    /// Join table column referencing the source.
    pub fn join_source_column(&self) -> String {
        format!("{}_id", self.source.class_name())
    }

    /// Join table column referencing the destination.
    pub fn join_destination_column(&self) -> String {
        format!("{}_id", self.destination.class_name())
    }
}

/// Builder for [`Relationship`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    source: &'static EntitySchema,
    destination: &'static EntitySchema,
    kind: RelationshipKind,
    source_id: Option<String>,
    destination_id: Option<String>,
    source_attribute: Option<String>,
}

impl RelationshipBuilder {
    pub fn new(
        source: &'static EntitySchema,
        destination: &'static EntitySchema,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            source,
            destination,
            kind,
            source_id: None,
            destination_id: None,
            source_attribute: None,
        }
    }

    pub fn source_id(mut self, name: impl Into<String>) -> Self {
        self.source_id = Some(name.into());
        self
    }

    pub fn destination_id(mut self, name: impl Into<String>) -> Self {
        self.destination_id = Some(name.into());
        self
    }

    pub fn source_attribute(mut self, name: impl Into<String>) -> Self {
        self.source_attribute = Some(name.into());
        self
    }

    /// Validate the declaration and fill in defaults.
    ///
    /// Extensions always join on the id of both sides. Compositions default
    /// to `<destination>_id` (single) or `id` (multiple) for the source key,
    /// `id` for the destination key and `<destination>` for the attribute
    /// (with an `s` suffix for lists when that attribute exists).
    pub fn build(self) -> ModelResult<Relationship> {
        let link = match self.kind {
            RelationshipKind::Extension => self.extension_link()?,
            RelationshipKind::SingleComposition => {
                Link::SingleComposition(self.composition_keys(FieldKind::Entity)?)
            }
            RelationshipKind::MultipleComposition => {
                Link::MultipleComposition(self.composition_keys(FieldKind::EntityList)?)
            }
        };

        Ok(Relationship {
            source: self.source,
            destination: self.destination,
            link,
        })
    }

    fn extension_link(&self) -> ModelResult<Link> {
        for (role, key) in [("source_id", &self.source_id), ("destination_id", &self.destination_id)] {
            if let Some(key) = key.as_deref() {
                if key != ID_FIELD {
                    return Err(ModelError::config(format!(
                        "extension relationships must use {ID_FIELD} as {role}, got {key}"
                    )));
                }
            }
        }

        if let Some(attribute) = &self.source_attribute {
            return Err(ModelError::config(format!(
                "extension relationships don't take a source_attribute, got {attribute}"
            )));
        }

        if self.source == self.destination {
            return Err(ModelError::config(format!(
                "{} can't extend itself",
                self.source.type_name()
            )));
        }

        Ok(Link::Extension)
    }

    fn composition_keys(&self, expected: FieldKind) -> ModelResult<CompositionKeys> {
        let destination = self.destination.class_name();

        let source_id = self.source_id.clone().unwrap_or_else(|| match expected {
            FieldKind::EntityList => ID_FIELD.to_owned(),
            _ => format!("{destination}_id"),
        });
        let destination_id = self
            .destination_id
            .clone()
            .unwrap_or_else(|| ID_FIELD.to_owned());
        let source_attribute = match &self.source_attribute {
            Some(attribute) => attribute.clone(),
            None => self.default_attribute(expected),
        };

        let field = self.source.field(&source_attribute).ok_or_else(|| {
            ModelError::config(format!(
                "{} has no attribute {source_attribute} to hold {}",
                self.source.type_name(),
                self.destination.type_name()
            ))
        })?;
        if field.kind != expected {
            return Err(ModelError::config(format!(
                "{}.{source_attribute} is {:?}, a {:?} relationship needs {expected:?}",
                self.source.type_name(),
                field.kind,
                self.kind
            )));
        }

        if !self.destination.has_field(&destination_id) {
            return Err(ModelError::config(format!(
                "{} has no attribute {destination_id}",
                self.destination.type_name()
            )));
        }

        Ok(CompositionKeys {
            source_id,
            destination_id,
            source_attribute,
        })
    }

    fn default_attribute(&self, expected: FieldKind) -> String {
        let singular = self.destination.class_name().to_owned();
        if expected == FieldKind::EntityList {
            let plural = format!("{singular}s");
            if self.source.has_field(&plural) {
                return plural;
            }
        }
        singular
    }
}
