//! Registry of the relationships a repository knows about.

use crate::relationship::{Link, Relationship};
use crate::schema::EntitySchema;

/// Ordered collection of relationships.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapper {
    relationships: Vec<Relationship>,
}

impl Mapper {
    pub fn new(relationships: Vec<Relationship>) -> Self {
        Self { relationships }
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn set_relationships(&mut self, relationships: Vec<Relationship>) {
        self.relationships = relationships;
    }

    pub fn push(&mut self, relationship: Relationship) {
        self.relationships.push(relationship);
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    /// Relationships where `schema` is the source or the destination.
    pub fn get_relationships(&self, schema: &EntitySchema) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|rel| rel.is_source(schema) || rel.is_destination(schema))
            .collect()
    }

    /// Relationships where `schema` is the source, in declaration order.
    pub fn outgoing(&self, schema: &EntitySchema) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|rel| rel.is_source(schema))
            .collect()
    }

    /// Extensions whose destination is `schema`, i.e. the types extending it.
    pub fn extended_by(&self, schema: &EntitySchema) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|rel| matches!(rel.link(), Link::Extension) && rel.is_destination(schema))
            .collect()
    }

    /// The extension whose source is `schema`, if that type extends another.
    pub fn extends(&self, schema: &EntitySchema) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|rel| matches!(rel.link(), Link::Extension) && rel.is_source(schema))
    }
}

impl From<Vec<Relationship>> for Mapper {
    fn from(relationships: Vec<Relationship>) -> Self {
        Self::new(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    crate::entity! {
        struct Book {
            id: i64,
        }
    }

    crate::entity! {
        struct Author {
            id: String,
            name: String,
        }
    }

    crate::entity! {
        struct Novelist {
            id: String,
            name: String,
            style: String,
        }
    }

    crate::entity! {
        struct Library {
            id: i64,
            books: Vec<Book>,
        }
    }

    fn mapper() -> Mapper {
        Mapper::new(vec![
            Relationship::extension::<Novelist, Author>().unwrap(),
            Relationship::multiple_composition::<Library, Book>().unwrap(),
        ])
    }

    #[test]
    fn get_relationships_matches_both_ends() {
        let mapper = mapper();
        assert_eq!(mapper.get_relationships(Author::schema()).len(), 1);
        assert_eq!(mapper.get_relationships(Book::schema()).len(), 1);
        assert_eq!(mapper.get_relationships(Library::schema()).len(), 1);
    }

    #[test]
    fn outgoing_only_matches_sources() {
        let mapper = mapper();
        assert!(mapper.outgoing(Author::schema()).is_empty());
        assert_eq!(mapper.outgoing(Novelist::schema()).len(), 1);
    }

    #[test]
    fn extension_lookups() {
        let mapper = mapper();
        let extending = mapper.extended_by(Author::schema());
        assert_eq!(extending.len(), 1);
        assert!(extending[0].is_source(Novelist::schema()));
        assert!(mapper.extends(Novelist::schema()).is_some());
        assert!(mapper.extends(Author::schema()).is_none());
    }

    #[test]
    fn set_relationships_replaces_everything() {
        let mut mapper = mapper();
        mapper.set_relationships(Vec::new());
        assert!(mapper.is_empty());
        assert_eq!(mapper, Mapper::default());
    }
}
