//! In-memory repository for tests and development.
//!
//! Entities are kept as full records (nested entities included) in one table
//! per entity type. The first write after a commit copies the committed tables
//! into a staging area; `commit` swaps the staging area in.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use repograph_core::{EntityId, EntitySchema, Link, Mapper, Record};
use serde_json::Value;
use tracing::{debug, instrument};

use super::ids::IdAllocator;
use super::{Repository, SearchFilter};
use crate::config::{Backend, DatabaseUrl};
use crate::error::{RepositoryError, RepositoryResult};

/// Database url that makes construction fail, for exercising connection
/// error handling.
pub const FAILING_URL: &str = "fake://connection-error";

/// Database url used when none is given.
pub const DEFAULT_URL: &str = "fake://memory";

type Table = HashMap<EntityId, Record>;

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    fn table(&self, schema: &EntitySchema) -> Option<&Table> {
        self.tables.get(schema.class_name())
    }

    fn get(&self, schema: &EntitySchema, id: &EntityId) -> Option<&Record> {
        self.table(schema).and_then(|table| table.get(id))
    }

    fn contains(&self, schema: &EntitySchema, id: &EntityId) -> bool {
        self.get(schema, id).is_some()
    }

    fn insert(&mut self, schema: &EntitySchema, id: EntityId, record: Record) {
        self.tables
            .entry(schema.class_name().to_owned())
            .or_default()
            .insert(id, record);
    }

    fn remove(&mut self, schema: &EntitySchema, id: &EntityId) -> Option<Record> {
        self.tables
            .get_mut(schema.class_name())
            .and_then(|table| table.remove(id))
    }

    fn max_id(&self, schema: &EntitySchema) -> Option<EntityId> {
        let table = self.table(schema)?;
        let max_int = table.keys().filter_map(EntityId::as_int).max();
        match max_int {
            Some(max) => Some(EntityId::Int(max)),
            None => table
                .keys()
                .filter_map(|id| match id {
                    EntityId::Text(text) => Some(text),
                    EntityId::Int(_) => None,
                })
                .max()
                .map(|text| EntityId::Text(text.clone())),
        }
    }
}

/// Process-local repository.
#[derive(Debug)]
pub struct MemoryRepository {
    database_url: String,
    mapper: Mapper,
    committed: Tables,
    staged: Option<Tables>,
    ids: IdAllocator,
}

impl MemoryRepository {
    /// Open an in-memory repository.
    ///
    /// Accepts `fake://` and `memory://` urls. [`FAILING_URL`] and any other
    /// url fail with a connection error.
    pub fn new(database_url: impl Into<String>, mapper: Mapper) -> RepositoryResult<Self> {
        let database_url = database_url.into();

        if database_url == FAILING_URL {
            return Err(RepositoryError::connection(format!(
                "Could not connect to the in-memory database at {database_url}"
            )));
        }
        match DatabaseUrl::parse(&database_url)?.backend() {
            Backend::Memory { .. } => {}
            other => {
                return Err(RepositoryError::connection(format!(
                    "{database_url} points to a {} database, not an in-memory one",
                    other.name()
                )));
            }
        }

        Ok(Self::with_url(database_url, mapper))
    }

    /// Open an in-memory repository on the default url.
    pub fn in_memory(mapper: Mapper) -> Self {
        Self::with_url(DEFAULT_URL.to_owned(), mapper)
    }

    fn with_url(database_url: String, mapper: Mapper) -> Self {
        Self {
            database_url,
            mapper,
            committed: Tables::default(),
            staged: None,
            ids: IdAllocator::new(),
        }
    }

    /// Type extending `schema` that owns `id`, if any.
    fn extending_owner(&self, schema: &EntitySchema, id: &EntityId) -> Option<&'static EntitySchema> {
        self.mapper
            .extended_by(schema)
            .into_iter()
            .map(|rel| rel.source())
            .find(|source| self.committed.contains(source, id))
    }

    /// Records of `schema` in `tables`, without the ones owned by extending
    /// types.
    fn visible_records(&self, tables: &Tables, schema: &EntitySchema) -> Vec<Record> {
        let extending: Vec<&'static EntitySchema> = self
            .mapper
            .extended_by(schema)
            .into_iter()
            .map(|rel| rel.source())
            .collect();

        tables
            .table(schema)
            .into_iter()
            .flat_map(|table| table.iter())
            .filter(|(id, _)| !extending.iter().any(|source| tables.contains(source, id)))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Bring nested entities up to date with their committed versions.
    fn resolve(
        &self,
        schema: &EntitySchema,
        mut record: Record,
        path: &mut HashSet<(String, EntityId)>,
    ) -> Record {
        let Ok(id) = schema.id_of(&record) else {
            return record;
        };
        let key = (schema.class_name().to_owned(), id.clone());
        if !path.insert(key.clone()) {
            return record;
        }

        for rel in self.mapper.outgoing(schema) {
            let destination = rel.destination();
            match rel.link() {
                Link::Extension => {
                    if let Some(stored) = self.committed.get(destination, &id) {
                        for field in destination.fields() {
                            if let Some(value) = stored.get(field.name) {
                                record.insert(field.name.to_owned(), value.clone());
                            }
                        }
                    }
                }
                Link::SingleComposition(keys) => {
                    if let Some(Value::Object(nested)) = record.get(&keys.source_attribute) {
                        let fresh = self
                            .refresh(destination, nested, path)
                            .map_or(Value::Null, Value::Object);
                        record.insert(keys.source_attribute.clone(), fresh);
                    }
                }
                Link::MultipleComposition(keys) => {
                    if let Some(Value::Array(items)) = record.get(&keys.source_attribute) {
                        let fresh = items
                            .iter()
                            .filter_map(|item| match item {
                                Value::Object(nested) => {
                                    self.refresh(destination, nested, path).map(Value::Object)
                                }
                                other => Some(other.clone()),
                            })
                            .collect();
                        record.insert(keys.source_attribute.clone(), Value::Array(fresh));
                    }
                }
            }
        }

        path.remove(&key);
        schema.fill_defaults(&mut record);
        record
    }

    /// Committed version of a nested entity, `None` once it has been deleted.
    fn refresh(
        &self,
        schema: &EntitySchema,
        nested: &Record,
        path: &mut HashSet<(String, EntityId)>,
    ) -> Option<Record> {
        let id = schema.id_of(nested).ok()?;
        let stored = self.committed.get(schema, &id)?;
        Some(self.resolve(schema, stored.clone(), path))
    }
}

/// Stage `record` and every entity nested in it.
fn stage_graph(
    mapper: &Mapper,
    staging: &mut Tables,
    schema: &EntitySchema,
    record: &Record,
) -> RepositoryResult<()> {
    let id = schema.id_of(record)?;

    for rel in mapper.outgoing(schema) {
        let destination = rel.destination();
        match rel.link() {
            Link::Extension => {
                let mut shared = staging.get(destination, &id).cloned().unwrap_or_default();
                for (field, value) in record {
                    if destination.has_field(field) {
                        shared.insert(field.clone(), value.clone());
                    }
                }
                stage_graph(mapper, staging, destination, &shared)?;
            }
            Link::SingleComposition(keys) => {
                if let Some(Value::Object(nested)) = record.get(&keys.source_attribute) {
                    stage_graph(mapper, staging, destination, nested)?;
                }
            }
            Link::MultipleComposition(keys) => {
                if let Some(Value::Array(items)) = record.get(&keys.source_attribute) {
                    for item in items {
                        if let Value::Object(nested) = item {
                            stage_graph(mapper, staging, destination, nested)?;
                        }
                    }
                }
            }
        }
    }

    staging.insert(schema, id, record.clone());
    Ok(())
}

impl Repository for MemoryRepository {
    fn database_url(&self) -> &str {
        &self.database_url
    }

    fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    fn set_mapper(&mut self, mapper: Mapper) {
        self.mapper = mapper;
    }

    #[instrument(skip(self, schema, record), fields(entity = schema.type_name()), err)]
    fn add_record(&mut self, schema: &'static EntitySchema, mut record: Record) -> RepositoryResult<Record> {
        let committed = &self.committed;
        self.ids
            .assign_graph(&self.mapper, schema, &mut record, &mut |s| Ok(committed.max_id(s)))?;

        let staging = self.staged.get_or_insert_with(|| self.committed.clone());
        stage_graph(&self.mapper, staging, schema, &record)?;
        Ok(record)
    }

    fn get_record(&self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<Record> {
        if let Some(extending) = self.extending_owner(schema, id) {
            return Err(RepositoryError::extended_elsewhere(schema, extending, id));
        }

        let record = self
            .committed
            .get(schema, id)
            .cloned()
            .ok_or_else(|| RepositoryError::missing_id(schema, id))?;
        Ok(self.resolve(schema, record, &mut HashSet::new()))
    }

    #[instrument(skip(self, schema), fields(entity = schema.type_name()), err)]
    fn delete_record(&mut self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<()> {
        if let Err(e) = self.get_record(schema, id) {
            return Err(RepositoryError::undeletable(schema, id, e));
        }

        let extended = self.mapper.extends(schema).map(|rel| rel.destination());
        let staging = self.staged.get_or_insert_with(|| self.committed.clone());
        staging.remove(schema, id);
        if let Some(destination) = extended {
            staging.remove(destination, id);
        }
        Ok(())
    }

    fn all_records(&self, schema: &'static EntitySchema) -> RepositoryResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .visible_records(&self.committed, schema)
            .into_iter()
            .map(|record| self.resolve(schema, record, &mut HashSet::new()))
            .collect();

        if records.is_empty() {
            return Err(RepositoryError::empty_table(schema));
        }
        schema.sort_records(&mut records)?;
        Ok(records)
    }

    fn search_records(
        &self,
        schema: &'static EntitySchema,
        filter: &SearchFilter,
    ) -> RepositoryResult<Vec<Record>> {
        let records = match self.all_records(schema) {
            Ok(records) => records,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let matched: Vec<Record> = records.into_iter().filter(|r| filter.matches(r)).collect();
        if matched.is_empty() {
            return Err(RepositoryError::no_match(schema, filter));
        }
        Ok(matched)
    }

    fn last_record(
        &self,
        schema: &'static EntitySchema,
        committed_only: bool,
    ) -> RepositoryResult<Record> {
        let tables = match (&self.staged, committed_only) {
            (Some(staged), false) => staged,
            _ => &self.committed,
        };

        let mut records = self.visible_records(tables, schema);
        schema.sort_records(&mut records)?;
        records.pop().ok_or_else(|| RepositoryError::empty_table(schema))
    }

    #[instrument(skip(self))]
    fn commit(&mut self) -> RepositoryResult<()> {
        if let Some(staged) = self.staged.take() {
            self.committed = staged;
        }
        self.ids.reset();
        debug!("Committed staged changes");
        Ok(())
    }

    fn apply_migrations(&mut self, directory: &Path) -> RepositoryResult<()> {
        debug!(directory = %directory.display(), "In-memory repository has no schema to migrate");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use repograph_core::{Entity, Relationship};

    use super::*;
    use crate::repository::RepositoryExt;

    repograph_core::entity! {
        struct Book {
            id: i64,
            title: String,
        }
    }

    repograph_core::entity! {
        struct Author {
            id: String,
            name: String,
        }
    }

    repograph_core::entity! {
        struct Poet {
            id: String,
            name: String,
            meter: String,
        }
    }

    repograph_core::entity! {
        struct Shelf {
            id: i64,
            #[serde(default)]
            books: Vec<Book>,
        }
    }

    fn book(id: i64, title: &str) -> Book {
        Book {
            id,
            title: title.into(),
        }
    }

    #[test]
    fn rejects_foreign_and_failing_urls() {
        assert!(MemoryRepository::new(FAILING_URL, Mapper::default()).unwrap_err().is_connection());
        assert!(MemoryRepository::new("sqlite:///tmp/x.db", Mapper::default()).unwrap_err().is_connection());
        assert!(MemoryRepository::new("wrong_database_url", Mapper::default()).unwrap_err().is_connection());
        assert!(MemoryRepository::new("fake://", Mapper::default()).is_ok());
    }

    #[test]
    fn staged_changes_are_isolated_until_commit() {
        let mut repo = MemoryRepository::in_memory(Mapper::default());
        repo.add(&book(1, "Dune")).unwrap();
        assert!(repo.get::<Book>(1).unwrap_err().is_not_found());

        repo.commit().unwrap();
        assert_eq!(repo.get::<Book>(1).unwrap().title, "Dune");

        repo.add(&book(1, "Dune Messiah")).unwrap();
        assert_eq!(repo.get::<Book>(1).unwrap().title, "Dune");
        repo.commit().unwrap();
        assert_eq!(repo.get::<Book>(1).unwrap().title, "Dune Messiah");
    }

    #[test]
    fn last_sees_staged_entries_unless_told_otherwise() {
        let mut repo = MemoryRepository::in_memory(Mapper::default());
        repo.add(&book(1, "a")).unwrap();
        repo.commit().unwrap();
        repo.add(&book(2, "b")).unwrap();

        assert_eq!(repo.last::<Book>(false).unwrap().id, 2);
        assert_eq!(repo.last::<Book>(true).unwrap().id, 1);
    }

    #[test]
    fn get_returns_fresh_nested_entities() {
        let mapper = Mapper::new(vec![Relationship::multiple_composition::<Shelf, Book>().unwrap()]);
        let mut repo = MemoryRepository::in_memory(mapper);
        repo.add(&Shelf {
            id: 1,
            books: vec![book(1, "old title")],
        })
        .unwrap();
        repo.commit().unwrap();

        repo.add(&book(1, "new title")).unwrap();
        repo.commit().unwrap();

        let shelf: Shelf = repo.get(1).unwrap();
        assert_eq!(shelf.books[0].title, "new title");
        assert_eq!(repo.get::<Book>(1).unwrap().title, "new title");
    }

    #[test]
    fn extension_keeps_types_apart() {
        let mapper = Mapper::new(vec![Relationship::extension::<Poet, Author>().unwrap()]);
        let mut repo = MemoryRepository::in_memory(mapper);
        repo.add(&Poet {
            id: "p".into(),
            name: "Emily".into(),
            meter: "common".into(),
        })
        .unwrap();
        repo.add(&Author {
            id: "a".into(),
            name: "Jane".into(),
        })
        .unwrap();
        repo.commit().unwrap();

        let err = repo.get::<Author>("p").unwrap_err();
        assert_eq!(err.to_string(), "Entity with ID p is of type Poet instead of Author");

        let authors: Vec<Author> = repo.all().unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].id, "a");

        let poet: Poet = repo.get("p").unwrap();
        repo.delete(&poet).unwrap();
        repo.commit().unwrap();
        assert!(repo.get::<Author>("p").unwrap_err().is_not_found());
        assert!(repo.get::<Poet>("p").unwrap_err().is_not_found());
    }

    #[test]
    fn unassigned_ids_follow_the_largest_committed_id() {
        let mut repo = MemoryRepository::in_memory(Mapper::default());
        repo.add(&book(4, "a")).unwrap();
        repo.commit().unwrap();

        let staged = repo.add(&book(-1, "b")).unwrap();
        assert_eq!(staged.id, 5);
        assert_eq!(repo.add(&book(-1, "c")).unwrap().id, 6);
        assert_eq!(Book::schema().class_name(), "book");
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn all_is_sorted_whatever_the_insertion_order(ids in proptest::collection::vec(0i64..500, 1..40)) {
            let mut repo = MemoryRepository::in_memory(Mapper::default());
            for id in &ids {
                repo.add(&book(*id, "t")).unwrap();
            }
            repo.commit().unwrap();

            let stored: Vec<i64> = repo.all::<Book>().unwrap().into_iter().map(|b| b.id).collect();
            let mut expected = ids.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(stored, expected);
        }
    }
}
