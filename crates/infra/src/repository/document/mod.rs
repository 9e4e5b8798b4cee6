//! Document store repository.
//!
//! Every entity is one JSON document tagged with its type in
//! [`DISCRIMINATOR`]; nested entities are stored inline. Staged adds and
//! removals are applied to the file in one write on commit; a commit that
//! cannot write keeps them staged.

pub mod store;

use std::path::Path;

use repograph_core::{EntityId, EntitySchema, ID_FIELD, Mapper, Record};
use serde_json::Value;
use tracing::{debug, instrument};

pub use store::JsonDocumentStore;

use super::ids::IdAllocator;
use super::{Repository, SearchFilter};
use crate::config::{Backend, DatabaseUrl};
use crate::error::{RepositoryError, RepositoryResult};

/// Document attribute holding the entity type.
pub const DISCRIMINATOR: &str = "model_type_";

/// Repository backed by a [`JsonDocumentStore`].
#[derive(Debug)]
pub struct DocumentRepository {
    database_url: String,
    mapper: Mapper,
    store: JsonDocumentStore,
    staged_adds: Vec<(&'static EntitySchema, Record)>,
    staged_removes: Vec<(&'static EntitySchema, EntityId)>,
    ids: IdAllocator,
}

fn is_type(schema: &EntitySchema) -> impl Fn(&Record) -> bool + '_ {
    move |doc| matches!(doc.get(DISCRIMINATOR), Some(Value::String(name)) if name == schema.class_name())
}

fn is_entity<'a>(schema: &'a EntitySchema, id: &'a EntityId) -> impl Fn(&Record) -> bool + 'a {
    let of_type = is_type(schema);
    move |doc| of_type(doc) && doc.get(ID_FIELD).and_then(EntityId::from_value).as_ref() == Some(id)
}

fn strip(doc: &Record) -> Record {
    let mut record = doc.clone();
    record.remove(DISCRIMINATOR);
    record
}

impl DocumentRepository {
    /// Open the document file a `tinydb:///<path>` url points to, creating
    /// it when missing.
    pub fn new(database_url: impl Into<String>, mapper: Mapper) -> RepositoryResult<Self> {
        let database_url = database_url.into();
        let path = match DatabaseUrl::parse(&database_url)?.backend() {
            Backend::Document { path } => path.clone(),
            other => {
                return Err(RepositoryError::connection(format!(
                    "{database_url} points to a {} database, not a document one",
                    other.name()
                )));
            }
        };

        let store = JsonDocumentStore::open(path)?;
        debug!(path = %store.path().display(), "Opened document store");

        Ok(Self {
            database_url,
            mapper,
            store,
            staged_adds: Vec::new(),
            staged_removes: Vec::new(),
            ids: IdAllocator::new(),
        })
    }

    fn committed(&self, schema: &EntitySchema) -> Vec<Record> {
        self.store
            .search(is_type(schema))
            .into_iter()
            .map(strip)
            .collect()
    }
}

fn max_committed_id(store: &JsonDocumentStore, schema: &EntitySchema) -> Option<EntityId> {
    let ids: Vec<EntityId> = store
        .search(is_type(schema))
        .into_iter()
        .filter_map(|doc| doc.get(ID_FIELD).and_then(EntityId::from_value))
        .collect();

    let max_int = ids.iter().filter_map(EntityId::as_int).max();
    match max_int {
        Some(max) => Some(EntityId::Int(max)),
        None => ids
            .into_iter()
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal)),
    }
}

impl Repository for DocumentRepository {
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
        let store = &self.store;
        self.ids.assign_graph(&self.mapper, schema, &mut record, &mut |s| {
            Ok(max_committed_id(store, s))
        })?;

        self.staged_adds.push((schema, record.clone()));
        Ok(record)
    }

    fn get_record(&self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<Record> {
        self.store
            .search(is_entity(schema, id))
            .first()
            .map(|doc| strip(doc))
            .ok_or_else(|| RepositoryError::missing_id(schema, id))
    }

    #[instrument(skip(self, schema), fields(entity = schema.type_name()), err)]
    fn delete_record(&mut self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<()> {
        if let Err(e) = self.get_record(schema, id) {
            return Err(RepositoryError::undeletable(schema, id, e));
        }
        self.staged_removes.push((schema, id.clone()));
        Ok(())
    }

    fn all_records(&self, schema: &'static EntitySchema) -> RepositoryResult<Vec<Record>> {
        let mut records = self.committed(schema);
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
        let mut records: Vec<Record> = self
            .committed(schema)
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        if records.is_empty() {
            return Err(RepositoryError::no_match(schema, filter));
        }
        schema.sort_records(&mut records)?;
        Ok(records)
    }

    fn last_record(
        &self,
        schema: &'static EntitySchema,
        committed_only: bool,
    ) -> RepositoryResult<Record> {
        let mut records = self.committed(schema);

        if !committed_only {
            for (staged_schema, staged) in &self.staged_adds {
                if *staged_schema != schema {
                    continue;
                }
                let id = schema.id_of(staged)?;
                records.retain(|record| schema.id_of(record).ok().as_ref() != Some(&id));
                records.push(staged.clone());
            }
        }

        schema.sort_records(&mut records)?;
        records.pop().ok_or_else(|| RepositoryError::empty_table(schema))
    }

    #[instrument(skip(self), err)]
    fn commit(&mut self) -> RepositoryResult<()> {
        if self.staged_adds.is_empty() && self.staged_removes.is_empty() {
            return Ok(());
        }

        // Start from the file so commits of other handles are kept.
        let mut store = self.store.reload()?;

        for (schema, record) in &self.staged_adds {
            let id = schema.id_of(record)?;
            let mut document = record.clone();
            document.insert(
                DISCRIMINATOR.to_owned(),
                Value::String(schema.class_name().to_owned()),
            );
            store.upsert(document, is_entity(schema, &id));
        }

        for (schema, id) in &self.staged_removes {
            store.remove(is_entity(schema, id));
        }

        store.flush()?;
        self.store = store;
        self.staged_adds.clear();
        self.staged_removes.clear();
        self.ids.reset();
        debug!("Committed staged changes");
        Ok(())
    }

    fn apply_migrations(&mut self, _directory: &Path) -> RepositoryResult<()> {
        Err(RepositoryError::Unsupported(
            "the document store has no schema to migrate".to_string(),
        ))
    }
}
