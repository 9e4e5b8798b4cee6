use std::path::Path;

use repograph_core::{Entity, EntityId, EntitySchema, Mapper, Record};

use super::SearchFilter;
use crate::error::{RepositoryError, RepositoryResult};

/// Storage boundary shared by every backend.
///
/// Backends work on [`Record`]s described by an [`EntitySchema`]; the typed
/// entry points live in [`RepositoryExt`].
///
/// ## Staging
///
/// `add_record` and `delete_record` only stage changes. Reads see committed
/// state alone until [`commit`](Repository::commit) applies the staged changes
/// in one step.
///
/// ## Relationships
///
/// The [`Mapper`] tells a backend how entity types relate. Nested entities are
/// stored with their parent and reassembled on reads; how that happens is up
/// to each backend.
pub trait Repository {
    fn database_url(&self) -> &str;

    fn mapper(&self) -> &Mapper;

    fn set_mapper(&mut self, mapper: Mapper);

    /// Stage an insert-or-replace of the record and of every entity nested in
    /// it. Returns the staged record with assigned ids.
    fn add_record(&mut self, schema: &'static EntitySchema, record: Record) -> RepositoryResult<Record>;

    /// Committed record of type `schema` with id `id`, nested entities included.
    fn get_record(&self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<Record>;

    /// Stage the removal of a committed entity.
    fn delete_record(&mut self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<()>;

    /// Every committed record of type `schema`, sorted by id.
    fn all_records(&self, schema: &'static EntitySchema) -> RepositoryResult<Vec<Record>>;

    /// Committed records matching every criterion of `filter`, sorted by id.
    fn search_records(
        &self,
        schema: &'static EntitySchema,
        filter: &SearchFilter,
    ) -> RepositoryResult<Vec<Record>>;

    /// Record with the largest id, staged ones included unless
    /// `committed_only` is set.
    fn last_record(
        &self,
        schema: &'static EntitySchema,
        committed_only: bool,
    ) -> RepositoryResult<Record>;

    /// Apply every staged change.
    fn commit(&mut self) -> RepositoryResult<()>;

    /// Bring the storage schema up to date with the migrations in `directory`.
    fn apply_migrations(&mut self, directory: &Path) -> RepositoryResult<()>;
}

impl<R: Repository + ?Sized> Repository for Box<R> {
    fn database_url(&self) -> &str {
        (**self).database_url()
    }

    fn mapper(&self) -> &Mapper {
        (**self).mapper()
    }

    fn set_mapper(&mut self, mapper: Mapper) {
        (**self).set_mapper(mapper)
    }

    fn add_record(&mut self, schema: &'static EntitySchema, record: Record) -> RepositoryResult<Record> {
        (**self).add_record(schema, record)
    }

    fn get_record(&self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<Record> {
        (**self).get_record(schema, id)
    }

    fn delete_record(&mut self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<()> {
        (**self).delete_record(schema, id)
    }

    fn all_records(&self, schema: &'static EntitySchema) -> RepositoryResult<Vec<Record>> {
        (**self).all_records(schema)
    }

    fn search_records(
        &self,
        schema: &'static EntitySchema,
        filter: &SearchFilter,
    ) -> RepositoryResult<Vec<Record>> {
        (**self).search_records(schema, filter)
    }

    fn last_record(
        &self,
        schema: &'static EntitySchema,
        committed_only: bool,
    ) -> RepositoryResult<Record> {
        (**self).last_record(schema, committed_only)
    }

    fn commit(&mut self) -> RepositoryResult<()> {
        (**self).commit()
    }

    fn apply_migrations(&mut self, directory: &Path) -> RepositoryResult<()> {
        (**self).apply_migrations(directory)
    }
}

/// Typed entity operations on top of any [`Repository`].
pub trait RepositoryExt: Repository {
    /// Stage `entity` (and everything nested in it). Returns the entity as
    /// staged, with assigned ids.
    fn add<E: Entity>(&mut self, entity: &E) -> RepositoryResult<E> {
        let staged = self.add_record(E::schema(), entity.to_record()?)?;
        Ok(E::from_record(staged)?)
    }

    /// Stage several entities in order.
    fn add_all<'a, E, I>(&mut self, entities: I) -> RepositoryResult<Vec<E>>
    where
        E: Entity + 'a,
        I: IntoIterator<Item = &'a E>,
    {
        entities.into_iter().map(|entity| self.add(entity)).collect()
    }

    fn get<E: Entity>(&self, id: impl Into<EntityId>) -> RepositoryResult<E> {
        let record = self.get_record(E::schema(), &id.into())?;
        Ok(E::from_record(record)?)
    }

    fn delete<E: Entity>(&mut self, entity: &E) -> RepositoryResult<()> {
        self.delete_record(E::schema(), &entity.id())
    }

    fn all<E: Entity>(&self) -> RepositoryResult<Vec<E>> {
        decode_all(self.all_records(E::schema())?)
    }

    fn search<E: Entity>(&self, filter: &SearchFilter) -> RepositoryResult<Vec<E>> {
        decode_all(self.search_records(E::schema(), filter)?)
    }

    fn last<E: Entity>(&self, committed_only: bool) -> RepositoryResult<E> {
        let record = self.last_record(E::schema(), committed_only)?;
        Ok(E::from_record(record)?)
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

fn decode_all<E: Entity>(records: Vec<Record>) -> RepositoryResult<Vec<E>> {
    records
        .into_iter()
        .map(|record| E::from_record(record).map_err(RepositoryError::from))
        .collect()
}
