//! SQLite repository.
//!
//! Entities are decomposed into one table per type (see [`mapping`]). The
//! repository is synchronous: it owns a single connection and a
//! current-thread Tokio runtime and blocks on every sqlx call.
//!
//! Adds and deletes are staged in order and applied inside one transaction on
//! commit. A failed commit rolls the transaction back and keeps the staged
//! changes.

pub mod mapping;
pub mod query;
pub mod value;

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use repograph_core::{EntityId, EntitySchema, Mapper, Record};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Sqlite};
use tokio::runtime::Runtime;
use tracing::{debug, error, instrument};

use self::query::Statement;
use self::value::{RowValues, decode_row};
use super::ids::IdAllocator;
use super::{Repository, SearchFilter};
use crate::config::{Backend, DatabaseUrl};
use crate::error::{RepositoryError, RepositoryResult};
use crate::migrations::{SqliteMigrationRunner, run_migrations};

/// Url of a private in-memory database.
pub const MEMORY_URL: &str = "sqlite://:memory:";

/// Blocking access to a connection (or an open transaction on it).
pub struct Session<'c> {
    runtime: &'c Runtime,
    conn: &'c mut SqliteConnection,
}

fn bind(statement: &Statement) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = query.bind(param.clone());
    }
    query
}

impl<'c> Session<'c> {
    pub fn new(runtime: &'c Runtime, conn: &'c mut SqliteConnection) -> Self {
        Self { runtime, conn }
    }

    /// Run a statement; returns the number of affected rows.
    pub fn execute(&mut self, statement: &Statement) -> RepositoryResult<u64> {
        let result = self
            .runtime
            .block_on(bind(statement).execute(&mut *self.conn))?;
        Ok(result.rows_affected())
    }

    /// Run a query and decode every row.
    pub fn fetch(&mut self, statement: &Statement) -> RepositoryResult<Vec<RowValues>> {
        let rows = self
            .runtime
            .block_on(bind(statement).fetch_all(&mut *self.conn))?;
        rows.iter().map(decode_row).collect()
    }
}

/// A staged change, applied in staging order on commit.
#[derive(Debug)]
enum Change {
    Add {
        schema: &'static EntitySchema,
        record: Record,
    },
    Remove {
        schema: &'static EntitySchema,
        id: EntityId,
    },
}

/// Repository over one SQLite database.
#[derive(Debug)]
pub struct SqliteRepository {
    database_url: String,
    mapper: Mapper,
    runtime: Runtime,
    connection: Mutex<SqliteConnection>,
    staged: Vec<Change>,
    ids: IdAllocator,
}

impl SqliteRepository {
    /// Connect to the database a `sqlite:///<path>` url points to.
    ///
    /// The file must already exist; the schema is created by
    /// [`apply_migrations`](Repository::apply_migrations).
    pub fn new(database_url: impl Into<String>, mapper: Mapper) -> RepositoryResult<Self> {
        let database_url = database_url.into();

        let options = match DatabaseUrl::parse(&database_url)?.backend() {
            Backend::Sqlite { path } => {
                if !path.is_file() {
                    return Err(RepositoryError::connection(format!(
                        "There is no database file: {}",
                        path.display()
                    )));
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(false)
            }
            Backend::SqliteMemory => SqliteConnectOptions::from_str("sqlite::memory:")?,
            other => {
                return Err(RepositoryError::connection(format!(
                    "{database_url} points to a {} database, not a sqlite one",
                    other.name()
                )));
            }
        };
        let options = options.foreign_keys(true);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RepositoryError::Runtime(format!("failed to start the sqlite runtime: {e}")))?;

        let mut connection = runtime.block_on(options.connect()).map_err(|e| {
            RepositoryError::connection_from(format!("Could not connect to {database_url}"), e)
        })?;
        runtime.block_on(sqlx::query("PRAGMA case_sensitive_like = ON").execute(&mut connection))?;
        debug!(url = %database_url, "Connected to sqlite database");

        Ok(Self {
            database_url,
            mapper,
            runtime,
            connection: Mutex::new(connection),
            staged: Vec::new(),
            ids: IdAllocator::new(),
        })
    }

    /// Connect to a private in-memory database.
    pub fn in_memory(mapper: Mapper) -> RepositoryResult<Self> {
        Self::new(MEMORY_URL, mapper)
    }

    /// Changes waiting for the next commit.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Session<'_>) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut conn = self.connection.lock().map_err(|_| RepositoryError::poisoned())?;
        let mut session = Session::new(&self.runtime, &mut conn);
        f(&mut session)
    }

    fn load(&self, schema: &'static EntitySchema, filter: Option<&SearchFilter>) -> RepositoryResult<Vec<Record>> {
        self.with_session(|session| {
            let ids = mapping::ids(session, &self.mapper, schema, filter)?;
            let mut records = ids
                .iter()
                .map(|id| mapping::get(session, &self.mapper, schema, id))
                .collect::<RepositoryResult<Vec<_>>>()?;
            schema.sort_records(&mut records)?;
            Ok(records)
        })
    }
}

fn apply(session: &mut Session<'_>, mapper: &Mapper, changes: &[Change]) -> RepositoryResult<()> {
    for change in changes {
        match change {
            Change::Add { schema, record } => mapping::write(session, mapper, schema, record.clone())?,
            Change::Remove { schema, id } => mapping::remove(session, mapper, schema, id)?,
        }
    }
    Ok(())
}

impl Repository for SqliteRepository {
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
        let runtime = &self.runtime;
        let conn = self.connection.get_mut().map_err(|_| RepositoryError::poisoned())?;
        self.ids.assign_graph(&self.mapper, schema, &mut record, &mut |s| {
            mapping::max_id(&mut Session::new(runtime, &mut *conn), s)
        })?;

        self.staged.push(Change::Add {
            schema,
            record: record.clone(),
        });
        debug!(staged = self.staged.len(), "Staged entity");
        Ok(record)
    }

    #[instrument(skip(self, schema), fields(entity = schema.type_name()), err)]
    fn get_record(&self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<Record> {
        self.with_session(|session| mapping::get(session, &self.mapper, schema, id))
    }

    #[instrument(skip(self, schema), fields(entity = schema.type_name()), err)]
    fn delete_record(&mut self, schema: &'static EntitySchema, id: &EntityId) -> RepositoryResult<()> {
        if let Err(e) = self.get_record(schema, id) {
            return Err(RepositoryError::undeletable(schema, id, e));
        }
        self.staged.push(Change::Remove {
            schema,
            id: id.clone(),
        });
        Ok(())
    }

    fn all_records(&self, schema: &'static EntitySchema) -> RepositoryResult<Vec<Record>> {
        let records = self.load(schema, None)?;
        if records.is_empty() {
            return Err(RepositoryError::empty_table(schema));
        }
        Ok(records)
    }

    fn search_records(
        &self,
        schema: &'static EntitySchema,
        filter: &SearchFilter,
    ) -> RepositoryResult<Vec<Record>> {
        let records = self.load(schema, Some(filter))?;
        if records.is_empty() {
            return Err(RepositoryError::no_match(schema, filter));
        }
        Ok(records)
    }

    fn last_record(
        &self,
        schema: &'static EntitySchema,
        committed_only: bool,
    ) -> RepositoryResult<Record> {
        let mut records = self.load(schema, None)?;

        if !committed_only {
            for change in &self.staged {
                match change {
                    Change::Add { schema: staged, record } if *staged == schema => {
                        let id = schema.id_of(record)?;
                        records.retain(|r| schema.id_of(r).ok().as_ref() != Some(&id));
                        records.push(record.clone());
                    }
                    Change::Remove { schema: staged, id } if *staged == schema => {
                        records.retain(|r| schema.id_of(r).ok().as_ref() != Some(id));
                    }
                    _ => {}
                }
            }
            schema.sort_records(&mut records)?;
        }

        records.pop().ok_or_else(|| RepositoryError::empty_table(schema))
    }

    #[instrument(skip(self), err)]
    fn commit(&mut self) -> RepositoryResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let runtime = &self.runtime;
        let conn = self.connection.get_mut().map_err(|_| RepositoryError::poisoned())?;
        let mut tx = runtime.block_on(conn.begin())?;

        let outcome = apply(&mut Session::new(runtime, &mut *tx), &self.mapper, &self.staged);
        if let Err(e) = outcome {
            error!(error = %e, "Failed to apply staged changes, rolling back");
            if let Err(rollback) = runtime.block_on(tx.rollback()) {
                error!(error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
        runtime.block_on(tx.commit())?;

        debug!(changes = self.staged.len(), "Committed staged changes");
        self.staged.clear();
        self.ids.reset();
        Ok(())
    }

    #[instrument(skip(self), fields(directory = %directory.display()), err)]
    fn apply_migrations(&mut self, directory: &Path) -> RepositoryResult<()> {
        let conn = self.connection.get_mut().map_err(|_| RepositoryError::poisoned())?;
        let mut runner = SqliteMigrationRunner::new(&self.runtime, conn);
        run_migrations(&mut runner, directory)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use repograph_core::{Entity, Relationship};

    use super::*;
    use crate::repository::RepositoryExt;

    repograph_core::entity! {
        struct Book {
            id: i64,
            title: String,
            rating: Option<f64>,
            signed: bool,
        }
    }

    repograph_core::entity! {
        struct Shelf {
            id: i64,
            label: String,
            #[serde(default)]
            books: Vec<Book>,
        }
    }

    const SCHEMA: &str = "
        CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT NOT NULL, rating REAL, signed INTEGER NOT NULL);
        CREATE TABLE shelf (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
        CREATE TABLE shelf_book_relationship (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shelf_id INTEGER NOT NULL REFERENCES shelf (id),
            book_id INTEGER NOT NULL REFERENCES book (id),
            UNIQUE (shelf_id, book_id)
        );
    ";

    fn repo() -> SqliteRepository {
        let mapper = Mapper::new(vec![Relationship::multiple_composition::<Shelf, Book>().unwrap()]);
        let repo = SqliteRepository::in_memory(mapper).unwrap();
        repo.with_session(|session| {
            for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
                session.execute(&Statement::new(statement))?;
            }
            Ok(())
        })
        .unwrap();
        repo
    }

    fn book(id: i64, title: &str) -> Book {
        Book {
            id,
            title: title.into(),
            rating: None,
            signed: false,
        }
    }

    #[test]
    fn missing_database_file_is_a_connection_error() {
        let err = SqliteRepository::new("sqlite:///definitely/not/here.db", Mapper::default()).unwrap_err();
        assert!(err.is_connection());
        assert_eq!(err.to_string(), "There is no database file: /definitely/not/here.db");
    }

    #[test]
    fn values_keep_their_kinds() {
        let mut repo = repo();
        repo.add(&Book {
            id: 1,
            title: "Dune".into(),
            rating: Some(4.5),
            signed: true,
        })
        .unwrap();
        repo.commit().unwrap();

        let stored: Book = repo.get(1).unwrap();
        assert_eq!(stored.rating, Some(4.5));
        assert!(stored.signed);
        assert_eq!(repo.staged_len(), 0);
    }

    #[test]
    fn adds_are_invisible_until_commit() {
        let mut repo = repo();
        repo.add(&book(1, "a")).unwrap();
        assert!(repo.get::<Book>(1).unwrap_err().is_not_found());
        assert_eq!(repo.last::<Book>(false).unwrap().id, 1);
        assert!(repo.last::<Book>(true).unwrap_err().is_not_found());

        repo.commit().unwrap();
        assert_eq!(repo.get::<Book>(1).unwrap().title, "a");
    }

    #[test]
    fn failed_commit_keeps_staging() {
        let mut repo = repo();
        repo.add(&book(1, "a")).unwrap();
        repo.add(&Shelf {
            id: 1,
            label: "top".into(),
            books: Vec::new(),
        })
        .unwrap();
        repo.with_session(|session| session.execute(&Statement::new("DROP TABLE shelf")))
            .unwrap();

        assert!(repo.commit().is_err());
        assert_eq!(repo.staged_len(), 2);
        assert!(repo.get::<Book>(1).unwrap_err().is_not_found());
    }

    #[test]
    fn list_links_follow_the_attribute() {
        let mut repo = repo();
        repo.add(&Shelf {
            id: 1,
            label: "top".into(),
            books: vec![book(1, "a"), book(2, "b")],
        })
        .unwrap();
        repo.commit().unwrap();

        let mut shelf: Shelf = repo.get(1).unwrap();
        assert_eq!(shelf.books.len(), 2);

        shelf.books.remove(0);
        repo.add(&shelf).unwrap();
        repo.commit().unwrap();

        let shelf: Shelf = repo.get(1).unwrap();
        assert_eq!(shelf.books, vec![book(2, "b")]);
        assert_eq!(repo.all::<Book>().unwrap().len(), 2);
    }

    #[test]
    fn contains_search_is_case_sensitive_and_literal() {
        let mut repo = repo();
        repo.add(&book(1, "Dune")).unwrap();
        repo.add(&book(2, "dune 100%")).unwrap();
        repo.commit().unwrap();

        let found: Vec<Book> = repo.search(&SearchFilter::new().contains("title", "Du")).unwrap();
        assert_eq!(found.len(), 1);
        let found: Vec<Book> = repo.search(&SearchFilter::new().contains("title", "0%")).unwrap();
        assert_eq!(found[0].id, 2);
        assert!(repo
            .search::<Book>(&SearchFilter::new().contains("title", "_"))
            .unwrap_err()
            .is_not_found());
        assert!(repo
            .search::<Book>(&SearchFilter::new().eq("colour", "red"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn unassigned_ids_start_after_the_stored_maximum() {
        let mut repo = repo();
        assert_eq!(repo.add(&book(-1, "a")).unwrap().id, 0);
        repo.commit().unwrap();
        assert_eq!(repo.add(&book(-1, "b")).unwrap().id, 1);
        assert_eq!(repo.add(&book(-1, "c")).unwrap().id, 2);
        assert_eq!(Book::schema().class_name(), "book");
    }
}
