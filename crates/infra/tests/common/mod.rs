//! Entities and repositories shared by the integration tests.

#![allow(dead_code)]

mod tester;

pub use tester::SqliteTester;

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use repograph_core::Mapper;
use repograph_infra::{DocumentRepository, MemoryRepository, Repository, SqliteRepository};
use tempfile::TempDir;

repograph_core::entity! {
    pub struct Author {
        pub id: String,
        pub first_name: String,
        pub last_name: String,
        pub country: String,
        #[serde(default)]
        pub books: Vec<Book>,
    }
}

repograph_core::entity! {
    pub struct Book {
        pub id: i64,
        pub title: String,
        pub summary: String,
        pub released: DateTime<Utc>,
    }
}

repograph_core::entity! {
    pub struct Genre {
        pub id: i64,
        pub name: String,
        pub description: Option<String>,
    }
}

repograph_core::entity! {
    /// Author with an extra attribute, stored through an extension of
    /// [`Author`].
    pub struct ExtendingEntity {
        pub id: String,
        pub first_name: String,
        pub last_name: String,
        pub country: String,
        pub style: String,
    }
}

repograph_core::entity! {
    pub struct ComposingEntity {
        pub id: i64,
        pub name: String,
        pub book: Option<Book>,
    }
}

repograph_core::entity! {
    pub struct MultipleComposingEntity {
        pub id: i64,
        pub name: String,
        #[serde(default)]
        pub books: Vec<Book>,
    }
}

repograph_core::entity! {
    pub struct Animal {
        pub id: i64,
        pub name: String,
    }
}

repograph_core::entity! {
    /// Integer-id type extending [`Animal`].
    pub struct Dog {
        pub id: i64,
        pub name: String,
        pub breed: String,
    }
}

pub fn author(id: &str, first_name: &str) -> Author {
    Author {
        id: id.into(),
        first_name: first_name.into(),
        last_name: "Doe".into(),
        country: "Spain".into(),
        books: Vec::new(),
    }
}

pub fn book(id: i64, title: &str) -> Book {
    Book {
        id,
        title: title.into(),
        summary: format!("Summary of {title}"),
        released: Utc.with_ymd_and_hms(2001, 4, 12, 10, 30, 0).unwrap(),
    }
}

pub fn genre(id: i64, name: &str) -> Genre {
    Genre {
        id,
        name: name.into(),
        description: None,
    }
}

pub fn extending(id: &str, first_name: &str) -> ExtendingEntity {
    ExtendingEntity {
        id: id.into(),
        first_name: first_name.into(),
        last_name: "Doe".into(),
        country: "Spain".into(),
        style: "modern".into(),
    }
}

pub fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("migrations")
}

/// A repository under test, with the directory holding its files.
pub struct Backend {
    pub name: &'static str,
    pub repo: Box<dyn Repository>,
    pub dir: TempDir,
}

impl Backend {
    pub fn memory(mapper: Mapper) -> Self {
        Self {
            name: "memory",
            repo: Box::new(MemoryRepository::in_memory(mapper)),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// SQLite database file with the test schema applied.
    pub fn sqlite(mapper: Mapper) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repository.db");
        std::fs::File::create(&path).unwrap();

        let mut repo = SqliteRepository::new(format!("sqlite://{}", path.display()), mapper).unwrap();
        repo.apply_migrations(&migrations_dir()).unwrap();
        Self {
            name: "sqlite",
            repo: Box::new(repo),
            dir,
        }
    }

    pub fn document(mapper: Mapper) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("tinydb://{}", dir.path().join("repository.json").display());
        Self {
            name: "document",
            repo: Box::new(DocumentRepository::new(url, mapper).unwrap()),
            dir,
        }
    }

    /// Raw table access for the sqlite backend.
    pub fn tester(&self) -> Option<SqliteTester> {
        (self.name == "sqlite").then(|| SqliteTester::open(&self.dir.path().join("repository.db")))
    }

    /// Open a second repository on the same storage.
    pub fn reopen(&self, mapper: Mapper) -> Box<dyn Repository> {
        match self.name {
            "sqlite" => Box::new(SqliteRepository::new(self.repo.database_url(), mapper).unwrap()),
            "document" => Box::new(DocumentRepository::new(self.repo.database_url(), mapper).unwrap()),
            _ => Box::new(MemoryRepository::new(self.repo.database_url(), mapper).unwrap()),
        }
    }
}

/// Every backend.
pub fn all_backends(mapper: &Mapper) -> Vec<Backend> {
    vec![
        Backend::memory(mapper.clone()),
        Backend::sqlite(mapper.clone()),
        Backend::document(mapper.clone()),
    ]
}

/// Backends that decompose relationships.
pub fn relational_backends(mapper: &Mapper) -> Vec<Backend> {
    vec![Backend::memory(mapper.clone()), Backend::sqlite(mapper.clone())]
}
