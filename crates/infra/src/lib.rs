//! Storage layer: the repository contract, its backends, migrations and
//! backend selection.

pub mod config;
pub mod error;
pub mod migrations;
pub mod repository;

pub use config::{Backend, DatabaseUrl, RepositoryConfig, open_repository};
pub use error::{RepositoryError, RepositoryResult};
pub use migrations::{MigrationError, MigrationRunner, SqliteMigrationRunner, run_migrations};
pub use repository::{
    DocumentRepository, MatchMode, MemoryRepository, Repository, RepositoryExt, SearchFilter,
    SqliteRepository,
};
