//! Configuration loading and backend selection.
//!
//! A repository is chosen by its database url:
//!
//! | url                          | backend                   |
//! |------------------------------|---------------------------|
//! | `fake://<name>`, `memory://` | [`MemoryRepository`]      |
//! | `sqlite:///<path>`           | [`SqliteRepository`]      |
//! | `sqlite://:memory:`          | in-memory SQLite          |
//! | `tinydb:///<path>`           | [`DocumentRepository`]    |

use core::fmt;
use core::str::FromStr;
use std::path::PathBuf;

use repograph_core::Mapper;
use tracing::warn;

use crate::error::{RepositoryError, RepositoryResult};
use crate::repository::memory::DEFAULT_URL;
use crate::repository::{DocumentRepository, MemoryRepository, Repository, SqliteRepository};

/// Environment variable holding the database url.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Storage backend addressed by a database url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory { name: String },
    Sqlite { path: PathBuf },
    SqliteMemory,
    Document { path: PathBuf },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory { .. } => "in-memory",
            Backend::Sqlite { .. } | Backend::SqliteMemory => "sqlite",
            Backend::Document { .. } => "document",
        }
    }
}

/// A parsed database url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    raw: String,
    backend: Backend,
}

impl DatabaseUrl {
    /// Parse `raw`, failing with a connection error when it names no known
    /// backend.
    pub fn parse(raw: &str) -> RepositoryResult<Self> {
        let (scheme, rest) = raw.split_once("://").ok_or_else(|| {
            RepositoryError::connection(format!("{raw} is not a valid database url"))
        })?;

        let backend = match scheme {
            "fake" | "memory" => Backend::Memory {
                name: rest.to_owned(),
            },
            "sqlite" => match rest {
                ":memory:" | "/:memory:" => Backend::SqliteMemory,
                "" => return Err(missing_path(raw)),
                path => Backend::Sqlite { path: path.into() },
            },
            "tinydb" | "json" => match rest {
                "" => return Err(missing_path(raw)),
                path => Backend::Document { path: path.into() },
            },
            other => {
                return Err(RepositoryError::connection(format!(
                    "{raw} uses the unsupported scheme {other}"
                )));
            }
        };

        Ok(Self {
            raw: raw.to_owned(),
            backend,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn missing_path(raw: &str) -> RepositoryError {
    RepositoryError::connection(format!("{raw} doesn't name a database file"))
}

impl FromStr for DatabaseUrl {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Repository settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub database_url: String,
}

impl RepositoryConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Read the database url from `DATABASE_URL`, falling back to the
    /// in-memory backend.
    pub fn from_env() -> Self {
        let database_url = std::env::var(DATABASE_URL_ENV).unwrap_or_else(|_| {
            warn!("{DATABASE_URL_ENV} not set; using the in-memory repository");
            DEFAULT_URL.to_owned()
        });
        Self { database_url }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

/// Open the repository the configured url points to.
pub fn open_repository(config: &RepositoryConfig, mapper: Mapper) -> RepositoryResult<Box<dyn Repository>> {
    let url = DatabaseUrl::parse(&config.database_url)?;
    let repository: Box<dyn Repository> = match url.backend() {
        Backend::Memory { .. } => Box::new(MemoryRepository::new(url.as_str(), mapper)?),
        Backend::Sqlite { .. } | Backend::SqliteMemory => {
            Box::new(SqliteRepository::new(url.as_str(), mapper)?)
        }
        Backend::Document { .. } => Box::new(DocumentRepository::new(url.as_str(), mapper)?),
    };
    Ok(repository)
}
