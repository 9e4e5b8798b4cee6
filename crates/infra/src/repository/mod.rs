//! Repository boundary and its storage backends.
//!
//! Every backend implements [`Repository`] with the same staging semantics:
//!
//! - [`MemoryRepository`]: process-local maps, for tests and development.
//! - [`SqliteRepository`]: relational storage, entities decomposed into tables.
//! - [`DocumentRepository`]: a single JSON document file.

pub mod document;
pub mod filter;
pub mod ids;
pub mod memory;
pub mod sql;
pub mod r#trait;

pub use document::DocumentRepository;
pub use filter::{Criterion, MatchMode, SearchFilter};
pub use ids::IdAllocator;
pub use memory::MemoryRepository;
pub use sql::SqliteRepository;
pub use r#trait::{Repository, RepositoryExt};
