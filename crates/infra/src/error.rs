//! Repository error model.

use repograph_core::{EntityId, EntitySchema, ModelError};
use thiserror::Error;

use crate::migrations::MigrationError;
use crate::repository::SearchFilter;

/// Result type used by repositories.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository-level error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity (or entities) is not stored.
    #[error("{message}")]
    EntityNotFound {
        message: String,
        #[source]
        source: Option<Box<RepositoryError>>,
    },

    /// The backend could not be reached or the database url is unusable.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<RepositoryError>>,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    /// The repository could not assign an id to a new entity.
    #[error("auto increment failed: {0}")]
    AutoIncrement(String),

    /// The backend does not implement the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal failure (poisoned lock, runtime startup).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl RepositoryError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::EntityNotFound {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_from(message: impl Into<String>, source: impl Into<RepositoryError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source.into())),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub(crate) fn missing_id(schema: &EntitySchema, id: &EntityId) -> Self {
        Self::not_found(format!(
            "There are no {}s with id {id} in the repository.",
            schema.type_name()
        ))
    }

    pub(crate) fn empty_table(schema: &EntitySchema) -> Self {
        Self::not_found(format!(
            "There are no {}s entities in the repository",
            schema.type_name()
        ))
    }

    pub(crate) fn no_match(schema: &EntitySchema, filter: &SearchFilter) -> Self {
        Self::not_found(format!(
            "There are no {}s that match the search filter {filter}",
            schema.type_name()
        ))
    }

    pub(crate) fn unknown_field(schema: &EntitySchema, field: &str) -> Self {
        Self::not_found(format!(
            "There are no {}s with the attribute {field} in the repository",
            schema.type_name()
        ))
    }

    pub(crate) fn extended_elsewhere(
        schema: &EntitySchema,
        extending: &EntitySchema,
        id: &EntityId,
    ) -> Self {
        Self::not_found(format!(
            "Entity with ID {id} is of type {} instead of {}",
            extending.type_name(),
            schema.type_name()
        ))
    }

    /// Wrap a lookup failure that prevented a delete.
    pub(crate) fn undeletable(schema: &EntitySchema, id: &EntityId, source: RepositoryError) -> Self {
        Self::EntityNotFound {
            message: format!(
                "Unable to delete entity {} with id {id} because it's not in the repository",
                schema.type_name()
            ),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Runtime("lock poisoned".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn undeletable_keeps_the_lookup_error() {
        let schema = EntitySchema::new("Book", Vec::new());
        let id = EntityId::from(3);
        let err = RepositoryError::undeletable(&schema, &id, RepositoryError::missing_id(&schema, &id));

        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Unable to delete entity Book with id 3 because it's not in the repository"
        );
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("There are no Books with id 3 in the repository.".to_string())
        );
    }

    #[test]
    fn connection_errors_are_classified() {
        let err = RepositoryError::connection_from(
            "can't open the database",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_connection());
        assert!(!err.is_not_found());
    }
}
