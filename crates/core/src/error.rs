//! Model error types.

use thiserror::Error;

/// Result type used by the entity model.
pub type ModelResult<T> = Result<T, ModelError>;

/// Model-level error.
///
/// Covers mistakes in entity or relationship declarations and records that do
/// not fit their schema. Storage failures live in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A relationship or schema was declared with invalid settings.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Two identifiers of different kinds were compared.
    #[error("can't compare identifiers of different kinds: {left} ({left_kind}) and {right} ({right_kind})")]
    IncompatibleIds {
        left: String,
        left_kind: &'static str,
        right: String,
        right_kind: &'static str,
    },

    /// A record could not be converted to or from its entity.
    #[error("invalid {entity} record: {detail}")]
    InvalidRecord { entity: String, detail: String },
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_record(entity: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidRecord {
            entity: entity.into(),
            detail: detail.into(),
        }
    }
}
