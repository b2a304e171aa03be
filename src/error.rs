use thiserror::Error as ThisError;

/// Errors raised by the form kernel.
///
/// Validation failures are not errors: they are carried as data in
/// [`ValidationOutcome`](crate::ValidationOutcome). Stale or superseded save
/// responses are not errors either, see [`SaveOutcome`](crate::SaveOutcome).
#[derive(Debug, ThisError)]
pub enum Error {
    /// The requested field is not declared on the entity's schema
    #[error("Field not found for entity type {entity_type}: {field}")]
    FieldNotFound { entity_type: String, field: String },

    #[error("Invalid field path: {0:?}")]
    InvalidFieldPath(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A typed path write could not be applied to the entity
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No working instance loaded")]
    NoWorkingInstance,

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// The persistence boundary reported a failure
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    pub fn field_not_found(entity_type: impl Into<String>, field: impl Into<String>) -> Self {
        Error::FieldNotFound {
            entity_type: entity_type.into(),
            field: field.into(),
        }
    }

    pub fn is_field_not_found(&self) -> bool {
        matches!(self, Error::FieldNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
