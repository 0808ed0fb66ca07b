//! Error types for plansync storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A unique key already exists.
    #[error("{entity} already exists: {key}")]
    Duplicate {
        /// Kind of record.
        entity: &'static str,
        /// Conflicting key.
        key: String,
    },

    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<plansync_core::CoreError> for StoreError {
    fn from(err: plansync_core::CoreError) -> Self {
        Self::Serialization(err.to_string())
    }
}
