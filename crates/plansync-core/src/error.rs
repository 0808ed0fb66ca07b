//! Error types for plansync core types.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while parsing or validating core types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Plan identifier not recognised.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// Stored status value not recognised.
    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
