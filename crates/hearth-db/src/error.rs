//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors. At the store trait seam a [`DbError`] becomes a
//! [`StoreError`] so the bus and the scheduler never see backend types.

use hearth_core::error::StoreError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A document operation was refused by the shared command semantics.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Store(inner) => inner,
            DbError::Serialization(source) => Self::Serialization { source },
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}
