//! Error types for the server binary.
//!
//! [`ServerError`] is the top-level error type that wraps all possible
//! failure modes during startup and shutdown.

/// Top-level error for the server binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: hearth_core::config::ConfigError,
    },

    /// Database connection or migration failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: hearth_db::DbError,
    },

    /// A resolver, listener or effect could not be registered.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: hearth_core::error::RegistryError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The scheduler task ended abnormally.
    #[error("scheduler task failed: {source}")]
    Scheduler {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },
}
