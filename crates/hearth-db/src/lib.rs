//! `PostgreSQL` persistence for Hearth.
//!
//! [`PgStore`] implements both store contracts of the bus: player and
//! statistics documents for the `data`/`stat` resolvers, and the event
//! queue polled by the scheduler.
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration and the sync bridge
//! - [`document_store`] -- `players` and `player_statistics` tables
//! - [`event_store`] -- The `events` table
//! - [`error`] -- Shared error types

pub mod document_store;
pub mod error;
pub mod event_store;
pub mod postgres;

pub use error::DbError;
pub use postgres::{PgStore, PostgresConfig, PostgresPool};
