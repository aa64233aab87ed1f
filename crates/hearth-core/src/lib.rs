//! Game-ID bus core for Hearth.
//!
//! Gameplay code reads and writes all state through dot-separated Game
//! IDs. This crate resolves those ids to pluggable handlers, memoizes the
//! results for one unit of work, and propagates every change to global and
//! player-scoped listeners.
//!
//! # Modules
//!
//! - [`buffer`] -- Unit-scoped ID buffer with dynamic (split) invalidation.
//! - [`registry`] -- Boot-time prefix-to-resolver registry and the
//!   resolver traits.
//! - [`bus`] -- [`GameBus`] and the per-unit get/update pipeline with
//!   deferred listener dispatch.
//! - [`listener`] -- Global pattern listeners.
//! - [`effect`] -- Effect handler registry and built-in effects.
//! - [`store`] -- [`DocumentStore`] contract and [`MemoryStore`].
//! - [`resolvers`] -- The standard `data` and `stat` resolvers.
//! - [`config`] -- Configuration loading from `hearth-config.yaml`.
//! - [`error`] -- Error taxonomy.
//!
//! [`GameBus`]: bus::GameBus
//! [`DocumentStore`]: store::DocumentStore
//! [`MemoryStore`]: store::MemoryStore

pub mod buffer;
pub mod bus;
pub mod config;
pub mod effect;
pub mod error;
pub mod listener;
pub mod registry;
pub mod resolvers;
pub mod store;

pub use bus::{BusBuilder, GameBus, Unit};
pub use error::CoreError;
