//! Shared type definitions for the Hearth game-state bus.
//!
//! This crate is the single source of truth for the data that flows
//! between resolvers, the ID buffer, listeners, the event queue and the
//! stores.
//!
//! # Modules
//!
//! - [`game_id`] -- Validated dot-separated Game IDs
//! - [`value`] -- The [`GameValue`] tree carried over the bus
//! - [`command`] -- Update command kinds
//! - [`effect`] -- Data-described effects
//! - [`event`] -- Persistence layout of scheduled events
//! - [`listener`] -- Persisted player listener records
//! - [`ids`] -- Type-safe identifier wrappers

pub mod command;
pub mod effect;
pub mod event;
pub mod game_id;
pub mod ids;
pub mod listener;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use command::UpdateCommand;
pub use effect::EffectData;
pub use event::{EventRecord, PERIODIC_EVENT_TYPE};
pub use game_id::{GameId, GameIdError};
pub use ids::{EventId, PlayerId};
pub use listener::{PLAYER_LISTENERS_FIELD, PlayerListenerRecord};
pub use value::GameValue;
