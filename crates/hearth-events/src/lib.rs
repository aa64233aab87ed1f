//! Durable delayed work for Hearth.
//!
//! An [`Event`](event::Event) is a persisted bundle of effects that fires
//! against one player once its due time passes. Periodic events are the
//! locked variant that reschedule themselves after each firing. The
//! [`EventScheduler`](scheduler::EventScheduler) polls the
//! [`EventStore`](store::EventStore) and executes whatever is due on the
//! shared [`GameBus`](hearth_core::GameBus).

pub mod error;
pub mod event;
pub mod periodic;
pub mod resolver;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use hearth_core::bus::BusBuilder;
use hearth_core::error::RegistryError;

pub use error::EventError;
pub use event::Event;
pub use periodic::{PeriodicEvent, PeriodicHandler, PeriodicRegistry};
pub use scheduler::EventScheduler;
pub use store::{EventStore, MemoryEventStore};

/// Register the `event` resolver and the periodic effects on `builder`.
///
/// # Errors
///
/// Fails if the prefix or one of the effect kinds is already taken.
pub fn install(
    builder: &mut BusBuilder,
    periodic: &Arc<PeriodicRegistry>,
    events: &Arc<dyn EventStore>,
) -> Result<(), RegistryError> {
    resolver::install(builder, events)?;
    periodic::install(builder, periodic, events)
}
