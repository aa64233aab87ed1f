//! Registry boot: one place that wires resolvers, effects and the event
//! subsystem onto a bus.
//!
//! Registration happens once before the scheduler starts; after
//! [`Services::build`] returns, the registries are read-only.

use std::sync::Arc;

use hearth_core::config::CoreConfig;
use hearth_core::store::DocumentStore;
use hearth_core::{GameBus, effect, resolvers};
use hearth_events::{EventScheduler, EventStore, PeriodicRegistry};
use tracing::info;

use crate::error::ServerError;

/// The booted bus and the stores it runs on.
pub struct Services {
    /// The shared bus every unit of work is opened on.
    pub bus: Arc<GameBus>,
    /// The event queue.
    pub events: Arc<dyn EventStore>,
}

impl Services {
    /// Register the standard resolvers, built-in effects and the event
    /// subsystem, then freeze the bus.
    pub fn build(
        documents: Arc<dyn DocumentStore>,
        events: Arc<dyn EventStore>,
        periodic: PeriodicRegistry,
        config: &CoreConfig,
    ) -> Result<Self, ServerError> {
        let periodic = Arc::new(periodic);
        let mut builder = GameBus::builder(documents);
        builder.set_config(config.dispatch);
        resolvers::install(&mut builder)?;
        effect::install(&mut builder)?;
        hearth_events::install(&mut builder, &periodic, &events)?;
        let bus = builder.build()?;

        info!(
            prefixes = ?bus.resolvers().prefixes(),
            periodic_types = ?periodic,
            max_listener_depth = config.dispatch.max_listener_depth,
            "Bus registries frozen"
        );
        Ok(Self {
            bus: Arc::new(bus),
            events,
        })
    }

    /// A scheduler polling this bus's event queue.
    pub fn scheduler(&self, config: &CoreConfig) -> EventScheduler {
        EventScheduler::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.events),
            config.scheduler.clone(),
        )
    }
}
