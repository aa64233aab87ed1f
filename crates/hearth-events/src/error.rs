//! Error types for event handling.

use hearth_core::error::{CoreError, EffectError, RegistryError, StoreError};
use hearth_types::{EventId, PlayerId};

/// Errors raised while creating, executing or persisting events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event's target player no longer exists.
    #[error("event {event_id} targets unknown player `{target}`")]
    TargetMissing {
        /// The event.
        event_id: EventId,
        /// The missing player.
        target: PlayerId,
    },

    /// One of the event's effects failed.
    #[error("event {event_id} failed: {source}")]
    Execution {
        /// The event.
        event_id: EventId,
        /// The underlying failure.
        source: CoreError,
    },

    /// An effect handler panicked while the event was executing.
    #[error("event {event_id} panicked: {message}")]
    Panicked {
        /// The event.
        event_id: EventId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The event store failed.
    #[error("event store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A periodic interval of zero seconds was requested.
    #[error("periodic type `{periodic_type}` needs an interval of at least one second")]
    InvalidInterval {
        /// The periodic type.
        periodic_type: String,
    },

    /// No handler is registered for the periodic type.
    #[error("unknown periodic type `{name}`")]
    UnknownPeriodicType {
        /// The requested type.
        name: String,
    },

    /// A record without periodic fields was treated as periodic.
    #[error("event {event_id} is not a periodic event")]
    NotPeriodic {
        /// The event.
        event_id: EventId,
    },

    /// A boot-time registration failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registration error.
        #[from]
        source: RegistryError,
    },
}

impl From<EventError> for CoreError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Execution { source, .. } => source,
            EventError::Store { source } => Self::Store { source },
            other => Self::Effect {
                source: EffectError::Failed {
                    kind: "periodic_event".to_owned(),
                    message: other.to_string(),
                },
            },
        }
    }
}
