//! Periodic events: self-rescheduling events driven by a registered type.
//!
//! A periodic event is a locked event whose only effect is
//! `periodic_exec`. Each firing runs the handler registered for its
//! `periodic_type` and then moves `due_time` to `now + interval`. A handler
//! stops the cycle with [`PeriodicEvent::cancel_self`]; the unlocked record
//! is removed by the scheduler on its next firing without running the
//! handler again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use hearth_core::Unit;
use hearth_core::bus::BusBuilder;
use hearth_core::effect::{EffectContext, EffectHandler};
use hearth_core::error::{CoreError, EffectError, RegistryError};
use hearth_types::{EffectData, EventRecord, PERIODIC_EVENT_TYPE, PlayerId};
use tracing::{debug, info};

use crate::error::EventError;
use crate::event::Event;
use crate::store::EventStore;

/// Effect kind that runs a periodic event's handler.
pub const PERIODIC_EXEC: &str = "periodic_exec";

/// Effect kind that attaches a periodic event to the target.
pub const START_PERIODIC: &str = "start_periodic";

/// Seconds between firings when a type is registered without an interval.
pub const DEFAULT_INTERVAL_SECS: u64 = 1200;

/// Logic of one periodic type.
pub trait PeriodicHandler: Send + Sync {
    /// Run one firing. The handler may read and write `event_data`,
    /// change the interval, or cancel the event.
    fn run(&self, unit: &mut Unit<'_>, event: &mut PeriodicEvent) -> Result<(), CoreError>;
}

struct PeriodicType {
    default_interval: u64,
    handler: Box<dyn PeriodicHandler>,
}

/// Boot-time table of periodic types.
#[derive(Default)]
pub struct PeriodicRegistry {
    types: HashMap<String, PeriodicType>,
}

impl PeriodicRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with its default interval in seconds.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name or a zero interval.
    pub fn register(
        &mut self,
        name: &str,
        default_interval: u64,
        handler: impl PeriodicHandler + 'static,
    ) -> Result<(), EventError> {
        if default_interval == 0 {
            return Err(EventError::InvalidInterval {
                periodic_type: name.to_owned(),
            });
        }
        if self.types.contains_key(name) {
            return Err(RegistryError::DuplicatePeriodicType {
                name: name.to_owned(),
            }
            .into());
        }
        self.types.insert(
            name.to_owned(),
            PeriodicType {
                default_interval,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Default interval of `name`.
    pub fn default_interval(&self, name: &str) -> Option<u64> {
        self.types.get(name).map(|t| t.default_interval)
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    fn handler(&self, name: &str) -> Result<&dyn PeriodicHandler, EventError> {
        match self.types.get(name) {
            Some(periodic) => Ok(periodic.handler.as_ref()),
            None => Err(EventError::UnknownPeriodicType {
                name: name.to_owned(),
            }),
        }
    }
}

impl std::fmt::Debug for PeriodicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort_unstable();
        f.debug_struct("PeriodicRegistry")
            .field("types", &names)
            .finish()
    }
}

/// `now + seconds`, or `None` if out of range.
pub fn advance(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(seconds).ok()?;
    now.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

/// An [`Event`] that reschedules itself every `interval` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicEvent {
    event: Event,
    periodic_type: String,
    interval: u64,
}

impl PeriodicEvent {
    /// A fresh, unscheduled periodic event of `periodic_type` for `target`,
    /// using the type's default interval.
    ///
    /// # Errors
    ///
    /// [`EventError::UnknownPeriodicType`] if the type is not registered.
    pub fn for_player(
        registry: &PeriodicRegistry,
        target: PlayerId,
        periodic_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let interval =
            registry
                .default_interval(periodic_type)
                .ok_or_else(|| EventError::UnknownPeriodicType {
                    name: periodic_type.to_owned(),
                })?;
        let mut record = EventRecord::new(target, PERIODIC_EVENT_TYPE, now);
        record.effect = vec![EffectData::new(PERIODIC_EXEC).with("periodic_type", periodic_type)];
        record.locked = true;
        record.periodic_type = Some(periodic_type.to_owned());
        record.interval = Some(interval);
        Ok(Self {
            event: Event::from_record(record),
            periodic_type: periodic_type.to_owned(),
            interval,
        })
    }

    /// View a stored event as periodic.
    ///
    /// # Errors
    ///
    /// [`EventError::NotPeriodic`] if the record lacks its periodic type or
    /// interval.
    pub fn from_event(event: Event) -> Result<Self, EventError> {
        let record = event.record();
        match (record.periodic_type.clone(), record.interval) {
            (Some(periodic_type), Some(interval)) => Ok(Self {
                event,
                periodic_type,
                interval,
            }),
            _ => Err(EventError::NotPeriodic {
                event_id: record.event_id,
            }),
        }
    }

    /// The periodic type.
    pub fn periodic_type(&self) -> &str {
        &self.periodic_type
    }

    /// Seconds between firings.
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Change the interval. Takes effect at the next reschedule.
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidInterval`] for zero.
    pub fn set_interval(&mut self, seconds: u64) -> Result<(), EventError> {
        if seconds == 0 {
            return Err(EventError::InvalidInterval {
                periodic_type: self.periodic_type.clone(),
            });
        }
        self.interval = seconds;
        self.event.record_mut().interval = Some(seconds);
        Ok(())
    }

    /// Stop the cycle: the next firing removes the event.
    pub const fn cancel_self(&mut self) {
        self.event.record_mut().locked = false;
    }

    /// True once [`PeriodicEvent::cancel_self`] was called.
    pub const fn is_cancelled(&self) -> bool {
        !self.event.is_locked()
    }

    /// Set `due_time = now + interval` and persist (inserting if new).
    pub fn reschedule_self(
        &mut self,
        store: &dyn EventStore,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        let due = advance(now, self.interval).ok_or_else(|| EventError::InvalidInterval {
            periodic_type: self.periodic_type.clone(),
        })?;
        self.event.set_due_time(due);
        if self.event.record().since.is_none() {
            self.event.record_mut().since = Some(now);
        }
        self.event.update_store(store)?;
        Ok(())
    }

    /// The wrapped event.
    pub const fn event(&self) -> &Event {
        &self.event
    }

    /// Mutable access to the wrapped event (`event_data` and friends).
    pub const fn event_mut(&mut self) -> &mut Event {
        &mut self.event
    }
}

fn periodic_type_field(effect: &EffectData) -> Result<&str, EffectError> {
    effect
        .str_field("periodic_type")
        .ok_or_else(|| EffectError::MissingField {
            kind: effect.kind.clone(),
            field: "periodic_type".to_owned(),
        })
}

/// `periodic_exec`: run the handler of the target's periodic event of
/// `periodic_type`, then reschedule it or persist its cancellation.
pub struct PeriodicExec {
    registry: Arc<PeriodicRegistry>,
    events: Arc<dyn EventStore>,
}

impl EffectHandler for PeriodicExec {
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let periodic_type = periodic_type_field(effect)?;
        let handler = self.registry.handler(periodic_type)?;
        let record = self
            .events
            .find_periodic(unit.target(), periodic_type)?
            .ok_or_else(|| EffectError::Failed {
                kind: effect.kind.clone(),
                message: format!("no `{periodic_type}` event for {}", unit.target()),
            })?;
        let mut periodic = PeriodicEvent::from_event(Event::from_record(record))?;
        if periodic.is_cancelled() {
            return Ok(());
        }

        handler.run(unit, &mut periodic)?;

        if periodic.is_cancelled() {
            periodic.event().update_store(self.events.as_ref())?;
            info!(player = %unit.target(), periodic_type, "periodic event cancelled");
        } else {
            periodic.reschedule_self(self.events.as_ref(), Utc::now())?;
            debug!(
                player = %unit.target(),
                periodic_type,
                due = %periodic.event().due_time(),
                "periodic event rescheduled"
            );
        }
        Ok(())
    }
}

/// `start_periodic`: attach a periodic event of `periodic_type` to the
/// target and schedule its first firing one interval from now. An optional
/// `interval` field overrides the type's default. Does nothing if the
/// target already runs that type.
pub struct StartPeriodic {
    registry: Arc<PeriodicRegistry>,
    events: Arc<dyn EventStore>,
}

impl EffectHandler for StartPeriodic {
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let periodic_type = periodic_type_field(effect)?;
        let running = self
            .events
            .find_periodic(unit.target(), periodic_type)?
            .is_some_and(|existing| existing.locked);
        if running {
            debug!(player = %unit.target(), periodic_type, "periodic event already running");
            return Ok(());
        }

        let now = Utc::now();
        let mut periodic =
            PeriodicEvent::for_player(&self.registry, unit.target().clone(), periodic_type, now)?;
        if let Some(raw) = effect.field("interval") {
            let seconds = raw
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| EffectError::InvalidField {
                    kind: effect.kind.clone(),
                    field: "interval".to_owned(),
                    reason: "expected a positive integer".to_owned(),
                })?;
            periodic.set_interval(seconds)?;
        }
        periodic.reschedule_self(self.events.as_ref(), now)?;
        info!(
            player = %unit.target(),
            periodic_type,
            interval = periodic.interval(),
            "periodic event started"
        );
        Ok(())
    }
}

/// Register `periodic_exec` and `start_periodic`.
///
/// # Errors
///
/// Fails if either kind is already registered.
pub fn install(
    builder: &mut BusBuilder,
    registry: &Arc<PeriodicRegistry>,
    events: &Arc<dyn EventStore>,
) -> Result<(), RegistryError> {
    builder
        .register_effect(
            PERIODIC_EXEC,
            PeriodicExec {
                registry: Arc::clone(registry),
                events: Arc::clone(events),
            },
        )?
        .register_effect(
            START_PERIODIC,
            StartPeriodic {
                registry: Arc::clone(registry),
                events: Arc::clone(events),
            },
        )?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    impl PeriodicHandler for Noop {
        fn run(&self, _unit: &mut Unit<'_>, _event: &mut PeriodicEvent) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn registry() -> PeriodicRegistry {
        let mut registry = PeriodicRegistry::new();
        registry.register("tavern_tick", 60, Noop).unwrap();
        registry
    }

    #[test]
    fn registration_rules() {
        let mut registry = registry();
        assert!(matches!(
            registry.register("tavern_tick", 30, Noop),
            Err(EventError::Registry { .. })
        ));
        assert!(matches!(
            registry.register("never", 0, Noop),
            Err(EventError::InvalidInterval { .. })
        ));
        assert_eq!(registry.default_interval("tavern_tick"), Some(60));
    }

    #[test]
    fn fresh_instances_are_locked_and_unscheduled() {
        let registry = registry();
        let now = Utc::now();
        let periodic =
            PeriodicEvent::for_player(&registry, PlayerId::from("ada"), "tavern_tick", now)
                .unwrap();
        let record = periodic.event().record();
        assert!(record.locked);
        assert_eq!(record.event_type, PERIODIC_EVENT_TYPE);
        assert_eq!(record.interval, Some(60));
        assert_eq!(record.effect[0].kind, PERIODIC_EXEC);
        assert!(record.since.is_none());

        let unknown = PeriodicEvent::for_player(&registry, PlayerId::from("ada"), "nope", now);
        assert!(matches!(unknown, Err(EventError::UnknownPeriodicType { .. })));
    }

    #[test]
    fn reschedule_moves_due_time_by_interval() {
        let registry = registry();
        let store = crate::store::MemoryEventStore::new();
        let now = Utc::now();
        let mut periodic =
            PeriodicEvent::for_player(&registry, PlayerId::from("ada"), "tavern_tick", now)
                .unwrap();
        periodic.set_interval(5).unwrap();
        assert!(periodic.set_interval(0).is_err());
        periodic.reschedule_self(&store, now).unwrap();

        let stored = store.get(periodic.event().id()).unwrap().unwrap();
        assert_eq!(stored.due_time, now + TimeDelta::seconds(5));
        assert_eq!(stored.interval, Some(5));
    }

    #[test]
    fn cancel_unlocks() {
        let registry = registry();
        let mut periodic =
            PeriodicEvent::for_player(&registry, PlayerId::from("ada"), "tavern_tick", Utc::now())
                .unwrap();
        assert!(!periodic.is_cancelled());
        periodic.cancel_self();
        assert!(periodic.is_cancelled());
        assert!(periodic.event().is_remove_on_trigger());
    }

    #[test]
    fn non_periodic_records_are_rejected() {
        let event = Event::new(PlayerId::from("ada"), "brew", Utc::now(), Vec::new());
        assert!(matches!(
            PeriodicEvent::from_event(event),
            Err(EventError::NotPeriodic { .. })
        ));
    }
}
