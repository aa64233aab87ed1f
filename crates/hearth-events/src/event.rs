//! Delayed, persisted units of work.
//!
//! An [`Event`] moves through `unscheduled -> scheduled -> executed` and is
//! then either removed (one-shot) or left in the queue (locked). Execution
//! resolves the target player, runs the effect list in order on a fresh
//! [`Unit`](hearth_core::Unit), and bumps the target's
//! `stat.event.<type>_total` counter.

use chrono::{DateTime, Utc};
use hearth_core::GameBus;
use hearth_core::effect::EffectContext;
use hearth_core::error::StoreError;
use hearth_core::registry::UpdateOptions;
use hearth_core::resolvers::STAT_PREFIX;
use hearth_types::{EffectData, EventId, EventRecord, GameValue, PlayerId};
use tracing::debug;

use crate::error::EventError;
use crate::store::EventStore;

/// A scheduled event wrapping its persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    record: EventRecord,
}

impl Event {
    /// A new unscheduled one-shot event.
    pub fn new(
        target: PlayerId,
        event_type: impl Into<String>,
        due_time: DateTime<Utc>,
        effects: Vec<EffectData>,
    ) -> Self {
        let mut record = EventRecord::new(target, event_type, due_time);
        record.effect = effects;
        Self { record }
    }

    /// Wrap a record loaded from the store.
    pub const fn from_record(record: EventRecord) -> Self {
        Self { record }
    }

    /// The underlying record.
    pub const fn record(&self) -> &EventRecord {
        &self.record
    }

    /// Mutable access to the underlying record.
    pub const fn record_mut(&mut self) -> &mut EventRecord {
        &mut self.record
    }

    /// Unwrap into the record.
    pub fn into_record(self) -> EventRecord {
        self.record
    }

    /// Id of the event.
    pub const fn id(&self) -> EventId {
        self.record.event_id
    }

    /// Target player.
    pub const fn target(&self) -> &PlayerId {
        &self.record.target
    }

    /// Event type (statistics category).
    pub fn event_type(&self) -> &str {
        &self.record.event_type
    }

    /// When the event becomes due.
    pub const fn due_time(&self) -> DateTime<Utc> {
        self.record.due_time
    }

    /// Move the due time. Not persisted until the event is stored.
    pub const fn set_due_time(&mut self, due_time: DateTime<Utc>) {
        self.record.due_time = due_time;
    }

    /// Whether the event is locked against removal.
    pub const fn is_locked(&self) -> bool {
        self.record.locked
    }

    /// True unless the event is locked.
    pub const fn is_remove_on_trigger(&self) -> bool {
        !self.record.locked
    }

    /// True for a periodic event whose cycle was stopped. Its last firing
    /// only removes it.
    pub const fn is_cancelled_periodic(&self) -> bool {
        self.record.is_periodic() && !self.record.locked
    }

    /// Read an `event_data` entry.
    pub fn event_data(&self, key: &str) -> Option<&GameValue> {
        self.record.event_data.get(key)
    }

    /// Read an `event_data` entry, falling back to `default`.
    pub fn event_data_or(&self, key: &str, default: impl Into<GameValue>) -> GameValue {
        self.event_data(key).cloned().unwrap_or_else(|| default.into())
    }

    /// Write an `event_data` entry. Not persisted until the event is stored.
    pub fn set_event_data(&mut self, key: impl Into<String>, value: impl Into<GameValue>) {
        self.record.event_data.insert(key.into(), value.into());
    }

    /// Register the event with the queue: stamp `since` and insert it.
    pub fn enqueue(&mut self, store: &dyn EventStore, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.record.since = Some(now);
        store.insert(&self.record)?;
        debug!(
            event_id = %self.record.event_id,
            player = %self.record.target,
            event_type = %self.record.event_type,
            due = %self.record.due_time,
            "event enqueued"
        );
        Ok(())
    }

    /// Write the current record to the store (insert or replace).
    pub fn update_store(&self, store: &dyn EventStore) -> Result<(), StoreError> {
        store.upsert(&self.record)
    }

    /// Run the event's effects against its target and count the firing in
    /// `stat.event.<event_type>_total`. A cancelled periodic event does
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`EventError::TargetMissing`] if the target does not exist,
    /// [`EventError::Execution`] if an effect (or the statistics update)
    /// fails.
    pub fn execute(&self, bus: &GameBus) -> Result<(), EventError> {
        let event_id = self.record.event_id;
        if self.is_cancelled_periodic() {
            debug!(
                event_id = %event_id,
                player = %self.record.target,
                "cancelled periodic event retired"
            );
            return Ok(());
        }
        if !bus.store().player_exists(&self.record.target)? {
            return Err(EventError::TargetMissing {
                event_id,
                target: self.record.target.clone(),
            });
        }

        let mut unit = bus.unit(self.record.target.clone());
        let ctx = EffectContext::for_event(event_id);
        let failed = |source| EventError::Execution { event_id, source };
        for effect in &self.record.effect {
            unit.execute_effect(effect, &ctx).map_err(failed)?;
        }

        let counter = GameValue::map([(format!("event.{}_total", self.record.event_type), 1)]);
        unit.update_with(STAT_PREFIX, counter, &UpdateOptions::bulk())
            .map_err(failed)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event::new(PlayerId::from("ada"), "brew", Utc::now(), Vec::new())
    }

    #[test]
    fn one_shot_events_are_removed_on_trigger() {
        let mut event = event();
        assert!(event.is_remove_on_trigger());
        event.record_mut().locked = true;
        assert!(!event.is_remove_on_trigger());
    }

    #[test]
    fn cancelled_periodic_detection() {
        let mut event = event();
        assert!(!event.is_cancelled_periodic());
        event.record_mut().periodic_type = Some("tavern_tick".to_owned());
        assert!(event.is_cancelled_periodic());
        event.record_mut().locked = true;
        assert!(!event.is_cancelled_periodic());
    }

    #[test]
    fn event_data_accessors() {
        let mut event = event();
        assert_eq!(event.event_data("idle"), None);
        assert_eq!(event.event_data_or("idle", 0), GameValue::Int(0));
        event.set_event_data("idle", 3);
        assert_eq!(event.event_data("idle"), Some(&GameValue::Int(3)));
        assert_eq!(event.event_data_or("idle", 0), GameValue::Int(3));
    }

    #[test]
    fn enqueue_stamps_since() {
        let store = crate::store::MemoryEventStore::new();
        let mut event = event();
        let now = Utc::now();
        event.enqueue(&store, now).unwrap();
        let stored = store.get(event.id()).unwrap().unwrap();
        assert_eq!(stored.since, Some(now));
    }
}
