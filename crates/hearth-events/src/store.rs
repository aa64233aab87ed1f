//! Event store contract and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use hearth_core::error::StoreError;
use hearth_types::{EventId, EventRecord, PERIODIC_EVENT_TYPE, PlayerId};

/// Persistence required by events and the scheduler: point reads, inserts
/// and upserts, a range query on the due time, and bulk delete by id.
pub trait EventStore: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    fn insert(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Insert or replace a record by id.
    fn upsert(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Fetch one record.
    fn get(&self, id: EventId) -> Result<Option<EventRecord>, StoreError>;

    /// Every record with `due_time < before`, ordered by due time and id.
    fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError>;

    /// The periodic event of `periodic_type` attached to `target`.
    fn find_periodic(
        &self,
        target: &PlayerId,
        periodic_type: &str,
    ) -> Result<Option<EventRecord>, StoreError>;

    /// Every record targeting `target`, ordered by due time.
    fn events_for(&self, target: &PlayerId) -> Result<Vec<EventRecord>, StoreError>;

    /// Delete all records in `ids`; returns how many existed.
    fn remove_events(&self, ids: &[EventId]) -> Result<usize, StoreError>;
}

/// Thread-safe in-memory [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    records: RwLock<BTreeMap<EventId, EventRecord>>,
}

impl MemoryEventStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |records| records.len())
    }

    /// True if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend {
        message: "event store lock poisoned".to_owned(),
    }
}

fn by_due_time(records: &mut [EventRecord]) {
    records.sort_by(|a, b| {
        a.due_time
            .cmp(&b.due_time)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
}

impl EventStore for MemoryEventStore {
    fn insert(&self, record: &EventRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_poison| poisoned())?;
        if records.contains_key(&record.event_id) {
            return Err(StoreError::Backend {
                message: format!("duplicate event id {}", record.event_id),
            });
        }
        records.insert(record.event_id, record.clone());
        Ok(())
    }

    fn upsert(&self, record: &EventRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_poison| poisoned())?;
        records.insert(record.event_id, record.clone());
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let records = self.records.read().map_err(|_poison| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError> {
        let records = self.records.read().map_err(|_poison| poisoned())?;
        let mut due: Vec<EventRecord> = records
            .values()
            .filter(|r| r.due_time < before)
            .cloned()
            .collect();
        by_due_time(&mut due);
        Ok(due)
    }

    fn find_periodic(
        &self,
        target: &PlayerId,
        periodic_type: &str,
    ) -> Result<Option<EventRecord>, StoreError> {
        let records = self.records.read().map_err(|_poison| poisoned())?;
        Ok(records
            .values()
            .find(|r| {
                r.target == *target
                    && r.event_type == PERIODIC_EVENT_TYPE
                    && r.periodic_type.as_deref() == Some(periodic_type)
            })
            .cloned())
    }

    fn events_for(&self, target: &PlayerId) -> Result<Vec<EventRecord>, StoreError> {
        let records = self.records.read().map_err(|_poison| poisoned())?;
        let mut found: Vec<EventRecord> = records
            .values()
            .filter(|r| r.target == *target)
            .cloned()
            .collect();
        by_due_time(&mut found);
        Ok(found)
    }

    fn remove_events(&self, ids: &[EventId]) -> Result<usize, StoreError> {
        let mut records = self.records.write().map_err(|_poison| poisoned())?;
        Ok(ids.iter().filter(|id| records.remove(id).is_some()).count())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn record(target: &str, offset_secs: i64) -> EventRecord {
        let due = Utc::now() + TimeDelta::seconds(offset_secs);
        EventRecord::new(PlayerId::from(target), "brew", due)
    }

    #[test]
    fn find_due_is_strictly_before() {
        let store = MemoryEventStore::new();
        let past = record("ada", -10);
        let future = record("ada", 60);
        store.insert(&past).unwrap();
        store.insert(&future).unwrap();

        let due = store.find_due(past.due_time).unwrap();
        assert!(due.is_empty());
        let due = store.find_due(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event_id, past.event_id);
    }

    #[test]
    fn insert_rejects_duplicates_upsert_replaces() {
        let store = MemoryEventStore::new();
        let mut event = record("ada", 0);
        store.insert(&event).unwrap();
        assert!(store.insert(&event).is_err());
        event.locked = true;
        store.upsert(&event).unwrap();
        assert!(store.get(event.event_id).unwrap().unwrap().locked);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn bulk_remove_counts_existing() {
        let store = MemoryEventStore::new();
        let a = record("ada", 0);
        let b = record("bob", 0);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        let removed = store
            .remove_events(&[a.event_id, EventId::new(), b.event_id])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn events_for_filters_by_target() {
        let store = MemoryEventStore::new();
        store.insert(&record("ada", 5)).unwrap();
        store.insert(&record("ada", -5)).unwrap();
        store.insert(&record("bob", 0)).unwrap();
        let found = store.events_for(&PlayerId::from("ada")).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].due_time < found[1].due_time);
    }
}
