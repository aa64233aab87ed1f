//! Persistence layout of scheduled events.
//!
//! One [`EventRecord`] is one document in the event queue. The scheduler
//! selects records by `due_time`, and periodic records additionally carry
//! their `periodic_type` and `interval`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effect::EffectData;
use crate::ids::{EventId, PlayerId};
use crate::value::GameValue;

/// `event_type` shared by all periodic events.
pub const PERIODIC_EVENT_TYPE: &str = "periodic_event";

/// A persisted, addressable unit of delayed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stable identifier of this record.
    pub event_id: EventId,

    /// Player the effects run against.
    pub target: PlayerId,

    /// Category used for per-type statistics.
    pub event_type: String,

    /// Instant at/after which the event is eligible to fire.
    pub due_time: DateTime<Utc>,

    /// Effects executed in order when the event fires.
    #[serde(default)]
    pub effect: Vec<EffectData>,

    /// A locked event survives firing instead of being removed.
    #[serde(default)]
    pub locked: bool,

    /// When the event was enqueued.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// Station the event belongs to, for crafting events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,

    /// Station slots the event occupies while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<u32>,

    /// Recipe that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,

    /// Small key-value payload carried across firings.
    #[serde(default)]
    pub event_data: BTreeMap<String, GameValue>,

    /// Periodic handler type; set only for periodic events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic_type: Option<String>,

    /// Seconds between firings of a periodic event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl EventRecord {
    /// A fresh, unlocked, not-yet-enqueued record.
    pub fn new(target: PlayerId, event_type: impl Into<String>, due_time: DateTime<Utc>) -> Self {
        Self {
            event_id: EventId::new(),
            target,
            event_type: event_type.into(),
            due_time,
            effect: Vec::new(),
            locked: false,
            since: None,
            station: None,
            slots: None,
            recipe_id: None,
            event_data: BTreeMap::new(),
            periodic_type: None,
            interval: None,
        }
    }

    /// True if this record belongs to a periodic event.
    pub const fn is_periodic(&self) -> bool {
        self.periodic_type.is_some()
    }
}
