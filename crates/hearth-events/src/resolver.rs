//! The `event` resolver: event records addressed through the Game-ID bus.
//!
//! - `event.periodic.<type>` is the target's periodic event of that type.
//! - `event.id.<uuid>` is any event by id.
//!
//! Anything after those three segments addresses a field of the record
//! (`event.periodic.tavern_tick.event_data.idle`). Updates may set
//! `interval`, `locked` and `event_data.<key>`, and unset
//! `event_data.<key>`.

use std::sync::Arc;

use hearth_core::bus::BusBuilder;
use hearth_core::error::{CoreError, RegistryError, ResolutionError, StoreError};
use hearth_core::registry::{
    GetOptions, GetPolicy, GetResolver, ResolveContext, UpdateOptions, UpdateOutcome,
    UpdateResolver,
};
use hearth_types::{EventId, EventRecord, GameId, GameValue, UpdateCommand};
use uuid::Uuid;

use crate::store::EventStore;

/// Prefix of the event resolver.
pub const EVENT_PREFIX: &str = "event";

/// Segments making up the base id (`event.<kind>.<key>`).
pub const EVENT_BASE_DEPTH: usize = 3;

/// Get/update handler for the `event` prefix.
pub struct EventResolver {
    events: Arc<dyn EventStore>,
}

impl EventResolver {
    /// Resolver reading and writing `events`.
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    fn load(&self, ctx: &ResolveContext<'_>, id: &GameId) -> Result<EventRecord, CoreError> {
        let segments: Vec<&str> = id.segments().take(EVENT_BASE_DEPTH).collect();
        let rejected = |reason: &str| ResolutionError::Rejected {
            id: id.to_string(),
            reason: reason.to_owned(),
        };
        let record = match segments.as_slice() {
            [_, "periodic", periodic_type] => self.events.find_periodic(ctx.target, periodic_type)?,
            [_, "id", raw] => {
                let uuid = Uuid::parse_str(raw).map_err(|_err| rejected("not an event id"))?;
                self.events
                    .get(EventId::from(uuid))?
                    .filter(|r| r.target == *ctx.target)
            }
            _ => {
                return Err(
                    rejected("expected `event.periodic.<type>` or `event.id.<uuid>`").into(),
                );
            }
        };
        record.ok_or_else(|| {
            ResolutionError::NotFound {
                id: id.to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for EventResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventResolver").finish_non_exhaustive()
    }
}

fn record_value(record: &EventRecord) -> Result<GameValue, CoreError> {
    let json = serde_json::to_value(record).map_err(StoreError::from)?;
    Ok(GameValue::from_json(json))
}

impl GetResolver for EventResolver {
    fn get(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        _opts: &GetOptions,
    ) -> Result<GameValue, CoreError> {
        record_value(&self.load(ctx, id)?)
    }
}

impl UpdateResolver for EventResolver {
    fn update(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        payload: &GameValue,
        opts: &UpdateOptions,
    ) -> Result<UpdateOutcome, CoreError> {
        let command = opts.command.unwrap_or_default();
        let rejected = |reason: String| ResolutionError::Rejected {
            id: id.to_string(),
            reason,
        };
        let mut record = self.load(ctx, id)?;
        let field: Vec<&str> = id.segments().skip(EVENT_BASE_DEPTH).collect();

        let new_value = match (field.as_slice(), command) {
            (["interval"], UpdateCommand::Set) => {
                let seconds = payload
                    .as_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| rejected("interval must be a positive integer".to_owned()))?;
                record.interval = Some(seconds);
                payload.clone()
            }
            (["locked"], UpdateCommand::Set) => {
                record.locked = payload
                    .as_bool()
                    .ok_or_else(|| rejected("locked must be a boolean".to_owned()))?;
                payload.clone()
            }
            (["event_data", key, rest @ ..], UpdateCommand::Set) => {
                let slot = record.event_data.entry((*key).to_owned()).or_default();
                *slot.slot_mut(rest) = payload.clone();
                payload.clone()
            }
            (["event_data", key], UpdateCommand::Unset) => {
                record.event_data.remove(*key);
                GameValue::Null
            }
            (path, command) => {
                return Err(rejected(format!(
                    "cannot {command} event field `{}`",
                    path.join(".")
                ))
                .into());
            }
        };

        self.events.upsert(&record)?;
        Ok(UpdateOutcome {
            command,
            changed: [(id.clone(), new_value)].into_iter().collect(),
        })
    }
}

/// Register the `event` resolver.
///
/// # Errors
///
/// Fails if the prefix is already registered.
pub fn install(builder: &mut BusBuilder, events: &Arc<dyn EventStore>) -> Result<(), RegistryError> {
    builder
        .register_get(
            EVENT_PREFIX,
            EventResolver::new(Arc::clone(events)),
            GetPolicy::fixed().with_base_depth(EVENT_BASE_DEPTH),
        )?
        .register_update(EVENT_PREFIX, EventResolver::new(Arc::clone(events)))?;
    Ok(())
}
