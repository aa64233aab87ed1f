//! Effect execution.
//!
//! Effects are plain [`EffectData`]; behaviour comes from the handler
//! registered for the data's kind. Handlers run against a [`Unit`], so every
//! write they make flows through the regular update pipeline.

use std::collections::HashMap;

use hearth_types::{EffectData, EventId, GameId, GameValue, UpdateCommand};

use crate::bus::Unit;
use crate::error::{CoreError, EffectError, RegistryError};
use crate::registry::UpdateOptions;

/// Extra context an effect runs with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectContext {
    /// Id whose change triggered the effect (player listeners).
    pub updated_id: Option<GameId>,
    /// New value of `updated_id`.
    pub updated_value: Option<GameValue>,
    /// Event the effect runs for (scheduled execution).
    pub event: Option<EventId>,
}

impl EffectContext {
    /// Context for an effect fired by a change.
    pub const fn for_change(updated_id: GameId, updated_value: GameValue) -> Self {
        Self {
            updated_id: Some(updated_id),
            updated_value: Some(updated_value),
            event: None,
        }
    }

    /// Context for an effect run by a scheduled event.
    pub const fn for_event(event: EventId) -> Self {
        Self {
            updated_id: None,
            updated_value: None,
            event: Some(event),
        }
    }
}

/// Behaviour of one effect kind.
pub trait EffectHandler: Send + Sync {
    /// Apply `effect` to the unit's target player.
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        ctx: &EffectContext,
    ) -> Result<(), CoreError>;
}

/// Kind-to-handler table, filled during boot.
#[derive(Default)]
pub struct EffectRegistry {
    handlers: HashMap<String, Box<dyn EffectHandler>>,
}

impl EffectRegistry {
    pub(crate) fn register(
        &mut self,
        kind: &str,
        handler: Box<dyn EffectHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(kind) {
            return Err(RegistryError::DuplicateEffect {
                kind: kind.to_owned(),
            });
        }
        self.handlers.insert(kind.to_owned(), handler);
        Ok(())
    }

    /// Handler registered for `kind`.
    pub fn get(&self, kind: &str) -> Result<&dyn EffectHandler, EffectError> {
        match self.handlers.get(kind) {
            Some(handler) => Ok(handler.as_ref()),
            None => Err(EffectError::UnknownKind {
                kind: kind.to_owned(),
            }),
        }
    }

    /// True if `kind` has a handler.
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.handlers.keys().collect();
        kinds.sort_unstable();
        f.debug_struct("EffectRegistry").field("kinds", &kinds).finish()
    }
}

fn required<'e>(effect: &'e EffectData, field: &str) -> Result<&'e GameValue, EffectError> {
    effect.field(field).ok_or_else(|| EffectError::MissingField {
        kind: effect.kind.clone(),
        field: field.to_owned(),
    })
}

fn required_str<'e>(effect: &'e EffectData, field: &str) -> Result<&'e str, EffectError> {
    required(effect, field)?
        .as_str()
        .ok_or_else(|| EffectError::InvalidField {
            kind: effect.kind.clone(),
            field: field.to_owned(),
            reason: "expected a string".to_owned(),
        })
}

/// `set_value`: write `value` to `target_id`, optionally with `command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetValue;

impl EffectHandler for SetValue {
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let target = required_str(effect, "target_id")?;
        let value = required(effect, "value")?.clone();
        let command = match effect.str_field("command") {
            Some(raw) => Some(parse_command(effect, raw)?),
            None => None,
        };
        let opts = UpdateOptions {
            command,
            ..UpdateOptions::default()
        };
        unit.update_with(target, value, &opts)?;
        Ok(())
    }
}

fn parse_command(effect: &EffectData, raw: &str) -> Result<UpdateCommand, EffectError> {
    match raw {
        "set" => Ok(UpdateCommand::Set),
        "inc" => Ok(UpdateCommand::Inc),
        "push" => Ok(UpdateCommand::Push),
        "unset" => Ok(UpdateCommand::Unset),
        other => Err(EffectError::InvalidField {
            kind: effect.kind.clone(),
            field: "command".to_owned(),
            reason: format!("unknown command `{other}`"),
        }),
    }
}

/// `push_data`: append `to_push` to the list at `push_target`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushData;

impl EffectHandler for PushData {
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let target = required_str(effect, "push_target")?;
        let value = required(effect, "to_push")?.clone();
        unit.update_with(target, value, &UpdateOptions::command(UpdateCommand::Push))?;
        Ok(())
    }
}

/// `repeat`: run the nested effect `repeat_data` `repeat_times` times.
#[derive(Debug, Clone, Copy, Default)]
pub struct Repeat;

impl EffectHandler for Repeat {
    fn execute(
        &self,
        unit: &mut Unit<'_>,
        effect: &EffectData,
        ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let times = required(effect, "repeat_times")?
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| EffectError::InvalidField {
                kind: effect.kind.clone(),
                field: "repeat_times".to_owned(),
                reason: "expected a non-negative integer".to_owned(),
            })?;
        let nested = required(effect, "repeat_data")?;
        let nested: EffectData =
            serde_json::from_value(nested.to_json()).map_err(|e| EffectError::InvalidField {
                kind: effect.kind.clone(),
                field: "repeat_data".to_owned(),
                reason: e.to_string(),
            })?;
        for _ in 0..times {
            unit.execute_effect(&nested, ctx)?;
        }
        Ok(())
    }
}

/// Register the built-in effects.
///
/// # Errors
///
/// Fails if one of the kinds is already taken.
pub fn install(builder: &mut crate::bus::BusBuilder) -> Result<(), RegistryError> {
    builder.register_effect("set_value", SetValue)?;
    builder.register_effect("push_data", PushData)?;
    builder.register_effect("repeat", Repeat)?;
    Ok(())
}
