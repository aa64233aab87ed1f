//! Standard document-backed resolvers.
//!
//! `data.<path>` addresses the player's gameplay document and uses dynamic
//! buffering, so one read of `data.storage` serves every id below it.
//! `stat.<path>` addresses the player's statistics document; its default
//! command is `inc`, which makes `update("stat", {...}, bulk)` the natural
//! way to bump many counters at once.

use hearth_types::{GameId, GameValue, UpdateCommand};

use crate::bus::BusBuilder;
use crate::error::{CoreError, RegistryError, ResolutionError};
use crate::registry::{
    GetOptions, GetPolicy, GetResolver, ResolveContext, UpdateOptions, UpdateOutcome,
    UpdateResolver,
};
use crate::store::{Collection, FieldOp};

/// Prefix of the gameplay document resolver.
pub const DATA_PREFIX: &str = "data";

/// Prefix of the statistics resolver.
pub const STAT_PREFIX: &str = "stat";

/// Get/update handler mapping `<prefix>.<path>` onto one per-player
/// document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentResolver {
    collection: Collection,
    default_command: UpdateCommand,
}

impl DocumentResolver {
    /// Resolver over `collection` applying `default_command` when an update
    /// names none.
    pub const fn new(collection: Collection, default_command: UpdateCommand) -> Self {
        Self {
            collection,
            default_command,
        }
    }
}

fn document_path(id: &GameId) -> Vec<&str> {
    id.segments().skip(1).collect()
}

impl GetResolver for DocumentResolver {
    fn get(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        _opts: &GetOptions,
    ) -> Result<GameValue, CoreError> {
        ctx.store
            .read(self.collection, ctx.target, &document_path(id))?
            .ok_or_else(|| {
                ResolutionError::NotFound {
                    id: id.to_string(),
                }
                .into()
            })
    }
}

impl UpdateResolver for DocumentResolver {
    fn update(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        payload: &GameValue,
        opts: &UpdateOptions,
    ) -> Result<UpdateOutcome, CoreError> {
        let command = opts.command.unwrap_or(self.default_command);
        let rejected = |reason: &str| ResolutionError::Rejected {
            id: id.to_string(),
            reason: reason.to_owned(),
        };

        let mut ids = Vec::new();
        let mut ops = Vec::new();
        if opts.bulk {
            let fields = payload
                .as_map()
                .ok_or_else(|| rejected("bulk payload must be a mapping"))?;
            for (key, value) in fields {
                let leaf = id.child(key)?;
                ops.push(FieldOp::new(&document_path(&leaf), command, value.clone()));
                ids.push(leaf);
            }
        } else {
            let path = document_path(id);
            if path.is_empty() {
                return Err(rejected("a whole document can only be written in bulk").into());
            }
            ops.push(FieldOp::new(&path, command, payload.clone()));
            ids.push(id.clone());
        }

        let values = ctx.store.apply(self.collection, ctx.target, &ops)?;
        Ok(UpdateOutcome {
            command,
            changed: ids.into_iter().zip(values).collect(),
        })
    }
}

/// Register the `data` and `stat` resolvers.
///
/// # Errors
///
/// Fails if either prefix is already registered.
pub fn install(builder: &mut BusBuilder) -> Result<(), RegistryError> {
    let data = DocumentResolver::new(Collection::Players, UpdateCommand::Set);
    let stat = DocumentResolver::new(Collection::Statistics, UpdateCommand::Inc);
    builder
        .register_get(DATA_PREFIX, data, GetPolicy::dynamic())?
        .register_update(DATA_PREFIX, data)?
        .register_get(STAT_PREFIX, stat, GetPolicy::fixed())?
        .register_update(STAT_PREFIX, stat)?;
    Ok(())
}
