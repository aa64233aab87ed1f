//! The Game-ID bus: registry boot and per-unit get/update processing.
//!
//! [`GameBus`] is built once during boot from a [`BusBuilder`] and is then
//! shared read-only. Each unit of work (a player request, one scheduled
//! event) opens a [`Unit`] which owns its ID buffer and its deferred
//! listener queue; both are dropped with the unit.
//!
//! Listener reactions never run inside the update that triggered them.
//! They are queued and drained in FIFO order once the outermost update has
//! finished. Every reaction carries the depth of the chain that produced
//! it, and a chain longer than [`DispatchConfig::max_listener_depth`]
//! aborts the unit with [`CoreError::ListenerCascade`].

use std::collections::VecDeque;
use std::sync::Arc;

use hearth_types::{
    EffectData, GameId, GameValue, PLAYER_LISTENERS_FIELD, PlayerId, PlayerListenerRecord,
    UpdateCommand,
};
use tracing::{debug, trace};

use crate::buffer::IdBuffer;
use crate::config::DispatchConfig;
use crate::effect::{EffectContext, EffectHandler, EffectRegistry};
use crate::error::{CoreError, RegistryError, ResolutionError, StoreError};
use crate::listener::{Change, DEFAULT_PRIORITY, GlobalListener, GlobalListeners};
use crate::registry::{
    ChangeSet, GetOptions, GetPolicy, GetResolver, RegistryBuilder, ResolveContext,
    ResolverRegistry, UpdateOptions, UpdateOutcome, UpdateResolver, expand_bulk,
};
use crate::resolvers::DATA_PREFIX;
use crate::store::{Collection, DocumentStore, FieldOp};

/// Shared, immutable registry of resolvers, listeners and effects.
pub struct GameBus {
    resolvers: ResolverRegistry,
    listeners: GlobalListeners,
    effects: EffectRegistry,
    store: Arc<dyn DocumentStore>,
    config: DispatchConfig,
}

impl GameBus {
    /// Start registering handlers against `store`.
    pub fn builder(store: Arc<dyn DocumentStore>) -> BusBuilder {
        BusBuilder {
            registry: RegistryBuilder::new(),
            listeners: GlobalListeners::default(),
            effects: EffectRegistry::default(),
            store,
            config: DispatchConfig::default(),
        }
    }

    /// Open a unit of work acting on `target`.
    pub fn unit(&self, target: PlayerId) -> Unit<'_> {
        Unit {
            bus: self,
            target,
            buffer: IdBuffer::new(),
            pending: VecDeque::new(),
            draining: false,
            depth: 0,
        }
    }

    /// The document store.
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// The resolver registry.
    pub const fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    /// The effect registry.
    pub const fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    /// Dispatch settings.
    pub const fn config(&self) -> DispatchConfig {
        self.config
    }
}

impl std::fmt::Debug for GameBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameBus")
            .field("prefixes", &self.resolvers.prefixes())
            .field("listeners", &self.listeners)
            .field("effects", &self.effects)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Boot-phase registration of everything a [`GameBus`] dispatches to.
pub struct BusBuilder {
    registry: RegistryBuilder,
    listeners: GlobalListeners,
    effects: EffectRegistry,
    store: Arc<dyn DocumentStore>,
    config: DispatchConfig,
}

impl BusBuilder {
    /// Register the get handler of `prefix`.
    pub fn register_get(
        &mut self,
        prefix: &str,
        handler: impl GetResolver + 'static,
        policy: GetPolicy,
    ) -> Result<&mut Self, RegistryError> {
        self.registry.register_get(prefix, handler, policy)?;
        Ok(self)
    }

    /// Register the update handler of `prefix`.
    pub fn register_update(
        &mut self,
        prefix: &str,
        handler: impl UpdateResolver + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.registry.register_update(prefix, handler)?;
        Ok(self)
    }

    /// Register a global listener at the default priority.
    pub fn register_global_listener(
        &mut self,
        pattern: &str,
        handler: impl GlobalListener + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.register_global_listener_with_priority(pattern, DEFAULT_PRIORITY, handler)
    }

    /// Register a global listener. Lower priorities are matched first.
    pub fn register_global_listener_with_priority(
        &mut self,
        pattern: &str,
        priority: i32,
        handler: impl GlobalListener + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.listeners
            .register(pattern, priority, Box::new(handler))?;
        Ok(self)
    }

    /// Register the handler of an effect kind.
    pub fn register_effect(
        &mut self,
        kind: &str,
        handler: impl EffectHandler + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.effects.register(kind, Box::new(handler))?;
        Ok(self)
    }

    /// Replace the dispatch settings.
    pub const fn set_config(&mut self, config: DispatchConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Finish boot.
    ///
    /// # Errors
    ///
    /// Fails if a prefix lacks its get or update handler.
    pub fn build(self) -> Result<GameBus, RegistryError> {
        let resolvers = self.registry.build()?;
        debug!(
            prefixes = ?resolvers.prefixes(),
            listeners = self.listeners.len(),
            "game bus ready"
        );
        Ok(GameBus {
            resolvers,
            listeners: self.listeners,
            effects: self.effects,
            store: self.store,
            config: self.config,
        })
    }
}

impl std::fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("registry", &self.registry)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Reaction {
    Global(usize),
    Player(EffectData),
}

#[derive(Debug)]
struct Pending {
    reaction: Reaction,
    change: Change,
    depth: usize,
}

/// One unit of work for one player.
pub struct Unit<'a> {
    bus: &'a GameBus,
    target: PlayerId,
    buffer: IdBuffer,
    pending: VecDeque<Pending>,
    draining: bool,
    depth: usize,
}

impl<'a> Unit<'a> {
    /// The player this unit acts on.
    pub const fn target(&self) -> &PlayerId {
        &self.target
    }

    /// The bus this unit runs on.
    pub const fn bus(&self) -> &'a GameBus {
        self.bus
    }

    /// The unit's ID buffer.
    pub const fn buffer(&self) -> &IdBuffer {
        &self.buffer
    }

    fn ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            target: &self.target,
            store: self.bus.store.as_ref(),
        }
    }

    /// Resolve `id` with default options.
    pub fn get(&mut self, id: &str) -> Result<GameValue, CoreError> {
        self.get_with(id, &GetOptions::default())
    }

    /// Resolve `id`.
    ///
    /// The base id (cut to the resolver's postfix start) is answered from
    /// the buffer when possible; otherwise the resolver runs once and its
    /// result is cached under the base id. Postfix segments are applied
    /// afterwards. A value that does not exist yields
    /// `opts.default_value` when one is given.
    pub fn get_with(&mut self, id: &str, opts: &GetOptions) -> Result<GameValue, CoreError> {
        let id = GameId::parse(id)?;
        match self.resolve(&id, opts) {
            Err(err) if err.is_not_found() => opts.default_value.clone().ok_or(err),
            other => other,
        }
    }

    fn resolve(&mut self, id: &GameId, opts: &GetOptions) -> Result<GameValue, CoreError> {
        let bus = self.bus;
        let entry = bus.resolvers.resolve(id)?;
        let policy = &entry.policy;
        let dynamic = policy.is_dynamic();
        let base = policy.base_of(id);
        let postfix = id.relative_to(&base).unwrap_or_default();

        let value = if !opts.bypass_buffer && self.buffer.contains(&base, dynamic) {
            trace!(game_id = %base, "buffer hit");
            self.buffer
                .evaluate(&base, dynamic)?
                .cloned()
                .ok_or_else(|| ResolutionError::NotFound {
                    id: id.to_string(),
                })?
        } else {
            debug!(player = %self.target, game_id = %base, "resolver call");
            let value = entry.get.get(&self.ctx(), &base, opts)?;
            self.buffer.include(base.clone(), value.clone());
            value
        };
        policy.apply_postfix(&self.ctx(), id, value, &postfix)
    }

    /// Update `id` with the resolver's default command.
    pub fn update(
        &mut self,
        id: &str,
        payload: impl Into<GameValue>,
    ) -> Result<UpdateOutcome, CoreError> {
        self.update_with(id, payload, &UpdateOptions::default())
    }

    /// Update `id`.
    ///
    /// The buffer entry for `id` is invalidated before the write. Bulk
    /// outcomes are expanded to one entry per leaf, every changed leaf is
    /// invalidated, and (unless suppressed) each leaf is forwarded to
    /// listener dispatch. Returns the normalized outcome.
    pub fn update_with(
        &mut self,
        id: &str,
        payload: impl Into<GameValue>,
        opts: &UpdateOptions,
    ) -> Result<UpdateOutcome, CoreError> {
        let id = GameId::parse(id)?;
        let payload = payload.into();
        let bus = self.bus;
        let entry = bus.resolvers.resolve(&id)?;
        self.invalidate_with(&entry.policy, &id);

        debug!(player = %self.target, game_id = %id, bulk = opts.bulk, "update");
        let outcome = entry.update.update(&self.ctx(), &id, &payload, opts)?;
        let changed = if opts.bulk {
            let mut leaves = ChangeSet::new();
            for (changed_id, value) in &outcome.changed {
                expand_bulk(changed_id, value, &mut leaves)?;
            }
            leaves
        } else {
            outcome.changed
        };
        for leaf in changed.keys() {
            self.invalidate(leaf);
        }
        let outcome = UpdateOutcome {
            command: outcome.command,
            changed,
        };
        if !opts.suppress_listeners && !outcome.changed.is_empty() {
            self.dispatch(&outcome)?;
        }
        Ok(outcome)
    }

    fn invalidate_with(&mut self, policy: &GetPolicy, id: &GameId) {
        self.buffer.invalidate(&policy.base_of(id), policy.is_dynamic());
    }

    /// Drop `id` from the buffer using its prefix's buffering policy.
    pub fn invalidate(&mut self, id: &GameId) {
        let bus = self.bus;
        match bus.resolvers.entry(id.prefix()) {
            Some(entry) => self.invalidate_with(&entry.policy, id),
            None => self.buffer.invalidate(id, false),
        }
    }

    fn dispatch(&mut self, outcome: &UpdateOutcome) -> Result<(), CoreError> {
        let bus = self.bus;
        let depth = self.depth.saturating_add(1);
        let records = self.player_listeners()?;

        let mut queued = Vec::new();
        for (leaf, value) in &outcome.changed {
            let change = Change {
                leaf: leaf.clone(),
                value: value.clone(),
                command: outcome.command,
            };
            if let Some(index) = bus.listeners.first_match(leaf) {
                queued.push(Pending {
                    reaction: Reaction::Global(index),
                    change: change.clone(),
                    depth,
                });
            }
            for record in records.iter().filter(|r| r.matches(leaf)) {
                queued.push(Pending {
                    reaction: Reaction::Player(record.effect.clone()),
                    change: change.clone(),
                    depth,
                });
            }
        }

        if let Some(first) = queued.first() {
            let limit = bus.config.max_listener_depth;
            if depth > limit {
                let id = first.change.leaf.to_string();
                self.pending.clear();
                return Err(CoreError::ListenerCascade { id, limit });
            }
            trace!(player = %self.target, depth, reactions = queued.len(), "queued listener reactions");
            self.pending.extend(queued);
        }

        if self.draining {
            return Ok(());
        }
        self.drain()
    }

    fn drain(&mut self) -> Result<(), CoreError> {
        self.draining = true;
        let result = self.drain_pending();
        self.draining = false;
        self.depth = 0;
        if result.is_err() {
            self.pending.clear();
        }
        result
    }

    fn drain_pending(&mut self) -> Result<(), CoreError> {
        let bus = self.bus;
        while let Some(Pending {
            reaction,
            change,
            depth,
        }) = self.pending.pop_front()
        {
            self.depth = depth;
            match reaction {
                Reaction::Global(index) => {
                    if let Some(handler) = bus.listeners.handler(index) {
                        handler.on_change(self, &change)?;
                    }
                }
                Reaction::Player(effect) => {
                    let ctx = EffectContext::for_change(change.leaf, change.value);
                    self.execute_effect(&effect, &ctx)?;
                }
            }
        }
        Ok(())
    }

    /// Run `effect` against this unit's target.
    pub fn execute_effect(
        &mut self,
        effect: &EffectData,
        ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        let bus = self.bus;
        let handler = bus.effects.get(&effect.kind)?;
        trace!(player = %self.target, effect = %effect.kind, "execute effect");
        handler.execute(self, effect, ctx)
    }

    /// The target's persisted listener records.
    pub fn player_listeners(&self) -> Result<Vec<PlayerListenerRecord>, CoreError> {
        let read = self
            .bus
            .store
            .read(Collection::Players, &self.target, &[PLAYER_LISTENERS_FIELD]);
        match read {
            Ok(Some(value)) => Ok(serde_json::from_value(value.to_json()).map_err(StoreError::from)?),
            Ok(None) | Err(StoreError::UnknownPlayer { .. }) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist a listener on each of `ids` into the target's document.
    pub fn register_player_listener(
        &mut self,
        ids: &[GameId],
        effect: &EffectData,
        starts_with: bool,
    ) -> Result<(), CoreError> {
        let ops = ids
            .iter()
            .map(|id| -> Result<FieldOp, CoreError> {
                let record = PlayerListenerRecord {
                    target_id: id.clone(),
                    starts_with,
                    effect: effect.clone(),
                };
                let value = serde_json::to_value(&record).map_err(StoreError::from)?;
                Ok(FieldOp::new(
                    &[PLAYER_LISTENERS_FIELD],
                    UpdateCommand::Push,
                    GameValue::from_json(value),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if ops.is_empty() {
            return Ok(());
        }
        self.bus
            .store
            .apply(Collection::Players, &self.target, &ops)?;
        self.forget_listener_field();
        debug!(player = %self.target, count = ops.len(), effect = %effect.kind, "player listeners registered");
        Ok(())
    }

    /// Remove every listener record of the target matching `predicate`.
    /// Returns the number of removed records.
    pub fn remove_player_listeners<P>(&mut self, predicate: P) -> Result<usize, CoreError>
    where
        P: Fn(&PlayerListenerRecord) -> bool,
    {
        let records = self.player_listeners()?;
        let before = records.len();
        let kept: Vec<PlayerListenerRecord> =
            records.into_iter().filter(|r| !predicate(r)).collect();
        let removed = before.saturating_sub(kept.len());
        if removed == 0 {
            return Ok(0);
        }
        let value = serde_json::to_value(&kept).map_err(StoreError::from)?;
        self.bus.store.apply(
            Collection::Players,
            &self.target,
            &[FieldOp::new(
                &[PLAYER_LISTENERS_FIELD],
                UpdateCommand::Set,
                GameValue::from_json(value),
            )],
        )?;
        self.forget_listener_field();
        debug!(player = %self.target, removed, "player listeners removed");
        Ok(removed)
    }

    fn forget_listener_field(&mut self) {
        if let Ok(id) = GameId::parse(DATA_PREFIX).and_then(|data| data.child(PLAYER_LISTENERS_FIELD)) {
            self.invalidate(&id);
        }
    }
}

impl std::fmt::Debug for Unit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("target", &self.target)
            .field("buffer", &self.buffer)
            .field("pending", &self.pending.len())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
