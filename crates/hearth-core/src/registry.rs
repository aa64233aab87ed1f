//! Boot-time resolver registry.
//!
//! Every Game ID prefix maps to exactly one get handler and one update
//! handler. Registration happens on a [`RegistryBuilder`] during boot;
//! [`RegistryBuilder::build`] checks that every prefix is complete and
//! yields an immutable [`ResolverRegistry`] that is shared by all units.

use std::collections::{BTreeMap, HashMap};

use hearth_types::game_id::SEPARATOR;
use hearth_types::{GameId, GameValue, PlayerId, UpdateCommand};

use crate::error::{CoreError, RegistryError, ResolutionError};
use crate::store::DocumentStore;

/// Resolved changes of one update: leaf Game ID to its new value.
pub type ChangeSet = BTreeMap<GameId, GameValue>;

/// What a resolver handler gets to see besides the id.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Player the request acts on.
    pub target: &'a PlayerId,
    /// Shared document store.
    pub store: &'a dyn DocumentStore,
}

impl std::fmt::Debug for ResolveContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveContext")
            .field("target", self.target)
            .finish_non_exhaustive()
    }
}

/// Options of a get request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    /// Returned instead of a not-found error.
    pub default_value: Option<GameValue>,
    /// Skip the buffer lookup and always call the resolver.
    pub bypass_buffer: bool,
}

impl GetOptions {
    /// Options returning `value` when the id does not resolve.
    pub fn with_default(value: impl Into<GameValue>) -> Self {
        Self {
            default_value: Some(value.into()),
            bypass_buffer: false,
        }
    }
}

/// Options of an update request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Command to apply; `None` uses the resolver's default.
    pub command: Option<UpdateCommand>,
    /// The payload is a mapping of relative keys to values, one field each.
    pub bulk: bool,
    /// Do not notify listeners about the resulting changes.
    pub suppress_listeners: bool,
}

impl UpdateOptions {
    /// Options with an explicit command.
    pub fn command(command: UpdateCommand) -> Self {
        Self {
            command: Some(command),
            ..Self::default()
        }
    }

    /// Options for a bulk update.
    pub fn bulk() -> Self {
        Self {
            bulk: true,
            ..Self::default()
        }
    }

    /// Builder-style listener suppression.
    #[must_use]
    pub const fn quiet(mut self) -> Self {
        self.suppress_listeners = true;
        self
    }
}

/// Normalized result of an update handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Command that was applied.
    pub command: UpdateCommand,
    /// Every changed Game ID with its new value.
    pub changed: ChangeSet,
}

/// Resolves Game IDs of one prefix to values.
pub trait GetResolver: Send + Sync {
    /// Resolve `id` (already cut to the resolver's base depth).
    fn get(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        opts: &GetOptions,
    ) -> Result<GameValue, CoreError>;
}

/// Writes Game IDs of one prefix.
pub trait UpdateResolver: Send + Sync {
    /// Apply `payload` at `id` and report what changed.
    fn update(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        payload: &GameValue,
        opts: &UpdateOptions,
    ) -> Result<UpdateOutcome, CoreError>;
}

/// Post-processes a base value with the trailing segments of an id.
pub trait PostfixResolver: Send + Sync {
    /// Derive the value addressed by `postfix` from `base`.
    fn apply(
        &self,
        ctx: &ResolveContext<'_>,
        base: &GameValue,
        postfix: &[&str],
    ) -> Result<GameValue, CoreError>;
}

/// Buffering and postfix policy of a get handler.
#[derive(Default)]
pub struct GetPolicy {
    dynamic_buffer: bool,
    postfix_start: Option<usize>,
    postfix: Option<Box<dyn PostfixResolver>>,
}

impl GetPolicy {
    /// Cache only exact ids.
    pub fn fixed() -> Self {
        Self::default()
    }

    /// Cached values also answer requests for deeper paths.
    pub fn dynamic() -> Self {
        Self {
            dynamic_buffer: true,
            ..Self::default()
        }
    }

    /// Cut ids to `start` segments before resolving; the remaining
    /// segments are handed to `handler`.
    #[must_use]
    pub fn with_postfix(mut self, start: usize, handler: impl PostfixResolver + 'static) -> Self {
        self.postfix_start = Some(start);
        self.postfix = Some(Box::new(handler));
        self
    }

    /// Cut ids to `start` segments before resolving; the remaining
    /// segments are walked inside the base value.
    #[must_use]
    pub const fn with_base_depth(mut self, start: usize) -> Self {
        self.postfix_start = Some(start);
        self
    }

    /// Whether dynamic buffering is enabled.
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic_buffer
    }

    /// Configured base depth, if any.
    pub const fn postfix_start(&self) -> Option<usize> {
        self.postfix_start
    }

    /// The id the base handler is called with for `id`.
    pub fn base_of(&self, id: &GameId) -> GameId {
        self.postfix_start
            .and_then(|start| id.truncated(start))
            .unwrap_or_else(|| id.clone())
    }

    /// Apply the postfix segments to a resolved base value.
    ///
    /// Without a postfix handler the segments are walked inside the base
    /// value; a missing path is reported as not found.
    pub fn apply_postfix(
        &self,
        ctx: &ResolveContext<'_>,
        id: &GameId,
        base: GameValue,
        postfix: &[&str],
    ) -> Result<GameValue, CoreError> {
        if postfix.is_empty() {
            return Ok(base);
        }
        match &self.postfix {
            Some(handler) => handler.apply(ctx, &base, postfix),
            None => base
                .walk(postfix.iter().copied())
                .cloned()
                .ok_or_else(|| {
                    ResolutionError::NotFound {
                        id: id.to_string(),
                    }
                    .into()
                }),
        }
    }
}

impl std::fmt::Debug for GetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetPolicy")
            .field("dynamic_buffer", &self.dynamic_buffer)
            .field("postfix_start", &self.postfix_start)
            .field("postfix", &self.postfix.is_some())
            .finish()
    }
}

/// A complete registration for one prefix.
pub struct ResolverEntry {
    /// The prefix this entry serves.
    pub prefix: String,
    /// Get handler.
    pub get: Box<dyn GetResolver>,
    /// Update handler.
    pub update: Box<dyn UpdateResolver>,
    /// Buffering and postfix policy.
    pub policy: GetPolicy,
}

impl std::fmt::Debug for ResolverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverEntry")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Immutable prefix-to-resolver table.
#[derive(Debug, Default)]
pub struct ResolverRegistry {
    entries: HashMap<String, ResolverEntry>,
}

impl ResolverRegistry {
    /// Look up the entry for `id`'s prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::UnknownPrefix`] when nothing is registered.
    pub fn resolve(&self, id: &GameId) -> Result<&ResolverEntry, ResolutionError> {
        self.entries
            .get(id.prefix())
            .ok_or_else(|| ResolutionError::UnknownPrefix {
                prefix: id.prefix().to_owned(),
            })
    }

    /// Look up an entry by prefix.
    pub fn entry(&self, prefix: &str) -> Option<&ResolverEntry> {
        self.entries.get(prefix)
    }

    /// All registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        prefixes.sort_unstable();
        prefixes
    }
}

/// Collects registrations during boot.
#[derive(Default)]
pub struct RegistryBuilder {
    gets: BTreeMap<String, (Box<dyn GetResolver>, GetPolicy)>,
    updates: BTreeMap<String, Box<dyn UpdateResolver>>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("gets", &self.gets.keys().collect::<Vec<_>>())
            .field("updates", &self.updates.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_prefix(prefix: &str) -> Result<(), RegistryError> {
    if prefix.contains(SEPARATOR) || GameId::parse(prefix).is_err() {
        return Err(RegistryError::InvalidPrefix {
            prefix: prefix.to_owned(),
        });
    }
    Ok(())
}

impl RegistryBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the get handler of `prefix`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid prefix, a zero postfix start, or a second
    /// registration for the same prefix.
    pub fn register_get(
        &mut self,
        prefix: &str,
        handler: impl GetResolver + 'static,
        policy: GetPolicy,
    ) -> Result<(), RegistryError> {
        check_prefix(prefix)?;
        if policy.postfix_start == Some(0) {
            return Err(RegistryError::InvalidPostfixStart {
                prefix: prefix.to_owned(),
            });
        }
        if self.gets.contains_key(prefix) {
            return Err(RegistryError::DuplicateGet {
                prefix: prefix.to_owned(),
            });
        }
        self.gets
            .insert(prefix.to_owned(), (Box::new(handler), policy));
        Ok(())
    }

    /// Register the update handler of `prefix`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid prefix or a second registration for the same
    /// prefix.
    pub fn register_update(
        &mut self,
        prefix: &str,
        handler: impl UpdateResolver + 'static,
    ) -> Result<(), RegistryError> {
        check_prefix(prefix)?;
        if self.updates.contains_key(prefix) {
            return Err(RegistryError::DuplicateUpdate {
                prefix: prefix.to_owned(),
            });
        }
        self.updates.insert(prefix.to_owned(), Box::new(handler));
        Ok(())
    }

    /// Pair up get and update handlers into the final registry.
    ///
    /// # Errors
    ///
    /// Fails if any prefix lacks one of the two halves.
    pub fn build(self) -> Result<ResolverRegistry, RegistryError> {
        let Self { gets, mut updates } = self;
        let mut entries = HashMap::with_capacity(gets.len());
        for (prefix, (get, policy)) in gets {
            let Some(update) = updates.remove(&prefix) else {
                return Err(RegistryError::MissingUpdate { prefix });
            };
            entries.insert(
                prefix.clone(),
                ResolverEntry {
                    prefix,
                    get,
                    update,
                    policy,
                },
            );
        }
        if let Some(prefix) = updates.into_keys().next() {
            return Err(RegistryError::MissingGet { prefix });
        }
        Ok(ResolverRegistry { entries })
    }
}

/// Expand a bulk payload into one entry per leaf below `id`.
///
/// Non-empty mappings are descended into (their keys may themselves be
/// dotted relative paths); everything else is a leaf.
pub fn expand_bulk(id: &GameId, value: &GameValue, out: &mut ChangeSet) -> Result<(), CoreError> {
    match value {
        GameValue::Map(fields) if !fields.is_empty() => {
            for (key, child) in fields {
                expand_bulk(&id.child(key)?, child, out)?;
            }
            Ok(())
        }
        leaf => {
            out.insert(id.clone(), leaf.clone());
            Ok(())
        }
    }
}
