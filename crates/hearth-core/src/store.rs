//! Document store contract and the in-memory implementation.
//!
//! The core only needs point reads and atomic multi-field updates on a
//! per-player document. Player documents hold gameplay state (and the
//! persisted listener list); statistics live in a separate document per
//! player so counters never contend with gameplay fields.

use std::collections::HashMap;
use std::sync::RwLock;

use hearth_types::{GameValue, PlayerId, UpdateCommand};

use crate::error::StoreError;

/// Which per-player document an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// The player's gameplay document. Must be created explicitly.
    Players,
    /// The player's statistics document. Created on first write.
    Statistics,
}

impl Collection {
    /// Stable name, used as table name by persistent backends.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Players => "players",
            Self::Statistics => "player_statistics",
        }
    }
}

/// One field update inside an atomic [`DocumentStore::apply`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOp {
    /// Path of the field below the document root. Never empty.
    pub path: Vec<String>,
    /// What to do with the field.
    pub command: UpdateCommand,
    /// Operand of the command (ignored by `Unset`).
    pub value: GameValue,
}

impl FieldOp {
    /// Build an operation from a path of segments.
    pub fn new<S: AsRef<str>>(path: &[S], command: UpdateCommand, value: GameValue) -> Self {
        Self {
            path: path.iter().map(|s| s.as_ref().to_owned()).collect(),
            command,
            value,
        }
    }
}

/// Storage contract required by the core.
///
/// Implementations must apply all operations of one `apply` call
/// atomically: either every field changes or none does.
pub trait DocumentStore: Send + Sync {
    /// True if a gameplay document exists for `player`.
    fn player_exists(&self, player: &PlayerId) -> Result<bool, StoreError>;

    /// Create (or replace) the gameplay document of `player`.
    fn create_player(&self, player: &PlayerId, document: GameValue) -> Result<(), StoreError>;

    /// Read the value at `path` (the whole document for an empty path).
    ///
    /// Returns `Ok(None)` when the field does not exist. Reading the
    /// gameplay document of an unknown player is an error; an absent
    /// statistics document reads as empty.
    fn read(
        &self,
        collection: Collection,
        player: &PlayerId,
        path: &[&str],
    ) -> Result<Option<GameValue>, StoreError>;

    /// Atomically apply `ops` and return the resulting value of every
    /// touched field, in operation order.
    fn apply(
        &self,
        collection: Collection,
        player: &PlayerId,
        ops: &[FieldOp],
    ) -> Result<Vec<GameValue>, StoreError>;
}

/// Apply one field operation to a document and return the field's new
/// value. Shared by every backend so the command semantics stay identical.
pub fn apply_field_op(document: &mut GameValue, op: &FieldOp) -> Result<GameValue, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidOperation {
        path: op.path.join("."),
        command: op.command,
        reason: reason.to_owned(),
    };
    if op.path.is_empty() {
        return Err(invalid("empty field path"));
    }
    match op.command {
        UpdateCommand::Set => {
            *document.slot_mut(&op.path) = op.value.clone();
            Ok(op.value.clone())
        }
        UpdateCommand::Inc => {
            let slot = document.slot_mut(&op.path);
            let next = slot
                .incremented_by(&op.value)
                .ok_or_else(|| invalid("field and operand must be numeric"))?;
            *slot = next.clone();
            Ok(next)
        }
        UpdateCommand::Push => {
            let slot = document.slot_mut(&op.path);
            if slot.is_null() {
                *slot = GameValue::List(Vec::new());
            }
            match slot {
                GameValue::List(items) => {
                    items.push(op.value.clone());
                    Ok(GameValue::List(items.clone()))
                }
                _ => Err(invalid("field is not a list")),
            }
        }
        UpdateCommand::Unset => {
            document.remove_path(&op.path);
            Ok(GameValue::Null)
        }
    }
}

type DocumentKey = (Collection, PlayerId);

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentKey, GameValue>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend {
        message: "memory store lock poisoned".to_owned(),
    }
}

fn unknown(player: &PlayerId) -> StoreError {
    StoreError::UnknownPlayer {
        player: player.to_string(),
    }
}

impl DocumentStore for MemoryStore {
    fn player_exists(&self, player: &PlayerId) -> Result<bool, StoreError> {
        let documents = self.documents.read().map_err(|_poison| poisoned())?;
        Ok(documents.contains_key(&(Collection::Players, player.clone())))
    }

    fn create_player(&self, player: &PlayerId, document: GameValue) -> Result<(), StoreError> {
        let mut documents = self.documents.write().map_err(|_poison| poisoned())?;
        documents.insert((Collection::Players, player.clone()), document);
        Ok(())
    }

    fn read(
        &self,
        collection: Collection,
        player: &PlayerId,
        path: &[&str],
    ) -> Result<Option<GameValue>, StoreError> {
        let documents = self.documents.read().map_err(|_poison| poisoned())?;
        match documents.get(&(collection, player.clone())) {
            Some(document) => Ok(document.walk(path.iter().copied()).cloned()),
            None if collection == Collection::Players => Err(unknown(player)),
            None => Ok(None),
        }
    }

    fn apply(
        &self,
        collection: Collection,
        player: &PlayerId,
        ops: &[FieldOp],
    ) -> Result<Vec<GameValue>, StoreError> {
        let mut documents = self.documents.write().map_err(|_poison| poisoned())?;
        let key = (collection, player.clone());
        let mut working = match documents.get(&key) {
            Some(document) => document.clone(),
            None if collection == Collection::Players => return Err(unknown(player)),
            None => GameValue::empty_map(),
        };
        let results = ops
            .iter()
            .map(|op| apply_field_op(&mut working, op))
            .collect::<Result<Vec<_>, _>>()?;
        documents.insert(key, working);
        Ok(results)
    }
}
