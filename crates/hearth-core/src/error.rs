//! Error taxonomy of the Game-ID bus.
//!
//! Boot-time registration problems surface as [`RegistryError`] and are
//! fatal. Everything raised while serving a unit of work is funnelled into
//! [`CoreError`], which propagates to the request boundary (interactive
//! processing) or is contained by the event scheduler (background work).

use hearth_types::GameIdError;

/// Configuration errors raised while registering resolvers, listeners and
/// effects. These are fatal at boot.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A get resolver was registered twice for the same prefix.
    #[error("get resolver for prefix `{prefix}` registered twice")]
    DuplicateGet {
        /// The prefix registered twice.
        prefix: String,
    },

    /// An update resolver was registered twice for the same prefix.
    #[error("update resolver for prefix `{prefix}` registered twice")]
    DuplicateUpdate {
        /// The prefix registered twice.
        prefix: String,
    },

    /// A prefix has a get resolver but no update resolver.
    #[error("prefix `{prefix}` has a get resolver but no update resolver")]
    MissingUpdate {
        /// The incomplete prefix.
        prefix: String,
    },

    /// A prefix has an update resolver but no get resolver.
    #[error("prefix `{prefix}` has an update resolver but no get resolver")]
    MissingGet {
        /// The incomplete prefix.
        prefix: String,
    },

    /// A prefix is not a single valid Game ID segment.
    #[error("`{prefix}` is not a valid resolver prefix")]
    InvalidPrefix {
        /// The rejected prefix.
        prefix: String,
    },

    /// A postfix start of zero was requested.
    #[error("postfix start for prefix `{prefix}` must be at least 1")]
    InvalidPostfixStart {
        /// The prefix being registered.
        prefix: String,
    },

    /// A global listener pattern failed to compile.
    #[error("invalid listener pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
    },

    /// An effect kind was registered twice.
    #[error("effect kind `{kind}` registered twice")]
    DuplicateEffect {
        /// The kind registered twice.
        kind: String,
    },

    /// A periodic event type was registered twice.
    #[error("periodic type `{name}` registered twice")]
    DuplicatePeriodicType {
        /// The type registered twice.
        name: String,
    },
}

/// A Game ID could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The id is syntactically invalid.
    #[error("malformed game id: {source}")]
    MalformedId {
        /// The underlying parse error.
        #[from]
        source: GameIdError,
    },

    /// No resolver is registered for the id's prefix.
    #[error("no resolver registered for prefix `{prefix}`")]
    UnknownPrefix {
        /// The unresolvable prefix.
        prefix: String,
    },

    /// The addressed value does not exist.
    #[error("game id `{id}` does not resolve to a value")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A resolver refused the request (unsupported command, bad payload).
    #[error("resolver rejected `{id}`: {reason}")]
    Rejected {
        /// The id of the rejected request.
        id: String,
        /// Why the resolver refused.
        reason: String,
    },
}

/// The ID buffer contradicted itself.
///
/// Raised when an id reported as contained cannot be evaluated. Never
/// expected in correct operation.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Neither the id nor any of its ancestors is cached.
    #[error("buffer claims to contain `{id}` but holds no entry covering it")]
    Inconsistent {
        /// The id that failed to evaluate.
        id: String,
    },
}

/// The document store failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No document exists for the player.
    #[error("unknown player `{player}`")]
    UnknownPlayer {
        /// The missing player.
        player: String,
    },

    /// A field operation cannot be applied to the current field value.
    #[error("cannot apply {command} at `{path}`: {reason}")]
    InvalidOperation {
        /// Document path of the field.
        path: String,
        /// The command that failed.
        command: hearth_types::UpdateCommand,
        /// Why it failed.
        reason: String,
    },

    /// A stored document could not be (de)serialized.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// The storage backend failed.
    #[error("store backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

/// An effect could not be executed.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    /// No handler is registered for the effect kind.
    #[error("unknown effect kind `{kind}`")]
    UnknownKind {
        /// The unknown kind.
        kind: String,
    },

    /// A required field is absent.
    #[error("effect `{kind}` is missing field `{field}`")]
    MissingField {
        /// The effect kind.
        kind: String,
        /// The missing field.
        field: String,
    },

    /// A field has the wrong shape.
    #[error("effect `{kind}` has invalid field `{field}`: {reason}")]
    InvalidField {
        /// The effect kind.
        kind: String,
        /// The offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The effect's own logic failed.
    #[error("effect `{kind}` failed: {message}")]
    Failed {
        /// The effect kind.
        kind: String,
        /// Description of the failure.
        message: String,
    },
}

/// Umbrella error for get, update, listener and effect processing.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Resolution failed.
    #[error("resolution error: {source}")]
    Resolution {
        /// The underlying resolution error.
        #[from]
        source: ResolutionError,
    },

    /// The ID buffer is inconsistent.
    #[error("buffer error: {source}")]
    Buffer {
        /// The underlying buffer error.
        #[from]
        source: BufferError,
    },

    /// The document store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// An effect failed.
    #[error("effect error: {source}")]
    Effect {
        /// The underlying effect error.
        #[from]
        source: EffectError,
    },

    /// Listener reactions kept triggering further reactions past the limit.
    #[error("listener cascade exceeded depth {limit} at `{id}`")]
    ListenerCascade {
        /// The change that would have exceeded the limit.
        id: String,
        /// The configured limit.
        limit: usize,
    },
}

impl From<GameIdError> for CoreError {
    fn from(source: GameIdError) -> Self {
        Self::Resolution {
            source: ResolutionError::MalformedId { source },
        }
    }
}

impl CoreError {
    /// True if this error reports a value that does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Resolution {
                source: ResolutionError::NotFound { .. }
            }
        )
    }
}
