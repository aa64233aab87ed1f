//! Hierarchical Game IDs.
//!
//! A Game ID is a dot-separated path such as `data.storage.content.gold`.
//! The first segment is the *prefix* that selects a resolver; every other
//! segment addresses deeper state below it. Segments are never empty and
//! never contain whitespace.

use serde::{Deserialize, Serialize};

/// Separator between Game ID segments.
pub const SEPARATOR: char = '.';

/// Reasons a string is not a valid Game ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameIdError {
    /// The id was the empty string.
    #[error("game id is empty")]
    Empty,

    /// Two separators were adjacent, or the id started or ended with one.
    #[error("game id `{id}` contains an empty segment")]
    EmptySegment {
        /// The offending id.
        id: String,
    },

    /// A segment contained whitespace or a control character.
    #[error("game id `{id}` contains invalid character {found:?}")]
    InvalidCharacter {
        /// The offending id.
        id: String,
        /// The first invalid character.
        found: char,
    },
}

/// A validated, dot-separated Game ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    /// Parse and validate a Game ID.
    ///
    /// # Errors
    ///
    /// Returns [`GameIdError`] if the id is empty, has an empty segment,
    /// or contains whitespace/control characters.
    pub fn parse(raw: &str) -> Result<Self, GameIdError> {
        validate(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the full id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first segment, which selects the resolver.
    pub fn prefix(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }

    /// Iterate over all segments, prefix first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The id cut down to its first `depth` segments.
    ///
    /// Returns `None` for a depth of zero. A depth at or beyond the id's
    /// own depth returns the id unchanged.
    pub fn truncated(&self, depth: usize) -> Option<Self> {
        let cut = depth.checked_sub(1)?;
        match self.0.match_indices(SEPARATOR).nth(cut) {
            Some((idx, _)) => self.0.get(..idx).map(|s| Self(s.to_owned())),
            None => Some(self.clone()),
        }
    }

    /// The id one level up, or `None` for a bare prefix.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .and_then(|idx| self.0.get(..idx))
            .map(|s| Self(s.to_owned()))
    }

    /// Append one or more segments (`segment` may itself contain dots).
    ///
    /// # Errors
    ///
    /// Returns [`GameIdError`] if the resulting id is invalid.
    pub fn child(&self, segment: &str) -> Result<Self, GameIdError> {
        Self::parse(&format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// True if `self` is a strict dot-path ancestor of `other`
    /// (`a.b` is an ancestor of `a.b.c` but not of `a.bc`).
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// True if `self` equals `other` or is one of its ancestors.
    pub fn covers(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Segments of `self` below `ancestor`, or `None` if `ancestor` does
    /// not cover `self`. Equal ids yield an empty list.
    pub fn relative_to(&self, ancestor: &Self) -> Option<Vec<&str>> {
        if self == ancestor {
            return Some(Vec::new());
        }
        let rest = self.0.strip_prefix(ancestor.0.as_str())?;
        let rest = rest.strip_prefix(SEPARATOR)?;
        Some(rest.split(SEPARATOR).collect())
    }

    /// Strict ancestors as string slices, longest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        self.0
            .rmatch_indices(SEPARATOR)
            .filter_map(|(idx, _)| self.0.get(..idx))
    }
}

impl core::fmt::Display for GameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GameId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for GameId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GameId {
    type Error = GameIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        validate(&raw)?;
        Ok(Self(raw))
    }
}

impl TryFrom<&str> for GameId {
    type Error = GameIdError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<GameId> for String {
    fn from(id: GameId) -> Self {
        id.0
    }
}

impl core::str::FromStr for GameId {
    type Err = GameIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

fn validate(raw: &str) -> Result<(), GameIdError> {
    if raw.is_empty() {
        return Err(GameIdError::Empty);
    }
    if raw.split(SEPARATOR).any(str::is_empty) {
        return Err(GameIdError::EmptySegment { id: raw.to_owned() });
    }
    if let Some(found) = raw.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(GameIdError::InvalidCharacter {
            id: raw.to_owned(),
            found,
        });
    }
    Ok(())
}
