//! Update command kinds.

use serde::{Deserialize, Serialize};

/// How an update payload is applied to the addressed field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateCommand {
    /// Overwrite the field.
    #[default]
    Set,
    /// Add a numeric delta to the field (missing counts as zero).
    Inc,
    /// Append to a sequence field (missing counts as empty).
    Push,
    /// Remove the field.
    Unset,
}

impl UpdateCommand {
    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Inc => "inc",
            Self::Push => "push",
            Self::Unset => "unset",
        }
    }
}

impl core::fmt::Display for UpdateCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
