//! Persisted player-scoped listener records.

use serde::{Deserialize, Serialize};

use crate::effect::EffectData;
use crate::game_id::GameId;

/// Field of the player document holding the listener list.
pub const PLAYER_LISTENERS_FIELD: &str = "id_listeners";

/// A listener stored inside its owning player's document.
///
/// When a Game ID matching `target_id` changes for that player, the
/// embedded effect runs with the changed id and value as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerListenerRecord {
    /// Game ID this listener watches.
    pub target_id: GameId,

    /// Also fire for any id below `target_id`.
    #[serde(default)]
    pub starts_with: bool,

    /// Effect to run on a match.
    #[serde(flatten)]
    pub effect: EffectData,
}

impl PlayerListenerRecord {
    /// True if a change to `leaf` should fire this listener.
    pub fn matches(&self, leaf: &GameId) -> bool {
        if self.starts_with {
            self.target_id.covers(leaf)
        } else {
            self.target_id == *leaf
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn listener(target: &str, starts_with: bool) -> PlayerListenerRecord {
        PlayerListenerRecord {
            target_id: GameId::parse(target).unwrap(),
            starts_with,
            effect: EffectData::new("quest_progress"),
        }
    }

    fn gid(raw: &str) -> GameId {
        GameId::parse(raw).unwrap()
    }

    #[test]
    fn exact_listener_ignores_children() {
        let l = listener("data.gold", false);
        assert!(l.matches(&gid("data.gold")));
        assert!(!l.matches(&gid("data.gold.bag")));
    }

    #[test]
    fn prefix_listener_matches_on_segment_boundary() {
        let l = listener("quest.a", true);
        assert!(l.matches(&gid("quest.a")));
        assert!(l.matches(&gid("quest.a.step1")));
        assert!(!l.matches(&gid("quest.b")));
        assert!(!l.matches(&gid("quest.ab")));
    }

    #[test]
    fn persists_flat_layout() {
        let json = serde_json::to_value(listener("quest.a", true)).unwrap();
        assert_eq!(json["target_id"], "quest.a");
        assert_eq!(json["starts_with"], true);
        assert_eq!(json["effect_type"], "quest_progress");
    }
}
