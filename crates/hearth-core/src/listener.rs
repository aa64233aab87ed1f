//! Global, pattern-based change listeners.
//!
//! Patterns are regular expressions matched against changed leaf ids.
//! For each leaf only the first matching listener fires. Order is given by
//! an explicit priority (lower first) and, on ties, by registration order.

use hearth_types::{GameId, GameValue, UpdateCommand};
use regex::Regex;

use crate::bus::Unit;
use crate::error::{CoreError, RegistryError};

/// One normalized change handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// The changed leaf id.
    pub leaf: GameId,
    /// Its new value.
    pub value: GameValue,
    /// The command that produced it.
    pub command: UpdateCommand,
}

/// Reaction to changes matching a global pattern.
pub trait GlobalListener: Send + Sync {
    /// Called once per matching changed leaf, with the unit of the player
    /// whose state changed.
    fn on_change(&self, unit: &mut Unit<'_>, change: &Change) -> Result<(), CoreError>;
}

/// Priority used by [`crate::bus::BusBuilder::register_global_listener`].
pub const DEFAULT_PRIORITY: i32 = 0;

struct Entry {
    pattern: Regex,
    priority: i32,
    handler: Box<dyn GlobalListener>,
}

/// Ordered set of global listeners.
#[derive(Default)]
pub struct GlobalListeners {
    entries: Vec<Entry>,
}

impl GlobalListeners {
    /// Compile and insert a listener. Stable insertion keeps registration
    /// order among equal priorities.
    pub(crate) fn register(
        &mut self,
        pattern: &str,
        priority: i32,
        handler: Box<dyn GlobalListener>,
    ) -> Result<(), RegistryError> {
        let compiled = Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        let at = self.entries.partition_point(|e| e.priority <= priority);
        self.entries.insert(
            at,
            Entry {
                pattern: compiled,
                priority,
                handler,
            },
        );
        Ok(())
    }

    /// Index of the first listener whose pattern matches `leaf`.
    pub fn first_match(&self, leaf: &GameId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.pattern.is_match(leaf.as_str()))
    }

    /// The handler at `index`.
    pub(crate) fn handler(&self, index: usize) -> Option<&dyn GlobalListener> {
        match self.entries.get(index) {
            Some(entry) => Some(entry.handler.as_ref()),
            None => None,
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for GlobalListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|e| (e.priority, e.pattern.as_str())),
            )
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    impl GlobalListener for Noop {
        fn on_change(&self, _unit: &mut Unit<'_>, _change: &Change) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn id(raw: &str) -> GameId {
        GameId::parse(raw).unwrap()
    }

    #[test]
    fn first_match_follows_registration_order() {
        let mut listeners = GlobalListeners::default();
        listeners.register(".*", 0, Box::new(Noop)).unwrap();
        listeners.register(r"^data\.foo\.", 0, Box::new(Noop)).unwrap();
        assert_eq!(listeners.first_match(&id("data.foo.bar")), Some(0));
    }

    #[test]
    fn priority_overrides_registration_order() {
        let mut listeners = GlobalListeners::default();
        listeners.register(".*", 10, Box::new(Noop)).unwrap();
        listeners.register(r"^data\.foo\.", -1, Box::new(Noop)).unwrap();
        listeners.register(r"^data\.", -1, Box::new(Noop)).unwrap();
        assert_eq!(listeners.first_match(&id("data.foo.bar")), Some(0));
        assert_eq!(listeners.first_match(&id("data.other")), Some(1));
        assert_eq!(listeners.first_match(&id("stat.x")), Some(2));
    }

    #[test]
    fn no_match() {
        let mut listeners = GlobalListeners::default();
        listeners.register(r"^data\.foo\.", 0, Box::new(Noop)).unwrap();
        assert_eq!(listeners.first_match(&id("data.other.bar")), None);
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let mut listeners = GlobalListeners::default();
        let err = listeners.register("(unclosed", 0, Box::new(Noop)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
        assert!(listeners.is_empty());
    }
}
