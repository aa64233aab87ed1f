//! Unit-scoped memoizing cache for resolved Game IDs.
//!
//! A buffer lives for exactly one unit of work (one player request, one
//! scheduled event) and is dropped with it. With *dynamic* buffering a
//! cached value also answers requests for any path below its key, so a
//! single resolver call for `data.storage` serves `data.storage.content.gold`.
//!
//! Dynamic invalidation never throws away more than it has to: if the
//! invalidated id lies below a cached key, the cached value is split into
//! its children (recursively, toward the invalidated id) so siblings stay
//! cached.

use std::collections::HashMap;

use hearth_types::game_id::SEPARATOR;
use hearth_types::{GameId, GameValue};

use crate::error::BufferError;

/// Per-unit cache of resolved values, keyed by Game ID.
#[derive(Debug, Default)]
pub struct IdBuffer {
    entries: HashMap<GameId, GameValue>,
}

impl IdBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` can be answered from the buffer.
    ///
    /// Exact keys always match; with `dynamic` any cached ancestor matches.
    pub fn contains(&self, id: &GameId, dynamic: bool) -> bool {
        self.entries.contains_key(id) || (dynamic && self.longest_ancestor(id).is_some())
    }

    /// Evaluate `id` from the buffer.
    ///
    /// Returns `Ok(None)` when the longest cached ancestor does not hold the
    /// remaining path, which means the value does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Inconsistent`] if nothing in the buffer
    /// covers `id`. Callers check [`IdBuffer::contains`] first.
    pub fn evaluate(&self, id: &GameId, dynamic: bool) -> Result<Option<&GameValue>, BufferError> {
        if let Some(value) = self.entries.get(id) {
            return Ok(Some(value));
        }
        let inconsistent = || BufferError::Inconsistent { id: id.to_string() };
        if !dynamic {
            return Err(inconsistent());
        }
        let (key, value) = self.longest_ancestor(id).ok_or_else(inconsistent)?;
        let rest = id.relative_to(key).ok_or_else(inconsistent)?;
        Ok(value.walk(rest))
    }

    /// Cache `value` under `id`.
    pub fn include(&mut self, id: GameId, value: GameValue) {
        self.entries.insert(id, value);
    }

    /// Drop `id` from the buffer.
    ///
    /// Non-dynamic invalidation deletes the exact key. Dynamic invalidation
    /// also drops every cached key below `id`, drops every cached ancestor
    /// of `id` except the longest, and splits that one so that only `id`
    /// itself is lost.
    pub fn invalidate(&mut self, id: &GameId, dynamic: bool) {
        self.entries.remove(id);
        if !dynamic {
            return;
        }
        let longest = self.longest_ancestor(id).map(|(key, _)| key.clone());
        self.entries.retain(|key, _| {
            let coarser = key.is_ancestor_of(id) && longest.as_ref() != Some(key);
            !coarser && !id.is_ancestor_of(key)
        });
        self.split_towards(id);
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn longest_ancestor(&self, id: &GameId) -> Option<(&GameId, &GameValue)> {
        id.ancestors()
            .find_map(|ancestor| self.entries.get_key_value(ancestor))
    }

    fn split_towards(&mut self, id: &GameId) {
        let Some(mut current) = self.longest_ancestor(id).map(|(key, _)| key.clone()) else {
            return;
        };
        while current != *id {
            let Some(value) = self.entries.remove(&current) else {
                break;
            };
            // Scalars have nothing below them; the path to `id` is gone.
            let Ok(children) = value.into_children() else {
                break;
            };
            for (segment, child) in children {
                // Keys that are not a single valid segment cannot be
                // re-addressed; leaving them out only costs a cache miss.
                if segment.contains(SEPARATOR) {
                    continue;
                }
                if let Ok(key) = current.child(&segment) {
                    self.entries.insert(key, child);
                }
            }
            let next = id
                .relative_to(&current)
                .and_then(|rest| rest.first().map(|segment| current.child(segment)));
            match next {
                Some(Ok(next)) => current = next,
                _ => break,
            }
        }
        self.entries.remove(id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(raw: &str) -> GameId {
        GameId::parse(raw).unwrap()
    }

    fn nested() -> GameValue {
        GameValue::map([
            ("b", GameValue::Int(1)),
            (
                "c",
                GameValue::map([("d", GameValue::Int(2)), ("e", GameValue::Int(3))]),
            ),
        ])
    }

    #[test]
    fn exact_hit_without_dynamic() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("stat.x"), GameValue::Int(4));
        assert!(buffer.contains(&id("stat.x"), false));
        assert!(!buffer.contains(&id("stat.x.y"), false));
        assert_eq!(
            buffer.evaluate(&id("stat.x"), false).unwrap(),
            Some(&GameValue::Int(4))
        );
    }

    #[test]
    fn dynamic_hit_walks_longest_ancestor() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("a"), nested());
        buffer.include(id("a.c"), GameValue::map([("d", GameValue::Int(20))]));
        assert!(buffer.contains(&id("a.c.d"), true));
        assert_eq!(
            buffer.evaluate(&id("a.c.d"), true).unwrap(),
            Some(&GameValue::Int(20))
        );
        assert_eq!(buffer.evaluate(&id("a.zzz"), true).unwrap(), None);
    }

    #[test]
    fn dynamic_contains_respects_segment_boundaries() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("quest.a"), GameValue::Int(1));
        assert!(!buffer.contains(&id("quest.ab"), true));
    }

    #[test]
    fn evaluate_without_cover_is_inconsistent() {
        let buffer = IdBuffer::new();
        assert!(matches!(
            buffer.evaluate(&id("a.b"), true),
            Err(BufferError::Inconsistent { .. })
        ));
    }

    #[test]
    fn split_preserves_siblings() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("a"), nested());
        buffer.invalidate(&id("a.c.d"), true);

        assert!(!buffer.contains(&id("a"), false));
        assert!(!buffer.contains(&id("a.c.d"), true));
        assert_eq!(
            buffer.evaluate(&id("a.b"), true).unwrap(),
            Some(&GameValue::Int(1))
        );
        assert_eq!(
            buffer.evaluate(&id("a.c.e"), true).unwrap(),
            Some(&GameValue::Int(3))
        );
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn split_through_scalar_drops_path() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("a"), nested());
        buffer.invalidate(&id("a.b.x"), true);
        assert!(!buffer.contains(&id("a.b"), true));
        assert!(buffer.contains(&id("a.c.d"), true));
    }

    #[test]
    fn dynamic_invalidation_drops_finer_keys() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("a.c"), GameValue::Int(1));
        buffer.include(id("a.c.d"), GameValue::Int(2));
        buffer.include(id("a.cd"), GameValue::Int(3));
        buffer.invalidate(&id("a.c"), true);
        assert!(!buffer.contains(&id("a.c.d"), true));
        assert!(buffer.contains(&id("a.cd"), false));
    }

    #[test]
    fn every_cached_ancestor_is_invalidated() {
        let mut buffer = IdBuffer::new();
        let z = GameValue::map([("w", GameValue::Int(1)), ("v", GameValue::Int(2))]);
        let y = GameValue::map([("z", z.clone())]);
        buffer.include(id("x.y.z"), z);
        buffer.include(id("x.y"), y.clone());
        buffer.include(id("x"), GameValue::map([("y", y)]));

        buffer.invalidate(&id("x.y.z.w"), true);

        assert!(!buffer.contains(&id("x"), false));
        assert!(!buffer.contains(&id("x.y"), false));
        assert!(!buffer.contains(&id("x.y.z.w"), true));
        assert_eq!(
            buffer.evaluate(&id("x.y.z.v"), true).unwrap(),
            Some(&GameValue::Int(2))
        );
    }

    #[test]
    fn fixed_invalidation_is_exact() {
        let mut buffer = IdBuffer::new();
        buffer.include(id("a"), nested());
        buffer.include(id("a.b"), GameValue::Int(1));
        buffer.invalidate(&id("a.b"), false);
        assert!(buffer.contains(&id("a"), false));
        assert!(!buffer.contains(&id("a.b"), false));
    }
}
