//! The value tree carried over the Game-ID bus.
//!
//! Resolvers produce [`GameValue`]s, the ID buffer caches them, and the
//! stores persist them. A value is a scalar, an ordered sequence, or a
//! string-keyed mapping. Mappings and sequences can be walked with the
//! remaining segments of a Game ID: map children are addressed by key,
//! sequence children by their decimal index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamically typed game value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameValue {
    /// Absent / JSON `null`.
    #[default]
    Null,
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Text(String),
    /// An ordered sequence.
    List(Vec<GameValue>),
    /// A string-keyed mapping with deterministic key order.
    Map(BTreeMap<String, GameValue>),
}

impl GameValue {
    /// Build a mapping from `(key, value)` pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Self>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// An empty mapping.
    pub const fn empty_map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// True for [`GameValue::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for mappings and sequences.
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::Map(_) | Self::List(_))
    }

    /// The boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as a float (integers are widened).
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string slice, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The mapping, if this is one.
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The sequence, if this is one.
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Direct child addressed by one path segment.
    pub fn child(&self, segment: &str) -> Option<&Self> {
        match self {
            Self::Map(m) => m.get(segment),
            Self::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Walk a path of segments below this value.
    pub fn walk<'a, I>(&self, segments: I) -> Option<&Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        segments
            .into_iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Consume a container into its immediate `(segment, child)` pairs.
    ///
    /// Returns `Err(self)` for scalars, which have no children.
    pub fn into_children(self) -> Result<Vec<(String, Self)>, Self> {
        match self {
            Self::Map(m) => Ok(m.into_iter().collect()),
            Self::List(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect()),
            scalar => Err(scalar),
        }
    }

    /// Mutable slot at `path`, creating intermediate mappings as needed.
    ///
    /// Existing sequence elements are addressed by index; any other
    /// non-mapping met on the way is replaced by an empty mapping.
    #[allow(clippy::indexing_slicing)]
    pub fn slot_mut<S: AsRef<str>>(&mut self, path: &[S]) -> &mut Self {
        let Some((first, rest)) = path.split_first() else {
            return self;
        };
        let segment = first.as_ref();
        let list_index = match &*self {
            Self::List(items) => segment.parse::<usize>().ok().filter(|i| *i < items.len()),
            _ => None,
        };
        match (self, list_index) {
            // Bounds checked when computing `list_index`.
            (Self::List(items), Some(idx)) => items[idx].slot_mut(rest),
            (node, _) => {
                if !matches!(node, Self::Map(_)) {
                    *node = Self::empty_map();
                }
                match node {
                    Self::Map(m) => m.entry(segment.to_owned()).or_default().slot_mut(rest),
                    other => other,
                }
            }
        }
    }

    /// Remove and return the value at `path`.
    pub fn remove_path<S: AsRef<str>>(&mut self, path: &[S]) -> Option<Self> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for segment in parents {
            node = match node {
                Self::Map(m) => m.get_mut(segment.as_ref())?,
                Self::List(items) => items.get_mut(segment.as_ref().parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match node {
            Self::Map(m) => m.remove(last.as_ref()),
            Self::List(items) => {
                let idx = last.as_ref().parse::<usize>().ok()?;
                (idx < items.len()).then(|| items.remove(idx))
            }
            _ => None,
        }
    }

    /// Numeric sum of `self` and `delta`, treating `Null` as zero.
    ///
    /// Returns `None` if either side is not numeric or integer addition
    /// overflows.
    pub fn incremented_by(&self, delta: &Self) -> Option<Self> {
        match (self, delta) {
            (Self::Null, Self::Int(d)) => Some(Self::Int(*d)),
            (Self::Null, Self::Float(d)) => Some(Self::Float(*d)),
            (Self::Int(a), Self::Int(b)) => a.checked_add(*b).map(Self::Int),
            (a, b) => Some(Self::Float(a.as_f64()? + b.as_f64()?)),
        }
    }

    /// Convert into a `serde_json` value. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(m) => Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    /// Convert from a `serde_json` value.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_default(),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(m) => Self::Map(m.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect()),
        }
    }
}

impl From<serde_json::Value> for GameValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl From<&GameValue> for serde_json::Value {
    fn from(value: &GameValue) -> Self {
        value.to_json()
    }
}

impl From<bool> for GameValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for GameValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for GameValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for GameValue {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for GameValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for GameValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for GameValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Self>> for GameValue {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Self>> for GameValue {
    fn from(m: BTreeMap<String, Self>) -> Self {
        Self::Map(m)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn storage() -> GameValue {
        GameValue::map([
            ("gold", GameValue::Int(12)),
            (
                "shelves",
                GameValue::List(vec![GameValue::from("ale"), GameValue::from("mead")]),
            ),
        ])
    }

    #[test]
    fn walks_maps_and_lists() {
        let value = storage();
        assert_eq!(value.walk(["gold"]), Some(&GameValue::Int(12)));
        assert_eq!(value.walk(["shelves", "1"]), Some(&GameValue::from("mead")));
        assert_eq!(value.walk(["shelves", "7"]), None);
        assert_eq!(value.walk(["gold", "deeper"]), None);
        assert_eq!(value.walk([]), Some(&value));
    }

    #[test]
    fn untagged_serde_keeps_integers_integral() {
        let value: GameValue = serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": null}"#).unwrap();
        assert_eq!(value.walk(["a"]), Some(&GameValue::Int(1)));
        assert_eq!(value.walk(["b"]), Some(&GameValue::Float(1.5)));
        assert_eq!(value.walk(["c"]), Some(&GameValue::Null));
    }

    #[test]
    fn json_conversion_is_lossless_for_plain_data() {
        let value = storage();
        assert_eq!(GameValue::from_json(value.to_json()), value);
    }

    #[test]
    fn children_of_containers() {
        let children = storage().into_children().unwrap();
        let keys: Vec<&str> = children.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["gold", "shelves"]);
        assert!(GameValue::Int(3).into_children().is_err());
    }

    #[test]
    fn slot_mut_creates_intermediate_maps() {
        let mut doc = GameValue::Null;
        *doc.slot_mut(&["data", "storage", "gold"]) = GameValue::Int(5);
        assert_eq!(doc.walk(["data", "storage", "gold"]), Some(&GameValue::Int(5)));

        let mut shelves = storage();
        *shelves.slot_mut(&["shelves", "0"]) = GameValue::from("cider");
        assert_eq!(shelves.walk(["shelves", "0"]), Some(&GameValue::from("cider")));
    }

    #[test]
    fn remove_path_detaches_value() {
        let mut value = storage();
        assert_eq!(value.remove_path(&["gold"]), Some(GameValue::Int(12)));
        assert_eq!(value.walk(["gold"]), None);
        assert_eq!(value.remove_path(&["missing", "x"]), None);
    }

    #[test]
    fn increments() {
        assert_eq!(
            GameValue::Null.incremented_by(&GameValue::Int(2)),
            Some(GameValue::Int(2))
        );
        assert_eq!(
            GameValue::Int(2).incremented_by(&GameValue::Int(3)),
            Some(GameValue::Int(5))
        );
        assert_eq!(
            GameValue::Int(2)
                .incremented_by(&GameValue::Float(0.5))
                .and_then(|v| v.as_f64()),
            Some(2.5)
        );
        assert_eq!(GameValue::Int(i64::MAX).incremented_by(&GameValue::Int(1)), None);
        assert_eq!(GameValue::from("x").incremented_by(&GameValue::Int(1)), None);
    }
}
