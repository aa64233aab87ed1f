//! Data-described effects.
//!
//! An effect is plain data: an `effect_type` discriminator plus arbitrary
//! fields. The core never interprets the fields itself; it looks up the
//! handler registered for the kind and hands it the data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::GameValue;

/// One unit of gameplay mutation, described as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectData {
    /// Kind that selects the registered effect handler.
    #[serde(rename = "effect_type")]
    pub kind: String,

    /// Kind-specific fields.
    #[serde(flatten)]
    pub fields: BTreeMap<String, GameValue>,
}

impl EffectData {
    /// An effect of `kind` with no fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<GameValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Borrow a field.
    pub fn field(&self, key: &str) -> Option<&GameValue> {
        self.fields.get(key)
    }

    /// Borrow a text field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(GameValue::as_str)
    }
}
