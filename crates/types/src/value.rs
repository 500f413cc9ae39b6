//! Field values and the ordered value bag that holds one form context's state.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Current value of one field key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Date(NaiveDate),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    /// Empty means no value, an all-whitespace string, or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::Date(_) => false,
            Self::List(items) => items.iter().all(|item| item.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Best-effort conversion from a JSON payload (record rows, remote updates).
    ///
    /// Dates arrive as strings; callers that know a field is date-typed should
    /// coerce the resulting text themselves.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Empty,
            JsonValue::String(text) => Self::Text(text.clone()),
            JsonValue::Bool(flag) => Self::Text(flag.to_string()),
            JsonValue::Number(number) => Self::Text(number.to_string()),
            JsonValue::Array(items) => Self::List(
                items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            JsonValue::Object(_) => Self::Text(value.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

/// Ordered mapping from field key to current value.
///
/// One bag exists per independent form context (master record, each wizard tab,
/// each child-entry dialog, each report filter panel). Keys keep insertion order
/// so payloads and tables render predictably.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValueBag {
    values: IndexMap<String, FieldValue>,
}

impl ValueBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bag with every key present and empty.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: keys.into_iter().map(|key| (key.into(), FieldValue::Empty)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    /// Value for `key`, treating an absent key as empty.
    pub fn value_or_empty(&self, key: &str) -> &FieldValue {
        static EMPTY: FieldValue = FieldValue::Empty;
        self.values.get(key).unwrap_or(&EMPTY)
    }

    /// Inserts a value and returns the previous one (empty when absent).
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) -> FieldValue {
        self.values.insert(key.into(), value).unwrap_or_default()
    }

    /// Resets a key to empty, keeping its position.
    pub fn clear(&mut self, key: &str) {
        if let Some(slot) = self.values.get_mut(key) {
            *slot = FieldValue::Empty;
        }
    }

    /// Resets every key to empty.
    pub fn clear_all(&mut self) {
        for value in self.values.values_mut() {
            *value = FieldValue::Empty;
        }
    }

    pub fn is_filled(&self, key: &str) -> bool {
        !self.value_or_empty(key).is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when no key holds a non-empty value.
    pub fn is_blank(&self) -> bool {
        self.values.values().all(FieldValue::is_empty)
    }

    pub fn to_json_map(&self) -> JsonMap<String, JsonValue> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for ValueBag {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(key, value)| (key.into(), value)).collect(),
        }
    }
}
