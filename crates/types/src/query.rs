//! Outbound query document and inbound result sets.
//!
//! The query endpoint accepts one structured document with five sections:
//! UI context, query source, a single-condition filter, a multi-condition
//! filter, and API context. Both filter sections travel as XML-style tag sets
//! (`<State>MH</State>`); [`render_tag_set`] and [`parse_tag_set`] convert
//! between the typed and wire forms.
//!
//! Responses carry named result sets. `rs0` is the primary payload and `rs1`
//! carries row settings or a second dependent result.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const PRIMARY_RESULT_SET: &str = "rs0";
pub const SECONDARY_RESULT_SET: &str = "rs1";

/// One tag/value assertion inside a filter section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterCondition {
    pub tag: String,
    pub value: String,
}

impl FilterCondition {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("<{tag}>{value}</{tag}>", tag = self.tag, value = escape_text(&self.value))
    }
}

/// Structured request accepted by the query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDocument {
    /// Action identifiers and mode flags as flat key/value pairs.
    #[serde(default)]
    pub ui_context: IndexMap<String, String>,
    /// Opaque query identifier.
    pub query_source: String,
    /// Single conditional filter, used when exactly one dependency exists.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_condition",
        deserialize_with = "deserialize_condition"
    )]
    pub condition: Option<FilterCondition>,
    /// Ordered multi-condition filter block.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_conditions",
        deserialize_with = "deserialize_conditions"
    )]
    pub multi_condition: Vec<FilterCondition>,
    /// Caller identity and environment flags.
    #[serde(default)]
    pub api_context: IndexMap<String, String>,
}

impl QueryDocument {
    pub fn new(query_source: impl Into<String>) -> Self {
        Self {
            query_source: query_source.into(),
            ..Self::default()
        }
    }

    /// Every filter assertion in wire order (single condition first).
    pub fn conditions(&self) -> impl Iterator<Item = &FilterCondition> {
        self.condition.iter().chain(self.multi_condition.iter())
    }
}

fn serialize_condition<S: Serializer>(condition: &Option<FilterCondition>, serializer: S) -> Result<S::Ok, S::Error> {
    match condition {
        Some(condition) => serializer.serialize_str(&condition.render()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_condition<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<FilterCondition>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut parsed = parse_tag_set(&raw).map_err(serde::de::Error::custom)?;
    if parsed.len() > 1 {
        return Err(serde::de::Error::custom("single-condition section holds more than one tag"));
    }
    Ok(parsed.pop())
}

fn serialize_conditions<S: Serializer>(conditions: &[FilterCondition], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&render_tag_set(conditions))
}

fn deserialize_conditions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<FilterCondition>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    parse_tag_set(&raw).map_err(serde::de::Error::custom)
}

/// Renders conditions as a concatenated tag set.
pub fn render_tag_set(conditions: &[FilterCondition]) -> String {
    conditions.iter().map(FilterCondition::render).collect()
}

/// Failure while reading a tag set back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagParseError {
    #[error("expected '<' at offset {0}")]
    ExpectedOpenTag(usize),
    #[error("unterminated tag starting at offset {0}")]
    Unterminated(usize),
    #[error("empty tag name at offset {0}")]
    EmptyTag(usize),
    #[error("missing closing tag for <{0}>")]
    MissingClose(String),
}

/// Parses a tag set such as `<State>MH</State><City>Pune</City>`.
///
/// Whitespace between tags is ignored. Values are unescaped, so
/// `parse_tag_set(&render_tag_set(x)) == x` for any tag names without `<`/`>`.
pub fn parse_tag_set(raw: &str) -> Result<Vec<FilterCondition>, TagParseError> {
    let mut conditions = Vec::new();
    let mut offset = 0;

    loop {
        let rest = &raw[offset..];
        let trimmed = rest.trim_start();
        offset += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            break;
        }
        if !trimmed.starts_with('<') {
            return Err(TagParseError::ExpectedOpenTag(offset));
        }
        let close_bracket = trimmed.find('>').ok_or(TagParseError::Unterminated(offset))?;
        let tag = &trimmed[1..close_bracket];
        if tag.is_empty() || tag.starts_with('/') {
            return Err(TagParseError::EmptyTag(offset));
        }
        let body_start = close_bracket + 1;
        let closing = format!("</{tag}>");
        let body_len = trimmed[body_start..]
            .find(&closing)
            .ok_or_else(|| TagParseError::MissingClose(tag.to_string()))?;
        let value = unescape_text(&trimmed[body_start..body_start + body_len]);
        conditions.push(FilterCondition::new(tag, value));
        offset += body_start + body_len + closing.len();
    }

    Ok(conditions)
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_text(value: &str) -> String {
    value.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// Named result sets returned by the query endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSets {
    sets: IndexMap<String, Vec<JsonValue>>,
}

impl ResultSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for canned responses.
    pub fn with_set(mut self, name: impl Into<String>, rows: Vec<JsonValue>) -> Self {
        self.sets.insert(name.into(), rows);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<JsonValue>) {
        self.sets.insert(name.into(), rows);
    }

    pub fn get(&self, name: &str) -> Option<&[JsonValue]> {
        self.sets.get(name).map(Vec::as_slice)
    }

    /// Rows of `rs0`, empty when absent.
    pub fn primary(&self) -> &[JsonValue] {
        self.get(PRIMARY_RESULT_SET).unwrap_or(&[])
    }

    /// Rows of `rs1`, empty when absent.
    pub fn secondary(&self) -> &[JsonValue] {
        self.get(SECONDARY_RESULT_SET).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Outcome flag and message carried by a submission or validation response (`rs0[0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    pub message: Option<String>,
}

impl ActionResult {
    /// Reads `success` and `message` from the first primary row.
    ///
    /// A response without a status row is treated as success: the transport
    /// already reported delivery, and the backend had nothing to object to.
    pub fn from_result_sets(sets: &ResultSets) -> Self {
        let Some(row) = sets.primary().first().and_then(JsonValue::as_object) else {
            return Self {
                success: true,
                message: None,
            };
        };
        let success = row.get("success").map(flag_from_json).unwrap_or(true);
        let message = row
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .filter(|message| !message.trim().is_empty());
        Self { success, message }
    }
}

/// One field update returned by remote validation (`rs1` rows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: String,
    pub enabled: Option<bool>,
    pub value: Option<String>,
    /// Force the enabled state regardless of the field's base configuration.
    pub hard: bool,
}

impl FieldUpdate {
    /// Reads every well-formed update row from the secondary result set.
    pub fn from_result_sets(sets: &ResultSets) -> Vec<Self> {
        sets.secondary()
            .iter()
            .filter_map(JsonValue::as_object)
            .filter_map(|row| {
                let field = row.get("field")?.as_str()?.to_string();
                Some(Self {
                    field,
                    enabled: row.get("enabled").map(flag_from_json),
                    value: row.get("value").and_then(|value| match value {
                        JsonValue::Null => None,
                        JsonValue::String(text) => Some(text.clone()),
                        other => Some(other.to_string()),
                    }),
                    hard: row.get("hard").map(flag_from_json).unwrap_or(false),
                })
            })
            .collect()
    }
}

fn flag_from_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_i64() == Some(1),
        JsonValue::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "y" | "yes"),
        _ => false,
    }
}
