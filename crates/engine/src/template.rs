//! # Query Template Engine
//!
//! Builds outbound [`QueryDocument`]s from a [`QueryTemplate`], an optional
//! dependency declaration, and a set of resolved values. The engine is a pure
//! function of its inputs: "today" for relative date helpers comes from the
//! explicit [`QueryContext`], never from ambient state.
//!
//! ## Placeholder syntax
//!
//! - `${FieldName}` - the formatted value of `FieldName` (empty when unresolved)
//! - `${@today}`, `${@today-7}`, `${@today+30}` - dates relative to the context's today
//! - `${@month_start}`, `${@year_start}` - start of the current month or year
//!
//! ## Value formatting
//!
//! Dates become `YYYYMMDD`, multi-select lists are joined with `|`, and every
//! other scalar is used verbatim.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDate, TimeDelta};
use formflow_types::{DependsOn, FieldSchema, FieldValue, FilterCondition, QueryDocument, QueryTemplate, ValueBag};
use formflow_util::{
    date_handling::{format_compact_date, month_start, normalize_to_compact, year_start},
    is_blank,
};
use indexmap::IndexMap;

use crate::error::EngineError;

/// Explicit inputs that are not part of any value bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    /// Reference date for relative date helpers.
    pub today: NaiveDate,
    /// Copied verbatim into the API-context section.
    pub api_context: IndexMap<String, String>,
}

impl QueryContext {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            api_context: IndexMap::new(),
        }
    }

    /// Context dated with the local calendar day.
    pub fn today_local() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn with_api_context(mut self, api_context: IndexMap<String, String>) -> Self {
        self.api_context = api_context;
        self
    }
}

/// Formats a value for substitution without knowing its field kind.
pub fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Empty => String::new(),
        FieldValue::Text(text) => text.clone(),
        FieldValue::Date(date) => format_compact_date(*date),
        FieldValue::List(items) => items.join("|"),
    }
}

/// Type-aware formatting: date-typed fields holding text are normalized to `YYYYMMDD`.
pub fn format_for_field(field: &FieldSchema, value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) if field.is_date_like() => normalize_to_compact(text),
        other => format_value(other),
    }
}

/// Formatted values ready for template substitution.
///
/// Backed by a sorted map so [`ResolvedValues::canonical`] is identical for
/// equivalent dependency states regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedValues {
    values: BTreeMap<String, String>,
}

impl ResolvedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats every entry of a bag without kind information.
    pub fn from_bag(bag: &ValueBag) -> Self {
        bag.iter().map(|(key, value)| (key.to_string(), format_value(value))).collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_filled(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !is_blank(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stable serialization used in cache keys and staleness checks.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }
}

impl Extend<(String, String)> for ResolvedValues {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        self.values.extend(iter);
    }
}

/// Replaces every `${...}` placeholder in `template`.
///
/// Unresolved field placeholders become the empty string. An unterminated
/// `${` is copied through verbatim.
pub fn substitute(template: &str, values: &ResolvedValues, context: &QueryContext) -> String {
    let mut output = String::with_capacity(template.len());
    let mut remainder = template;

    while let Some(start) = remainder.find("${") {
        output.push_str(&remainder[..start]);
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find('}') else {
            output.push_str(&remainder[start..]);
            return output;
        };
        output.push_str(&resolve_placeholder(after_start[..end].trim(), values, context));
        remainder = &after_start[end + 1..];
    }

    output.push_str(remainder);
    output
}

fn resolve_placeholder(name: &str, values: &ResolvedValues, context: &QueryContext) -> String {
    if let Some(helper) = name.strip_prefix('@') {
        return relative_date(helper, context.today)
            .map(format_compact_date)
            .unwrap_or_default();
    }
    values.get(name).unwrap_or_default().to_string()
}

fn relative_date(helper: &str, today: NaiveDate) -> Option<NaiveDate> {
    match helper.trim() {
        "today" => Some(today),
        "month_start" => Some(month_start(today)),
        "year_start" => Some(year_start(today)),
        other => {
            let offset = other.strip_prefix("today")?.trim();
            let sign = offset.chars().next()?;
            let days: i64 = offset[sign.len_utf8()..].trim().parse().ok()?;
            match sign {
                '+' => today.checked_add_signed(TimeDelta::days(days)),
                '-' => today.checked_sub_signed(TimeDelta::days(days)),
                _ => None,
            }
        }
    }
}

/// Field names referenced by placeholders, in order of first appearance.
///
/// Relative date helpers are not field references and are skipped.
pub fn referenced_fields(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut remainder = template;

    while let Some(start) = remainder.find("${") {
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find('}') else {
            break;
        };
        let name = after_start[..end].trim();
        if !name.is_empty() && !name.starts_with('@') && !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
        remainder = &after_start[end + 1..];
    }

    names
}

/// Builds a structured request from a template and resolved values.
///
/// With a single-parent dependency the first filter entry becomes the
/// single-condition section. With a multi-parent dependency every parent must
/// hold a value; otherwise [`EngineError::MissingDependency`] is returned
/// instead of a malformed multi-condition block.
pub fn build_query(
    template: &QueryTemplate,
    dependency: Option<&DependsOn>,
    values: &ResolvedValues,
    context: &QueryContext,
) -> Result<QueryDocument, EngineError> {
    let mut document = QueryDocument::new(substitute(&template.source, values, context));
    document.ui_context = template
        .context
        .iter()
        .map(|(key, value_template)| (key.clone(), substitute(value_template, values, context)))
        .collect();
    document.api_context = context.api_context.clone();

    let Some(dependency) = dependency else {
        return Ok(document);
    };

    if dependency.is_multi() {
        if let Some(missing) = dependency.parents().iter().find(|parent| !values.is_filled(parent)) {
            return Err(EngineError::MissingDependency(missing.clone()));
        }
        document.multi_condition = dependency
            .filter_entries()
            .into_iter()
            .map(|(tag, value_template)| FilterCondition::new(tag, substitute(&value_template, values, context)))
            .collect();
    } else {
        document.condition = dependency
            .filter_entries()
            .into_iter()
            .next()
            .map(|(tag, value_template)| FilterCondition::new(tag, substitute(&value_template, values, context)));
    }

    Ok(document)
}
