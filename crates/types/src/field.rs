//! Declarative field schema shared by forms, report filter panels, and wizard stages.
//!
//! A field arrives from server configuration as a flat JSON object whose `kind`
//! tag selects one of the [`FieldKind`] variants. Each variant carries only the
//! attributes that make sense for it: range fields own a two-element key, select
//! fields own an [`OptionSource`], and every other kind owns a single key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One form field as described by server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// Kind-specific attributes, selected by the `kind` tag.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Human-readable label used in validation messages.
    #[serde(default)]
    pub label: Option<String>,
    /// Whether an enabled field must hold a non-empty value before submission.
    #[serde(default)]
    pub mandatory: bool,
    /// Base enabled state. Remote validation may override it at runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the field is shown as a column in row tables.
    #[serde(default = "default_true")]
    pub visible_in_table: bool,
    /// Optional server round-trip check run when editing an existing record.
    #[serde(default)]
    pub remote_validation: Option<RemoteValidationHook>,
}

/// Enumerated field kinds, each carrying only its relevant attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    /// Free text input.
    Text { key: String },
    /// Single calendar date.
    Date { key: String },
    /// Two dates (`from`, `to`) stored under two keys.
    DateRange { keys: [String; 2] },
    /// Pick exactly one option.
    SingleSelect { key: String, options: OptionSource },
    /// Pick any number of options.
    MultiSelect { key: String, options: OptionSource },
    /// Read-only value that never participates in mandatory checks.
    DisplayOnly { key: String },
}

impl FieldSchema {
    /// Convenience constructor with default flags (enabled, visible, optional).
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            label: None,
            mandatory: false,
            enabled: true,
            visible_in_table: true,
            remote_validation: None,
        }
    }

    /// Marks the field mandatory.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Sets the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attaches a remote validation hook.
    pub fn with_remote_validation(mut self, hook: RemoteValidationHook) -> Self {
        self.remote_validation = Some(hook);
        self
    }

    /// Returns every value-bag key owned by this field (two for range fields).
    pub fn keys(&self) -> Vec<&str> {
        match &self.kind {
            FieldKind::DateRange { keys } => vec![keys[0].as_str(), keys[1].as_str()],
            FieldKind::Text { key }
            | FieldKind::Date { key }
            | FieldKind::SingleSelect { key, .. }
            | FieldKind::MultiSelect { key, .. }
            | FieldKind::DisplayOnly { key } => vec![key.as_str()],
        }
    }

    /// Returns the key identifying this field in the dependency graph.
    pub fn primary_key(&self) -> &str {
        match &self.kind {
            FieldKind::DateRange { keys } => keys[0].as_str(),
            FieldKind::Text { key }
            | FieldKind::Date { key }
            | FieldKind::SingleSelect { key, .. }
            | FieldKind::MultiSelect { key, .. }
            | FieldKind::DisplayOnly { key } => key.as_str(),
        }
    }

    /// Label for messages, falling back to the primary key.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.primary_key())
    }

    /// Option source for select fields.
    pub fn option_source(&self) -> Option<&OptionSource> {
        match &self.kind {
            FieldKind::SingleSelect { options, .. } | FieldKind::MultiSelect { options, .. } => Some(options),
            _ => None,
        }
    }

    /// Parent keys this field's options depend on (empty for independent fields).
    pub fn dependencies(&self) -> &[String] {
        self.option_source()
            .and_then(|source| source.depends_on.as_ref())
            .map(DependsOn::parents)
            .unwrap_or(&[])
    }

    pub fn is_display_only(&self) -> bool {
        matches!(self.kind, FieldKind::DisplayOnly { .. })
    }

    /// True for date and date-range fields, whose values are formatted as `YYYYMMDD`.
    pub fn is_date_like(&self) -> bool {
        matches!(self.kind, FieldKind::Date { .. } | FieldKind::DateRange { .. })
    }

    pub fn is_multi_select(&self) -> bool {
        matches!(self.kind, FieldKind::MultiSelect { .. })
    }
}

/// Where a select field's options come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionSource {
    /// Query issued to fetch options.
    pub query_template: QueryTemplate,
    /// Optional dependency on other fields' values.
    #[serde(default)]
    pub depends_on: Option<DependsOn>,
    /// Which response attributes become option label and value.
    #[serde(default)]
    pub option_keys: OptionKeySpec,
}

impl OptionSource {
    pub fn new(query_template: QueryTemplate) -> Self {
        Self {
            query_template,
            depends_on: None,
            option_keys: OptionKeySpec::default(),
        }
    }

    pub fn depending_on(mut self, depends_on: DependsOn) -> Self {
        self.depends_on = Some(depends_on);
        self
    }

    pub fn with_option_keys(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.option_keys = OptionKeySpec {
            label: label.into(),
            value: value.into(),
        };
        self
    }
}

/// Dependency declaration: one or more parent keys plus the filter template.
///
/// A single parent (`fields: "State"`) produces a single conditional filter; an
/// array of parents (`fields: ["State", "District"]`) produces a multi-filter
/// block in which every parent is required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependsOn {
    pub fields: DependencyFields,
    /// Ordered tag → value template map. Defaults to `{parent: "${parent}"}` per parent.
    #[serde(default)]
    pub filter: IndexMap<String, String>,
}

/// Parent keys, either a single name or an array of names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DependencyFields {
    Single(String),
    Multiple(Vec<String>),
}

impl DependsOn {
    pub fn single(parent: impl Into<String>) -> Self {
        Self {
            fields: DependencyFields::Single(parent.into()),
            filter: IndexMap::new(),
        }
    }

    pub fn multiple<I, S>(parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: DependencyFields::Multiple(parents.into_iter().map(Into::into).collect()),
            filter: IndexMap::new(),
        }
    }

    pub fn with_filter(mut self, tag: impl Into<String>, template: impl Into<String>) -> Self {
        self.filter.insert(tag.into(), template.into());
        self
    }

    pub fn parents(&self) -> &[String] {
        match &self.fields {
            DependencyFields::Single(parent) => std::slice::from_ref(parent),
            DependencyFields::Multiple(parents) => parents.as_slice(),
        }
    }

    /// True when the schema declared an array of parents.
    pub fn is_multi(&self) -> bool {
        matches!(self.fields, DependencyFields::Multiple(_))
    }

    /// Tag/template pairs in authoring order, synthesized from the parents when no filter is declared.
    pub fn filter_entries(&self) -> Vec<(String, String)> {
        if self.filter.is_empty() {
            return self
                .parents()
                .iter()
                .map(|parent| (parent.clone(), format!("${{{parent}}}")))
                .collect();
        }
        self.filter
            .iter()
            .map(|(tag, template)| (tag.clone(), template.clone()))
            .collect()
    }
}

/// Query template: an opaque query identifier plus UI-context placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryTemplate {
    /// Query identifier placed in the query-source section. May contain placeholders.
    pub source: String,
    /// UI-context key/value templates (action identifiers, mode flags).
    #[serde(default)]
    pub context: IndexMap<String, String>,
}

impl QueryTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            context: IndexMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.context.insert(key.into(), template.into());
        self
    }
}

/// Response attributes mapped to an option's label and value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionKeySpec {
    #[serde(default = "default_label_key")]
    pub label: String,
    #[serde(default = "default_value_key")]
    pub value: String,
}

fn default_label_key() -> String {
    "label".to_string()
}

fn default_value_key() -> String {
    "value".to_string()
}

impl Default for OptionKeySpec {
    fn default() -> Self {
        Self {
            label: default_label_key(),
            value: default_value_key(),
        }
    }
}

/// Server-side validation hook attached to a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteValidationHook {
    pub query_template: QueryTemplate,
    /// Row values sent with the check. Empty means every key in the bag.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// One selectable option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

impl FieldOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_dependent_select_from_server_configuration() {
        let raw = r#"{
            "kind": "single-select",
            "key": "City",
            "label": "City",
            "mandatory": true,
            "options": {
                "queryTemplate": { "source": "qry_city_list", "context": { "action": "cities" } },
                "dependsOn": { "fields": "State" },
                "optionKeys": { "label": "city_name", "value": "city_code" }
            }
        }"#;

        let field: FieldSchema = serde_json::from_str(raw).expect("field schema");
        assert_eq!(field.primary_key(), "City");
        assert!(field.mandatory);
        assert!(field.enabled, "enabled defaults to true");
        assert_eq!(field.dependencies(), ["State".to_string()]);
        let source = field.option_source().expect("select has options");
        assert_eq!(source.option_keys.value, "city_code");
        assert!(!source.depends_on.as_ref().expect("dependency").is_multi());
    }

    #[test]
    fn range_fields_own_two_keys() {
        let raw = r#"{ "kind": "date-range", "keys": ["FromDate", "ToDate"], "mandatory": true }"#;
        let field: FieldSchema = serde_json::from_str(raw).expect("range field");
        assert_eq!(field.keys(), vec!["FromDate", "ToDate"]);
        assert_eq!(field.primary_key(), "FromDate");
        assert!(field.is_date_like());
        assert!(field.option_source().is_none());
    }

    #[test]
    fn multi_parent_dependency_synthesizes_filter_entries() {
        let dependency = DependsOn::multiple(["State", "District"]);
        assert!(dependency.is_multi());
        assert_eq!(
            dependency.filter_entries(),
            vec![
                ("State".to_string(), "${State}".to_string()),
                ("District".to_string(), "${District}".to_string())
            ]
        );
    }

    #[test]
    fn explicit_filter_entries_keep_authoring_order() {
        let dependency = DependsOn::multiple(["B", "A"])
            .with_filter("ZoneB", "${B}")
            .with_filter("ZoneA", "${A}");
        let tags: Vec<String> = dependency.filter_entries().into_iter().map(|(tag, _)| tag).collect();
        assert_eq!(tags, vec!["ZoneB", "ZoneA"]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = r#"{ "kind": "slider", "key": "Volume" }"#;
        assert!(serde_json::from_str::<FieldSchema>(raw).is_err());
    }
}
