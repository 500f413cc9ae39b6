//! Validated form schema.
//!
//! [`FormSchema::load`] checks a field list once, up front: keys are non-empty
//! and unique, dependencies point at known fields without cycles, and remote
//! validation hooks reference known fields. Everything downstream can then
//! look fields up without re-checking.

use std::collections::HashMap;

use formflow_types::{FieldKind, FieldSchema, FieldValue, ValueBag};
use formflow_util::{date_handling::parse_date, is_blank};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{error::SchemaError, graph::DependencyGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSchema {
    name: String,
    fields: Vec<FieldSchema>,
    /// Any owned key -> index into `fields`.
    index: HashMap<String, usize>,
    graph: DependencyGraph,
}

impl FormSchema {
    pub fn load(name: impl Into<String>, fields: Vec<FieldSchema>) -> Result<Self, SchemaError> {
        let name = name.into();
        let mut index = HashMap::new();
        for (position, field) in fields.iter().enumerate() {
            for key in field.keys() {
                if is_blank(key) {
                    return Err(SchemaError::EmptyKey);
                }
                if index.insert(key.to_string(), position).is_some() {
                    return Err(SchemaError::DuplicateKey(key.to_string()));
                }
            }
        }

        for field in &fields {
            let Some(hook) = &field.remote_validation else {
                continue;
            };
            if let Some(reference) = hook.fields.iter().find(|reference| !index.contains_key(*reference)) {
                return Err(SchemaError::UnknownValidationField {
                    field: field.primary_key().to_string(),
                    reference: reference.clone(),
                });
            }
        }

        let graph = DependencyGraph::build(&fields)?;
        debug!(schema = %name, field_count = fields.len(), "schema loaded");
        Ok(Self {
            name,
            fields,
            index,
            graph,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Field owning `key` (either key of a range field resolves to it).
    pub fn field(&self, key: &str) -> Option<&FieldSchema> {
        self.index.get(key).map(|position| &self.fields[*position])
    }

    pub fn require(&self, key: &str) -> Result<&FieldSchema, SchemaError> {
        self.field(key).ok_or_else(|| SchemaError::UnknownField(key.to_string()))
    }

    /// Every value-bag key in schema order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().flat_map(FieldSchema::keys)
    }

    /// A bag holding every key, all empty.
    pub fn empty_values(&self) -> ValueBag {
        ValueBag::with_keys(self.keys())
    }

    /// Interprets raw user input according to the field kind.
    ///
    /// Date fields parse the common spellings and keep unparseable text as-is
    /// so validation can still report it. Multi-select input is `|` separated.
    pub fn coerce(&self, key: &str, raw: &str) -> Result<FieldValue, SchemaError> {
        let field = self.require(key)?;
        if is_blank(raw) {
            return Ok(FieldValue::Empty);
        }
        Ok(match &field.kind {
            FieldKind::Date { .. } | FieldKind::DateRange { .. } => parse_date(raw)
                .map(FieldValue::Date)
                .unwrap_or_else(|| FieldValue::text(raw)),
            FieldKind::MultiSelect { .. } => FieldValue::list(
                raw.split('|')
                    .map(str::trim)
                    .filter(|item| !item.is_empty()),
            ),
            _ => FieldValue::text(raw),
        })
    }

    /// Interprets a JSON value from a record row or remote update.
    pub fn coerce_json(&self, key: &str, value: &JsonValue) -> Result<FieldValue, SchemaError> {
        let field = self.require(key)?;
        let value = FieldValue::from_json(value);
        Ok(match (&value, &field.kind) {
            (FieldValue::Text(text), FieldKind::Date { .. } | FieldKind::DateRange { .. }) => {
                parse_date(text).map(FieldValue::Date).unwrap_or(value)
            }
            (FieldValue::Text(text), FieldKind::MultiSelect { .. }) => self.coerce(key, text)?,
            _ => value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use formflow_types::{DependsOn, OptionSource, QueryTemplate, RemoteValidationHook};
    use serde_json::json;

    fn state_city() -> Vec<FieldSchema> {
        vec![
            FieldSchema::new(FieldKind::SingleSelect {
                key: "State".into(),
                options: OptionSource::new(QueryTemplate::new("qry_state_list")),
            })
            .mandatory(),
            FieldSchema::new(FieldKind::SingleSelect {
                key: "City".into(),
                options: OptionSource::new(QueryTemplate::new("qry_city_list")).depending_on(DependsOn::single("State")),
            }),
            FieldSchema::new(FieldKind::DateRange {
                keys: ["FromDate".into(), "ToDate".into()],
            }),
            FieldSchema::new(FieldKind::MultiSelect {
                key: "Tags".into(),
                options: OptionSource::new(QueryTemplate::new("qry_tags")),
            }),
        ]
    }

    #[test]
    fn loads_and_indexes_every_key() {
        let schema = FormSchema::load("address", state_city()).expect("schema");
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["State", "City", "FromDate", "ToDate", "Tags"]);
        assert_eq!(schema.field("ToDate").map(FieldSchema::primary_key), Some("FromDate"));
        assert_eq!(schema.graph().direct_dependents("State"), ["City"]);
        assert_eq!(schema.empty_values().len(), 5);
    }

    #[test]
    fn rejects_duplicate_and_empty_keys() {
        let mut fields = state_city();
        fields.push(FieldSchema::new(FieldKind::Text { key: "City".into() }));
        assert_eq!(FormSchema::load("dup", fields), Err(SchemaError::DuplicateKey("City".into())));

        let blank = vec![FieldSchema::new(FieldKind::Text { key: " ".into() })];
        assert_eq!(FormSchema::load("blank", blank), Err(SchemaError::EmptyKey));
    }

    #[test]
    fn rejects_unknown_validation_reference() {
        let mut fields = state_city();
        fields[0].remote_validation = Some(RemoteValidationHook {
            query_template: QueryTemplate::new("qry_validate_state"),
            fields: vec!["Country".into()],
        });
        assert!(matches!(
            FormSchema::load("address", fields),
            Err(SchemaError::UnknownValidationField { .. })
        ));
    }

    #[test]
    fn coerces_by_kind() {
        let schema = FormSchema::load("address", state_city()).expect("schema");
        assert_eq!(
            schema.coerce("FromDate", "2024-04-01").expect("date"),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"))
        );
        assert_eq!(schema.coerce("Tags", "A| B |").expect("tags"), FieldValue::list(["A", "B"]));
        assert_eq!(schema.coerce("State", "  ").expect("blank"), FieldValue::Empty);
        assert_eq!(
            schema.coerce("Country", "IN"),
            Err(SchemaError::UnknownField("Country".into()))
        );
        assert_eq!(
            schema.coerce_json("ToDate", &json!("20240430")).expect("json date"),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 4, 30).expect("date"))
        );
        assert_eq!(schema.coerce_json("Tags", &json!(["X"])).expect("json list"), FieldValue::list(["X"]));
    }
}
