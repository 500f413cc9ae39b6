//! Validation pipeline.
//!
//! Static validation is a pure check of mandatory fields. Remote validation is
//! a server round trip that runs only while editing a pre-existing record; it
//! can reject a value and can flip other fields' enabled state.

use std::sync::Arc;

use formflow_types::{ActionResult, FieldSchema, FieldUpdate, FieldValue, FilterCondition, ValueBag};
use tracing::{debug, info, warn};

use crate::{
    error::{EngineError, ValidationErrors},
    resolver::{FormMode, FormScope},
    schema::FormSchema,
    template::{QueryContext, build_query},
    transport::QueryTransport,
};

/// Checks every enabled, mandatory, non display-only field for a value.
///
/// Range fields are checked per key. Messages are keyed by value-bag key in
/// schema order.
pub fn validate_fields<'a>(
    fields: impl IntoIterator<Item = &'a FieldSchema>,
    values: &ValueBag,
    is_enabled: impl Fn(&FieldSchema) -> bool,
) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for field in fields {
        if !field.mandatory || field.is_display_only() || !is_enabled(field) {
            continue;
        }
        for key in field.keys() {
            if values.value_or_empty(key).is_empty() {
                errors.insert(key.to_string(), format!("{} is required", field.display_label()));
            }
        }
    }
    errors
}

/// Static validation of a scope, honouring runtime enabled overrides.
pub fn validate_static(scope: &FormScope) -> ValidationErrors {
    validate_fields(scope.schema().fields(), scope.values(), |field| {
        scope.is_enabled(field.primary_key())
    })
}

/// Like [`validate_static`], as a `Result` for submission paths.
pub fn ensure_valid(scope: &FormScope) -> Result<(), EngineError> {
    let errors = validate_static(scope);
    if errors.is_empty() {
        Ok(())
    } else {
        debug!(schema = %scope.schema().name(), error_count = errors.len(), "static validation failed");
        Err(EngineError::StaticValidationFailure(errors))
    }
}

/// Accepted outcome of a remote check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteCheck {
    pub message: Option<String>,
    pub updates: Vec<FieldUpdate>,
}

/// Sends remote validation requests for fields that declare a hook.
pub struct RemoteValidator {
    transport: Arc<dyn QueryTransport>,
    context: QueryContext,
}

impl std::fmt::Debug for RemoteValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteValidator").field("context", &self.context).finish()
    }
}

impl RemoteValidator {
    pub fn new(transport: Arc<dyn QueryTransport>, context: QueryContext) -> Self {
        Self { transport, context }
    }

    pub fn set_context(&mut self, context: QueryContext) {
        self.context = context;
    }

    /// Runs the field's remote check against the scope's current values.
    ///
    /// Returns `Ok(None)` when no check applies: the field has no hook, or the
    /// scope is not editing a pre-existing record. A non-success response is
    /// [`EngineError::ValidationFailure`].
    pub async fn validate_remote(&self, scope: &FormScope, key: &str) -> Result<Option<RemoteCheck>, EngineError> {
        let field = scope.schema().require(key)?;
        let Some(hook) = &field.remote_validation else {
            return Ok(None);
        };
        if scope.mode() != FormMode::Edit {
            return Ok(None);
        }

        let values = if hook.fields.is_empty() {
            scope.resolved_values()
        } else {
            scope.resolved_subset(&hook.fields)
        };
        let mut document = build_query(&hook.query_template, None, &values, &self.context)?;
        document.multi_condition = values
            .iter()
            .map(|(tag, value)| FilterCondition::new(tag, value))
            .collect();

        debug!(field = %key, query_source = %document.query_source, "remote validation dispatched");
        let sets = self
            .transport
            .execute(document)
            .await
            .map_err(|error| EngineError::fetch(key, error))?;
        let result = ActionResult::from_result_sets(&sets);
        if !result.success {
            let message = result
                .message
                .unwrap_or_else(|| format!("{} was rejected", field.display_label()));
            info!(field = %key, %message, "remote validation rejected value");
            return Err(EngineError::ValidationFailure {
                field: key.to_string(),
                message,
            });
        }

        Ok(Some(RemoteCheck {
            message: result.message,
            updates: FieldUpdate::from_result_sets(&sets),
        }))
    }
}

/// True for update values that only carry a flag and must not overwrite data.
fn is_flag_sentinel(value: &str) -> bool {
    matches!(value.trim(), "true" | "false")
}

/// Applies enabled-state changes from remote updates.
///
/// A hard toggle forces the state. A soft toggle only takes effect on fields
/// whose base configuration is enabled.
pub fn apply_enabled_updates(scope: &mut FormScope, updates: &[FieldUpdate]) {
    for update in updates {
        let Some(enabled) = update.enabled else {
            continue;
        };
        let Some(base_enabled) = scope.schema().field(&update.field).map(|field| field.enabled) else {
            warn!(field = %update.field, "remote update for unknown field ignored");
            continue;
        };
        if update.hard || base_enabled {
            debug!(field = %update.field, enabled, hard = update.hard, "enabled state updated");
            scope.set_enabled(&update.field, enabled);
        }
    }
}

/// Value writes carried by remote updates, coerced per field kind.
pub fn value_updates(schema: &FormSchema, updates: &[FieldUpdate]) -> Vec<(String, FieldValue)> {
    updates
        .iter()
        .filter_map(|update| {
            let value = update.value.as_deref()?;
            if is_flag_sentinel(value) {
                return None;
            }
            match schema.coerce(&update.field, value) {
                Ok(coerced) => Some((update.field.clone(), coerced)),
                Err(error) => {
                    warn!(field = %update.field, %error, "remote value update ignored");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use chrono::NaiveDate;
    use formflow_types::{FieldKind, QueryTemplate, RemoteValidationHook, ResultSets};
    use serde_json::json;

    fn schema() -> Arc<FormSchema> {
        Arc::new(
            FormSchema::load(
                "invoice",
                vec![
                    FieldSchema::new(FieldKind::Text { key: "Vendor".into() })
                        .mandatory()
                        .with_label("Vendor name")
                        .with_remote_validation(RemoteValidationHook {
                            query_template: QueryTemplate::new("qry_check_vendor").with_context("action", "validate"),
                            fields: vec!["Vendor".into()],
                        }),
                    FieldSchema::new(FieldKind::DateRange {
                        keys: ["From".into(), "To".into()],
                    })
                    .mandatory(),
                    FieldSchema::new(FieldKind::DisplayOnly { key: "Total".into() }).mandatory(),
                    FieldSchema::new(FieldKind::Text { key: "Discount".into() }).mandatory(),
                    FieldSchema {
                        enabled: false,
                        ..FieldSchema::new(FieldKind::Text { key: "Locked".into() })
                    },
                ],
            )
            .expect("schema"),
        )
    }

    fn validator(transport: Arc<ScriptedTransport>) -> RemoteValidator {
        RemoteValidator::new(transport, QueryContext::new(NaiveDate::from_ymd_opt(2024, 4, 1).expect("date")))
    }

    #[test]
    fn reports_each_empty_mandatory_key() {
        let mut scope = FormScope::new(schema());
        scope.set_value("Vendor", FieldValue::text("   ")).expect("set");
        scope.set_value("From", FieldValue::text("2024-04-01")).expect("set");

        let errors = validate_static(&scope);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["Vendor", "To", "Discount"]);
        assert_eq!(errors["Vendor"], "Vendor name is required");
    }

    #[test]
    fn disabled_fields_are_skipped() {
        let mut scope = FormScope::new(schema());
        apply_enabled_updates(&mut scope, &[FieldUpdate {
            field: "Discount".into(),
            enabled: Some(false),
            value: None,
            hard: false,
        }]);
        assert!(!validate_static(&scope).contains_key("Discount"));
    }

    #[test]
    fn soft_toggle_cannot_enable_base_disabled_field() {
        let mut scope = FormScope::new(schema());
        let enable = |hard| FieldUpdate {
            field: "Locked".into(),
            enabled: Some(true),
            value: None,
            hard,
        };
        apply_enabled_updates(&mut scope, &[enable(false)]);
        assert!(!scope.is_enabled("Locked"));
        apply_enabled_updates(&mut scope, &[enable(true)]);
        assert!(scope.is_enabled("Locked"));
    }

    #[test]
    fn flag_sentinels_do_not_overwrite_values() {
        let updates = vec![
            FieldUpdate {
                field: "Discount".into(),
                enabled: Some(true),
                value: Some("true".into()),
                hard: false,
            },
            FieldUpdate {
                field: "Total".into(),
                enabled: None,
                value: Some("1250".into()),
                hard: false,
            },
        ];
        assert_eq!(value_updates(&schema(), &updates), vec![("Total".to_string(), FieldValue::text("1250"))]);
    }

    #[tokio::test]
    async fn remote_checks_only_run_in_edit_mode() {
        let transport = Arc::new(ScriptedTransport::new());
        let validator = validator(transport.clone());
        let scope = FormScope::new(schema());
        assert_eq!(validator.validate_remote(&scope, "Vendor").await, Ok(None));
        let view = FormScope::new(schema()).with_mode(FormMode::View);
        assert_eq!(validator.validate_remote(&view, "Vendor").await, Ok(None));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn rejection_surfaces_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "qry_check_vendor",
            ResultSets::new().with_set("rs0", vec![json!({"success": "false", "message": "Vendor is blocked"})]),
        );
        let mut scope = FormScope::new(schema()).with_mode(FormMode::Edit);
        scope.set_value("Vendor", FieldValue::text("ACME")).expect("set");

        let result = validator(transport.clone()).validate_remote(&scope, "Vendor").await;
        assert_eq!(
            result,
            Err(EngineError::ValidationFailure {
                field: "Vendor".into(),
                message: "Vendor is blocked".into()
            })
        );
        let sent = transport.sent_to("qry_check_vendor");
        assert_eq!(sent[0].multi_condition, vec![FilterCondition::new("Vendor", "ACME")]);
        assert_eq!(sent[0].ui_context.get("action").map(String::as_str), Some("validate"));
    }

    #[tokio::test]
    async fn success_returns_updates() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "qry_check_vendor",
            ResultSets::new()
                .with_set("rs0", vec![json!({"success": true})])
                .with_set("rs1", vec![json!({"field": "Discount", "enabled": 0, "hard": 1})]),
        );
        let mut scope = FormScope::new(schema()).with_mode(FormMode::Edit);
        scope.set_value("Vendor", FieldValue::text("ACME")).expect("set");

        let check = validator(transport)
            .validate_remote(&scope, "Vendor")
            .await
            .expect("check")
            .expect("hook applies");
        assert_eq!(check.updates.len(), 1);
        apply_enabled_updates(&mut scope, &check.updates);
        assert!(!scope.is_enabled("Discount"));
    }
}
