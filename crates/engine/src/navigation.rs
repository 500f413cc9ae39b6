//! Report drill-down navigation.
//!
//! The navigator keeps a stack of frames. Frame 0 is the root level and is
//! always present. Drilling into a row pushes a frame that inherits the
//! parent frame's filters plus the row's primary key. Selecting a breadcrumb
//! truncates the stack; selecting the root also drops every inherited filter,
//! so no drill-down context survives a return to the root.

use std::sync::Arc;

use formflow_types::{FilterCondition, QueryDocument, ReportDefinition, ReportLevel};
use formflow_util::is_blank;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{
    error::{EngineError, SchemaError},
    resolver::FormScope,
    schema::FormSchema,
    template::{QueryContext, build_query},
    transport::QueryTransport,
    validation::ensure_valid,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationFrame {
    /// Index into the report's levels.
    pub level: usize,
    /// Primary-key filters captured when the frame was pushed.
    pub inherited: IndexMap<String, String>,
    /// Breadcrumb text.
    pub label: String,
}

/// Rows fetched for the top frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportPage {
    /// Primary result set.
    pub rows: Vec<JsonValue>,
    /// Row-level display settings from the secondary result set.
    pub settings: Vec<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct DrillDownNavigator {
    report: ReportDefinition,
    filters: FormScope,
    stack: Vec<NavigationFrame>,
    page: Option<ReportPage>,
}

impl DrillDownNavigator {
    pub fn new(report: ReportDefinition) -> Result<Self, EngineError> {
        let Some(root) = report.levels.first() else {
            return Err(SchemaError::Empty {
                name: report.name.clone(),
                what: "level",
            }
            .into());
        };
        let root_frame = NavigationFrame {
            level: 0,
            inherited: IndexMap::new(),
            label: level_title(root).to_string(),
        };
        let filters = FormScope::new(Arc::new(FormSchema::load(report.name.clone(), report.filters.clone())?));
        Ok(Self {
            report,
            filters,
            stack: vec![root_frame],
            page: None,
        })
    }

    pub fn report(&self) -> &ReportDefinition {
        &self.report
    }

    /// Filter panel state.
    pub fn filters(&self) -> &FormScope {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FormScope {
        &mut self.filters
    }

    pub fn frames(&self) -> &[NavigationFrame] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn top(&self) -> &NavigationFrame {
        // The root frame is never popped.
        &self.stack[self.stack.len() - 1]
    }

    pub fn current_level(&self) -> &ReportLevel {
        &self.report.levels[self.top().level]
    }

    /// Inherited filter context of the top frame.
    pub fn inherited(&self) -> &IndexMap<String, String> {
        &self.top().inherited
    }

    pub fn breadcrumbs(&self) -> Vec<&str> {
        self.stack.iter().map(|frame| frame.label.as_str()).collect()
    }

    /// Rows for the top frame, once fetched.
    pub fn page(&self) -> Option<&ReportPage> {
        self.page.as_ref()
    }

    /// Pushes a frame for `row` at the next level.
    pub fn drill_into(&mut self, row: &JsonValue) -> Result<&NavigationFrame, EngineError> {
        let top = self.top();
        let level = &self.report.levels[top.level];
        if top.level + 1 >= self.report.levels.len() {
            return Err(EngineError::InvalidTransition(format!(
                "'{}' is the deepest level of '{}'",
                level.name, self.report.name
            )));
        }
        let Some(primary_key) = level.primary_key.as_deref() else {
            return Err(EngineError::InvalidTransition(format!("level '{}' has no primary key", level.name)));
        };
        let Some(key_value) = row.get(primary_key).and_then(row_text) else {
            return Err(EngineError::InvalidTransition(format!("row has no '{primary_key}' value")));
        };

        let label = level
            .label_key
            .as_deref()
            .and_then(|label_key| row.get(label_key))
            .and_then(row_text)
            .unwrap_or_else(|| key_value.clone());
        let mut inherited = top.inherited.clone();
        inherited.insert(primary_key.to_string(), key_value);
        let frame = NavigationFrame {
            level: top.level + 1,
            inherited,
            label,
        };

        info!(
            report = %self.report.name,
            level = frame.level,
            inherited = ?frame.inherited,
            "drilled into row"
        );
        self.stack.push(frame);
        self.page = None;
        Ok(self.top())
    }

    /// Truncates the stack to `index + 1` frames. Index 0 also clears every inherited filter.
    pub fn select_breadcrumb(&mut self, index: usize) -> Result<&NavigationFrame, EngineError> {
        if index >= self.stack.len() {
            return Err(EngineError::InvalidTransition(format!(
                "breadcrumb {index} is out of range (depth {})",
                self.stack.len()
            )));
        }
        self.stack.truncate(index + 1);
        if index == 0 {
            self.stack[0].inherited.clear();
        }
        self.page = None;
        debug!(report = %self.report.name, depth = self.stack.len(), "breadcrumb selected");
        Ok(self.top())
    }

    /// Document fetching rows for the top frame.
    ///
    /// Filter-panel values feed template placeholders; inherited keys override
    /// them and also travel as the multi-condition block.
    pub fn request(&self, context: &QueryContext) -> Result<QueryDocument, EngineError> {
        let frame = self.top();
        let level = self.current_level();
        let mut values = self.filters.resolved_values();
        values.extend(frame.inherited.iter().map(|(key, value)| (key.clone(), value.clone())));

        let mut document = build_query(&level.query_template, None, &values, context)?;
        document.ui_context.insert("level".into(), level.name.clone());
        document.multi_condition = frame
            .inherited
            .iter()
            .map(|(key, value)| FilterCondition::new(key, value))
            .collect();
        Ok(document)
    }

    /// Fetches rows for the top frame. The filter panel must pass static validation first.
    pub async fn refresh(&mut self, transport: &dyn QueryTransport, context: &QueryContext) -> Result<&ReportPage, EngineError> {
        ensure_valid(&self.filters)?;
        let document = self.request(context)?;
        let level_name = self.current_level().name.clone();
        let sets = transport
            .execute(document)
            .await
            .map_err(|error| EngineError::fetch(&level_name, error))?;

        let page = ReportPage {
            rows: sets.primary().to_vec(),
            settings: sets.secondary().to_vec(),
        };
        info!(report = %self.report.name, level = %level_name, row_count = page.rows.len(), "report page loaded");
        Ok(self.page.insert(page))
    }
}

fn level_title(level: &ReportLevel) -> &str {
    level.title.as_deref().unwrap_or(&level.name)
}

fn row_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) if !is_blank(text) => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use chrono::NaiveDate;
    use formflow_types::{FieldKind, FieldSchema, QueryTemplate, ResultSets};
    use serde_json::json;

    fn level(name: &str, primary_key: Option<&str>) -> ReportLevel {
        ReportLevel {
            name: name.into(),
            title: None,
            query_template: QueryTemplate::new(format!("qry_{name}")).with_context("from", "${FromDate}"),
            primary_key: primary_key.map(str::to_string),
            label_key: Some("name".into()),
        }
    }

    fn navigator() -> DrillDownNavigator {
        DrillDownNavigator::new(ReportDefinition {
            name: "sales".into(),
            filters: vec![FieldSchema::new(FieldKind::Date { key: "FromDate".into() }).mandatory()],
            levels: vec![
                level("region", Some("RegionId")),
                level("branch", Some("BranchId")),
                level("invoice", None),
            ],
        })
        .expect("navigator")
    }

    fn context() -> QueryContext {
        QueryContext::new(NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"))
    }

    #[test]
    fn drilling_accumulates_inherited_keys() {
        let mut navigator = navigator();
        navigator.drill_into(&json!({"RegionId": "W", "name": "West"})).expect("region");
        navigator.drill_into(&json!({"BranchId": 12, "name": "Pune"})).expect("branch");

        assert_eq!(navigator.breadcrumbs(), vec!["region", "West", "Pune"]);
        assert_eq!(navigator.inherited().get("RegionId").map(String::as_str), Some("W"));
        assert_eq!(navigator.inherited().get("BranchId").map(String::as_str), Some("12"));
        assert!(matches!(
            navigator.drill_into(&json!({"InvoiceId": "1"})),
            Err(EngineError::InvalidTransition(_))
        ));
    }

    #[test]
    fn breadcrumb_restores_captured_context() {
        let mut navigator = navigator();
        navigator.drill_into(&json!({"RegionId": "W"})).expect("region");
        let captured = navigator.inherited().clone();
        navigator.drill_into(&json!({"BranchId": "B1"})).expect("branch");

        navigator.select_breadcrumb(1).expect("back to region");
        assert_eq!(navigator.inherited(), &captured);

        navigator.select_breadcrumb(0).expect("root");
        assert!(navigator.inherited().is_empty());
        assert_eq!(navigator.depth(), 1);
        assert!(navigator.select_breadcrumb(3).is_err());
    }

    #[test]
    fn rows_without_primary_key_cannot_be_drilled() {
        let mut navigator = navigator();
        assert!(navigator.drill_into(&json!({"name": "West"})).is_err());
        assert_eq!(navigator.depth(), 1);
    }

    #[test]
    fn report_without_levels_is_rejected() {
        let result = DrillDownNavigator::new(ReportDefinition {
            name: "empty".into(),
            filters: Vec::new(),
            levels: Vec::new(),
        });
        assert!(matches!(result, Err(EngineError::Schema(SchemaError::Empty { .. }))));
    }

    #[tokio::test]
    async fn refresh_requires_valid_filters_and_stores_page() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "qry_branch",
            ResultSets::new()
                .with_set("rs0", vec![json!({"BranchId": "B1"})])
                .with_set("rs1", vec![json!({"column": "BranchId", "width": 12})]),
        );
        let mut navigator = navigator();
        assert!(matches!(
            navigator.refresh(&transport, &context()).await,
            Err(EngineError::StaticValidationFailure(_))
        ));

        navigator
            .filters_mut()
            .set_value("FromDate", NaiveDate::from_ymd_opt(2024, 4, 1).expect("date").into())
            .expect("filter");
        navigator.drill_into(&json!({"RegionId": "W"})).expect("region");
        let page = navigator.refresh(&transport, &context()).await.expect("page");
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.settings.len(), 1);

        let sent = transport.sent_to("qry_branch");
        assert_eq!(sent[0].ui_context.get("from").map(String::as_str), Some("20240401"));
        assert_eq!(sent[0].multi_condition, vec![FilterCondition::new("RegionId", "W")]);
    }
}
