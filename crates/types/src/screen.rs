//! Report and entry-workflow definitions, plus the screen configuration file shape.

use serde::{Deserialize, Serialize};

use crate::field::{FieldSchema, QueryTemplate};

/// One drill-down level of a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportLevel {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub query_template: QueryTemplate,
    /// Row attribute carried into the next level as an inherited filter.
    /// Levels without a key cannot be drilled into.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Row attribute shown in the breadcrumb for frames opened from this level.
    #[serde(default)]
    pub label_key: Option<String>,
}

/// A multi-level report: a filter panel plus ordered drill-down levels (level 0 = root).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefinition {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<FieldSchema>,
    pub levels: Vec<ReportLevel>,
}

/// Shape of a wizard stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StageLayout {
    /// A single record form.
    #[default]
    Form,
    /// A repeatable child-row table. `allow_empty` lets the stage save with no rows.
    Table {
        #[serde(default, rename = "allowEmpty")]
        allow_empty: bool,
    },
}

/// One stage (tab) of an entry workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub layout: StageLayout,
    /// Template for the "save & advance" submission of this stage.
    pub submit_template: QueryTemplate,
}

/// Ordered entry workflow. Stage 0 is always the master record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub stages: Vec<StageDefinition>,
    /// Template for the distinct final submit that aggregates every stage.
    pub final_submit_template: QueryTemplate,
}

/// Screen configuration as delivered by the server for one screen load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScreenConfig {
    #[serde(default)]
    pub form: Vec<FieldSchema>,
    #[serde(default)]
    pub report: Option<ReportDefinition>,
    #[serde(default)]
    pub workflow: Option<WorkflowDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workflow_with_table_stage() {
        let raw = r#"
name: purchase-order
finalSubmitTemplate:
  source: qry_po_final
stages:
  - name: master
    submitTemplate: { source: qry_po_master }
    fields:
      - { kind: text, key: Vendor, mandatory: true }
  - name: lines
    layout: { type: table, allowEmpty: true }
    submitTemplate: { source: qry_po_lines }
    fields:
      - { kind: text, key: Item }
"#;
        let workflow: WorkflowDefinition = serde_yaml::from_str(raw).expect("workflow");
        assert_eq!(workflow.stages.len(), 2);
        assert_eq!(workflow.stages[0].layout, StageLayout::Form);
        assert_eq!(workflow.stages[1].layout, StageLayout::Table { allow_empty: true });
    }

    #[test]
    fn report_levels_default_to_non_drillable() {
        let raw = r#"{
            "name": "sales",
            "levels": [{ "name": "summary", "queryTemplate": { "source": "qry_sales" } }]
        }"#;
        let report: ReportDefinition = serde_json::from_str(raw).expect("report");
        assert!(report.filters.is_empty());
        assert!(report.levels[0].primary_key.is_none());
    }
}
