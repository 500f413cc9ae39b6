//! Multi-stage entry wizard.
//!
//! Stage 0 is the master record and is always shown first. "Save & advance"
//! validates the active stage, submits the aggregate of every stage up to and
//! including it, and moves to the next stage on success. Saving the last stage
//! does not close the wizard: a distinct final submit aggregates every stage,
//! and only its success resets the wizard and closes the hosting surface.
//!
//! A failed submission leaves every stage, row, and completion flag exactly as
//! it was so the user can retry.

mod rows;

use std::{fmt, sync::Arc};

use formflow_types::{ActionResult, QueryDocument, QueryTemplate, StageDefinition, StageLayout, WorkflowDefinition};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info, warn};

pub use rows::RowTable;

use crate::{
    error::{EngineError, SchemaError, ValidationErrors},
    notify::Notifier,
    resolver::FormScope,
    schema::FormSchema,
    template::{QueryContext, build_query},
    transport::QueryTransport,
    validation::ensure_valid,
};

/// UI-context key carrying the JSON aggregate of stage data.
pub const PAYLOAD_CONTEXT_KEY: &str = "payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStatus {
    Open,
    /// The last stage is saved; only the final submit remains.
    AwaitingFinalSubmit,
    /// Final submit succeeded and the wizard was reset.
    Closed,
}

/// Result of a successful "save & advance".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Advanced { stage: usize },
    AwaitingFinalSubmit,
}

#[derive(Debug, Clone)]
pub struct StageState {
    definition: StageDefinition,
    scope: FormScope,
    rows: RowTable,
    completed: bool,
}

impl StageState {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn title(&self) -> &str {
        self.definition.title.as_deref().unwrap_or(&self.definition.name)
    }

    pub fn definition(&self) -> &StageDefinition {
        &self.definition
    }

    pub fn scope(&self) -> &FormScope {
        &self.scope
    }

    pub fn rows(&self) -> &RowTable {
        &self.rows
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn is_table(&self) -> bool {
        matches!(self.definition.layout, StageLayout::Table { .. })
    }

    /// Committed data: the form values, or the row list for table stages.
    fn committed_json(&self) -> JsonValue {
        if self.is_table() {
            self.rows.to_json()
        } else {
            JsonValue::Object(self.scope.values().to_json_map())
        }
    }

    fn reset(&mut self) {
        self.scope.reset();
        self.rows.clear();
        self.completed = false;
    }
}

pub struct Wizard {
    definition: WorkflowDefinition,
    stages: Vec<StageState>,
    active: usize,
    status: WizardStatus,
    notifier: Arc<dyn Notifier>,
}

impl fmt::Debug for Wizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wizard")
            .field("workflow", &self.definition.name)
            .field("active", &self.active)
            .field("status", &self.status)
            .finish()
    }
}

impl Wizard {
    pub fn new(definition: WorkflowDefinition, notifier: Arc<dyn Notifier>) -> Result<Self, EngineError> {
        if definition.stages.is_empty() {
            return Err(SchemaError::Empty {
                name: definition.name.clone(),
                what: "stage",
            }
            .into());
        }
        let stages = definition
            .stages
            .iter()
            .map(|stage| {
                let schema = FormSchema::load(stage.name.clone(), stage.fields.clone())?;
                Ok(StageState {
                    definition: stage.clone(),
                    scope: FormScope::new(Arc::new(schema)),
                    rows: RowTable::default(),
                    completed: false,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        Ok(Self {
            definition,
            stages,
            active: 0,
            status: WizardStatus::Open,
            notifier,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn status(&self) -> WizardStatus {
        self.status
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    pub fn active_stage(&self) -> &StageState {
        &self.stages[self.active]
    }

    /// Scope of the active stage, for value changes through the resolver.
    pub fn active_scope_mut(&mut self) -> &mut FormScope {
        &mut self.stages[self.active].scope
    }

    /// Navigable tabs: every stage after the master record.
    pub fn tabs(&self) -> &[StageState] {
        &self.stages[1..]
    }

    fn is_last(&self) -> bool {
        self.active + 1 == self.stages.len()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        match self.status {
            WizardStatus::Closed => Err(EngineError::InvalidTransition(format!(
                "workflow '{}' is closed",
                self.definition.name
            ))),
            _ => Ok(()),
        }
    }

    /// Moves to a stage whose predecessors are all completed.
    pub fn select_stage(&mut self, index: usize) -> Result<(), EngineError> {
        self.ensure_open()?;
        if index >= self.stages.len() {
            return Err(EngineError::InvalidTransition(format!("stage {index} does not exist")));
        }
        if let Some(blocking) = self.stages[..index].iter().find(|stage| !stage.completed) {
            return Err(EngineError::InvalidTransition(format!(
                "stage '{}' must be saved first",
                blocking.name()
            )));
        }
        self.active = index;
        Ok(())
    }

    fn active_table(&mut self) -> Result<&mut StageState, EngineError> {
        self.ensure_open()?;
        let stage = &mut self.stages[self.active];
        if !stage.is_table() {
            return Err(EngineError::InvalidTransition(format!(
                "stage '{}' has no row table",
                stage.definition.name
            )));
        }
        Ok(stage)
    }

    /// Validates the active stage's entry values and commits them as a row.
    ///
    /// When a row is being edited it is replaced in place.
    pub fn add_row(&mut self) -> Result<usize, EngineError> {
        let stage = self.active_table()?;
        ensure_valid(&stage.scope)?;
        let index = stage.rows.commit(stage.scope.values().clone());
        stage.scope.reset();
        debug!(stage = %stage.definition.name, row = index, "row committed");
        Ok(index)
    }

    /// Opens a committed row for editing by loading it into the stage's scope.
    pub fn edit_row(&mut self, index: usize) -> Result<(), EngineError> {
        let stage = self.active_table()?;
        let row = stage.rows.begin_edit(index)?.clone();
        stage.scope.reset();
        stage.scope.load_values(&row);
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), EngineError> {
        let stage = self.active_table()?;
        stage.rows.cancel_edit();
        stage.scope.reset();
        Ok(())
    }

    pub fn delete_row(&mut self, index: usize) -> Result<(), EngineError> {
        let stage = self.active_table()?;
        stage.rows.delete(index)?;
        Ok(())
    }

    /// Aggregate of committed data for stages `0..=last`, keyed by stage name.
    pub fn payload(&self, last: usize) -> JsonValue {
        let aggregate: JsonMap<String, JsonValue> = self
            .stages
            .iter()
            .take(last + 1)
            .map(|stage| (stage.definition.name.clone(), stage.committed_json()))
            .collect();
        JsonValue::Object(aggregate)
    }

    fn submission(
        &self,
        template: &QueryTemplate,
        action: &str,
        last: usize,
        context: &QueryContext,
    ) -> Result<QueryDocument, EngineError> {
        let values = self.stages[self.active].scope.resolved_values();
        let mut document = build_query(template, None, &values, context)?;
        document.ui_context.insert("action".into(), action.into());
        document
            .ui_context
            .insert("stage".into(), self.stages[self.active].definition.name.clone());
        document
            .ui_context
            .insert(PAYLOAD_CONTEXT_KEY.into(), self.payload(last).to_string());
        Ok(document)
    }

    async fn submit(&self, transport: &dyn QueryTransport, document: QueryDocument, stage: &str) -> Result<Option<String>, EngineError> {
        let failure = |message: String| {
            warn!(stage = %stage, %message, "submission rejected");
            self.notifier.error(&message);
            EngineError::SubmissionFailure {
                stage: stage.to_string(),
                message,
            }
        };

        let sets = transport.execute(document).await.map_err(|error| failure(error.to_string()))?;
        let result = ActionResult::from_result_sets(&sets);
        if !result.success {
            return Err(failure(result.message.unwrap_or_else(|| format!("{stage} was not saved"))));
        }
        Ok(result.message)
    }

    /// Validates and submits the active stage, then advances.
    pub async fn save_and_advance(&mut self, transport: &dyn QueryTransport, context: &QueryContext) -> Result<WizardStep, EngineError> {
        if self.status != WizardStatus::Open {
            return Err(EngineError::InvalidTransition(match self.status {
                WizardStatus::AwaitingFinalSubmit => "the last stage is saved; use final submit".to_string(),
                _ => format!("workflow '{}' is closed", self.definition.name),
            }));
        }

        let stage = &self.stages[self.active];
        match stage.definition.layout {
            StageLayout::Form => ensure_valid(&stage.scope)?,
            StageLayout::Table { allow_empty } => {
                if stage.rows.is_empty() && !allow_empty {
                    let mut errors = ValidationErrors::new();
                    errors.insert(stage.definition.name.clone(), format!("{} needs at least one row", stage.title()));
                    return Err(EngineError::StaticValidationFailure(errors));
                }
            }
        }

        let stage_name = stage.definition.name.clone();
        let title = stage.title().to_string();
        let document = self.submission(&stage.definition.submit_template, "save", self.active, context)?;
        info!(stage = %stage_name, "stage submission dispatched");
        let message = self.submit(transport, document, &stage_name).await?;

        self.stages[self.active].completed = true;
        self.notifier
            .success(&message.unwrap_or_else(|| format!("{title} saved")));

        if self.is_last() {
            self.status = WizardStatus::AwaitingFinalSubmit;
            info!(workflow = %self.definition.name, "awaiting final submit");
            Ok(WizardStep::AwaitingFinalSubmit)
        } else {
            self.active += 1;
            Ok(WizardStep::Advanced { stage: self.active })
        }
    }

    /// Submits every stage in one aggregate; on success resets and closes the wizard.
    pub async fn final_submit(&mut self, transport: &dyn QueryTransport, context: &QueryContext) -> Result<(), EngineError> {
        if self.status != WizardStatus::AwaitingFinalSubmit {
            return Err(EngineError::InvalidTransition(
                "final submit requires every stage to be saved".to_string(),
            ));
        }

        let last = self.stages.len() - 1;
        let document = self.submission(&self.definition.final_submit_template, "final", last, context)?;
        let workflow = self.definition.name.clone();
        info!(workflow = %workflow, "final submission dispatched");
        let message = self.submit(transport, document, &workflow).await?;

        self.notifier
            .success(&message.unwrap_or_else(|| format!("{workflow} submitted")));
        for stage in &mut self.stages {
            stage.reset();
        }
        self.active = 0;
        self.status = WizardStatus::Closed;
        Ok(())
    }

    /// Reopens a closed wizard in its initial empty state.
    pub fn reopen(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
        self.active = 0;
        self.status = WizardStatus::Open;
    }
}
