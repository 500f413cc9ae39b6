//! Engine facade used by hosting surfaces.
//!
//! [`FormEngine`] owns the shared option cache, the transport, and the
//! notification sink. Forms, reports, and wizards opened through one engine
//! share its cache and nothing else.

use std::sync::Arc;

use chrono::NaiveDate;
use formflow_types::{FieldSchema, FieldValue, ReportDefinition, ValueBag, WorkflowDefinition};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{
    cache::OptionCache,
    config::EngineConfig,
    error::EngineError,
    navigation::DrillDownNavigator,
    notify::Notifier,
    resolver::{DependencyResolver, FormMode, FormScope},
    schema::FormSchema,
    template::QueryContext,
    transport::QueryTransport,
    validation::{RemoteCheck, RemoteValidator, apply_enabled_updates, value_updates},
    wizard::{Wizard, WizardStep},
};

pub struct FormEngine {
    config: EngineConfig,
    resolver: DependencyResolver,
    validator: RemoteValidator,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormEngine")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl FormEngine {
    /// Engine dated today with a cache sized from `config`.
    pub fn new(config: EngineConfig, transport: Arc<dyn QueryTransport>, notifier: Arc<dyn Notifier>) -> Self {
        let cache = OptionCache::new(config.cache_ttl(), config.cache_soft_limit);
        let today = QueryContext::today_local().today;
        Self::with_cache(config, cache, transport, notifier, today)
    }

    /// Engine with an injected cache and an explicit "today".
    pub fn with_cache(
        config: EngineConfig,
        cache: OptionCache,
        transport: Arc<dyn QueryTransport>,
        notifier: Arc<dyn Notifier>,
        today: NaiveDate,
    ) -> Self {
        let context = QueryContext::new(today).with_api_context(config.api_context.clone());
        Self {
            resolver: DependencyResolver::new(cache, Arc::clone(&transport), context.clone()),
            validator: RemoteValidator::new(transport, context),
            config,
            notifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &OptionCache {
        self.resolver.cache()
    }

    pub fn context(&self) -> &QueryContext {
        self.resolver.context()
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    fn transport(&self) -> &dyn QueryTransport {
        self.resolver.transport().as_ref()
    }

    /// Moves the reference date used by relative date helpers.
    pub fn set_today(&mut self, today: NaiveDate) {
        let context = QueryContext::new(today).with_api_context(self.config.api_context.clone());
        self.resolver.set_context(context.clone());
        self.validator.set_context(context);
    }

    fn notify_failures(&self, failures: &[EngineError]) {
        for failure in failures {
            self.notifier.error(&failure.to_string());
        }
    }

    pub fn open_form(&self, name: &str, fields: Vec<FieldSchema>, mode: FormMode) -> Result<FormScope, EngineError> {
        let schema = FormSchema::load(name, fields)?;
        Ok(FormScope::new(Arc::new(schema)).with_mode(mode))
    }

    /// Initial option load for a freshly opened form.
    pub async fn load(&self, scope: &mut FormScope) -> Vec<EngineError> {
        let failures = self.resolver.load(scope).await;
        self.notify_failures(&failures);
        failures
    }

    /// Applies a user edit.
    ///
    /// Fields with a remote validation hook are checked first while editing a
    /// record; a rejection restores the prior value and surfaces the message.
    /// An accepted value then flows through dependency resolution, followed by
    /// any field updates the check returned. Option fetch failures are
    /// notified and returned; they do not fail the edit.
    pub async fn change_value(&self, scope: &mut FormScope, key: &str, value: FieldValue) -> Result<Vec<EngineError>, EngineError> {
        let previous = scope.set_value(key, value.clone())?;
        let check = self.validator.validate_remote(scope, key).await;
        scope.set_value(key, previous)?;
        let check = match check {
            Ok(check) => check,
            Err(error) => {
                info!(field = %key, %error, "value change rejected");
                self.notifier.error(&error.to_string());
                return Err(error);
            }
        };

        let mut failures = self.resolver.change(scope, key, value).await?;
        if let Some(check) = check {
            failures.extend(self.apply_check(scope, &check).await?);
        }
        self.notify_failures(&failures);
        Ok(failures)
    }

    async fn apply_check(&self, scope: &mut FormScope, check: &RemoteCheck) -> Result<Vec<EngineError>, EngineError> {
        apply_enabled_updates(scope, &check.updates);
        let mut failures = Vec::new();
        for (field, value) in value_updates(scope.schema(), &check.updates) {
            debug!(field = %field, "applying remote value update");
            failures.extend(self.resolver.change(scope, &field, value).await?);
        }
        Ok(failures)
    }

    /// Opens a stored record for editing.
    ///
    /// Every satisfiable option list is fetched in parallel first; remote
    /// validations then run one after another in schema order.
    pub async fn load_for_edit(&self, scope: &mut FormScope, record: &ValueBag) -> Vec<EngineError> {
        scope.set_mode(FormMode::Edit);
        let mut failures = self.resolver.hydrate(scope, record).await;

        let hooked: Vec<String> = scope
            .schema()
            .fields()
            .iter()
            .filter(|field| field.remote_validation.is_some())
            .map(|field| field.primary_key().to_string())
            .collect();
        for key in hooked {
            match self.validator.validate_remote(scope, &key).await {
                Ok(Some(check)) => match self.apply_check(scope, &check).await {
                    Ok(more) => failures.extend(more),
                    Err(error) => failures.push(error),
                },
                Ok(None) => {}
                Err(error) => failures.push(error),
            }
        }

        self.notify_failures(&failures);
        failures
    }

    pub fn open_report(&self, report: ReportDefinition) -> Result<DrillDownNavigator, EngineError> {
        DrillDownNavigator::new(report)
    }

    /// Fetches rows for the navigator's top frame.
    pub async fn refresh_report(&self, navigator: &mut DrillDownNavigator) -> Result<(), EngineError> {
        match navigator.refresh(self.transport(), self.context()).await {
            Ok(_) => Ok(()),
            Err(error) => {
                if !matches!(error, EngineError::StaticValidationFailure(_)) {
                    self.notifier.error(&error.to_string());
                }
                Err(error)
            }
        }
    }

    /// Pushes a frame for `row` and fetches the new top frame.
    pub async fn drill_into(&self, navigator: &mut DrillDownNavigator, row: &JsonValue) -> Result<(), EngineError> {
        navigator.drill_into(row)?;
        self.refresh_report(navigator).await
    }

    /// Returns to breadcrumb `index` and fetches that frame again.
    pub async fn select_breadcrumb(&self, navigator: &mut DrillDownNavigator, index: usize) -> Result<(), EngineError> {
        navigator.select_breadcrumb(index)?;
        self.refresh_report(navigator).await
    }

    pub fn open_workflow(&self, definition: WorkflowDefinition) -> Result<Wizard, EngineError> {
        Wizard::new(definition, Arc::clone(&self.notifier))
    }

    pub async fn save_stage(&self, wizard: &mut Wizard) -> Result<WizardStep, EngineError> {
        wizard.save_and_advance(self.transport(), self.context()).await
    }

    pub async fn final_submit(&self, wizard: &mut Wizard) -> Result<(), EngineError> {
        wizard.final_submit(self.transport(), self.context()).await
    }
}
