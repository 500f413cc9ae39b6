//! Dependency resolution for select fields.
//!
//! A value change runs in two phases. [`DependencyResolver::on_field_changed`]
//! is synchronous: it writes the value, clears every transitive dependent, and
//! plans option fetches for the direct dependents whose parents are all
//! filled. [`DependencyResolver::execute`] performs the planned fetches and
//! [`DependencyResolver::apply`] writes the results back, discarding any
//! response whose dependency context no longer matches the scope.
//!
//! [`DependencyResolver::change`] chains the phases for the common case.

mod plan;
mod scope;

use std::sync::Arc;

use formflow_types::{FieldValue, ValueBag};
use futures_util::{FutureExt, future::join_all};
use tracing::{debug, info, trace, warn};

pub use plan::{FetchOutcome, FetchPlan, OptionRequest};
pub use scope::{FormMode, FormScope, OptionState};

use crate::{
    cache::{CacheKey, OptionCache},
    error::EngineError,
    schema::FormSchema,
    template::{QueryContext, build_query},
    transport::{QueryTransport, extract_options},
};

pub struct DependencyResolver {
    cache: OptionCache,
    transport: Arc<dyn QueryTransport>,
    context: QueryContext,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("cache", &self.cache)
            .field("context", &self.context)
            .finish()
    }
}

impl DependencyResolver {
    pub fn new(cache: OptionCache, transport: Arc<dyn QueryTransport>, context: QueryContext) -> Self {
        Self {
            cache,
            transport,
            context,
        }
    }

    pub fn cache(&self) -> &OptionCache {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn QueryTransport> {
        &self.transport
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn set_context(&mut self, context: QueryContext) {
        self.context = context;
    }

    /// Builds the option request for one select field.
    ///
    /// Returns `None` for non-select fields and for fields whose parents are
    /// not all filled.
    pub fn option_request(&self, scope: &FormScope, field_key: &str) -> Result<Option<OptionRequest>, EngineError> {
        let field = scope.schema().require(field_key)?;
        let Some(source) = field.option_source() else {
            return Ok(None);
        };
        if !scope.dependencies_satisfied(field) {
            return Ok(None);
        }

        let parents = scope.parent_values(field);
        let document = build_query(&source.query_template, source.depends_on.as_ref(), &parents, &self.context)?;
        Ok(Some(OptionRequest {
            field: field.primary_key().to_string(),
            cache_key: CacheKey::new(field.primary_key(), source, &parents),
            document,
            option_keys: source.option_keys.clone(),
        }))
    }

    fn plan_field(&self, scope: &mut FormScope, field_key: &str, plan: &mut FetchPlan) {
        let request = match self.option_request(scope, field_key) {
            Ok(Some(request)) => request,
            Ok(None) => {
                scope.set_option_state(field_key, OptionState::Hidden);
                return;
            }
            Err(error) => {
                warn!(field = %field_key, %error, "option request aborted");
                scope.set_option_state(field_key, OptionState::Failed {
                    reason: error.to_string(),
                });
                plan.reject(error);
                return;
            }
        };

        if let Some(options) = self.cache.get(&request.cache_key) {
            debug!(field = %request.field, item_count = options.len(), "options served from cache");
            scope.set_option_state(&request.field, OptionState::Ready(options));
            return;
        }

        debug!(field = %request.field, query_source = %request.document.query_source, "option fetch planned");
        scope.set_option_state(&request.field, OptionState::Pending {
            parents: request.parents().to_string(),
        });
        plan.push(request);
    }

    /// Writes `value`, clears every transitive dependent, and plans fetches
    /// for the direct dependents that are now satisfied.
    ///
    /// Setting a field to the value it already holds is a no-op.
    pub fn on_field_changed(&self, scope: &mut FormScope, key: &str, value: FieldValue) -> Result<FetchPlan, EngineError> {
        let previous = scope.set_value(key, value)?;
        if previous == *scope.value(key) {
            trace!(field = %key, "value unchanged");
            return Ok(FetchPlan::default());
        }

        let schema = Arc::clone(scope.schema());
        let cleared = schema.graph().transitive_dependents(key);
        for dependent in &cleared {
            scope.clear_field(dependent);
        }
        if !cleared.is_empty() {
            debug!(field = %key, cleared = ?cleared, "dependent fields cleared");
        }

        let mut plan = FetchPlan::default();
        for dependent in schema.graph().direct_dependents(key) {
            self.plan_field(scope, dependent, &mut plan);
        }
        Ok(plan)
    }

    /// Plans every select field not already showing options, parents first.
    pub fn plan_all(&self, scope: &mut FormScope) -> FetchPlan {
        let schema = Arc::clone(scope.schema());
        let mut plan = FetchPlan::default();
        for field in schema.graph().topological_order() {
            if matches!(scope.option_state(&field), OptionState::Ready(_)) {
                continue;
            }
            if schema.field(&field).and_then(|schema| schema.option_source()).is_some() {
                self.plan_field(scope, &field, &mut plan);
            }
        }
        plan
    }

    /// Runs one request through the cache, sharing any identical in-flight fetch.
    pub async fn fetch(&self, request: OptionRequest) -> FetchOutcome {
        let OptionRequest {
            field,
            cache_key,
            document,
            option_keys,
        } = request;
        let parents = cache_key.parents().to_string();
        let transport = Arc::clone(&self.transport);
        let target = field.clone();

        let result = self
            .cache
            .get_or_fetch(cache_key, move || {
                async move {
                    debug!(field = %target, query_source = %document.query_source, "option fetch dispatched");
                    let sets = transport
                        .execute(document)
                        .await
                        .map_err(|error| EngineError::fetch(&target, error))?;
                    let options = extract_options(&sets, &option_keys).map_err(|error| EngineError::fetch(&target, error))?;
                    info!(field = %target, item_count = options.len(), "option fetch completed");
                    Ok(options)
                }
                .boxed()
            })
            .await;

        if let Err(error) = &result {
            warn!(field = %field, %error, "option fetch failed");
        }
        FetchOutcome { field, parents, result }
    }

    /// Executes every request of a plan concurrently.
    pub async fn execute(&self, plan: &FetchPlan) -> Vec<FetchOutcome> {
        join_all(plan.requests().iter().cloned().map(|request| self.fetch(request))).await
    }

    /// Writes outcomes back into the scope and returns the failures.
    ///
    /// An outcome is applied only if the field is still pending on the same
    /// dependency context it was requested with, and the scope's current
    /// parent values still produce that context.
    pub fn apply(&self, scope: &mut FormScope, outcomes: Vec<FetchOutcome>) -> Vec<EngineError> {
        let mut failures = Vec::new();
        for outcome in outcomes {
            let pending_on = match scope.option_state(&outcome.field) {
                OptionState::Pending { parents } => Some(parents.as_str()),
                _ => None,
            };
            let current = scope
                .schema()
                .field(&outcome.field)
                .map(|field| scope.parent_values(field).canonical());
            if pending_on != Some(outcome.parents.as_str()) || current.as_deref() != Some(outcome.parents.as_str()) {
                debug!(field = %outcome.field, "discarding stale option response");
                continue;
            }

            match outcome.result {
                Ok(options) => scope.set_option_state(&outcome.field, OptionState::Ready(options)),
                Err(error) => {
                    scope.set_option_state(&outcome.field, OptionState::Failed {
                        reason: error.to_string(),
                    });
                    failures.push(error);
                }
            }
        }
        failures
    }

    /// Executes a plan and applies it, returning every field-scoped failure.
    pub async fn settle(&self, scope: &mut FormScope, plan: FetchPlan) -> Vec<EngineError> {
        let mut failures = plan.rejected().to_vec();
        let outcomes = self.execute(&plan).await;
        failures.extend(self.apply(scope, outcomes));
        failures
    }

    /// Applies a user edit and waits for the resulting option fetches.
    pub async fn change(&self, scope: &mut FormScope, key: &str, value: FieldValue) -> Result<Vec<EngineError>, EngineError> {
        let plan = self.on_field_changed(scope, key, value)?;
        Ok(self.settle(scope, plan).await)
    }

    /// Fetches options for every satisfiable select field.
    pub async fn load(&self, scope: &mut FormScope) -> Vec<EngineError> {
        let plan = self.plan_all(scope);
        self.settle(scope, plan).await
    }

    /// Restores a stored record without triggering invalidation, then loads
    /// every satisfiable option list in parallel.
    ///
    /// Option lists already shown are discarded first; the record may carry
    /// different parent values than the ones they were fetched for.
    pub async fn hydrate(&self, scope: &mut FormScope, record: &ValueBag) -> Vec<EngineError> {
        scope.load_values(record);
        scope.hide_options();
        debug!(schema = %scope.schema().name(), value_count = record.len(), "record hydrated");
        self.load(scope).await
    }

    /// Swaps the scope's schema for a reshaped one.
    ///
    /// Cached options are invalidated for every field whose definition changed
    /// and for everything depending on it. Values of keys that still exist are
    /// kept.
    pub fn replace_schema(&self, scope: &mut FormScope, schema: Arc<FormSchema>) -> FetchPlan {
        for field in schema.fields() {
            let key = field.primary_key();
            if scope.schema().field(key) == Some(field) {
                continue;
            }
            self.cache.invalidate(key);
            for dependent in schema.graph().transitive_dependents(key) {
                self.cache.invalidate(&dependent);
            }
            info!(field = %key, "field reshaped, cached options invalidated");
        }

        let values = scope.values().clone();
        let mode = scope.mode();
        *scope = FormScope::new(schema).with_mode(mode);
        scope.load_values(&values);
        self.plan_all(scope)
    }
}
