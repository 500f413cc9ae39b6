//! Per-context form state.
//!
//! A [`FormScope`] owns one value bag plus the display state the resolver
//! maintains for it: option lists per select field and runtime enabled
//! overrides from remote validation. Scopes never share state; only the
//! option cache is shared between them.

use std::{collections::HashMap, sync::Arc};

use formflow_types::{FieldOption, FieldSchema, FieldValue, ValueBag};
use indexmap::IndexMap;

use crate::{
    cache::OptionList,
    error::SchemaError,
    schema::FormSchema,
    template::{ResolvedValues, format_for_field},
};

/// How the hosting surface opened the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormMode {
    /// Creating a new record.
    #[default]
    New,
    /// Editing a pre-existing record. Remote validation only runs here.
    Edit,
    /// Read-only view.
    View,
}

/// Display state of one select field's option list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OptionState {
    /// Dependencies are empty or partial; the field is not rendered.
    #[default]
    Hidden,
    /// A fetch was issued for the recorded dependency context.
    Pending { parents: String },
    Ready(OptionList),
    /// The last fetch failed. No automatic retry.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct FormScope {
    schema: Arc<FormSchema>,
    values: ValueBag,
    options: IndexMap<String, OptionState>,
    enabled_overrides: HashMap<String, bool>,
    mode: FormMode,
}

impl FormScope {
    pub fn new(schema: Arc<FormSchema>) -> Self {
        let values = schema.empty_values();
        let options = schema
            .fields()
            .iter()
            .filter(|field| field.option_source().is_some())
            .map(|field| (field.primary_key().to_string(), OptionState::Hidden))
            .collect();
        Self {
            schema,
            values,
            options,
            enabled_overrides: HashMap::new(),
            mode: FormMode::New,
        }
    }

    pub fn with_mode(mut self, mode: FormMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn schema(&self) -> &Arc<FormSchema> {
        &self.schema
    }

    pub fn values(&self) -> &ValueBag {
        &self.values
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FormMode) {
        self.mode = mode;
    }

    pub fn value(&self, key: &str) -> &FieldValue {
        self.values.value_or_empty(key)
    }

    /// Writes a value without any dependency handling and returns the prior one.
    ///
    /// The resolver is the only caller that should use this for user edits;
    /// hydration and row loading use it to restore stored data.
    pub fn set_value(&mut self, key: &str, value: FieldValue) -> Result<FieldValue, SchemaError> {
        self.schema.require(key)?;
        Ok(self.values.insert(key, value))
    }

    /// Replaces every value from a stored bag, ignoring keys the schema does not own.
    pub fn load_values(&mut self, bag: &ValueBag) {
        for (key, value) in bag.iter() {
            if self.schema.field(key).is_some() {
                self.values.insert(key, value.clone());
            }
        }
    }

    pub fn option_state(&self, field: &str) -> &OptionState {
        static HIDDEN: OptionState = OptionState::Hidden;
        self.schema
            .graph()
            .owner_of(field)
            .and_then(|owner| self.options.get(owner))
            .unwrap_or(&HIDDEN)
    }

    pub(crate) fn set_option_state(&mut self, field: &str, state: OptionState) {
        if let Some(slot) = self.options.get_mut(field) {
            *slot = state;
        }
    }

    /// Options to render for a select field. Empty unless ready.
    pub fn options(&self, field: &str) -> &[FieldOption] {
        match self.option_state(field) {
            OptionState::Ready(options) => options.as_slice(),
            _ => &[],
        }
    }

    /// True when every declared parent of `field` holds a non-empty value.
    pub fn dependencies_satisfied(&self, field: &FieldSchema) -> bool {
        field.dependencies().iter().all(|parent| self.values.is_filled(parent))
    }

    /// Select fields with unmet dependencies are not rendered at all.
    pub fn is_visible(&self, key: &str) -> bool {
        match self.schema.field(key) {
            Some(field) if field.option_source().is_some() => self.dependencies_satisfied(field),
            Some(_) => true,
            None => false,
        }
    }

    /// Runtime enabled state: a remote override wins over the base configuration.
    pub fn is_enabled(&self, key: &str) -> bool {
        let Some(field) = self.schema.field(key) else {
            return false;
        };
        self.enabled_overrides
            .get(field.primary_key())
            .copied()
            .unwrap_or(field.enabled)
    }

    pub(crate) fn set_enabled(&mut self, key: &str, enabled: bool) {
        if let Some(owner) = self.schema.graph().owner_of(key) {
            self.enabled_overrides.insert(owner.to_string(), enabled);
        }
    }

    /// Type-aware formatted values of `field`'s declared parents.
    pub fn parent_values(&self, field: &FieldSchema) -> ResolvedValues {
        field
            .dependencies()
            .iter()
            .map(|parent| (parent.clone(), self.formatted(parent)))
            .collect()
    }

    /// Every value in the bag, formatted per its field kind.
    pub fn resolved_values(&self) -> ResolvedValues {
        self.values.keys().map(|key| (key.to_string(), self.formatted(key))).collect()
    }

    /// Formatted values of the given keys only.
    pub fn resolved_subset<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> ResolvedValues {
        keys.into_iter().map(|key| (key.clone(), self.formatted(key))).collect()
    }

    fn formatted(&self, key: &str) -> String {
        let value = self.values.value_or_empty(key);
        match self.schema.field(key) {
            Some(field) => format_for_field(field, value),
            None => crate::template::format_value(value),
        }
    }

    /// Clears a field's values and hides its options.
    pub(crate) fn clear_field(&mut self, field: &str) {
        let keys: Vec<String> = self
            .schema
            .field(field)
            .map(|schema| schema.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        for key in keys {
            self.values.clear(&key);
        }
        self.set_option_state(field, OptionState::Hidden);
    }

    /// Hides every option list so the next load re-plans all of them.
    pub(crate) fn hide_options(&mut self) {
        for state in self.options.values_mut() {
            *state = OptionState::Hidden;
        }
    }

    /// Back to the freshly opened state: empty values and base enabled flags.
    ///
    /// Dependent selects lose their options. Independent selects keep theirs,
    /// since their dependency context cannot have changed.
    pub fn reset(&mut self) {
        self.values.clear_all();
        let schema = Arc::clone(&self.schema);
        for field in schema.fields() {
            if !field.dependencies().is_empty() {
                self.set_option_state(field.primary_key(), OptionState::Hidden);
            }
        }
        self.enabled_overrides.clear();
    }
}
