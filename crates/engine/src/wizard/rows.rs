//! Committed child rows of a table-typed stage.

use formflow_types::ValueBag;
use serde_json::Value as JsonValue;

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowTable {
    rows: Vec<ValueBag>,
    editing: Option<usize>,
}

impl RowTable {
    pub fn rows(&self) -> &[ValueBag] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row currently open for in-place editing.
    pub fn editing(&self) -> Option<usize> {
        self.editing
    }

    /// Commits a row: replaces the row being edited, or appends a new one.
    pub fn commit(&mut self, row: ValueBag) -> usize {
        match self.editing.take() {
            Some(index) if index < self.rows.len() => {
                self.rows[index] = row;
                index
            }
            _ => {
                self.rows.push(row);
                self.rows.len() - 1
            }
        }
    }

    pub fn begin_edit(&mut self, index: usize) -> Result<&ValueBag, EngineError> {
        let row = self
            .rows
            .get(index)
            .ok_or_else(|| EngineError::InvalidTransition(format!("row {index} does not exist")))?;
        self.editing = Some(index);
        Ok(row)
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn delete(&mut self, index: usize) -> Result<ValueBag, EngineError> {
        if index >= self.rows.len() {
            return Err(EngineError::InvalidTransition(format!("row {index} does not exist")));
        }
        self.editing = match self.editing {
            Some(editing) if editing == index => None,
            Some(editing) if editing > index => Some(editing - 1),
            other => other,
        };
        Ok(self.rows.remove(index))
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.editing = None;
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.rows.iter().map(|row| JsonValue::Object(row.to_json_map())).collect())
    }
}
