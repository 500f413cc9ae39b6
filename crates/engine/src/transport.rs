//! Transport seam between the engine and the query endpoint.
//!
//! The engine only ever sends a [`QueryDocument`] and receives [`ResultSets`].
//! [`formflow_api::QueryClient`] implements [`QueryTransport`] for real
//! traffic; [`ScriptedTransport`] answers from canned responses and records
//! every document it receives.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use formflow_api::{ClientError, QueryClient};
use formflow_types::{FieldOption, OptionKeySpec, QueryDocument, ResultSets};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Timeout => Self::Timeout,
            ClientError::Network(message) => Self::Network(message),
            ClientError::Status { status, body } => Self::Status { status, body },
            ClientError::Decode(message) => Self::Malformed(message),
        }
    }
}

#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn execute(&self, document: QueryDocument) -> Result<ResultSets, TransportError>;
}

#[async_trait]
impl QueryTransport for QueryClient {
    async fn execute(&self, document: QueryDocument) -> Result<ResultSets, TransportError> {
        QueryClient::execute(self, &document).await.map_err(TransportError::from)
    }
}

/// Reads options from the primary result set.
///
/// Every row must be an object carrying the value attribute named by `keys`.
/// A missing label falls back to the value.
pub fn extract_options(sets: &ResultSets, keys: &OptionKeySpec) -> Result<Vec<FieldOption>, TransportError> {
    sets.primary()
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            let object = row
                .as_object()
                .ok_or_else(|| TransportError::Malformed(format!("option row {row_index} is not an object")))?;
            let value = object.get(&keys.value).and_then(scalar_text).ok_or_else(|| {
                TransportError::Malformed(format!("option row {row_index} has no '{}' attribute", keys.value))
            })?;
            let label = object.get(&keys.label).and_then(scalar_text).unwrap_or_else(|| value.clone());
            Ok(FieldOption::new(label, value))
        })
        .collect()
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        JsonValue::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

type ScriptedResponse = Result<ResultSets, TransportError>;

/// In-memory transport answering by query source.
///
/// One-shot responses queued with [`ScriptedTransport::respond_once`] are
/// consumed first; otherwise the sticky response set with
/// [`ScriptedTransport::respond`] answers. Unscripted sources fail with a
/// network error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    sticky: Mutex<HashMap<String, ScriptedResponse>>,
    sent: Mutex<Vec<QueryDocument>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, source: impl Into<String>, sets: ResultSets) -> &Self {
        self.sticky.lock().expect("script lock").insert(source.into(), Ok(sets));
        self
    }

    pub fn respond_once(&self, source: impl Into<String>, sets: ResultSets) -> &Self {
        self.queued
            .lock()
            .expect("script lock")
            .entry(source.into())
            .or_default()
            .push_back(Ok(sets));
        self
    }

    pub fn fail(&self, source: impl Into<String>, error: TransportError) -> &Self {
        self.sticky.lock().expect("script lock").insert(source.into(), Err(error));
        self
    }

    /// Every document received so far, in order.
    pub fn sent(&self) -> Vec<QueryDocument> {
        self.sent.lock().expect("sent lock").clone()
    }

    /// Documents received for one query source.
    pub fn sent_to(&self, source: &str) -> Vec<QueryDocument> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .filter(|document| document.query_source == source)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueryTransport for ScriptedTransport {
    async fn execute(&self, document: QueryDocument) -> Result<ResultSets, TransportError> {
        let source = document.query_source.clone();
        self.sent.lock().expect("sent lock").push(document);

        let queued = self
            .queued
            .lock()
            .expect("script lock")
            .get_mut(&source)
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return response;
        }
        self.sticky
            .lock()
            .expect("script lock")
            .get(&source)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Network(format!("no scripted response for '{source}'"))))
    }
}
