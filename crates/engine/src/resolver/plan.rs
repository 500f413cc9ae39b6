//! Fetch plans produced by the resolver and the outcomes applied back to a scope.

use formflow_types::{OptionKeySpec, QueryDocument};

use crate::{cache::CacheKey, cache::OptionList, error::EngineError};

/// One option fetch the resolver decided to issue after a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRequest {
    pub field: String,
    pub cache_key: CacheKey,
    pub document: QueryDocument,
    pub option_keys: OptionKeySpec,
}

impl OptionRequest {
    /// Dependency context the request was built from.
    pub fn parents(&self) -> &str {
        self.cache_key.parents()
    }
}

/// Fetches that must complete before a scope's option lists are current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    requests: Vec<OptionRequest>,
    /// Fields whose request could not be built, already marked failed on the scope.
    rejected: Vec<EngineError>,
}

impl FetchPlan {
    pub(crate) fn push(&mut self, request: OptionRequest) {
        self.requests.push(request);
    }

    pub(crate) fn reject(&mut self, error: EngineError) {
        self.rejected.push(error);
    }

    pub fn rejected(&self) -> &[EngineError] {
        &self.rejected
    }

    pub fn requests(&self) -> &[OptionRequest] {
        &self.requests
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.requests.iter().map(|request| request.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Result of one executed [`OptionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub field: String,
    /// Dependency context at request time, compared again at apply time.
    pub parents: String,
    pub result: Result<OptionList, EngineError>,
}
