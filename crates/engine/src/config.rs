//! Engine configuration.
//!
//! Defaults suit an interactive session; `FORMFLOW_*` environment variables
//! override them.

use std::{env, time::Duration};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_CACHE_TTL, DEFAULT_SOFT_LIMIT};

/// Tunables shared by every form, report, and wizard opened through one engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Option cache freshness window in seconds.
    pub cache_ttl_secs: u64,
    /// Entry count above which an insert sweeps expired cache entries.
    pub cache_soft_limit: usize,
    /// Caller identity and environment flags copied into every outbound document.
    pub api_context: IndexMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            cache_soft_limit: DEFAULT_SOFT_LIMIT,
            api_context: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Defaults overlaid with `FORMFLOW_CACHE_TTL_SECS`, `FORMFLOW_CACHE_SOFT_LIMIT`,
    /// `FORMFLOW_USER`, and `FORMFLOW_ENVIRONMENT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("FORMFLOW_CACHE_TTL_SECS") {
            config.cache_ttl_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid FORMFLOW_CACHE_TTL_SECS '{raw}'"))?;
        }
        if let Some(raw) = lookup("FORMFLOW_CACHE_SOFT_LIMIT") {
            config.cache_soft_limit = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid FORMFLOW_CACHE_SOFT_LIMIT '{raw}'"))?;
        }
        if let Some(user) = lookup("FORMFLOW_USER") {
            config.api_context.insert("user".into(), user);
        }
        if let Some(environment) = lookup("FORMFLOW_ENVIRONMENT") {
            config.api_context.insert("environment".into(), environment);
        }

        Ok(config)
    }
}
