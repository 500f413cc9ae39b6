//! Query endpoint client.
//!
//! This crate provides a lightweight client for the single query endpoint the
//! formflow engine talks to. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults (timeouts, User-Agent)
//! - Validating `FORMFLOW_API_BASE` for safety
//! - Attaching a bearer token from a [`TokenSupplier`] to every request
//! - Decoding the named result sets (`rs0`, `rs1`, ...) from the response
//!
//! The primary entry point is [`QueryClient`]. Build one from
//! [`ClientConfig::from_env`] and send documents with [`QueryClient::execute`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use formflow_api::{ClientConfig, EnvTokenSupplier, QueryClient};
//! use formflow_types::QueryDocument;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let client = QueryClient::new(ClientConfig::from_env()?, Arc::new(EnvTokenSupplier::default()))?;
//!     let sets = client.execute(&QueryDocument::new("qry_state_list")).await?;
//!     println!("{} rows", sets.primary().len());
//!     Ok(())
//! }
//! ```

use std::{env, fmt::Debug, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use formflow_types::{QueryDocument, ResultSets};
use formflow_util::{is_blank, redact_sensitive};
use reqwest::{Client, header};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default endpoint path appended to the base URL.
pub const DEFAULT_ENDPOINT: &str = "/query";
/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Environment variable holding the base URL.
pub const BASE_URL_ENV: &str = "FORMFLOW_API_BASE";
/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "FORMFLOW_API_TOKEN";

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Supplies the authentication token attached to every request.
pub trait TokenSupplier: Send + Sync + Debug {
    fn token(&self) -> Option<String>;
}

/// Reads the token from an environment variable on every request.
#[derive(Debug, Clone)]
pub struct EnvTokenSupplier {
    variable: String,
}

impl EnvTokenSupplier {
    pub fn new(variable: impl Into<String>) -> Self {
        Self { variable: variable.into() }
    }
}

impl Default for EnvTokenSupplier {
    fn default() -> Self {
        Self::new(TOKEN_ENV)
    }
}

impl TokenSupplier for EnvTokenSupplier {
    fn token(&self) -> Option<String> {
        env::var(&self.variable).ok().filter(|token| !is_blank(token))
    }
}

/// Fixed token, mostly for tests and scripted runs.
#[derive(Debug, Clone)]
pub struct StaticTokenSupplier(pub Option<String>);

impl TokenSupplier for StaticTokenSupplier {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Connection settings for [`QueryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads `FORMFLOW_API_BASE` (required) and `FORMFLOW_API_TIMEOUT_SECS` (optional).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup(BASE_URL_ENV).ok_or_else(|| anyhow!("{BASE_URL_ENV} is not set"))?;
        let mut config = Self::new(base_url.trim_end_matches('/'));
        if let Some(raw_timeout) = lookup("FORMFLOW_API_TIMEOUT_SECS") {
            let seconds: u64 = raw_timeout
                .trim()
                .parse()
                .with_context(|| format!("invalid FORMFLOW_API_TIMEOUT_SECS '{raw_timeout}'"))?;
            config.timeout = Duration::from_secs(seconds);
        }
        if let Some(endpoint) = lookup("FORMFLOW_API_ENDPOINT") {
            config.endpoint = endpoint;
        }
        validate_base_url(&config.base_url)?;
        Ok(config)
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint)
    }
}

/// Failures talking to the query endpoint.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    /// True when the response arrived but did not have the expected shape.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Thin wrapper around a configured `reqwest::Client` for the query endpoint.
#[derive(Debug, Clone)]
pub struct QueryClient {
    config: ClientConfig,
    http: Client,
    tokens: Arc<dyn TokenSupplier>,
    user_agent: String,
}

impl QueryClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenSupplier>) -> Result<Self> {
        validate_base_url(&config.base_url)?;
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            config,
            http,
            tokens,
            user_agent: format!("formflow/0.1; {}", env::consts::OS),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Posts a query document and decodes the named result sets.
    pub async fn execute(&self, document: &QueryDocument) -> Result<ResultSets, ClientError> {
        let url = self.config.url();
        let mut builder = self
            .http
            .post(&url)
            .header(header::USER_AGENT, &self.user_agent)
            .json(document);
        if let Some(token) = self.tokens.token() {
            debug!(authorization = %redact_sensitive(&format!("Bearer {token}")), "attaching credentials");
            builder = builder.bearer_auth(token);
        }
        debug!(%url, query_source = %document.query_source, "sending query document");

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Network(error.to_string())
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| ClientError::Network(error.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: truncate_for_summary(&text, 200),
            });
        }
        decode_result_sets(&text)
    }
}

/// Decodes a response body into named result sets.
///
/// The body must be a JSON object whose values are arrays, either at the top
/// level or under a `resultSets` key.
pub fn decode_result_sets(body: &str) -> Result<ResultSets, ClientError> {
    let value: Value = serde_json::from_str(body).map_err(|error| ClientError::Decode(error.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ClientError::Decode("response is not a JSON object".into()));
    };
    if let Some(Value::Object(inner)) = object.remove("resultSets") {
        object = inner;
    }

    let mut sets = ResultSets::new();
    for (name, rows) in object {
        match rows {
            Value::Array(rows) => sets.insert(name, rows),
            other => {
                return Err(ClientError::Decode(format!(
                    "result set '{name}' is not an array (found {})",
                    json_type_name(&other)
                )));
            }
        }
    }
    Ok(sets)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate_for_summary(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(max_len.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|e| anyhow!("Invalid {BASE_URL_ENV} URL '{}': {}", base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("{BASE_URL_ENV} must include a host"))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "{BASE_URL_ENV} must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_may_use_plain_http() {
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        assert!(validate_base_url("http://reports.example.com").is_err());
        assert!(validate_base_url("https://reports.example.com").is_ok());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn config_from_lookup_reads_overrides() {
        let config = ClientConfig::from_lookup(|name| match name {
            BASE_URL_ENV => Some("https://reports.example.com/".into()),
            "FORMFLOW_API_TIMEOUT_SECS" => Some("5".into()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.base_url, "https://reports.example.com");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.url(), "https://reports.example.com/query");
    }

    #[test]
    fn config_requires_base_url() {
        assert!(ClientConfig::from_lookup(|_| None).is_err());
    }

    #[test]
    fn decodes_top_level_and_wrapped_result_sets() {
        let sets = decode_result_sets(r#"{"rs0":[{"value":"MH"}],"rs1":[]}"#).expect("decode");
        assert_eq!(sets.primary().len(), 1);
        let wrapped = decode_result_sets(r#"{"resultSets":{"rs0":[]}}"#).expect("decode wrapped");
        assert!(wrapped.primary().is_empty());
        assert_eq!(wrapped.names().collect::<Vec<_>>(), vec!["rs0"]);
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(decode_result_sets("[]").expect_err("array body").is_malformed());
        assert!(decode_result_sets(r#"{"rs0": 3}"#).expect_err("scalar set").is_malformed());
        assert!(decode_result_sets("not json").expect_err("garbage").is_malformed());
    }

    #[test]
    fn static_token_supplier_returns_token() {
        let supplier = StaticTokenSupplier(Some("abc".into()));
        assert_eq!(supplier.token().as_deref(), Some("abc"));
    }
}
