//! # Formflow Engine
//!
//! The Formflow Engine drives declarative forms, drill-down reports, and
//! multi-stage entry wizards whose fields, dependencies, and queries are
//! described by server configuration.
//!
//! ## Key Features
//!
//! - **Query Templates**: `${Field}` substitution with type-aware formatting
//!   (`YYYYMMDD` dates, `|`-joined multi-selects) and relative date helpers
//! - **Option Cache**: canonical keys, per-entry expiry, coalesced fetches
//! - **Dependency Resolution**: transitive clearing and lazy re-fetch of
//!   dependent select fields, with stale responses discarded
//! - **Navigation**: report drill-down stack with inherited filters and breadcrumbs
//! - **Wizards**: staged entry with row tables, gated progression, and a distinct final submit
//! - **Validation**: mandatory-field checks and remote round-trip checks that can toggle fields
//!
//! ## Usage
//!
//! ```rust
//! use formflow_engine::parse_screen_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let screen_path = temp_dir.path().join("address.yaml");
//! std::fs::write(&screen_path, r#"
//! form:
//!   - { kind: single-select, key: State, options: { queryTemplate: { source: qry_state } } }
//! "#)?;
//!
//! let screen = parse_screen_file(&screen_path)?;
//! assert_eq!(screen.form.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`template`**: pure query document construction
//! - **`cache`**: shared option cache and clocks
//! - **`schema`** / **`graph`**: load-time schema validation and the dependency graph
//! - **`resolver`**: per-scope state and dependency resolution
//! - **`navigation`**: report drill-down
//! - **`wizard`**: staged entry workflows
//! - **`validation`**: static and remote validation
//! - **`session`**: the [`FormEngine`] facade

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod navigation;
pub mod notify;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod template;
pub mod transport;
pub mod validation;
pub mod wizard;

pub use cache::{CacheKey, Clock, ManualClock, OptionCache, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, SchemaError, ValidationErrors};
pub use formflow_types::ScreenConfig;
pub use navigation::{DrillDownNavigator, NavigationFrame, ReportPage};
pub use notify::{Notifier, RecordingNotifier, TracingNotifier};
pub use resolver::{DependencyResolver, FetchOutcome, FetchPlan, FormMode, FormScope, OptionRequest, OptionState};
pub use schema::FormSchema;
pub use session::FormEngine;
pub use template::{QueryContext, ResolvedValues, build_query};
pub use transport::{QueryTransport, ScriptedTransport, TransportError};
pub use validation::{validate_fields, validate_static};
pub use wizard::{Wizard, WizardStatus, WizardStep};

/// Loads a screen configuration file.
///
/// YAML and JSON are both accepted; JSON is parsed by the YAML reader.
pub fn parse_screen_file(file_path: impl AsRef<Path>) -> Result<ScreenConfig> {
    let file_path = file_path.as_ref();
    let file_content =
        fs::read_to_string(file_path).with_context(|| format!("Failed to read screen file: {}", file_path.display()))?;
    serde_yaml::from_str(&file_content).with_context(|| format!("Invalid screen configuration: {}", file_path.display()))
}

/// Runs every load-time check a screen configuration is subject to.
pub fn check_screen(screen: &ScreenConfig) -> Result<(), EngineError> {
    FormSchema::load("form", screen.form.clone())?;
    if let Some(report) = &screen.report {
        DrillDownNavigator::new(report.clone())?;
    }
    if let Some(workflow) = &screen.workflow {
        Wizard::new(workflow.clone(), std::sync::Arc::new(TracingNotifier))?;
    }
    Ok(())
}
