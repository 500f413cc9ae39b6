//! Shared type definitions for the formflow engine.
//!
//! Everything in this crate is passive data that arrives from (or is sent to)
//! the server: field schemas, value bags, report and workflow definitions, and
//! the five-section query document understood by the query endpoint. The
//! engine crate interprets these types; nothing here performs I/O.

pub mod field;
pub mod query;
pub mod screen;
pub mod value;

pub use field::{DependencyFields, DependsOn, FieldKind, FieldOption, FieldSchema, OptionKeySpec, OptionSource, QueryTemplate, RemoteValidationHook};
pub use query::{
    ActionResult, FieldUpdate, FilterCondition, PRIMARY_RESULT_SET, QueryDocument, ResultSets, SECONDARY_RESULT_SET, TagParseError, parse_tag_set,
    render_tag_set,
};
pub use screen::{ReportDefinition, ReportLevel, ScreenConfig, StageDefinition, StageLayout, WorkflowDefinition};
pub use value::{FieldValue, ValueBag};
