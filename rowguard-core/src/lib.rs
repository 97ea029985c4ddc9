//! Query-safety and check-compilation core for declarative data-quality
//! validation.
//!
//! This crate turns a declarative check description, possibly containing
//! free-text fragments such as regex patterns, SQL filter conditions, or entire
//! raw queries, into engine-native query text that is provably free of
//! injection and bounded in cost, executes it against an injected relation
//! handle, and produces a structured, sample-bounded failure report.
//!
//! # Security Guarantees
//! - Untrusted text never reaches the engine unvalidated: conditions pass the
//!   condition policy, raw queries pass the strict query policy, and
//!   cross-column expressions pass an allow-list parser
//! - Embedded literals are always escaped; identifiers are always quoted
//! - Every generated query is a read-only SELECT with a complexity ceiling,
//!   a wall-clock timeout, and a hard sample row cap
//! - A misconfigured or unsafe check fails compilation; it never degrades to
//!   a skipped or passing result
//!
//! # Architecture
//! The pipeline is compile → execute → build, all pure functions except the
//! engine round trip:
//! - [`spec`]: check descriptors built through an explicit builder
//! - [`expr`] / [`safety`]: validation of untrusted text fragments
//! - [`compile`]: per-kind SQL templates producing a [`compile::CompiledPlan`]
//! - [`exec`]: timeout- and cap-bounded execution over an injected
//!   [`relation::QueryableRelation`]
//! - [`result`]: structured results with bounded failure samples

pub mod compile;
pub mod config;
pub mod error;
pub mod exec;
pub mod expr;
pub mod logging;
pub mod relation;
pub mod result;
pub mod runner;
pub mod safety;
pub mod spec;

// Re-export commonly used types
pub use compile::{AggregateShape, CompiledPlan, compile};
pub use config::GuardConfig;
pub use error::{
    CompileError, ExecutionError, ParseError, Result, ResultError, RowGuardError, SecurityError,
};
pub use exec::{ExecutionEngine, ExecutionOutcome};
pub use expr::{ParsedExpression, parse_expression};
pub use relation::{ColumnInfo, QueryableRelation, TableSchema};
pub use result::{FailedRow, RunSummary, ValidationResult, build_result};
pub use runner::CheckRunner;
pub use safety::{QueryPolicy, SecurityVerdict, validate};
pub use spec::{CheckKind, CheckSpec, Severity};

#[cfg(feature = "sqlite")]
pub use relation::sqlite::SqliteRelation;
