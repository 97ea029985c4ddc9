//! Error types for the check-compilation and execution pipeline.
//!
//! The taxonomy is deliberately layered: `ParseError` and `SecurityError` describe
//! why a piece of untrusted check text was refused, `CompileError` wraps them with
//! compilation context, `ExecutionError` covers the engine round trip, and
//! `ResultError` guards against malformed execution output. A misconfigured or
//! unsafe check is always surfaced to the caller; it never degrades to a skipped
//! or passing result.
//!
//! # Security
//! Error messages name the specific offending token, column, or pattern so that
//! rejections stay actionable, but they never echo an entire rejected query.

use thiserror::Error;

/// Malformed two-column relational expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A token outside the allowed expression grammar.
    #[error("unexpected token '{token}' in expression")]
    UnexpectedToken { token: String },

    /// Opening and closing parentheses do not balance.
    #[error("unbalanced parentheses in expression")]
    UnbalancedParentheses,

    /// The expression references no declared column at all.
    #[error("expression references no declared column")]
    NoColumnReference,

    /// The expression references a column that is not declared.
    #[error("expression references undeclared column '{column}'")]
    UnknownColumn { column: String },

    /// Complexity score exceeded the configured ceiling.
    #[error("expression complexity {score} exceeds ceiling {ceiling}")]
    TooComplex { score: u32, ceiling: u32 },
}

/// Unsafe text destined for query inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// A data-mutating or DDL keyword.
    #[error("forbidden keyword '{keyword}'")]
    ForbiddenKeyword { keyword: String },

    /// A known injection idiom such as a tautology or UNION SELECT.
    #[error("injection pattern detected: {pattern}")]
    InjectionPattern { pattern: String },

    /// An inline comment marker that could mask query structure.
    #[error("comment marker '{marker}' is not allowed")]
    CommentMarker { marker: String },

    /// A statement separator outside a string literal.
    #[error("statement separator ';' indicates a second statement")]
    StatementSeparator,

    /// String literal quotes do not balance.
    #[error("unbalanced quote characters")]
    UnbalancedQuotes,

    /// Parentheses do not balance.
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    /// Raw query does not begin with SELECT.
    #[error("raw query must begin with SELECT, found '{found}'")]
    NotSelect { found: String },

    /// Raw query begins with a comment, which could mask a different statement.
    #[error("raw query must not begin with a comment")]
    LeadingComment,

    /// Complexity score exceeded the configured ceiling.
    #[error("query complexity {score} exceeds ceiling {ceiling}")]
    TooComplex { score: u32, ceiling: u32 },
}

/// Failure to turn a [`CheckSpec`](crate::spec::CheckSpec) into a query plan.
///
/// Compilation never partially succeeds: any variant here means no query text
/// was produced and nothing reaches the engine.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The check targets a column absent from the introspected schema.
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    /// The check parameters are structurally invalid.
    #[error("invalid check specification: {message}")]
    InvalidSpec { message: String },

    /// A user-supplied regex pattern failed to compile.
    #[error("invalid regex pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// A literal value contains characters that cannot be safely escaped.
    #[error("unsafe literal value: {message}")]
    UnsafeLiteral { message: String },

    /// A column-pair expression was rejected by the expression parser.
    #[error("expression rejected")]
    Parse(#[from] ParseError),

    /// Condition or raw-query text was rejected by the safety validator.
    #[error("unsafe query text rejected")]
    Security(#[from] SecurityError),
}

/// Failure during the engine round trip.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The query did not complete within the wall-clock timeout.
    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The engine reported a failure (malformed query, type mismatch, ...).
    #[error("engine execution failed: {context}")]
    Engine {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The connection previously timed out and must not be reused.
    #[error("connection is poisoned by an earlier timeout and cannot be reused")]
    ConnectionPoisoned,
}

/// Malformed execution outcome.
///
/// Defensive only: unreachable for any plan produced by this crate's compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultError {
    /// An expected aggregate column is missing or has the wrong type.
    #[error("malformed execution outcome: {context}")]
    MalformedOutcome { context: String },
}

/// Umbrella error for the validation pipeline.
#[derive(Debug, Error)]
pub enum RowGuardError {
    /// Check compilation failed; wraps the underlying parse/security reason.
    #[error("check compilation failed")]
    Compile(#[from] CompileError),

    /// Query execution failed.
    #[error("check execution failed")]
    Execution(#[from] ExecutionError),

    /// Execution produced an outcome the result builder cannot interpret.
    #[error("result construction failed")]
    Result(#[from] ResultError),

    /// Configuration or initialization error.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Convenience type alias for Results with RowGuardError.
pub type Result<T> = std::result::Result<T, RowGuardError>;

impl ExecutionError {
    /// Creates an engine error with context and an underlying source.
    pub fn engine<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Engine {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an engine error carrying context only.
    pub fn engine_context(context: impl Into<String>) -> Self {
        Self::Engine {
            context: context.into(),
            source: None,
        }
    }
}

impl CompileError {
    /// Creates an unknown-column error.
    pub fn unknown_column(column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            column: column.into(),
        }
    }

    /// Creates an invalid-spec error.
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }
}

impl ResultError {
    /// Creates a malformed-outcome error with context.
    pub fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedOutcome {
            context: context.into(),
        }
    }
}

impl RowGuardError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
