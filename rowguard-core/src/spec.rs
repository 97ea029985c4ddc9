//! Check descriptors.
//!
//! A [`CheckSpec`] is the declarative description of one validation rule: a closed
//! set of check kinds with typed parameters, plus an optional condition string, an
//! optional pass threshold, and a severity tag. Specs are built through explicit
//! constructors and are immutable once handed to the compiler.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Severity of a failing check.
///
/// Severity passes through the pipeline uninterpreted; translating it into exit
/// codes or alert routing is a caller concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the check
    #[default]
    Error,
    /// Reports but doesn't fail
    Warning,
    /// Informational only
    Info,
}

/// The closed set of supported check kinds with their typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// All values in the column must be non-null.
    NotNull { column: String },
    /// All non-null values in the column must be distinct.
    Unique { column: String },
    /// All non-null values must fall inside `[min, max]` (bound parameters).
    Range {
        column: String,
        min: JsonValue,
        max: JsonValue,
    },
    /// All non-null values must match the regex pattern (engine dialect).
    Pattern { column: String, pattern: String },
    /// All non-null values must be members of the allowed set.
    AllowedValues {
        column: String,
        values: Vec<JsonValue>,
    },
    /// A two-column relational expression must hold for every row.
    ColumnPair { expression: String },
    /// The combination of the listed columns must be unique across rows.
    CompositeUnique { columns: Vec<String> },
    /// The listed columns must sum to the total column within a tolerance.
    MulticolumnSum {
        columns: Vec<String>,
        total_column: String,
        tolerance: f64,
    },
    /// A caller-supplied SELECT whose returned rows are the violations.
    RawQuery { sql: String },
    /// Observed categorical frequencies must stay within a tolerance of the
    /// expected frequency map.
    Distribution {
        column: String,
        expected: BTreeMap<String, f64>,
        tolerance: f64,
    },
}

impl CheckKind {
    /// Stable snake_case name of this check kind, used in messages and results.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::NotNull { .. } => "not_null",
            CheckKind::Unique { .. } => "unique",
            CheckKind::Range { .. } => "range",
            CheckKind::Pattern { .. } => "pattern",
            CheckKind::AllowedValues { .. } => "allowed_values",
            CheckKind::ColumnPair { .. } => "column_pair",
            CheckKind::CompositeUnique { .. } => "composite_unique",
            CheckKind::MulticolumnSum { .. } => "multicolumn_sum",
            CheckKind::RawQuery { .. } => "raw_query",
            CheckKind::Distribution { .. } => "distribution",
        }
    }

    /// The primary target column, if the kind has a single one.
    pub fn column(&self) -> Option<&str> {
        match self {
            CheckKind::NotNull { column }
            | CheckKind::Unique { column }
            | CheckKind::Range { column, .. }
            | CheckKind::Pattern { column, .. }
            | CheckKind::AllowedValues { column, .. }
            | CheckKind::Distribution { column, .. } => Some(column),
            CheckKind::MulticolumnSum { total_column, .. } => Some(total_column),
            CheckKind::ColumnPair { .. }
            | CheckKind::CompositeUnique { .. }
            | CheckKind::RawQuery { .. } => None,
        }
    }
}

/// Declarative description of one validation rule.
///
/// Immutable once compiled; the compiler takes it by reference and the produced
/// plan is a pure function of `(CheckSpec, schema)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// What to validate.
    pub kind: CheckKind,
    /// Optional SQL filter restricting which rows are eligible. Validated by the
    /// condition policy before it is allowed anywhere near a query.
    pub condition: Option<String>,
    /// Optional pass threshold in [0, 1]: the check passes when
    /// `(eligible - violations) / eligible >= threshold`.
    pub threshold: Option<f64>,
    /// Severity tag, passed through uninterpreted.
    pub severity: Severity,
    /// Optional caller-assigned name surfaced in results.
    pub name: Option<String>,
}

impl CheckSpec {
    fn from_kind(kind: CheckKind) -> Self {
        Self {
            kind,
            condition: None,
            threshold: None,
            severity: Severity::default(),
            name: None,
        }
    }

    /// Check that `column` contains no nulls.
    pub fn not_null(column: impl Into<String>) -> Self {
        Self::from_kind(CheckKind::NotNull {
            column: column.into(),
        })
    }

    /// Check that `column` contains no duplicate non-null values.
    pub fn unique(column: impl Into<String>) -> Self {
        Self::from_kind(CheckKind::Unique {
            column: column.into(),
        })
    }

    /// Check that non-null values of `column` fall inside `[min, max]`.
    pub fn range(column: impl Into<String>, min: impl Into<JsonValue>, max: impl Into<JsonValue>) -> Self {
        Self::from_kind(CheckKind::Range {
            column: column.into(),
            min: min.into(),
            max: max.into(),
        })
    }

    /// Check that non-null values of `column` match `pattern`.
    pub fn pattern(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::from_kind(CheckKind::Pattern {
            column: column.into(),
            pattern: pattern.into(),
        })
    }

    /// Check that non-null values of `column` belong to `values`.
    pub fn allowed_values(column: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self::from_kind(CheckKind::AllowedValues {
            column: column.into(),
            values,
        })
    }

    /// Check a two-column relational expression such as
    /// `"end_date >= start_date"`.
    pub fn column_pair(expression: impl Into<String>) -> Self {
        Self::from_kind(CheckKind::ColumnPair {
            expression: expression.into(),
        })
    }

    /// Check that the combination of `columns` is unique across rows.
    pub fn composite_unique(columns: Vec<String>) -> Self {
        Self::from_kind(CheckKind::CompositeUnique { columns })
    }

    /// Check that `columns` sum to `total_column` within `tolerance`.
    pub fn multicolumn_sum(
        columns: Vec<String>,
        total_column: impl Into<String>,
        tolerance: f64,
    ) -> Self {
        Self::from_kind(CheckKind::MulticolumnSum {
            columns,
            total_column: total_column.into(),
            tolerance,
        })
    }

    /// Check a caller-supplied SELECT; every returned row is a violation.
    ///
    /// The text must pass the strict query policy before any query is produced.
    pub fn raw_query(sql: impl Into<String>) -> Self {
        Self::from_kind(CheckKind::RawQuery { sql: sql.into() })
    }

    /// Check observed categorical frequencies of `column` against `expected`
    /// (category -> expected fraction), allowing `tolerance` absolute deviation.
    pub fn distribution(
        column: impl Into<String>,
        expected: BTreeMap<String, f64>,
        tolerance: f64,
    ) -> Self {
        Self::from_kind(CheckKind::Distribution {
            column: column.into(),
            expected,
            tolerance,
        })
    }

    /// Builder method to restrict the check to rows matching `condition`.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Builder method to set the pass threshold.
    ///
    /// Values outside [0, 1] are clamped.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        if !(0.0..=1.0).contains(&threshold) {
            tracing::warn!("threshold {} clamped to valid range [0.0, 1.0]", threshold);
        }
        self.threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    /// Builder method to set the severity tag.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Builder method to assign a caller-visible name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The label surfaced in results: the caller-assigned name or the kind name.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.kind.name())
    }
}

/// Built-in named regex patterns for common formats.
///
/// Names are accepted anywhere a pattern parameter is, and resolve before the
/// pattern is compiled; unknown names are treated as literal patterns.
pub const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("email", r"^[\w\.\-\+]+@[\w\.\-]+\.[a-zA-Z]{2,}$"),
    ("phone", r"^\+?[\d\s\-\(\)]{10,}$"),
    (
        "uuid",
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    ),
    ("url", r"^https?://[\w\.\-]+(/[\w\.\-\?=&%]*)?$"),
    ("ip_address", r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$"),
    ("date_iso", r"^\d{4}-\d{2}-\d{2}$"),
    ("datetime_iso", r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}"),
    ("zip_us", r"^\d{5}(-\d{4})?$"),
    ("slug", r"^[a-z0-9]+(?:-[a-z0-9]+)*$"),
    ("alpha", r"^[a-zA-Z]+$"),
    ("alphanumeric", r"^[a-zA-Z0-9]+$"),
    ("numeric", r"^-?\d+\.?\d*$"),
];

/// Resolves a built-in pattern name to its regex, if one exists.
pub fn builtin_pattern(name: &str) -> Option<&'static str> {
    BUILTIN_PATTERNS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| *p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_produces_tagged_variant() {
        let spec = CheckSpec::not_null("status");
        assert_eq!(spec.kind.name(), "not_null");
        assert_eq!(spec.kind.column(), Some("status"));
        assert!(spec.condition.is_none());
        assert!(spec.threshold.is_none());
        assert_eq!(spec.severity, Severity::Error);
    }

    #[test]
    fn test_builder_chaining() {
        let spec = CheckSpec::range("amount", 0, 10_000)
            .with_condition("country = 'US'")
            .with_threshold(0.95)
            .with_severity(Severity::Warning)
            .with_name("amount_in_range");

        assert_eq!(spec.condition.as_deref(), Some("country = 'US'"));
        assert_eq!(spec.threshold, Some(0.95));
        assert_eq!(spec.severity, Severity::Warning);
        assert_eq!(spec.label(), "amount_in_range");
    }

    #[test]
    fn test_threshold_clamping() {
        let spec = CheckSpec::not_null("id").with_threshold(1.5);
        assert_eq!(spec.threshold, Some(1.0));

        let spec = CheckSpec::not_null("id").with_threshold(-0.1);
        assert_eq!(spec.threshold, Some(0.0));
    }

    #[test]
    fn test_label_defaults_to_kind_name() {
        let spec = CheckSpec::composite_unique(vec!["a".into(), "b".into()]);
        assert_eq!(spec.label(), "composite_unique");
    }

    #[test]
    fn test_multicolumn_sum_primary_column() {
        let spec = CheckSpec::multicolumn_sum(
            vec!["net".into(), "tax".into()],
            "total",
            0.01,
        );
        assert_eq!(spec.kind.column(), Some("total"));
    }

    #[test]
    fn test_builtin_pattern_lookup() {
        assert!(builtin_pattern("email").is_some());
        assert!(builtin_pattern("uuid").is_some());
        assert!(builtin_pattern("no_such_pattern").is_none());
    }

    #[test]
    fn test_spec_serde_roundtrip() {
        let spec = CheckSpec::allowed_values("status", vec![json!("a"), json!("b")])
            .with_threshold(0.9);
        let json = serde_json::to_string(&spec).unwrap();
        let deserialized: CheckSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, deserialized);
    }

    #[test]
    fn test_severity_serde_lowercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
