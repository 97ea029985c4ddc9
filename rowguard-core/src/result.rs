//! Construction of structured validation results from execution outcomes.
//!
//! A [`ValidationResult`] is immutable once built and is shared read-only with
//! external collaborators (renderers, notifiers, history stores). It carries no
//! timestamp: running an unchanged check against unchanged data must serialize
//! byte-identically. [`RunSummary`] aggregates many results for reporting while
//! preserving every child result unmodified.

use crate::compile::{AggregateShape, CompiledPlan};
use crate::error::ResultError;
use crate::exec::ExecutionOutcome;
use crate::spec::{CheckKind, CheckSpec, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use std::collections::BTreeMap;

/// One offending row captured for failure inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    /// 0-based position of the row in the relation. For raw-query checks,
    /// the ordinal within the returned sample.
    pub row_index: u64,
    /// Column (or column list) the failure concerns.
    pub column: String,
    /// The offending value.
    pub value: JsonValue,
    /// What was expected of the value.
    pub expected: String,
    /// Why the row failed.
    pub reason: String,
    /// Kind-specific extra context.
    pub context: JsonMap<String, JsonValue>,
}

/// Structured pass/fail result of one executed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Check label: the caller-assigned name or the kind name.
    pub check: String,
    /// Primary target column, when the kind has one.
    pub column: Option<String>,
    /// Whether the check passed. Never true for an errored check: errors are
    /// surfaced as errors, not as results.
    pub passed: bool,
    /// The measured value (violation count, or pass rate under a threshold).
    pub actual_value: JsonValue,
    /// The expectation the measured value was held against.
    pub expected_value: JsonValue,
    /// Human-readable outcome message.
    pub message: String,
    /// Severity tag, passed through uninterpreted.
    pub severity: Severity,
    /// Kind-specific extras (bounds, frequency maps, uniqueness rates, ...).
    pub details: JsonMap<String, JsonValue>,
    /// Bounded sample of offending rows; `len() <= sample cap` always.
    pub failed_rows: Vec<FailedRow>,
    /// Total violation count, which may exceed the sample size.
    pub total_failures: u64,
}

impl ValidationResult {
    /// Status string in the duck-typed reporting convention.
    pub fn status(&self) -> &'static str {
        if self.passed {
            return "PASSED";
        }
        match self.severity {
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Error => "FAILED",
        }
    }

    /// Whether this is a hard failure (failed at error severity).
    pub fn is_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Error
    }
}

/// Builds the validation result for one executed plan.
///
/// # Errors
/// Returns a [`ResultError`] only for outcome shapes that should be
/// unreachable for a successfully compiled plan (defensive).
pub fn build_result(
    spec: &CheckSpec,
    plan: &CompiledPlan,
    outcome: &ExecutionOutcome,
) -> std::result::Result<ValidationResult, ResultError> {
    match plan.shape {
        AggregateShape::GroupFrequencies => build_distribution_result(spec, outcome),
        AggregateShape::CompositeUnique => build_composite_result(spec, plan, outcome),
        AggregateShape::Violations | AggregateShape::ViolationsWithEligible => {
            build_count_result(spec, plan, outcome)
        }
    }
}

/// Threshold evaluation shared by all count-style checks.
///
/// Zero eligible rows pass vacuously, an explicit design decision rather than an
/// inferred one.
fn evaluate_passed(
    violations: u64,
    eligible: Option<u64>,
    threshold: Option<f64>,
) -> std::result::Result<(bool, Option<f64>), ResultError> {
    match threshold {
        None => Ok((violations == 0, None)),
        Some(t) => {
            let eligible = eligible.ok_or_else(|| {
                ResultError::malformed("threshold set but no eligible count was produced")
            })?;
            if eligible == 0 {
                return Ok((true, Some(1.0)));
            }
            let rate = eligible.saturating_sub(violations) as f64 / eligible as f64;
            Ok((rate >= t, Some(rate)))
        }
    }
}

fn build_count_result(
    spec: &CheckSpec,
    plan: &CompiledPlan,
    outcome: &ExecutionOutcome,
) -> std::result::Result<ValidationResult, ResultError> {
    let violations = outcome.violations;
    let (passed, pass_rate) = evaluate_passed(violations, outcome.eligible, spec.threshold)?;

    let mut details = JsonMap::new();
    details.insert("violations".to_string(), json!(violations));
    if let Some(eligible) = outcome.eligible {
        details.insert("eligible".to_string(), json!(eligible));
    }
    if let Some(condition) = &spec.condition {
        details.insert("condition".to_string(), json!(condition));
    }
    if let Some(t) = spec.threshold {
        details.insert("threshold".to_string(), json!(t));
    }
    if let Some(rate) = pass_rate {
        details.insert("pass_rate".to_string(), json!(rate));
    }
    kind_details(&spec.kind, &mut details);

    let (actual_value, expected_value) = match (spec.threshold, pass_rate) {
        (Some(t), Some(rate)) => (json!(rate), json!(format!(">= {t}"))),
        _ => (json!(violations), json!(0)),
    };

    let failed_rows = map_failed_rows(spec, plan, outcome)?;

    Ok(ValidationResult {
        check: spec.label().to_string(),
        column: spec.kind.column().map(str::to_string),
        passed,
        actual_value,
        expected_value,
        message: count_message(spec, violations, outcome.eligible),
        severity: spec.severity,
        details,
        failed_rows,
        total_failures: violations,
    })
}

fn build_composite_result(
    spec: &CheckSpec,
    plan: &CompiledPlan,
    outcome: &ExecutionOutcome,
) -> std::result::Result<ValidationResult, ResultError> {
    let row = outcome
        .aggregate_rows
        .first()
        .ok_or_else(|| ResultError::malformed("composite aggregate returned no rows"))?;
    let violations = count_field(row, "violations")?;
    let duplicate_combinations = count_field(row, "duplicate_combinations")?;
    let distinct_combinations = count_field(row, "distinct_combinations")?;
    let total_rows = count_field(row, "total_rows")?;

    let (passed, pass_rate) = evaluate_passed(violations, Some(total_rows), spec.threshold)?;

    let uniqueness_rate = if total_rows == 0 {
        1.0
    } else {
        distinct_combinations as f64 / total_rows as f64
    };

    let columns = match &spec.kind {
        CheckKind::CompositeUnique { columns } => columns.join(", "),
        _ => String::new(),
    };

    let mut details = JsonMap::new();
    details.insert("violations".to_string(), json!(violations));
    details.insert(
        "duplicate_combinations".to_string(),
        json!(duplicate_combinations),
    );
    details.insert(
        "distinct_combinations".to_string(),
        json!(distinct_combinations),
    );
    details.insert("total_rows".to_string(), json!(total_rows));
    details.insert("uniqueness_rate".to_string(), json!(uniqueness_rate));
    if let Some(condition) = &spec.condition {
        details.insert("condition".to_string(), json!(condition));
    }
    if let Some(t) = spec.threshold {
        details.insert("threshold".to_string(), json!(t));
    }
    if let Some(rate) = pass_rate {
        details.insert("pass_rate".to_string(), json!(rate));
    }

    let message = if passed && duplicate_combinations == 0 {
        format!("Columns ({columns}) have no duplicated combinations")
    } else {
        format!(
            "Columns ({columns}) have {duplicate_combinations} duplicated combinations across {total_rows} rows"
        )
    };

    let failed_rows = map_failed_rows(spec, plan, outcome)?;

    Ok(ValidationResult {
        check: spec.label().to_string(),
        column: None,
        passed,
        actual_value: json!(violations),
        expected_value: json!(0),
        message,
        severity: spec.severity,
        details,
        failed_rows,
        total_failures: violations,
    })
}

fn build_distribution_result(
    spec: &CheckSpec,
    outcome: &ExecutionOutcome,
) -> std::result::Result<ValidationResult, ResultError> {
    let (column, expected, tolerance) = match &spec.kind {
        CheckKind::Distribution {
            column,
            expected,
            tolerance,
        } => (column, expected, *tolerance),
        _ => return Err(ResultError::malformed("group frequencies for a non-distribution check")),
    };

    let mut observed_counts: BTreeMap<String, u64> = BTreeMap::new();
    for row in &outcome.aggregate_rows {
        let category = row
            .get("category")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ResultError::malformed("frequency row without a category"))?;
        let n = count_field(row, "n")?;
        observed_counts.insert(category.to_string(), n);
    }
    let total: u64 = observed_counts.values().sum();

    let mut observed_frequencies: BTreeMap<String, f64> = BTreeMap::new();
    for (category, n) in &observed_counts {
        let freq = if total == 0 {
            0.0
        } else {
            *n as f64 / total as f64
        };
        observed_frequencies.insert(category.clone(), freq);
    }

    // Vacuously pass on an empty relation, consistent with zero eligible rows
    let mut violating: Vec<String> = Vec::new();
    if total > 0 {
        let categories: std::collections::BTreeSet<&String> = expected
            .keys()
            .chain(observed_counts.keys())
            .collect();
        for category in categories {
            let observed = observed_frequencies.get(category.as_str()).copied().unwrap_or(0.0);
            let expect = expected.get(category.as_str()).copied().unwrap_or(0.0);
            if (observed - expect).abs() > tolerance {
                violating.push(category.clone());
            }
        }
    }

    let violations = violating.len() as u64;
    let passed = violations == 0;

    let chi_square = chi_square_statistic(&observed_counts, expected, total);
    let degrees_of_freedom = expected.len().saturating_sub(1) as f64;
    let p_value = chi_square_p_value(chi_square, degrees_of_freedom);

    let mut details = JsonMap::new();
    details.insert("violations".to_string(), json!(violations));
    details.insert("total_rows".to_string(), json!(total));
    details.insert("tolerance".to_string(), json!(tolerance));
    details.insert(
        "observed_frequencies".to_string(),
        json!(observed_frequencies),
    );
    details.insert("expected_frequencies".to_string(), json!(expected));
    details.insert("violating_categories".to_string(), json!(violating));
    details.insert("chi_square".to_string(), json!(chi_square));
    details.insert("p_value".to_string(), json!(p_value));
    if let Some(condition) = &spec.condition {
        details.insert("condition".to_string(), json!(condition));
    }

    let message = if passed {
        format!("Column '{column}' frequencies are within tolerance {tolerance} of expected")
    } else {
        format!(
            "Column '{column}' has {violations} categories outside tolerance {tolerance}: {}",
            violating.join(", ")
        )
    };

    Ok(ValidationResult {
        check: spec.label().to_string(),
        column: Some(column.clone()),
        passed,
        actual_value: json!(violations),
        expected_value: json!(0),
        message,
        severity: spec.severity,
        details,
        failed_rows: Vec::new(),
        total_failures: violations,
    })
}

/// Adds static kind parameters to the details map.
fn kind_details(kind: &CheckKind, details: &mut JsonMap<String, JsonValue>) {
    match kind {
        CheckKind::Range { min, max, .. } => {
            details.insert("min".to_string(), min.clone());
            details.insert("max".to_string(), max.clone());
        }
        CheckKind::Pattern { pattern, .. } => {
            details.insert("pattern".to_string(), json!(pattern));
        }
        CheckKind::AllowedValues { values, .. } => {
            details.insert("allowed_values".to_string(), json!(values));
        }
        CheckKind::ColumnPair { expression } => {
            details.insert("expression".to_string(), json!(expression));
        }
        CheckKind::MulticolumnSum {
            columns,
            total_column,
            tolerance,
        } => {
            details.insert("columns".to_string(), json!(columns));
            details.insert("total_column".to_string(), json!(total_column));
            details.insert("tolerance".to_string(), json!(tolerance));
        }
        _ => {}
    }
}

fn count_message(spec: &CheckSpec, violations: u64, eligible: Option<u64>) -> String {
    let suffix = match (eligible, &spec.condition) {
        (Some(e), Some(_)) => format!(" among {e} eligible rows"),
        _ => String::new(),
    };
    match &spec.kind {
        CheckKind::NotNull { column } => {
            if violations == 0 {
                format!("Column '{column}' has no null values{suffix}")
            } else {
                format!("Column '{column}' has {violations} null values{suffix}")
            }
        }
        CheckKind::Unique { column } => {
            if violations == 0 {
                format!("Column '{column}' has no duplicate values{suffix}")
            } else {
                format!("Column '{column}' has {violations} rows with duplicated values{suffix}")
            }
        }
        CheckKind::Range { column, min, max } => format!(
            "Column '{column}' has {violations} values outside [{min}, {max}]{suffix}"
        ),
        CheckKind::Pattern { column, pattern } => format!(
            "Column '{column}' has {violations} values not matching pattern '{pattern}'{suffix}"
        ),
        CheckKind::AllowedValues { column, .. } => format!(
            "Column '{column}' has {violations} values not in allowed set{suffix}"
        ),
        CheckKind::ColumnPair { expression } => format!(
            "Expression '{expression}' fails for {violations} rows{suffix}"
        ),
        CheckKind::MulticolumnSum {
            total_column,
            tolerance,
            ..
        } => format!(
            "Column '{total_column}' differs from its component sum beyond {tolerance} in {violations} rows{suffix}"
        ),
        CheckKind::RawQuery { .. } => {
            format!("Raw query returned {violations} violating rows")
        }
        // Composite and distribution kinds build their own messages
        _ => format!("{} found {violations} violations", spec.kind.name()),
    }
}

/// Maps sample rows into [`FailedRow`] entries.
fn map_failed_rows(
    spec: &CheckSpec,
    plan: &CompiledPlan,
    outcome: &ExecutionOutcome,
) -> std::result::Result<Vec<FailedRow>, ResultError> {
    let mut failed = Vec::with_capacity(outcome.sample_rows.len());

    for (ordinal, row) in outcome.sample_rows.iter().enumerate() {
        let fields = row
            .as_object()
            .ok_or_else(|| ResultError::malformed("sample row is not an object"))?;

        if matches!(spec.kind, CheckKind::RawQuery { .. }) {
            failed.push(FailedRow {
                row_index: ordinal as u64,
                column: "raw_query".to_string(),
                value: row.clone(),
                expected: "no rows returned".to_string(),
                reason: "Row returned by raw query".to_string(),
                context: JsonMap::new(),
            });
            continue;
        }

        let row_index = fields
            .get("row_idx")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| ResultError::malformed("sample row without row_idx"))?
            .max(0) as u64;

        failed.push(failed_row_for_kind(spec, plan, row_index, fields));
    }

    Ok(failed)
}

fn failed_row_for_kind(
    spec: &CheckSpec,
    plan: &CompiledPlan,
    row_index: u64,
    fields: &JsonMap<String, JsonValue>,
) -> FailedRow {
    let value_of = |column: &str| fields.get(column).cloned().unwrap_or(JsonValue::Null);
    let multi_value = || -> JsonValue {
        let mut map = JsonMap::new();
        for column in &plan.sample_columns {
            map.insert(column.clone(), value_of(column));
        }
        JsonValue::Object(map)
    };

    match &spec.kind {
        CheckKind::NotNull { column } => FailedRow {
            row_index,
            column: column.clone(),
            value: JsonValue::Null,
            expected: "not null".to_string(),
            reason: "Null value not allowed".to_string(),
            context: JsonMap::new(),
        },
        CheckKind::Unique { column } => {
            let value = value_of(column);
            FailedRow {
                row_index,
                column: column.clone(),
                value: value.clone(),
                expected: "unique value".to_string(),
                reason: format!("Value {value} occurs more than once"),
                context: JsonMap::new(),
            }
        }
        CheckKind::Range { column, min, max } => {
            let value = value_of(column);
            FailedRow {
                row_index,
                column: column.clone(),
                value: value.clone(),
                expected: format!("between {min} and {max}"),
                reason: format!("Value {value} is outside range [{min}, {max}]"),
                context: JsonMap::new(),
            }
        }
        CheckKind::Pattern { column, pattern } => {
            let value = value_of(column);
            FailedRow {
                row_index,
                column: column.clone(),
                value: value.clone(),
                expected: format!("matches pattern '{pattern}'"),
                reason: format!("Value {value} does not match pattern"),
                context: JsonMap::new(),
            }
        }
        CheckKind::AllowedValues { column, values } => {
            let value = value_of(column);
            let mut context = JsonMap::new();
            context.insert("allowed_values".to_string(), json!(values));
            FailedRow {
                row_index,
                column: column.clone(),
                value: value.clone(),
                expected: "in allowed set".to_string(),
                reason: format!("Value {value} is not in allowed set"),
                context,
            }
        }
        CheckKind::ColumnPair { expression } => FailedRow {
            row_index,
            column: plan.sample_columns.join(", "),
            value: multi_value(),
            expected: format!("satisfies '{expression}'"),
            reason: "Row violates expression".to_string(),
            context: JsonMap::new(),
        },
        CheckKind::CompositeUnique { columns } => FailedRow {
            row_index,
            column: columns.join(", "),
            value: multi_value(),
            expected: "unique combination".to_string(),
            reason: "Key combination occurs more than once".to_string(),
            context: JsonMap::new(),
        },
        CheckKind::MulticolumnSum {
            total_column,
            tolerance,
            ..
        } => FailedRow {
            row_index,
            column: total_column.clone(),
            value: multi_value(),
            expected: format!("component sum within {tolerance} of '{total_column}'"),
            reason: "Component sum differs from total beyond tolerance".to_string(),
            context: JsonMap::new(),
        },
        // RawQuery handled earlier; distribution has no row-level sample
        _ => FailedRow {
            row_index,
            column: spec.kind.column().unwrap_or_default().to_string(),
            value: multi_value(),
            expected: String::new(),
            reason: "Row violates check".to_string(),
            context: JsonMap::new(),
        },
    }
}

fn count_field(row: &JsonValue, key: &str) -> std::result::Result<u64, ResultError> {
    let value = row
        .get(key)
        .ok_or_else(|| ResultError::malformed(format!("aggregate column '{key}' missing")))?;
    match value {
        JsonValue::Null => Ok(0),
        JsonValue::Number(n) => n
            .as_i64()
            .map(|v| v.max(0) as u64)
            .or_else(|| n.as_u64())
            .ok_or_else(|| ResultError::malformed(format!("aggregate column '{key}' not integral"))),
        _ => Err(ResultError::malformed(format!(
            "aggregate column '{key}' has a non-numeric type"
        ))),
    }
}

/// Pearson chi-square statistic of observed counts against expected fractions.
fn chi_square_statistic(
    observed: &BTreeMap<String, u64>,
    expected: &BTreeMap<String, f64>,
    total: u64,
) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mut statistic = 0.0;
    for (category, fraction) in expected {
        let expected_n = fraction * total as f64;
        if expected_n <= 0.0 {
            continue;
        }
        let observed_n = observed.get(category).copied().unwrap_or(0) as f64;
        let diff = observed_n - expected_n;
        statistic += diff * diff / expected_n;
    }
    statistic
}

/// Approximate chi-square survival function via the Wilson-Hilferty cube-root
/// normal transformation.
fn chi_square_p_value(statistic: f64, degrees_of_freedom: f64) -> f64 {
    if degrees_of_freedom <= 0.0 {
        return 1.0;
    }
    if statistic <= 0.0 {
        return 1.0;
    }
    let k = degrees_of_freedom;
    let z = ((statistic / k).powf(1.0 / 3.0) - (1.0 - 2.0 / (9.0 * k)))
        / (2.0 / (9.0 * k)).sqrt();
    normal_survival(z).clamp(0.0, 1.0)
}

/// Standard normal survival function via the Abramowitz-Stegun erfc
/// approximation (maximum error 1.5e-7).
fn normal_survival(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    poly * (-x * x).exp()
}

/// Aggregation of many validation results.
///
/// Child results are preserved unmodified; summarizing never flattens or
/// rewrites per-check detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// The child results, in execution order, unmodified.
    pub results: Vec<ValidationResult>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, once `finish` is called.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Starts an empty summary.
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Records one child result.
    pub fn record(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    /// Marks the run as finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Whether every error-severity check passed.
    pub fn passed(&self) -> bool {
        !self.results.iter().any(ValidationResult::is_failure)
    }

    /// Total number of recorded checks.
    pub fn total_checks(&self) -> usize {
        self.results.len()
    }

    /// Number of passing checks.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Number of hard failures.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    /// Number of failed warning-severity checks.
    pub fn warning_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.passed && r.severity == Severity::Warning)
            .count()
    }

    /// Pass rate in [0, 1]; an empty summary counts as fully passed.
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.results.len() as f64
    }

    /// All hard failures, in execution order.
    pub fn failures(&self) -> Vec<&ValidationResult> {
        self.results.iter().filter(|r| r.is_failure()).collect()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
