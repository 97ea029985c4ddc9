//! Check compilation: from a [`CheckSpec`] to a safe, engine-ready query pair.
//!
//! Compilation selects a SQL template for the check kind, routes every piece of
//! untrusted text through the expression parser or the safety validator, escapes
//! any value embedded as a literal, and pairs the aggregate query with a capped
//! sample query sharing the same predicate. It either produces a complete valid
//! plan or fails with the underlying parse/security reason, never partially.
//!
//! Plan generation is a pure function of `(CheckSpec, TableSchema, table_ref,
//! GuardConfig)`: no clocks, no randomness, no engine access.

use crate::config::GuardConfig;
use crate::error::CompileError;
use crate::expr::parse_expression;
use crate::relation::TableSchema;
use crate::safety::{self, QueryPolicy};
use crate::spec::{CheckKind, CheckSpec, builtin_pattern};
use serde_json::Value as JsonValue;
use std::time::Duration;

pub mod escape;

use escape::{escape_literal, quote_ident};

/// Shape of the aggregate result, guiding decode and result construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateShape {
    /// Single row: `violations`.
    Violations,
    /// Single row: `violations`, `eligible`.
    ViolationsWithEligible,
    /// Single row: `violations`, `duplicate_combinations`,
    /// `distinct_combinations`, `total_rows`.
    CompositeUnique,
    /// One row per category: `category`, `n`. No row-level sample.
    GroupFrequencies,
}

/// Safe, engine-ready query pair derived from one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    /// Aggregate query text. Always runs first.
    pub aggregate_sql: String,
    /// Positional bind parameters for the aggregate query.
    pub aggregate_params: Vec<JsonValue>,
    /// Paired sample query fetching offending rows, if the kind has one.
    pub sample_sql: Option<String>,
    /// Positional bind parameters for the sample query.
    pub sample_params: Vec<JsonValue>,
    /// Forced, caller-independent sample row limit.
    pub sample_limit: u32,
    /// Columns projected by the sample query (declared casing).
    pub sample_columns: Vec<String>,
    /// Aggregate result shape.
    pub shape: AggregateShape,
    /// Declared wall-clock timeout.
    pub timeout: Duration,
    /// Hard cap on rows accepted from any query.
    pub row_cap: u32,
}

/// Compiles one check against an introspected schema.
///
/// # Arguments
/// * `spec` - The check to compile
/// * `schema` - Introspected columns of the target relation
/// * `table_ref` - Trusted SQL reference for the relation's FROM clause
/// * `config` - Complexity ceiling, sample size, timeout, row cap
///
/// # Errors
/// Unknown columns, invalid parameters, and any rejection from the expression
/// parser or safety validator surface as a [`CompileError`]; no query text is
/// produced on failure.
pub fn compile(
    spec: &CheckSpec,
    schema: &TableSchema,
    table_ref: &str,
    config: &GuardConfig,
) -> std::result::Result<CompiledPlan, CompileError> {
    let condition = validate_condition(spec, config)?;

    match &spec.kind {
        CheckKind::NotNull { column } => {
            let col = resolve_column(schema, column)?;
            let pred = format!("{col} IS NULL");
            predicate_plan(spec, table_ref, config, &condition, &pred, Vec::new(), vec![
                column.clone(),
            ])
        }
        CheckKind::Range { column, min, max } => {
            let col = resolve_column(schema, column)?;
            require_scalar(min, "range min")?;
            require_scalar(max, "range max")?;
            let pred = format!("{col} IS NOT NULL AND ({col} < ? OR {col} > ?)");
            predicate_plan(
                spec,
                table_ref,
                config,
                &condition,
                &pred,
                vec![min.clone(), max.clone()],
                vec![column.clone()],
            )
        }
        CheckKind::Pattern { column, pattern } => {
            let col = resolve_column(schema, column)?;
            let pattern_text = builtin_pattern(pattern).unwrap_or(pattern.as_str());
            // Surface bad regex syntax here instead of as a runtime engine error
            regex::Regex::new(pattern_text).map_err(|e| CompileError::InvalidPattern {
                pattern: pattern_text.to_string(),
                source: Box::new(e),
            })?;
            let pred =
                format!("{col} IS NOT NULL AND NOT regexp_matches(CAST({col} AS TEXT), ?)");
            predicate_plan(
                spec,
                table_ref,
                config,
                &condition,
                &pred,
                vec![JsonValue::String(pattern_text.to_string())],
                vec![column.clone()],
            )
        }
        CheckKind::AllowedValues { column, values } => {
            let col = resolve_column(schema, column)?;
            if values.is_empty() {
                return Err(CompileError::invalid_spec("allowed_values requires at least one value"));
            }
            let literals = values
                .iter()
                .map(escape_literal)
                .collect::<std::result::Result<Vec<_>, _>>()?
                .join(", ");
            let pred = format!("{col} IS NOT NULL AND {col} NOT IN ({literals})");
            predicate_plan(spec, table_ref, config, &condition, &pred, Vec::new(), vec![
                column.clone(),
            ])
        }
        CheckKind::ColumnPair { expression } => {
            let names = schema.column_names();
            let parsed = parse_expression(expression, &names, config.complexity_ceiling)?;
            let pred = format!("NOT ({})", parsed.normalized);
            predicate_plan(
                spec,
                table_ref,
                config,
                &condition,
                &pred,
                Vec::new(),
                parsed.columns,
            )
        }
        CheckKind::MulticolumnSum {
            columns,
            total_column,
            tolerance,
        } => {
            if columns.is_empty() {
                return Err(CompileError::invalid_spec(
                    "multicolumn_sum requires at least one component column",
                ));
            }
            if !tolerance.is_finite() || *tolerance < 0.0 {
                return Err(CompileError::invalid_spec("tolerance must be finite and non-negative"));
            }
            let total = resolve_column(schema, total_column)?;
            let components = columns
                .iter()
                .map(|c| resolve_column(schema, c))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let guards = components
                .iter()
                .chain(std::iter::once(&total))
                .map(|c| format!("{c} IS NOT NULL"))
                .collect::<Vec<_>>()
                .join(" AND ");
            let sum_expr = components.join(" + ");
            let pred = format!("{guards} AND ABS(({sum_expr}) - {total}) > ?");
            let mut sample_columns = columns.clone();
            sample_columns.push(total_column.clone());
            predicate_plan(
                spec,
                table_ref,
                config,
                &condition,
                &pred,
                vec![JsonValue::from(*tolerance)],
                sample_columns,
            )
        }
        CheckKind::Unique { column } => compile_unique(spec, schema, table_ref, config, &condition, column),
        CheckKind::CompositeUnique { columns } => {
            compile_composite_unique(spec, schema, table_ref, config, &condition, columns)
        }
        CheckKind::RawQuery { sql } => compile_raw_query(spec, config, sql),
        CheckKind::Distribution {
            column,
            expected,
            tolerance,
        } => compile_distribution(spec, schema, table_ref, config, &condition, column, expected, *tolerance),
    }
}

/// Validates and normalizes the optional condition through the condition policy.
fn validate_condition(
    spec: &CheckSpec,
    config: &GuardConfig,
) -> std::result::Result<Option<String>, CompileError> {
    match spec.condition.as_deref() {
        None => Ok(None),
        Some(text) => {
            if matches!(spec.kind, CheckKind::RawQuery { .. }) {
                return Err(CompileError::invalid_spec(
                    "raw_query checks do not accept a condition",
                ));
            }
            if text.trim().is_empty() {
                return Err(CompileError::invalid_spec("condition must not be empty"));
            }
            let score = safety::validate(text, QueryPolicy::Condition, config.complexity_ceiling)
                .into_result()?;
            tracing::debug!(complexity = score, "condition accepted");
            Ok(Some(text.trim().to_string()))
        }
    }
}

fn check_threshold_applicability(spec: &CheckSpec) -> std::result::Result<(), CompileError> {
    if spec.threshold.is_some() {
        match spec.kind {
            CheckKind::RawQuery { .. } => {
                return Err(CompileError::invalid_spec(
                    "raw_query checks have no eligible-row denominator for a threshold",
                ));
            }
            CheckKind::Distribution { .. } => {
                return Err(CompileError::invalid_spec(
                    "distribution checks have no eligible-row denominator for a threshold",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Resolves a column case-insensitively and returns its quoted identifier.
fn resolve_column(
    schema: &TableSchema,
    name: &str,
) -> std::result::Result<String, CompileError> {
    let declared = schema
        .column(name)
        .ok_or_else(|| CompileError::unknown_column(name))?;
    quote_ident(&declared.name)
}

fn require_scalar(value: &JsonValue, what: &str) -> std::result::Result<(), CompileError> {
    match value {
        JsonValue::Number(_) | JsonValue::String(_) => Ok(()),
        _ => Err(CompileError::invalid_spec(format!(
            "{what} must be a number or string"
        ))),
    }
}

/// Joins the validated condition and a violation predicate.
fn full_predicate(condition: &Option<String>, pred: &str) -> String {
    match condition {
        Some(cond) => format!("({cond}) AND ({pred})"),
        None => format!("({pred})"),
    }
}

/// Builds the standard plan for predicate-based kinds.
fn predicate_plan(
    spec: &CheckSpec,
    table_ref: &str,
    config: &GuardConfig,
    condition: &Option<String>,
    pred: &str,
    params: Vec<JsonValue>,
    sample_columns: Vec<String>,
) -> std::result::Result<CompiledPlan, CompileError> {
    check_threshold_applicability(spec)?;

    let full = full_predicate(condition, pred);
    let need_eligible = condition.is_some() || spec.threshold.is_some();

    let (aggregate_sql, shape) = if need_eligible {
        let eligible = match condition {
            Some(cond) => format!("COUNT(*) FILTER (WHERE ({cond}))"),
            None => "COUNT(*)".to_string(),
        };
        (
            format!(
                "SELECT COUNT(*) FILTER (WHERE {full}) AS violations, {eligible} AS eligible FROM {table_ref}"
            ),
            AggregateShape::ViolationsWithEligible,
        )
    } else {
        (
            format!("SELECT COUNT(*) FILTER (WHERE {full}) AS violations FROM {table_ref}"),
            AggregateShape::Violations,
        )
    };

    let sample_sql = sample_query(table_ref, &full, &sample_columns, config.sample_size)?;

    Ok(CompiledPlan {
        aggregate_sql,
        aggregate_params: params.clone(),
        sample_sql: Some(sample_sql),
        sample_params: params,
        sample_limit: config.sample_size,
        sample_columns,
        shape,
        timeout: config.query_timeout(),
        row_cap: config.sample_row_cap,
    })
}

/// Sample rows are numbered over the full relation before filtering so that
/// `row_idx` is the 0-based position of the offending row in the dataset.
fn sample_query(
    table_ref: &str,
    full_pred: &str,
    columns: &[String],
    limit: u32,
) -> std::result::Result<String, CompileError> {
    let projection = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .join(", ");
    Ok(format!(
        "SELECT row_idx, {projection} FROM \
         (SELECT row_number() OVER () - 1 AS row_idx, * FROM {table_ref}) AS numbered \
         WHERE {full_pred} LIMIT {limit}"
    ))
}

fn compile_unique(
    spec: &CheckSpec,
    schema: &TableSchema,
    table_ref: &str,
    config: &GuardConfig,
    condition: &Option<String>,
    column: &str,
) -> std::result::Result<CompiledPlan, CompileError> {
    check_threshold_applicability(spec)?;
    let col = resolve_column(schema, column)?;

    // Violations count every row participating in duplication (not just the
    // excess beyond the first occurrence) so the sampled rows can never
    // outnumber total_failures.
    let groups = match condition {
        Some(cond) => format!(
            "SELECT COUNT(*) AS n FROM {table_ref} WHERE {col} IS NOT NULL AND ({cond}) GROUP BY {col}"
        ),
        None => format!(
            "SELECT COUNT(*) AS n FROM {table_ref} WHERE {col} IS NOT NULL GROUP BY {col}"
        ),
    };
    let eligible = match condition {
        Some(cond) => format!("(SELECT COUNT(*) FROM {table_ref} WHERE ({cond}))"),
        None => format!("(SELECT COUNT(*) FROM {table_ref})"),
    };
    let (aggregate_sql, shape) = if condition.is_some() || spec.threshold.is_some() {
        (
            format!(
                "WITH groups AS ({groups}) \
                 SELECT COALESCE(SUM(n) FILTER (WHERE n > 1), 0) AS violations, \
                 {eligible} AS eligible FROM groups"
            ),
            AggregateShape::ViolationsWithEligible,
        )
    } else {
        (
            format!(
                "WITH groups AS ({groups}) \
                 SELECT COALESCE(SUM(n) FILTER (WHERE n > 1), 0) AS violations FROM groups"
            ),
            AggregateShape::Violations,
        )
    };

    let dup_filter = match condition {
        Some(cond) => format!(
            "SELECT {col} FROM {table_ref} WHERE ({cond}) GROUP BY {col} HAVING COUNT(*) > 1"
        ),
        None => format!("SELECT {col} FROM {table_ref} GROUP BY {col} HAVING COUNT(*) > 1"),
    };
    let pred = format!("{col} IS NOT NULL AND {col} IN ({dup_filter})");
    let full = full_predicate(condition, &pred);
    let sample_sql = sample_query(table_ref, &full, &[column.to_string()], config.sample_size)?;

    Ok(CompiledPlan {
        aggregate_sql,
        aggregate_params: Vec::new(),
        sample_sql: Some(sample_sql),
        sample_params: Vec::new(),
        sample_limit: config.sample_size,
        sample_columns: vec![column.to_string()],
        shape,
        timeout: config.query_timeout(),
        row_cap: config.sample_row_cap,
    })
}

fn compile_composite_unique(
    spec: &CheckSpec,
    schema: &TableSchema,
    table_ref: &str,
    config: &GuardConfig,
    condition: &Option<String>,
    columns: &[String],
) -> std::result::Result<CompiledPlan, CompileError> {
    check_threshold_applicability(spec)?;
    if columns.len() < 2 {
        return Err(CompileError::invalid_spec(
            "composite_unique requires at least two columns",
        ));
    }
    let quoted = columns
        .iter()
        .map(|c| resolve_column(schema, c))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let key_list = quoted.join(", ");

    let where_cond = match condition {
        Some(cond) => format!(" WHERE ({cond})"),
        None => String::new(),
    };

    // Violations are rows participating in a duplicated combination, keeping
    // total_failures at or above the sampled row count.
    let aggregate_sql = format!(
        "WITH combos AS (SELECT {key_list}, COUNT(*) AS n FROM {table_ref}{where_cond} GROUP BY {key_list}) \
         SELECT COALESCE(SUM(n) FILTER (WHERE n > 1), 0) AS violations, \
         COUNT(*) FILTER (WHERE n > 1) AS duplicate_combinations, \
         COUNT(*) AS distinct_combinations, \
         COALESCE(SUM(n), 0) AS total_rows FROM combos"
    );

    let dup_combos = format!(
        "SELECT {key_list} FROM {table_ref}{where_cond} GROUP BY {key_list} HAVING COUNT(*) > 1"
    );
    let pred = format!("({key_list}) IN ({dup_combos})");
    let full = full_predicate(condition, &pred);
    let sample_sql = sample_query(table_ref, &full, columns, config.sample_size)?;

    Ok(CompiledPlan {
        aggregate_sql,
        aggregate_params: Vec::new(),
        sample_sql: Some(sample_sql),
        sample_params: Vec::new(),
        sample_limit: config.sample_size,
        sample_columns: columns.to_vec(),
        shape: AggregateShape::CompositeUnique,
        timeout: config.query_timeout(),
        row_cap: config.sample_row_cap,
    })
}

fn compile_raw_query(
    spec: &CheckSpec,
    config: &GuardConfig,
    sql: &str,
) -> std::result::Result<CompiledPlan, CompileError> {
    check_threshold_applicability(spec)?;
    let score = safety::validate(sql, QueryPolicy::StrictQuery, config.complexity_ceiling)
        .into_result()?;
    tracing::debug!(complexity = score, "raw query accepted");

    let trimmed = sql.trim();
    Ok(CompiledPlan {
        aggregate_sql: format!("SELECT COUNT(*) AS violations FROM ({trimmed}) AS raw_check"),
        aggregate_params: Vec::new(),
        sample_sql: Some(format!(
            "SELECT * FROM ({trimmed}) AS raw_check LIMIT {}",
            config.sample_size
        )),
        sample_params: Vec::new(),
        sample_limit: config.sample_size,
        sample_columns: Vec::new(),
        shape: AggregateShape::Violations,
        timeout: config.query_timeout(),
        row_cap: config.sample_row_cap,
    })
}

#[allow(clippy::too_many_arguments)]
fn compile_distribution(
    spec: &CheckSpec,
    schema: &TableSchema,
    table_ref: &str,
    config: &GuardConfig,
    condition: &Option<String>,
    column: &str,
    expected: &std::collections::BTreeMap<String, f64>,
    tolerance: f64,
) -> std::result::Result<CompiledPlan, CompileError> {
    check_threshold_applicability(spec)?;
    if expected.is_empty() {
        return Err(CompileError::invalid_spec(
            "distribution requires a non-empty expected frequency map",
        ));
    }
    for (category, freq) in expected {
        if !(0.0..=1.0).contains(freq) {
            return Err(CompileError::invalid_spec(format!(
                "expected frequency for '{category}' must be in [0, 1], got {freq}"
            )));
        }
    }
    if !(0.0..=1.0).contains(&tolerance) {
        return Err(CompileError::invalid_spec(
            "distribution tolerance must be in [0, 1]",
        ));
    }

    let col = resolve_column(schema, column)?;
    let where_clause = match condition {
        Some(cond) => format!("{col} IS NOT NULL AND ({cond})"),
        None => format!("{col} IS NOT NULL"),
    };
    // ORDER BY keeps the outcome deterministic for identical data
    let aggregate_sql = format!(
        "SELECT CAST({col} AS TEXT) AS category, COUNT(*) AS n FROM {table_ref} \
         WHERE {where_clause} GROUP BY category ORDER BY category"
    );

    Ok(CompiledPlan {
        aggregate_sql,
        aggregate_params: Vec::new(),
        sample_sql: None,
        sample_params: Vec::new(),
        sample_limit: config.sample_size,
        sample_columns: vec![column.to_string()],
        shape: AggregateShape::GroupFrequencies,
        timeout: config.query_timeout(),
        row_cap: config.sample_row_cap,
    })
}
