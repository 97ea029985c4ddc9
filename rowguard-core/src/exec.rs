//! Execution of compiled plans against the injected relation handle.
//!
//! The engine owns the connection handle for one validation context, injected
//! by the caller rather than held in global state. Queries run under a wall-clock
//! timeout and a hard row cap. The aggregate query always runs first, and the
//! sample query is skipped entirely when the aggregate reports zero violations.
//!
//! Timeout cancellation is cooperative at the engine boundary: the caller is
//! unblocked at the deadline regardless, and a connection that timed out is
//! poisoned: treated as unusable for subsequent checks rather than trusted to
//! be in a known state. Engine failures are never retried: queries are
//! read-only and idempotent, so a retry would only double load.

use crate::compile::{AggregateShape, CompiledPlan};
use crate::error::ExecutionError;
use crate::relation::{QueryableRelation, TableSchema};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Raw output of executing one compiled plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Violation count decoded from the aggregate row. Zero for
    /// group-frequency shapes, whose violations are derived downstream.
    pub violations: u64,
    /// Eligible-row count when the plan compiled one.
    pub eligible: Option<u64>,
    /// Raw aggregate rows (one for count shapes, many for group frequencies).
    pub aggregate_rows: Vec<JsonValue>,
    /// Bounded sample of offending rows; empty when skipped or capped to zero.
    pub sample_rows: Vec<JsonValue>,
}

/// Executes compiled plans against one relation.
///
/// Owns the injected handle for the duration of a validation context; drop the
/// engine to release it.
pub struct ExecutionEngine {
    relation: Box<dyn QueryableRelation>,
    poisoned: bool,
}

impl ExecutionEngine {
    /// Creates an engine around an injected relation handle.
    pub fn new(relation: Box<dyn QueryableRelation>) -> Self {
        Self {
            relation,
            poisoned: false,
        }
    }

    /// The underlying relation handle.
    pub fn relation(&self) -> &dyn QueryableRelation {
        self.relation.as_ref()
    }

    /// Whether an earlier timeout has made this engine unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Introspects the relation schema.
    ///
    /// # Errors
    /// Fails if the engine is poisoned or introspection fails.
    pub async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError> {
        if self.poisoned {
            return Err(ExecutionError::ConnectionPoisoned);
        }
        self.relation.schema().await
    }

    /// Runs one compiled plan: aggregate first, then the bounded sample.
    ///
    /// All-or-nothing per check: no partial outcome is returned on timeout or
    /// engine failure.
    ///
    /// # Errors
    /// Fails on timeout (poisoning the engine), on any engine-level failure,
    /// or if the engine was already poisoned. Failures are never retried.
    pub async fn execute(
        &mut self,
        plan: &CompiledPlan,
    ) -> std::result::Result<ExecutionOutcome, ExecutionError> {
        if self.poisoned {
            return Err(ExecutionError::ConnectionPoisoned);
        }

        let aggregate_rows = self
            .run_query(
                &plan.aggregate_sql,
                &plan.aggregate_params,
                plan.timeout,
                plan.row_cap,
            )
            .await?;

        let (violations, eligible) = decode_counts(plan.shape, &aggregate_rows)?;

        let sample_rows = match &plan.sample_sql {
            Some(sample_sql) if violations > 0 => {
                let cap = plan.sample_limit.min(plan.row_cap);
                self.run_query(sample_sql, &plan.sample_params, plan.timeout, cap)
                    .await?
            }
            _ => Vec::new(),
        };

        Ok(ExecutionOutcome {
            violations,
            eligible,
            aggregate_rows,
            sample_rows,
        })
    }

    async fn run_query(
        &mut self,
        sql: &str,
        params: &[JsonValue],
        timeout: Duration,
        row_cap: u32,
    ) -> std::result::Result<Vec<JsonValue>, ExecutionError> {
        let outcome = {
            let relation = self.relation.as_ref();
            let collect = async move {
                let mut stream = relation.query(sql, params).await?;
                let mut rows = Vec::new();
                while let Some(row) = stream.next().await {
                    rows.push(row?);
                    if rows.len() >= row_cap as usize {
                        break;
                    }
                }
                Ok::<_, ExecutionError>(rows)
            };
            tokio::time::timeout(timeout, collect).await
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // The connection cannot be trusted after an abandoned query
                self.poisoned = true;
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "query timed out; connection poisoned"
                );
                Err(ExecutionError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
        }
    }
}

/// Decodes violation and eligible counts from the aggregate result.
fn decode_counts(
    shape: AggregateShape,
    rows: &[JsonValue],
) -> std::result::Result<(u64, Option<u64>), ExecutionError> {
    match shape {
        AggregateShape::GroupFrequencies => Ok((0, None)),
        AggregateShape::Violations => {
            let row = first_row(rows)?;
            Ok((decode_count(row, "violations")?, None))
        }
        AggregateShape::ViolationsWithEligible => {
            let row = first_row(rows)?;
            Ok((
                decode_count(row, "violations")?,
                Some(decode_count(row, "eligible")?),
            ))
        }
        AggregateShape::CompositeUnique => {
            let row = first_row(rows)?;
            Ok((
                decode_count(row, "violations")?,
                Some(decode_count(row, "total_rows")?),
            ))
        }
    }
}

fn first_row(rows: &[JsonValue]) -> std::result::Result<&JsonValue, ExecutionError> {
    rows.first()
        .ok_or_else(|| ExecutionError::engine_context("aggregate query returned no rows"))
}

fn decode_count(row: &JsonValue, key: &str) -> std::result::Result<u64, ExecutionError> {
    let value = row.get(key).ok_or_else(|| {
        ExecutionError::engine_context(format!("aggregate column '{key}' missing from result"))
    })?;
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .map(|v| v.max(0) as u64)
            .or_else(|| n.as_u64())
            .ok_or_else(|| {
                ExecutionError::engine_context(format!("aggregate column '{key}' is not integral"))
            }),
        JsonValue::Null => Ok(0),
        _ => Err(ExecutionError::engine_context(format!(
            "aggregate column '{key}' has a non-numeric type"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RowStream;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted relation: pops one canned response per query and logs the SQL.
    struct ScriptedRelation {
        responses: Mutex<VecDeque<Vec<JsonValue>>>,
        log: Mutex<Vec<String>>,
        delay: Option<Duration>,
        fail_with: Option<String>,
    }

    impl ScriptedRelation {
        fn new(responses: Vec<Vec<JsonValue>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                log: Mutex::new(Vec::new()),
                delay: None,
                fail_with: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn failing(context: &str) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                log: Mutex::new(Vec::new()),
                delay: None,
                fail_with: Some(context.to_string()),
            }
        }
    }

    #[async_trait]
    impl QueryableRelation for ScriptedRelation {
        fn table_ref(&self) -> &str {
            "\"scripted\""
        }

        async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError> {
            Ok(TableSchema::default())
        }

        async fn query<'a>(
            &'a self,
            sql: &'a str,
            _params: &'a [JsonValue],
        ) -> std::result::Result<RowStream<'a>, ExecutionError> {
            self.log.lock().unwrap().push(sql.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(context) = &self.fail_with {
                return Err(ExecutionError::engine_context(context.clone()));
            }
            let rows = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
        }
    }

    fn plan(shape: AggregateShape, sample: bool) -> CompiledPlan {
        CompiledPlan {
            aggregate_sql: "SELECT 1 AS violations".to_string(),
            aggregate_params: Vec::new(),
            sample_sql: sample.then(|| "SELECT sample".to_string()),
            sample_params: Vec::new(),
            sample_limit: 10,
            sample_columns: Vec::new(),
            shape,
            timeout: Duration::from_secs(5),
            row_cap: 10_000,
        }
    }

    fn engine_with(responses: Vec<Vec<JsonValue>>) -> ExecutionEngine {
        ExecutionEngine::new(Box::new(ScriptedRelation::new(responses)))
    }

    #[tokio::test]
    async fn test_aggregate_runs_first_and_sample_skipped_on_zero_violations() {
        let relation = ScriptedRelation::new(vec![vec![json!({"violations": 0})]]);
        let mut engine = ExecutionEngine::new(Box::new(relation));

        let outcome = engine
            .execute(&plan(AggregateShape::Violations, true))
            .await
            .unwrap();

        assert_eq!(outcome.violations, 0);
        assert!(outcome.sample_rows.is_empty());
    }

    #[tokio::test]
    async fn test_sample_runs_when_violations_found() {
        let mut engine = engine_with(vec![
            vec![json!({"violations": 2})],
            vec![json!({"row_idx": 0}), json!({"row_idx": 4})],
        ]);

        let outcome = engine
            .execute(&plan(AggregateShape::Violations, true))
            .await
            .unwrap();

        assert_eq!(outcome.violations, 2);
        assert_eq!(outcome.sample_rows.len(), 2);
    }

    #[tokio::test]
    async fn test_eligible_decoded_for_conditional_shape() {
        let mut engine = engine_with(vec![vec![json!({"violations": 1, "eligible": 2})]]);

        let outcome = engine
            .execute(&plan(AggregateShape::ViolationsWithEligible, false))
            .await
            .unwrap();

        assert_eq!(outcome.violations, 1);
        assert_eq!(outcome.eligible, Some(2));
    }

    #[tokio::test]
    async fn test_sample_rows_truncated_at_hard_cap() {
        let many: Vec<JsonValue> = (0..100).map(|i| json!({"row_idx": i})).collect();
        let mut engine = engine_with(vec![vec![json!({"violations": 100})], many]);

        let mut capped = plan(AggregateShape::Violations, true);
        capped.row_cap = 5;

        let outcome = engine.execute(&capped).await.unwrap();
        assert_eq!(outcome.sample_rows.len(), 5);
    }

    #[tokio::test]
    async fn test_sample_limit_bounded_by_row_cap() {
        let many: Vec<JsonValue> = (0..100).map(|i| json!({"row_idx": i})).collect();
        let mut engine = engine_with(vec![vec![json!({"violations": 100})], many]);

        let mut capped = plan(AggregateShape::Violations, true);
        capped.sample_limit = 3;

        let outcome = engine.execute(&capped).await.unwrap();
        assert_eq!(outcome.sample_rows.len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_poisons_engine() {
        let relation = ScriptedRelation::new(vec![vec![json!({"violations": 0})]])
            .with_delay(Duration::from_millis(200));
        let mut engine = ExecutionEngine::new(Box::new(relation));

        let mut fast = plan(AggregateShape::Violations, false);
        fast.timeout = Duration::from_millis(10);

        let error = engine.execute(&fast).await.unwrap_err();
        assert!(matches!(error, ExecutionError::Timeout { .. }));
        assert!(engine.is_poisoned());

        // The poisoned connection is refused, not reused
        let error = engine.execute(&fast).await.unwrap_err();
        assert!(matches!(error, ExecutionError::ConnectionPoisoned));

        let error = engine.schema().await.unwrap_err();
        assert!(matches!(error, ExecutionError::ConnectionPoisoned));
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_retried() {
        let relation = ScriptedRelation::failing("type mismatch");
        let mut engine = ExecutionEngine::new(Box::new(relation));

        let error = engine
            .execute(&plan(AggregateShape::Violations, false))
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::Engine { .. }));

        // An engine failure is surfaced, not retried, and does not poison the
        // connection the way a timeout does
        assert!(!engine.is_poisoned());
    }

    #[tokio::test]
    async fn test_malformed_aggregate_surfaces_engine_error() {
        let mut engine = engine_with(vec![vec![json!({"wrong_column": 1})]]);
        let error = engine
            .execute(&plan(AggregateShape::Violations, false))
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::Engine { .. }));

        let mut engine = engine_with(vec![Vec::new()]);
        let error = engine
            .execute(&plan(AggregateShape::Violations, false))
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::Engine { .. }));
    }

    #[tokio::test]
    async fn test_composite_shape_decodes_total_rows_as_eligible() {
        let mut engine = engine_with(vec![vec![json!({
            "violations": 2,
            "duplicate_combinations": 1,
            "distinct_combinations": 2,
            "total_rows": 3
        })]]);

        let outcome = engine
            .execute(&plan(AggregateShape::CompositeUnique, false))
            .await
            .unwrap();
        assert_eq!(outcome.violations, 2);
        assert_eq!(outcome.eligible, Some(3));
    }

    #[test]
    fn test_decode_count_handles_null_and_rejects_text() {
        let row = json!({"violations": null});
        assert_eq!(decode_count(&row, "violations").unwrap(), 0);

        let row = json!({"violations": "three"});
        assert!(decode_count(&row, "violations").is_err());
    }
}
