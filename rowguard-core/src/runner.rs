//! Single-check validation facade.
//!
//! Ties the pipeline together: introspect the relation, compile the check,
//! execute the plan, build the result. Each check is synchronous end to end;
//! the only suspension point is the engine round trip. Batch orchestration
//! (whether one check's execution failure halts a run) is a caller concern.

use crate::compile::compile;
use crate::config::GuardConfig;
use crate::error::Result;
use crate::exec::ExecutionEngine;
use crate::result::{ValidationResult, build_result};
use crate::spec::CheckSpec;

/// Runs checks against one relation with a fixed configuration.
#[derive(Debug, Clone)]
pub struct CheckRunner {
    config: GuardConfig,
}

impl CheckRunner {
    /// Creates a runner with the given configuration.
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Creates a runner with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GuardConfig::default())
    }

    /// Returns a reference to the runner configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Validates one check: compile, execute, build.
    ///
    /// Compilation failures surface before any query reaches the engine, and
    /// never degrade to a skipped or passing result.
    ///
    /// # Errors
    /// Returns a [`crate::error::RowGuardError`] for compile, execution, or
    /// (defensively) result-construction failures.
    pub async fn run(
        &self,
        engine: &mut ExecutionEngine,
        spec: &CheckSpec,
    ) -> Result<ValidationResult> {
        let schema = engine.schema().await?;
        let table_ref = engine.relation().table_ref().to_string();
        let plan = compile(spec, &schema, &table_ref, &self.config)?;

        tracing::debug!(check = spec.label(), "compiled plan, executing");
        let outcome = engine.execute(&plan).await?;

        let result = build_result(spec, &plan, &outcome)?;
        tracing::info!(
            check = spec.label(),
            passed = result.passed,
            violations = result.total_failures,
            "check finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, RowGuardError};
    use crate::relation::{ColumnInfo, QueryableRelation, RowStream, TableSchema};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Relation that refuses to run anything, proving compilation failures
    /// stop the pipeline before the engine.
    struct RefusingRelation {
        queries_seen: AtomicUsize,
    }

    #[async_trait]
    impl QueryableRelation for RefusingRelation {
        fn table_ref(&self) -> &str {
            "\"t\""
        }

        async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError> {
            Ok(TableSchema::new(vec![ColumnInfo {
                name: "status".to_string(),
                data_type: "TEXT".to_string(),
            }]))
        }

        async fn query<'a>(
            &'a self,
            _sql: &'a str,
            _params: &'a [JsonValue],
        ) -> std::result::Result<RowStream<'a>, ExecutionError> {
            self.queries_seen.fetch_add(1, Ordering::SeqCst);
            Err(ExecutionError::engine_context("should not be reached"))
        }
    }

    /// Relation that answers every query with a single canned aggregate row.
    struct CannedRelation {
        row: JsonValue,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryableRelation for CannedRelation {
        fn table_ref(&self) -> &str {
            "\"t\""
        }

        async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError> {
            Ok(TableSchema::new(vec![ColumnInfo {
                name: "status".to_string(),
                data_type: "TEXT".to_string(),
            }]))
        }

        async fn query<'a>(
            &'a self,
            sql: &'a str,
            _params: &'a [JsonValue],
        ) -> std::result::Result<RowStream<'a>, ExecutionError> {
            self.log.lock().unwrap().push(sql.to_string());
            let row = self.row.clone();
            Ok(futures::stream::iter(vec![Ok(row)]).boxed())
        }
    }

    #[tokio::test]
    async fn test_unsafe_check_never_reaches_engine() {
        let relation = Box::new(RefusingRelation {
            queries_seen: AtomicUsize::new(0),
        });
        let mut engine = ExecutionEngine::new(relation);
        let runner = CheckRunner::with_defaults();

        let spec = CheckSpec::not_null("status").with_condition("1=1; DROP TABLE t");
        let error = runner.run(&mut engine, &spec).await.unwrap_err();
        assert!(matches!(error, RowGuardError::Compile(_)));
    }

    #[tokio::test]
    async fn test_runner_happy_path() {
        let relation = Box::new(CannedRelation {
            row: json!({"violations": 0}),
            log: Mutex::new(Vec::new()),
        });
        let mut engine = ExecutionEngine::new(relation);
        let runner = CheckRunner::with_defaults();

        let result = runner
            .run(&mut engine, &CheckSpec::not_null("status"))
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.check, "not_null");
    }

    #[tokio::test]
    async fn test_unknown_column_surfaces_compile_error() {
        let relation = Box::new(CannedRelation {
            row: json!({"violations": 0}),
            log: Mutex::new(Vec::new()),
        });
        let mut engine = ExecutionEngine::new(relation);
        let runner = CheckRunner::with_defaults();

        let error = runner
            .run(&mut engine, &CheckSpec::not_null("missing"))
            .await
            .unwrap_err();
        assert!(matches!(error, RowGuardError::Compile(_)));
    }
}
