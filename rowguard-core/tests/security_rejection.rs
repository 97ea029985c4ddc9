//! Security rejection tests: unsafe check text must fail compilation and no
//! query may ever reach the engine.

use async_trait::async_trait;
use futures::StreamExt;
use rowguard_core::{
    CheckRunner, CheckSpec, ColumnInfo, CompileError, ExecutionEngine, ExecutionError,
    QueryPolicy, QueryableRelation, RowGuardError, SecurityError, TableSchema, validate,
};
use rowguard_core::relation::RowStream;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Relation that counts every query it receives. Security tests assert the
/// count stays at zero: rejection must happen before the engine.
struct CountingRelation {
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl QueryableRelation for CountingRelation {
    fn table_ref(&self) -> &str {
        "\"orders\""
    }

    async fn schema(&self) -> Result<TableSchema, ExecutionError> {
        Ok(TableSchema::new(
            ["status", "amount", "country"]
                .iter()
                .map(|name| ColumnInfo {
                    name: (*name).to_string(),
                    data_type: "TEXT".to_string(),
                })
                .collect(),
        ))
    }

    async fn query<'a>(
        &'a self,
        _sql: &'a str,
        _params: &'a [JsonValue],
    ) -> Result<RowStream<'a>, ExecutionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(futures::stream::empty().boxed())
    }
}

fn counting_engine() -> (ExecutionEngine, Arc<AtomicUsize>) {
    let queries = Arc::new(AtomicUsize::new(0));
    let relation = CountingRelation {
        queries: Arc::clone(&queries),
    };
    (ExecutionEngine::new(Box::new(relation)), queries)
}

async fn assert_rejected_before_engine(spec: CheckSpec) {
    let (mut engine, queries) = counting_engine();
    let runner = CheckRunner::with_defaults();

    let error = runner.run(&mut engine, &spec).await.unwrap_err();
    assert!(
        matches!(error, RowGuardError::Compile(_)),
        "expected compile-time rejection, got: {error:?}"
    );
    assert_eq!(
        queries.load(Ordering::SeqCst),
        0,
        "a rejected check must not reach the engine"
    );
}

#[tokio::test]
async fn test_security_raw_query_with_second_statement() {
    // "SELECT * FROM t; DROP TABLE t" is rejected before execution
    assert_rejected_before_engine(CheckSpec::raw_query("SELECT * FROM t; DROP TABLE t")).await;
}

#[tokio::test]
async fn test_security_condition_injection_corpus() {
    let conditions = [
        "amount > 0; DROP TABLE x",
        "amount > 0 OR 1=1",
        "country = 'US' UNION SELECT password",
        "amount > 0 -- comment",
        "amount > 0 /* sneaky */",
        "name = 'unterminated",
        "delete from orders",
    ];
    for condition in conditions {
        assert_rejected_before_engine(CheckSpec::not_null("status").with_condition(condition))
            .await;
    }
}

#[tokio::test]
async fn test_security_raw_query_corpus() {
    let queries = [
        "DELETE FROM orders",
        "UPDATE orders SET amount = 0",
        "/* mask */ SELECT 1",
        "-- leading comment\nSELECT 1",
        "INSERT INTO orders VALUES (1)",
        "SELECT * FROM orders WHERE id IN (1) UNION SELECT secret FROM vault",
    ];
    for sql in queries {
        assert_rejected_before_engine(CheckSpec::raw_query(sql)).await;
    }
}

#[tokio::test]
async fn test_security_expression_rejections() {
    for expression in [
        "status = 'paid'",
        "status; DROP TABLE orders",
        "amount > 0 -- comment",
        "secret_column > 0",
    ] {
        assert_rejected_before_engine(CheckSpec::column_pair(expression)).await;
    }
}

#[tokio::test]
async fn test_security_unsafe_literal_rejection() {
    assert_rejected_before_engine(CheckSpec::allowed_values(
        "status",
        vec![serde_json::json!("bad\u{0}value")],
    ))
    .await;
}

#[tokio::test]
async fn test_security_rejection_reasons_are_specific() {
    let (mut engine, _) = counting_engine();
    let runner = CheckRunner::with_defaults();

    let error = runner
        .run(
            &mut engine,
            &CheckSpec::not_null("status").with_condition("truncate orders"),
        )
        .await
        .unwrap_err();

    match error {
        RowGuardError::Compile(CompileError::Security(SecurityError::ForbiddenKeyword {
            keyword,
        })) => assert_eq!(keyword, "truncate"),
        other => panic!("expected a named forbidden keyword, got: {other:?}"),
    }
}

#[test]
fn test_security_validator_is_pure_and_reports_scores() {
    // Same input, same verdict: no state, no side effects
    let first = validate("amount > 0", QueryPolicy::Condition, 50);
    let second = validate("amount > 0", QueryPolicy::Condition, 50);
    assert_eq!(first.is_allowed(), second.is_allowed());
    assert_eq!(first.complexity_score, second.complexity_score);
}

#[test]
fn test_security_strict_policy_is_superset_of_condition_policy() {
    // Text that fails the condition policy also fails strict
    let unsafe_text = "SELECT 1 WHERE 1=1 OR 1=1";
    assert!(!validate(unsafe_text, QueryPolicy::Condition, 50).is_allowed());
    assert!(!validate(unsafe_text, QueryPolicy::StrictQuery, 50).is_allowed());

    // Strict additionally rejects non-SELECT text the condition policy allows
    let filter_text = "amount > 0";
    assert!(validate(filter_text, QueryPolicy::Condition, 50).is_allowed());
    assert!(!validate(filter_text, QueryPolicy::StrictQuery, 50).is_allowed());
}
