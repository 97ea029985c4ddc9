//! The queryable-relation interface the core validates against.
//!
//! The core has no knowledge of whether the underlying data originates from a
//! file, a warehouse, or an in-memory table. It requires exactly two
//! capabilities from the handle it is given: schema introspection (column names
//! and types) and execution of parameterized query text with rows streamed
//! back. Everything else, from connection management to registration of
//! sources and dialect concerns, belongs to the implementation.
//!
//! # Concurrency
//! A relation's underlying connection is not assumed safe for concurrent use.
//! Validating multiple datasets concurrently requires distinct relation
//! instances, one per dataset, with no implicit sharing.

use crate::error::ExecutionError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// One column of an introspected schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as declared by the engine.
    pub name: String,
    /// Engine-reported type name.
    pub data_type: String,
}

/// Introspected schema of one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableSchema {
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Creates a schema from `(name, type)` pairs.
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    /// Looks up a column case-insensitively, returning the declared entry.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether a column exists (case-insensitive).
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// All declared column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Stream of result rows, each decoded as a JSON object keyed by column name.
pub type RowStream<'a> = BoxStream<'a, std::result::Result<JsonValue, ExecutionError>>;

/// Opaque handle to a queryable tabular dataset.
///
/// # Object Safety
/// The trait is object-safe; the execution engine owns a
/// `Box<dyn QueryableRelation>` injected by the caller (no global state).
///
/// # Security
/// Implementations execute whatever text they are handed. The compiler is the
/// sole producer of that text inside this crate, and it only emits validated,
/// escaped, read-only SELECTs.
#[async_trait]
pub trait QueryableRelation: Send + Sync {
    /// SQL reference for this relation, safe to embed in a FROM clause.
    fn table_ref(&self) -> &str;

    /// Introspects column names and types.
    ///
    /// # Errors
    /// Returns an error if introspection fails at the engine.
    async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError>;

    /// Executes parameterized query text and streams rows back.
    ///
    /// Parameters bind positionally to `?` placeholders. Each yielded row is a
    /// JSON object keyed by result column name.
    ///
    /// # Errors
    /// Returns an error if the engine rejects or fails the query. Row-level
    /// decode failures surface as stream items.
    async fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [JsonValue],
    ) -> std::result::Result<RowStream<'a>, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "INTEGER".to_string(),
            },
            ColumnInfo {
                name: "Status".to_string(),
                data_type: "TEXT".to_string(),
            },
        ])
    }

    #[test]
    fn test_column_lookup_case_insensitive() {
        let schema = schema();
        assert!(schema.has_column("status"));
        assert_eq!(schema.column("STATUS").map(|c| c.name.as_str()), Some("Status"));
        assert!(!schema.has_column("missing"));
    }

    #[test]
    fn test_column_names_declaration_order() {
        assert_eq!(schema().column_names(), vec!["id", "Status"]);
    }
}
