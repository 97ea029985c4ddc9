//! SQLite binding of [`QueryableRelation`] over an sqlx pool.
//!
//! This is the embedded reference engine used by the integration tests, and a
//! usable binding for callers whose tabular data already lives in SQLite.
//! Schema introspection goes through `PRAGMA table_info`; rows decode into
//! JSON objects, trying types in order of likelihood since SQLite is
//! dynamically typed.

use crate::compile::escape::quote_ident;
use crate::error::{ExecutionError, Result, RowGuardError};
use crate::relation::{ColumnInfo, QueryableRelation, RowStream, TableSchema};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, Sqlite};

/// One SQLite table exposed as a queryable relation.
pub struct SqliteRelation {
    pool: SqlitePool,
    table: String,
    table_ref: String,
}

impl SqliteRelation {
    /// Connects to a SQLite database and targets one table.
    ///
    /// # Errors
    /// Fails if the connection cannot be established or the table name is not
    /// a safe identifier.
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url).await.map_err(|e| {
            RowGuardError::Execution(ExecutionError::engine("failed to connect to SQLite", e))
        })?;
        Self::from_pool(pool, table)
    }

    /// Wraps an existing pool, targeting one table.
    ///
    /// # Errors
    /// Fails if the table name is not a safe identifier.
    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        let table_ref = quote_ident(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            table_ref,
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The unquoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl QueryableRelation for SqliteRelation {
    fn table_ref(&self) -> &str {
        &self.table_ref
    }

    async fn schema(&self) -> std::result::Result<TableSchema, ExecutionError> {
        let pragma = format!("PRAGMA table_info('{}')", self.table.replace('\'', "''"));
        let rows = sqlx::query(&pragma)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                ExecutionError::engine(
                    format!("failed to introspect table '{}'", self.table),
                    e,
                )
            })?;

        if rows.is_empty() {
            return Err(ExecutionError::engine_context(format!(
                "table '{}' does not exist or has no columns",
                self.table
            )));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| {
                ExecutionError::engine("failed to read column name from table_info", e)
            })?;
            let data_type: String = row.try_get("type").map_err(|e| {
                ExecutionError::engine("failed to read column type from table_info", e)
            })?;
            columns.push(ColumnInfo { name, data_type });
        }

        Ok(TableSchema::new(columns))
    }

    async fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [JsonValue],
    ) -> std::result::Result<RowStream<'a>, ExecutionError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param)?;
        }

        let stream = query
            .fetch(&self.pool)
            .map(|item| match item {
                Ok(row) => Ok(row_to_json(&row)),
                Err(e) => Err(ExecutionError::engine("row fetch failed", e)),
            })
            .boxed();

        Ok(stream)
    }
}

/// Binds one JSON parameter positionally.
fn bind_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q JsonValue,
) -> std::result::Result<Query<'q, Sqlite, SqliteArguments<'q>>, ExecutionError> {
    match param {
        JsonValue::Null => Ok(query.bind(None::<String>)),
        JsonValue::Bool(b) => Ok(query.bind(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(query.bind(i))
            } else if let Some(f) = n.as_f64() {
                Ok(query.bind(f))
            } else {
                Err(ExecutionError::engine_context(
                    "unbindable numeric parameter",
                ))
            }
        }
        JsonValue::String(s) => Ok(query.bind(s.as_str())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(ExecutionError::engine_context(
            "non-scalar parameters are not bindable",
        )),
    }
}

/// Decodes a dynamically-typed SQLite row into a JSON object.
fn row_to_json(row: &SqliteRow) -> JsonValue {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name();
        map.insert(name.to_string(), extract_column_value(row, name));
    }
    JsonValue::Object(map)
}

/// Extracts a column value, trying types in order of likelihood.
fn extract_column_value(row: &SqliteRow, column_name: &str) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(column_name) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column_name) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(column_name) {
        return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(column_name) {
        return v.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(column_name) {
        // For BLOB data, convert to base64 string
        return v
            .map(|bytes| {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                JsonValue::String(format!("base64:{}", encoded))
            })
            .unwrap_or(JsonValue::Null);
    }

    JsonValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_relation() -> SqliteRelation {
        // One pooled connection so every query sees the same in-memory db
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, price REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO items (label, price) VALUES ('a', 1.5), (NULL, 2.0)")
            .execute(&pool)
            .await
            .unwrap();
        SqliteRelation::from_pool(pool, "items").unwrap()
    }

    #[tokio::test]
    async fn test_schema_introspection() {
        let relation = seeded_relation().await;
        let schema = relation.schema().await.unwrap();

        assert_eq!(schema.column_names(), vec!["id", "label", "price"]);
        assert_eq!(schema.column("label").unwrap().data_type, "TEXT");
    }

    #[tokio::test]
    async fn test_missing_table_is_an_engine_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let relation = SqliteRelation::from_pool(pool, "absent").unwrap();
        assert!(relation.schema().await.is_err());
    }

    #[tokio::test]
    async fn test_query_with_bound_params() {
        let relation = seeded_relation().await;
        let rows: Vec<_> = relation
            .query("SELECT label FROM items WHERE price > ?", &[json!(1.8)])
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.get("label"), Some(&JsonValue::Null));
    }

    #[tokio::test]
    async fn test_row_decoding_types() {
        let relation = seeded_relation().await;
        let rows: Vec<_> = relation
            .query("SELECT id, label, price FROM items ORDER BY id", &[])
            .await
            .unwrap()
            .collect()
            .await;

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("id"), Some(&json!(1)));
        assert_eq!(first.get("label"), Some(&json!("a")));
        assert_eq!(first.get("price"), Some(&json!(1.5)));
    }

    #[tokio::test]
    async fn test_table_ref_is_quoted() {
        // from_pool is async-free; build a lazy pool via connect_lazy
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let relation = SqliteRelation::from_pool(pool, "orders").unwrap();
        assert_eq!(relation.table_ref(), "\"orders\"");

        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        assert!(SqliteRelation::from_pool(pool, "bad\0name").is_err());
    }
}
