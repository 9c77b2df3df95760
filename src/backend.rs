use crate::builder::{CompiledQuery, Dialect};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Row from a query result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub columns: HashMap<String, Value>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self {
            columns: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.columns.insert(key, value);
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.columns
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.columns.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.columns
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
    }

    /// Integer column; numeric strings (as some drivers return aggregates) are accepted
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.columns.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.columns.get(key).and_then(|v| v.as_f64())
    }

    /// Boolean column; SQLite stores booleans as 0/1
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.columns.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => Some(!(s.is_empty() || s == "0")),
            _ => None,
        }
    }
}

impl Default for QueryRow {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(String, Value)> for QueryRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// SQL execution service.
///
/// Parameters are bound positionally to `?` placeholders.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Connect to the database
    async fn connect(url: &str) -> Result<Self>
    where
        Self: Sized;

    /// Execute a SQL statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Query and return results
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Identity generated by the last insert into `table`
    async fn last_insert_id(&mut self, table: &str) -> Result<i64>;

    /// Begin a transaction
    async fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&mut self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Identifier quoting used by this database
    fn dialect(&self) -> Dialect {
        Dialect::Ansi
    }

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(self) -> Result<()>;

    async fn execute_compiled(&mut self, statement: &CompiledQuery) -> Result<u64> {
        self.execute(&statement.sql, &statement.params).await
    }

    async fn query_compiled(&mut self, statement: &CompiledQuery) -> Result<QueryResult> {
        self.query(&statement.sql, &statement.params).await
    }
}
