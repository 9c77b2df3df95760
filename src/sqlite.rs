use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, ValueRef};
use std::str::FromStr;

/// SQLite execution service over a single connection.
///
/// One connection keeps `BEGIN`/`COMMIT` and `last_insert_rowid` on the
/// same session, and keeps `sqlite::memory:` databases alive.
pub struct SqliteBackend {
    conn: Option<SqliteConnection>,
    in_transaction: bool,
    last_insert_id: i64,
}

impl SqliteBackend {
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| QueryError::Connection(e.to_string()))?
            .create_if_missing(true);
        let mut conn = options
            .connect()
            .await
            .map_err(|e| QueryError::Connection(e.to_string()))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut conn)
            .await
            .map_err(|e| QueryError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Some(conn),
            in_transaction: false,
            last_insert_id: 0,
        })
    }

    /// Create an in-memory SQLite database
    pub async fn memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Create a file-based SQLite database
    pub async fn file(path: &str) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path)).await
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| QueryError::Connection("connection is closed".to_string()))
    }

    fn bind<'q>(mut query: Query<'q, Sqlite, SqliteArguments<'q>>, params: &[Value]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        query
    }

    /// Convert SQLite row to QueryRow
    fn convert_row(row: &SqliteRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for (index, column) in row.columns().iter().enumerate() {
            let column_name = column.name().to_string();

            let is_null = row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true);
            let value = if is_null {
                Value::Null
            } else if let Ok(value) = row.try_get::<i64, _>(index) {
                Value::Number(value.into())
            } else if let Ok(value) = row.try_get::<f64, _>(index) {
                serde_json::Number::from_f64(value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<String, _>(index) {
                Value::String(value)
            } else if let Ok(value) = row.try_get::<bool, _>(index) {
                Value::Bool(value)
            } else if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
                Value::String(String::from_utf8_lossy(&value).into_owned())
            } else {
                Value::Null
            };
            query_row.insert(column_name, value);
        }

        query_row
    }

    /// Get list of all tables
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows.iter().filter_map(|row| row.get_string("name")).collect())
    }

    /// Get table info
    pub async fn table_info(&mut self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .query(&format!("PRAGMA table_info(\"{}\")", table_name), &[])
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                cid: row.get_i64("cid").unwrap_or_default(),
                name: row.get_string("name").unwrap_or_default(),
                type_name: row.get_string("type").unwrap_or_default(),
                not_null: row.get_bool("notnull").unwrap_or(false),
                primary_key: row.get_bool("pk").unwrap_or(false),
            })
            .collect())
    }
}

/// Column information from PRAGMA table_info
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.connection()?;
        let result = Self::bind(sqlx::query(sql), params)
            .execute(conn)
            .await
            .map_err(|e| QueryError::execution(sql, e))?;
        self.last_insert_id = result.last_insert_rowid();
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.connection()?;
        let rows = Self::bind(sqlx::query(sql), params)
            .fetch_all(conn)
            .await
            .map_err(|e| QueryError::execution(sql, e))?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn last_insert_id(&mut self, _table: &str) -> Result<i64> {
        Ok(self.last_insert_id)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(QueryError::Transaction(
                "Already in transaction".to_string(),
            ));
        }

        self.execute("BEGIN TRANSACTION", &[]).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(QueryError::Transaction("Not in transaction".to_string()));
        }

        self.execute("COMMIT", &[]).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(QueryError::Transaction("Not in transaction".to_string()));
        }

        self.execute("ROLLBACK", &[]).await?;
        self.in_transaction = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn close(mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| QueryError::Connection(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_memory() {
        let backend = SqliteBackend::memory().await;
        assert!(backend.is_ok());
        assert!(backend.unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_sqlite_create_table() {
        let mut backend = SqliteBackend::memory().await.unwrap();

        backend
            .execute("CREATE TABLE \"Page\" (\"ID\" INTEGER PRIMARY KEY, \"Title\" TEXT NOT NULL)", &[])
            .await
            .unwrap();

        let tables = backend.list_tables().await.unwrap();
        assert!(tables.contains(&"Page".to_string()));

        let info = backend.table_info("Page").await.unwrap();
        assert_eq!(info.len(), 2);
        assert!(info[0].primary_key);
        assert_eq!(info[1].name, "Title");
        assert!(info[1].not_null);
    }

    #[tokio::test]
    async fn test_sqlite_bound_insert_and_query() {
        let mut backend = SqliteBackend::memory().await.unwrap();

        backend
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER, score REAL, active BOOLEAN)",
                &[],
            )
            .await
            .unwrap();

        backend
            .execute(
                "INSERT INTO users (name, age, score, active) VALUES (?, ?, ?, ?)",
                &[json!("Alice"), json!(30), json!(1.5), json!(true)],
            )
            .await
            .unwrap();
        assert_eq!(backend.last_insert_id("users").await.unwrap(), 1);

        backend
            .execute(
                "INSERT INTO users (name, age, score, active) VALUES (?, ?, ?, ?)",
                &[json!("Bob"), Value::Null, json!(2), json!(false)],
            )
            .await
            .unwrap();
        assert_eq!(backend.last_insert_id("users").await.unwrap(), 2);

        let results = backend
            .query("SELECT * FROM users WHERE id >= ? ORDER BY id", &[json!(1)])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get_string("name"), Some("Alice".to_string()));
        assert_eq!(results[0].get_i64("age"), Some(30));
        assert_eq!(results[0].get_f64("score"), Some(1.5));
        assert_eq!(results[0].get_bool("active"), Some(true));
        assert_eq!(results[1].get_value("age"), Some(&Value::Null));
        assert_eq!(results[1].get_bool("active"), Some(false));
    }

    #[tokio::test]
    async fn test_sqlite_transaction_rollback() {
        let mut backend = SqliteBackend::memory().await.unwrap();

        backend
            .execute("CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)", &[])
            .await
            .unwrap();
        backend
            .execute("INSERT INTO accounts (id, balance) VALUES (1, 100)", &[])
            .await
            .unwrap();

        backend.begin_transaction().await.unwrap();
        assert!(backend.begin_transaction().await.is_err());
        backend
            .execute("UPDATE accounts SET balance = ? WHERE id = 1", &[json!(0)])
            .await
            .unwrap();
        backend.rollback().await.unwrap();

        let results = backend
            .query("SELECT balance FROM accounts WHERE id = 1", &[])
            .await
            .unwrap();
        assert_eq!(results[0].get_i64("balance"), Some(100));
        assert!(backend.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_error_carries_statement() {
        let mut backend = SqliteBackend::memory().await.unwrap();
        let err = backend.query("SELECT * FROM missing", &[]).await.unwrap_err();
        match err {
            QueryError::Execution { statement, .. } => assert_eq!(statement, "SELECT * FROM missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sqlite_close() {
        let backend = SqliteBackend::memory().await.unwrap();
        backend.close().await.unwrap();
    }
}
