use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, ValueRef};

/// PostgreSQL execution service over a single connection.
///
/// Identity columns must be `SERIAL`/`IDENTITY`; `last_insert_id` reads `lastval()`.
pub struct PostgresBackend {
    conn: Option<PgConnection>,
    in_transaction: bool,
}

impl PostgresBackend {
    pub async fn new(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url).await?;

        Ok(Self {
            conn: Some(conn),
            in_transaction: false,
        })
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| QueryError::Connection("connection is closed".to_string()))
    }

    fn bind<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.clone()),
            };
        }
        query
    }

    /// Convert PostgreSQL row to QueryRow
    fn convert_row(row: &PgRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for (index, column) in row.columns().iter().enumerate() {
            let column_name = column.name().to_string();

            let is_null = row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true);
            let value = if is_null {
                Value::Null
            } else if let Ok(value) = row.try_get::<String, _>(index) {
                Value::String(value)
            } else if let Ok(value) = row.try_get::<i64, _>(index) {
                Value::Number(value.into())
            } else if let Ok(value) = row.try_get::<i32, _>(index) {
                Value::Number(value.into())
            } else if let Ok(value) = row.try_get::<f64, _>(index) {
                serde_json::Number::from_f64(value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<bool, _>(index) {
                Value::Bool(value)
            } else if let Ok(value) = row.try_get::<Value, _>(index) {
                value
            } else {
                Value::Null
            };
            query_row.insert(column_name, value);
        }

        query_row
    }
}

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted text alone
pub fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut next = 1;
    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (None, '?') => {
                out.push('$');
                out.push_str(&next.to_string());
                next += 1;
            }
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let numbered = number_placeholders(sql);
        let conn = self.connection()?;
        let result = Self::bind(sqlx::query(&numbered), params)
            .execute(conn)
            .await
            .map_err(|e| QueryError::execution(sql, e))?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let numbered = number_placeholders(sql);
        let conn = self.connection()?;
        let rows = Self::bind(sqlx::query(&numbered), params)
            .fetch_all(conn)
            .await
            .map_err(|e| QueryError::execution(sql, e))?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn last_insert_id(&mut self, _table: &str) -> Result<i64> {
        let rows = self.query("SELECT lastval() AS \"ID\"", &[]).await?;
        rows.first()
            .and_then(|row| row.get_i64("ID"))
            .ok_or_else(|| QueryError::execution("SELECT lastval()", "no identity generated"))
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(QueryError::Transaction(
                "Already in transaction".to_string(),
            ));
        }

        self.execute("BEGIN", &[]).await?;
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
            conn.close().await?;
        }
        Ok(())
    }
}
