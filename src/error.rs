use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// A single rule broken by a record, reported by a [`Validator`](crate::store::Validator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn on_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    #[error("Unknown field '{field}' on type {type_name}")]
    UnknownField { type_name: String, field: String },

    #[error("Unknown relation '{relation}' on type {type_name}")]
    UnknownRelation { type_name: String, relation: String },

    #[error("Ambiguous relation '{relation}' on type {type_name}: {candidates:?}")]
    AmbiguousRelation {
        type_name: String,
        relation: String,
        candidates: Vec<String>,
    },

    #[error("Table {table} is mapped by both {first} and {second}")]
    ConflictingTable {
        table: String,
        first: String,
        second: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Relation path '{path}' is not linear")]
    RelationNotLinear { path: String },

    #[error("Polymorphic relation '{path}' cannot be joined")]
    PolymorphicJoin { path: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation failed: {0:?}")]
    Validation(Vec<Violation>),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Execution failed for `{statement}`: {message}")]
    Execution { statement: String, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl QueryError {
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        QueryError::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    pub fn execution(statement: impl Into<String>, message: impl ToString) -> Self {
        QueryError::Execution {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// The request itself was structurally invalid (schema, compilation,
    /// validation or precondition failure); nothing was sent to the database.
    pub fn is_request_error(&self) -> bool {
        !self.is_database_error()
    }

    /// The database rejected a statement or the connection failed.
    pub fn is_database_error(&self) -> bool {
        match self {
            QueryError::Execution { .. } | QueryError::Connection(_) | QueryError::Transaction(_) => {
                true
            }
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            QueryError::Sqlx(_) => true,
            _ => false,
        }
    }
}
