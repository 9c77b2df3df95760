//! staged-query - entity query compiler with staged, versioned writes
//!
//! staged-query maps a single-inheritance hierarchy of entity types onto
//! class-table-inheritance SQL, and keeps draft/live stages plus an
//! append-only history of every versioned record.
//!
//! # Architecture
//!
//! - **Schema Catalog**: entity type → owning tables, composite field expansion
//! - **Entity Query**: inheritance joins, collision CASEs, relation paths, sort aliases
//! - **Records**: per-field change tracking compiled into per-table manipulations
//! - **Versioning**: stage tables, `_versions` history, publish / rollback / compare
//! - **Backends**: SQLite and PostgreSQL through sqlx
//!
//! # Example
//!
//! ```rust,no_run
//! use staged_query::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let catalog = SchemaCatalog::build(vec![
//!         TypeDecl::new("Page").field("Title", FieldKind::String).versioned(),
//!         TypeDecl::new("NewsPage").extends("Page").field("Summary", FieldKind::String),
//!     ])?;
//!
//!     #[cfg(feature = "sqlite")]
//!     {
//!         let backend = SqliteBackend::memory().await?;
//!         let store = EntityStore::new(backend, catalog);
//!         store.initialize_schema().await?;
//!
//!         let mut page = Record::new("NewsPage");
//!         page.set("Title", json!("Launch")).set("Summary", json!("Soon"));
//!         store.write(&mut page).await?;
//!         store
//!             .publish(&page, PublishSource::Stage("Stage".into()), "Live", false)
//!             .await?;
//!
//!         let mut query = store.query("Page")?;
//!         query
//!             .mode(ReadingMode::stage("Live"))
//!             .filter("Title", ComparisonOp::Like, json!("La%"))?;
//!         println!("Live pages: {:?}", store.fetch(&query).await?);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! ```toml
//! [dependencies]
//! staged-query = { version = "0.1", features = ["postgres", "sqlite"] }
//! ```

pub mod backend;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod record;
pub mod relation;
pub mod schema;
pub mod store;
pub mod versioning;
pub mod write;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use builder::{
    AggregateFunc, CompiledQuery, ComparisonOp, Condition, DeleteBuilder, Dialect, InsertBuilder, JoinType,
    LogicalOp, SelectBuilder, SortDirection, UpdateBuilder,
};
pub use catalog::SchemaCatalog;
pub use config::{StageSet, StoreConfig};
pub use context::CompilationContext;
pub use error::{QueryError, Result, Violation};
pub use query::EntityQuery;
pub use record::{ChangeLevel, Record};
pub use relation::RelationStep;
pub use schema::{FieldKind, RelationDecl, TypeDecl};
pub use store::{ActorProvider, EntityStore, FixedActor, NoActor, PublishSource, Validator};
pub use versioning::{DiffFormatter, PlainDiffFormatter, ReadingMode, RecordDiff, VersionStamp};
pub use write::WriteOptions;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::builder::{AggregateFunc, ComparisonOp, Condition, JoinType, SortDirection};
    pub use crate::catalog::SchemaCatalog;
    pub use crate::config::{StageSet, StoreConfig};
    pub use crate::error::{QueryError, Result, Violation};
    pub use crate::query::EntityQuery;
    pub use crate::record::Record;
    pub use crate::schema::{FieldKind, TypeDecl};
    pub use crate::store::{ActorProvider, EntityStore, FixedActor, PublishSource};
    pub use crate::versioning::{ReadingMode, VersionStamp};
    pub use crate::write::WriteOptions;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PostgresBackend;

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteBackend;
}
