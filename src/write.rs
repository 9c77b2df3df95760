//! Compiling a record write into per-table manipulations.

use crate::backend::DatabaseBackend;
use crate::builder::{Condition, Dialect, InsertBuilder, SelectBuilder, UpdateBuilder};
use crate::catalog::SchemaCatalog;
use crate::context::CompilationContext;
use crate::error::{QueryError, Result};
use crate::record::Record;
use crate::schema::{CLASS_COLUMN, CREATED_COLUMN, ID_COLUMN, LAST_EDITED_COLUMN, VERSION_COLUMN};
use crate::versioning::{augment_write, VersionStamp, WriteActor};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// How a manipulation reaches its table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCommand {
    /// Insert a row carrying the record identity
    Insert,
    /// Update the row with the record identity, inserting it when missing
    Update,
    /// Insert a row with a generated identity (history tables)
    Append,
}

/// Pending write against one physical table
#[derive(Debug, Clone, PartialEq)]
pub struct Manipulation {
    pub class: String,
    pub table: String,
    pub command: WriteCommand,
    pub id: i64,
    pub fields: BTreeMap<String, Value>,
}

/// Per-write knobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Stage receiving the write; `None` for the default stage
    pub stage: Option<String>,
    pub stamp: VersionStamp,
    /// Write even when nothing changed
    pub force: bool,
}

impl WriteOptions {
    pub fn to_stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Default::default()
        }
    }
}

/// Split the record's changes over its owning tables, root first.
///
/// A new record writes every owning table: its base row already exists and
/// is updated, the others are inserted.
pub fn plan_manipulations(catalog: &SchemaCatalog, record: &Record, id: i64, is_new: bool) -> Result<Vec<Manipulation>> {
    let owning = catalog.ancestry_owning_tables(record.type_name())?;
    let mut manipulations = Vec::with_capacity(owning.len());

    for (depth, table_ref) in owning.iter().enumerate() {
        let own = catalog.own_fields(table_ref.class)?;
        let fields: BTreeMap<String, Value> = record
            .changed_fields()
            .filter(|(field, _)| own.contains_key(*field) && *field != ID_COLUMN && *field != VERSION_COLUMN)
            .map(|(field, _)| (field.to_string(), record.get(field).cloned().unwrap_or(Value::Null)))
            .collect();
        if fields.is_empty() && !is_new {
            continue;
        }
        let command = if is_new && depth > 0 {
            WriteCommand::Insert
        } else {
            WriteCommand::Update
        };
        manipulations.push(Manipulation {
            class: table_ref.class.to_string(),
            table: table_ref.table.to_string(),
            command,
            id,
            fields,
        });
    }
    Ok(manipulations)
}

/// Run one manipulation against the backend
pub async fn apply_manipulation<B: DatabaseBackend + ?Sized>(
    backend: &mut B,
    dialect: Dialect,
    manipulation: &Manipulation,
) -> Result<()> {
    debug!(
        table = %manipulation.table,
        id = manipulation.id,
        command = ?manipulation.command,
        fields = manipulation.fields.len(),
        "applying manipulation"
    );
    let fields = manipulation.fields.iter().map(|(k, v)| (k.as_str(), v.clone()));
    let statement = match manipulation.command {
        WriteCommand::Append => InsertBuilder::new(manipulation.table.as_str()).set_many(fields).build(dialect)?,
        WriteCommand::Insert => InsertBuilder::new(manipulation.table.as_str())
            .set(ID_COLUMN, Value::from(manipulation.id))
            .set_many(fields)
            .build(dialect)?,
        WriteCommand::Update => {
            let mut probe = SelectBuilder::new(dialect);
            probe
                .set_from(manipulation.table.as_str(), None)
                .select_field(dialect.column(&manipulation.table, ID_COLUMN), Some(ID_COLUMN))
                .add_where(Condition::eq(
                    dialect.column(&manipulation.table, ID_COLUMN),
                    Value::from(manipulation.id),
                ));
            let exists = !backend.query_compiled(&probe.compile()?).await?.is_empty();
            if !exists {
                InsertBuilder::new(manipulation.table.as_str())
                    .set(ID_COLUMN, Value::from(manipulation.id))
                    .set_many(fields)
                    .build(dialect)?
            } else if manipulation.fields.is_empty() {
                return Ok(());
            } else {
                UpdateBuilder::new(manipulation.table.as_str())
                    .set_many(fields)
                    .where_eq(ID_COLUMN, Value::from(manipulation.id))
                    .build(dialect)?
            }
        }
    };
    backend.execute_compiled(&statement).await?;
    Ok(())
}

/// Write `record` to its owning tables and return the version it now carries.
///
/// The caller owns transaction boundaries; validation happens before this is
/// reached.
pub async fn write_record<B: DatabaseBackend + ?Sized>(
    backend: &mut B,
    ctx: &CompilationContext,
    record: &mut Record,
    options: &WriteOptions,
    actor: WriteActor,
) -> Result<Option<i64>> {
    let catalog = ctx.catalog();
    let type_name = record.type_name().to_string();
    if !catalog.contains(&type_name) {
        return Err(QueryError::UnknownType(type_name));
    }
    let base_table = catalog.base_table(&type_name)?.to_string();
    let dialect = ctx.dialect();
    let stages = &ctx.config().stages;
    let stage = options.stage.clone().unwrap_or_else(|| stages.default_stage.clone());

    let now = Value::String(ctx.config().now());
    let is_new = record.is_new();
    record.set(LAST_EDITED_COLUMN, now.clone());
    let id = match record.id() {
        Some(id) => id,
        None => {
            record.set(CREATED_COLUMN, now.clone());
            record.set(CLASS_COLUMN, Value::String(type_name.clone()));
            let bare = InsertBuilder::new(base_table.as_str())
                .set(CREATED_COLUMN, now)
                .set(CLASS_COLUMN, Value::String(type_name.clone()))
                .build(dialect)?;
            backend.execute_compiled(&bare).await?;
            backend.last_insert_id(&base_table).await?
        }
    };

    let mut manipulations = plan_manipulations(catalog, record, id, is_new)?;
    let version = augment_write(
        backend,
        ctx,
        &type_name,
        id,
        &mut manipulations,
        options.stamp,
        &stage,
        actor,
    )
    .await?;

    for manipulation in &manipulations {
        apply_manipulation(backend, dialect, manipulation).await?;
    }

    if let Some(version) = version {
        record.set(VERSION_COLUMN, Value::from(version));
    }
    record.mark_written(id);
    debug!(type_name = %type_name, id, stage = %stage, ?version, "wrote record");
    Ok(version)
}
