//! Stages, history tables and reading modes.
//!
//! A versioned hierarchy keeps its current draft in the unsuffixed owning
//! tables, one copy per additional stage in `<Table>_<Stage>`, and every
//! revision in `<Table>_versions`. Reading modes rewrite which of these a
//! compiled query targets; write augmentation fans a write into them.

use crate::backend::DatabaseBackend;
use crate::builder::{AggregateFunc, Condition, SelectBuilder};
use crate::catalog::SchemaCatalog;
use crate::config::{versions_table, StageSet};
use crate::context::CompilationContext;
use crate::error::{QueryError, Result};
use crate::record::Record;
use crate::schema::{ID_COLUMN, LAST_EDITED_COLUMN, VERSION_COLUMN};
use crate::write::{apply_manipulation, Manipulation, WriteCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const RECORD_ID_COLUMN: &str = "RecordID";
pub const WAS_PUBLISHED_COLUMN: &str = "WasPublished";
pub const AUTHOR_COLUMN: &str = "AuthorID";
pub const PUBLISHER_COLUMN: &str = "PublisherID";

const LATEST_ALIAS: &str = "LatestVersions";

/// Which physical tables a query reads
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadingMode {
    /// Unsuffixed draft tables
    #[default]
    DefaultStage,
    Stage(String),
    /// Latest revision of each record last edited at or before the date
    ArchiveAt(String),
    AllVersions,
    LatestVersions,
}

impl ReadingMode {
    pub fn stage(stage: impl Into<String>) -> Self {
        ReadingMode::Stage(stage.into())
    }

    pub fn archive_at(date: impl Into<String>) -> Self {
        ReadingMode::ArchiveAt(date.into())
    }

    /// Whether the mode reads `_versions` tables
    pub fn is_history(&self) -> bool {
        matches!(
            self,
            ReadingMode::ArchiveAt(_) | ReadingMode::AllVersions | ReadingMode::LatestVersions
        )
    }

    /// Stage targeted by the mode, the default stage standing for itself
    pub fn stage_name<'a>(&'a self, stages: &'a StageSet) -> Option<&'a str> {
        match self {
            ReadingMode::DefaultStage => Some(&stages.default_stage),
            ReadingMode::Stage(stage) => Some(stage),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingMode::DefaultStage => write!(f, "Default"),
            ReadingMode::Stage(stage) => write!(f, "Stage.{}", stage),
            ReadingMode::ArchiveAt(date) => write!(f, "Archive.{}", date),
            ReadingMode::AllVersions => write!(f, "AllVersions"),
            ReadingMode::LatestVersions => write!(f, "LatestVersions"),
        }
    }
}

impl FromStr for ReadingMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Default" => Ok(ReadingMode::DefaultStage),
            "AllVersions" => Ok(ReadingMode::AllVersions),
            "LatestVersions" => Ok(ReadingMode::LatestVersions),
            _ => {
                if let Some(stage) = s.strip_prefix("Stage.").filter(|r| !r.is_empty()) {
                    Ok(ReadingMode::Stage(stage.to_string()))
                } else if let Some(date) = s.strip_prefix("Archive.").filter(|r| !r.is_empty()) {
                    Ok(ReadingMode::ArchiveAt(date.to_string()))
                } else {
                    Err(QueryError::Query(format!("invalid reading mode '{}'", s)))
                }
            }
        }
    }
}

/// Version handling requested for one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersionStamp {
    /// Record a new history row with the next version number
    #[default]
    New,
    /// Reuse an existing version number without writing history
    Existing(i64),
    /// Write the stage tables only; not a new revision
    Skip,
}

impl VersionStamp {
    /// Interpret a raw version number: negative skips, zero creates
    pub fn from_raw(version: i64) -> Self {
        match version {
            v if v < 0 => VersionStamp::Skip,
            0 => VersionStamp::New,
            v => VersionStamp::Existing(v),
        }
    }
}

/// Rewrite `builder`'s physical tables for `mode`.
///
/// Only tables belonging to versioned hierarchies are touched; in history
/// modes only the hierarchy of `type_name` is redirected to `_versions`.
pub fn augment_query(
    builder: &mut SelectBuilder,
    catalog: &SchemaCatalog,
    stages: &StageSet,
    type_name: &str,
    mode: &ReadingMode,
    include_meta: bool,
) -> Result<()> {
    match mode {
        ReadingMode::DefaultStage => Ok(()),
        ReadingMode::Stage(stage) => {
            if !stages.contains(stage) {
                return Err(QueryError::Query(format!("unknown stage '{}'", stage)));
            }
            if stages.is_default(stage) {
                return Ok(());
            }
            for alias in builder.aliases() {
                let Some(table) = builder.table_for_alias(&alias).map(str::to_string) else {
                    continue;
                };
                let versioned = catalog
                    .type_for_table(&table)
                    .is_some_and(|owner| catalog.is_versioned(owner));
                if versioned {
                    builder.rename_table(&alias, stages.stage_table(&table, stage));
                }
            }
            Ok(())
        }
        ReadingMode::ArchiveAt(_) | ReadingMode::AllVersions | ReadingMode::LatestVersions => {
            augment_history_query(builder, catalog, type_name, mode, include_meta)
        }
    }
}

fn augment_history_query(
    builder: &mut SelectBuilder,
    catalog: &SchemaCatalog,
    type_name: &str,
    mode: &ReadingMode,
    include_meta: bool,
) -> Result<()> {
    if !catalog.is_versioned(type_name) {
        return Err(QueryError::Query(format!(
            "{} is not versioned and cannot be read in {} mode",
            type_name, mode
        )));
    }
    let dialect = builder.dialect();
    let base_type = catalog.base_type(type_name)?;
    let base_alias = builder
        .from_source()
        .map(|f| f.alias.clone())
        .ok_or_else(|| QueryError::Query("statement has no FROM table".to_string()))?;

    // relation joins are aliased by path and keep reading the draft tables
    let mut hierarchy = Vec::new();
    for alias in builder.aliases() {
        let Some(table) = builder.table_for_alias(&alias).map(str::to_string) else {
            continue;
        };
        let in_hierarchy = alias == table
            && catalog
                .type_for_table(&table)
                .and_then(|owner| catalog.base_type(owner).ok())
                .is_some_and(|base| base == base_type);
        if in_hierarchy {
            builder.rename_table(&alias, versions_table(&table));
            hierarchy.push(alias);
        }
    }

    for alias in &hierarchy {
        builder.replace_text(
            &dialect.column(alias, ID_COLUMN),
            &dialect.column(alias, RECORD_ID_COLUMN),
        );
    }

    let base_version = dialect.column(&base_alias, VERSION_COLUMN);
    for join in builder.joins_mut() {
        if join.source.alias == base_alias || !hierarchy.contains(&join.source.alias) {
            continue;
        }
        let version_match = Condition::raw(format!(
            "{} = {}",
            dialect.column(&join.source.alias, VERSION_COLUMN),
            base_version
        ));
        join.on_condition = Condition::all(vec![join.on_condition.clone(), version_match]);
    }

    if include_meta {
        for column in [RECORD_ID_COLUMN, VERSION_COLUMN, WAS_PUBLISHED_COLUMN, AUTHOR_COLUMN, PUBLISHER_COLUMN] {
            if !builder.has_select_alias(column) {
                builder.select_field(dialect.column(&base_alias, column), Some(column));
            }
        }
    }

    let base_table = builder
        .table_for_alias(&base_alias)
        .map(str::to_string)
        .unwrap_or_else(|| versions_table(&base_alias));
    let latest = |extra: &str| {
        format!(
            "{} = (SELECT {} FROM {} AS {} WHERE {} = {}{})",
            base_version,
            AggregateFunc::Max.to_sql(&dialect.column(LATEST_ALIAS, VERSION_COLUMN)),
            dialect.quote(&base_table),
            dialect.quote(LATEST_ALIAS),
            dialect.column(LATEST_ALIAS, RECORD_ID_COLUMN),
            dialect.column(&base_alias, RECORD_ID_COLUMN),
            extra
        )
    };
    match mode {
        ReadingMode::LatestVersions => {
            builder.add_where_raw(latest(""), vec![]);
        }
        ReadingMode::ArchiveAt(date) => {
            let extra = format!(" AND {} <= ?", dialect.column(LATEST_ALIAS, LAST_EDITED_COLUMN));
            builder.add_where_raw(latest(&extra), vec![Value::String(date.clone())]);
        }
        _ => {}
    }
    Ok(())
}

/// Who is writing and whether the write publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteActor {
    pub actor_id: Option<i64>,
    pub publishing: bool,
}

/// Fan a record write into history and stage tables.
///
/// `manipulations` must be the per-table plan for `type_name` in ancestry
/// order. Returns the version number the stage rows now carry, if any.
#[allow(clippy::too_many_arguments)]
pub async fn augment_write<B: DatabaseBackend + ?Sized>(
    backend: &mut B,
    ctx: &CompilationContext,
    type_name: &str,
    id: i64,
    manipulations: &mut Vec<Manipulation>,
    stamp: VersionStamp,
    stage: &str,
    actor: WriteActor,
) -> Result<Option<i64>> {
    let catalog = ctx.catalog();
    let stages = &ctx.config().stages;
    if !catalog.is_versioned(type_name) {
        return Ok(None);
    }
    if !stages.contains(stage) {
        return Err(QueryError::Query(format!("unknown stage '{}'", stage)));
    }
    let base_table = catalog.base_table(type_name)?.to_string();

    let version = match stamp {
        VersionStamp::Skip => None,
        VersionStamp::Existing(version) => Some(version),
        VersionStamp::New => {
            let owning = catalog.ancestry_owning_tables(type_name)?;
            let mut complete = Vec::with_capacity(owning.len());
            for table_ref in &owning {
                let existing = manipulations
                    .iter()
                    .position(|m| m.table == table_ref.table)
                    .map(|i| manipulations.remove(i));
                complete.push(existing.unwrap_or_else(|| Manipulation {
                    class: table_ref.class.to_string(),
                    table: table_ref.table.to_string(),
                    command: WriteCommand::Update,
                    id,
                    fields: BTreeMap::new(),
                }));
            }
            complete.append(manipulations);
            *manipulations = complete;

            let next = next_version(backend, ctx, &base_table, id).await?;
            for manipulation in manipulations.iter() {
                let row = history_row(backend, ctx, manipulation, stage, id, next, actor, manipulation.table == base_table)
                    .await?;
                let history = Manipulation {
                    class: manipulation.class.clone(),
                    table: versions_table(&manipulation.table),
                    command: WriteCommand::Append,
                    id,
                    fields: row,
                };
                debug!(table = %history.table, record_id = id, version = next, "recording history row");
                apply_manipulation(backend, ctx.dialect(), &history).await?;
            }
            Some(next)
        }
    };

    if let Some(version) = version {
        if let Some(base) = manipulations.iter_mut().find(|m| m.table == base_table) {
            base.fields.insert(VERSION_COLUMN.to_string(), Value::from(version));
        }
    }
    for manipulation in manipulations.iter_mut() {
        manipulation.table = stages.stage_table(&manipulation.table, stage);
    }
    Ok(version)
}

async fn next_version<B: DatabaseBackend + ?Sized>(
    backend: &mut B,
    ctx: &CompilationContext,
    base_table: &str,
    id: i64,
) -> Result<i64> {
    let dialect = ctx.dialect();
    let table = versions_table(base_table);
    let mut builder = SelectBuilder::new(dialect);
    builder
        .set_from(table.as_str(), None)
        .select_field(
            AggregateFunc::Max.to_sql(&dialect.column(&table, VERSION_COLUMN)),
            Some(VERSION_COLUMN),
        )
        .add_where(Condition::eq(dialect.column(&table, RECORD_ID_COLUMN), Value::from(id)));
    let rows = backend.query_compiled(&builder.compile()?).await?;
    let current = rows.first().and_then(|row| row.get_i64(VERSION_COLUMN)).unwrap_or(0);
    Ok(current + 1)
}

/// Current stage row overlaid with the pending changes, plus history bookkeeping
#[allow(clippy::too_many_arguments)]
async fn history_row<B: DatabaseBackend + ?Sized>(
    backend: &mut B,
    ctx: &CompilationContext,
    manipulation: &Manipulation,
    stage: &str,
    id: i64,
    version: i64,
    actor: WriteActor,
    is_base: bool,
) -> Result<BTreeMap<String, Value>> {
    let dialect = ctx.dialect();
    let table = ctx.config().stages.stage_table(&manipulation.table, stage);
    let mut builder = SelectBuilder::new(dialect);
    builder
        .set_from(table.as_str(), None)
        .select_field("*", None)
        .add_where(Condition::eq(dialect.column(&table, ID_COLUMN), Value::from(id)));
    let rows = backend.query_compiled(&builder.compile()?).await?;

    let mut fields: BTreeMap<String, Value> = rows
        .into_iter()
        .next()
        .map(|row| row.columns.into_iter().collect())
        .unwrap_or_default();
    fields.remove(ID_COLUMN);
    fields.remove(VERSION_COLUMN);
    fields.extend(
        manipulation
            .fields
            .iter()
            .filter(|(field, _)| field.as_str() != VERSION_COLUMN)
            .map(|(field, value)| (field.clone(), value.clone())),
    );

    let actor_id = Value::from(actor.actor_id.unwrap_or(0));
    fields.insert(RECORD_ID_COLUMN.to_string(), Value::from(id));
    fields.insert(VERSION_COLUMN.to_string(), Value::from(version));
    fields.insert(WAS_PUBLISHED_COLUMN.to_string(), Value::Bool(actor.publishing));
    if is_base {
        fields.insert(AUTHOR_COLUMN.to_string(), actor_id.clone());
        let publisher = if actor.publishing { actor_id } else { Value::from(0) };
        fields.insert(PUBLISHER_COLUMN.to_string(), publisher);
    }
    Ok(fields)
}

/// One field that differs between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

/// Field-by-field comparison of two versions of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordDiff {
    pub record_id: Option<i64>,
    pub from_version: Option<i64>,
    pub to_version: Option<i64>,
    pub changes: Vec<FieldChange>,
}

const DIFF_IGNORED: [&str; 7] = [
    ID_COLUMN,
    RECORD_ID_COLUMN,
    VERSION_COLUMN,
    WAS_PUBLISHED_COLUMN,
    AUTHOR_COLUMN,
    PUBLISHER_COLUMN,
    LAST_EDITED_COLUMN,
];

/// Compare two snapshots, ignoring history bookkeeping
pub fn diff_records(from: &Record, to: &Record) -> RecordDiff {
    let mut fields: Vec<&String> = from.values().keys().chain(to.values().keys()).collect();
    fields.sort();
    fields.dedup();

    let changes = fields
        .into_iter()
        .filter(|field| !DIFF_IGNORED.contains(&field.as_str()))
        .filter_map(|field| {
            let old = from.get(field).cloned().unwrap_or(Value::Null);
            let new = to.get(field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| FieldChange {
                field: field.clone(),
                from: old,
                to: new,
            })
        })
        .collect();

    RecordDiff {
        record_id: to.id().or(from.id()),
        from_version: from.version(),
        to_version: to.version(),
        changes,
    }
}

impl RecordDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.field.as_str())
    }

    /// Render each change with `formatter`, one line per field
    pub fn render(&self, formatter: &dyn DiffFormatter) -> String {
        self.changes
            .iter()
            .map(|change| formatter.format_change(change))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Presentation of a diff, supplied by the caller
pub trait DiffFormatter: Send + Sync {
    fn format_change(&self, change: &FieldChange) -> String;
}

/// `Field: old -> new`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDiffFormatter;

impl DiffFormatter for PlainDiffFormatter {
    fn format_change(&self, change: &FieldChange) -> String {
        fn show(value: &Value) -> String {
            match value {
                Value::String(s) => s.clone(),
                Value::Null => "(empty)".to_string(),
                other => other.to_string(),
            }
        }
        format!("{}: {} -> {}", change.field, show(&change.from), show(&change.to))
    }
}
