//! Orchestration of reads, writes and publishing against a backend.

use crate::backend::{DatabaseBackend, QueryResult};
use crate::builder::{
    AggregateFunc, CompiledQuery, ComparisonOp, Condition, DeleteBuilder, InsertBuilder, JoinType, SelectBuilder,
    SortDirection, UpdateBuilder,
};
use crate::catalog::SchemaCatalog;
use crate::config::{versions_table, StoreConfig};
use crate::context::CompilationContext;
use crate::error::{QueryError, Result, Violation};
use crate::query::EntityQuery;
use crate::record::Record;
use crate::relation::{many_many_link, remote_join_field, RELATION_JOIN_PRIORITY};
use crate::schema::{RelationDecl, ID_COLUMN, VERSION_COLUMN};
use crate::versioning::{
    diff_records, ReadingMode, RecordDiff, VersionStamp, WriteActor, PUBLISHER_COLUMN, RECORD_ID_COLUMN,
    WAS_PUBLISHED_COLUMN,
};
use crate::write::{write_record, WriteOptions};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Source of the acting member's identity for author/publisher stamps
pub trait ActorProvider: Send + Sync {
    fn current_actor_id(&self) -> Option<i64>;
}

/// No one is logged in; stamps are 0
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActor;

impl ActorProvider for NoActor {
    fn current_actor_id(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedActor(pub i64);

impl ActorProvider for FixedActor {
    fn current_actor_id(&self) -> Option<i64> {
        Some(self.0)
    }
}

/// Domain validation run before every write of a type or its subtypes
pub trait Validator: Send + Sync {
    fn validate(&self, record: &Record) -> Vec<Violation>;
}

impl<F> Validator for F
where
    F: Fn(&Record) -> Vec<Violation> + Send + Sync,
{
    fn validate(&self, record: &Record) -> Vec<Violation> {
        self(record)
    }
}

/// Where a publish reads the record from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishSource {
    Stage(String),
    Version(i64),
}

/// EntityStore runs compiled queries and record writes against one backend
pub struct EntityStore<B: DatabaseBackend> {
    backend: Arc<RwLock<B>>,
    ctx: Arc<CompilationContext>,
    actor: Arc<dyn ActorProvider>,
    validators: HashMap<String, Vec<Arc<dyn Validator>>>,
}

impl<B: DatabaseBackend> EntityStore<B> {
    pub fn new(backend: B, catalog: SchemaCatalog) -> Self {
        Self::with_config(backend, catalog, StoreConfig::default())
    }

    pub fn with_config(backend: B, catalog: SchemaCatalog, config: StoreConfig) -> Self {
        let dialect = backend.dialect();
        Self {
            backend: Arc::new(RwLock::new(backend)),
            ctx: Arc::new(CompilationContext::with_dialect(catalog, config, dialect)),
            actor: Arc::new(NoActor),
            validators: HashMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: impl ActorProvider + 'static) -> Self {
        self.actor = Arc::new(actor);
        self
    }

    /// Register a validator for `type_name` and its subtypes
    pub fn add_validator(&mut self, type_name: &str, validator: impl Validator + 'static) {
        self.validators
            .entry(type_name.to_string())
            .or_default()
            .push(Arc::new(validator));
    }

    pub fn context(&self) -> &CompilationContext {
        &self.ctx
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        self.ctx.catalog()
    }

    pub fn config(&self) -> &StoreConfig {
        self.ctx.config()
    }

    /// Create owning, stage, history and join tables
    pub async fn initialize_schema(&self) -> Result<()> {
        let ddl = self.catalog().generate_ddl(&self.config().stages, self.ctx.dialect());

        let mut backend = self.backend.write().await;

        for statement in ddl.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                backend.execute(statement, &[]).await?;
            }
        }

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.backend.read().await.is_connected()
    }

    /// Run raw SQL
    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut backend = self.backend.write().await;
        backend.query(sql, params).await
    }

    pub async fn raw_execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut backend = self.backend.write().await;
        backend.execute(sql, params).await
    }

    async fn begin(&self, backend: &mut B) -> Result<()> {
        if self.config().use_transactions {
            backend.begin_transaction().await?;
        }
        Ok(())
    }

    async fn finish<T>(&self, backend: &mut B, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if self.config().use_transactions {
                    backend.commit().await?;
                }
                Ok(value)
            }
            Err(e) => {
                if self.config().use_transactions {
                    backend.rollback().await?;
                }
                Err(e)
            }
        }
    }

    fn actor(&self, publishing: bool) -> WriteActor {
        WriteActor {
            actor_id: self.actor.current_actor_id(),
            publishing,
        }
    }

    // ---- reading ----

    /// Start a query for `type_name` and its subtypes
    pub fn query(&self, type_name: &str) -> Result<EntityQuery<'_>> {
        EntityQuery::new(&self.ctx, type_name)
    }

    pub async fn fetch(&self, query: &EntityQuery<'_>) -> Result<Vec<Record>> {
        let mut backend = self.backend.write().await;
        self.fetch_in(&mut backend, query).await
    }

    /// Fetch on an already locked backend, inside its current transaction
    async fn fetch_in(&self, backend: &mut B, query: &EntityQuery<'_>) -> Result<Vec<Record>> {
        let compiled = query.compile()?;
        let rows = backend.query_compiled(&compiled).await?;
        rows.iter()
            .map(|row| Record::hydrate(self.catalog(), query.type_name(), row))
            .collect()
    }

    pub async fn fetch_one(&self, query: &EntityQuery<'_>) -> Result<Option<Record>> {
        let mut query = query.clone();
        query.limit(Some(1), None);
        Ok(self.fetch(&query).await?.into_iter().next())
    }

    pub async fn count(&self, query: &EntityQuery<'_>) -> Result<i64> {
        let compiled = query.count_query()?;
        let mut backend = self.backend.write().await;
        let rows = backend.query_compiled(&compiled).await?;
        Ok(rows.first().and_then(|row| row.get_i64("Count")).unwrap_or(0))
    }

    pub async fn aggregate(&self, query: &EntityQuery<'_>, func: AggregateFunc, field: &str) -> Result<Value> {
        let compiled = query.aggregate_query(func, field)?;
        let mut backend = self.backend.write().await;
        let rows = backend.query_compiled(&compiled).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_value("Aggregate").cloned())
            .unwrap_or(Value::Null))
    }

    /// Values of one field across the matching rows
    pub async fn column(&self, query: &EntityQuery<'_>, field: &str) -> Result<Vec<Value>> {
        let compiled = query.column_query(field)?;
        let alias = field.rsplit('.').next().unwrap_or(field);
        let mut backend = self.backend.write().await;
        let rows = backend.query_compiled(&compiled).await?;
        Ok(rows
            .iter()
            .map(|row| row.get_value(alias).cloned().unwrap_or(Value::Null))
            .collect())
    }

    pub async fn get_by_id(&self, type_name: &str, id: i64, mode: ReadingMode) -> Result<Option<Record>> {
        let mut query = self.query(type_name)?;
        query.mode(mode).filter_id(id);
        self.fetch_one(&query).await
    }

    /// Fetch columns of the record's type that the original query did not select
    pub async fn load_lazy_fields(&self, record: &mut Record) -> Result<()> {
        let Some(id) = record.id() else {
            return Ok(());
        };
        let missing: Vec<String> = self
            .catalog()
            .all_fields(record.type_name(), true)?
            .keys()
            .filter(|field| record.get(field).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut query = self.query(record.type_name())?;
        query.columns(missing)?.filter_id(id);
        if let Some(loaded) = self.fetch_one(&query).await? {
            record.merge_loaded(loaded.values().clone());
        }
        Ok(())
    }

    // ---- writing ----

    pub async fn write(&self, record: &mut Record) -> Result<Option<i64>> {
        self.write_with(record, WriteOptions::default()).await
    }

    /// Validate and write `record`, returning the version its stage rows carry
    pub async fn write_with(&self, record: &mut Record, options: WriteOptions) -> Result<Option<i64>> {
        self.validate(record)?;
        if !record.is_new() && !record.is_dirty() && !options.force {
            debug!(type_name = %record.type_name(), id = ?record.id(), "skipping write of unchanged record");
            return Ok(record.version());
        }
        self.persist(record, options, false).await
    }

    fn validate(&self, record: &Record) -> Result<()> {
        let mut violations = Vec::new();
        for type_name in self.catalog().ancestry(record.type_name())? {
            for validator in self.validators.get(type_name).into_iter().flatten() {
                violations.extend(validator.validate(record));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(QueryError::Validation(violations))
        }
    }

    async fn persist(&self, record: &mut Record, options: WriteOptions, publishing: bool) -> Result<Option<i64>> {
        if options.force {
            record.force_change(self.catalog())?;
        }
        let actor = self.actor(publishing);
        let mut backend = self.backend.write().await;
        self.begin(&mut backend).await?;
        let result = write_record(&mut *backend, &self.ctx, record, &options, actor).await;
        let version = self.finish(&mut backend, result).await?;
        drop(backend);
        self.ctx.reset_versions();
        Ok(version)
    }

    /// Delete the record's rows from every owning table read by `mode`
    pub async fn delete(&self, record: &Record, mode: &ReadingMode) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| QueryError::Precondition("cannot delete a record without an ID".to_string()))?;
        let stages = &self.config().stages;
        let stage = mode.stage_name(stages).ok_or_else(|| {
            QueryError::Precondition(format!("cannot delete in {} mode; history is immutable", mode))
        })?;
        if !stages.contains(stage) {
            return Err(QueryError::Query(format!("unknown stage '{}'", stage)));
        }

        let catalog = self.catalog();
        let versioned = catalog.is_versioned(record.type_name());
        let dialect = self.ctx.dialect();
        let mut statements = Vec::new();
        for table_ref in catalog.ancestry_owning_tables(record.type_name())? {
            let table = if versioned {
                stages.stage_table(table_ref.table, stage)
            } else {
                table_ref.table.to_string()
            };
            statements.push(DeleteBuilder::new(table).where_eq(ID_COLUMN, Value::from(id)).build(dialect)?);
        }

        let mut backend = self.backend.write().await;
        self.begin(&mut backend).await?;
        let mut result = Ok(());
        for statement in &statements {
            if let Err(e) = backend.execute_compiled(statement).await {
                result = Err(e);
                break;
            }
        }
        self.finish(&mut backend, result).await?;
        drop(backend);
        self.ctx.reset_versions();
        info!(type_name = %record.type_name(), id, stage, "deleted record");
        Ok(())
    }

    pub async fn delete_from_stage(&self, record: &Record, stage: &str) -> Result<()> {
        self.delete(record, &ReadingMode::stage(stage)).await
    }

    // ---- versioning ----

    /// Copy the record from `from` into stage `to`.
    ///
    /// Returns `false` when the source has no such record. Publishing does
    /// not run validators.
    pub async fn publish(&self, record: &Record, from: PublishSource, to: &str, create_new_version: bool) -> Result<bool> {
        let id = record
            .id()
            .ok_or_else(|| QueryError::Precondition("cannot publish a record without an ID".to_string()))?;
        let type_name = record.type_name();
        if !self.catalog().is_versioned(type_name) {
            return Err(QueryError::Precondition(format!("{} is not versioned", type_name)));
        }
        let stages = &self.config().stages;
        if !stages.contains(to) {
            return Err(QueryError::Query(format!("unknown stage '{}'", to)));
        }

        let source = match &from {
            PublishSource::Stage(stage) => self.get_by_id(type_name, id, ReadingMode::stage(stage.clone())).await?,
            PublishSource::Version(version) => self.get_version(type_name, id, *version).await?,
        };
        let Some(mut copy) = source else {
            return Ok(false);
        };
        let from_version = copy.version();
        copy.strip_history_columns();

        let stamp = match (create_new_version, from_version) {
            (false, Some(version)) => VersionStamp::Existing(version),
            _ => VersionStamp::New,
        };
        let options = WriteOptions {
            stage: Some(to.to_string()),
            stamp,
            force: true,
        };
        let publishing = create_new_version && !stages.is_default(to);
        let flag_existing = match stamp {
            VersionStamp::Existing(version) if !stages.is_default(to) => Some(version),
            _ => None,
        };
        copy.force_change(self.catalog())?;

        let mut backend = self.backend.write().await;
        self.begin(&mut backend).await?;
        let result = self
            .publish_in(&mut backend, &mut copy, &options, publishing, flag_existing)
            .await;
        let version = self.finish(&mut backend, result).await?;
        drop(backend);
        self.ctx.reset_versions();
        info!(type_name = %type_name, id, from = ?from, to, ?version, "published record");
        Ok(true)
    }

    /// Stage write plus, when an existing version was reused, its history flag
    async fn publish_in(
        &self,
        backend: &mut B,
        copy: &mut Record,
        options: &WriteOptions,
        publishing: bool,
        flag_existing: Option<i64>,
    ) -> Result<Option<i64>> {
        let version = write_record(backend, &self.ctx, copy, options, self.actor(publishing)).await?;
        if let (Some(existing), Some(id)) = (flag_existing, copy.id()) {
            let statement = self.mark_published(copy.type_name(), id, existing)?;
            backend.execute_compiled(&statement).await?;
        }
        Ok(version)
    }

    fn mark_published(&self, type_name: &str, id: i64, version: i64) -> Result<CompiledQuery> {
        let table = versions_table(self.catalog().base_table(type_name)?);
        let publisher = self.actor.current_actor_id().unwrap_or(0);
        UpdateBuilder::new(table)
            .set(WAS_PUBLISHED_COLUMN, Value::Bool(true))
            .set(PUBLISHER_COLUMN, Value::from(publisher))
            .where_eq(RECORD_ID_COLUMN, Value::from(id))
            .where_eq(VERSION_COLUMN, Value::from(version))
            .build(self.ctx.dialect())
    }

    /// Make the draft equal to historical `version`, recorded as a new version.
    ///
    /// The republish and the draft rewrite commit together.
    pub async fn rollback(&self, record: &mut Record, version: i64) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| QueryError::Precondition("cannot roll back a record without an ID".to_string()))?;
        let type_name = record.type_name().to_string();
        if !self.catalog().is_versioned(&type_name) {
            return Err(QueryError::Precondition(format!("{} is not versioned", type_name)));
        }
        let mut copy = self
            .get_version(&type_name, id, version)
            .await?
            .ok_or_else(|| {
                QueryError::Precondition(format!("version {} of {} #{} does not exist", version, type_name, id))
            })?;
        copy.strip_history_columns();
        copy.force_change(self.catalog())?;

        let mut reload = self.query(&type_name)?;
        reload.filter_id(id).limit(Some(1), None);

        let mut backend = self.backend.write().await;
        self.begin(&mut backend).await?;
        let result = self.rollback_in(&mut backend, &mut copy, &reload).await;
        let current = self.finish(&mut backend, result).await?;
        drop(backend);
        self.ctx.reset_versions();
        *record = current;
        info!(type_name = %type_name, id, version, "rolled back record");
        Ok(())
    }

    async fn rollback_in(&self, backend: &mut B, copy: &mut Record, reload: &EntityQuery<'_>) -> Result<Record> {
        let republish = WriteOptions {
            stamp: VersionStamp::New,
            force: true,
            ..Default::default()
        };
        write_record(backend, &self.ctx, copy, &republish, self.actor(false)).await?;

        let mut current = self
            .fetch_in(backend, reload)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Precondition(format!("{} vanished during rollback", copy.type_name())))?;
        current.force_change(self.catalog())?;
        let rewrite = WriteOptions {
            stamp: VersionStamp::Skip,
            force: true,
            ..Default::default()
        };
        write_record(backend, &self.ctx, &mut current, &rewrite, self.actor(false)).await?;
        Ok(current)
    }

    /// One historical snapshot of a record
    pub async fn get_version(&self, type_name: &str, id: i64, version: i64) -> Result<Option<Record>> {
        let mut query = self.query(type_name)?;
        query
            .mode(ReadingMode::AllVersions)
            .filter_id(id)
            .filter(VERSION_COLUMN, ComparisonOp::Eq, Value::from(version))?;
        self.fetch_one(&query).await
    }

    /// Every snapshot of a record, newest first
    pub async fn all_versions(&self, type_name: &str, id: i64) -> Result<Vec<Record>> {
        let mut query = self.query(type_name)?;
        query
            .mode(ReadingMode::AllVersions)
            .filter_id(id)
            .sort(VERSION_COLUMN, SortDirection::Desc)?;
        self.fetch(&query).await
    }

    /// Diff two snapshots of a record
    pub async fn compare_versions(&self, type_name: &str, id: i64, from: i64, to: i64) -> Result<RecordDiff> {
        let missing = |version: i64| QueryError::Precondition(format!("version {} of {} #{} does not exist", version, type_name, id));
        let older = self.get_version(type_name, id, from).await?.ok_or_else(|| missing(from))?;
        let newer = self.get_version(type_name, id, to).await?.ok_or_else(|| missing(to))?;
        Ok(diff_records(&older, &newer))
    }

    /// Version number the record carries in `stage`, `None` when absent there
    pub async fn version_number_by_stage(&self, type_name: &str, id: i64, stage: &str) -> Result<Option<i64>> {
        let stages = &self.config().stages;
        if !stages.contains(stage) {
            return Err(QueryError::Query(format!("unknown stage '{}'", stage)));
        }
        let base_table = self.catalog().base_table(type_name)?;
        let key = (base_table.to_string(), stage.to_string(), id);
        if let Some(cached) = self.ctx.cached_version(&key) {
            return Ok(cached);
        }

        let table = stages.stage_table(base_table, stage);
        let dialect = self.ctx.dialect();
        let mut builder = SelectBuilder::new(dialect);
        builder
            .set_from(table.as_str(), None)
            .select_field(dialect.column(&table, VERSION_COLUMN), Some(VERSION_COLUMN))
            .add_where(Condition::eq(dialect.column(&table, ID_COLUMN), Value::from(id)));
        let rows = {
            let mut backend = self.backend.write().await;
            backend.query_compiled(&builder.compile()?).await?
        };
        let version = rows.first().map(|row| row.get_i64(VERSION_COLUMN).unwrap_or(0));
        self.ctx.cache_version(key, version);
        Ok(version)
    }

    pub async fn is_published(&self, record: &Record) -> Result<bool> {
        let Some(id) = record.id() else {
            return Ok(false);
        };
        let live = self.config().stages.live_stage.clone();
        Ok(self.version_number_by_stage(record.type_name(), id, &live).await?.is_some())
    }

    /// Whether two stages hold different versions of the record
    pub async fn stages_differ(&self, record: &Record, first: &str, second: &str) -> Result<bool> {
        let Some(id) = record.id() else {
            return Ok(false);
        };
        let a = self.version_number_by_stage(record.type_name(), id, first).await?;
        let b = self.version_number_by_stage(record.type_name(), id, second).await?;
        Ok(a != b)
    }

    // ---- relations ----

    /// The record a to-one relation points at, memoized on the record
    pub async fn get_component(&self, record: &mut Record, relation: &str) -> Result<Option<Record>> {
        if let Some(cached) = record.cached_component(relation) {
            return Ok(cached.cloned());
        }
        let catalog = self.catalog();
        let (declaring, decl) = catalog
            .relation(record.type_name(), relation)
            .ok_or_else(|| QueryError::UnknownRelation {
                type_name: record.type_name().to_string(),
                relation: relation.to_string(),
            })?;

        let component = match decl {
            RelationDecl::HasOne { name, target } => {
                let foreign_id = record.get_i64(&format!("{}ID", name)).filter(|id| *id > 0);
                let target = match target {
                    Some(target) => Some(target.clone()),
                    None => record.get_str(&format!("{}Class", name)).map(str::to_string),
                };
                match (foreign_id, target) {
                    (Some(foreign_id), Some(target)) if catalog.contains(&target) => {
                        self.get_by_id(&target, foreign_id, ReadingMode::DefaultStage).await?
                    }
                    _ => None,
                }
            }
            RelationDecl::BelongsTo { name, target, inverse } => match record.id() {
                Some(id) => {
                    let remote = remote_join_field(catalog, declaring, name, target, inverse.as_deref())?;
                    let mut query = self.query(target)?;
                    query.filter(&remote.column, ComparisonOp::Eq, Value::from(id))?;
                    self.fetch_one(&query).await?
                }
                None => None,
            },
            _ => {
                return Err(QueryError::RelationNotLinear {
                    path: relation.to_string(),
                })
            }
        };

        record.cache_component(relation, component.clone());
        Ok(component)
    }

    /// Records on the far side of a to-many relation
    pub async fn get_components(&self, record: &Record, relation: &str) -> Result<Vec<Record>> {
        let catalog = self.catalog();
        let (declaring, decl) = catalog
            .relation(record.type_name(), relation)
            .ok_or_else(|| QueryError::UnknownRelation {
                type_name: record.type_name().to_string(),
                relation: relation.to_string(),
            })?;
        let Some(id) = record.id() else {
            return Ok(Vec::new());
        };

        match decl {
            RelationDecl::HasMany { name, target, inverse } | RelationDecl::BelongsTo { name, target, inverse } => {
                let remote = remote_join_field(catalog, declaring, name, target, inverse.as_deref())?;
                let mut query = self.query(target)?;
                query.filter(&remote.column, ComparisonOp::Eq, Value::from(id))?;
                if let Some(class_column) = &remote.class_column {
                    query.filter(class_column, ComparisonOp::Eq, Value::String(record.type_name().to_string()))?;
                }
                self.fetch(&query).await
            }
            RelationDecl::ManyMany { .. } | RelationDecl::BelongsManyMany { .. } => {
                let link = many_many_link(catalog, record.type_name(), relation)?;
                let dialect = self.ctx.dialect();
                let target_table = catalog.base_table(&link.target)?;
                let mut query = self.query(&link.target)?;
                query
                    .join(
                        JoinType::Inner,
                        &link.join.table,
                        Condition::raw(format!(
                            "{} = {}",
                            dialect.column(&link.join.table, &link.remote_field),
                            dialect.column(target_table, ID_COLUMN)
                        )),
                        RELATION_JOIN_PRIORITY,
                    )
                    .where_raw(
                        format!("{} = ?", dialect.column(&link.join.table, &link.local_field)),
                        vec![Value::from(id)],
                    );
                self.fetch(&query).await
            }
            RelationDecl::HasOne { .. } => Err(QueryError::Query(format!(
                "{} is a to-one relation; use get_component",
                relation
            ))),
        }
    }

    /// Link `target_id` to the record through a many-many relation
    pub async fn attach(&self, record: &Record, relation: &str, target_id: i64) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| QueryError::Precondition(format!("cannot attach {} before the record has an ID", relation)))?;
        let link = many_many_link(self.catalog(), record.type_name(), relation)?;
        let dialect = self.ctx.dialect();

        let mut probe = SelectBuilder::new(dialect);
        probe
            .set_from(link.join.table.as_str(), None)
            .select_field(dialect.column(&link.join.table, ID_COLUMN), Some(ID_COLUMN))
            .add_where(Condition::eq(dialect.column(&link.join.table, &link.local_field), Value::from(id)))
            .add_where(Condition::eq(dialect.column(&link.join.table, &link.remote_field), Value::from(target_id)));
        let insert = InsertBuilder::new(link.join.table.as_str())
            .set(link.local_field.as_str(), Value::from(id))
            .set(link.remote_field.as_str(), Value::from(target_id))
            .build(dialect)?;

        let mut backend = self.backend.write().await;
        if backend.query_compiled(&probe.compile()?).await?.is_empty() {
            backend.execute_compiled(&insert).await?;
        }
        Ok(())
    }

    pub async fn detach(&self, record: &Record, relation: &str, target_id: i64) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| QueryError::Precondition(format!("cannot detach {} before the record has an ID", relation)))?;
        let link = many_many_link(self.catalog(), record.type_name(), relation)?;
        let statement = DeleteBuilder::new(link.join.table.as_str())
            .where_eq(link.local_field.as_str(), Value::from(id))
            .where_eq(link.remote_field.as_str(), Value::from(target_id))
            .build(self.ctx.dialect())?;
        let mut backend = self.backend.write().await;
        backend.execute_compiled(&statement).await?;
        Ok(())
    }
}
