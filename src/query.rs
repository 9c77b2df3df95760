//! Entity query compiler.
//!
//! An [`EntityQuery`] accumulates filters, sorts, limits and relation joins
//! against one entity type. [`EntityQuery::finalize`] turns that state into a
//! [`SelectBuilder`] spanning the inheritance chain:
//!
//! 1. the base table is the anchor;
//! 2. ancestor tables are left-joined on the base identity (all of them, or
//!    only those owning a requested column);
//! 3. each joined table contributes its own columns, with same-named columns
//!    from several tables folded into one discriminator-keyed `CASE`;
//! 4. subtype queries are restricted to the type's subtree;
//! 5. `ID` and `RecordClassName` are always selected;
//! 6. order-by expressions missing from the select list get a synthetic alias.
//!
//! The reading mode is applied last, so stage and history rewriting see the
//! complete statement.

use crate::builder::{
    sql_literal, AggregateFunc, CompiledQuery, ComparisonOp, Condition, Dialect, JoinType, OrderBy,
    SelectBuilder, SelectItem, SortDirection,
};
use crate::context::CompilationContext;
use crate::error::{QueryError, Result};
use crate::relation::{self, RelationStep};
use crate::schema::{CLASS_COLUMN, CREATED_COLUMN, ID_COLUMN, LAST_EDITED_COLUMN, VERSION_COLUMN};
use crate::versioning::{augment_query, ReadingMode};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Join priority of ancestor and descendant tables
pub const INHERITANCE_JOIN_PRIORITY: i32 = 10;

/// Alias of the effective type name used for hydration
pub const RECORD_CLASS_ALIAS: &str = "RecordClassName";

const SORT_ALIAS_PREFIX: &str = "_SortColumn";
const AGGREGATE_VALUE_ALIAS: &str = "AggregateValue";
const AGGREGATE_SOURCE_ALIAS: &str = "AggregateSource";

struct ResolvedColumn {
    column: String,
    /// Reached through a to-many relation
    fans_out: bool,
}

/// One table able to supply a collided column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionCandidate {
    /// Qualified column reference
    pub expression: String,
    /// Discriminator values for which this table's value applies
    pub classes: Vec<String>,
}

/// `CASE WHEN <discriminator> IN (...) THEN <column> ... ELSE NULL END`.
///
/// Candidates are tried in the given order, so the most-derived table must
/// come first.
pub fn collision_expression(discriminator: &str, candidates: &[CollisionCandidate]) -> String {
    let mut sql = String::from("CASE");
    for candidate in candidates.iter().filter(|c| !c.classes.is_empty()) {
        let classes = candidate
            .classes
            .iter()
            .map(|c| sql_literal(&Value::String(c.clone())))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " WHEN {} IN ({}) THEN {}",
            discriminator, classes, candidate.expression
        ));
    }
    sql.push_str(" ELSE NULL END");
    sql
}

fn parse_sort(spec: &str) -> Result<Vec<(String, SortDirection)>> {
    let mut sorts = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut words = part.split_whitespace();
        let field = words.next().unwrap_or_default().trim_matches('"').to_string();
        let direction = match words.next().map(str::to_ascii_uppercase).as_deref() {
            None | Some("ASC") => SortDirection::Asc,
            Some("DESC") => SortDirection::Desc,
            Some(other) => {
                return Err(QueryError::Query(format!("invalid sort direction '{}' in '{}'", other, spec)))
            }
        };
        sorts.push((field, direction));
    }
    Ok(sorts)
}

#[derive(Debug, Clone)]
pub struct EntityQuery<'a> {
    ctx: &'a CompilationContext,
    type_name: String,
    mode: ReadingMode,
    builder: SelectBuilder,
    requested: Option<BTreeSet<String>>,
    required: BTreeSet<String>,
    skip_default_sort: bool,
}

impl<'a> EntityQuery<'a> {
    pub fn new(ctx: &'a CompilationContext, type_name: &str) -> Result<Self> {
        let base_table = ctx.catalog().base_table(type_name)?;
        let mut builder = SelectBuilder::new(ctx.dialect());
        builder.set_from(base_table, None);
        Ok(Self {
            ctx,
            type_name: type_name.to_string(),
            mode: ReadingMode::DefaultStage,
            builder,
            requested: None,
            required: BTreeSet::new(),
            skip_default_sort: false,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn reading_mode(&self) -> &ReadingMode {
        &self.mode
    }

    pub fn mode(&mut self, mode: ReadingMode) -> &mut Self {
        self.mode = mode;
        self
    }

    fn dialect(&self) -> Dialect {
        self.builder.dialect()
    }

    /// Type and table physically storing `field` for `type_name`
    fn column_owner(&self, type_name: &str, field: &str) -> Result<(String, String)> {
        let catalog = self.ctx.catalog();
        if field == ID_COLUMN {
            return Ok((
                catalog.base_type(type_name)?.to_string(),
                catalog.base_table(type_name)?.to_string(),
            ));
        }
        let class = catalog
            .class_for_field(type_name, field)
            .filter(|class| {
                catalog
                    .own_fields(class)
                    .map(|own| own.contains_key(field))
                    .unwrap_or(false)
            })
            .ok_or_else(|| QueryError::unknown_field(type_name, field))?;
        let table = catalog
            .table_for(class)
            .ok_or_else(|| QueryError::Schema(format!("{} stores {} but owns no table", class, field)))?;
        Ok((class.to_string(), table.to_string()))
    }

    /// Resolve `Field` or `Relation.Path.Field` to a qualified column,
    /// joining any relations on the way. Relation columns are qualified by
    /// the alias of their path, never by the bare table.
    fn resolve_column(&mut self, path: &str, linear_only: bool) -> Result<ResolvedColumn> {
        let ctx = self.ctx;
        let Some((relations, field)) = path.rsplit_once('.') else {
            let (class, table) = self.column_owner(&self.type_name, path)?;
            self.required.insert(class);
            return Ok(ResolvedColumn {
                column: self.dialect().column(&table, path),
                fans_out: false,
            });
        };
        let step = relation::apply_relation_path(
            ctx.catalog(),
            &mut self.builder,
            &self.type_name,
            relations,
            linear_only,
        )?;
        self.required.insert(step.declaring.clone());
        let (_, table) = self.column_owner(&step.target, field)?;
        Ok(ResolvedColumn {
            column: self.dialect().column(&step.alias_for(&table), field),
            fans_out: !step.linear,
        })
    }

    /// Resolve a filter column. A to-many join repeats the anchor row once
    /// per related row, so the statement turns DISTINCT.
    fn filter_column(&mut self, path: &str) -> Result<String> {
        let resolved = self.resolve_column(path, false)?;
        if resolved.fans_out {
            self.builder.set_distinct(true);
        }
        Ok(resolved.column)
    }

    pub fn filter(&mut self, path: &str, op: ComparisonOp, value: Value) -> Result<&mut Self> {
        let column = self.filter_column(path)?;
        self.builder.add_where(Condition::simple(column, op, value));
        Ok(self)
    }

    /// OR-group of `(path, op, value)` predicates; an empty group matches nothing
    pub fn filter_any(&mut self, filters: Vec<(&str, ComparisonOp, Value)>) -> Result<&mut Self> {
        let mut conditions = Vec::with_capacity(filters.len());
        for (path, op, value) in filters {
            let column = self.filter_column(path)?;
            conditions.push(Condition::simple(column, op, value));
        }
        self.builder.add_where_any(conditions);
        Ok(self)
    }

    pub fn exclude(&mut self, path: &str, op: ComparisonOp, value: Value) -> Result<&mut Self> {
        let column = self.filter_column(path)?;
        self.builder
            .add_where(Condition::Not(Box::new(Condition::simple(column, op, value))));
        Ok(self)
    }

    pub fn where_raw(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.builder.add_where_raw(sql, params);
        self
    }

    pub fn filter_id(&mut self, id: i64) -> &mut Self {
        let column = self.dialect().column(self.builder_base(), ID_COLUMN);
        self.builder.add_where(Condition::eq(column, Value::from(id)));
        self
    }

    fn builder_base(&self) -> &str {
        self.builder
            .from_source()
            .map(|from| from.alias.as_str())
            .unwrap_or_default()
    }

    /// Sort by a field or a to-one relation path
    pub fn sort(&mut self, path: &str, direction: SortDirection) -> Result<&mut Self> {
        let column = self.resolve_column(path, true)?.column;
        self.builder.add_order_by(column, direction);
        Ok(self)
    }

    /// Drop every sort, including the type's default sort
    pub fn clear_sort(&mut self) -> &mut Self {
        self.builder.set_order_by(Vec::new());
        self.skip_default_sort = true;
        self
    }

    pub fn limit(&mut self, limit: Option<usize>, offset: Option<usize>) -> &mut Self {
        self.builder.set_limit(limit, offset);
        self
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.builder.set_distinct(distinct);
        self
    }

    /// Explicit join; the table name doubles as its alias
    pub fn join(&mut self, join_type: JoinType, table: &str, on: Condition, priority: i32) -> &mut Self {
        self.builder.add_join(join_type, table, None, on, priority);
        self
    }

    /// Join a dotted relation path, returning the final step. The target's
    /// tables are joined under [`RelationStep::alias_for`].
    pub fn apply_relation(&mut self, path: &str) -> Result<RelationStep> {
        let ctx = self.ctx;
        let step = relation::apply_relation_path(ctx.catalog(), &mut self.builder, &self.type_name, path, false)?;
        if !step.linear {
            self.builder.set_distinct(true);
        }
        self.required.insert(step.declaring.clone());
        Ok(step)
    }

    /// Restrict selection to `columns`, joining only the tables that own them.
    /// Columns may belong to the type, an ancestor or a descendant.
    pub fn columns<I, S>(&mut self, columns: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ctx = self.ctx;
        let catalog = ctx.catalog();
        let mut known: BTreeSet<String> = catalog
            .all_fields(&self.type_name, true)?
            .keys()
            .cloned()
            .collect();
        for class in catalog.subtree(&self.type_name)?.into_iter().skip(1) {
            known.extend(catalog.own_fields(class)?.keys().cloned());
        }
        let mut requested = BTreeSet::new();
        for column in columns {
            let column = column.into();
            if column != ID_COLUMN && !known.contains(&column) {
                return Err(QueryError::unknown_field(&self.type_name, column));
            }
            requested.insert(column);
        }
        self.requested = Some(requested);
        Ok(self)
    }

    fn apply_default_sort(&mut self) -> Result<()> {
        if self.skip_default_sort || !self.builder.order_by().is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        let Some(spec) = ctx.catalog().default_sort(&self.type_name) else {
            return Ok(());
        };
        for (field, direction) in parse_sort(spec)? {
            self.sort(&field, direction)?;
        }
        Ok(())
    }

    /// (class, table) pairs to join, anchor first
    fn tables_to_join(&self) -> Result<Vec<(String, String)>> {
        let catalog = self.ctx.catalog();
        let base_type = catalog.base_type(&self.type_name)?;
        let mut candidates: Vec<(String, String)> = catalog
            .ancestry_owning_tables(&self.type_name)?
            .into_iter()
            .map(|t| (t.class.to_string(), t.table.to_string()))
            .collect();

        let Some(requested) = &self.requested else {
            return Ok(candidates);
        };
        for class in catalog.subtree(&self.type_name)?.into_iter().skip(1) {
            if let Some(table) = catalog.table_for(class) {
                candidates.push((class.to_string(), table.to_string()));
            }
        }
        let mut tables = Vec::new();
        for (class, table) in candidates {
            let owns_requested = catalog
                .own_fields(&class)?
                .keys()
                .any(|column| requested.contains(column));
            if class == base_type || owns_requested || self.required.contains(&class) {
                tables.push((class, table));
            }
        }
        Ok(tables)
    }

    /// Build the select statement without applying the reading mode
    fn build_select(&self) -> Result<SelectBuilder> {
        let mut query = self.clone();
        query.apply_default_sort()?;

        let catalog = self.ctx.catalog();
        let dialect = query.dialect();
        let base_type = catalog.base_type(&self.type_name)?;
        let base_table = catalog.base_table(&self.type_name)?;
        let discriminator = dialect.column(base_table, CLASS_COLUMN);
        let tables = query.tables_to_join()?;
        let mut builder = query.builder;

        for (_, table) in tables.iter().filter(|(_, table)| table != base_table) {
            let on = format!(
                "{} = {}",
                dialect.column(table, ID_COLUMN),
                dialect.column(base_table, ID_COLUMN)
            );
            builder.add_join(JoinType::Left, table.as_str(), None, Condition::raw(on), INHERITANCE_JOIN_PRIORITY);
        }

        builder.select_field(dialect.column(base_table, ID_COLUMN), Some(ID_COLUMN));

        let always = [CLASS_COLUMN, CREATED_COLUMN, LAST_EDITED_COLUMN, VERSION_COLUMN];
        let mut order: Vec<&str> = Vec::new();
        let mut owners: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (class, table) in &tables {
            for column in catalog.own_fields(class)?.keys() {
                let wanted = match &query.requested {
                    Some(requested) => requested.contains(column) || always.contains(&column.as_str()),
                    None => true,
                };
                if !wanted {
                    continue;
                }
                let entry = owners.entry(column.as_str()).or_default();
                if entry.is_empty() {
                    order.push(column.as_str());
                }
                entry.push((class.as_str(), table.as_str()));
            }
        }

        for column in order {
            let sources = &owners[column];
            if let [(_, table)] = sources.as_slice() {
                builder.select_field(dialect.column(table, column), Some(column));
                continue;
            }
            let mut ranked = Vec::with_capacity(sources.len());
            for (class, table) in sources {
                let depth = catalog.ancestry(class)?.len();
                let classes = catalog.subtree(class)?.into_iter().map(str::to_string).collect();
                ranked.push((
                    depth,
                    CollisionCandidate {
                        expression: dialect.column(table, column),
                        classes,
                    },
                ));
            }
            ranked.sort_by(|a, b| b.0.cmp(&a.0));
            let candidates: Vec<CollisionCandidate> = ranked.into_iter().map(|(_, c)| c).collect();
            builder.select_field(collision_expression(&discriminator, &candidates), Some(column));
        }

        if self.type_name != base_type {
            let classes = catalog
                .subtree(&self.type_name)?
                .into_iter()
                .map(|c| Value::String(c.to_string()))
                .collect();
            builder.add_where(Condition::is_in(discriminator.clone(), classes));
        }

        builder.select_field(
            format!(
                "CASE WHEN {0} IS NOT NULL THEN {0} ELSE {1} END",
                discriminator,
                sql_literal(&Value::String(base_type.to_string()))
            ),
            Some(RECORD_CLASS_ALIAS),
        );

        synthesize_sort_aliases(&mut builder);
        Ok(builder)
    }

    /// The complete statement, with the reading mode applied
    pub fn finalize(&self) -> Result<SelectBuilder> {
        let mut builder = self.build_select()?;
        augment_query(
            &mut builder,
            self.ctx.catalog(),
            &self.ctx.config().stages,
            &self.type_name,
            &self.mode,
            true,
        )?;
        Ok(builder)
    }

    pub fn compile(&self) -> Result<CompiledQuery> {
        let compiled = self.finalize()?.compile()?;
        debug!(type_name = %self.type_name, mode = %self.mode, sql = %compiled.sql, "compiled entity query");
        Ok(compiled)
    }

    fn augment_plain(&self, builder: &mut SelectBuilder) -> Result<()> {
        augment_query(
            builder,
            self.ctx.catalog(),
            &self.ctx.config().stages,
            &self.type_name,
            &self.mode,
            false,
        )
    }

    /// `SELECT COUNT(*) AS "Count"` over the matching rows
    pub fn count_query(&self) -> Result<CompiledQuery> {
        let mut builder = self.build_select()?;
        self.augment_plain(&mut builder)?;
        builder.compile_count()
    }

    /// A single aggregate over `field`, aliased `"Aggregate"`
    pub fn aggregate_query(&self, func: AggregateFunc, field: &str) -> Result<CompiledQuery> {
        let mut query = self.clone();
        let column = query.resolve_column(field, false)?.column;
        let builder = query.build_select()?;
        if !builder.is_distinct() {
            let mut builder = builder.aggregate(func.to_sql(&column), "Aggregate");
            self.augment_plain(&mut builder)?;
            return builder.compile();
        }

        // aggregate one row per record, not one per joined related row
        let dialect = self.dialect();
        let base = self.ctx.catalog().base_table(&self.type_name)?;
        let mut inner = builder;
        inner
            .set_select(vec![
                SelectItem {
                    expression: dialect.column(base, ID_COLUMN),
                    alias: Some(ID_COLUMN.to_string()),
                },
                SelectItem {
                    expression: column,
                    alias: Some(AGGREGATE_VALUE_ALIAS.to_string()),
                },
            ])
            .set_order_by(Vec::new())
            .set_limit(None, None);
        self.augment_plain(&mut inner)?;
        let inner = inner.compile()?;
        Ok(CompiledQuery {
            sql: format!(
                "SELECT {} AS {} FROM ({}) AS {}",
                func.to_sql(&dialect.column(AGGREGATE_SOURCE_ALIAS, AGGREGATE_VALUE_ALIAS)),
                dialect.quote("Aggregate"),
                inner.sql,
                dialect.quote(AGGREGATE_SOURCE_ALIAS)
            ),
            params: inner.params,
        })
    }

    /// Values of a single field, keeping filters, order and limit
    pub fn column_query(&self, field: &str) -> Result<CompiledQuery> {
        let mut query = self.clone();
        let column = query.resolve_column(field, false)?.column;
        let mut builder = query.build_select()?;
        let alias = field.rsplit('.').next().unwrap_or(field);
        let mut items = vec![SelectItem {
            expression: column,
            alias: Some(alias.to_string()),
        }];
        if builder.is_distinct() && alias != ID_COLUMN {
            // keep one value per record rather than one per distinct value
            let base = self.ctx.catalog().base_table(&self.type_name)?;
            items.push(SelectItem {
                expression: self.dialect().column(base, ID_COLUMN),
                alias: Some(ID_COLUMN.to_string()),
            });
        }
        items.extend(
            builder
                .select_items()
                .iter()
                .filter(|item| item.alias.as_deref().is_some_and(|a| a.starts_with(SORT_ALIAS_PREFIX)))
                .cloned(),
        );
        builder.set_select(items);
        self.augment_plain(&mut builder)?;
        builder.compile()
    }
}

/// Point every order-by at a selected alias, selecting missing expressions
/// under `_SortColumnN`
fn synthesize_sort_aliases(builder: &mut SelectBuilder) {
    let dialect = builder.dialect();
    let orders = builder.order_by().to_vec();
    let mut rewritten = Vec::with_capacity(orders.len());
    let mut next = 0;
    for order in orders {
        let selected = builder.select_items().iter().find_map(|item| {
            let alias = item.alias.as_deref()?;
            (item.expression == order.expression || dialect.quote(alias) == order.expression)
                .then(|| alias.to_string())
        });
        let alias = match selected {
            Some(alias) => alias,
            None => {
                let alias = format!("{}{}", SORT_ALIAS_PREFIX, next);
                next += 1;
                builder.select_field(order.expression.clone(), Some(&alias));
                alias
            }
        };
        rewritten.push(OrderBy {
            expression: dialect.quote(&alias),
            direction: order.direction,
        });
    }
    builder.set_order_by(rewritten);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::config::StoreConfig;
    use crate::schema::{FieldKind, TypeDecl};
    use serde_json::json;

    fn context() -> CompilationContext {
        let catalog = SchemaCatalog::build(vec![
            TypeDecl::new("Article")
                .field("Title", FieldKind::String)
                .has_one("Writer", "Member")
                .many_many("Tags", "Tag")
                .has_many("Comments", "Comment", None),
            TypeDecl::new("FeaturedArticle")
                .extends("Article")
                .field("Badge", FieldKind::String)
                .field("Title", FieldKind::String),
            TypeDecl::new("SpotlightArticle").extends("FeaturedArticle"),
            TypeDecl::new("Member").field("Name", FieldKind::String),
            TypeDecl::new("Tag").field("Label", FieldKind::String),
            TypeDecl::new("Comment")
                .field("Body", FieldKind::String)
                .has_one("Article", "Article"),
            TypeDecl::new("Event")
                .field("Starts", FieldKind::Timestamp)
                .default_sort("Starts DESC"),
        ])
        .unwrap();
        CompilationContext::new(catalog, StoreConfig::default())
    }

    #[test]
    fn test_base_query_selects_only_base_table() {
        let ctx = context();
        let query = EntityQuery::new(&ctx, "Article").unwrap();
        let compiled = query.compile().unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"Article\".\"ID\" AS \"ID\", \"Article\".\"ClassName\" AS \"ClassName\", \
             \"Article\".\"Created\" AS \"Created\", \"Article\".\"LastEdited\" AS \"LastEdited\", \
             \"Article\".\"Title\" AS \"Title\", \"Article\".\"WriterID\" AS \"WriterID\", \
             CASE WHEN \"Article\".\"ClassName\" IS NOT NULL THEN \"Article\".\"ClassName\" ELSE 'Article' END AS \"RecordClassName\" \
             FROM \"Article\""
        );
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_subtype_query_joins_ancestors_and_filters_discriminator() {
        let ctx = context();
        let compiled = EntityQuery::new(&ctx, "FeaturedArticle").unwrap().compile().unwrap();
        assert!(compiled
            .sql
            .contains("FROM \"Article\" LEFT JOIN \"FeaturedArticle\" ON \"FeaturedArticle\".\"ID\" = \"Article\".\"ID\""));
        assert!(compiled.sql.contains("\"FeaturedArticle\".\"Badge\" AS \"Badge\""));
        assert!(compiled.sql.ends_with("WHERE (\"Article\".\"ClassName\" IN (?, ?))"));
        assert_eq!(compiled.params, vec![json!("FeaturedArticle"), json!("SpotlightArticle")]);
    }

    #[test]
    fn test_type_without_table_reuses_ancestor_tables() {
        let ctx = context();
        let compiled = EntityQuery::new(&ctx, "SpotlightArticle").unwrap().compile().unwrap();
        assert_eq!(compiled.sql.matches("JOIN").count(), 1);
        assert_eq!(compiled.params, vec![json!("SpotlightArticle")]);
    }

    #[test]
    fn test_collision_resolved_by_case() {
        let ctx = context();
        let compiled = EntityQuery::new(&ctx, "FeaturedArticle").unwrap().compile().unwrap();
        assert!(compiled.sql.contains(
            "CASE WHEN \"Article\".\"ClassName\" IN ('FeaturedArticle', 'SpotlightArticle') THEN \"FeaturedArticle\".\"Title\" \
             WHEN \"Article\".\"ClassName\" IN ('Article', 'FeaturedArticle', 'SpotlightArticle') THEN \"Article\".\"Title\" \
             ELSE NULL END AS \"Title\""
        ));
        assert!(!compiled.sql.contains("\"Article\".\"Title\" AS \"Title\""));
    }

    #[test]
    fn test_requested_columns_join_descendant_tables() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.columns(["Badge"]).unwrap();
        let compiled = query.compile().unwrap();
        assert!(compiled.sql.contains("LEFT JOIN \"FeaturedArticle\""));
        assert!(compiled.sql.contains("\"FeaturedArticle\".\"Badge\" AS \"Badge\""));
        assert!(!compiled.sql.contains("\"Title\""));
        assert!(compiled.sql.contains("\"Article\".\"ClassName\" AS \"ClassName\""));
    }

    #[test]
    fn test_requested_unknown_column() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        assert!(matches!(
            query.columns(["Nope"]).unwrap_err(),
            QueryError::UnknownField { .. }
        ));
    }

    #[test]
    fn test_filter_unknown_field() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        let err = query.filter("Badge", ComparisonOp::Eq, json!("x")).unwrap_err();
        assert!(matches!(err, QueryError::UnknownField { type_name, field } if type_name == "Article" && field == "Badge"));
    }

    #[test]
    fn test_filter_through_relation() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.filter("Writer.Name", ComparisonOp::Eq, json!("Ada")).unwrap();
        let compiled = query.compile().unwrap();
        assert!(compiled.sql.contains(
            "LEFT JOIN \"Member\" AS \"Writer_Member\" ON \"Writer_Member\".\"ID\" = \"Article\".\"WriterID\""
        ));
        assert!(compiled.sql.contains("WHERE (\"Writer_Member\".\"Name\" = ?)"));
        assert!(!compiled.sql.starts_with("SELECT DISTINCT"));
        assert_eq!(compiled.params, vec![json!("Ada")]);
    }

    #[test]
    fn test_two_relations_to_one_table_filter_independently() {
        let catalog = SchemaCatalog::build(vec![
            TypeDecl::new("Article")
                .field("Title", FieldKind::String)
                .has_one("Writer", "Member")
                .has_one("Editor", "Member"),
            TypeDecl::new("Member").field("Name", FieldKind::String),
        ])
        .unwrap();
        let ctx = CompilationContext::new(catalog, StoreConfig::default());
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query
            .filter("Writer.Name", ComparisonOp::Eq, json!("Ann"))
            .unwrap()
            .filter("Editor.Name", ComparisonOp::Eq, json!("Bob"))
            .unwrap();
        let sql = query.compile().unwrap().sql;
        assert!(sql.contains("LEFT JOIN \"Member\" AS \"Editor_Member\" ON \"Editor_Member\".\"ID\" = \"Article\".\"EditorID\""));
        assert!(sql.ends_with("WHERE (\"Writer_Member\".\"Name\" = ?) AND (\"Editor_Member\".\"Name\" = ?)"));
    }

    #[test]
    fn test_self_reference_filter_joins_parent() {
        let catalog = SchemaCatalog::build(vec![TypeDecl::new("Page")
            .field("Title", FieldKind::String)
            .has_one("Parent", "Page")])
        .unwrap();
        let ctx = CompilationContext::new(catalog, StoreConfig::default());
        let mut query = EntityQuery::new(&ctx, "Page").unwrap();
        query.filter("Parent.Title", ComparisonOp::Eq, json!("Root")).unwrap();
        let sql = query.compile().unwrap().sql;
        assert!(sql.contains("FROM \"Page\" LEFT JOIN \"Page\" AS \"Parent_Page\""));
        assert!(sql.ends_with("WHERE (\"Parent_Page\".\"Title\" = ?)"));
    }

    #[test]
    fn test_to_many_filter_is_distinct() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.filter("Tags.Label", ComparisonOp::Like, json!("rust%")).unwrap();
        let compiled = query.compile().unwrap();
        assert!(compiled.sql.starts_with("SELECT DISTINCT \"Article\".\"ID\" AS \"ID\""));
        assert!(compiled.sql.contains("WHERE (\"Tags_Tag\".\"Label\" LIKE ?)"));
        assert!(query
            .count_query()
            .unwrap()
            .sql
            .starts_with("SELECT COUNT(*) AS \"Count\" FROM (SELECT DISTINCT"));
        let column = query.column_query("Title").unwrap();
        assert!(column
            .sql
            .starts_with("SELECT DISTINCT \"Article\".\"Title\" AS \"Title\", \"Article\".\"ID\" AS \"ID\" FROM"));
        let max = query.aggregate_query(AggregateFunc::Max, "Title").unwrap();
        assert!(max.sql.starts_with(
            "SELECT MAX(\"AggregateSource\".\"AggregateValue\") AS \"Aggregate\" FROM \
             (SELECT DISTINCT \"Article\".\"ID\" AS \"ID\", \"Article\".\"Title\" AS \"AggregateValue\" FROM \"Article\""
        ));
        assert!(max.sql.ends_with(") AS \"AggregateSource\""));
        assert_eq!(max.params, vec![json!("rust%")]);
    }

    #[test]
    fn test_empty_filter_any_matches_nothing() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.filter_any(vec![]).unwrap();
        assert!(query.compile().unwrap().sql.ends_with("WHERE (1 = 0)"));
    }

    #[test]
    fn test_sort_requires_linear_path() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        let err = query.sort("Tags.Label", SortDirection::Asc).unwrap_err();
        assert!(matches!(err, QueryError::RelationNotLinear { .. }));
        query.sort("Writer.Name", SortDirection::Desc).unwrap();
        let compiled = query.compile().unwrap();
        assert!(compiled.sql.contains("\"Writer_Member\".\"Name\" AS \"_SortColumn0\""));
        assert!(compiled.sql.ends_with("ORDER BY \"_SortColumn0\" DESC"));
    }

    #[test]
    fn test_sort_on_selected_column_uses_alias() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.sort("Title", SortDirection::Asc).unwrap().limit(Some(5), None);
        let sql = query.compile().unwrap().sql;
        assert!(sql.ends_with("ORDER BY \"Title\" ASC LIMIT 5"));
        assert!(!sql.contains("_SortColumn"));
    }

    #[test]
    fn test_default_sort() {
        let ctx = context();
        let query = EntityQuery::new(&ctx, "Event").unwrap();
        assert!(query.compile().unwrap().sql.ends_with("ORDER BY \"Starts\" DESC"));
        let mut unsorted = EntityQuery::new(&ctx, "Event").unwrap();
        unsorted.clear_sort();
        assert!(!unsorted.compile().unwrap().sql.contains("ORDER BY"));
    }

    #[test]
    fn test_many_many_relation() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        let step = query.apply_relation("Tags").unwrap();
        assert_eq!(step.target, "Tag");
        assert_eq!(step.alias_for("Tag"), "Tags_Tag");
        let sql = query.compile().unwrap().sql;
        assert!(sql.starts_with("SELECT DISTINCT"));
        assert!(sql.contains(
            "INNER JOIN \"Article_Tags\" AS \"Tags_Article_Tags\" \
             ON \"Tags_Article_Tags\".\"ArticleID\" = \"Article\".\"ID\" \
             LEFT JOIN \"Tag\" AS \"Tags_Tag\" ON \"Tags_Tag\".\"ID\" = \"Tags_Article_Tags\".\"TagID\""
        ));
    }

    #[test]
    fn test_inheritance_joins_precede_relation_joins() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "FeaturedArticle").unwrap();
        query.filter("Writer.Name", ComparisonOp::Eq, json!("Ada")).unwrap();
        let sql = query.compile().unwrap().sql;
        let inheritance = sql.find("LEFT JOIN \"FeaturedArticle\"").unwrap();
        let relation = sql.find("LEFT JOIN \"Member\"").unwrap();
        assert!(inheritance < relation);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "FeaturedArticle").unwrap();
        query
            .filter("Badge", ComparisonOp::Ne, json!("old"))
            .unwrap()
            .sort("Writer.Name", SortDirection::Asc)
            .unwrap();
        assert_eq!(query.compile().unwrap(), query.compile().unwrap());
    }

    #[test]
    fn test_count_and_aggregate() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "FeaturedArticle").unwrap();
        query.sort("Title", SortDirection::Asc).unwrap();
        let count = query.count_query().unwrap();
        assert!(count.sql.starts_with("SELECT COUNT(*) AS \"Count\" FROM \"Article\""));
        assert!(!count.sql.contains("ORDER BY"));

        let max = query.aggregate_query(AggregateFunc::Max, "Created").unwrap();
        assert!(max.sql.starts_with("SELECT MAX(\"Article\".\"Created\") AS \"Aggregate\" FROM"));
    }

    #[test]
    fn test_column_query() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query.filter_id(3);
        let compiled = query.column_query("Title").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"Article\".\"Title\" AS \"Title\" FROM \"Article\" WHERE (\"Article\".\"ID\" = ?)"
        );
        assert_eq!(compiled.params, vec![json!(3)]);
    }

    #[test]
    fn test_exclude_and_filter_any() {
        let ctx = context();
        let mut query = EntityQuery::new(&ctx, "Article").unwrap();
        query
            .exclude("Title", ComparisonOp::Eq, json!("Draft"))
            .unwrap()
            .filter_any(vec![
                ("ID", ComparisonOp::Lt, json!(10)),
                ("Title", ComparisonOp::Like, json!("%news%")),
            ])
            .unwrap();
        let compiled = query.compile().unwrap();
        assert!(compiled.sql.ends_with(
            "WHERE (NOT (\"Article\".\"Title\" = ?)) AND (\"Article\".\"ID\" < ? OR \"Article\".\"Title\" LIKE ?)"
        ));
        assert_eq!(compiled.params, vec![json!("Draft"), json!(10), json!("%news%")]);
    }

    #[test]
    fn test_collision_expression_is_pure() {
        let candidates = vec![
            CollisionCandidate {
                expression: "\"B\".\"X\"".to_string(),
                classes: vec!["B".to_string()],
            },
            CollisionCandidate {
                expression: "\"A\".\"X\"".to_string(),
                classes: vec!["A".to_string(), "B".to_string()],
            },
        ];
        assert_eq!(
            collision_expression("\"A\".\"ClassName\"", &candidates),
            "CASE WHEN \"A\".\"ClassName\" IN ('B') THEN \"B\".\"X\" \
             WHEN \"A\".\"ClassName\" IN ('A', 'B') THEN \"A\".\"X\" ELSE NULL END"
        );
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(
            parse_sort("\"Title\" DESC, Created").unwrap(),
            vec![
                ("Title".to_string(), SortDirection::Desc),
                ("Created".to_string(), SortDirection::Asc)
            ]
        );
        assert!(parse_sort("Title SIDEWAYS").is_err());
    }
}
