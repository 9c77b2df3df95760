use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier quoting convention of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// ANSI double quotes (SQLite, PostgreSQL, DuckDB)
    #[default]
    Ansi,
    /// Backticks
    MySql,
}

impl Dialect {
    /// Quote a single identifier
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Ansi => format!("\"{}\"", identifier.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
        }
    }

    /// Quote a `table.column` reference
    pub fn column(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(column))
    }
}

/// Comparison operators for WHERE clauses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Ne => write!(f, "!="),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Le => write!(f, "<="),
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Ge => write!(f, ">="),
            ComparisonOp::Like => write!(f, "LIKE"),
            ComparisonOp::NotLike => write!(f, "NOT LIKE"),
            ComparisonOp::In => write!(f, "IN"),
            ComparisonOp::NotIn => write!(f, "NOT IN"),
            ComparisonOp::IsNull => write!(f, "IS NULL"),
            ComparisonOp::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalOp {
    #[default]
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// Aggregate function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn to_sql(&self, expression: &str) -> String {
        match self {
            AggregateFunc::Count => "COUNT(*)".to_string(),
            AggregateFunc::CountDistinct => format!("COUNT(DISTINCT {})", expression),
            AggregateFunc::Sum => format!("SUM({})", expression),
            AggregateFunc::Avg => format!("AVG({})", expression),
            AggregateFunc::Min => format!("MIN({})", expression),
            AggregateFunc::Max => format!("MAX({})", expression),
        }
    }
}

/// WHERE / HAVING / ON predicate.
///
/// `column` in [`Condition::Simple`] is an already-quoted SQL expression;
/// values are always bound as `?` parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Simple {
        column: String,
        op: ComparisonOp,
        value: Option<Value>,
    },
    Compound {
        conditions: Vec<Condition>,
        op: LogicalOp,
    },
    Not(Box<Condition>),
    Raw {
        sql: String,
        params: Vec<Value>,
    },
}

impl Condition {
    pub fn simple(column: impl Into<String>, op: ComparisonOp, value: Value) -> Self {
        Condition::Simple {
            column: column.into(),
            op,
            value: Some(value),
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::simple(column, ComparisonOp::Eq, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::simple(column, ComparisonOp::In, Value::Array(values))
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn raw_with(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            params,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::And,
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::Or,
        }
    }

    /// Render to SQL, appending bound values to `params` in placeholder order.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Simple { column, op, value } => match (op, value) {
                (ComparisonOp::IsNull | ComparisonOp::IsNotNull, _) => format!("{} {}", column, op),
                (ComparisonOp::Eq, None | Some(Value::Null)) => format!("{} IS NULL", column),
                (ComparisonOp::Ne, None | Some(Value::Null)) => format!("{} IS NOT NULL", column),
                (ComparisonOp::In | ComparisonOp::NotIn, Some(Value::Array(values))) => {
                    if values.is_empty() {
                        // IN () is not valid SQL
                        return if *op == ComparisonOp::In {
                            "1 = 0".to_string()
                        } else {
                            "1 = 1".to_string()
                        };
                    }
                    params.extend(values.iter().cloned());
                    let placeholders = vec!["?"; values.len()].join(", ");
                    format!("{} {} ({})", column, op, placeholders)
                }
                (_, Some(value)) => {
                    params.push(value.clone());
                    format!("{} {} ?", column, op)
                }
                (_, None) => format!("{} {} NULL", column, op),
            },
            Condition::Compound { conditions, op } => {
                if conditions.is_empty() {
                    match op {
                        LogicalOp::And => "1 = 1".to_string(),
                        LogicalOp::Or => "1 = 0".to_string(),
                    }
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| c.to_sql(params))
                        .collect::<Vec<_>>()
                        .join(&format!(" {} ", op));
                    format!("({})", parts)
                }
            }
            Condition::Not(inner) => format!("NOT ({})", inner.to_sql(params)),
            Condition::Raw { sql, params: bound } => {
                params.extend(bound.iter().cloned());
                sql.clone()
            }
        }
    }

    fn replace_text(&mut self, needle: &str, replacement: &str) {
        match self {
            Condition::Simple { column, .. } => *column = column.replace(needle, replacement),
            Condition::Compound { conditions, .. } => {
                for condition in conditions {
                    condition.replace_text(needle, replacement);
                }
            }
            Condition::Not(inner) => inner.replace_text(needle, replacement),
            Condition::Raw { sql, .. } => *sql = sql.replace(needle, replacement),
        }
    }
}

/// A physical table referenced under an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSource {
    pub table: String,
    pub alias: String,
}

impl TableSource {
    fn to_sql(&self, dialect: Dialect) -> String {
        if self.table == self.alias {
            dialect.quote(&self.table)
        } else {
            format!("{} AS {}", dialect.quote(&self.table), dialect.quote(&self.alias))
        }
    }
}

/// Join clause
#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    pub source: TableSource,
    pub on_condition: Condition,
    /// Lower priorities are emitted first; ties keep insertion order.
    pub priority: i32,
    sequence: usize,
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub expression: String,
    pub alias: Option<String>,
}

/// ORDER BY clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub expression: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn to_sql(&self) -> String {
        format!("{} {}", self.expression, self.direction)
    }
}

/// A finished statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Mutable representation of one SELECT (or single-table DELETE) statement.
#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    dialect: Dialect,
    from: Option<TableSource>,
    select: Vec<SelectItem>,
    joins: Vec<Join>,
    where_conditions: Vec<Condition>,
    connective: LogicalOp,
    group_by: Vec<String>,
    having: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    distinct: bool,
    delete: bool,
    next_sequence: usize,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Set the anchor table, optionally under an alias
    pub fn set_from(&mut self, table: impl Into<String>, alias: Option<&str>) -> &mut Self {
        let table = table.into();
        let alias = alias.map(str::to_string).unwrap_or_else(|| table.clone());
        self.from = Some(TableSource { table, alias });
        self
    }

    pub fn from_source(&self) -> Option<&TableSource> {
        self.from.as_ref()
    }

    /// Add a join; an alias already present in the statement is skipped.
    /// Returns whether the join was added.
    pub fn add_join(
        &mut self,
        join_type: JoinType,
        table: impl Into<String>,
        alias: Option<&str>,
        on: Condition,
        priority: i32,
    ) -> bool {
        let table = table.into();
        let alias = alias.map(str::to_string).unwrap_or_else(|| table.clone());
        if self.is_joined_to(&alias) {
            return false;
        }
        self.joins.push(Join {
            join_type,
            source: TableSource { table, alias },
            on_condition: on,
            priority,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        true
    }

    pub fn add_left_join(&mut self, table: impl Into<String>, on: Condition, priority: i32) -> bool {
        self.add_join(JoinType::Left, table, None, on, priority)
    }

    pub fn add_inner_join(&mut self, table: impl Into<String>, on: Condition, priority: i32) -> bool {
        self.add_join(JoinType::Inner, table, None, on, priority)
    }

    /// Whether `alias` is the anchor or an existing join
    pub fn is_joined_to(&self, alias: &str) -> bool {
        self.from.as_ref().is_some_and(|f| f.alias == alias)
            || self.joins.iter().any(|j| j.source.alias == alias)
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn joins_mut(&mut self) -> &mut [Join] {
        &mut self.joins
    }

    /// All aliases in emission order, anchor first
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.from.iter().map(|f| f.alias.clone()).collect();
        aliases.extend(self.sorted_joins().into_iter().map(|j| j.source.alias.clone()));
        aliases
    }

    /// Point `alias` at a different physical table, keeping the alias so
    /// column references stay valid.
    pub fn rename_table(&mut self, alias: &str, table: impl Into<String>) -> bool {
        let table = table.into();
        if let Some(from) = self.from.as_mut().filter(|f| f.alias == alias) {
            from.table = table;
            return true;
        }
        if let Some(join) = self.joins.iter_mut().find(|j| j.source.alias == alias) {
            join.source.table = table;
            return true;
        }
        false
    }

    /// Physical table behind `alias`
    pub fn table_for_alias(&self, alias: &str) -> Option<&str> {
        if let Some(from) = self.from.as_ref().filter(|f| f.alias == alias) {
            return Some(from.table.as_str());
        }
        self.joins
            .iter()
            .find(|j| j.source.alias == alias)
            .map(|j| j.source.table.as_str())
    }

    pub fn add_where(&mut self, condition: Condition) -> &mut Self {
        self.where_conditions.push(condition);
        self
    }

    pub fn add_where_raw(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.add_where(Condition::raw_with(sql, params))
    }

    /// Add an OR-grouped predicate
    pub fn add_where_any(&mut self, conditions: Vec<Condition>) -> &mut Self {
        self.add_where(Condition::any(conditions))
    }

    /// Connective joining top-level WHERE predicates
    pub fn set_connective(&mut self, op: LogicalOp) -> &mut Self {
        self.connective = op;
        self
    }

    pub fn where_conditions(&self) -> &[Condition] {
        &self.where_conditions
    }

    pub fn set_select(&mut self, items: Vec<SelectItem>) -> &mut Self {
        self.select = items;
        self
    }

    /// Select `expression AS alias`, replacing an existing entry with the same alias
    pub fn select_field(&mut self, expression: impl Into<String>, alias: Option<&str>) -> &mut Self {
        let item = SelectItem {
            expression: expression.into(),
            alias: alias.map(str::to_string),
        };
        match item
            .alias
            .as_ref()
            .and_then(|a| self.select.iter().position(|s| s.alias.as_ref() == Some(a)))
        {
            Some(index) => self.select[index] = item,
            None => self.select.push(item),
        }
        self
    }

    pub fn select_items(&self) -> &[SelectItem] {
        &self.select
    }

    pub fn has_select_alias(&self, alias: &str) -> bool {
        self.select.iter().any(|s| s.alias.as_deref() == Some(alias))
    }

    /// Expression selected under `alias`
    pub fn expression_for_alias(&self, alias: &str) -> Option<&str> {
        self.select
            .iter()
            .find(|s| s.alias.as_deref() == Some(alias))
            .map(|s| s.expression.as_str())
    }

    pub fn set_order_by(&mut self, order_by: Vec<OrderBy>) -> &mut Self {
        self.order_by = order_by;
        self
    }

    pub fn add_order_by(&mut self, expression: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.order_by.push(OrderBy {
            expression: expression.into(),
            direction,
        });
        self
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn set_group_by(&mut self, columns: Vec<String>) -> &mut Self {
        self.group_by = columns;
        self
    }

    pub fn add_having(&mut self, condition: Condition) -> &mut Self {
        self.having.push(condition);
        self
    }

    pub fn set_limit(&mut self, limit: Option<usize>, offset: Option<usize>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Compile as `DELETE FROM <anchor>` instead of a SELECT
    pub fn set_delete(&mut self, delete: bool) -> &mut Self {
        self.delete = delete;
        self
    }

    /// Textually replace `needle` in select, join, where, having and order-by fragments
    pub fn replace_text(&mut self, needle: &str, replacement: &str) {
        for item in &mut self.select {
            item.expression = item.expression.replace(needle, replacement);
        }
        for join in &mut self.joins {
            join.on_condition.replace_text(needle, replacement);
        }
        for condition in self.where_conditions.iter_mut().chain(self.having.iter_mut()) {
            condition.replace_text(needle, replacement);
        }
        for order in &mut self.order_by {
            order.expression = order.expression.replace(needle, replacement);
        }
        for column in &mut self.group_by {
            *column = column.replace(needle, replacement);
        }
    }

    fn sorted_joins(&self) -> Vec<&Join> {
        let mut joins: Vec<&Join> = self.joins.iter().collect();
        joins.sort_by_key(|j| (j.priority, j.sequence));
        joins
    }

    fn conditions_to_sql(conditions: &[Condition], op: LogicalOp, params: &mut Vec<Value>) -> String {
        conditions
            .iter()
            .map(|c| match c {
                Condition::Compound { conditions, .. } if !conditions.is_empty() => c.to_sql(params),
                _ => format!("({})", c.to_sql(params)),
            })
            .collect::<Vec<_>>()
            .join(&format!(" {} ", op))
    }

    /// Build the SQL string and its parameters. Does not mutate the builder.
    pub fn compile(&self) -> Result<CompiledQuery> {
        let from = self
            .from
            .as_ref()
            .ok_or_else(|| QueryError::Query("statement has no FROM table".to_string()))?;
        let mut params = Vec::new();

        if self.delete {
            if !self.joins.is_empty() {
                return Err(QueryError::Query(
                    "DELETE statements cannot carry joins".to_string(),
                ));
            }
            let mut sql = format!("DELETE FROM {}", self.dialect.quote(&from.table));
            if !self.where_conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&Self::conditions_to_sql(
                    &self.where_conditions,
                    self.connective,
                    &mut params,
                ));
            }
            return Ok(CompiledQuery { sql, params });
        }

        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.select.is_empty() {
            sql.push('*');
        } else {
            let columns = self
                .select
                .iter()
                .map(|item| match &item.alias {
                    Some(alias) => format!("{} AS {}", item.expression, self.dialect.quote(alias)),
                    None => item.expression.clone(),
                })
                .collect::<Vec<_>>();
            sql.push_str(&columns.join(", "));
        }

        sql.push_str(&format!(" FROM {}", from.to_sql(self.dialect)));

        for join in self.sorted_joins() {
            sql.push_str(&format!(
                " {} {} ON {}",
                join.join_type,
                join.source.to_sql(self.dialect),
                join.on_condition.to_sql(&mut params)
            ));
        }

        if !self.where_conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&Self::conditions_to_sql(
                &self.where_conditions,
                self.connective,
                &mut params,
            ));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&Self::conditions_to_sql(&self.having, LogicalOp::And, &mut params));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .order_by
                    .iter()
                    .map(|o| o.to_sql())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // OFFSET alone is rejected by SQLite
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", i64::MAX, offset)),
            (None, None) => {}
        }

        Ok(CompiledQuery { sql, params })
    }

    /// Replace the select list with a single aggregate expression, dropping
    /// ordering and limits.
    pub fn aggregate(&self, expression: impl Into<String>, alias: &str) -> SelectBuilder {
        let mut query = self.clone();
        query.select = vec![SelectItem {
            expression: expression.into(),
            alias: Some(alias.to_string()),
        }];
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        query.distinct = false;
        query
    }

    /// Compile a row count of this statement. DISTINCT, grouped and limited
    /// statements are counted through a subquery.
    pub fn compile_count(&self) -> Result<CompiledQuery> {
        if self.distinct || !self.group_by.is_empty() || self.limit.is_some() || self.offset.is_some() {
            let inner = self.compile()?;
            return Ok(CompiledQuery {
                sql: format!(
                    "SELECT COUNT(*) AS {} FROM ({}) AS {}",
                    self.dialect.quote("Count"),
                    inner.sql,
                    self.dialect.quote("CountSource")
                ),
                params: inner.params,
            });
        }
        self.aggregate("COUNT(*)", "Count").compile()
    }
}

/// INSERT statement builder
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Set a column value
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.values.push((column.into(), value));
        self
    }

    /// Set multiple column values
    pub fn set_many<I, K>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (column, value) in values {
            self.values.push((column.into(), value));
        }
        self
    }

    pub fn build(self, dialect: Dialect) -> Result<CompiledQuery> {
        let table = dialect.quote(&self.table);
        if self.values.is_empty() {
            return Ok(CompiledQuery {
                sql: format!("INSERT INTO {} DEFAULT VALUES", table),
                params: Vec::new(),
            });
        }
        let columns = self
            .values
            .iter()
            .map(|(c, _)| dialect.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.values.len()].join(", ");
        Ok(CompiledQuery {
            sql: format!("INSERT INTO {} ({}) VALUES ({})", table, columns, placeholders),
            params: self.values.into_iter().map(|(_, v)| v).collect(),
        })
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_values: Vec<(String, Value)>,
    where_values: Vec<(String, Value)>,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_values: Vec::new(),
            where_values: Vec::new(),
        }
    }

    /// Set a column value
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set_values.push((column.into(), value));
        self
    }

    /// Set multiple column values
    pub fn set_many<I, K>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (column, value) in values {
            self.set_values.push((column.into(), value));
        }
        self
    }

    /// Add simple WHERE condition (column = value)
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.where_values.push((column.into(), value));
        self
    }

    /// Build the SQL query string
    pub fn build(self, dialect: Dialect) -> Result<CompiledQuery> {
        if self.set_values.is_empty() {
            return Err(QueryError::Query("UPDATE must have at least one SET value".to_string()));
        }

        let mut sql = format!("UPDATE {} SET ", dialect.quote(&self.table));
        let set_clauses: Vec<String> = self
            .set_values
            .iter()
            .map(|(col, _)| format!("{} = ?", dialect.quote(col)))
            .collect();
        sql.push_str(&set_clauses.join(", "));

        if !self.where_values.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&equality_clause(dialect, &self.where_values));
        }

        let params = self
            .set_values
            .into_iter()
            .chain(self.where_values)
            .map(|(_, v)| v)
            .collect();
        Ok(CompiledQuery { sql, params })
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_values: Vec<(String, Value)>,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_values: Vec::new(),
        }
    }

    /// Add simple WHERE condition (column = value)
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.where_values.push((column.into(), value));
        self
    }

    /// Build the SQL query string
    pub fn build(self, dialect: Dialect) -> Result<CompiledQuery> {
        let mut sql = format!("DELETE FROM {}", dialect.quote(&self.table));
        if !self.where_values.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&equality_clause(dialect, &self.where_values));
        }
        Ok(CompiledQuery {
            sql,
            params: self.where_values.into_iter().map(|(_, v)| v).collect(),
        })
    }
}

fn equality_clause(dialect: Dialect, values: &[(String, Value)]) -> String {
    values
        .iter()
        .map(|(col, _)| format!("{} = ?", dialect.quote(col)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Format a JSON value as an inline SQL literal
pub(crate) fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => {
            format!("'{}'", value.to_string().replace('\'', "''"))
        }
    }
}
