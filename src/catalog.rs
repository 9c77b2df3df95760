//! Schema catalog: the precomputed index from entity types to physical tables.
//!
//! Built once from a set of [`TypeDecl`]s. Every type gets an arena slot
//! holding its ancestry, owning table, own physical columns and relations, so
//! lookups never walk declarations at query time. Derived field maps are
//! memoized behind a single swappable map; [`SchemaCatalog::reset`] drops
//! them all at once.

use crate::builder::Dialect;
use crate::config::{versions_table, StageSet};
use crate::error::{QueryError, Result};
use crate::schema::{
    FieldKind, RelationDecl, TypeDecl, CLASS_COLUMN, CREATED_COLUMN, ID_COLUMN, LAST_EDITED_COLUMN,
    VERSION_COLUMN,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Columns added to every history table
pub const HISTORY_COLUMNS: [(&str, FieldKind); 5] = [
    ("RecordID", FieldKind::ForeignKey),
    ("Version", FieldKind::Integer),
    ("WasPublished", FieldKind::Boolean),
    ("AuthorID", FieldKind::ForeignKey),
    ("PublisherID", FieldKind::ForeignKey),
];

const RESERVED_FIELDS: [&str; 9] = [
    ID_COLUMN,
    CLASS_COLUMN,
    CREATED_COLUMN,
    LAST_EDITED_COLUMN,
    VERSION_COLUMN,
    "RecordID",
    "WasPublished",
    "AuthorID",
    "PublisherID",
];

type FieldMap = BTreeMap<String, FieldKind>;

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Root first, including the type itself
    ancestry: Vec<usize>,
    table: Option<String>,
    own_columns: FieldMap,
    composites: BTreeMap<String, Vec<String>>,
    relations: Vec<RelationDecl>,
    default_sort: Option<String>,
    versioned: bool,
}

impl TypeInfo {
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// An owning table in an ancestry chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef<'a> {
    pub class: &'a str,
    pub table: &'a str,
}

/// Association table behind a many-many relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column holding the declaring side's identity
    pub parent_field: String,
    /// Column holding the target side's identity
    pub child_field: String,
}

impl JoinTable {
    /// `<Declaring>_<Relation>` with `<Declaring>ID` / `<Target>ID` (or `ChildID` when self-referencing)
    pub fn for_relation(declaring: &str, relation: &str, target: &str) -> Self {
        let child_field = if declaring == target {
            "ChildID".to_string()
        } else {
            format!("{}ID", target)
        };
        Self {
            table: format!("{}_{}", declaring, relation),
            parent_field: format!("{}ID", declaring),
            child_field,
        }
    }
}

#[derive(Debug)]
pub struct SchemaCatalog {
    types: Vec<TypeInfo>,
    index: HashMap<String, usize>,
    field_cache: RwLock<Arc<HashMap<(usize, bool), Arc<FieldMap>>>>,
}

impl SchemaCatalog {
    /// Index a complete set of declarations, rejecting inconsistent schemas
    pub fn build(decls: Vec<TypeDecl>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.name.clone(), i).is_some() {
                return Err(QueryError::Schema(format!("type {} declared twice", decl.name)));
            }
        }

        let mut parents = Vec::with_capacity(decls.len());
        for decl in &decls {
            let parent = match &decl.parent {
                Some(p) => Some(*index.get(p).ok_or_else(|| QueryError::UnknownType(p.clone()))?),
                None => None,
            };
            parents.push(parent);
        }

        let mut ancestries = Vec::with_capacity(decls.len());
        for i in 0..decls.len() {
            let mut chain = vec![i];
            let mut current = parents[i];
            while let Some(p) = current {
                if chain.contains(&p) {
                    return Err(QueryError::Schema(format!(
                        "inheritance cycle through {}",
                        decls[i].name
                    )));
                }
                chain.push(p);
                current = parents[p];
            }
            chain.reverse();
            ancestries.push(chain);
        }

        let mut types = Vec::with_capacity(decls.len());
        let mut tables: HashMap<String, String> = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            let root = &decls[ancestries[i][0]];
            if decl.versioned && decl.parent.is_some() {
                return Err(QueryError::Schema(format!(
                    "versioning must be declared on the root of {}",
                    decl.name
                )));
            }

            let owns_table = decl.owns_table();
            let table = if owns_table {
                Some(decl.table.clone().unwrap_or_else(|| decl.name.clone()))
            } else if decl.table.is_some() {
                return Err(QueryError::Schema(format!(
                    "{} overrides its table name but stores no fields",
                    decl.name
                )));
            } else {
                None
            };
            if let Some(table) = &table {
                if let Some(first) = tables.insert(table.clone(), decl.name.clone()) {
                    return Err(QueryError::ConflictingTable {
                        table: table.clone(),
                        first,
                        second: decl.name.clone(),
                    });
                }
            }

            let mut own_columns = FieldMap::new();
            let mut composites = BTreeMap::new();
            if decl.parent.is_none() {
                own_columns.insert(CLASS_COLUMN.to_string(), FieldKind::Enumerated);
                own_columns.insert(CREATED_COLUMN.to_string(), FieldKind::Timestamp);
                own_columns.insert(LAST_EDITED_COLUMN.to_string(), FieldKind::Timestamp);
                if decl.versioned {
                    own_columns.insert(VERSION_COLUMN.to_string(), FieldKind::Integer);
                }
            }
            for field in &decl.fields {
                if RESERVED_FIELDS.contains(&field.name.as_str()) {
                    return Err(QueryError::Schema(format!(
                        "{}.{} uses a reserved column name",
                        decl.name, field.name
                    )));
                }
                let columns = field.columns();
                if columns.len() > 1 || columns.first().is_some_and(|c| c.0 != field.name) {
                    composites.insert(field.name.clone(), columns.iter().map(|c| c.0.clone()).collect());
                }
                for (column, kind) in columns {
                    if own_columns.insert(column.clone(), kind).is_some() {
                        return Err(QueryError::Schema(format!(
                            "column {} declared twice on {}",
                            column, decl.name
                        )));
                    }
                }
            }
            let mut relation_names = HashSet::new();
            for relation in &decl.relations {
                if !relation_names.insert(relation.name().to_string()) {
                    return Err(QueryError::Schema(format!(
                        "relation {} declared twice on {}",
                        relation.name(),
                        decl.name
                    )));
                }
                if let Some(target) = relation.target() {
                    if !index.contains_key(target) {
                        return Err(QueryError::UnknownType(target.to_string()));
                    }
                }
                if let RelationDecl::HasOne { name, target } = relation {
                    let mut columns = vec![(
                        format!("{}ID", name),
                        if target.is_some() {
                            FieldKind::ForeignKey
                        } else {
                            FieldKind::PolymorphicForeignKey
                        },
                    )];
                    if target.is_none() {
                        columns.push((format!("{}Class", name), FieldKind::Enumerated));
                    }
                    for (column, kind) in columns {
                        if RESERVED_FIELDS.contains(&column.as_str())
                            || own_columns.insert(column.clone(), kind).is_some()
                        {
                            return Err(QueryError::Schema(format!(
                                "relation {}.{} clashes with column {}",
                                decl.name, name, column
                            )));
                        }
                    }
                }
            }

            types.push(TypeInfo {
                name: decl.name.clone(),
                parent: parents[i],
                children: Vec::new(),
                ancestry: ancestries[i].clone(),
                table,
                own_columns,
                composites,
                relations: decl.relations.clone(),
                default_sort: decl.default_sort.clone(),
                versioned: root.versioned,
            });
        }

        for i in 0..types.len() {
            if let Some(p) = types[i].parent {
                types[p].children.push(i);
            }
        }

        Ok(Self {
            types,
            index,
            field_cache: RwLock::new(Arc::new(HashMap::new())),
        })
    }

    fn slot(&self, type_name: &str) -> Result<usize> {
        self.index
            .get(type_name)
            .copied()
            .ok_or_else(|| QueryError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.index.contains_key(type_name)
    }

    pub fn info(&self, type_name: &str) -> Result<&TypeInfo> {
        Ok(&self.types[self.slot(type_name)?])
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }

    /// Physical table owned by `type_name`, if it owns one
    pub fn table_for(&self, type_name: &str) -> Option<&str> {
        self.info(type_name).ok().and_then(TypeInfo::table)
    }

    /// Root-most type of the hierarchy (always owns a table)
    pub fn base_type(&self, type_name: &str) -> Result<&str> {
        let info = self.info(type_name)?;
        Ok(&self.types[info.ancestry[0]].name)
    }

    pub fn base_table(&self, type_name: &str) -> Result<&str> {
        let info = self.info(type_name)?;
        self.types[info.ancestry[0]]
            .table()
            .ok_or_else(|| QueryError::Schema(format!("{} has no base table", type_name)))
    }

    /// Type owning the physical table `table`
    pub fn type_for_table(&self, table: &str) -> Option<&str> {
        self.types
            .iter()
            .find(|t| t.table() == Some(table))
            .map(|t| t.name.as_str())
    }

    /// Type names from the root down to `type_name`
    pub fn ancestry(&self, type_name: &str) -> Result<Vec<&str>> {
        let info = self.info(type_name)?;
        Ok(info.ancestry.iter().map(|&i| self.types[i].name.as_str()).collect())
    }

    /// Owning tables along the ancestry, root first
    pub fn ancestry_owning_tables(&self, type_name: &str) -> Result<Vec<TableRef<'_>>> {
        let info = self.info(type_name)?;
        Ok(info
            .ancestry
            .iter()
            .filter_map(|&i| {
                let t = &self.types[i];
                t.table().map(|table| TableRef {
                    class: &t.name,
                    table,
                })
            })
            .collect())
    }

    /// `type_name` followed by every descendant, depth first
    pub fn subtree(&self, type_name: &str) -> Result<Vec<&str>> {
        let mut out = Vec::new();
        let mut stack = vec![self.slot(type_name)?];
        while let Some(i) = stack.pop() {
            out.push(self.types[i].name.as_str());
            stack.extend(self.types[i].children.iter().rev());
        }
        Ok(out)
    }

    pub fn is_subclass_of(&self, type_name: &str, ancestor: &str) -> bool {
        self.ancestry(type_name)
            .map(|chain| chain.contains(&ancestor))
            .unwrap_or(false)
    }

    pub fn is_versioned(&self, type_name: &str) -> bool {
        self.info(type_name).map(|t| t.versioned).unwrap_or(false)
    }

    /// Columns stored in `type_name`'s own table (empty when it owns none)
    pub fn own_fields(&self, type_name: &str) -> Result<&BTreeMap<String, FieldKind>> {
        Ok(&self.info(type_name)?.own_columns)
    }

    /// Physical columns visible on `type_name`, optionally including every ancestor's
    pub fn all_fields(&self, type_name: &str, include_ancestors: bool) -> Result<Arc<FieldMap>> {
        let slot = self.slot(type_name)?;
        let key = (slot, include_ancestors);
        {
            let cache = self.field_cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(fields) = cache.get(&key) {
                return Ok(Arc::clone(fields));
            }
        }

        let mut fields = FieldMap::new();
        let chain: Vec<usize> = if include_ancestors {
            self.types[slot].ancestry.clone()
        } else {
            vec![slot]
        };
        for i in chain {
            for (name, kind) in &self.types[i].own_columns {
                fields.insert(name.clone(), *kind);
            }
        }
        let fields = Arc::new(fields);

        let mut cache = self.field_cache.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&cache);
        next.insert(key, Arc::clone(&fields));
        *cache = Arc::new(next);
        Ok(fields)
    }

    /// Type whose table stores `field`, searching `type_name` then its ancestors.
    /// Composite logical names resolve to the type storing their columns.
    pub fn class_for_field(&self, type_name: &str, field: &str) -> Option<&str> {
        let info = self.info(type_name).ok()?;
        if field == ID_COLUMN {
            return Some(&self.types[info.ancestry[0]].name);
        }
        info.ancestry.iter().rev().map(|&i| &self.types[i]).find_map(|t| {
            (t.own_columns.contains_key(field) || t.composites.contains_key(field)).then_some(t.name.as_str())
        })
    }

    /// Physical columns of a composite field visible on `type_name`
    pub fn composite_columns(&self, type_name: &str, field: &str) -> Option<&[String]> {
        let info = self.info(type_name).ok()?;
        info.ancestry
            .iter()
            .rev()
            .find_map(|&i| self.types[i].composites.get(field))
            .map(Vec::as_slice)
    }

    /// Relation named `name` on `type_name` or an ancestor, with its declaring type
    pub fn relation(&self, type_name: &str, name: &str) -> Option<(&str, &RelationDecl)> {
        let info = self.info(type_name).ok()?;
        info.ancestry.iter().rev().map(|&i| &self.types[i]).find_map(|t| {
            t.relations
                .iter()
                .find(|r| r.name() == name)
                .map(|r| (t.name.as_str(), r))
        })
    }

    /// Relations declared on `type_name` itself
    pub fn own_relations(&self, type_name: &str) -> Result<&[RelationDecl]> {
        Ok(&self.info(type_name)?.relations)
    }

    pub fn default_sort(&self, type_name: &str) -> Option<&str> {
        let info = self.info(type_name).ok()?;
        info.ancestry
            .iter()
            .rev()
            .find_map(|&i| self.types[i].default_sort.as_deref())
    }

    /// Drop every memoized field map in one swap
    pub fn reset(&self) {
        let mut cache = self.field_cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Arc::new(HashMap::new());
    }

    pub fn cached_field_maps(&self) -> usize {
        self.field_cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Bootstrap DDL for every owning table, its stage and history tables,
    /// and many-many join tables
    pub fn generate_ddl(&self, stages: &StageSet, dialect: Dialect) -> String {
        let mut statements = Vec::new();

        for info in &self.types {
            let Some(table) = info.table() else { continue };
            let columns: Vec<(String, FieldKind)> = info
                .own_columns
                .iter()
                .map(|(name, kind)| (name.clone(), *kind))
                .collect();
            statements.push(self.generate_table_ddl(dialect, table, &columns));

            if info.versioned {
                for stage in stages.suffixed() {
                    statements.push(self.generate_table_ddl(dialect, &stages.stage_table(table, stage), &columns));
                }
                let mut history: Vec<(String, FieldKind)> = HISTORY_COLUMNS
                    .iter()
                    .map(|(name, kind)| (name.to_string(), *kind))
                    .collect();
                history.extend(columns.iter().filter(|(name, _)| name != VERSION_COLUMN).cloned());
                let history_table = versions_table(table);
                statements.push(self.generate_table_ddl(dialect, &history_table, &history));
                statements.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}, {});",
                    dialect.quote(&format!("{}_RecordID_Version", history_table)),
                    dialect.quote(&history_table),
                    dialect.quote("RecordID"),
                    dialect.quote(VERSION_COLUMN)
                ));
            }

            for relation in &info.relations {
                if let RelationDecl::ManyMany { name, target } = relation {
                    let join = JoinTable::for_relation(&info.name, name, target);
                    statements.push(self.generate_table_ddl(
                        dialect,
                        &join.table,
                        &[
                            (join.parent_field.clone(), FieldKind::ForeignKey),
                            (join.child_field.clone(), FieldKind::ForeignKey),
                        ],
                    ));
                }
            }
        }

        statements.join("\n\n")
    }

    /// Generate CREATE TABLE SQL for a single table
    pub fn generate_table_ddl(&self, dialect: Dialect, table: &str, columns: &[(String, FieldKind)]) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", dialect.quote(table));
        let mut defs = vec![format!("    {} INTEGER PRIMARY KEY", dialect.quote(ID_COLUMN))];
        defs.extend(
            columns
                .iter()
                .map(|(name, kind)| format!("    {} {}", dialect.quote(name), kind.to_sql())),
        );
        sql.push_str(&defs.join(",\n"));
        sql.push_str("\n);");
        sql
    }
}
