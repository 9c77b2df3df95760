//! Relation resolver: turns relation names into joins.
//!
//! Every traversal step joins the relation's target hierarchy under aliases
//! derived from the relation path (`Writer_Member`, `Comments_Author_Member`)
//! and returns the target type, so dotted paths chain step by step and two
//! relations to the same table never share a join.

use crate::builder::{Condition, Dialect, JoinType, SelectBuilder};
use crate::catalog::{JoinTable, SchemaCatalog};
use crate::error::{QueryError, Result};
use crate::schema::{RelationDecl, ID_COLUMN};
use serde_json::Value;

/// Join priority of relation joins; inheritance joins use a lower one
pub const RELATION_JOIN_PRIORITY: i32 = 20;

/// Outcome of traversing one relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationStep {
    /// Type the relation was found on (the queried type or an ancestor)
    pub declaring: String,
    pub target: String,
    /// Alias prefix of the target hierarchy, the relation path joined by `_`
    pub prefix: String,
    /// False once any traversed relation is to-many
    pub linear: bool,
}

impl RelationStep {
    /// Alias under which `table` of the target hierarchy is joined
    pub fn alias_for(&self, table: &str) -> String {
        relation_alias(&self.prefix, table)
    }
}

/// `<prefix>_<table>`
pub fn relation_alias(prefix: &str, table: &str) -> String {
    format!("{}_{}", prefix, table)
}

/// The has-one on a remote type that backs an inverse relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJoinField {
    /// Type declaring the has-one
    pub class: String,
    pub table: String,
    /// `<Relation>ID`
    pub column: String,
    /// `<Relation>Class` for a polymorphic has-one
    pub class_column: Option<String>,
}

/// How a many-many relation is stored, seen from one side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyManyLink {
    pub join: JoinTable,
    /// Join table column holding the local record's identity
    pub local_field: String,
    /// Join table column holding the related record's identity
    pub remote_field: String,
    pub target: String,
}

fn unknown_relation(type_name: &str, relation: &str) -> QueryError {
    QueryError::UnknownRelation {
        type_name: type_name.to_string(),
        relation: relation.to_string(),
    }
}

/// Find the has-one on `target` (or its ancestors) pointing back at `local`.
///
/// `inverse` names the has-one explicitly; otherwise exactly one candidate
/// must exist. Polymorphic has-ones count as candidates.
pub fn remote_join_field(
    catalog: &SchemaCatalog,
    local: &str,
    relation: &str,
    target: &str,
    inverse: Option<&str>,
) -> Result<RemoteJoinField> {
    let mut candidates = Vec::new();
    for class in catalog.ancestry(target)? {
        for decl in catalog.own_relations(class)? {
            let RelationDecl::HasOne { name, target: points_to } = decl else {
                continue;
            };
            if inverse.is_some_and(|inv| inv != name.as_str()) {
                continue;
            }
            let matches = match points_to {
                Some(t) => catalog.is_subclass_of(local, t),
                None => true,
            };
            if matches {
                candidates.push((class, name.as_str(), points_to.is_none()));
            }
        }
    }

    match candidates.as_slice() {
        [] => Err(unknown_relation(target, inverse.unwrap_or(relation))),
        [(class, name, polymorphic)] => {
            let table = catalog
                .table_for(class)
                .ok_or_else(|| QueryError::Schema(format!("{} declares a has-one but owns no table", class)))?;
            Ok(RemoteJoinField {
                class: class.to_string(),
                table: table.to_string(),
                column: format!("{}ID", name),
                class_column: polymorphic.then(|| format!("{}Class", name)),
            })
        }
        many => Err(QueryError::AmbiguousRelation {
            type_name: local.to_string(),
            relation: relation.to_string(),
            candidates: many.iter().map(|(class, name, _)| format!("{}.{}", class, name)).collect(),
        }),
    }
}

/// Resolve the join table of a many-many or belongs-many-many relation on `owner`
pub fn many_many_link(catalog: &SchemaCatalog, owner: &str, relation: &str) -> Result<ManyManyLink> {
    let (declaring, decl) = catalog
        .relation(owner, relation)
        .ok_or_else(|| unknown_relation(owner, relation))?;

    match decl {
        RelationDecl::ManyMany { name, target } => {
            let join = JoinTable::for_relation(declaring, name, target);
            Ok(ManyManyLink {
                local_field: join.parent_field.clone(),
                remote_field: join.child_field.clone(),
                target: target.clone(),
                join,
            })
        }
        RelationDecl::BelongsManyMany { name, target, inverse } => {
            let mut candidates = Vec::new();
            for class in catalog.ancestry(target)? {
                for remote in catalog.own_relations(class)? {
                    let RelationDecl::ManyMany {
                        name: remote_name,
                        target: remote_target,
                    } = remote
                    else {
                        continue;
                    };
                    if inverse.as_deref().is_some_and(|inv| inv != remote_name.as_str()) {
                        continue;
                    }
                    if catalog.is_subclass_of(declaring, remote_target) {
                        candidates.push(JoinTable::for_relation(class, remote_name, remote_target));
                    }
                }
            }
            match candidates.len() {
                0 => Err(unknown_relation(target, inverse.as_deref().unwrap_or(name))),
                1 => {
                    let join = candidates.remove(0);
                    Ok(ManyManyLink {
                        local_field: join.child_field.clone(),
                        remote_field: join.parent_field.clone(),
                        target: target.clone(),
                        join,
                    })
                }
                _ => Err(QueryError::AmbiguousRelation {
                    type_name: owner.to_string(),
                    relation: relation.to_string(),
                    candidates: candidates.into_iter().map(|j| j.table).collect(),
                }),
            }
        }
        _ => Err(QueryError::Query(format!(
            "{}.{} is not a many-many relation",
            owner, relation
        ))),
    }
}

/// Left-join the remaining owning tables of `target` under `prefix`, keyed on
/// the identity of the already joined `entry_table`
fn join_target_tables(
    catalog: &SchemaCatalog,
    builder: &mut SelectBuilder,
    target: &str,
    prefix: &str,
    entry_table: &str,
) -> Result<()> {
    let dialect = builder.dialect();
    let entry_alias = relation_alias(prefix, entry_table);
    for table in catalog.ancestry_owning_tables(target)? {
        if table.table == entry_table {
            continue;
        }
        let alias = relation_alias(prefix, table.table);
        let on = format!(
            "{} = {}",
            dialect.column(&alias, ID_COLUMN),
            dialect.column(&entry_alias, ID_COLUMN)
        );
        builder.add_join(
            JoinType::Left,
            table.table,
            Some(&alias),
            Condition::raw(on),
            RELATION_JOIN_PRIORITY,
        );
    }
    Ok(())
}

fn hierarchy_guard(catalog: &SchemaCatalog, dialect: Dialect, table: &str, column: &str, local: &str) -> Result<Condition> {
    let classes = catalog
        .subtree(catalog.base_type(local)?)?
        .into_iter()
        .map(|c| Value::String(c.to_string()))
        .collect();
    Ok(Condition::is_in(dialect.column(table, column), classes))
}

/// Join relation `name` of `from` into `builder`.
///
/// `from_prefix` is the alias prefix `from`'s tables were joined under, `None`
/// for the queried hierarchy itself. `path` is only used for error reporting.
/// With `linear_only`, to-many relations are rejected.
pub fn apply_relation_step(
    catalog: &SchemaCatalog,
    builder: &mut SelectBuilder,
    from: &str,
    from_prefix: Option<&str>,
    name: &str,
    path: &str,
    linear_only: bool,
) -> Result<RelationStep> {
    let (declaring, decl) = catalog
        .relation(from, name)
        .ok_or_else(|| unknown_relation(from, name))?;
    if linear_only && !decl.is_linear() {
        return Err(QueryError::RelationNotLinear { path: path.to_string() });
    }
    let dialect = builder.dialect();
    let local = |table: &str| match from_prefix {
        Some(prefix) => relation_alias(prefix, table),
        None => table.to_string(),
    };
    let local_alias = local(catalog.base_table(from)?);
    let prefix = match from_prefix {
        Some(parent) => relation_alias(parent, name),
        None => name.to_string(),
    };

    let target = match decl {
        RelationDecl::HasOne { target: None, .. } => {
            return Err(QueryError::PolymorphicJoin { path: path.to_string() });
        }
        RelationDecl::HasOne {
            name,
            target: Some(target),
        } => {
            let owner_table = catalog
                .table_for(declaring)
                .ok_or_else(|| QueryError::Schema(format!("{} owns no table", declaring)))?;
            let target_table = catalog.base_table(target)?;
            let target_alias = relation_alias(&prefix, target_table);
            let on = format!(
                "{} = {}",
                dialect.column(&target_alias, ID_COLUMN),
                dialect.column(&local(owner_table), &format!("{}ID", name))
            );
            builder.add_join(
                JoinType::Left,
                target_table,
                Some(&target_alias),
                Condition::raw(on),
                RELATION_JOIN_PRIORITY,
            );
            join_target_tables(catalog, builder, target, &prefix, target_table)?;
            target.clone()
        }
        RelationDecl::HasMany { target, inverse, .. } | RelationDecl::BelongsTo { target, inverse, .. } => {
            let remote = remote_join_field(catalog, declaring, name, target, inverse.as_deref())?;
            let remote_alias = relation_alias(&prefix, &remote.table);
            let link = Condition::raw(format!(
                "{} = {}",
                dialect.column(&remote_alias, &remote.column),
                dialect.column(&local_alias, ID_COLUMN)
            ));
            let on = match &remote.class_column {
                Some(class_column) => Condition::all(vec![
                    link,
                    hierarchy_guard(catalog, dialect, &remote_alias, class_column, from)?,
                ]),
                None => link,
            };
            builder.add_join(
                JoinType::Left,
                remote.table.as_str(),
                Some(&remote_alias),
                on,
                RELATION_JOIN_PRIORITY,
            );
            join_target_tables(catalog, builder, target, &prefix, &remote.table)?;
            target.clone()
        }
        RelationDecl::ManyMany { .. } | RelationDecl::BelongsManyMany { .. } => {
            let link = many_many_link(catalog, from, name)?;
            let join_alias = relation_alias(&prefix, &link.join.table);
            let on = format!(
                "{} = {}",
                dialect.column(&join_alias, &link.local_field),
                dialect.column(&local_alias, ID_COLUMN)
            );
            builder.add_join(
                JoinType::Inner,
                link.join.table.as_str(),
                Some(&join_alias),
                Condition::raw(on),
                RELATION_JOIN_PRIORITY,
            );
            let target_table = catalog.base_table(&link.target)?;
            let target_alias = relation_alias(&prefix, target_table);
            let on = format!(
                "{} = {}",
                dialect.column(&target_alias, ID_COLUMN),
                dialect.column(&join_alias, &link.remote_field)
            );
            builder.add_join(
                JoinType::Left,
                target_table,
                Some(&target_alias),
                Condition::raw(on),
                RELATION_JOIN_PRIORITY,
            );
            join_target_tables(catalog, builder, &link.target, &prefix, target_table)?;
            link.target
        }
    };

    Ok(RelationStep {
        declaring: declaring.to_string(),
        target,
        prefix,
        linear: decl.is_linear(),
    })
}

/// Join every relation of a dotted path, returning the first step's
/// declaring type and the final target with its alias prefix
pub fn apply_relation_path(
    catalog: &SchemaCatalog,
    builder: &mut SelectBuilder,
    from: &str,
    path: &str,
    linear_only: bool,
) -> Result<RelationStep> {
    let mut steps = path.split('.').filter(|s| !s.is_empty());
    let first = steps
        .next()
        .ok_or_else(|| QueryError::Query("empty relation path".to_string()))?;
    let mut step = apply_relation_step(catalog, builder, from, None, first, path, linear_only)?;
    let declaring = step.declaring.clone();
    let mut linear = step.linear;
    for name in steps {
        step = apply_relation_step(
            catalog,
            builder,
            &step.target,
            Some(step.prefix.as_str()),
            name,
            path,
            linear_only,
        )?;
        linear &= step.linear;
    }
    Ok(RelationStep {
        declaring,
        target: step.target,
        prefix: step.prefix,
        linear,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, TypeDecl};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::build(vec![
            TypeDecl::new("Article")
                .field("Title", FieldKind::String)
                .has_one("Writer", "Member")
                .has_many("Comments", "Comment", None)
                .many_many("Tags", "Tag"),
            TypeDecl::new("Member")
                .field("Name", FieldKind::String)
                .has_many("Articles", "Article", None),
            TypeDecl::new("Staff").extends("Member").field("Role", FieldKind::String),
            TypeDecl::new("Comment")
                .field("Body", FieldKind::String)
                .has_one("Article", "Article")
                .has_one_polymorphic("Subject"),
            TypeDecl::new("Tag")
                .field("Label", FieldKind::String)
                .belongs_many_many("Articles", "Article", None),
            TypeDecl::new("Note").has_one_polymorphic("Subject"),
            TypeDecl::new("Page").has_many("Notes", "Note", None),
        ])
        .unwrap()
    }

    fn builder() -> SelectBuilder {
        let mut builder = SelectBuilder::new(Dialect::Ansi);
        builder.set_from("Article", None);
        builder
    }

    #[test]
    fn test_has_one_joins_target_hierarchy() {
        let catalog = SchemaCatalog::build(vec![
            TypeDecl::new("Article").has_one("Writer", "Staff"),
            TypeDecl::new("Member").field("Name", FieldKind::String),
            TypeDecl::new("Staff").extends("Member").field("Role", FieldKind::String),
        ])
        .unwrap();
        let mut builder = builder();
        let step = apply_relation_step(&catalog, &mut builder, "Article", None, "Writer", "Writer", true).unwrap();
        assert_eq!(step.target, "Staff");
        assert_eq!(step.alias_for("Staff"), "Writer_Staff");
        assert!(step.linear);
        let sql = builder.compile().unwrap().sql;
        assert!(sql.contains(
            "LEFT JOIN \"Member\" AS \"Writer_Member\" ON \"Writer_Member\".\"ID\" = \"Article\".\"WriterID\""
        ));
        assert!(sql.contains(
            "LEFT JOIN \"Staff\" AS \"Writer_Staff\" ON \"Writer_Staff\".\"ID\" = \"Writer_Member\".\"ID\""
        ));
    }

    #[test]
    fn test_relations_to_same_table_get_separate_joins() {
        let catalog = SchemaCatalog::build(vec![
            TypeDecl::new("Article")
                .has_one("Writer", "Member")
                .has_one("Editor", "Member"),
            TypeDecl::new("Member").field("Name", FieldKind::String),
        ])
        .unwrap();
        let mut builder = builder();
        apply_relation_step(&catalog, &mut builder, "Article", None, "Writer", "Writer", true).unwrap();
        apply_relation_step(&catalog, &mut builder, "Article", None, "Editor", "Editor", true).unwrap();
        assert_eq!(builder.aliases(), vec!["Article", "Writer_Member", "Editor_Member"]);
        let sql = builder.compile().unwrap().sql;
        assert!(sql.contains("\"Editor_Member\".\"ID\" = \"Article\".\"EditorID\""));
    }

    #[test]
    fn test_self_reference_joins_under_path_alias() {
        let catalog =
            SchemaCatalog::build(vec![TypeDecl::new("Page").has_one("Parent", "Page")]).unwrap();
        let mut builder = SelectBuilder::new(Dialect::Ansi);
        builder.set_from("Page", None);
        let step = apply_relation_step(&catalog, &mut builder, "Page", None, "Parent", "Parent", true).unwrap();
        assert_eq!(step.alias_for("Page"), "Parent_Page");
        assert_eq!(
            builder.compile().unwrap().sql,
            "SELECT * FROM \"Page\" LEFT JOIN \"Page\" AS \"Parent_Page\" \
             ON \"Parent_Page\".\"ID\" = \"Page\".\"ParentID\""
        );
    }

    #[test]
    fn test_many_many_joins_through_join_table() {
        let catalog = catalog();
        let mut builder = builder();
        apply_relation_step(&catalog, &mut builder, "Article", None, "Tags", "Tags", false).unwrap();
        assert_eq!(
            builder.compile().unwrap().sql,
            "SELECT * FROM \"Article\" \
             INNER JOIN \"Article_Tags\" AS \"Tags_Article_Tags\" \
             ON \"Tags_Article_Tags\".\"ArticleID\" = \"Article\".\"ID\" \
             LEFT JOIN \"Tag\" AS \"Tags_Tag\" ON \"Tags_Tag\".\"ID\" = \"Tags_Article_Tags\".\"TagID\""
        );
    }

    #[test]
    fn test_belongs_many_many_uses_remote_join_table() {
        let catalog = catalog();
        let link = many_many_link(&catalog, "Tag", "Articles").unwrap();
        assert_eq!(link.join.table, "Article_Tags");
        assert_eq!(link.local_field, "TagID");
        assert_eq!(link.remote_field, "ArticleID");
    }

    #[test]
    fn test_has_many_is_ambiguous_without_inverse() {
        let catalog = catalog();
        let mut builder = builder();
        let err = apply_relation_step(&catalog, &mut builder, "Article", None, "Comments", "Comments", false).unwrap_err();
        assert!(matches!(err, QueryError::AmbiguousRelation { .. }));
    }

    #[test]
    fn test_has_many_with_inverse() {
        let catalog = SchemaCatalog::build(vec![
            TypeDecl::new("Article").has_many("Comments", "Comment", Some("Article")),
            TypeDecl::new("Comment")
                .has_one("Article", "Article")
                .has_one_polymorphic("Subject"),
        ])
        .unwrap();
        let mut builder = builder();
        apply_relation_step(&catalog, &mut builder, "Article", None, "Comments", "Comments", false).unwrap();
        assert!(builder
            .compile()
            .unwrap()
            .sql
            .contains("LEFT JOIN \"Comment\" AS \"Comments_Comment\" ON \"Comments_Comment\".\"ArticleID\" = \"Article\".\"ID\""));
    }

    #[test]
    fn test_polymorphic_inverse_adds_type_guard() {
        let catalog = catalog();
        let mut builder = SelectBuilder::new(Dialect::Ansi);
        builder.set_from("Page", None);
        apply_relation_step(&catalog, &mut builder, "Page", None, "Notes", "Notes", false).unwrap();
        let compiled = builder.compile().unwrap();
        assert!(compiled.sql.contains(
            "LEFT JOIN \"Note\" AS \"Notes_Note\" \
             ON (\"Notes_Note\".\"SubjectID\" = \"Page\".\"ID\" AND \"Notes_Note\".\"SubjectClass\" IN (?))"
        ));
        assert_eq!(compiled.params, vec![Value::String("Page".to_string())]);
    }

    #[test]
    fn test_polymorphic_has_one_cannot_join() {
        let catalog = catalog();
        let mut builder = SelectBuilder::new(Dialect::Ansi);
        builder.set_from("Comment", None);
        let err = apply_relation_step(&catalog, &mut builder, "Comment", None, "Subject", "Subject.Title", false).unwrap_err();
        assert!(matches!(err, QueryError::PolymorphicJoin { path } if path == "Subject.Title"));
    }

    #[test]
    fn test_linear_only_rejects_to_many() {
        let catalog = catalog();
        let mut builder = builder();
        let err = apply_relation_step(&catalog, &mut builder, "Article", None, "Tags", "Tags.Label", true).unwrap_err();
        assert!(matches!(err, QueryError::RelationNotLinear { .. }));
    }

    #[test]
    fn test_chained_path() {
        let catalog = catalog();
        let mut builder = SelectBuilder::new(Dialect::Ansi);
        builder.set_from("Tag", None);
        let step = apply_relation_path(&catalog, &mut builder, "Tag", "Articles.Writer", false).unwrap();
        assert_eq!(step.declaring, "Tag");
        assert_eq!(step.target, "Member");
        assert!(!step.linear);
        let aliases = builder.aliases();
        assert_eq!(
            aliases,
            vec!["Tag", "Articles_Article_Tags", "Articles_Article", "Articles_Writer_Member"]
        );
        assert!(builder
            .compile()
            .unwrap()
            .sql
            .contains("ON \"Articles_Writer_Member\".\"ID\" = \"Articles_Article\".\"WriterID\""));
    }

    #[test]
    fn test_unknown_relation() {
        let catalog = catalog();
        let mut builder = builder();
        assert!(matches!(
            apply_relation_step(&catalog, &mut builder, "Article", None, "Nope", "Nope", false).unwrap_err(),
            QueryError::UnknownRelation { .. }
        ));
    }
}
