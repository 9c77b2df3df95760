//! Static, load-time schema declarations.
//!
//! A [`TypeDecl`] describes one entity type: its parent, own fields,
//! relations and table overrides. Declarations derive serde so they can be
//! parsed from configuration; [`SchemaCatalog`](crate::catalog::SchemaCatalog)
//! turns a set of them into the precomputed lookup index used by the compilers.

use serde::{Deserialize, Serialize};

/// Column names every owning table or base table carries implicitly.
pub const ID_COLUMN: &str = "ID";
pub const CLASS_COLUMN: &str = "ClassName";
pub const CREATED_COLUMN: &str = "Created";
pub const LAST_EDITED_COLUMN: &str = "LastEdited";
pub const VERSION_COLUMN: &str = "Version";

/// Primitive kind of a physical column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Integer,
    String,
    Boolean,
    Timestamp,
    Decimal,
    Enumerated,
    ForeignKey,
    PolymorphicForeignKey,
}

impl FieldKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            FieldKind::Integer | FieldKind::ForeignKey | FieldKind::PolymorphicForeignKey => "BIGINT",
            FieldKind::String | FieldKind::Enumerated => "TEXT",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Timestamp => "TIMESTAMP",
            FieldKind::Decimal => "DECIMAL(19,4)",
        }
    }

    /// Whether the column stores another record's identity
    pub fn is_foreign_key(&self) -> bool {
        matches!(self, FieldKind::ForeignKey | FieldKind::PolymorphicForeignKey)
    }
}

/// One physical column of a composite field, named `<Field><suffix>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositePart {
    pub suffix: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldType {
    Scalar(FieldKind),
    Composite(Vec<CompositePart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDecl {
    /// Physical columns this field expands to, keyed by column name.
    ///
    /// Composite parts are deduplicated by suffix and returned sorted, so
    /// the expansion does not depend on declaration order.
    pub fn columns(&self) -> Vec<(String, FieldKind)> {
        match &self.field_type {
            FieldType::Scalar(kind) => vec![(self.name.clone(), *kind)],
            FieldType::Composite(parts) => {
                let mut columns: Vec<(String, FieldKind)> = parts
                    .iter()
                    .map(|p| (format!("{}{}", self.name, p.suffix), p.kind))
                    .collect();
                columns.sort_by(|a, b| a.0.cmp(&b.0));
                columns.dedup_by(|a, b| a.0 == b.0);
                columns
            }
        }
    }
}

/// Relation declarations. Targets name entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RelationDecl {
    /// To-one, stored as `<name>ID` on the declaring type. A `None` target
    /// is polymorphic and also stores `<name>Class`.
    HasOne { name: String, target: Option<String> },
    /// Inverse of a remote `HasOne`
    BelongsTo {
        name: String,
        target: String,
        inverse: Option<String>,
    },
    /// Inverse foreign key on the target, optionally naming the remote has-one
    HasMany {
        name: String,
        target: String,
        inverse: Option<String>,
    },
    /// Through the join table `<DeclaringType>_<name>`
    ManyMany { name: String, target: String },
    /// Inverse of a remote `ManyMany`
    BelongsManyMany {
        name: String,
        target: String,
        inverse: Option<String>,
    },
}

impl RelationDecl {
    pub fn name(&self) -> &str {
        match self {
            RelationDecl::HasOne { name, .. }
            | RelationDecl::BelongsTo { name, .. }
            | RelationDecl::HasMany { name, .. }
            | RelationDecl::ManyMany { name, .. }
            | RelationDecl::BelongsManyMany { name, .. } => name,
        }
    }

    /// Target type, `None` for a polymorphic has-one
    pub fn target(&self) -> Option<&str> {
        match self {
            RelationDecl::HasOne { target, .. } => target.as_deref(),
            RelationDecl::BelongsTo { target, .. }
            | RelationDecl::HasMany { target, .. }
            | RelationDecl::ManyMany { target, .. }
            | RelationDecl::BelongsManyMany { target, .. } => Some(target),
        }
    }

    /// To-one relations can be traversed inside sort expressions
    pub fn is_linear(&self) -> bool {
        matches!(self, RelationDecl::HasOne { .. } | RelationDecl::BelongsTo { .. })
    }
}

/// Declaration of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub relations: Vec<RelationDecl>,
    #[serde(default)]
    pub default_sort: Option<String>,
    /// Only meaningful on a root type; applies to the whole hierarchy
    #[serde(default)]
    pub versioned: bool,
}

impl TypeDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            field_type: FieldType::Scalar(kind),
        });
        self
    }

    pub fn composite(mut self, name: impl Into<String>, parts: &[(&str, FieldKind)]) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            field_type: FieldType::Composite(
                parts
                    .iter()
                    .map(|(suffix, kind)| CompositePart {
                        suffix: suffix.to_string(),
                        kind: *kind,
                    })
                    .collect(),
            ),
        });
        self
    }

    pub fn has_one(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relations.push(RelationDecl::HasOne {
            name: name.into(),
            target: Some(target.into()),
        });
        self
    }

    pub fn has_one_polymorphic(mut self, name: impl Into<String>) -> Self {
        self.relations.push(RelationDecl::HasOne {
            name: name.into(),
            target: None,
        });
        self
    }

    pub fn belongs_to(mut self, name: impl Into<String>, target: impl Into<String>, inverse: Option<&str>) -> Self {
        self.relations.push(RelationDecl::BelongsTo {
            name: name.into(),
            target: target.into(),
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn has_many(mut self, name: impl Into<String>, target: impl Into<String>, inverse: Option<&str>) -> Self {
        self.relations.push(RelationDecl::HasMany {
            name: name.into(),
            target: target.into(),
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn many_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relations.push(RelationDecl::ManyMany {
            name: name.into(),
            target: target.into(),
        });
        self
    }

    pub fn belongs_many_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.relations.push(RelationDecl::BelongsManyMany {
            name: name.into(),
            target: target.into(),
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn default_sort(mut self, sort: impl Into<String>) -> Self {
        self.default_sort = Some(sort.into());
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// A type owns a table when it stores anything itself or hangs directly off the root
    pub fn owns_table(&self) -> bool {
        self.parent.is_none()
            || !self.fields.is_empty()
            || self
                .relations
                .iter()
                .any(|r| matches!(r, RelationDecl::HasOne { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_expansion_is_order_independent() {
        let a = TypeDecl::new("Product").composite(
            "Price",
            &[("Currency", FieldKind::String), ("Amount", FieldKind::Decimal)],
        );
        let b = TypeDecl::new("Product").composite(
            "Price",
            &[("Amount", FieldKind::Decimal), ("Currency", FieldKind::String)],
        );
        assert_eq!(a.fields[0].columns(), b.fields[0].columns());
        assert_eq!(
            a.fields[0].columns(),
            vec![
                ("PriceAmount".to_string(), FieldKind::Decimal),
                ("PriceCurrency".to_string(), FieldKind::String),
            ]
        );
    }

    #[test]
    fn test_owns_table_rule() {
        assert!(TypeDecl::new("Article").owns_table());
        assert!(!TypeDecl::new("Plain").extends("Article").owns_table());
        assert!(TypeDecl::new("Featured")
            .extends("Article")
            .field("Badge", FieldKind::String)
            .owns_table());
        assert!(TypeDecl::new("Linked")
            .extends("Article")
            .has_one("Author", "Member")
            .owns_table());
        assert!(!TypeDecl::new("Listed")
            .extends("Article")
            .has_many("Comments", "Comment", None)
            .owns_table());
    }

    #[test]
    fn test_decl_from_json() {
        let decl: TypeDecl = serde_json::from_value(serde_json::json!({
            "name": "FeaturedArticle",
            "parent": "Article",
            "fields": [{ "name": "Badge", "field_type": "String" }],
            "relations": [{ "kind": "HasOne", "name": "Author", "target": "Member" }]
        }))
        .unwrap();
        assert_eq!(decl.parent.as_deref(), Some("Article"));
        assert_eq!(decl.fields[0].columns()[0].0, "Badge");
        assert_eq!(decl.relations[0].target(), Some("Member"));
    }
}
