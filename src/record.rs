//! In-memory rows with per-field change tracking.

use crate::backend::QueryRow;
use crate::catalog::{SchemaCatalog, HISTORY_COLUMNS};
use crate::error::Result;
use crate::query::RECORD_CLASS_ALIAS;
use crate::schema::{CLASS_COLUMN, CREATED_COLUMN, ID_COLUMN, LAST_EDITED_COLUMN, VERSION_COLUMN};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// How a field differs from the value it was loaded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeLevel {
    /// Same value under a different representation (`"5"` vs `5`)
    Type,
    Value,
}

/// PHP-style loose comparison: numbers compare numerically across numeric
/// strings, booleans against 0/1, and null against empty values.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
    fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty() || s == "0",
            Value::Array(a) => a.is_empty(),
            Value::Object(_) => false,
        }
    }

    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Null, other) | (other, Value::Null) => is_empty(other),
        (Value::String(x), Value::String(y)) => match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// One logical row of an entity type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    type_name: String,
    id: Option<i64>,
    values: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    changed: BTreeMap<String, ChangeLevel>,
    relation_cache: HashMap<String, Option<Record>>,
}

impl Record {
    /// A new, unsaved record
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Hydrate a record from a compiled entity query row.
    ///
    /// The row's effective type decides the record type; an unknown type
    /// falls back to the base type of `queried_type`.
    pub fn hydrate(catalog: &SchemaCatalog, queried_type: &str, row: &QueryRow) -> Result<Self> {
        let effective = row.get_string(RECORD_CLASS_ALIAS);
        let type_name = match effective {
            Some(name) if catalog.contains(&name) => name,
            other => {
                let base = catalog.base_type(queried_type)?.to_string();
                if let Some(name) = other {
                    warn!(class = %name, fallback = %base, "unknown record class, hydrating as base type");
                }
                base
            }
        };

        let values: BTreeMap<String, Value> = row
            .columns
            .iter()
            .filter(|(column, _)| column.as_str() != RECORD_CLASS_ALIAS && !column.starts_with('_'))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let id = values.get(ID_COLUMN).and_then(Value::as_i64);

        Ok(Self {
            type_name,
            id,
            original: values.clone(),
            values,
            changed: BTreeMap::new(),
            relation_cache: HashMap::new(),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn version(&self) -> Option<i64> {
        self.get_i64(VERSION_COLUMN).filter(|v| *v > 0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        match self.values.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn original(&self) -> &BTreeMap<String, Value> {
        &self.original
    }

    /// Assign a field, classifying the change against the loaded value
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        let field = field.into();
        let original = self.original.get(&field).unwrap_or(&Value::Null);
        let level = if *original == value {
            None
        } else if loosely_equal(original, &value) {
            Some(ChangeLevel::Type)
        } else {
            Some(ChangeLevel::Value)
        };

        let reassigned = self.values.get(&field) != Some(&value);
        if field.ends_with("ID") && reassigned {
            self.relation_cache.clear();
        }

        match level {
            Some(level) => {
                self.changed.insert(field.clone(), level);
            }
            None => {
                self.changed.remove(&field);
            }
        }
        if field == CLASS_COLUMN {
            if let Some(class) = value.as_str() {
                self.type_name = class.to_string();
            }
        }
        self.values.insert(field, value);
        self
    }

    /// Mark `field` as changed at `level` regardless of its value
    pub fn mark_changed(&mut self, field: &str, level: ChangeLevel) {
        let entry = self.changed.entry(field.to_string()).or_insert(level);
        *entry = (*entry).max(level);
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains_key(field)
    }

    pub fn change_level(&self, field: &str) -> Option<ChangeLevel> {
        self.changed.get(field).copied()
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = (&str, ChangeLevel)> {
        self.changed.iter().map(|(f, l)| (f.as_str(), *l))
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Mark every loaded field, and every field the type declares, as changed
    pub fn force_change(&mut self, catalog: &SchemaCatalog) -> Result<()> {
        let fields = catalog.all_fields(&self.type_name, true)?;
        for field in fields.keys() {
            self.values.entry(field.clone()).or_insert(Value::Null);
        }
        let loaded: Vec<String> = self
            .values
            .keys()
            .filter(|f| f.as_str() != ID_COLUMN)
            .cloned()
            .collect();
        for field in loaded {
            self.mark_changed(&field, ChangeLevel::Type);
        }
        Ok(())
    }

    /// Unsaved copy carrying every field as a change
    pub fn duplicate(&self, catalog: &SchemaCatalog) -> Result<Self> {
        let mut copy = Record::new(self.type_name.clone());
        copy.values = self
            .values
            .iter()
            .filter(|(field, _)| !is_bookkeeping(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        copy.force_change(catalog)?;
        Ok(copy)
    }

    /// Remove history-only columns so the record can be written to a stage
    pub fn strip_history_columns(&mut self) {
        for (column, _) in HISTORY_COLUMNS {
            if column != VERSION_COLUMN {
                self.values.remove(column);
                self.original.remove(column);
                self.changed.remove(column);
            }
        }
    }

    /// Merge lazily loaded columns without marking them changed
    pub fn merge_loaded(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        for (field, value) in values {
            if self.values.contains_key(&field) || field == RECORD_CLASS_ALIAS {
                continue;
            }
            self.original.insert(field.clone(), value.clone());
            self.values.insert(field, value);
        }
    }

    /// Record a successful write: identity assigned, snapshot refreshed
    pub(crate) fn mark_written(&mut self, id: i64) {
        self.id = Some(id);
        self.values.insert(ID_COLUMN.to_string(), Value::from(id));
        self.original = self.values.clone();
        self.changed.clear();
    }

    /// Memoized to-one relation, `Some(None)` when resolved to nothing
    pub fn cached_component(&self, relation: &str) -> Option<Option<&Record>> {
        self.relation_cache.get(relation).map(Option::as_ref)
    }

    pub fn cache_component(&mut self, relation: impl Into<String>, component: Option<Record>) {
        self.relation_cache.insert(relation.into(), component);
    }

    pub fn clear_relation_cache(&mut self) {
        self.relation_cache.clear();
    }
}

fn is_bookkeeping(field: &str) -> bool {
    [ID_COLUMN, VERSION_COLUMN, CREATED_COLUMN, LAST_EDITED_COLUMN].contains(&field)
        || HISTORY_COLUMNS.iter().any(|(column, _)| *column == field)
}
