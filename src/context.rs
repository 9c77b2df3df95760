use crate::builder::Dialect;
use crate::catalog::SchemaCatalog;
use crate::config::StoreConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cache key of a resolved stage version: (base table, stage, record id)
pub type VersionKey = (String, String, i64);

/// Everything compilation needs that outlives a single query or write.
///
/// Shared caches are replaced wholesale, never edited in place, so readers
/// holding an older snapshot stay consistent.
#[derive(Debug)]
pub struct CompilationContext {
    catalog: SchemaCatalog,
    config: StoreConfig,
    dialect: Dialect,
    versions: RwLock<Arc<HashMap<VersionKey, Option<i64>>>>,
}

impl CompilationContext {
    pub fn new(catalog: SchemaCatalog, config: StoreConfig) -> Self {
        Self::with_dialect(catalog, config, Dialect::default())
    }

    pub fn with_dialect(catalog: SchemaCatalog, config: StoreConfig, dialect: Dialect) -> Self {
        Self {
            catalog,
            config,
            dialect,
            versions: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cached_version(&self, key: &VersionKey) -> Option<Option<i64>> {
        let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
        versions.get(key).copied()
    }

    pub fn cache_version(&self, key: VersionKey, version: Option<i64>) {
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&versions);
        next.insert(key, version);
        *versions = Arc::new(next);
    }

    /// Forget every resolved stage version
    pub fn reset_versions(&self) {
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        *versions = Arc::new(HashMap::new());
    }

    /// Drop all derived state: field maps and version numbers
    pub fn reset(&self) {
        self.catalog.reset();
        self.reset_versions();
    }
}
