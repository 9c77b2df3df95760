use serde::{Deserialize, Serialize};

/// Suffix of the append-only history table of each owning table
pub const VERSIONS_SUFFIX: &str = "_versions";

/// History table name for an owning table
pub fn versions_table(table: &str) -> String {
    format!("{}{}", table, VERSIONS_SUFFIX)
}

/// Named physical partitions of current (non-historical) state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet {
    /// Draft stage; its tables carry no suffix and own identity assignment
    pub default_stage: String,
    /// Stage treated as published
    pub live_stage: String,
    /// Every stage, including the default and live stages
    pub stages: Vec<String>,
}

impl Default for StageSet {
    fn default() -> Self {
        Self::draft_live()
    }
}

impl StageSet {
    /// The usual `Stage` / `Live` pair
    pub fn draft_live() -> Self {
        Self {
            default_stage: "Stage".to_string(),
            live_stage: "Live".to_string(),
            stages: vec!["Stage".to_string(), "Live".to_string()],
        }
    }

    /// Single-stage configuration where draft and live coincide
    pub fn single(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            default_stage: stage.clone(),
            live_stage: stage.clone(),
            stages: vec![stage],
        }
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    pub fn is_default(&self, stage: &str) -> bool {
        self.default_stage == stage
    }

    /// Stages stored in suffixed tables
    pub fn suffixed(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .map(String::as_str)
            .filter(move |s| !self.is_default(s))
    }

    /// Physical table of `table` in `stage`
    pub fn stage_table(&self, table: &str, stage: &str) -> String {
        if self.is_default(stage) {
            table.to_string()
        } else {
            format!("{}_{}", table, stage)
        }
    }
}

/// Configuration for an [`EntityStore`](crate::store::EntityStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Stage set shared by every versioned hierarchy
    pub stages: StageSet,
    /// Wrap each logical write in one backend transaction
    pub use_transactions: bool,
    /// chrono format for `Created` / `LastEdited` stamps
    pub timestamp_format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stages: StageSet::default(),
            use_transactions: true,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl StoreConfig {
    /// Current time rendered with [`StoreConfig::timestamp_format`]
    pub fn now(&self) -> String {
        chrono::Local::now().format(&self.timestamp_format).to_string()
    }
}
