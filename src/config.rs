use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::read_to_string, path::Path, time::Duration};

use crate::{error::FieldsyncError, source::frontmatter::FRONTMATTER_SOURCE_ID};

/// Tuning for the [`MetadataManager`](crate::manager::MetadataManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ticks after a local write during which external updates of the same item are ignored.
    /// Must outlast the round trip of the slowest source's external sync.
    pub write_lock_cycles: u32,
    /// Ticks an item without subscribers is kept before its source is asked to drop it.
    pub inactivity_threshold: u32,
    /// Interval of the maintenance tick spawned by `MetadataManager::start`.
    pub tick_interval_ms: u64,
    /// Source used for declarations that do not name one.
    pub default_source: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            write_lock_cycles: 5,
            inactivity_threshold: 300,
            tick_interval_ms: 200,
            default_source: FRONTMATTER_SOURCE_ID.to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<(), FieldsyncError> {
        if self.tick_interval_ms == 0 {
            return Err(FieldsyncError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_source.is_empty() {
            return Err(FieldsyncError::Config(
                "default_source must name a metadata source".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the `[manager]` table of a TOML document. A missing table yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, FieldsyncError> {
        let mut tables: BTreeMap<String, ManagerConfig> = toml::from_str(content)?;
        let config = tables.remove("manager").unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Like [`ManagerConfig::from_toml_str`]; a missing file yields the defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, FieldsyncError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read manager config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using default manager config.");
            return Ok(ManagerConfig::default());
        }
        let content = read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, FieldsyncError> {
        let mut tables = BTreeMap::new();
        tables.insert("manager".to_string(), self.clone());
        Ok(toml::to_string(&tables)?)
    }
}
