//! Store configuration
//!
//! Settings live in a JSON file next to the store (`state.jmt` reads
//! `state.jmt.config.json`). A missing file means defaults.

use crate::store::{LruNodeCache, NodeCache};
use crate::trie::{IterOptions, MAX_PREFIX_LEN};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hex-encoded prefix for node keys of new tries
    pub tree_prefix: String,
    /// Decoded nodes kept in the shared cache, 0 disables it
    pub node_cache_capacity: usize,
    /// fsync every write batch
    pub sync_writes: bool,
    pub iterator: IteratorConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IteratorConfig {
    pub queue_capacity: usize,
    /// Per-emission timeout, `None` to wait indefinitely
    pub emit_timeout_ms: Option<u64>,
    pub leaves_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tree_prefix: String::new(),
            node_cache_capacity: LruNodeCache::DEFAULT_CAPACITY,
            sync_writes: true,
            iterator: IteratorConfig::default(),
        }
    }
}

impl Default for IteratorConfig {
    fn default() -> Self {
        IteratorConfig {
            queue_capacity: 256,
            emit_timeout_ms: Some(30_000),
            leaves_only: false,
        }
    }
}

impl Config {
    /// Load the config for the store at `store_path`
    pub fn load(store_path: &Path) -> Result<Self> {
        let config_path = Self::config_path(store_path);
        let config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save the config next to the store at `store_path`
    pub fn save(&self, store_path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path(store_path), content)?;
        Ok(())
    }

    pub fn config_path(store_path: &Path) -> PathBuf {
        let mut config_path = store_path.to_path_buf();
        let file_name = store_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.jmt".to_string());
        config_path.set_file_name(format!("{}.config.json", file_name));
        config_path
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterator.queue_capacity == 0 {
            return Err(Error::Config(
                "iterator.queue_capacity must be at least 1".into(),
            ));
        }
        let prefix = self.tree_prefix_bytes()?;
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(Error::Config(format!(
                "tree_prefix is {} bytes, at most {} allowed",
                prefix.len(),
                MAX_PREFIX_LEN
            )));
        }
        Ok(())
    }

    pub fn tree_prefix_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.tree_prefix)
            .map_err(|e| Error::Config(format!("tree_prefix is not hex: {}", e)))
    }

    pub fn iter_options(&self) -> IterOptions {
        IterOptions {
            queue_capacity: self.iterator.queue_capacity,
            emit_timeout: self.iterator.emit_timeout_ms.map(Duration::from_millis),
            leaves_only: self.iterator.leaves_only,
        }
    }

    /// The shared node cache, if enabled
    pub fn node_cache(&self) -> Option<Arc<dyn NodeCache>> {
        match self.node_cache_capacity {
            0 => None,
            capacity => Some(Arc::new(LruNodeCache::with_capacity(capacity))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("state.jmt")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.iter_options(), IterOptions::default());
        assert!(config.node_cache().is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("state.jmt");
        let config = Config {
            tree_prefix: "abcd".into(),
            node_cache_capacity: 0,
            sync_writes: false,
            iterator: IteratorConfig {
                queue_capacity: 8,
                emit_timeout_ms: None,
                leaves_only: true,
            },
        };
        config.save(&store_path).unwrap();
        assert!(dir.path().join("state.jmt.config.json").exists());

        let loaded = Config::load(&store_path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tree_prefix_bytes().unwrap(), vec![0xab, 0xcd]);
        assert!(loaded.node_cache().is_none());
        assert_eq!(loaded.iter_options().emit_timeout, None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("state.jmt");
        std::fs::write(
            Config::config_path(&store_path),
            r#"{"iterator": {"queue_capacity": 4}}"#,
        )
        .unwrap();
        let config = Config::load(&store_path).unwrap();
        assert_eq!(config.iterator.queue_capacity, 4);
        assert_eq!(config.iterator.emit_timeout_ms, Some(30_000));
        assert!(config.sync_writes);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.iterator.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.tree_prefix = "zz".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.tree_prefix = "00".repeat(256);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
