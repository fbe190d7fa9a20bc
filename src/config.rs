//! Engine Configuration
//!
//! One JSON document with a section per subsystem. Every field has a
//! default, so a partial file (or `{}`) is valid.
//!
//! ```json
//! {
//!   "expiry":      { "base_interval_ms": 100, "sweep_batch": 1000 },
//!   "eviction":    { "max_memory": 0, "policy": "lru" },
//!   "persistence": { "enabled": true, "dir": "data", "fsync": "batched" },
//!   "log_level":   "info"
//! }
//! ```

use crate::persistence::PersistenceConfig;
use crate::storage::{EvictionConfig, ExpiryConfig};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub expiry: ExpiryConfig,

    pub eviction: EvictionConfig,

    pub persistence: PersistenceConfig,

    /// Default tracing filter; `RUST_LOG` takes precedence (default: "info")
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry: ExpiryConfig::default(),
            eviction: EvictionConfig::default(),
            persistence: PersistenceConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads the configuration at `path`.
    ///
    /// A missing file is created with the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Writes the configuration to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("failed to encode config")?;
        fs::write(path, text)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FsyncMode;
    use crate::storage::EvictionKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("emberkv.json");

        let config = EngineConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.log_level, "info");
        assert!(!config.persistence.enabled);

        let again = EngineConfig::load(&path).unwrap();
        assert_eq!(again.expiry.sweep_batch, config.expiry.sweep_batch);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emberkv.json");
        fs::write(
            &path,
            r#"{
                "eviction": { "max_memory": 1048576, "policy": "lfu" },
                "persistence": { "enabled": true, "fsync": "always" }
            }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.eviction.max_memory, 1_048_576);
        assert_eq!(config.eviction.policy, EvictionKind::Lfu);
        assert_eq!(config.persistence.fsync, FsyncMode::Always);
        assert_eq!(config.persistence.max_pending, 64);
        assert_eq!(config.expiry.base_interval_ms, 100);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emberkv.json");
        fs::write(&path, "{ not json").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
