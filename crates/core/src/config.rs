//! TOML-based configuration for a Converge instance.
//!
//! Only two concerns live here: whether cloud synchronization is enabled
//! (and for which server), and how aggressively the merge resolver debounces
//! conflict checks. Everything else the core needs is passed in explicitly.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Cloud synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Merge resolver settings.
    #[serde(default)]
    pub merging: MergingConfig,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Cloud synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Set to `true` to enable cloud sync. Disabled by default.
    #[serde(default)]
    pub use_sync: bool,

    /// Id of the cloud server instance used for synchronization. Required
    /// when `use_sync` is set.
    #[serde(default)]
    pub server_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            use_sync: false,
            server_id: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergingConfig {
    /// Upper bound, in milliseconds, of the randomized delay applied before
    /// each conflict check. Racing devices pick different delays and avoid
    /// producing duplicate merge commits (default 100).
    #[serde(default = "default_max_merging_delay_ms")]
    pub max_merging_delay_ms: u64,
}

fn default_max_merging_delay_ms() -> u64 {
    100
}

impl Default for MergingConfig {
    fn default() -> Self {
        Self {
            max_merging_delay_ms: default_max_merging_delay_ms(),
        }
    }
}

impl MergingConfig {
    pub fn max_merging_delay(&self) -> Duration {
        Duration::from_millis(self.max_merging_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        info!(path = %path.display(), "loading configuration");

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        debug!(use_sync = config.sync.use_sync, "configuration loaded");
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.use_sync && self.sync.server_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.server_id".into(),
                detail: "must not be empty when sync.use_sync is enabled".into(),
            });
        }
        Ok(())
    }

    /// Flat key/value view of the configuration, used by status surfaces.
    pub fn summary(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("sync.use_sync".into(), self.sync.use_sync.to_string());
        map.insert("sync.server_id".into(), self.sync.server_id.clone());
        map.insert(
            "merging.max_merging_delay_ms".into(),
            self.merging.max_merging_delay_ms.to_string(),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty config parses");
        assert!(!config.sync.use_sync);
        assert_eq!(config.merging.max_merging_delay_ms, 100);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [sync]
            use_sync = true
            server_id = "instance-7"

            [merging]
            max_merging_delay_ms = 250
        "#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse config");
        assert!(config.sync.use_sync);
        assert_eq!(config.sync.server_id, "instance-7");
        assert_eq!(
            config.merging.max_merging_delay(),
            Duration::from_millis(250)
        );
        config.validate().expect("valid");
    }

    #[test]
    fn test_sync_requires_server_id() {
        let toml_str = r#"
            [sync]
            use_sync = true
        "#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse config");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync.server_id"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/converge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("converge.toml");
        std::fs::write(
            &path,
            "[merging]\nmax_merging_delay_ms = 5\n",
        )
        .expect("write config");

        let config = AppConfig::load(&path).expect("load config");
        assert_eq!(config.merging.max_merging_delay_ms, 5);
        assert!(!config.sync.use_sync);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("converge.toml");
        std::fs::write(&path, "[merging\n").expect("write config");

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
