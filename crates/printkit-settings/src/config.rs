//! Configuration for PrintKit
//!
//! Configuration is organized into sections, one per subsystem:
//! - `[stream]`: job streaming and lifecycle scripts
//! - `[exclusion]`: object exclusion limits and timing
//! - `[locator]`: resume search tuning
//! - `[persistence]`: session variable file and write queue
//!
//! Files may be TOML or JSON and live in the platform config directory
//! by default.

use crate::error::{SettingsError, SettingsResult};
use printkit_exclusion::ExclusionConfig;
use printkit_locator::LocatorConfig;
use printkit_stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest history the locator is configured with from a file
pub const MIN_HISTORY_SIZE: usize = 10;

/// Session variable persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file holding the session variables
    pub variables_file: PathBuf,
    /// Pending snapshots allowed before writes are dropped
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            variables_file: dir.join("printkit").join("variables.json"),
            queue_capacity: 100,
        }
    }
}

/// Complete PrintKit configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintkitConfig {
    pub stream: StreamConfig,
    pub exclusion: ExclusionConfig,
    pub locator: LocatorConfig,
    pub persistence: PersistenceConfig,
}

impl PrintkitConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("printkit").join("printkit.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(SettingsError::LoadError(
                "Config file must be .json or .toml".to_string(),
            ));
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)?
        } else {
            return Err(SettingsError::SaveError(
                "Config file must be .json or .toml".to_string(),
            ));
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> SettingsResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let stream = &self.stream;
        if stream.chunk_size == 0 {
            return Err(SettingsError::invalid("stream.chunk_size", "must be > 0"));
        }
        if stream.read_timeout_ms == 0 {
            return Err(SettingsError::invalid("stream.read_timeout_ms", "must be > 0"));
        }

        let exclusion = &self.exclusion;
        if exclusion.max_objects == 0 {
            return Err(SettingsError::invalid("exclusion.max_objects", "must be > 0"));
        }
        if exclusion.overrun_threshold == 0 {
            return Err(SettingsError::invalid(
                "exclusion.overrun_threshold",
                "must be > 0",
            ));
        }

        let locator = &self.locator;
        if locator.history_size < MIN_HISTORY_SIZE {
            return Err(SettingsError::invalid(
                "locator.history_size",
                format!("must be at least {}", MIN_HISTORY_SIZE),
            ));
        }
        for (key, value) in [
            ("locator.dead_length", locator.dead_length),
            ("locator.gravity_min", locator.gravity_min),
            ("locator.gravity_target", locator.gravity_target),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::invalid(key, "must be a non-negative number"));
            }
        }
        if locator.gravity_configured()
            && locator.gravity_target > 0.0
            && locator.gravity_target < locator.gravity_min
        {
            return Err(SettingsError::invalid(
                "locator.gravity_target",
                "must not be below gravity_min",
            ));
        }

        if self.persistence.queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "persistence.queue_capacity",
                "must be > 0",
            ));
        }
        if self.persistence.variables_file.as_os_str().is_empty() {
            return Err(SettingsError::invalid(
                "persistence.variables_file",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PrintkitConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.chunk_size, 8192);
        assert_eq!(config.exclusion.overrun_threshold, 3);
        assert_eq!(config.locator.history_size, 500);
        assert_eq!(config.persistence.queue_capacity, 100);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PrintkitConfig = toml::from_str(
            r#"
[stream]
start_script = "HOME_ALL"

[locator]
dead_length = 20.0
"#,
        )
        .unwrap();
        assert_eq!(config.stream.start_script, "HOME_ALL");
        assert_eq!(config.stream.end_script, "END_PRINT");
        assert_eq!(config.locator.dead_length, 20.0);
        assert_eq!(config.locator.history_size, 500);
    }

    #[test]
    fn test_validation_rejects_small_history() {
        let mut config = PrintkitConfig::new();
        config.locator.history_size = 5;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_inverted_gravity_window() {
        let mut config = PrintkitConfig::new();
        config.locator.gravity_min = 2.0;
        config.locator.gravity_target = 1.0;
        assert!(config.validate().is_err());

        config.locator.gravity_target = 3.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("printkit.toml");

        let mut config = PrintkitConfig::new();
        config.exclusion.max_objects = 12;
        config.persistence.variables_file = dir.path().join("vars.json");
        config.save_to_file(&path).unwrap();

        let loaded = PrintkitConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printkit.yaml");
        std::fs::write(&path, "stream: {}").unwrap();
        assert!(matches!(
            PrintkitConfig::load_from_file(&path),
            Err(SettingsError::LoadError(_))
        ));
    }
}
