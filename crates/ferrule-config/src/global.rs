//! Global Configuration (~/.ferrule/config.toml)
//!
//! Handles user-level configuration stored in `~/.ferrule/config.toml`.

use crate::project::{LoggingConfig, RuntimeConfig};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.ferrule/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Library search settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<SearchConfig>,

    /// Runtime defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,

    /// Logging defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// User-wide library search directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(runtime) = &self.runtime {
            runtime.validate()?;
        }
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.ferrule/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ferrule").join("config.toml"))
    }

    /// User-wide search directories
    pub fn search_paths(&self) -> &[PathBuf] {
        self.library
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Get the default log level
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.library.is_some() {
            self.library = other.library.clone();
        }
        if let Some(runtime) = &other.runtime {
            self.runtime
                .get_or_insert_with(RuntimeConfig::default)
                .merge(runtime);
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_global_config() {
        let toml = r#"
[logging]
level = "info"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.log_level(), Some("info"));
        assert!(config.search_paths().is_empty());
    }

    #[test]
    fn test_parse_full_global_config() {
        let toml = r#"
[library]
search_paths = ["/usr/local/lib/demo"]

[runtime]
gc_threshold = 0
max_repr_depth = 4

[logging]
level = "trace"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.search_paths(),
            &[PathBuf::from("/usr/local/lib/demo")]
        );
        assert_eq!(config.runtime.unwrap().gc_threshold, Some(0));
    }

    #[test]
    fn test_invalid_log_level() {
        let config = GlobalConfig {
            logging: Some(LoggingConfig {
                level: Some("loud".to_string()),
            }),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig::default();
        let override_config = GlobalConfig {
            logging: Some(LoggingConfig {
                level: Some("error".to_string()),
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.log_level(), Some("error"));
    }
}
