//! Project Configuration (ferrule.toml)
//!
//! Handles project-level configuration stored in `ferrule.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration from ferrule.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Native library settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryConfig>,

    /// Bridge runtime tuning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Native library configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Library to load when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Type manifest (default: `<library>.types.json` next to the library)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,

    /// Extra library search directories
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Edge insertions between automatic cycle collections (0 disables them)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_threshold: Option<usize>,

    /// Nesting limit when printing composite proxies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_repr_depth: Option<usize>,

    /// Fail library loading on the first bad symbol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_load: Option<bool>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(runtime) = &self.runtime {
            runtime.validate()?;
        }
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        if let Some(library) = &self.library {
            if library.path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "library.path".to_string(),
                    reason: "path cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Library to load by default, if configured
    pub fn library_path(&self) -> Option<&Path> {
        self.library.as_ref().and_then(|l| l.path.as_deref())
    }

    /// Explicit manifest path, if configured
    pub fn manifest_path(&self) -> Option<&Path> {
        self.library.as_ref().and_then(|l| l.manifest.as_deref())
    }

    /// Configured log level, if present
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
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

impl RuntimeConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_repr_depth == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "runtime.max_repr_depth".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &RuntimeConfig) {
        if other.gc_threshold.is_some() {
            self.gc_threshold = other.gc_threshold;
        }
        if other.max_repr_depth.is_some() {
            self.max_repr_depth = other.max_repr_depth;
        }
        if other.strict_load.is_some() {
            self.strict_load = other.strict_load;
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        match self.level.as_deref() {
            None => Ok(()),
            Some(level) if is_valid_log_level(level) => Ok(()),
            Some(level) => Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!(
                    "must be one of trace, debug, info, warn, error; got '{}'",
                    level
                ),
            }),
        }
    }
}

/// Check if a log level name is valid
pub(crate) fn is_valid_log_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}
