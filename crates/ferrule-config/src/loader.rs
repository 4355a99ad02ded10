//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{is_valid_log_level, LibraryConfig, LoggingConfig, ProjectConfig, RuntimeConfig};
use crate::settings::{BridgeSettings, DEFAULT_LOG_LEVEL};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "ferrule.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.ferrule/config.toml) - lowest priority
/// 2. Project config (./ferrule.toml) - overrides global
/// 3. Environment variables (FERRULE_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration, environment overrides applied
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where ferrule.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use `path` instead of ~/.ferrule/config.toml
    pub fn with_global_config(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find ferrule.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file (or home directory) yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => GlobalConfig::load_from_file(path),
            _ => Ok(GlobalConfig::default()),
        }
    }

    /// Apply environment variable overrides to project config
    ///
    /// - `FERRULE_LOG`: log level
    /// - `FERRULE_GC_THRESHOLD`: edge insertions between cycle collections
    /// - `FERRULE_STRICT_LOAD`: true/1/yes to fail on the first bad symbol
    /// - `FERRULE_LIBRARY_PATH`: extra search directories (platform path list)
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(level) = env::var("FERRULE_LOG") {
            let level = level.to_lowercase();
            if !is_valid_log_level(&level) {
                return Err(ConfigError::InvalidValue {
                    field: "FERRULE_LOG".to_string(),
                    reason: format!("unknown log level '{}'", level),
                });
            }
            config.logging = Some(LoggingConfig { level: Some(level) });
        }

        if let Ok(threshold) = env::var("FERRULE_GC_THRESHOLD") {
            let threshold = threshold
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "FERRULE_GC_THRESHOLD".to_string(),
                    reason: e.to_string(),
                })?;
            config
                .runtime
                .get_or_insert_with(RuntimeConfig::default)
                .gc_threshold = Some(threshold);
        }

        if let Ok(strict) = env::var("FERRULE_STRICT_LOAD") {
            let strict = matches!(strict.to_lowercase().as_str(), "true" | "1" | "yes");
            config
                .runtime
                .get_or_insert_with(RuntimeConfig::default)
                .strict_load = Some(strict);
        }

        if let Some(paths) = env::var_os("FERRULE_LIBRARY_PATH") {
            let library = config.library.get_or_insert_with(LibraryConfig::default);
            let mut search_paths: Vec<PathBuf> = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            search_paths.append(&mut library.search_paths);
            library.search_paths = search_paths;
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.ferrule)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ferrule"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Resolve the runtime settings (project > global > defaults)
    ///
    /// Project search paths come first and relative ones are taken from the
    /// project root.
    pub fn settings(&self) -> BridgeSettings {
        let mut settings = BridgeSettings::default();

        let mut runtime = self.global.runtime.clone().unwrap_or_default();
        if let Some(project) = &self.project.runtime {
            runtime.merge(project);
        }
        if let Some(threshold) = runtime.gc_threshold {
            settings.gc_threshold = threshold;
        }
        if let Some(depth) = runtime.max_repr_depth {
            settings.max_repr_depth = depth;
        }
        if let Some(strict) = runtime.strict_load {
            settings.strict_load = strict;
        }

        if let Some(library) = &self.project.library {
            settings
                .search_paths
                .extend(library.search_paths.iter().map(|p| self.resolve(p)));
        }
        settings
            .search_paths
            .extend(self.global.search_paths().iter().cloned());
        settings
    }

    /// Get the effective log level (project > global > default)
    pub fn log_level(&self) -> &str {
        self.project
            .log_level()
            .or_else(|| self.global.log_level())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Configured default library, relative to the project root
    pub fn library_path(&self) -> Option<PathBuf> {
        self.project.library_path().map(|p| self.resolve(p))
    }

    /// Configured manifest, relative to the project root
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.project.manifest_path().map(|p| self.resolve(p))
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has ferrule.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn hermetic_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_config(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[library]
path = "libdemo.so"
"#,
        );

        let mut loader = hermetic_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.library_path(), Some(temp_dir.path().join("libdemo.so")));
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = hermetic_loader(&temp_dir);
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_gc_threshold() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[runtime]
gc_threshold = 10
"#,
        );

        env::set_var("FERRULE_GC_THRESHOLD", "25");
        let mut loader = hermetic_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path());
        env::remove_var("FERRULE_GC_THRESHOLD");

        assert_eq!(config.unwrap().settings().gc_threshold, 25);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_bad_level() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("FERRULE_LOG", "chatty");
        let mut loader = hermetic_loader(&temp_dir);
        let result = loader.load_from_directory(temp_dir.path());
        env::remove_var("FERRULE_LOG");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_default_log_level() {
        let config = Config {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: None,
        };

        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.settings(), BridgeSettings::default());
    }
}
