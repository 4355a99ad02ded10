//! Resolved runtime settings
//!
//! The runtime never reads configuration files itself. It receives a
//! [`BridgeSettings`] value, either [`BridgeSettings::default`] or the result
//! of [`crate::Config::settings`].

use std::path::PathBuf;

/// Edge insertions between automatic cycle collections
pub const DEFAULT_GC_THRESHOLD: usize = 1000;

/// Nesting limit for printed proxies
pub const DEFAULT_MAX_REPR_DEPTH: usize = 16;

/// Log level used when nothing is configured
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Settings consumed by a bridge session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Extra library search directories, searched before the platform defaults
    pub search_paths: Vec<PathBuf>,

    /// Edge insertions between automatic cycle collections (0 disables them)
    pub gc_threshold: usize,

    /// Nesting limit when printing composite proxies
    pub max_repr_depth: usize,

    /// Fail a library load on the first bad symbol instead of skipping it
    pub strict_load: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_repr_depth: DEFAULT_MAX_REPR_DEPTH,
            strict_load: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = BridgeSettings::default();
        assert!(settings.search_paths.is_empty());
        assert_eq!(settings.gc_threshold, 1000);
        assert_eq!(settings.max_repr_depth, 16);
        assert!(!settings.strict_load);
    }
}
