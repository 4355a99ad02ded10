//! Subcommand implementations

pub mod call;
pub mod inspect;
pub mod types;

use anyhow::{Context, Result};
use ferrule_config::Config;
use ferrule_runtime::{Bridge, Namespace};
use std::path::Path;

/// Open `library` in a fresh session configured from `config`
pub(crate) fn open(config: &Config, library: &str, manifest: Option<&Path>) -> Result<(Bridge, Namespace)> {
    let bridge = Bridge::with_settings(config.settings());
    let namespace = match manifest {
        Some(manifest) => bridge.load_library_with_manifest(library, manifest),
        None => bridge.load_library(library),
    }
    .with_context(|| format!("failed to load library '{}'", library))?;
    Ok((bridge, namespace))
}
