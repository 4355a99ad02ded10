//! Dynamic library loading
//!
//! Provides cross-platform dynamic library loading using `libloading`.
//! Handles platform-specific library naming conventions and search paths.
//! Symbol addresses reach the namespace builder through [`SymbolSource`], so
//! tables of in-process functions can stand in for a shared object.

use crate::error::{BridgeError, BridgeResult};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, instrument};

/// Anything that maps symbol names to addresses
pub trait SymbolSource {
    /// Name used in diagnostics and as the namespace's library name
    fn name(&self) -> &str;

    /// Address of `symbol`
    fn address_of(&self, symbol: &str) -> BridgeResult<usize>;
}

impl SymbolSource for HashMap<String, usize> {
    fn name(&self) -> &str {
        "<memory>"
    }

    fn address_of(&self, symbol: &str) -> BridgeResult<usize> {
        self.get(symbol)
            .copied()
            .ok_or_else(|| BridgeError::SymbolNotFound {
                library: self.name().to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// An opened shared object
///
/// Clones share the underlying handle; the loader keeps one as well, so the
/// code stays mapped for the lifetime of the session.
#[derive(Clone)]
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: Rc<Library>,
}

impl NativeLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_of(&self, symbol: &str) -> BridgeResult<usize> {
        // SAFETY: only the symbol's address is taken; nothing is called or
        // dereferenced here
        let pointer = unsafe { self.library.get::<*mut c_void>(symbol.as_bytes()) }.map_err(|_| {
            BridgeError::SymbolNotFound {
                library: self.name.clone(),
                symbol: symbol.to_string(),
            }
        })?;
        Ok(*pointer as usize)
    }
}

/// Dynamic library loader with caching and platform-specific path resolution
///
/// # Safety
///
/// Loading dynamic libraries is inherently unsafe. The loaded code runs in the
/// same process and can perform arbitrary operations.
pub struct LibraryLoader {
    /// Cache of loaded libraries by resolved path
    loaded: HashMap<PathBuf, Rc<Library>>,
    /// Library search paths, configured ones first
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    /// Create a new library loader with default search paths
    pub fn new() -> Self {
        Self {
            loaded: HashMap::new(),
            search_paths: Self::default_search_paths(),
        }
    }

    /// Get platform-specific default library search paths
    ///
    /// Returns standard system library paths for the current platform:
    /// - Linux: /usr/lib, /usr/local/lib, /lib
    /// - macOS: /usr/lib, /usr/local/lib, /opt/homebrew/lib
    /// - Windows: C:\Windows\System32
    /// - All platforms: current working directory
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Windows\\System32"));
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Resolve library name to full path with platform-specific naming
    ///
    /// Accepts an existing path as is; otherwise tries `lib{name}.so`,
    /// `lib{name}.dylib` or `{name}.dll` (and the unprefixed forms) in every
    /// search path.
    fn resolve_library_path(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if (path.is_absolute() || path.components().count() > 1) && path.is_file() {
            return Some(path.to_path_buf());
        }

        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        let prefixes: &[&str] = if cfg!(target_os = "windows") {
            &["", "lib"]
        } else {
            &["lib", ""]
        };

        for search_path in &self.search_paths {
            let exact = search_path.join(name);
            if path.extension().is_some() && exact.is_file() {
                return Some(exact);
            }
            for prefix in prefixes {
                for ext in extensions {
                    let full_path = search_path.join(format!("{}{}.{}", prefix, name, ext));
                    if full_path.is_file() {
                        return Some(full_path);
                    }
                }
            }
        }

        None
    }

    /// Load a library by name or path, or return the cached handle
    ///
    /// Library name can be:
    /// - Short name: "m" -> lib{m}.{ext}
    /// - Full path: "/path/to/libfoo.so"
    #[instrument(skip(self))]
    pub fn load(&mut self, name: &str) -> BridgeResult<NativeLibrary> {
        let path = self
            .resolve_library_path(name)
            .ok_or_else(|| BridgeError::LibraryNotFound(name.to_string()))?;

        let library = match self.loaded.get(&path) {
            Some(library) => library.clone(),
            None => {
                // SAFETY: loading runs the library's initializers; callers
                // only load libraries they trust
                let library = unsafe { Library::new(&path) }.map_err(|e| BridgeError::LoadFailed {
                    library: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                debug!(path = %path.display(), "opened native library");
                let library = Rc::new(library);
                self.loaded.insert(path.clone(), library.clone());
                library
            }
        };

        Ok(NativeLibrary {
            name: name.to_string(),
            path,
            library,
        })
    }

    /// Add a custom search path (prepended to search list)
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Get the number of loaded libraries
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}
