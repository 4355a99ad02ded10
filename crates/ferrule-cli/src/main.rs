use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferrule_config::{Config, ConfigLoader};
use std::path::PathBuf;

mod commands;

/// Ferrule native binding explorer.
///
/// Loads shared libraries together with their JSON type manifests and
/// exposes their functions, globals and types to the host.
///
/// EXAMPLES:
///     ferrule types geometry.types.json       List the types of a manifest
///     ferrule inspect ./libgeometry.so        Show what a library exports
///     ferrule call m sqrt 2.0                 Call a native function
///
/// ENVIRONMENT VARIABLES:
///     FERRULE_LOG            Log level (error, warn, info, debug, trace)
///     FERRULE_LIBRARY_PATH   Extra library search directories
///     FERRULE_STRICT_LOAD    Set to '1' to fail on the first bad symbol
///     RUST_LOG               Full tracing filter, overrides FERRULE_LOG
#[derive(Parser)]
#[command(name = "ferrule")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Project configuration file (default: nearest ferrule.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Print debug logs
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the symbols and types a library exports
    ///
    /// Opens the library, binds every symbol of its manifest and prints
    /// the resulting namespace.
    ///
    /// EXAMPLES:
    ///     ferrule inspect ./libgeometry.so
    ///     ferrule inspect geometry --manifest geometry.json
    #[command(visible_alias = "i")]
    Inspect {
        /// Library name or path (default: [library].path of ferrule.toml)
        library: Option<String>,
        /// Type manifest (default: the library's .types.json sidecar)
        #[arg(long, short = 'm')]
        manifest: Option<PathBuf>,
    },

    /// List the types and symbols declared by a manifest
    ///
    /// EXAMPLES:
    ///     ferrule types geometry.types.json
    #[command(visible_alias = "t")]
    Types {
        /// Path to the JSON type manifest
        manifest: PathBuf,
    },

    /// Call a native function with literal arguments
    ///
    /// Arguments are parsed as null, true/false, integers, floats,
    /// bracketed lists ([1, 2, 3]) or strings, in that order.
    ///
    /// EXAMPLES:
    ///     ferrule call m cos 0.5
    ///     ferrule call ./libgeometry.so area '[3, 4]'
    Call {
        /// Library name or path
        library: String,
        /// Function symbol
        symbol: String,
        /// Function arguments
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        /// Type manifest (default: the library's .types.json sidecar)
        #[arg(long, short = 'm')]
        manifest: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            loader
                .load_from_directory(&cwd)
                .context("failed to load configuration")
        }
    }
}

/// Install the global subscriber; RUST_LOG wins over the configured level
fn init_tracing(level: &str, verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(config.log_level(), cli.verbose);

    match cli.command {
        Commands::Inspect { library, manifest } => {
            let library = library
                .or_else(|| config.library_path().map(|p| p.display().to_string()))
                .context("no library given and none configured in ferrule.toml")?;
            let manifest = manifest.or_else(|| config.manifest_path());
            commands::inspect::run(&config, &library, manifest.as_deref())?;
        }
        Commands::Types { manifest } => {
            commands::types::run(&manifest)?;
        }
        Commands::Call {
            library,
            symbol,
            args,
            manifest,
        } => {
            let manifest = manifest.or_else(|| config.manifest_path());
            commands::call::run(&config, &library, &symbol, &args, manifest.as_deref())?;
        }
    }

    Ok(())
}
