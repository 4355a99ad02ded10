//! CLI integration tests
//!
//! Runs the `ferrule` binary against temporary manifests and configuration
//! files.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "types": [
        { "kind": "composite", "name": "point", "size": 8, "members": [
            { "name": "x", "offset": 0, "type": "int" },
            { "name": "y", "offset": 4, "type": "int" } ] },
        { "kind": "function", "name": "norm_t", "returns": "int", "arguments": ["__PTR_point"] },
        { "kind": "address", "name": "__PTR_point", "pointee": "point" }
    ],
    "symbols": [ { "name": "norm", "type": "norm_t" } ]
}"#;

/// Command isolated from the user's configuration
fn ferrule(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ferrule").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .env_remove("FERRULE_LOG")
        .env_remove("FERRULE_LIBRARY_PATH")
        .env_remove("FERRULE_STRICT_LOAD")
        .env_remove("FERRULE_GC_THRESHOLD");
    cmd
}

fn write_manifest(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("point.types.json");
    fs::write(&path, MANIFEST).unwrap();
    path
}

// ══════════════════════════════════════════════════════════════════════════════
// HELP
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_help_lists_commands_and_examples() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("types"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("EXAMPLES"))
        .stdout(predicate::str::contains("FERRULE_LIBRARY_PATH"));
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ferrule "));
}

// ══════════════════════════════════════════════════════════════════════════════
// TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_types_lists_manifest() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir);
    ferrule(dir.path())
        .arg("types")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("struct point (8 bytes)"))
        .stdout(predicate::str::contains("+4    y: int"))
        .stdout(predicate::str::contains("int norm(point *)"));
}

#[test]
fn test_types_alias() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir);
    ferrule(dir.path())
        .args(["t", manifest.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("symbols (1):"));
}

#[test]
fn test_types_missing_manifest() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .args(["types", "absent.types.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read manifest"));
}

#[test]
fn test_types_rejects_dangling_reference() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.types.json");
    fs::write(
        &path,
        r#"{ "types": [ { "kind": "address", "name": "p", "pointee": "missing" } ] }"#,
    )
    .unwrap();
    ferrule(dir.path())
        .arg("types")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'p': invalid type descriptor"));
}

#[test]
fn test_types_rejects_untyped_symbol() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.types.json");
    fs::write(
        &path,
        r#"{ "symbols": [ { "name": "mystery", "type": "untyped_t" } ] }"#,
    )
    .unwrap();
    ferrule(dir.path())
        .arg("types")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'mystery'"))
        .stderr(predicate::str::contains("untyped_t"));
}

// ══════════════════════════════════════════════════════════════════════════════
// LIBRARIES
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_inspect_unknown_library() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .args(["inspect", "ferrule_no_such_library_xyz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("library not found: ferrule_no_such_library_xyz"));
}

#[test]
fn test_inspect_without_library() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no library given"));
}

#[test]
fn test_call_unknown_library() {
    let dir = TempDir::new().unwrap();
    ferrule(dir.path())
        .args(["call", "ferrule_no_such_library_xyz", "f", "1", "-2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load library"));
}

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
#[test]
fn test_call_into_libm() {
    let Some(libm) = ["/lib/x86_64-linux-gnu/libm.so.6", "/usr/lib64/libm.so.6", "/lib64/libm.so.6"]
        .into_iter()
        .find(|p| Path::new(p).is_file())
    else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("libm.types.json");
    fs::write(
        &manifest,
        r#"{
            "types": [ { "kind": "function", "name": "binary_d", "returns": "double", "arguments": ["double", "double"] } ],
            "symbols": [ { "name": "pow", "type": "binary_d" } ]
        }"#,
    )
    .unwrap();

    ferrule(dir.path())
        .args(["call", libm, "pow", "2.0", "10", "--manifest"])
        .arg(&manifest)
        .assert()
        .success()
        .stdout("1024.0\n");

    ferrule(dir.path())
        .args(["inspect", libm, "-m"])
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("symbols (1):"))
        .stdout(predicate::str::contains("<foreign function 'double pow(double, double)'"));
}

// ══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_invalid_log_level_from_environment() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir);
    ferrule(dir.path())
        .env("FERRULE_LOG", "loud")
        .arg("types")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log level 'loud'"));
}

#[test]
fn test_explicit_config_file_must_parse() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("ferrule.toml");
    fs::write(&config, "[library\npath = 3").unwrap();
    ferrule(dir.path())
        .args(["--config", config.to_str().unwrap(), "types", "x.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn test_configured_library_path_is_used() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("ferrule.toml"),
        "[library]\npath = \"lib/ferrule_missing_xyz.so\"\n",
    )
    .unwrap();
    ferrule(dir.path())
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ferrule_missing_xyz"));
}
