// Library loading and namespace binding

mod common;

use common::assert_eq;
use ferrule_runtime::{Bridge, BridgeError, BridgeSettings, LibraryLoader, Manifest, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

extern "C" fn twice(x: i32) -> i32 {
    x * 2
}

static mut COUNTER: i32 = 41;

const MANIFEST: &str = r#"{
    "types": [
        { "kind": "function", "name": "unary", "returns": "int", "arguments": ["int"] }
    ],
    "symbols": [
        { "name": "twice", "type": "unary" },
        { "name": "counter", "type": "int" }
    ]
}"#;

fn source() -> HashMap<String, usize> {
    let mut table = HashMap::new();
    table.insert("twice".to_string(), twice as usize);
    table.insert("counter".to_string(), std::ptr::addr_of_mut!(COUNTER) as usize);
    table
}

#[test]
fn test_manifest_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lib.types.json");
    fs::write(&path, MANIFEST).unwrap();

    let manifest = Manifest::load(&path).unwrap();
    let bridge = Bridge::new();
    let ns = bridge.load_symbols(&source(), &manifest).unwrap();

    assert_eq!(ns.len(), 2);
    assert_eq!(ns.call("twice", &[Value::Int(21)]).unwrap(), Value::Int(42));
}

#[test]
fn test_data_symbol_is_assignable() {
    let bridge = Bridge::new();
    let manifest = Manifest::from_json(MANIFEST).unwrap();
    let ns = bridge.load_symbols(&source(), &manifest).unwrap();

    let counter = ns.get("counter").unwrap().as_proxy().unwrap().clone();
    assert_eq!(counter.type_name(), "__PTR_int");
    assert_eq!(counter.get(0).unwrap(), Value::Int(41));
    counter.set(0, 7).unwrap();
    assert_eq!(unsafe { std::ptr::addr_of!(COUNTER).read() }, 7);
    counter.set(0, 41).unwrap();
}

#[test]
fn test_missing_manifest_file() {
    let dir = TempDir::new().unwrap();
    let err = Manifest::load(&dir.path().join("absent.types.json")).unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
}

#[test]
fn test_malformed_manifest() {
    let err = Manifest::from_json(r#"{ "types": [ { "kind": "bogus" } ] }"#).unwrap_err();
    assert!(matches!(err, BridgeError::Manifest(_)));
}

#[test]
fn test_unknown_library() {
    let bridge = Bridge::new();
    let err = bridge.load_library("ferrule_no_such_library_xyz").unwrap_err();
    assert_eq!(err.to_string(), "library not found: ferrule_no_such_library_xyz");
}

#[test]
fn test_configured_search_path_is_used() {
    let dir = TempDir::new().unwrap();
    let lib_name = if cfg!(target_os = "windows") {
        "fake.dll"
    } else if cfg!(target_os = "macos") {
        "libfake.dylib"
    } else {
        "libfake.so"
    };
    fs::write(dir.path().join(lib_name), b"not a shared object").unwrap();

    let settings = BridgeSettings {
        search_paths: vec![dir.path().to_path_buf()],
        ..BridgeSettings::default()
    };
    let bridge = Bridge::with_settings(settings);
    // found through the configured directory, then rejected by the system loader
    assert!(matches!(
        bridge.load_library("fake"),
        Err(BridgeError::LoadFailed { .. })
    ));
}

#[test]
fn test_loader_search_paths_are_prepended() {
    let mut loader = LibraryLoader::new();
    let defaults = loader.search_paths().len();
    loader.add_search_path(Path::new("/opt/ferrule").to_path_buf());
    assert_eq!(loader.search_paths().len(), defaults + 1);
    assert_eq!(loader.search_paths()[0], Path::new("/opt/ferrule"));
    assert_eq!(loader.loaded_count(), 0);
}

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
#[test]
fn test_system_math_library() {
    let candidates = ["/lib/x86_64-linux-gnu/libm.so.6", "/usr/lib64/libm.so.6", "/lib64/libm.so.6"];
    let Some(libm) = candidates.iter().find(|p| Path::new(p).is_file()) else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("libm.types.json");
    fs::write(
        &manifest,
        r#"{
            "types": [ { "kind": "function", "name": "unary_d", "returns": "double", "arguments": ["double"] } ],
            "symbols": [ { "name": "sqrt", "type": "unary_d" }, { "name": "fabs", "type": "unary_d" } ]
        }"#,
    )
    .unwrap();

    let bridge = Bridge::new();
    let ns = bridge.load_library_with_manifest(libm, &manifest).unwrap();
    assert_eq!(ns.library(), *libm);
    assert_eq!(ns.call("sqrt", &[Value::Float(16.0)]).unwrap(), Value::Float(4.0));
    assert_eq!(ns.call("fabs", &[Value::Float(-2.5)]).unwrap(), Value::Float(2.5));
    let repr = ns.function("sqrt").unwrap().repr().unwrap();
    assert!(repr.starts_with("<foreign function 'double sqrt(double)'"), "{}", repr);
}
