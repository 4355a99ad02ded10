//! `ferrule inspect`

use anyhow::Result;
use ferrule_config::Config;
use std::path::Path;

pub fn run(config: &Config, library: &str, manifest: Option<&Path>) -> Result<()> {
    let (_bridge, namespace) = super::open(config, library, manifest)?;

    println!("library {}", namespace.library());
    println!();
    println!("symbols ({}):", namespace.len());
    for (name, value) in namespace.entries() {
        println!("  {:<20} {}", name, value);
    }
    let types: Vec<_> = namespace.types().collect();
    println!();
    println!("types ({}):", types.len());
    for (name, ty) in types {
        match ty.size() {
            Some(size) => println!("  {:<20} {:?}, {} bytes", name, ty.kind(), size),
            None => println!("  {:<20} {:?}", name, ty.kind()),
        }
    }
    Ok(())
}
