//! `ferrule types`: print a manifest without loading any library

use anyhow::{bail, Context, Result};
use ferrule_runtime::{Kind, Manifest, TypeRef, TypeStore};
use std::path::Path;

pub fn run(path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    print!("{}", render(&manifest)?);
    Ok(())
}

/// Listing of every declared type followed by the symbols
///
/// Fails on the first declaration or symbol that cannot be resolved.
pub fn render(manifest: &Manifest) -> Result<String> {
    let store = TypeStore::with_builtins();
    let installation = manifest.install(&store);
    if let Some((name, error)) = installation.first_error() {
        bail!("'{}': {}", name, error);
    }
    let symbols: Vec<(&str, TypeRef)> = installation
        .symbols
        .iter()
        .filter_map(|(name, ty)| Some((name.as_str(), *ty.as_ref().ok()?)))
        .collect();

    let mut out = String::new();
    out.push_str(&format!("types ({}):\n", manifest.types.len()));
    for decl in &manifest.types {
        let ty = store
            .lookup(decl.name())
            .with_context(|| format!("type '{}' was not installed", decl.name()))?;
        out.push_str(&format!("  {}\n", describe(&store, decl.name(), ty)));
        if store.kind_of(ty) == Kind::Composite {
            for member in store.members_of(ty).iter() {
                out.push_str(&format!(
                    "      +{:<4} {}: {}\n",
                    member.offset,
                    member.name,
                    store.spelling(member.ty)
                ));
            }
        }
    }

    out.push_str(&format!("symbols ({}):\n", symbols.len()));
    for &(name, ty) in &symbols {
        let line = match store.kind_of(ty) {
            Kind::Function => store.signature_spelling(ty, name),
            _ => format!("{} {}", store.spelling(ty), name),
        };
        out.push_str(&format!("  {}\n", line));
    }
    Ok(out)
}

fn describe(store: &TypeStore, name: &str, ty: TypeRef) -> String {
    let size = store
        .size_of(ty)
        .map(|s| format!("{} bytes", s))
        .unwrap_or_else(|| "unsized".to_string());
    match store.kind_of(ty) {
        Kind::Composite if !store.is_complete(ty) => format!("struct {} (incomplete)", name),
        Kind::Composite => format!("struct {} ({})", name, size),
        Kind::Function => format!("fn {}", store.signature_spelling(ty, name)),
        Kind::Enum => format!("enum {} ({})", name, size),
        Kind::Base => format!("base {} ({})", name, size),
        _ => format!("type {} = {} ({})", name, store.spelling(ty), size),
    }
}
