//! JSON type manifests
//!
//! A manifest describes the types and exported symbols of a native module. It
//! is usually a sidecar file named after the shared object
//! (`libgeometry.so` -> `libgeometry.types.json`):
//!
//! ```json
//! {
//!   "types": [
//!     { "kind": "composite", "name": "node", "size": 16, "members": [
//!         { "name": "value", "offset": 0, "type": "int" },
//!         { "name": "next", "offset": 8, "type": "__PTR_node" } ] },
//!     { "kind": "address", "name": "__PTR_node", "pointee": "node" },
//!     { "kind": "function", "name": "push_t", "returns": "__PTR_node",
//!       "arguments": ["__PTR_node", "int"] }
//!   ],
//!   "symbols": [ { "name": "push", "type": "push_t" } ]
//! }
//! ```
//!
//! Types reference each other by name, in any order. Loading is done in two
//! passes so that composites may point to themselves. A declaration that
//! cannot be resolved is skipped; composite members of such a type stay in
//! the layout but cannot be accessed.

use crate::error::{BridgeError, BridgeResult};
use crate::types::{Encoding, Member, TypeRef, TypeStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A full manifest document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub types: Vec<TypeDecl>,

    #[serde(default)]
    pub symbols: Vec<SymbolDecl>,
}

/// One type declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TypeDecl {
    Base {
        name: String,
        encoding: EncodingDecl,
        size: usize,
    },
    Composite {
        name: String,
        size: usize,
        #[serde(default)]
        members: Vec<MemberDecl>,
    },
    Array {
        name: String,
        element: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<usize>,
    },
    Address {
        name: String,
        pointee: String,
    },
    Function {
        name: String,
        returns: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Enum {
        name: String,
        size: usize,
    },
}

impl TypeDecl {
    pub fn name(&self) -> &str {
        match self {
            TypeDecl::Base { name, .. }
            | TypeDecl::Composite { name, .. }
            | TypeDecl::Array { name, .. }
            | TypeDecl::Address { name, .. }
            | TypeDecl::Function { name, .. }
            | TypeDecl::Enum { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncodingDecl {
    Bool,
    Signed,
    Unsigned,
    Float,
    Complex,
    SignedChar,
    UnsignedChar,
}

impl From<EncodingDecl> for Encoding {
    fn from(e: EncodingDecl) -> Self {
        match e {
            EncodingDecl::Bool => Encoding::Bool,
            EncodingDecl::Signed => Encoding::Signed,
            EncodingDecl::Unsigned => Encoding::Unsigned,
            EncodingDecl::Float => Encoding::Float,
            EncodingDecl::Complex => Encoding::Complex,
            EncodingDecl::SignedChar => Encoding::SignedChar,
            EncodingDecl::UnsignedChar => Encoding::UnsignedChar,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MemberDecl {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SymbolDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Outcome of installing a manifest into a store
#[derive(Debug, Default)]
pub struct Installation {
    /// Symbols in declaration order, each with its type or the reason it has none
    pub symbols: Vec<(String, BridgeResult<TypeRef>)>,
    /// Declarations and members whose types could not be resolved
    pub unresolved: Vec<(String, BridgeError)>,
}

impl Installation {
    /// First problem found while installing, if any
    pub fn first_error(&self) -> Option<(&str, &BridgeError)> {
        let symbols = self
            .symbols
            .iter()
            .filter_map(|(name, ty)| ty.as_ref().err().map(|e| (name.as_str(), e)));
        self.unresolved
            .iter()
            .map(|(name, e)| (name.as_str(), e))
            .chain(symbols)
            .next()
    }
}

impl Manifest {
    /// Parse a manifest from JSON text
    pub fn from_json(text: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a manifest file
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Sidecar manifest path for a shared object
    pub fn sidecar_path(library: &Path) -> PathBuf {
        library.with_extension("types.json")
    }

    /// Add every declared type to `store` and resolve the symbol table
    ///
    /// Names already known to the store (builtins) resolve to the existing
    /// descriptor unless the manifest redeclares them. Problems with single
    /// declarations or symbols are reported in the [`Installation`] rather
    /// than failing the whole manifest.
    pub fn install(&self, store: &TypeStore) -> Installation {
        let decls: HashMap<&str, &TypeDecl> =
            self.types.iter().map(|d| (d.name(), d)).collect();
        let mut resolver = Resolver {
            store,
            decls,
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
        };

        // First pass: scalars and composite shells, so that anything may
        // point at a composite before its members are known.
        for decl in &self.types {
            match decl {
                TypeDecl::Base {
                    name,
                    encoding,
                    size,
                } => {
                    let ty = store.base(name, (*encoding).into(), *size);
                    resolver.resolved.insert(name.clone(), ty);
                }
                TypeDecl::Enum { name, size } => {
                    let ty = store.enumeration(name, *size);
                    resolver.resolved.insert(name.clone(), ty);
                }
                TypeDecl::Composite { name, size, .. } => {
                    let ty = store.declare_composite(name, *size);
                    resolver.resolved.insert(name.clone(), ty);
                }
                _ => {}
            }
        }

        let mut installation = Installation::default();

        // Second pass: derived types, then composite members.
        for decl in &self.types {
            if let Err(error) = resolver.resolve(decl.name()) {
                debug!(ty = %decl.name(), %error, "skipping type declaration");
                installation.unresolved.push((decl.name().to_string(), error));
            }
        }
        for decl in &self.types {
            let TypeDecl::Composite { name, members, .. } = decl else {
                continue;
            };
            let Some(&ty) = resolver.resolved.get(name) else {
                continue;
            };
            let mut layout = Vec::with_capacity(members.len());
            for member in members {
                let member_ty = match resolver.resolve(&member.ty) {
                    Ok(member_ty) => member_ty,
                    Err(error) => {
                        let path = format!("{}.{}", name, member.name);
                        debug!(member = %path, %error, "member type left undescribed");
                        installation.unresolved.push((path, error));
                        store.unknown(&member.ty)
                    }
                };
                layout.push(Member::new(member.name.clone(), member.offset, member_ty));
            }
            if let Err(error) = store.define_composite(ty, layout) {
                installation.unresolved.push((name.clone(), error));
            }
        }

        installation.symbols = self
            .symbols
            .iter()
            .map(|s| (s.name.clone(), resolver.resolve(&s.ty)))
            .collect();
        installation
    }
}

struct Resolver<'a> {
    store: &'a TypeStore,
    decls: HashMap<&'a str, &'a TypeDecl>,
    resolved: HashMap<String, TypeRef>,
    in_progress: HashSet<String>,
}

impl Resolver<'_> {
    fn resolve(&mut self, name: &str) -> BridgeResult<TypeRef> {
        let ty = self.resolve_inner(name);
        if ty.is_err() {
            self.in_progress.remove(name);
        }
        ty
    }

    fn resolve_inner(&mut self, name: &str) -> BridgeResult<TypeRef> {
        if let Some(ty) = self.resolved.get(name) {
            return Ok(*ty);
        }
        let Some(decl) = self.decls.get(name).copied() else {
            return self.store.lookup(name).ok_or_else(|| {
                BridgeError::Descriptor(format!("type '{}' is referenced but not declared", name))
            });
        };
        if !self.in_progress.insert(name.to_string()) {
            return Err(BridgeError::Descriptor(format!(
                "type '{}' is defined in terms of itself without a composite in between",
                name
            )));
        }

        let ty = match decl {
            TypeDecl::Array {
                element, length, ..
            } => {
                let element = self.resolve(element)?;
                self.store.array_of(element, *length)
            }
            TypeDecl::Address { pointee, .. } => {
                let pointee = self.resolve(pointee)?;
                self.store.address_of(pointee)
            }
            TypeDecl::Function {
                returns, arguments, ..
            } => {
                let ret = self.resolve(returns)?;
                let args = arguments
                    .iter()
                    .map(|a| self.resolve(a))
                    .collect::<BridgeResult<Vec<_>>>()?;
                self.store.function_of(ret, &args)
            }
            // Declared in the first pass
            TypeDecl::Base { .. } | TypeDecl::Composite { .. } | TypeDecl::Enum { .. } => {
                return Err(BridgeError::Descriptor(format!(
                    "type '{}' was not registered",
                    name
                )))
            }
        };

        self.in_progress.remove(name);
        if self.store.name_of(ty).as_ref() != name {
            self.store.alias(name, ty);
        }
        self.resolved.insert(name.to_string(), ty);
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kind;

    const LINKED_LIST: &str = r#"{
        "types": [
            { "kind": "address", "name": "__PTR_node", "pointee": "node" },
            { "kind": "composite", "name": "node", "size": 16, "members": [
                { "name": "value", "offset": 0, "type": "int" },
                { "name": "next", "offset": 8, "type": "__PTR_node" }
            ] },
            { "kind": "function", "name": "push_t", "returns": "__PTR_node",
              "arguments": ["__PTR_node", "int"] }
        ],
        "symbols": [ { "name": "push", "type": "push_t" } ]
    }"#;

    #[test]
    fn test_install_self_referential_manifest() {
        let store = TypeStore::with_builtins();
        let manifest = Manifest::from_json(LINKED_LIST).unwrap();
        let installation = manifest.install(&store);
        assert!(installation.first_error().is_none());

        let node = store.lookup("node").unwrap();
        let ptr = store.lookup("__PTR_node").unwrap();
        assert_eq!(store.address_of(node), ptr);
        assert_eq!(store.members_of(node)[1].ty, ptr);

        assert_eq!(installation.symbols.len(), 1);
        let (name, ty) = &installation.symbols[0];
        assert_eq!(name, "push");
        let ty = *ty.as_ref().unwrap();
        assert_eq!(store.kind_of(ty), Kind::Function);
        assert_eq!(store.signature_of(ty).len(), 3);
    }

    #[test]
    fn test_custom_names_become_aliases() {
        let store = TypeStore::with_builtins();
        let manifest = Manifest::from_json(
            r#"{ "types": [ { "kind": "array", "name": "vec3", "element": "double", "length": 3 } ] }"#,
        )
        .unwrap();
        assert!(manifest.install(&store).first_error().is_none());
        let vec3 = store.lookup("vec3").unwrap();
        let double = store.lookup("double").unwrap();
        assert_eq!(vec3, store.array_of(double, Some(3)));
    }

    #[test]
    fn test_unknown_reference_skips_only_that_declaration() {
        let store = TypeStore::with_builtins();
        let manifest = Manifest::from_json(
            r#"{ "types": [
                { "kind": "address", "name": "p", "pointee": "missing" },
                { "kind": "address", "name": "int_ptr", "pointee": "int" }
            ] }"#,
        )
        .unwrap();
        let installation = manifest.install(&store);
        let (name, error) = installation.first_error().unwrap();
        assert_eq!(name, "p");
        assert!(matches!(error, BridgeError::Descriptor(_)));
        assert!(store.lookup("p").is_none());
        assert!(store.lookup("int_ptr").is_some());
    }

    #[test]
    fn test_unresolved_member_keeps_its_slot() {
        let store = TypeStore::with_builtins();
        let manifest = Manifest::from_json(
            r#"{ "types": [ { "kind": "composite", "name": "opaque_pair", "size": 16, "members": [
                { "name": "id", "offset": 0, "type": "int" },
                { "name": "handle", "offset": 8, "type": "handle_t" }
            ] } ] }"#,
        )
        .unwrap();
        let installation = manifest.install(&store);
        assert_eq!(installation.unresolved.len(), 1);
        assert_eq!(installation.unresolved[0].0, "opaque_pair.handle");

        let pair = store.lookup("opaque_pair").unwrap();
        assert!(store.is_complete(pair));
        let members = store.members_of(pair);
        assert_eq!(members.len(), 2);
        assert_eq!(store.kind_of(members[1].ty), Kind::Unknown);
        assert!(store.lookup("handle_t").is_none());
    }

    #[test]
    fn test_untyped_symbol_is_reported_alone() {
        let store = TypeStore::with_builtins();
        let manifest = Manifest::from_json(
            r#"{ "types": [ { "kind": "function", "name": "add_t", "returns": "int",
                              "arguments": ["int", "int"] } ],
                 "symbols": [ { "name": "add", "type": "add_t" },
                              { "name": "mystery", "type": "untyped_t" } ] }"#,
        )
        .unwrap();
        let installation = manifest.install(&store);
        assert!(installation.unresolved.is_empty());
        assert!(installation.symbols[0].1.is_ok());
        assert!(matches!(
            installation.symbols[1].1,
            Err(BridgeError::Descriptor(_))
        ));
        assert_eq!(installation.first_error().map(|(name, _)| name), Some("mystery"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = Manifest::from_json(r#"{ "types": [], "extra": 1 }"#);
        assert!(matches!(result, Err(BridgeError::Manifest(_))));
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            Manifest::sidecar_path(Path::new("/opt/lib/libgeo.so")),
            PathBuf::from("/opt/lib/libgeo.types.json")
        );
    }
}
