//! Library namespaces
//!
//! Loading a library binds every public symbol of its manifest: functions
//! become callable proxies, data symbols become proxies on the global
//! storage. The composite, array and address types reachable from those
//! symbols are installed alongside, under their native names with `$`
//! replaced by `_`.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::loader::SymbolSource;
use crate::manifest::Manifest;
use crate::proxy::Proxy;
use crate::registry::ProxyType;
use crate::types::{Kind, TypeRef};
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::{debug, instrument, trace, warn};

/// Symbols and types bound from one native module
#[derive(Debug, Clone)]
pub struct Namespace {
    library: String,
    entries: BTreeMap<String, Value>,
    types: BTreeMap<String, Rc<ProxyType>>,
}

impl Namespace {
    fn new(library: &str) -> Self {
        Self {
            library: library.to_string(),
            entries: BTreeMap::new(),
            types: BTreeMap::new(),
        }
    }

    /// Name of the module the symbols came from
    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Function proxy bound to `name`
    pub fn function(&self, name: &str) -> BridgeResult<Proxy> {
        match self.entries.get(name) {
            Some(Value::Proxy(p)) if p.foreign_type().kind() == Kind::Function => Ok(p.clone()),
            Some(other) => Err(BridgeError::mismatch("function", other.type_name())),
            None => Err(BridgeError::SymbolNotFound {
                library: self.library.clone(),
                symbol: name.to_string(),
            }),
        }
    }

    /// Call the function bound to `name`
    pub fn call(&self, name: &str, args: &[Value]) -> BridgeResult<Value> {
        self.function(name)?.call(args)
    }

    pub fn type_named(&self, name: &str) -> Option<&Rc<ProxyType>> {
        self.types.get(name)
    }

    /// Bound symbols in name order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Installed types in name order
    pub fn types(&self) -> impl Iterator<Item = (&str, &Rc<ProxyType>)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bound symbols
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BridgeState {
    /// Bind the symbols of `manifest`, resolving addresses through `source`
    ///
    /// Symbols that fail to bind are skipped with a warning unless the
    /// session loads strictly.
    #[instrument(skip(self, source, manifest), fields(library = source.name()))]
    pub(crate) fn load_namespace(
        &self,
        source: &dyn SymbolSource,
        manifest: &Manifest,
    ) -> BridgeResult<Namespace> {
        let installation = manifest.install(&self.types);
        let mut namespace = Namespace::new(source.name());
        let mut roots = Vec::new();

        for (name, ty) in installation.symbols {
            if name.starts_with('_') {
                trace!(symbol = %name, "skipping reserved symbol");
                continue;
            }
            let bound = ty.and_then(|ty| Ok((ty, self.bind_symbol(source, &name, ty)?)));
            match bound {
                Ok((ty, value)) => {
                    roots.push(ty);
                    namespace.entries.insert(name, value);
                }
                Err(error) if self.settings.strict_load => return Err(error),
                Err(error) => warn!(symbol = %name, %error, "skipping symbol"),
            }
        }

        self.install_types(&mut namespace, roots);
        debug!(
            symbols = namespace.entries.len(),
            types = namespace.types.len(),
            "bound library namespace"
        );
        Ok(namespace)
    }

    fn bind_symbol(&self, source: &dyn SymbolSource, name: &str, ty: TypeRef) -> BridgeResult<Value> {
        let bundle = self.proxy_type(ty)?;
        bundle.shape()?;
        let addr = source.address_of(name)?;
        if bundle.kind() == Kind::Function {
            bundle.call_plan()?;
            self.symbol_names.borrow_mut().insert(addr, Rc::from(name));
            Ok(Value::Proxy(self.proxy_at(&bundle, addr, 1)))
        } else {
            self.global_value(&bundle, addr)
        }
    }

    /// Install every composite, array and address type reachable from `roots`
    fn install_types(&self, namespace: &mut Namespace, roots: Vec<TypeRef>) {
        let types = &self.types;
        let mut seen = HashSet::new();
        let mut pending = roots;
        while let Some(ty) = pending.pop() {
            if !seen.insert(ty) {
                continue;
            }
            let kind = types.kind_of(ty);
            match kind {
                Kind::Function => pending.extend(types.signature_of(ty).iter().map(|s| s.ty)),
                Kind::Composite => pending.extend(types.members_of(ty).iter().map(|m| m.ty)),
                Kind::Address | Kind::Array => pending.extend(types.element_type_of(ty)),
                _ => {}
            }
            if !matches!(kind, Kind::Composite | Kind::Array | Kind::Address) {
                continue;
            }
            match self.proxy_type(ty) {
                Ok(bundle) if bundle.is_valid() => {
                    namespace.types.insert(bundle.name().replace('$', "_"), bundle);
                }
                Ok(_) => {}
                Err(error) => debug!(ty = %types.name_of(ty), %error, "type not installed"),
            }
        }
    }
}
