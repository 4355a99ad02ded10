//! Bridge session
//!
//! A [`Bridge`] owns every process-wide table the proxies rely on: the type
//! store, the heap index, the proxy-type registry, the lifetime tracker and
//! the library loader. Proxies and types hold a weak reference back to the
//! session, so several independent sessions can coexist.

use crate::error::{BridgeError, BridgeResult};
use crate::ffi::loader::{LibraryLoader, SymbolSource};
use crate::heap::{Extent, FreeFn, HeapIndex, Lifetime};
use crate::manifest::Manifest;
use crate::namespace::Namespace;
use crate::ops::ReadMode;
use crate::proxy::Proxy;
use crate::registry::ProxyType;
use crate::tracker::Tracker;
use crate::types::{Kind, TypeRef, TypeStore};
use crate::value::Value;
use ferrule_config::BridgeSettings;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

pub(crate) struct BridgeState {
    pub(crate) types: TypeStore,
    pub(crate) heap: HeapIndex,
    pub(crate) registry: RefCell<HashMap<TypeRef, Rc<ProxyType>>>,
    pub(crate) tracker: Tracker,
    pub(crate) settings: BridgeSettings,
    /// Composite types currently being printed
    repr_stack: RefCell<Vec<TypeRef>>,
    /// Error raised inside a trampoline, re-raised when the native call returns
    pending_error: RefCell<Option<BridgeError>>,
    /// Symbol names of loaded functions, by address
    pub(crate) symbol_names: RefCell<HashMap<usize, Rc<str>>>,
    pub(crate) loader: RefCell<LibraryLoader>,
    pub(crate) weak_self: Weak<BridgeState>,
}

/// Pops the repr stack when dropped
pub(crate) struct ReprGuard<'a>(&'a RefCell<Vec<TypeRef>>);

impl Drop for ReprGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().pop();
    }
}

impl BridgeState {
    /// `None` when `ty` is already being printed or nesting is too deep
    pub(crate) fn enter_repr(&self, ty: TypeRef) -> Option<ReprGuard<'_>> {
        let mut stack = self.repr_stack.borrow_mut();
        if stack.contains(&ty) || stack.len() >= self.settings.max_repr_depth {
            return None;
        }
        stack.push(ty);
        Some(ReprGuard(&self.repr_stack))
    }

    /// Record an error raised where it cannot propagate; the first one wins
    pub(crate) fn set_pending_error(&self, error: BridgeError) {
        let mut pending = self.pending_error.borrow_mut();
        match pending.as_ref() {
            Some(first) => warn!(error = %error, first = %first, "dropping callback error"),
            None => *pending = Some(error),
        }
    }

    pub(crate) fn take_pending_error(&self) -> Option<BridgeError> {
        self.pending_error.borrow_mut().take()
    }

    pub(crate) fn restore_pending_error(&self, error: Option<BridgeError>) {
        *self.pending_error.borrow_mut() = error;
    }

    /// Host value for a global of type `bundle` at `addr`
    ///
    /// Composites and arrays are addressed directly; other globals are
    /// exposed through a one-element pointer proxy so they can be assigned.
    pub(crate) fn global_value(&self, bundle: &Rc<ProxyType>, addr: usize) -> BridgeResult<Value> {
        bundle.shape()?;
        self.heap.insert(Extent {
            base: addr,
            size: bundle.size().unwrap_or(0),
            ty: Some(bundle.descriptor()),
            lifetime: Lifetime::Static,
        });
        match bundle.kind() {
            Kind::Composite | Kind::Array => bundle.read(addr, ReadMode::Alias),
            Kind::Void | Kind::Function => Err(BridgeError::unsupported(
                bundle.name(),
                "not a data type",
            )),
            _ => Ok(Value::Proxy(self.proxy_at(&bundle.ptr()?, addr, 1))),
        }
    }
}

/// A native binding session
///
/// # Example
///
/// ```
/// use ferrule_runtime::{Bridge, Value};
///
/// let bridge = Bridge::new();
/// let ints = bridge.type_named("int").unwrap().array(None).unwrap();
/// let arr = ints.construct(&[Value::Int(3)], &[]).unwrap();
/// assert_eq!(arr.repr().unwrap(), "[0, 0, 0]");
/// ```
pub struct Bridge {
    state: Rc<BridgeState>,
}

impl Bridge {
    /// Session with the platform's C base types and default settings
    pub fn new() -> Self {
        Self::with_settings(BridgeSettings::default())
    }

    pub fn with_settings(settings: BridgeSettings) -> Self {
        Self::with_types(TypeStore::with_builtins(), settings)
    }

    /// Session over an existing descriptor store
    pub fn with_types(types: TypeStore, settings: BridgeSettings) -> Self {
        let mut loader = LibraryLoader::new();
        for path in settings.search_paths.iter().rev() {
            loader.add_search_path(path.clone());
        }
        let state = Rc::new_cyclic(|weak_self| BridgeState {
            types,
            heap: HeapIndex::new(),
            registry: RefCell::new(HashMap::new()),
            tracker: Tracker::default(),
            settings,
            repr_stack: RefCell::new(Vec::new()),
            pending_error: RefCell::new(None),
            symbol_names: RefCell::new(HashMap::new()),
            loader: RefCell::new(loader),
            weak_self: weak_self.clone(),
        });
        debug!(types = state.types.len(), "bridge session opened");
        Self { state }
    }

    pub(crate) fn state(&self) -> &Rc<BridgeState> {
        &self.state
    }

    /// Descriptor store of this session
    pub fn types(&self) -> &TypeStore {
        &self.state.types
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.state.settings
    }

    /// Canonical proxy type for a descriptor
    pub fn proxy_type(&self, ty: TypeRef) -> BridgeResult<Rc<ProxyType>> {
        self.state.proxy_type(ty)
    }

    /// Proxy type for a descriptor registered under `name`
    pub fn type_named(&self, name: &str) -> BridgeResult<Rc<ProxyType>> {
        let ty = self
            .state
            .types
            .lookup(name)
            .ok_or_else(|| BridgeError::Descriptor(format!("no type named '{}'", name)))?;
        self.state.proxy_type(ty)
    }

    /// Function type `ret (args...)`
    pub fn fun(&self, ret: &ProxyType, args: &[&ProxyType]) -> BridgeResult<Rc<ProxyType>> {
        let args: Vec<TypeRef> = args.iter().map(|a| a.descriptor()).collect();
        let ty = self.state.types.function_of(ret.descriptor(), &args);
        self.state.proxy_type(ty)
    }

    /// Function proxy for native code at `addr`
    ///
    /// # Safety
    ///
    /// `addr` must be the entry point of a function with signature `ty` that
    /// stays loaded while the proxy is called.
    pub unsafe fn function_at(&self, addr: usize, ty: &Rc<ProxyType>) -> BridgeResult<Proxy> {
        if ty.kind() != Kind::Function {
            return Err(BridgeError::mismatch("function type", ty.name()));
        }
        ty.call_plan()?;
        Ok(self.state.proxy_at(ty, addr, 1))
    }

    /// Global data of type `ty` at `addr`, registered as a static allocation
    ///
    /// # Safety
    ///
    /// `addr` must point to a live object of type `ty` that is never freed.
    pub unsafe fn global_at(&self, addr: usize, ty: &Rc<ProxyType>) -> BridgeResult<Value> {
        self.state.global_value(ty, addr)
    }

    /// Hand a native allocation over to the bridge
    ///
    /// The first proxy that reaches the block becomes its base and calls
    /// `free` when it is released.
    ///
    /// # Safety
    ///
    /// `addr..addr + size` must be a live allocation of type `ty` that may be
    /// released with `free`, and nothing else may free it.
    pub unsafe fn adopt(&self, addr: usize, size: usize, ty: TypeRef, free: FreeFn) {
        self.state.heap.insert(Extent {
            base: addr,
            size,
            ty: Some(ty),
            lifetime: Lifetime::Adopted(free),
        });
    }

    /// Enclosing allocation of `addr`, if tracked
    pub fn allocation_info(&self, addr: usize) -> Option<Extent> {
        self.state.heap.allocation_info(addr)
    }

    /// Run cycle collection now; returns the number of severed edges
    pub fn collect_cycles(&self) -> usize {
        self.state.tracker.collect_cycles(&self.state.heap)
    }

    /// Number of allocations with a live base proxy
    pub fn live_bases(&self) -> usize {
        self.state.tracker.live_bases()
    }

    /// Number of pointer slots currently keeping an allocation alive
    pub fn edge_count(&self) -> usize {
        self.state.tracker.edge_count()
    }

    /// Open a native library and bind the symbols of its sidecar manifest
    pub fn load_library(&self, name: &str) -> BridgeResult<Namespace> {
        let library = self.state.loader.borrow_mut().load(name)?;
        let manifest = Manifest::load(&Manifest::sidecar_path(library.path()))?;
        self.state.load_namespace(&library, &manifest)
    }

    /// Open a native library and bind the symbols of an explicit manifest
    pub fn load_library_with_manifest(&self, name: &str, manifest: &Path) -> BridgeResult<Namespace> {
        let library = self.state.loader.borrow_mut().load(name)?;
        let manifest = Manifest::load(manifest)?;
        self.state.load_namespace(&library, &manifest)
    }

    /// Bind the symbols of `manifest`, resolving addresses through `source`
    pub fn load_symbols(&self, source: &dyn SymbolSource, manifest: &Manifest) -> BridgeResult<Namespace> {
        self.state.load_namespace(source, manifest)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
