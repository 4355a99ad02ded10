//! Host-visible proxies over native memory
//!
//! A [`Proxy`] is a reference-counted handle on a native address of a known
//! foreign type. Its [`Anchor`] decides what keeps the memory alive:
//!
//! - `Owned`: the proxy is the base of an allocation and releases it when the
//!   last handle goes away;
//! - `Borrowed`: the proxy points somewhere inside an allocation and holds a
//!   strong reference on that allocation's base proxy;
//! - `Unmanaged`: nobody tracks the memory (globals, foreign blocks).

use crate::address;
use crate::bridge::BridgeState;
use crate::composite;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::callbacks::Trampoline;
use crate::ffi::caller;
use crate::heap::FreeFn;
use crate::memory;
use crate::registry::{ProxyType, Shape};
use crate::types::Kind;
use crate::value::Value;
use std::alloc::Layout;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// How an owned allocation is released
pub(crate) enum Release {
    /// Bridge heap block
    Heap(Layout),
    /// Adopted native block
    Foreign(FreeFn),
    /// Executable trampoline, freed by its own drop
    Trampoline(Trampoline),
}

/// Ownership record of a base proxy
pub(crate) struct Allocation {
    pub(crate) base: usize,
    pub(crate) size: usize,
    pub(crate) release: Release,
    pub(crate) bridge: Weak<BridgeState>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let orphaned = match self.bridge.upgrade() {
            Some(state) => {
                state.tracker.forget_base(self.base);
                state.heap.remove(self.base);
                state.tracker.take_edges_in(self.base, self.size)
            }
            None => Vec::new(),
        };
        trace!(base = %format_args!("{:#x}", self.base), size = self.size, "releasing allocation");
        // edges held by the freed block may release further allocations
        drop(orphaned);
        match &self.release {
            // SAFETY: the block was allocated with this layout and its last
            // reference is going away
            Release::Heap(layout) => unsafe { memory::deallocate(self.base, *layout) },
            // SAFETY: ownership of the block was handed over with this function
            Release::Foreign(free) => unsafe { free(self.base as *mut std::ffi::c_void) },
            Release::Trampoline(_) => {}
        }
    }
}

/// What keeps a proxy's memory alive
pub(crate) enum Anchor {
    Owned(Allocation),
    Borrowed(Proxy),
    Unmanaged,
}

pub(crate) struct ProxyCell {
    pub(crate) ty: Rc<ProxyType>,
    pub(crate) addr: usize,
    pub(crate) length: usize,
    pub(crate) anchor: Anchor,
}

/// Reference to native memory of a foreign type
#[derive(Clone)]
pub struct Proxy(pub(crate) Rc<ProxyCell>);

impl Proxy {
    pub(crate) fn new(ty: Rc<ProxyType>, addr: usize, length: usize, anchor: Anchor) -> Self {
        Proxy(Rc::new(ProxyCell {
            ty,
            addr,
            length,
            anchor,
        }))
    }

    pub(crate) fn state(&self) -> BridgeResult<Rc<BridgeState>> {
        self.0.ty.state()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyCell> {
        Rc::downgrade(&self.0)
    }

    /// Native address this proxy refers to
    pub fn address(&self) -> usize {
        self.0.addr
    }

    pub fn foreign_type(&self) -> &Rc<ProxyType> {
        &self.0.ty
    }

    pub fn type_name(&self) -> &str {
        self.0.ty.name()
    }

    /// Element count of array and address proxies (0 when unknown)
    pub fn len(&self) -> usize {
        self.0.length
    }

    pub fn is_empty(&self) -> bool {
        self.0.length == 0
    }

    /// Whether this proxy is the canonical base of its allocation
    pub fn is_base(&self) -> bool {
        matches!(self.0.anchor, Anchor::Owned(_))
    }

    /// Base proxy this proxy keeps alive, if any
    pub fn base(&self) -> Option<Proxy> {
        match &self.0.anchor {
            Anchor::Owned(_) => Some(self.clone()),
            Anchor::Borrowed(base) => Some(base.clone()),
            Anchor::Unmanaged => None,
        }
    }

    /// Identity comparison
    pub fn ptr_eq(a: &Proxy, b: &Proxy) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Whether the proxy's type is `ty` or a structural subtype of it
    pub fn is_instance_of(&self, ty: &ProxyType) -> bool {
        self.0.ty.is_subtype_of(ty)
    }

    /// Size in bytes of the referenced object (all elements for arrays and
    /// addresses)
    pub fn byte_size(&self) -> usize {
        match self.0.ty.element() {
            Some((_, stride)) => stride * self.0.length,
            None => self.0.ty.size().unwrap_or(0),
        }
    }

    /// Copy of the referenced bytes
    pub fn bytes(&self) -> Vec<u8> {
        // SAFETY: the anchor keeps `byte_size` bytes at the address alive
        unsafe { memory::bytes(self.0.addr, self.byte_size()).to_vec() }
    }

    /// Element `index` of an array or address proxy
    pub fn get(&self, index: usize) -> BridgeResult<Value> {
        address::index_get(self, index)
    }

    /// Assign element `index` of an array or address proxy
    pub fn set(&self, index: usize, value: impl Into<Value>) -> BridgeResult<()> {
        address::index_set(self, index, &value.into())
    }

    /// Pointer proxy to element `index` (`&p[index]`)
    pub fn element_ref(&self, index: usize) -> BridgeResult<Proxy> {
        address::element_ref(self, index)
    }

    /// All elements of an array or address proxy
    pub fn to_vec(&self) -> BridgeResult<Vec<Value>> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Read a composite field
    pub fn field(&self, name: &str) -> BridgeResult<Value> {
        composite::get_field(self, name)
    }

    /// Assign a trivially copiable composite field
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> BridgeResult<()> {
        composite::set_field(self, name, &value.into())
    }

    pub fn field_names(&self) -> Vec<String> {
        self.0.ty.field_names()
    }

    /// Run the composite initializer again on this object
    pub fn reinit(&self, args: &[Value], kwargs: &[(String, Value)]) -> BridgeResult<()> {
        let state = self.state()?;
        match self.0.ty.shape()? {
            Shape::Composite { .. } => {
                composite::initialize(&state, &self.0.ty, self.0.addr, args, kwargs)
            }
            _ => Err(BridgeError::NotConstructible(self.type_name().to_string())),
        }
    }

    /// Call a function proxy
    pub fn call(&self, args: &[Value]) -> BridgeResult<Value> {
        let state = self.state()?;
        caller::call(&state, self, args)
    }

    /// Pointer slots of this object that currently keep other objects alive
    pub fn referents(&self) -> BridgeResult<Vec<Proxy>> {
        let state = self.state()?;
        let slots = state.pointer_slots(self.0.addr, self.0.ty.descriptor, self.0.length);
        Ok(state.tracker.edges_at(&slots))
    }

    /// Sever the lifetime edges held by this object's pointer slots
    pub fn clear_references(&self) -> BridgeResult<usize> {
        let state = self.state()?;
        let slots = state.pointer_slots(self.0.addr, self.0.ty.descriptor, self.0.length);
        let cleared = state.tracker.remove_edges(&slots);
        let count = cleared.len();
        drop(cleared);
        Ok(count)
    }

    /// Host-facing printed form
    pub fn repr(&self) -> BridgeResult<String> {
        let state = self.state()?;
        match self.0.ty.kind() {
            Kind::Composite => composite::repr(&state, self),
            Kind::Address | Kind::Array => address::repr(self),
            Kind::Function => Ok(caller::repr(&state, self)),
            _ => Ok(format!("<{} at {:#x}>", self.type_name(), self.0.addr)),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("type", &self.type_name())
            .field("address", &format_args!("{:#x}", self.0.addr))
            .field("length", &self.0.length)
            .field("base", &self.is_base())
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr() {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<{} at {:#x}>", self.type_name(), self.0.addr),
        }
    }
}
