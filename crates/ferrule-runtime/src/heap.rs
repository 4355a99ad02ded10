//! Allocation metadata
//!
//! [`HeapIndex`] answers "which allocation encloses this address?" for every
//! block the bridge knows about: objects it allocated itself, native blocks
//! handed over to it, globals of loaded libraries and trampolines. Lookups are
//! ordered-map range queries on the base address.

use crate::types::TypeRef;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::c_void;

/// Native deallocation function (`free`-like)
pub type FreeFn = unsafe extern "C" fn(*mut c_void);

/// Who is responsible for releasing an extent
#[derive(Debug, Clone, Copy)]
pub enum Lifetime {
    /// Allocated by the bridge; its base proxy frees it
    Managed,
    /// Native block whose free function was handed to the bridge
    Adopted(FreeFn),
    /// Library globals and read-only data; never freed
    Static,
    /// Known layout, lifetime owned elsewhere
    Foreign,
}

impl Lifetime {
    /// Whether a base proxy may extend the lifetime of the extent
    pub fn is_extendable(self) -> bool {
        matches!(self, Lifetime::Managed | Lifetime::Adopted(_))
    }
}

/// One tracked allocation
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub base: usize,
    pub size: usize,
    pub ty: Option<TypeRef>,
    pub lifetime: Lifetime,
}

impl Extent {
    /// Whether `addr` lies inside the extent; an empty extent only contains
    /// its own base
    pub fn contains(&self, addr: usize) -> bool {
        if self.size == 0 {
            addr == self.base
        } else {
            addr >= self.base && addr - self.base < self.size
        }
    }
}

/// Address-ordered index of tracked allocations
#[derive(Debug, Default)]
pub struct HeapIndex {
    extents: RefCell<BTreeMap<usize, Extent>>,
}

impl HeapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The extent enclosing `addr`, if any
    pub fn allocation_info(&self, addr: usize) -> Option<Extent> {
        self.extents
            .borrow()
            .range(..=addr)
            .next_back()
            .map(|(_, extent)| *extent)
            .filter(|extent| extent.contains(addr))
    }

    /// Track an extent, replacing any extent with the same base
    pub fn insert(&self, extent: Extent) {
        self.extents.borrow_mut().insert(extent.base, extent);
    }

    pub fn remove(&self, base: usize) -> Option<Extent> {
        self.extents.borrow_mut().remove(&base)
    }

    /// Record the element type of an extent; returns false if `base` is not
    /// the start of a tracked extent
    pub fn set_type(&self, base: usize, ty: TypeRef) -> bool {
        match self.extents.borrow_mut().get_mut(&base) {
            Some(extent) => {
                extent.ty = Some(ty);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.extents.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.borrow().is_empty()
    }
}
