//! Uniform operation table
//!
//! Every [`ProxyType`] answers the same four operations whatever its kind:
//! `construct`, `read`, `write` and `data_ptr`. Dispatch is a match over the
//! linked [`Shape`].

use crate::address;
use crate::bridge::BridgeState;
use crate::composite;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::callbacks;
use crate::heap::{Extent, Lifetime};
use crate::memory;
use crate::proxy::{Allocation, Anchor, Proxy, Release};
use crate::registry::{ProxyType, Shape};
use crate::scalar;
use crate::types::{Kind, TypeRef};
use crate::value::Value;
use std::rc::Rc;
use tracing::trace;

/// How a read treats the memory it reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The result refers to the memory it was read from
    Alias,
    /// The result is a fresh durable copy (call returns, callback arguments)
    Copy,
}

impl ProxyType {
    /// Create a new object of this type from host arguments
    pub fn construct(self: &Rc<Self>, args: &[Value], kwargs: &[(String, Value)]) -> BridgeResult<Value> {
        let state = self.state()?;
        match self.shape()? {
            Shape::Scalar { encoding, size } => {
                if !kwargs.is_empty() || args.len() > 1 {
                    return Err(BridgeError::InvalidArguments(format!(
                        "'{}' takes at most one positional argument",
                        self.name()
                    )));
                }
                let mut buf = vec![0u8; *size];
                if let Some(value) = args.first() {
                    scalar::encode(*encoding, value, &mut buf)?;
                }
                scalar::decode(*encoding, &buf)
            }
            Shape::Composite { .. } => composite::construct(&state, self, args, kwargs),
            Shape::Array { .. } => address::construct_array(&state, self, args, kwargs),
            Shape::Function { .. } => callbacks::construct_function(&state, self, args, kwargs),
            Shape::Void | Shape::Address { .. } | Shape::Invalid(_) => {
                Err(BridgeError::NotConstructible(self.name().to_string()))
            }
        }
    }

    /// Coerce a host value into an object of this type
    ///
    /// Proxies of this type (or a subtype) are returned unchanged; a `Map` is
    /// used as keyword arguments and a `List` as positional arguments of a
    /// composite, or as the initializer of an array.
    pub fn convert(self: &Rc<Self>, value: &Value) -> BridgeResult<Value> {
        match value {
            Value::Proxy(p) if p.is_instance_of(self) => Ok(value.clone()),
            Value::Map(pairs) => self.construct(&[], pairs),
            Value::List(items) if self.kind == Kind::Composite => self.construct(items, &[]),
            other => self.construct(std::slice::from_ref(other), &[]),
        }
    }

    /// Decode the object stored at `addr`
    pub(crate) fn read(self: &Rc<Self>, addr: usize, mode: ReadMode) -> BridgeResult<Value> {
        let state = self.state()?;
        match self.shape()? {
            Shape::Void => Ok(Value::Null),
            Shape::Scalar { encoding, size } => {
                // SAFETY: callers pass addresses valid for the type's size
                let bytes = unsafe { memory::bytes(addr, *size) };
                scalar::decode(*encoding, bytes)
            }
            Shape::Composite { .. } => composite::read(&state, self, addr, mode),
            Shape::Address { pointee, .. } => address::read_address(&state, self, *pointee, addr),
            Shape::Array {
                element, length, ..
            } => address::read_array(&state, self, *element, *length, addr, mode),
            Shape::Function { .. } => Ok(Value::Proxy(state.proxy_at(self, addr, 1))),
            Shape::Invalid(_) => Err(BridgeError::unsupported(self.name(), "invalid type")),
        }
    }

    /// Encode `value` into the object stored at `addr`
    pub(crate) fn write(self: &Rc<Self>, addr: usize, value: &Value) -> BridgeResult<()> {
        let state = self.state()?;
        match self.shape()? {
            Shape::Void => match value {
                Value::Null => Ok(()),
                other => Err(BridgeError::mismatch("null", other.type_name())),
            },
            Shape::Scalar { encoding, size } => {
                // SAFETY: callers pass addresses valid for the type's size
                let out = unsafe { memory::bytes_mut(addr, *size) };
                scalar::encode(*encoding, value, out)
            }
            Shape::Composite { .. } => composite::write(&state, self, addr, value),
            Shape::Address { pointee, .. } => {
                address::write_address(&state, self, *pointee, addr, value)
            }
            Shape::Array {
                element,
                length,
                stride,
                ..
            } => address::write_array(&state, *element, *length, *stride, addr, value),
            Shape::Function { .. } => Err(BridgeError::ReadOnly(format!(
                "cannot overwrite the code of function '{}'",
                self.name()
            ))),
            Shape::Invalid(_) => Err(BridgeError::unsupported(self.name(), "invalid type")),
        }
    }

    /// Address of existing native data that can be passed as this type
    /// without marshaling
    pub(crate) fn data_ptr(&self, value: &Value) -> Option<usize> {
        match (self.kind, value) {
            (Kind::Composite, Value::Proxy(p))
                if p.foreign_type().kind() == Kind::Composite && p.is_instance_of(self) =>
            {
                Some(p.address())
            }
            _ => None,
        }
    }

    /// Decode the object at a raw address, aliasing the memory
    ///
    /// # Safety
    ///
    /// `addr` must point to live memory holding an object of this type.
    pub unsafe fn read_at(self: &Rc<Self>, addr: usize) -> BridgeResult<Value> {
        self.read(addr, ReadMode::Alias)
    }

    /// Encode `value` at a raw address
    ///
    /// # Safety
    ///
    /// `addr` must point to writable memory large enough for this type.
    pub unsafe fn write_at(self: &Rc<Self>, addr: usize, value: &Value) -> BridgeResult<()> {
        self.write(addr, value)
    }
}

impl BridgeState {
    /// Proxy of type `ty` at `addr`, sharing the allocation's base proxy
    ///
    /// The base itself is returned when it sits exactly at `addr` with the
    /// same type.
    pub(crate) fn proxy_at(&self, ty: &Rc<ProxyType>, addr: usize, length: usize) -> Proxy {
        let base = self.base_for(addr);
        if let Some(base) = &base {
            if base.address() == addr && Rc::ptr_eq(base.foreign_type(), ty) {
                return base.clone();
            }
        }
        let anchor = match base {
            Some(base) => Anchor::Borrowed(base),
            None => Anchor::Unmanaged,
        };
        Proxy::new(ty.clone(), addr, length, anchor)
    }

    /// Allocate a zero-filled managed object and register its base proxy
    pub(crate) fn allocate(
        &self,
        ty: &Rc<ProxyType>,
        size: usize,
        length: usize,
        extent_ty: TypeRef,
    ) -> BridgeResult<Proxy> {
        let align = self.types.align_of(extent_ty);
        let (addr, layout) = memory::allocate_zeroed(size, align)?;
        self.heap.insert(Extent {
            base: addr,
            size,
            ty: Some(extent_ty),
            lifetime: Lifetime::Managed,
        });
        let proxy = Proxy::new(
            ty.clone(),
            addr,
            length,
            Anchor::Owned(Allocation {
                base: addr,
                size,
                release: Release::Heap(layout),
                bridge: self.weak_self.clone(),
            }),
        );
        self.tracker.register_base(&proxy);
        trace!(ty = %ty.name(), addr = %format_args!("{:#x}", addr), size, "allocated object");
        Ok(proxy)
    }

    /// Durable copy of the composite at `addr`
    pub(crate) fn copy_object(&self, ty: &Rc<ProxyType>, addr: usize) -> BridgeResult<Proxy> {
        let size = ty.size().unwrap_or(0);
        let copy = self.allocate(ty, size, 1, ty.descriptor())?;
        // SAFETY: the source holds `size` bytes and the copy was just allocated
        unsafe { memory::copy(copy.address(), addr, size) };
        self.refresh_edges(copy.address(), ty.descriptor(), 1);
        Ok(copy)
    }
}
