//! Address (pointer) and array proxies
//!
//! Both kinds describe a run of elements. The element count of an array
//! comes from its descriptor when static; otherwise, and for every pointer,
//! it is inferred from the heap index: a pointer to the base of an allocation
//! of matching element type spans the whole allocation, any other pointer
//! denotes a single element. Element types of unknown size give length 0,
//! so a `void *` into untracked memory reads as an empty run.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::memory;
use crate::ops::ReadMode;
use crate::proxy::Proxy;
use crate::registry::{ProxyType, Shape};
use crate::types::{Encoding, Kind, TypeRef};
use crate::value::Value;
use std::rc::Rc;

/// Element count of a run of `pointee` values starting at `target`
pub(crate) fn infer_length(state: &BridgeState, target: usize, pointee: TypeRef) -> usize {
    let types = &state.types;
    let stride = match types.size_of(pointee) {
        Some(stride) if stride > 0 && types.has_known_length(pointee) => stride,
        _ => return 0,
    };
    let Some(extent) = state.heap.allocation_info(target) else {
        return 1;
    };
    if extent.base != target {
        return 1;
    }
    let element = extent.ty.map(|ty| match types.kind_of(ty) {
        Kind::Array => types.element_type_of(ty).unwrap_or(ty),
        _ => ty,
    });
    match element {
        Some(element) if element == pointee => (extent.size / stride).max(1),
        _ => 1,
    }
}

pub(crate) fn read_address(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    pointee: TypeRef,
    addr: usize,
) -> BridgeResult<Value> {
    // SAFETY: callers pass addresses valid for a pointer
    let target = unsafe { memory::read_word(addr) };
    if target == 0 {
        return Ok(Value::Null);
    }
    let pointee_ty = state.proxy_type(pointee)?;
    if pointee_ty.kind() == Kind::Function {
        return Ok(Value::Proxy(state.proxy_at(&pointee_ty, target, 1)));
    }
    // held until the result anchors it; an adopted block gets its base here
    let base = state.base_for(target);
    if let Some(base) = &base {
        // an erased pointer to a tracked object gives the object back
        let is_object = pointee_ty.kind() == Kind::Void
            || (base.foreign_type().kind() == Kind::Composite && base.is_instance_of(&pointee_ty));
        if base.address() == target && is_object {
            return Ok(Value::Proxy(base.clone()));
        }
    }
    let length = infer_length(state, target, pointee);
    let proxy = state.proxy_at(ty, target, length);
    drop(base);
    Ok(Value::Proxy(proxy))
}

/// Whether `value` may be stored in a `pointee *` slot
fn accepts(state: &BridgeState, ty: &ProxyType, pointee_ty: &ProxyType, value: &Proxy) -> bool {
    let types = &state.types;
    let value_ty = value.foreign_type();
    if value_ty.descriptor() == ty.descriptor() || pointee_ty.kind() == Kind::Void {
        return true;
    }
    match value_ty.kind() {
        Kind::Array | Kind::Address => value_ty
            .element()
            .is_some_and(|(element, _)| types.is_subtype(element, pointee_ty.descriptor())),
        _ => value.is_instance_of(pointee_ty),
    }
}

/// Build a native object for a host value stored through a `pointee *`
///
/// Lists become arrays (or a composite for composite pointees), maps and
/// callables go through the pointee's constructor. Strings and bytes stored
/// through a `char *` become NUL-terminated character arrays.
pub(crate) fn materialize(pointee_ty: &Rc<ProxyType>, value: &Value) -> BridgeResult<Option<Proxy>> {
    let is_char = matches!(
        pointee_ty.shape(),
        Ok(Shape::Scalar {
            encoding: Encoding::SignedChar | Encoding::UnsignedChar,
            size: 1,
        })
    );
    let object = match value {
        Value::Str(s) if is_char => c_string(pointee_ty, s.as_bytes())?,
        Value::Bytes(b) if is_char => c_string(pointee_ty, b)?,
        Value::List(_) if pointee_ty.kind() != Kind::Composite => {
            pointee_ty.array(None)?.construct(std::slice::from_ref(value), &[])?
        }
        Value::List(_) | Value::Map(_) | Value::Callable(_) => pointee_ty.convert(value)?,
        _ => return Ok(None),
    };
    Ok(object.as_proxy().cloned())
}

fn c_string(element: &Rc<ProxyType>, bytes: &[u8]) -> BridgeResult<Value> {
    let mut terminated = Vec::with_capacity(bytes.len() + 1);
    terminated.extend_from_slice(bytes);
    terminated.push(0);
    element.array(None)?.construct(&[Value::bytes(terminated)], &[])
}

pub(crate) fn write_address(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    pointee: TypeRef,
    addr: usize,
    value: &Value,
) -> BridgeResult<()> {
    let pointee_ty = state.proxy_type(pointee)?;
    let mismatch = || {
        BridgeError::mismatch(
            format!("reference to object of type {}", pointee_ty.name()),
            value.type_name(),
        )
    };
    let temporary = match value {
        Value::Null | Value::Proxy(_) => None,
        // only an edge from tracked memory can keep a new object alive
        _ if state.heap.allocation_info(addr).is_none() => return Err(mismatch()),
        _ => materialize(&pointee_ty, value)?,
    };
    let target = match (value, &temporary) {
        (Value::Null, _) => 0,
        (_, Some(object)) => object.address(),
        (Value::Proxy(p), None) if accepts(state, ty, &pointee_ty, p) => p.address(),
        _ => return Err(mismatch()),
    };
    // SAFETY: callers pass addresses valid for a pointer
    unsafe { memory::write_word(addr, target) };
    // the edge added here is what keeps a temporary alive
    state.notify_ptr_write(addr, target);
    Ok(())
}

pub(crate) fn read_array(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    element: TypeRef,
    length: Option<usize>,
    addr: usize,
    mode: ReadMode,
) -> BridgeResult<Value> {
    if mode == ReadMode::Copy {
        return Err(BridgeError::unsupported(
            ty.name(),
            "arrays cannot be passed or returned by value",
        ));
    }
    let length = length.unwrap_or_else(|| infer_length(state, addr, element));
    Ok(Value::Proxy(state.proxy_at(ty, addr, length)))
}

/// Items of a host sequence; strings and bytes split into characters
fn sequence_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::List(items) => Some(items.as_ref().clone()),
        Value::Str(s) => Some(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Bytes(b) => Some(b.iter().map(|byte| Value::bytes([*byte])).collect()),
        _ => None,
    }
}

pub(crate) fn write_array(
    state: &BridgeState,
    element: TypeRef,
    length: Option<usize>,
    stride: usize,
    addr: usize,
    value: &Value,
) -> BridgeResult<()> {
    if let Value::Proxy(_) = value {
        return Err(BridgeError::ReadOnly(
            "cannot copy full arrays; assign the elements individually".to_string(),
        ));
    }
    let items = sequence_items(value).ok_or_else(|| BridgeError::mismatch("sequence", value.type_name()))?;
    let capacity = length.unwrap_or_else(|| infer_length(state, addr, element));
    if items.len() > capacity {
        return Err(BridgeError::SequenceTooLong { capacity });
    }
    let element_ty = state.proxy_type(element)?;
    for (i, item) in items.iter().enumerate() {
        element_ty.write(addr + i * stride, item)?;
    }
    Ok(())
}

/// Allocate an array from one initializer: a sequence, or an element count
pub(crate) fn construct_array(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> BridgeResult<Value> {
    if !kwargs.is_empty() {
        return Err(BridgeError::InvalidArguments(format!(
            "'{}' takes no keyword arguments",
            ty.name()
        )));
    }
    let Shape::Array {
        element,
        length,
        stride,
        ..
    } = ty.shape()?
    else {
        return Err(BridgeError::mismatch("array type", ty.name()));
    };
    let [init] = args else {
        return Err(BridgeError::InvalidArguments(format!(
            "'{}' takes exactly one initializer, got {}",
            ty.name(),
            args.len()
        )));
    };

    let (items, requested) = match init {
        Value::Int(n) => {
            let n = usize::try_from(*n).map_err(|_| {
                BridgeError::InvalidArguments(format!("invalid array length {}", n))
            })?;
            (Vec::new(), n)
        }
        other => {
            let items = sequence_items(other)
                .ok_or_else(|| BridgeError::mismatch("sequence or length", other.type_name()))?;
            let n = items.len();
            (items, n)
        }
    };
    let count = length.unwrap_or(requested);
    if requested > count {
        return Err(BridgeError::SequenceTooLong { capacity: count });
    }

    let size = stride.checked_mul(count).ok_or_else(|| {
        BridgeError::InvalidArguments(format!(
            "an array of {} elements of '{}' does not fit in memory",
            count,
            state.types.name_of(*element)
        ))
    })?;
    let extent_ty = state.types.array_of(*element, Some(count));
    let proxy = state.allocate(ty, size, count, extent_ty)?;
    let element_ty = state.proxy_type(*element)?;
    for (i, item) in items.iter().enumerate() {
        element_ty.write(proxy.address() + i * stride, item)?;
    }
    Ok(Value::Proxy(proxy))
}

fn element_of(proxy: &Proxy, index: usize) -> BridgeResult<(Rc<ProxyType>, usize)> {
    let state = proxy.state()?;
    let ty = proxy.foreign_type();
    let (element, stride) = ty
        .element()
        .ok_or_else(|| BridgeError::mismatch("array or address", ty.name()))?;
    if index >= proxy.len() {
        return Err(BridgeError::OutOfBounds {
            index,
            length: proxy.len(),
        });
    }
    Ok((state.proxy_type(element)?, proxy.address() + index * stride))
}

pub(crate) fn index_get(proxy: &Proxy, index: usize) -> BridgeResult<Value> {
    let (element, addr) = element_of(proxy, index)?;
    element.read(addr, ReadMode::Alias)
}

pub(crate) fn index_set(proxy: &Proxy, index: usize, value: &Value) -> BridgeResult<()> {
    let (element, addr) = element_of(proxy, index)?;
    if !element.is_trivially_copiable() {
        return Err(BridgeError::ReadOnly(format!(
            "elements of type '{}' cannot be assigned; modify their contents instead",
            element.name()
        )));
    }
    element.write(addr, value)
}

/// `&p[index]`: a pointer to one element, sharing the allocation's base
pub(crate) fn element_ref(proxy: &Proxy, index: usize) -> BridgeResult<Proxy> {
    let state = proxy.state()?;
    let (element, addr) = element_of(proxy, index)?;
    let pointer = element.ptr()?;
    let length = infer_length(&state, addr, element.descriptor());
    Ok(state.proxy_at(&pointer, addr, length))
}

/// `[1, 2]` for arrays, `<[1, 2]>` for addresses, `<T at 0x..>` when the
/// length is unknown
pub(crate) fn repr(proxy: &Proxy) -> BridgeResult<String> {
    let kind = proxy.foreign_type().kind();
    if kind == Kind::Address && proxy.is_empty() {
        return Ok(format!("<{} at {:#x}>", proxy.type_name(), proxy.address()));
    }
    let parts = (0..proxy.len())
        .map(|i| index_get(proxy, i)?.repr())
        .collect::<BridgeResult<Vec<_>>>()?;
    let listing = format!("[{}]", parts.join(", "));
    Ok(match kind {
        Kind::Address => format!("<{}>", listing),
        _ => listing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;

    #[test]
    fn test_construct_from_sequence_and_count() {
        let bridge = Bridge::new();
        let ints = bridge.type_named("int").unwrap().array(None).unwrap();
        let arr = ints
            .construct(&[Value::list(vec![Value::Int(1), Value::Int(2)])], &[])
            .unwrap();
        let arr = arr.as_proxy().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.to_vec().unwrap(), vec![Value::Int(1), Value::Int(2)]);

        let zeros = ints.construct(&[Value::Int(3)], &[]).unwrap();
        assert_eq!(zeros.repr().unwrap(), "[0, 0, 0]");
    }

    #[test]
    fn test_static_length_is_enforced() {
        let bridge = Bridge::new();
        let int3 = bridge.type_named("int").unwrap().array(Some(3)).unwrap();
        let short = int3.construct(&[Value::list(vec![Value::Int(9)])], &[]).unwrap();
        assert_eq!(short.repr().unwrap(), "[9, 0, 0]");
        let long = Value::list(vec![Value::Int(0); 4]);
        assert!(matches!(
            int3.construct(&[long], &[]),
            Err(BridgeError::SequenceTooLong { capacity: 3 })
        ));
    }

    #[test]
    fn test_char_array_from_bytes() {
        let bridge = Bridge::new();
        let chars = bridge.type_named("char").unwrap().array(Some(4)).unwrap();
        let arr = chars.construct(&[Value::bytes(b"hi")], &[]).unwrap();
        assert_eq!(arr.as_proxy().unwrap().bytes(), b"hi\0\0".to_vec());
    }

    #[test]
    fn test_interior_reference_has_length_one() {
        let bridge = Bridge::new();
        let ints = bridge.type_named("int").unwrap().array(None).unwrap();
        let arr = ints.construct(&[Value::Int(5)], &[]).unwrap();
        let arr = arr.as_proxy().unwrap();
        assert_eq!(arr.element_ref(0).unwrap().len(), 5);
        let inner = arr.element_ref(2).unwrap();
        assert_eq!(inner.len(), 1);
        assert!(Proxy::ptr_eq(&inner.base().unwrap(), arr));
    }

    #[test]
    fn test_bulk_array_copy_is_refused() {
        let bridge = Bridge::new();
        let int2 = bridge.type_named("int").unwrap().array(Some(2)).unwrap();
        let a = int2.construct(&[Value::Int(2)], &[]).unwrap();
        let mut slot = [0i32; 2];
        let err = unsafe { int2.write_at(slot.as_mut_ptr() as usize, &a) }.unwrap_err();
        assert!(matches!(err, BridgeError::ReadOnly(_)));
    }
}
