//! Composite (struct and union) proxies
//!
//! Field access goes through the field table built at link time. Fields of a
//! structural supertype (a composite first member at offset zero) are
//! addressable directly on the outer object.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::memory;
use crate::ops::ReadMode;
use crate::proxy::Proxy;
use crate::registry::{Field, ProxyType};
use crate::types::Kind;
use crate::value::Value;
use std::rc::Rc;

/// Allocate and initialize a new composite
pub(crate) fn construct(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> BridgeResult<Value> {
    if !state.types.is_complete(ty.descriptor()) {
        return Err(BridgeError::NotConstructible(ty.name().to_string()));
    }
    let size = ty.size().unwrap_or(0);
    let proxy = state.allocate(ty, size, 1, ty.descriptor())?;
    initialize(state, ty, proxy.address(), args, kwargs)?;
    Ok(Value::Proxy(proxy))
}

/// Run the initializer protocol on the composite at `addr`
///
/// - no arguments: zero fill
/// - one object of this type (or a subtype): byte copy
/// - one `Map`: keyword arguments
/// - otherwise zero fill, then positional fields in declaration order, then
///   keywords
pub(crate) fn initialize(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    addr: usize,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> BridgeResult<()> {
    let size = ty.size().unwrap_or(0);
    if kwargs.is_empty() {
        match args {
            [] => {
                clear(state, ty, addr, size);
                return Ok(());
            }
            [Value::Proxy(src)] if is_composite_instance(src, ty) => {
                if src.address() == addr {
                    return Err(BridgeError::SelfCopy);
                }
                // SAFETY: both objects hold at least `size` bytes
                unsafe { memory::copy(addr, src.address(), size) };
                state.refresh_edges(addr, ty.descriptor(), 1);
                return Ok(());
            }
            [Value::Map(pairs)] => return initialize(state, ty, addr, &[], pairs),
            _ => {}
        }
    }

    let positional: Vec<&Field> = ty.own_fields().iter().filter(|f| f.ty.is_some()).collect();
    if args.len() > positional.len() {
        return Err(BridgeError::TooManyArguments {
            fields: positional.len(),
        });
    }
    let mut assigned: Vec<&str> = positional[..args.len()]
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    let mut keyword_fields = Vec::with_capacity(kwargs.len());
    for (name, value) in kwargs {
        let field = ty
            .field(name)
            .ok_or_else(|| BridgeError::InvalidKeyword(name.clone()))?;
        if field.ty.is_none() {
            return Err(BridgeError::InvalidField(name.clone()));
        }
        if assigned.contains(&name.as_str()) {
            return Err(BridgeError::InvalidKeyword(name.clone()));
        }
        assigned.push(name);
        keyword_fields.push((field, value));
    }

    // the old contents and their pointees come back if any field fails
    // SAFETY: `addr` holds an object of `size` bytes
    let previous = unsafe { memory::bytes(addr, size) }.to_vec();
    let held = state
        .tracker
        .edges_at(&state.pointer_slots(addr, ty.descriptor(), 1));

    clear(state, ty, addr, size);
    let filled = positional
        .iter()
        .zip(args)
        .map(|(field, value)| (*field, value))
        .chain(keyword_fields.iter().map(|(field, value)| (field, *value)))
        .try_for_each(|(field, value)| write_field(state, addr, field, value));
    if filled.is_err() {
        // SAFETY: as above
        unsafe { memory::bytes_mut(addr, size) }.copy_from_slice(&previous);
        state.refresh_edges(addr, ty.descriptor(), 1);
    }
    drop(held);
    filled
}

fn clear(state: &BridgeState, ty: &ProxyType, addr: usize, size: usize) {
    // SAFETY: `addr` holds an object of `size` bytes
    unsafe { memory::zero(addr, size) };
    state.refresh_edges(addr, ty.descriptor(), 1);
}

fn is_composite_instance(src: &Proxy, ty: &ProxyType) -> bool {
    src.foreign_type().kind() == Kind::Composite && src.is_instance_of(ty)
}

fn write_field(state: &BridgeState, addr: usize, field: &Field, value: &Value) -> BridgeResult<()> {
    let fty = field
        .ty
        .ok_or_else(|| BridgeError::InvalidField(field.name.clone()))?;
    state.proxy_type(fty)?.write(addr + field.offset, value)
}

pub(crate) fn read(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    addr: usize,
    mode: ReadMode,
) -> BridgeResult<Value> {
    let proxy = match mode {
        ReadMode::Alias => state.proxy_at(ty, addr, 1),
        ReadMode::Copy => state.copy_object(ty, addr)?,
    };
    Ok(Value::Proxy(proxy))
}

/// Store a composite value: a byte copy from an object of this type, or a
/// temporary built from a `List`/`Map`
pub(crate) fn write(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    addr: usize,
    value: &Value,
) -> BridgeResult<()> {
    match value {
        Value::Proxy(src) if is_composite_instance(src, ty) => {
            if src.address() != addr {
                let size = ty.size().unwrap_or(0);
                // SAFETY: both objects hold at least `size` bytes
                unsafe { memory::copy(addr, src.address(), size) };
                state.refresh_edges(addr, ty.descriptor(), 1);
            }
            Ok(())
        }
        Value::List(_) | Value::Map(_) => {
            let temporary = ty.convert(value)?;
            if state.heap.allocation_info(addr).is_none() {
                if let Some(object) = temporary.as_proxy() {
                    let slots = state.pointer_slots(object.address(), ty.descriptor(), 1);
                    if state.tracker.holds_last_reference(&slots) {
                        return Err(BridgeError::mismatch(
                            format!("{} without new objects behind its pointers", ty.name()),
                            value.type_name(),
                        ));
                    }
                }
            }
            write(state, ty, addr, &temporary)
        }
        other => Err(BridgeError::mismatch(ty.name(), other.type_name())),
    }
}

/// Owner type and address of the fields reachable from `proxy`; pointers to
/// composites expose the fields of their first element
fn field_owner(state: &BridgeState, proxy: &Proxy) -> BridgeResult<(Rc<ProxyType>, usize)> {
    let ty = proxy.foreign_type();
    match ty.kind() {
        Kind::Composite => Ok((ty.clone(), proxy.address())),
        Kind::Address if !proxy.is_empty() => match ty.element() {
            Some((pointee, _)) if state.types.kind_of(pointee) == Kind::Composite => {
                Ok((state.proxy_type(pointee)?, proxy.address()))
            }
            _ => Err(BridgeError::mismatch("composite", ty.name())),
        },
        _ => Err(BridgeError::mismatch("composite", ty.name())),
    }
}

fn lookup(state: &BridgeState, proxy: &Proxy, name: &str) -> BridgeResult<(Rc<ProxyType>, usize)> {
    let (owner, addr) = field_owner(state, proxy)?;
    let field = owner.field(name).ok_or_else(|| BridgeError::NoSuchField {
        ty: owner.name().to_string(),
        field: name.to_string(),
    })?;
    let fty = field
        .ty
        .ok_or_else(|| BridgeError::InvalidField(name.to_string()))?;
    Ok((state.proxy_type(fty)?, addr + field.offset))
}

pub(crate) fn get_field(proxy: &Proxy, name: &str) -> BridgeResult<Value> {
    let state = proxy.state()?;
    let (fty, addr) = lookup(&state, proxy, name)?;
    fty.read(addr, ReadMode::Alias)
}

pub(crate) fn set_field(proxy: &Proxy, name: &str, value: &Value) -> BridgeResult<()> {
    let state = proxy.state()?;
    let (fty, addr) = lookup(&state, proxy, name)?;
    if !fty.is_trivially_copiable() {
        return Err(BridgeError::ReadOnly(format!(
            "field '{}' of type '{}' cannot be assigned; modify its contents instead",
            name,
            fty.name()
        )));
    }
    fty.write(addr, value)
}

/// `(T){a: 1, b: 2.0}`; nested occurrences of a type already being printed
/// collapse to `(T){...}`
pub(crate) fn repr(state: &BridgeState, proxy: &Proxy) -> BridgeResult<String> {
    let ty = proxy.foreign_type();
    let Some(_guard) = state.enter_repr(ty.descriptor()) else {
        return Ok(format!("({}){{...}}", ty.name()));
    };
    let mut parts = Vec::new();
    for field in ty.own_fields() {
        let Some(fty) = field.ty else { continue };
        let value = state
            .proxy_type(fty)?
            .read(proxy.address() + field.offset, ReadMode::Alias)?;
        parts.push(format!("{}: {}", field.name, value.repr()?));
    }
    Ok(format!("({}){{{}}}", ty.name(), parts.join(", ")))
}
