//! Call plans
//!
//! A [`CallPlan`] is the libffi call interface of a function descriptor plus
//! the proxy types used to marshal its arguments and return value. Plans are
//! built on first use and memoized on the function's bundle.
//!
//! Parameter types are canonicalized the way C passes them: an array
//! parameter is a pointer to its first element and a function parameter is
//! a function pointer.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ProxyType, Shape};
use crate::types::{Encoding, Kind, TypeRef};
use libffi::middle::{Cif, Type};
use libffi::raw;
use std::mem;
use std::rc::Rc;
use tracing::debug;

/// Width of the return buffer libffi writes small integers into
pub(crate) const RETURN_WORD: usize = mem::size_of::<raw::ffi_arg>();

pub(crate) struct CallPlan {
    cif: Cif,
    pub(crate) returns: Rc<ProxyType>,
    pub(crate) args: Vec<Rc<ProxyType>>,
    /// Return buffer size, never below [`RETURN_WORD`]
    pub(crate) return_size: usize,
}

impl CallPlan {
    pub(crate) fn cif_ptr(&self) -> *mut raw::ffi_cif {
        self.cif.as_raw_ptr()
    }

    /// Integral return narrower than a return word; libffi widens these
    pub(crate) fn widened_return(&self) -> Option<(usize, bool)> {
        match self.returns.shape() {
            Ok(Shape::Scalar { encoding, size }) if encoding.is_integral() && *size < RETURN_WORD => {
                Some((*size, encoding.is_signed()))
            }
            _ => None,
        }
    }

    /// Offset of a widened integral inside the return buffer
    pub(crate) fn return_offset(&self) -> usize {
        match self.widened_return() {
            Some((size, _)) if cfg!(target_endian = "big") => RETURN_WORD - size,
            _ => 0,
        }
    }

    fn build(
        state: &BridgeState,
        function: &ProxyType,
        returns: TypeRef,
        args: &[TypeRef],
    ) -> BridgeResult<Self> {
        let setup = |reason: String| BridgeError::CallSetup {
            function: function.name().to_string(),
            reason,
        };

        let results = state
            .types
            .signature_of(function.descriptor())
            .iter()
            .filter(|slot| slot.is_return)
            .count();
        if results > 1 {
            return Err(setup(format!(
                "{} return values; only one is supported",
                results
            )));
        }

        let ret = canonical_return(state, returns)
            .map_err(|e| setup(format!("return value: {}", e)))?;
        let ret_type = ffi_type(state, ret.descriptor())
            .map_err(|reason| setup(format!("return value: {}", reason)))?;

        let mut params = Vec::with_capacity(args.len());
        let mut arg_types = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let position = i + 1;
            let param = canonical_param(state, *arg)
                .map_err(|e| setup(format!("argument {}: {}", position, e)))?;
            if param.kind() == Kind::Void {
                return Err(setup(format!("argument {}: void parameter", position)));
            }
            let ty = ffi_type(state, param.descriptor())
                .map_err(|reason| setup(format!("argument {}: {}", position, reason)))?;
            params.push(param);
            arg_types.push(ty);
        }

        let return_size = ret.size().unwrap_or(0).max(RETURN_WORD);
        debug!(
            function = %function.name(),
            args = params.len(),
            return_size,
            "prepared call plan"
        );
        Ok(Self {
            cif: Cif::new(arg_types, ret_type),
            returns: ret,
            args: params,
            return_size,
        })
    }
}

impl ProxyType {
    /// libffi plan of a function type, built once
    pub(crate) fn call_plan(&self) -> BridgeResult<Rc<CallPlan>> {
        let Shape::Function {
            returns,
            args,
            plan,
        } = self.shape()?
        else {
            return Err(BridgeError::mismatch("function type", self.name()));
        };
        if let Some(plan) = plan.get() {
            return Ok(plan.clone());
        }
        let state = self.state()?;
        let built = Rc::new(CallPlan::build(&state, self, *returns, args)?);
        Ok(plan.get_or_init(|| built).clone())
    }
}

fn canonical_param(state: &BridgeState, ty: TypeRef) -> BridgeResult<Rc<ProxyType>> {
    let bundle = state.proxy_type(ty)?;
    bundle.shape()?;
    match bundle.kind() {
        Kind::Array => match bundle.element() {
            Some((element, _)) => state.proxy_type(state.types.address_of(element)),
            None => Err(BridgeError::unsupported(bundle.name(), "array without element type")),
        },
        Kind::Function => bundle.ptr(),
        _ => Ok(bundle),
    }
}

fn canonical_return(state: &BridgeState, ty: TypeRef) -> BridgeResult<Rc<ProxyType>> {
    let bundle = state.proxy_type(ty)?;
    bundle.shape()?;
    match bundle.kind() {
        Kind::Array => Err(BridgeError::unsupported(
            bundle.name(),
            "arrays cannot be returned by value",
        )),
        Kind::Function => bundle.ptr(),
        _ => Ok(bundle),
    }
}

/// libffi type of a value of descriptor `ty`
fn ffi_type(state: &BridgeState, ty: TypeRef) -> Result<Type, String> {
    let types = &state.types;
    match types.kind_of(ty) {
        Kind::Void => Ok(Type::void()),
        Kind::Base => {
            let (encoding, size) = types
                .encoding_of(ty)
                .ok_or_else(|| format!("'{}' has no encoding", types.name_of(ty)))?;
            scalar_type(encoding, size).ok_or_else(|| {
                format!(
                    "'{}' ({:?}, {} bytes) cannot be passed to native code",
                    types.name_of(ty),
                    encoding,
                    size
                )
            })
        }
        Kind::Address | Kind::Function => Ok(Type::pointer()),
        Kind::Composite => composite_type(state, ty),
        Kind::Array => Err(format!(
            "array '{}' cannot be passed by value",
            types.name_of(ty)
        )),
        Kind::Enum | Kind::Subrange => Err(format!(
            "'{}': enumerations and subranges are not handled",
            types.name_of(ty)
        )),
        Kind::Unknown => Err(format!("'{}' has no description", types.name_of(ty))),
    }
}

fn scalar_type(encoding: Encoding, size: usize) -> Option<Type> {
    use Encoding::*;
    Some(match (encoding, size) {
        (Bool, 1) => Type::u8(),
        (Signed | SignedChar, 1) => Type::i8(),
        (Unsigned | UnsignedChar, 1) => Type::u8(),
        (Signed | SignedChar, 2) => Type::i16(),
        (Unsigned | UnsignedChar, 2) => Type::u16(),
        (Signed | SignedChar, 4) => Type::i32(),
        (Unsigned | UnsignedChar, 4) => Type::u32(),
        (Signed | SignedChar, 8) => Type::i64(),
        (Unsigned | UnsignedChar, 8) => Type::u64(),
        (Float, 4) => Type::f32(),
        (Float, 8) => Type::f64(),
        (Float, 16) => long_double()?,
        (Complex, 8 | 16 | 32) => {
            let half = scalar_type(Float, size / 2)?;
            Type::structure([half.clone(), half])
        }
        _ => return None,
    })
}

#[cfg(any(
    target_arch = "x86_64",
    all(target_arch = "aarch64", target_os = "linux")
))]
fn long_double() -> Option<Type> {
    Some(Type::longdouble())
}

#[cfg(not(any(
    target_arch = "x86_64",
    all(target_arch = "aarch64", target_os = "linux")
)))]
fn long_double() -> Option<Type> {
    None
}

/// libffi structure for a composite passed by value
///
/// Members sharing an offset overlay each other (unions); the largest one
/// stands for the group. Array members are laid out as repeated elements.
fn composite_type(state: &BridgeState, ty: TypeRef) -> Result<Type, String> {
    let types = &state.types;
    let name = types.name_of(ty);
    if !types.is_complete(ty) {
        return Err(format!("'{}' is incomplete", name));
    }

    let mut groups: Vec<(usize, TypeRef, usize)> = Vec::new();
    for member in types.members_of(ty).iter() {
        let size = types
            .size_of(member.ty)
            .ok_or_else(|| format!("member '{}' of '{}' has no known size", member.name, name))?;
        match groups.iter_mut().find(|(offset, _, _)| *offset == member.offset) {
            Some(group) if size > group.2 => *group = (member.offset, member.ty, size),
            Some(_) => {}
            None => groups.push((member.offset, member.ty, size)),
        }
    }
    groups.sort_by_key(|(offset, _, _)| *offset);

    let mut elements = Vec::new();
    let mut offsets = Vec::new();
    for (offset, member, _) in groups {
        if types.kind_of(member) == Kind::Array {
            let (Some(element), Some(length)) =
                (types.element_type_of(member), types.array_length(member))
            else {
                return Err(format!("array member of '{}' has no static length", name));
            };
            let stride = types.size_of(element).unwrap_or(0);
            let element_type = ffi_type(state, element)?;
            for i in 0..length {
                elements.push(element_type.clone());
                offsets.push(offset + i * stride);
            }
        } else {
            elements.push(ffi_type(state, member)?);
            offsets.push(offset);
        }
    }
    if elements.is_empty() {
        return Err(format!("empty composite '{}' cannot be passed by value", name));
    }

    let structure = Type::structure(elements);
    let mut natural = vec![0usize; offsets.len()];
    // SAFETY: the structure type is fully built and has `offsets.len()` elements
    let status = unsafe {
        raw::ffi_get_struct_offsets(
            raw::ffi_abi_FFI_DEFAULT_ABI,
            structure.as_raw_ptr(),
            natural.as_mut_ptr(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(format!("cannot compute the layout of '{}'", name));
    }
    if natural != offsets {
        return Err(format!(
            "'{}' is not laid out with natural alignment (offsets {:?}, expected {:?})",
            name, offsets, natural
        ));
    }
    Ok(structure)
}
