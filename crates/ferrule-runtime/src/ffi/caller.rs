//! Calls from the host into native functions
//!
//! Arguments that already live in native memory (composite proxies passed by
//! value) are handed to libffi in place. Every other argument is encoded into
//! one scratch buffer through its parameter type's `write`. The return value
//! is decoded with [`ReadMode::Copy`], so it never aliases the return buffer.

use crate::address;
use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::memory::{self, Scratch};
use crate::ops::ReadMode;
use crate::proxy::Proxy;
use crate::registry::{ProxyType, Shape};
use crate::types::Kind;
use crate::value::Value;
use libffi::middle::CodePtr;
use libffi::raw;
use std::ffi::c_void;
use std::rc::Rc;
use tracing::trace;

/// Where the bytes of one argument live
enum ArgSlot {
    /// Existing native data
    Direct(usize),
    /// Offset into the scratch buffer
    Scratch(usize),
}

/// Call the native function `function` with host arguments
pub(crate) fn call(state: &BridgeState, function: &Proxy, args: &[Value]) -> BridgeResult<Value> {
    let plan = function.foreign_type().call_plan()?;
    if args.len() != plan.args.len() {
        return Err(BridgeError::ArityMismatch {
            expected: plan.args.len(),
            got: args.len(),
        });
    }

    let mut slots = Vec::with_capacity(args.len());
    let mut scratch_size = 0;
    for (param, arg) in plan.args.iter().zip(args) {
        match param.data_ptr(arg) {
            Some(addr) => slots.push(ArgSlot::Direct(addr)),
            None => {
                slots.push(ArgSlot::Scratch(scratch_size));
                let size = param.size().unwrap_or(0);
                scratch_size += memory::align_up(size.max(1), 16);
            }
        }
    }

    let mut scratch = Scratch::new(scratch_size);
    let scratch_base = scratch.address();
    // objects built for pointer parameters; released when the call returns
    let mut temporaries = Vec::new();
    let mut arg_ptrs: Vec<*mut c_void> = Vec::with_capacity(args.len());
    for (i, ((param, arg), slot)) in plan.args.iter().zip(args).zip(&slots).enumerate() {
        let addr = match *slot {
            ArgSlot::Direct(addr) => addr,
            ArgSlot::Scratch(offset) => {
                let addr = scratch_base + offset;
                marshal(state, param, arg, addr, &mut temporaries)
                    .map_err(|e| at_argument(e, i + 1))?;
                addr
            }
        };
        arg_ptrs.push(addr as *mut c_void);
    }

    let mut ret = Scratch::new(plan.return_size);
    let ret_addr = ret.address();
    let code = CodePtr(function.address() as *mut c_void);

    // errors raised by trampolines during this call land here
    let outer = state.take_pending_error();
    trace!(
        function = %function.type_name(),
        addr = %format_args!("{:#x}", function.address()),
        args = args.len(),
        "calling native function"
    );
    // SAFETY: the plan describes the function at `code`; every argument
    // pointer refers to a value that outlives the call, and the return
    // buffer is at least as large as libffi writes
    unsafe {
        raw::ffi_call(
            plan.cif_ptr(),
            Some(*code.as_safe_fun()),
            ret_addr as *mut c_void,
            arg_ptrs.as_mut_ptr(),
        );
    }
    let raised = state.take_pending_error();
    state.restore_pending_error(outer);
    drop(temporaries);

    if let Some(error) = raised {
        return Err(error);
    }
    plan.returns.read(ret_addr + plan.return_offset(), ReadMode::Copy)
}

/// Encode one argument at `addr`
///
/// Host lists, maps and callables passed for a pointer parameter are first
/// built into native objects of the pointee type. Composites coerced from a
/// list or map are built the same way, so that objects behind their pointer
/// fields live until the call returns.
fn marshal(
    state: &BridgeState,
    param: &Rc<ProxyType>,
    arg: &Value,
    addr: usize,
    temporaries: &mut Vec<Proxy>,
) -> BridgeResult<()> {
    let object = match (param.shape()?, arg) {
        (Shape::Address { pointee, .. }, _) => {
            let pointee_ty = state.proxy_type(*pointee)?;
            address::materialize(&pointee_ty, arg)?
        }
        (Shape::Composite { .. }, Value::List(_) | Value::Map(_)) => {
            param.convert(arg)?.as_proxy().cloned()
        }
        _ => None,
    };
    match object {
        Some(object) => {
            let value = Value::Proxy(object.clone());
            temporaries.push(object);
            param.write(addr, &value)
        }
        None => param.write(addr, arg),
    }
}

fn at_argument(error: BridgeError, position: usize) -> BridgeError {
    match error {
        BridgeError::TypeMismatch { expected, got } => BridgeError::TypeMismatch {
            expected: format!("{} for argument {}", expected, position),
            got,
        },
        other => other,
    }
}

/// `<foreign function 'int add(int, int)' at 0x...>`
pub(crate) fn repr(state: &BridgeState, function: &Proxy) -> String {
    let ty = function.foreign_type();
    let signature = match ty.kind() {
        Kind::Function => {
            let names = state.symbol_names.borrow();
            let name = names
                .get(&function.address())
                .map(|n| n.to_string())
                .unwrap_or_else(|| "(*)".to_string());
            state.types.signature_spelling(ty.descriptor(), &name)
        }
        _ => ty.name().to_string(),
    };
    format!(
        "<foreign function '{}' at {:#x}>",
        signature,
        function.address()
    )
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::error::BridgeError;
    use crate::types::Member;
    use crate::value::Value;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn negate(x: i8) -> i8 {
        -x
    }

    #[repr(C)]
    struct Pair {
        hello: i32,
        world: f64,
    }

    extern "C" fn make(hello: i32, world: f64) -> Pair {
        Pair { hello, world }
    }

    extern "C" fn sum_pair(p: Pair) -> f64 {
        p.hello as f64 + p.world
    }

    #[test]
    fn test_call_scalar_function() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let fun = bridge.fun(&int, &[&int, &int]).unwrap();
        let add = unsafe { bridge.function_at(add as usize, &fun) }.unwrap();
        assert_eq!(
            add.call(&[Value::Int(2), Value::Int(40)]).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn test_narrow_integer_return() {
        let bridge = Bridge::new();
        let schar = bridge.type_named("signed char").unwrap();
        let fun = bridge.fun(&schar, &[&schar]).unwrap();
        let negate = unsafe { bridge.function_at(negate as usize, &fun) }.unwrap();
        assert_eq!(negate.call(&[Value::Int(5)]).unwrap(), Value::Int(-5));
    }

    #[test]
    fn test_arity_and_argument_errors() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let fun = bridge.fun(&int, &[&int, &int]).unwrap();
        let add = unsafe { bridge.function_at(add as usize, &fun) }.unwrap();
        assert!(matches!(
            add.call(&[Value::Int(1)]),
            Err(BridgeError::ArityMismatch { expected: 2, got: 1 })
        ));
        let err = add.call(&[Value::Int(1), Value::str("x")]).unwrap_err();
        assert!(err.to_string().contains("for argument 2"), "{}", err);
    }

    #[test]
    fn test_struct_by_value_both_ways() {
        let bridge = Bridge::new();
        let types = bridge.types();
        let int = types.lookup("int").unwrap();
        let double = types.lookup("double").unwrap();
        let pair = types.composite(
            "pair",
            16,
            vec![Member::new("hello", 0, int), Member::new("world", 8, double)],
        );
        let pair = bridge.proxy_type(pair).unwrap();
        let int = bridge.type_named("int").unwrap();
        let double = bridge.type_named("double").unwrap();

        let make_ty = bridge.fun(&pair, &[&int, &double]).unwrap();
        let make = unsafe { bridge.function_at(make as usize, &make_ty) }.unwrap();
        let result = make.call(&[Value::Int(3), Value::Float(2.5)]).unwrap();
        let result = result.as_proxy().unwrap();
        assert!(result.is_base());
        assert_eq!(result.field("hello").unwrap(), Value::Int(3));
        assert_eq!(result.field("world").unwrap(), Value::Float(2.5));

        let sum_ty = bridge.fun(&double, &[&pair]).unwrap();
        let sum = unsafe { bridge.function_at(sum_pair as usize, &sum_ty) }.unwrap();
        assert_eq!(
            sum.call(&[Value::Proxy(result.clone())]).unwrap(),
            Value::Float(5.5)
        );
        let coerced = Value::map([("hello", Value::Int(1)), ("world", Value::Float(0.5))]);
        assert_eq!(sum.call(&[coerced]).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_function_repr_without_symbol() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let fun = bridge.fun(&int, &[&int, &int]).unwrap();
        let add = unsafe { bridge.function_at(add as usize, &fun) }.unwrap();
        let repr = add.repr().unwrap();
        assert!(repr.starts_with("<foreign function 'int (*)(int, int)' at 0x"), "{}", repr);
    }
}
