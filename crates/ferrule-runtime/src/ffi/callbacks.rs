//! Trampolines: native entry points for host callables
//!
//! Constructing a function type from a host callable allocates a libffi
//! closure bound to the type's call plan. The closure's code address is the
//! base of a managed allocation, so the usual lifetime edges keep it alive
//! while native memory refers to it; the executable memory is freed with the
//! base proxy.
//!
//! Errors (and panics) inside the host callable cannot unwind through native
//! frames. They are logged, the return slot is zero-filled and the error is
//! parked on the session until the outermost native call returns.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::plan::{CallPlan, RETURN_WORD};
use crate::heap::{Extent, Lifetime};
use crate::memory;
use crate::ops::ReadMode;
use crate::proxy::{Allocation, Anchor, Proxy, Release};
use crate::registry::ProxyType;
use crate::scalar;
use crate::types::Kind;
use crate::value::{HostFn, Value};
use libffi::raw;
use std::ffi::c_void;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Everything a running trampoline needs
struct ClosureContext {
    state: Weak<BridgeState>,
    plan: Rc<CallPlan>,
    callable: HostFn,
    name: Rc<str>,
}

/// Executable closure memory and the context it points to
pub(crate) struct Trampoline {
    closure: *mut raw::ffi_closure,
    code: usize,
    _context: Box<ClosureContext>,
}

impl Trampoline {
    fn new(ty: &ProxyType, plan: Rc<CallPlan>, state: Weak<BridgeState>, callable: HostFn) -> BridgeResult<Self> {
        let setup = |reason: &str| BridgeError::CallSetup {
            function: ty.name().to_string(),
            reason: reason.to_string(),
        };
        let context = Box::new(ClosureContext {
            state,
            plan,
            callable,
            name: ty.name.clone(),
        });

        let mut code: *mut c_void = ptr::null_mut();
        // SAFETY: plain allocation; `code` receives the executable alias
        let closure = unsafe { raw::ffi_closure_alloc(mem::size_of::<raw::ffi_closure>(), &mut code) }
            as *mut raw::ffi_closure;
        if closure.is_null() || code.is_null() {
            return Err(setup("cannot allocate closure memory"));
        }
        let trampoline = Trampoline {
            closure,
            code: code as usize,
            _context: context,
        };

        let userdata = &*trampoline._context as *const ClosureContext as *mut c_void;
        // SAFETY: the cif and the context are owned by the trampoline and
        // outlive the closure, which is freed first on drop
        let status = unsafe {
            raw::ffi_prep_closure_loc(
                trampoline.closure,
                trampoline._context.plan.cif_ptr(),
                Some(entry),
                userdata,
                code,
            )
        };
        if status != raw::ffi_status_FFI_OK {
            return Err(setup("closure preparation failed"));
        }
        Ok(trampoline)
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        debug!(code = %format_args!("{:#x}", self.code), "freeing trampoline");
        // SAFETY: allocated by ffi_closure_alloc and released exactly once
        unsafe { raw::ffi_closure_free(self.closure as *mut c_void) };
    }
}

/// Native entry point of every trampoline
unsafe extern "C" fn entry(
    _cif: *mut raw::ffi_cif,
    ret: *mut c_void,
    args: *mut *mut c_void,
    userdata: *mut c_void,
) {
    // SAFETY: userdata is the boxed context, alive as long as the closure
    let context = &*(userdata as *const ClosureContext);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.invoke(ret as usize, args)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(_) => BridgeError::Callback(format!("host callable for '{}' panicked", context.name)),
    };

    let written = match context.plan.widened_return() {
        Some(_) => RETURN_WORD,
        None => context.plan.returns.size().unwrap_or(0),
    };
    memory::zero(ret as usize, written);
    warn!(function = %context.name, %error, "host callback failed; returning zero");
    if let Some(state) = context.state.upgrade() {
        state.set_pending_error(error);
    }
}

impl ClosureContext {
    /// # Safety
    ///
    /// `args` holds one pointer per parameter and `ret` is libffi's return
    /// buffer for this plan.
    unsafe fn invoke(&self, ret: usize, args: *mut *mut c_void) -> BridgeResult<()> {
        let mut values = Vec::with_capacity(self.plan.args.len());
        for (i, param) in self.plan.args.iter().enumerate() {
            let addr = *args.add(i) as usize;
            values.push(param.read(addr, ReadMode::Copy)?);
        }

        let result = (self.callable)(&values)?;

        let returns = &self.plan.returns;
        if returns.kind() == Kind::Void {
            return Ok(());
        }
        match self.plan.widened_return() {
            Some((size, signed)) => {
                let mut narrow = [0u8; RETURN_WORD];
                returns.write(narrow.as_mut_ptr() as usize, &result)?;
                let value = scalar::load_integer(&narrow[..size], signed);
                scalar::store_integer(value, signed, memory::bytes_mut(ret, RETURN_WORD))
            }
            None => returns.write(ret, &result),
        }
    }
}

/// Construct an object of function type `ty`
///
/// A host callable becomes a new trampoline; a function proxy of the same
/// type is returned unchanged.
pub(crate) fn construct_function(
    state: &BridgeState,
    ty: &Rc<ProxyType>,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> BridgeResult<Value> {
    let [arg] = args else {
        return Err(BridgeError::InvalidArguments(format!(
            "'{}' takes exactly one callable",
            ty.name()
        )));
    };
    if !kwargs.is_empty() {
        return Err(BridgeError::InvalidArguments(format!(
            "'{}' takes no keyword arguments",
            ty.name()
        )));
    }
    match arg {
        Value::Callable(callable) => Ok(Value::Proxy(trampoline(state, ty, callable.clone())?)),
        Value::Proxy(p) if p.foreign_type().descriptor() == ty.descriptor() => Ok(arg.clone()),
        other => Err(BridgeError::mismatch(
            format!("callable for '{}'", state.types.spelling(ty.descriptor())),
            other.type_name(),
        )),
    }
}

fn trampoline(state: &BridgeState, ty: &Rc<ProxyType>, callable: HostFn) -> BridgeResult<Proxy> {
    let plan = ty.call_plan()?;
    let trampoline = Trampoline::new(ty, plan, state.weak_self.clone(), callable)?;
    let code = trampoline.code;

    state.heap.insert(Extent {
        base: code,
        size: 1,
        ty: Some(ty.descriptor()),
        lifetime: Lifetime::Managed,
    });
    let proxy = Proxy::new(
        ty.clone(),
        code,
        1,
        Anchor::Owned(Allocation {
            base: code,
            size: 1,
            release: Release::Trampoline(trampoline),
            bridge: state.weak_self.clone(),
        }),
    );
    state.tracker.register_base(&proxy);
    debug!(function = %ty.name(), code = %format_args!("{:#x}", code), "created trampoline");
    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::error::BridgeError;
    use crate::value::Value;
    use std::cell::Cell;
    use std::rc::Rc;

    extern "C" fn fold(n: i32, f: extern "C" fn(i32) -> i32) -> i32 {
        let mut acc = 0;
        for _ in 0..n {
            acc = f(acc);
        }
        acc
    }

    #[test]
    fn test_trampoline_is_callable_from_native_code() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let step = bridge.fun(&int, &[&int]).unwrap();
        let fold_ty = bridge.fun(&int, &[&int, &step]).unwrap();
        let fold = unsafe { bridge.function_at(fold as usize, &fold_ty) }.unwrap();

        let f = Value::callable(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1)));
        assert_eq!(fold.call(&[Value::Int(5), f]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_trampoline_called_directly() {
        let bridge = Bridge::new();
        let double = bridge.type_named("double").unwrap();
        let halve = bridge.fun(&double, &[&double]).unwrap();
        let tramp = halve
            .construct(&[Value::callable(|args| Ok(Value::Float(args[0].as_float().unwrap() / 2.0)))], &[])
            .unwrap();
        let tramp = tramp.as_proxy().unwrap();
        assert!(tramp.is_base());
        assert_eq!(tramp.call(&[Value::Float(3.0)]).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_callback_error_is_reraised() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let step = bridge.fun(&int, &[&int]).unwrap();
        let fold_ty = bridge.fun(&int, &[&int, &step]).unwrap();
        let fold = unsafe { bridge.function_at(fold as usize, &fold_ty) }.unwrap();

        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let f = Value::callable(move |_| {
            seen.set(seen.get() + 1);
            Err(BridgeError::Callback(format!("call {}", seen.get())))
        });
        let err = fold.call(&[Value::Int(3), f]).unwrap_err();
        assert_eq!(err.to_string(), "host callback failed: call 1");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_function_construct_rejects_other_values() {
        let bridge = Bridge::new();
        let int = bridge.type_named("int").unwrap();
        let fun = bridge.fun(&int, &[]).unwrap();
        assert!(matches!(
            fun.construct(&[Value::Int(1)], &[]),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            fun.construct(&[], &[]),
            Err(BridgeError::InvalidArguments(_))
        ));
    }
}
