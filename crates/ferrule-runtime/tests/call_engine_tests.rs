// Native calls through libffi, in both directions

mod common;

use common::{assert_eq, double, int, ints, make, pair};
use ferrule_runtime::{Bridge, BridgeError, Member, Proxy, ProxyType, Value};
use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::rc::Rc;

#[repr(C)]
struct Pair {
    hello: i32,
    world: f64,
}

extern "C" fn make_pair(hello: i32, world: f64) -> Pair {
    Pair { hello, world }
}

extern "C" fn fold(n: i32, f: extern "C" fn(i32) -> i32) -> i32 {
    let mut acc = 0;
    for _ in 0..n {
        acc = f(acc);
    }
    acc
}

extern "C" fn sum(values: *const i32, n: i32) -> i32 {
    (0..n as usize).map(|i| unsafe { *values.add(i) }).sum()
}

extern "C" fn fill(out: *mut Pair, hello: i32) {
    unsafe {
        (*out).hello = hello;
        (*out).world = hello as f64 / 2.0;
    }
}

extern "C" fn identity(p: *mut Pair) -> *mut Pair {
    p
}

extern "C" fn length(s: *const c_char) -> i64 {
    unsafe { CStr::from_ptr(s).to_bytes().len() as i64 }
}

extern "C" fn scale(x: f32, factor: u8) -> f32 {
    x * factor as f32
}

#[repr(C)]
struct Holder {
    callback: extern "C" fn(i32) -> i32,
}

extern "C" fn apply(holder: *const Holder, x: i32) -> i32 {
    unsafe { ((*holder).callback)(x) }
}

#[repr(C)]
struct View {
    data: *const i32,
    len: i32,
}

extern "C" fn view_sum(view: View) -> i32 {
    sum(view.data, view.len)
}

fn function(bridge: &Bridge, addr: usize, ret: &ProxyType, args: &[&ProxyType]) -> Proxy {
    let ty = bridge.fun(ret, args).unwrap();
    unsafe { bridge.function_at(addr, &ty) }.unwrap()
}

// ===== Host to native =====

#[test]
fn test_struct_returned_by_value() {
    let bridge = Bridge::new();
    let (pair, int, double) = (pair(&bridge), int(&bridge), double(&bridge));
    let make = function(&bridge, make_pair as usize, &pair, &[&int, &double]);

    let result = make.call(&[Value::Int(3), Value::Float(2.5)]).unwrap();
    let result = result.as_proxy().unwrap();
    assert_eq!(result.field("hello").unwrap(), Value::Int(3));
    assert_eq!(result.field("world").unwrap(), Value::Float(2.5));
}

#[test]
fn test_list_for_pointer_parameter() {
    let bridge = Bridge::new();
    let int = int(&bridge);
    let sum = function(&bridge, sum as usize, &int, &[&int.ptr().unwrap(), &int]);
    assert_eq!(
        sum.call(&[ints(&[1, 2, 3, 4]), Value::Int(4)]).unwrap(),
        Value::Int(10)
    );

    let arr = make(&int.array(None).unwrap(), &[ints(&[5, 6])]);
    assert_eq!(
        sum.call(&[Value::Proxy(arr), Value::Int(2)]).unwrap(),
        Value::Int(11)
    );
    // temporaries built for the call are gone
    assert_eq!(bridge.live_bases(), 0);
}

#[test]
fn test_coerced_struct_argument_keeps_its_pointees_alive() {
    let bridge = Bridge::new();
    let types = bridge.types();
    let int = int(&bridge);
    let view = types.composite(
        "view",
        16,
        vec![
            Member::new("data", 0, int.ptr().unwrap().descriptor()),
            Member::new("len", 8, int.descriptor()),
        ],
    );
    let view = bridge.proxy_type(view).unwrap();
    let view_sum = function(&bridge, view_sum as usize, &int, &[&view]);

    let arg = Value::map([("data", ints(&[1, 2, 3])), ("len", Value::Int(3))]);
    assert_eq!(view_sum.call(&[arg]).unwrap(), Value::Int(6));
    let arg = Value::list(vec![ints(&[10, 20]), Value::Int(2)]);
    assert_eq!(view_sum.call(&[arg]).unwrap(), Value::Int(30));
    assert_eq!(bridge.live_bases(), 0);
}

#[test]
fn test_out_parameter_and_returned_pointer() {
    let bridge = Bridge::new();
    let pair = pair(&bridge);
    let pair_ptr = pair.ptr().unwrap();
    let void = bridge.type_named("void").unwrap();
    let fill = function(&bridge, fill as usize, &void, &[&pair_ptr, &int(&bridge)]);
    let identity = function(&bridge, identity as usize, &pair_ptr, &[&pair_ptr]);

    let p = make(&pair, &[]);
    assert_eq!(fill.call(&[Value::Proxy(p.clone()), Value::Int(5)]).unwrap(), Value::Null);
    assert_eq!(p.repr().unwrap(), "(pair){hello: 5, world: 2.5}");

    let same = identity.call(&[Value::Proxy(p.clone())]).unwrap();
    assert!(Proxy::ptr_eq(same.as_proxy().unwrap(), &p));
    assert_eq!(identity.call(&[Value::Null]).unwrap(), Value::Null);
}

#[test]
fn test_string_for_char_pointer() {
    let bridge = Bridge::new();
    let long = bridge.type_named("long long int").unwrap();
    let char_ptr = bridge.type_named("char").unwrap().ptr().unwrap();
    let length = function(&bridge, length as usize, &long, &[&char_ptr]);
    assert_eq!(length.call(&[Value::str("ferrule")]).unwrap(), Value::Int(7));
    assert_eq!(length.call(&[Value::bytes(b"")]).unwrap(), Value::Int(0));
}

#[test]
fn test_narrow_scalars() {
    let bridge = Bridge::new();
    let float = bridge.type_named("float").unwrap();
    let uchar = bridge.type_named("unsigned char").unwrap();
    let scale = function(&bridge, scale as usize, &float, &[&float, &uchar]);
    assert_eq!(
        scale.call(&[Value::Float(1.5), Value::Int(4)]).unwrap(),
        Value::Float(6.0)
    );
    let err = scale.call(&[Value::Float(1.5), Value::Int(300)]).unwrap_err();
    assert!(matches!(err, BridgeError::Overflow { bits: 8, signed: false }));
}

#[test]
fn test_argument_errors_name_the_position() {
    let bridge = Bridge::new();
    let (pair, int, double) = (pair(&bridge), int(&bridge), double(&bridge));
    let make = function(&bridge, make_pair as usize, &pair, &[&int, &double]);

    let err = make.call(&[Value::Int(1), Value::str("x")]).unwrap_err();
    assert_eq!(err.to_string(), "expected float for argument 2, got str");
    let err = make.call(&[]).unwrap_err();
    assert_eq!(err.to_string(), "expected 2 arguments, got 0");
}

// ===== Native to host =====

#[test]
fn test_fold_calls_back_into_the_host() {
    let bridge = Bridge::new();
    let int = int(&bridge);
    let step = bridge.fun(&int, &[&int]).unwrap();
    let fold = function(&bridge, fold as usize, &int, &[&int, &step]);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let f = Value::callable(move |args| {
        let x = args[0].as_int().unwrap_or(0);
        log.borrow_mut().push(x);
        Ok(Value::Int(x + 1))
    });
    assert_eq!(fold.call(&[Value::Int(5), f]).unwrap(), Value::Int(5));
    assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
    // the trampoline built for the call is released afterwards
    assert_eq!(bridge.live_bases(), 0);
}

#[test]
fn test_callback_type_error_is_reraised() {
    let bridge = Bridge::new();
    let int = int(&bridge);
    let step = bridge.fun(&int, &[&int]).unwrap();
    let fold = function(&bridge, fold as usize, &int, &[&int, &step]);

    let f = Value::callable(|_| Ok(Value::str("not a number")));
    let err = fold.call(&[Value::Int(2), f]).unwrap_err();
    assert_eq!(err.to_string(), "expected int, got str");

    // the session is usable again afterwards
    let g = Value::callable(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) + 2)));
    assert_eq!(fold.call(&[Value::Int(2), g]).unwrap(), Value::Int(4));
}

#[test]
fn test_callback_panic_is_contained() {
    let bridge = Bridge::new();
    let int = int(&bridge);
    let step = bridge.fun(&int, &[&int]).unwrap();
    let fold = function(&bridge, fold as usize, &int, &[&int, &step]);

    let f = Value::callable(|_| panic!("boom"));
    let err = fold.call(&[Value::Int(1), f]).unwrap_err();
    assert!(matches!(err, BridgeError::Callback(_)));
}

#[test]
fn test_closure_stored_in_a_struct_stays_alive() {
    let bridge = Bridge::new();
    let types = bridge.types();
    let int = int(&bridge);
    let step = bridge.fun(&int, &[&int]).unwrap();
    let holder = types.composite(
        "holder",
        8,
        vec![Member::new("callback", 0, step.ptr().unwrap().descriptor())],
    );
    let holder = bridge.proxy_type(holder).unwrap();
    let apply = function(&bridge, apply as usize, &int, &[&holder.ptr().unwrap(), &int]);

    let h = make(
        &holder,
        &[Value::callable(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 3)))],
    );
    assert_eq!(bridge.edge_count(), 1);
    assert_eq!(apply.call(&[Value::Proxy(h.clone()), Value::Int(7)]).unwrap(), Value::Int(21));

    // reading the field back yields the trampoline itself
    let callback = h.field("callback").unwrap();
    let callback = callback.as_proxy().unwrap();
    assert!(callback.is_base());
    assert_eq!(callback.call(&[Value::Int(2)]).unwrap(), Value::Int(6));

    h.set_field("callback", Value::Null).unwrap();
    assert_eq!(bridge.edge_count(), 0);
}
