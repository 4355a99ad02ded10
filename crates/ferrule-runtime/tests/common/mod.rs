// Common test utilities for ferrule-runtime integration tests

#![allow(dead_code)]

use ferrule_runtime::{Bridge, Member, ProxyType, Value};
use std::rc::Rc;

pub use pretty_assertions::{assert_eq, assert_ne};

/// `struct point { int x; int y; }`
pub fn point(bridge: &Bridge) -> Rc<ProxyType> {
    let types = bridge.types();
    let int = types.lookup("int").unwrap();
    let ty = types.composite(
        "point",
        8,
        vec![Member::new("x", 0, int), Member::new("y", 4, int)],
    );
    bridge.proxy_type(ty).unwrap()
}

/// `struct pair { int hello; double world; }`
pub fn pair(bridge: &Bridge) -> Rc<ProxyType> {
    let types = bridge.types();
    let int = types.lookup("int").unwrap();
    let double = types.lookup("double").unwrap();
    let ty = types.composite(
        "pair",
        16,
        vec![Member::new("hello", 0, int), Member::new("world", 8, double)],
    );
    bridge.proxy_type(ty).unwrap()
}

/// `struct node { int value; struct node *next; }`
pub fn node(bridge: &Bridge) -> Rc<ProxyType> {
    let types = bridge.types();
    let int = types.lookup("int").unwrap();
    let ty = types.declare_composite("node", 16);
    let next = types.address_of(ty);
    types
        .define_composite(ty, vec![Member::new("value", 0, int), Member::new("next", 8, next)])
        .unwrap();
    bridge.proxy_type(ty).unwrap()
}

pub fn int(bridge: &Bridge) -> Rc<ProxyType> {
    bridge.type_named("int").unwrap()
}

pub fn double(bridge: &Bridge) -> Rc<ProxyType> {
    bridge.type_named("double").unwrap()
}

/// Construct and unwrap the resulting proxy
pub fn make(ty: &Rc<ProxyType>, args: &[Value]) -> ferrule_runtime::Proxy {
    ty.construct(args, &[]).unwrap().as_proxy().unwrap().clone()
}

pub fn ints(values: &[i128]) -> Value {
    Value::list(values.iter().map(|&n| Value::Int(n)).collect())
}
