// Proxy-type registry: canonical bundles and two-phase linking

mod common;

use common::{assert_eq, int, node, point};
use ferrule_runtime::{Bridge, BridgeError, Kind, Member, ProxyType, Value};
use rstest::rstest;
use std::rc::Rc;

fn bundle_of_kind(bridge: &Bridge, kind: Kind) -> Rc<ProxyType> {
    let int = int(bridge);
    match kind {
        Kind::Void => bridge.type_named("void").unwrap(),
        Kind::Base => int,
        Kind::Composite => point(bridge),
        Kind::Array => int.array(Some(4)).unwrap(),
        Kind::Address => int.ptr().unwrap(),
        Kind::Function => bridge.fun(&int, &[&int]).unwrap(),
        other => panic!("no fixture for {other:?}"),
    }
}

#[rstest]
#[case(Kind::Void)]
#[case(Kind::Base)]
#[case(Kind::Composite)]
#[case(Kind::Array)]
#[case(Kind::Address)]
#[case(Kind::Function)]
fn test_lookup_is_idempotent(#[case] kind: Kind) {
    let bridge = Bridge::new();
    let first = bundle_of_kind(&bridge, kind);
    let second = bridge.proxy_type(first.descriptor()).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(first.kind(), kind);
}

#[test]
fn test_derived_types_are_shared() {
    let bridge = Bridge::new();
    let int = int(&bridge);
    assert!(Rc::ptr_eq(&int.ptr().unwrap(), &int.ptr().unwrap()));
    assert!(Rc::ptr_eq(
        &int.array(None).unwrap(),
        &int.array(None).unwrap()
    ));
    assert!(!Rc::ptr_eq(
        &int.array(None).unwrap(),
        &int.array(Some(2)).unwrap()
    ));
}

#[test]
fn test_self_referential_type_links() {
    let bridge = Bridge::new();
    let node = node(&bridge);
    assert!(node.is_valid());
    assert_eq!(node.field_names(), vec!["value", "next"]);

    let next = node.field("next").unwrap();
    assert_eq!(next.offset, 8);
    let next_ty = bridge.proxy_type(next.ty.unwrap()).unwrap();
    assert_eq!(next_ty.name(), "__PTR_node");
    assert!(Rc::ptr_eq(&next_ty, &node.ptr().unwrap()));
}

#[test]
fn test_debug_format() {
    let bridge = Bridge::new();
    insta::assert_snapshot!(
        format!("{:?}", node(&bridge)),
        @r#"ProxyType { name: "node", kind: Composite, size: Some(16) }"#
    );
}

#[test]
fn test_unsupported_base_width() {
    let bridge = Bridge::new();
    let odd = bridge
        .types()
        .base("int24", ferrule_runtime::Encoding::Signed, 3);
    assert!(matches!(
        bridge.proxy_type(odd),
        Err(BridgeError::Unsupported { .. })
    ));
}

#[test]
fn test_supertype_chain() {
    let bridge = Bridge::new();
    let types = bridge.types();
    let point = point(&bridge);
    let int = types.lookup("int").unwrap();
    let point3 = types.composite(
        "point3",
        12,
        vec![Member::new("base", 0, point.descriptor()), Member::new("z", 8, int)],
    );
    let point3 = bridge.proxy_type(point3).unwrap();

    assert!(Rc::ptr_eq(&point3.supertype().unwrap(), &point));
    assert!(point3.is_subtype_of(&point));
    assert!(!point.is_subtype_of(&point3));
    assert_eq!(point3.field_names(), vec!["base", "z", "x", "y"]);

    let p = point3
        .construct(&[], &[("x".into(), Value::Int(4)), ("z".into(), Value::Int(6))])
        .unwrap();
    let p = p.as_proxy().unwrap();
    assert_eq!(p.field("x").unwrap(), Value::Int(4));
    assert!(p.is_instance_of(&point));
}
