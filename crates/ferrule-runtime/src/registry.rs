//! Proxy-type registry
//!
//! Maps every descriptor identity to exactly one [`ProxyType`] bundle. Bundles
//! are created in two phases:
//!
//! 1. **allocate**: the shell is inserted into the cache before anything it
//!    refers to is resolved, so a recursive lookup finds the shell;
//! 2. **link**: related descriptors (fields, elements, pointees, signature)
//!    are resolved and the [`Shape`] is fixed.
//!
//! Related types are referenced by [`TypeRef`], never by `Rc`, so the cache
//! holds no reference cycles even for self-referential structures.

use crate::bridge::BridgeState;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::plan::CallPlan;
use crate::scalar;
use crate::types::{Encoding, Kind, TypeRef};
use std::cell::OnceCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Member of a linked composite
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    /// `None` when the member's datatype is not handled
    pub ty: Option<TypeRef>,
}

/// Linked layout of a bundle
pub(crate) enum Shape {
    Void,
    Scalar {
        encoding: Encoding,
        size: usize,
    },
    Composite {
        fields: Vec<Field>,
        /// First member when it is a composite at offset zero
        supertype: Option<TypeRef>,
    },
    Address {
        pointee: TypeRef,
        stride: usize,
    },
    Array {
        element: TypeRef,
        length: Option<usize>,
        /// Pointer-to-element type, used for element references
        pointer: TypeRef,
        stride: usize,
    },
    Function {
        returns: TypeRef,
        args: Vec<TypeRef>,
        plan: OnceCell<Rc<CallPlan>>,
    },
    /// Linking failed; every operation reports the reason
    Invalid(String),
}

/// Foreign type object: descriptor, linked shape and operation table
pub struct ProxyType {
    pub(crate) descriptor: TypeRef,
    pub(crate) kind: Kind,
    pub(crate) name: Rc<str>,
    pub(crate) size: Option<usize>,
    pub(crate) shape: OnceCell<Shape>,
    pub(crate) bridge: Weak<BridgeState>,
}

impl ProxyType {
    pub(crate) fn state(&self) -> BridgeResult<Rc<BridgeState>> {
        self.bridge.upgrade().ok_or(BridgeError::SessionClosed)
    }

    /// Linked shape; a shell still being linked reports an error
    pub(crate) fn shape(&self) -> BridgeResult<&Shape> {
        match self.shape.get() {
            Some(Shape::Invalid(reason)) => Err(BridgeError::unsupported(self.name(), reason.clone())),
            Some(shape) => Ok(shape),
            None => Err(BridgeError::Descriptor(format!(
                "type '{}' is used before it is linked",
                self.name
            ))),
        }
    }

    pub fn descriptor(&self) -> TypeRef {
        self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Size in bytes, `None` when unknown
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.shape.get(), Some(Shape::Invalid(_)))
    }

    /// Scalars, addresses and void may be overwritten by plain assignment
    pub fn is_trivially_copiable(&self) -> bool {
        matches!(self.kind, Kind::Void | Kind::Base | Kind::Address)
    }

    /// Structural supertype (first composite member, or composite pointee)
    pub fn supertype(&self) -> Option<Rc<ProxyType>> {
        let state = self.state().ok()?;
        let sup = state.types.supertype_of(self.descriptor)?;
        state.proxy_type(sup).ok()
    }

    /// Whether this type is `other` or one of its structural subtypes
    pub fn is_subtype_of(&self, other: &ProxyType) -> bool {
        match self.state() {
            Ok(state) => state.types.is_subtype(self.descriptor, other.descriptor),
            Err(_) => self.descriptor == other.descriptor,
        }
    }

    /// Names of the valid fields of a composite, supertype fields included
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(state) = self.state() else {
            return names;
        };
        let mut next = Some(self.descriptor);
        for _ in 0..=state.types.len() {
            let Some(ty) = next else { break };
            let Ok(bundle) = state.proxy_type(ty) else {
                break;
            };
            let Some(Shape::Composite { fields, supertype }) = bundle.shape.get() else {
                break;
            };
            for field in fields.iter().filter(|f| f.ty.is_some()) {
                if !names.contains(&field.name) {
                    names.push(field.name.clone());
                }
            }
            next = *supertype;
        }
        names
    }

    /// Declared fields of a composite, without the supertype chain
    pub(crate) fn own_fields(&self) -> &[Field] {
        match self.shape.get() {
            Some(Shape::Composite { fields, .. }) => fields,
            _ => &[],
        }
    }

    /// Field lookup along the supertype chain; the outer field wins on clashes
    pub fn field(&self, name: &str) -> Option<Field> {
        let state = self.state().ok()?;
        let mut ty = self.descriptor;
        for _ in 0..=state.types.len() {
            let bundle = state.proxy_type(ty).ok()?;
            let Some(Shape::Composite { fields, supertype }) = bundle.shape.get() else {
                return None;
            };
            if let Some(field) = fields.iter().find(|f| f.name == name) {
                return Some(field.clone());
            }
            ty = (*supertype)?;
        }
        None
    }

    /// Bundle of the pointer-to-this type
    pub fn ptr(&self) -> BridgeResult<Rc<ProxyType>> {
        let state = self.state()?;
        let address = state.types.address_of(self.descriptor);
        state.proxy_type(address)
    }

    /// Bundle of an array of `length` elements of this type
    pub fn array(&self, length: Option<usize>) -> BridgeResult<Rc<ProxyType>> {
        let state = self.state()?;
        let array = state.types.array_of(self.descriptor, length);
        state.proxy_type(array)
    }

    /// Element type and stride of arrays and addresses
    pub(crate) fn element(&self) -> Option<(TypeRef, usize)> {
        match self.shape.get()? {
            Shape::Address { pointee, stride } => Some((*pointee, *stride)),
            Shape::Array {
                element, stride, ..
            } => Some((*element, *stride)),
            _ => None,
        }
    }
}

impl fmt::Debug for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

impl BridgeState {
    /// Canonical bundle for `ty`, created and linked on first use
    pub(crate) fn proxy_type(&self, ty: TypeRef) -> BridgeResult<Rc<ProxyType>> {
        if let Some(bundle) = self.registry.borrow().get(&ty) {
            return Ok(bundle.clone());
        }

        let name = self.types.name_of(ty);
        let kind = self.types.kind_of(ty);
        match kind {
            Kind::Enum | Kind::Subrange => {
                return Err(BridgeError::unsupported(
                    name.as_ref(),
                    "enumerations and subranges are not handled",
                ))
            }
            Kind::Unknown => {
                return Err(BridgeError::unsupported(name.as_ref(), "type has no description"))
            }
            Kind::Base => {
                if let Some((encoding, size)) = self.types.encoding_of(ty) {
                    if !scalar::supports(encoding, size) {
                        return Err(BridgeError::unsupported(
                            name.as_ref(),
                            format!("no codec for {:?} scalars of {} bytes", encoding, size),
                        ));
                    }
                }
            }
            _ => {}
        }

        // allocate
        let bundle = Rc::new(ProxyType {
            descriptor: ty,
            kind,
            name,
            size: self.types.size_of(ty),
            shape: OnceCell::new(),
            bridge: self.weak_self.clone(),
        });
        self.registry.borrow_mut().insert(ty, bundle.clone());
        debug!(ty = %bundle.name, ?kind, "created foreign type");

        // link
        let shape = self.link(ty, kind);
        if let Shape::Invalid(reason) = &shape {
            debug!(ty = %bundle.name, %reason, "foreign type is not usable");
        }
        let _ = bundle.shape.set(shape);
        Ok(bundle)
    }

    fn link(&self, ty: TypeRef, kind: Kind) -> Shape {
        let types = &self.types;
        match kind {
            Kind::Void => Shape::Void,
            Kind::Base => match types.encoding_of(ty) {
                Some((encoding, size)) => Shape::Scalar { encoding, size },
                None => Shape::Invalid("base type without encoding".to_string()),
            },
            Kind::Composite => {
                let fields: Vec<Field> = types
                    .members_of(ty)
                    .iter()
                    .map(|member| {
                        let resolved = match self.proxy_type(member.ty) {
                            Ok(bundle) if bundle.is_valid() => Some(member.ty),
                            Ok(_) => None,
                            Err(e) => {
                                debug!(field = %member.name, error = %e, "field excluded from shape");
                                None
                            }
                        };
                        Field {
                            name: member.name.clone(),
                            offset: member.offset,
                            ty: resolved,
                        }
                    })
                    .collect();
                let supertype = types.supertype_of(ty).filter(|sup| {
                    fields
                        .first()
                        .is_some_and(|f| f.ty == Some(*sup))
                });
                Shape::Composite { fields, supertype }
            }
            Kind::Address => {
                let Some(pointee) = types.element_type_of(ty) else {
                    return Shape::Invalid("address without pointee".to_string());
                };
                if let Err(e) = self.proxy_type(pointee) {
                    return Shape::Invalid(e.to_string());
                }
                Shape::Address {
                    pointee,
                    stride: types.size_of(pointee).unwrap_or(0),
                }
            }
            Kind::Array => {
                let Some(element) = types.element_type_of(ty) else {
                    return Shape::Invalid("array without element type".to_string());
                };
                if let Err(e) = self.proxy_type(element) {
                    return Shape::Invalid(e.to_string());
                }
                let Some(stride) = types.size_of(element) else {
                    return Shape::Invalid(format!(
                        "elements of type '{}' have no known size",
                        types.name_of(element)
                    ));
                };
                let pointer = types.address_of(element);
                Shape::Array {
                    element,
                    length: types.array_length(ty),
                    pointer,
                    stride,
                }
            }
            Kind::Function => {
                let slots = types.signature_of(ty);
                let mut returns = slots.iter().filter(|s| s.is_return).map(|s| s.ty);
                let ret = match (returns.next(), returns.next()) {
                    (Some(ret), None) => ret,
                    _ => types.void(),
                };
                let args = slots.iter().filter(|s| !s.is_return).map(|s| s.ty).collect();
                Shape::Function {
                    returns: ret,
                    args,
                    plan: OnceCell::new(),
                }
            }
            Kind::Enum | Kind::Subrange => {
                Shape::Invalid("enumerations and subranges are not handled".to_string())
            }
            Kind::Unknown => Shape::Invalid("type has no description".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::types::Member;
    use std::rc::Rc;

    #[test]
    fn test_bundles_are_canonical() {
        let bridge = Bridge::new();
        let int = bridge.types().lookup("int").unwrap();
        let a = bridge.proxy_type(int).unwrap();
        let b = bridge.proxy_type(int).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(Rc::ptr_eq(&a.ptr().unwrap(), &a.ptr().unwrap()));
    }

    #[test]
    fn test_enum_is_unsupported_at_top_level() {
        let bridge = Bridge::new();
        let color = bridge.types().enumeration("color", 4);
        let err = bridge.proxy_type(color).unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_unresolved_field_is_excluded() {
        let bridge = Bridge::new();
        let types = bridge.types();
        let int = types.lookup("int").unwrap();
        let color = types.enumeration("color", 4);
        let pixel = types.composite(
            "pixel",
            8,
            vec![Member::new("x", 0, int), Member::new("tint", 4, color)],
        );
        let bundle = bridge.proxy_type(pixel).unwrap();
        assert_eq!(bundle.field_names(), vec!["x".to_string()]);
        assert!(bundle.field("tint").unwrap().ty.is_none());
    }

    #[test]
    fn test_supertype_fields_are_visible() {
        let bridge = Bridge::new();
        let types = bridge.types();
        let int = types.lookup("int").unwrap();
        let base = types.composite("base", 4, vec![Member::new("a", 0, int)]);
        let derived = types.composite(
            "derived",
            8,
            vec![Member::new("super", 0, base), Member::new("b", 4, int)],
        );
        let bundle = bridge.proxy_type(derived).unwrap();
        assert_eq!(bundle.supertype().unwrap().name(), "base");
        assert_eq!(bundle.field("a").unwrap().offset, 0);
        assert_eq!(
            bundle.field_names(),
            vec!["super".to_string(), "b".to_string(), "a".to_string()]
        );
    }
}
