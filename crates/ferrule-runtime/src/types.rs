//! Native type descriptors
//!
//! [`TypeStore`] is the descriptor oracle consulted by every other component.
//! Descriptors are append-only: once created they live as long as the store,
//! and their identity ([`TypeRef`]) is what the proxy-type registry caches on.
//!
//! Derived descriptors (addresses, arrays, function signatures) are memoized so
//! that asking for `int*` twice yields the same identity. Their names follow the
//! native metadata convention:
//!
//! - `__PTR_<pointee>`
//! - `__ARR<n>_<element>` (`__ARR0_` when the length is unknown)
//! - `__FUN_FROM_<arg>$<arg>...__FUN_TO_<ret>`

use crate::error::{BridgeError, BridgeResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Identity of a descriptor inside a [`TypeStore`]; the default is `void`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypeRef(u32);

impl TypeRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef#{}", self.0)
    }
}

/// Kind tag of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Void,
    Base,
    Composite,
    Array,
    Address,
    Function,
    Enum,
    Subrange,
    /// Referenced by name but never described
    Unknown,
}

/// Encoding of a base scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Bool,
    Signed,
    Unsigned,
    Float,
    /// Two floats of half the width
    Complex,
    SignedChar,
    UnsignedChar,
}

impl Encoding {
    pub fn is_integral(self) -> bool {
        !matches!(self, Encoding::Float | Encoding::Complex)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Encoding::Signed | Encoding::SignedChar)
    }
}

/// Named member of a composite
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub offset: usize,
    pub ty: TypeRef,
}

impl Member {
    pub fn new(name: impl Into<String>, offset: usize, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            offset,
            ty,
        }
    }
}

/// Slot of a function signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub is_return: bool,
    pub ty: TypeRef,
}

#[derive(Debug, Clone)]
enum Descriptor {
    Void,
    Base {
        encoding: Encoding,
        size: usize,
    },
    Composite {
        size: usize,
        members: Rc<[Member]>,
        complete: bool,
    },
    Array {
        element: TypeRef,
        length: Option<usize>,
    },
    Address {
        pointee: TypeRef,
    },
    Function {
        slots: Rc<[Slot]>,
    },
    Enum {
        size: usize,
    },
    Subrange {
        base: TypeRef,
        size: usize,
    },
    Unknown,
}

#[derive(Debug)]
struct Entry {
    name: Rc<str>,
    desc: Descriptor,
}

/// Arena of native type descriptors
#[derive(Debug)]
pub struct TypeStore {
    entries: RefCell<Vec<Entry>>,
    names: RefCell<HashMap<String, TypeRef>>,
    addresses: RefCell<HashMap<TypeRef, TypeRef>>,
    arrays: RefCell<HashMap<(TypeRef, Option<usize>), TypeRef>>,
    functions: RefCell<HashMap<Vec<Slot>, TypeRef>>,
}

const POINTER_SIZE: usize = std::mem::size_of::<usize>();

impl TypeStore {
    /// Create a store holding only `void`
    pub fn new() -> Self {
        let store = Self {
            entries: RefCell::new(Vec::new()),
            names: RefCell::new(HashMap::new()),
            addresses: RefCell::new(HashMap::new()),
            arrays: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
        };
        store.push("void", Descriptor::Void);
        store
    }

    /// Create a store preloaded with the C base types of the host platform
    pub fn with_builtins() -> Self {
        use std::os::raw::{c_char, c_int, c_long, c_longlong, c_short};
        use std::mem::size_of;

        let store = Self::new();
        let char_encoding = if c_char::MIN == 0 {
            Encoding::UnsignedChar
        } else {
            Encoding::SignedChar
        };
        let long_double = if cfg!(any(target_arch = "x86", target_arch = "x86_64"))
            || cfg!(all(target_arch = "aarch64", target_os = "linux"))
        {
            16
        } else {
            8
        };

        let builtins: [(&str, Encoding, usize); 20] = [
            ("_Bool", Encoding::Bool, 1),
            ("char", char_encoding, 1),
            ("signed char", Encoding::SignedChar, 1),
            ("unsigned char", Encoding::UnsignedChar, 1),
            ("short int", Encoding::Signed, size_of::<c_short>()),
            ("short unsigned int", Encoding::Unsigned, size_of::<c_short>()),
            ("int", Encoding::Signed, size_of::<c_int>()),
            ("unsigned int", Encoding::Unsigned, size_of::<c_int>()),
            ("long int", Encoding::Signed, size_of::<c_long>()),
            ("long unsigned int", Encoding::Unsigned, size_of::<c_long>()),
            ("long long int", Encoding::Signed, size_of::<c_longlong>()),
            ("long long unsigned int", Encoding::Unsigned, size_of::<c_longlong>()),
            ("wchar_t", Encoding::SignedChar, 4),
            ("char32_t", Encoding::UnsignedChar, 4),
            ("float", Encoding::Float, 4),
            ("double", Encoding::Float, 8),
            ("long double", Encoding::Float, long_double),
            ("complex float", Encoding::Complex, 8),
            ("complex double", Encoding::Complex, 16),
            ("complex long double", Encoding::Complex, long_double * 2),
        ];
        for (name, encoding, size) in builtins {
            store.base(name, encoding, size);
        }
        store
    }

    fn push(&self, name: &str, desc: Descriptor) -> TypeRef {
        let ty = self.push_anonymous(name, desc);
        self.names
            .borrow_mut()
            .entry(name.to_string())
            .or_insert(ty);
        ty
    }

    /// Add an entry without making it reachable through `lookup`
    fn push_anonymous(&self, name: &str, desc: Descriptor) -> TypeRef {
        let mut entries = self.entries.borrow_mut();
        let ty = TypeRef(entries.len() as u32);
        entries.push(Entry {
            name: Rc::from(name),
            desc,
        });
        ty
    }

    fn desc(&self, ty: TypeRef) -> Descriptor {
        self.entries.borrow()[ty.index()].desc.clone()
    }

    /// Number of descriptors in the store
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All descriptors in creation order
    pub fn all(&self) -> Vec<TypeRef> {
        (0..self.len() as u32).map(TypeRef).collect()
    }

    pub fn void(&self) -> TypeRef {
        TypeRef(0)
    }

    /// Add a base scalar descriptor
    pub fn base(&self, name: &str, encoding: Encoding, size: usize) -> TypeRef {
        self.push(name, Descriptor::Base { encoding, size })
    }

    /// Add a complete composite descriptor
    pub fn composite(&self, name: &str, size: usize, members: Vec<Member>) -> TypeRef {
        self.push(
            name,
            Descriptor::Composite {
                size,
                members: members.into(),
                complete: true,
            },
        )
    }

    /// Add an incomplete composite, to be filled by [`TypeStore::define_composite`]
    ///
    /// This is how self-referential structures are described: the shell exists
    /// before the member list that points back to it.
    pub fn declare_composite(&self, name: &str, size: usize) -> TypeRef {
        self.push(
            name,
            Descriptor::Composite {
                size,
                members: Rc::from(Vec::new()),
                complete: false,
            },
        )
    }

    /// Complete a composite declared with [`TypeStore::declare_composite`]
    pub fn define_composite(&self, ty: TypeRef, members: Vec<Member>) -> BridgeResult<()> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .get_mut(ty.index())
            .ok_or_else(|| BridgeError::Descriptor(format!("{:?} is not in the store", ty)))?;
        match &mut entry.desc {
            Descriptor::Composite {
                members: slot,
                complete,
                ..
            } if !*complete => {
                *slot = members.into();
                *complete = true;
                Ok(())
            }
            Descriptor::Composite { .. } => Err(BridgeError::Descriptor(format!(
                "composite '{}' is already defined",
                entry.name
            ))),
            _ => Err(BridgeError::Descriptor(format!(
                "'{}' is not a composite",
                entry.name
            ))),
        }
    }

    /// Add an enumeration descriptor
    pub fn enumeration(&self, name: &str, size: usize) -> TypeRef {
        self.push(name, Descriptor::Enum { size })
    }

    /// Add a subrange descriptor
    pub fn subrange(&self, name: &str, base: TypeRef, size: usize) -> TypeRef {
        self.push(name, Descriptor::Subrange { base, size })
    }

    /// Placeholder for a type that is named but has no description
    ///
    /// The placeholder is not registered under `name`, so a later `lookup`
    /// still reports the name as missing.
    pub fn unknown(&self, name: &str) -> TypeRef {
        self.push_anonymous(name, Descriptor::Unknown)
    }

    /// Pointer to `pointee` (memoized)
    pub fn address_of(&self, pointee: TypeRef) -> TypeRef {
        if let Some(ty) = self.addresses.borrow().get(&pointee) {
            return *ty;
        }
        let name = format!("__PTR_{}", self.name_of(pointee));
        let ty = self.push(&name, Descriptor::Address { pointee });
        self.addresses.borrow_mut().insert(pointee, ty);
        ty
    }

    /// Array of `length` elements (memoized); `None` is an unknown length
    pub fn array_of(&self, element: TypeRef, length: Option<usize>) -> TypeRef {
        if let Some(ty) = self.arrays.borrow().get(&(element, length)) {
            return *ty;
        }
        let name = format!("__ARR{}_{}", length.unwrap_or(0), self.name_of(element));
        let ty = self.push(&name, Descriptor::Array { element, length });
        self.arrays.borrow_mut().insert((element, length), ty);
        ty
    }

    /// Function returning `ret` and taking `args` (memoized)
    pub fn function_of(&self, ret: TypeRef, args: &[TypeRef]) -> TypeRef {
        let mut slots = vec![Slot {
            is_return: true,
            ty: ret,
        }];
        slots.extend(args.iter().map(|&ty| Slot {
            is_return: false,
            ty,
        }));
        self.signature(slots)
    }

    /// Function with an arbitrary slot list (memoized)
    ///
    /// Signatures with zero or several return slots can be described, but no
    /// call plan can be built for them.
    pub fn signature(&self, slots: Vec<Slot>) -> TypeRef {
        if let Some(ty) = self.functions.borrow().get(&slots) {
            return *ty;
        }
        let name = {
            let args: Vec<String> = slots
                .iter()
                .filter(|s| !s.is_return)
                .map(|s| self.name_of(s.ty).to_string())
                .collect();
            let rets: Vec<String> = slots
                .iter()
                .filter(|s| s.is_return)
                .map(|s| self.name_of(s.ty).to_string())
                .collect();
            format!("__FUN_FROM_{}__FUN_TO_{}", args.join("$"), rets.join("$"))
        };
        let ty = self.push(
            &name,
            Descriptor::Function {
                slots: slots.clone().into(),
            },
        );
        self.functions.borrow_mut().insert(slots, ty);
        ty
    }

    /// Bind an additional name to an existing descriptor
    pub fn alias(&self, name: &str, ty: TypeRef) {
        self.names.borrow_mut().insert(name.to_string(), ty);
    }

    /// Look up a descriptor by name
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.names.borrow().get(name).copied()
    }

    pub fn kind_of(&self, ty: TypeRef) -> Kind {
        match self.desc(ty) {
            Descriptor::Void => Kind::Void,
            Descriptor::Base { .. } => Kind::Base,
            Descriptor::Composite { .. } => Kind::Composite,
            Descriptor::Array { .. } => Kind::Array,
            Descriptor::Address { .. } => Kind::Address,
            Descriptor::Function { .. } => Kind::Function,
            Descriptor::Enum { .. } => Kind::Enum,
            Descriptor::Subrange { .. } => Kind::Subrange,
            Descriptor::Unknown => Kind::Unknown,
        }
    }

    pub fn name_of(&self, ty: TypeRef) -> Rc<str> {
        self.entries.borrow()[ty.index()].name.clone()
    }

    /// Size in bytes, `None` when unknown (functions, arrays of unknown length)
    pub fn size_of(&self, ty: TypeRef) -> Option<usize> {
        match self.desc(ty) {
            Descriptor::Void => Some(0),
            Descriptor::Base { size, .. }
            | Descriptor::Composite { size, .. }
            | Descriptor::Enum { size }
            | Descriptor::Subrange { size, .. } => Some(size),
            Descriptor::Array { element, length } => {
                let n = length?;
                self.size_of(element)?.checked_mul(n)
            }
            Descriptor::Address { .. } => Some(POINTER_SIZE),
            Descriptor::Function { .. } | Descriptor::Unknown => None,
        }
    }

    /// Whether the descriptor has a definite element count
    pub fn has_known_length(&self, ty: TypeRef) -> bool {
        match self.desc(ty) {
            Descriptor::Array { length, .. } => length.is_some(),
            Descriptor::Function { .. } | Descriptor::Unknown => false,
            _ => true,
        }
    }

    /// Natural alignment in bytes
    pub fn align_of(&self, ty: TypeRef) -> usize {
        match self.desc(ty) {
            Descriptor::Void | Descriptor::Function { .. } | Descriptor::Unknown => 1,
            Descriptor::Base { encoding, size } => {
                let unit = if encoding == Encoding::Complex {
                    size / 2
                } else {
                    size
                };
                unit.clamp(1, 16)
            }
            Descriptor::Composite { members, .. } => members
                .iter()
                .map(|m| self.align_of(m.ty))
                .max()
                .unwrap_or(1),
            Descriptor::Array { element, .. } => self.align_of(element),
            Descriptor::Address { .. } => POINTER_SIZE,
            Descriptor::Enum { size } | Descriptor::Subrange { size, .. } => size.clamp(1, 16),
        }
    }

    /// Encoding and width of a base scalar
    pub fn encoding_of(&self, ty: TypeRef) -> Option<(Encoding, usize)> {
        match self.desc(ty) {
            Descriptor::Base { encoding, size } => Some((encoding, size)),
            _ => None,
        }
    }

    /// Ordered members of a composite (empty for other kinds)
    pub fn members_of(&self, ty: TypeRef) -> Rc<[Member]> {
        match self.desc(ty) {
            Descriptor::Composite { members, .. } => members,
            _ => Rc::from(Vec::new()),
        }
    }

    pub fn is_complete(&self, ty: TypeRef) -> bool {
        match self.desc(ty) {
            Descriptor::Composite { complete, .. } => complete,
            _ => true,
        }
    }

    /// Element type of an array, pointee of an address
    pub fn element_type_of(&self, ty: TypeRef) -> Option<TypeRef> {
        match self.desc(ty) {
            Descriptor::Array { element, .. } => Some(element),
            Descriptor::Address { pointee } => Some(pointee),
            Descriptor::Subrange { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Static length of an array
    pub fn array_length(&self, ty: TypeRef) -> Option<usize> {
        match self.desc(ty) {
            Descriptor::Array { length, .. } => length,
            _ => None,
        }
    }

    /// Ordered slots of a function signature (empty for other kinds)
    pub fn signature_of(&self, ty: TypeRef) -> Rc<[Slot]> {
        match self.desc(ty) {
            Descriptor::Function { slots } => slots,
            _ => Rc::from(Vec::new()),
        }
    }

    /// Structural supertype: the first member of a composite when it is itself
    /// a composite at offset zero, or the pointee of an address to a composite
    pub fn supertype_of(&self, ty: TypeRef) -> Option<TypeRef> {
        match self.desc(ty) {
            Descriptor::Composite { members, .. } => members
                .first()
                .filter(|m| m.offset == 0 && self.kind_of(m.ty) == Kind::Composite)
                .map(|m| m.ty),
            Descriptor::Address { pointee } if self.kind_of(pointee) == Kind::Composite => {
                Some(pointee)
            }
            _ => None,
        }
    }

    /// Whether `sub` is `sup` or reaches it through [`TypeStore::supertype_of`]
    pub fn is_subtype(&self, sub: TypeRef, sup: TypeRef) -> bool {
        let mut current = Some(sub);
        let mut steps = 0;
        while let Some(ty) = current {
            if ty == sup {
                return true;
            }
            steps += 1;
            if steps > self.len() {
                break;
            }
            current = self.supertype_of(ty);
        }
        false
    }

    /// Short human description used by listings
    pub fn describe(&self, ty: TypeRef) -> String {
        let size = self
            .size_of(ty)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        let kind = match self.kind_of(ty) {
            Kind::Void => "void",
            Kind::Base => "base",
            Kind::Composite => "composite",
            Kind::Array => "array",
            Kind::Address => "address",
            Kind::Function => "function",
            Kind::Enum => "enum",
            Kind::Subrange => "subrange",
            Kind::Unknown => "unknown",
        };
        format!("{} {} (size {})", kind, self.name_of(ty), size)
    }

    /// C-like spelling: `int *`, `double[4]`, `int (*)(int, char *)`
    pub fn spelling(&self, ty: TypeRef) -> String {
        match self.desc(ty) {
            Descriptor::Address { pointee } => match self.desc(pointee) {
                Descriptor::Function { .. } => self.signature_spelling(pointee, "(*)"),
                _ => format!("{} *", self.spelling(pointee)),
            },
            Descriptor::Array { element, length } => match length {
                Some(n) => format!("{}[{}]", self.spelling(element), n),
                None => format!("{}[]", self.spelling(element)),
            },
            Descriptor::Function { .. } => self.signature_spelling(ty, ""),
            _ => self.name_of(ty).to_string(),
        }
    }

    /// `RET NAME(ARGS)` for a function descriptor
    pub fn signature_spelling(&self, ty: TypeRef, name: &str) -> String {
        let slots = self.signature_of(ty);
        let ret = slots
            .iter()
            .find(|s| s.is_return)
            .map(|s| self.spelling(s.ty))
            .unwrap_or_else(|| "void".to_string());
        let args: Vec<String> = slots
            .iter()
            .filter(|s| !s.is_return)
            .map(|s| self.spelling(s.ty))
            .collect();
        format!("{} {}({})", ret, name, args.join(", "))
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}
