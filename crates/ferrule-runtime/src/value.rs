//! Host value representation
//!
//! The values exchanged between host code and native memory.
//! - Null, Bool, Int, Float, Complex: immediate values
//! - Bytes, Str: immutable, reference-counted
//! - List, Map: reference-counted sequences (Map keeps insertion order)
//! - Proxy: a reference to native memory (see [`crate::proxy`])
//! - Callable: a host function that native code may call through a trampoline
//! - Type: a proxy-type bundle, usable as a constructor

use crate::error::BridgeResult;
use crate::proxy::Proxy;
use crate::registry::ProxyType;
use std::fmt;
use std::rc::Rc;

/// Host function callable from native code
pub type HostFn = Rc<dyn Fn(&[Value]) -> BridgeResult<Value>>;

/// Host-side value
#[derive(Clone)]
pub enum Value {
    /// Absent value, also the null pointer
    Null,
    Bool(bool),
    /// Integer wide enough for every native integer width
    Int(i128),
    Float(f64),
    Complex { re: f64, im: f64 },
    Bytes(Rc<[u8]>),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    /// Ordered key/value pairs, used for keyword initialization
    Map(Rc<Vec<(String, Value)>>),
    /// Reference to native memory
    Proxy(Proxy),
    /// Host function
    Callable(HostFn),
    /// Foreign type object
    Type(Rc<ProxyType>),
}

impl Value {
    /// Create a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Create a bytes value
    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Rc::from(b.as_ref()))
    }

    /// Create a list value
    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Rc::new(values))
    }

    /// Create a map value from ordered pairs
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Rc::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Wrap a Rust closure as a host callable
    pub fn callable(f: impl Fn(&[Value]) -> BridgeResult<Value> + 'static) -> Self {
        Value::Callable(Rc::new(f))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Complex { .. } => "complex".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Map(_) => "map".to_string(),
            Value::Proxy(p) => p.type_name().to_string(),
            Value::Callable(_) => "callable".to_string(),
            Value::Type(_) => "type".to_string(),
        }
    }

    /// Truthiness used when encoding booleans
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Complex { re, im } => *re != 0.0 || *im != 0.0,
            Value::Bytes(b) => !b.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Proxy(_) | Value::Callable(_) | Value::Type(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Printable representation, recursing into proxies
    pub fn repr(&self) -> BridgeResult<String> {
        Ok(match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Complex { re, im } => {
                if *im < 0.0 {
                    format!("({:?}{:?}j)", re, im)
                } else {
                    format!("({:?}+{:?}j)", re, im)
                }
            }
            Value::Bytes(b) => format!("b\"{}\"", b.escape_ascii()),
            Value::Str(s) => format!("{:?}", s.as_ref()),
            Value::List(items) => {
                let parts = items
                    .iter()
                    .map(Value::repr)
                    .collect::<BridgeResult<Vec<_>>>()?;
                format!("[{}]", parts.join(", "))
            }
            Value::Map(pairs) => {
                let parts = pairs
                    .iter()
                    .map(|(k, v)| Ok(format!("{}: {}", k, v.repr()?)))
                    .collect::<BridgeResult<Vec<_>>>()?;
                format!("{{{}}}", parts.join(", "))
            }
            Value::Proxy(p) => p.repr()?,
            Value::Callable(_) => "<callable>".to_string(),
            Value::Type(t) => format!("<foreign type '{}'>", t.name()),
        })
    }
}

impl From<i128> for Value {
    fn from(i: i128) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i as i128)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i128)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Proxy> for Value {
    fn from(p: Proxy) -> Self {
        Value::Proxy(p)
    }
}

impl PartialEq for Value {
    /// Immediate values, strings and containers compare by content.
    /// Proxies, callables and types compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Complex { re: ar, im: ai }, Value::Complex { re: br, im: bi }) => {
                ar == br && ai == bi
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Proxy(a), Value::Proxy(b)) => Proxy::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr() {
            Ok(s) => write!(f, "{}", s),
            Err(e) => write!(f, "<unprintable {}: {}>", self.type_name(), e),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({:?})", x),
            Value::Complex { re, im } => write!(f, "Complex({:?}, {:?})", re, im),
            Value::Bytes(b) => write!(f, "Bytes({:?})", b),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::List(items) => write!(f, "List({:?})", items.as_slice()),
            Value::Map(pairs) => write!(f, "Map({:?})", pairs.as_slice()),
            Value::Proxy(p) => write!(f, "Proxy({} @ {:#x})", p.type_name(), p.address()),
            Value::Callable(_) => write!(f, "Callable(<closure>)"),
            Value::Type(t) => write!(f, "Type({})", t.name()),
        }
    }
}
