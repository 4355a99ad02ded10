//! Ferrule runtime: a dynamic bridge between host values and native memory
//!
//! Native type descriptors (from a [`TypeStore`], usually filled from a JSON
//! [`Manifest`]) are turned into [`ProxyType`] objects on demand. A proxy type
//! constructs, reads and writes native objects of its kind; the resulting
//! [`Proxy`] values alias native memory and keep it alive.
//!
//! Functions are called through libffi, and host closures can be handed to
//! native code as function pointers (trampolines).
//!
//! # Example
//!
//! ```
//! use ferrule_runtime::{Bridge, Member, Value};
//!
//! let bridge = Bridge::new();
//! let types = bridge.types();
//! let int = types.lookup("int").unwrap();
//! let double = types.lookup("double").unwrap();
//! let pair = types.composite(
//!     "pair",
//!     16,
//!     vec![Member::new("hello", 0, int), Member::new("world", 8, double)],
//! );
//! let pair = bridge.proxy_type(pair).unwrap();
//!
//! let p = pair.construct(&[Value::Int(3)], &[("world".into(), Value::Float(2.5))]).unwrap();
//! assert_eq!(p.repr().unwrap(), "(pair){hello: 3, world: 2.5}");
//! ```

mod address;
pub mod bridge;
mod composite;
pub mod error;
pub mod ffi;
pub mod heap;
pub mod manifest;
mod memory;
pub mod namespace;
pub mod ops;
pub mod proxy;
pub mod registry;
pub mod scalar;
mod tracker;
pub mod types;
pub mod value;

pub use bridge::Bridge;
pub use error::{BridgeError, BridgeResult};
pub use ferrule_config::BridgeSettings;
pub use ffi::{LibraryLoader, NativeLibrary, SymbolSource};
pub use heap::{Extent, FreeFn, Lifetime};
pub use manifest::{Installation, Manifest};
pub use namespace::Namespace;
pub use ops::ReadMode;
pub use proxy::Proxy;
pub use registry::{Field, ProxyType};
pub use types::{Encoding, Kind, Member, Slot, TypeRef, TypeStore};
pub use value::{HostFn, Value};
