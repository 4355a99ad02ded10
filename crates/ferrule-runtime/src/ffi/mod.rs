//! Native interop
//!
//! Everything that crosses into native code lives here:
//! - call plans: libffi descriptions of function signatures
//! - calls from the host into native functions
//! - trampolines: native entry points forwarding into host callables
//! - dynamic library loading
//!
//! # Safety
//!
//! Calls and trampolines trust the function descriptor. A signature that does
//! not match the native code it describes is undefined behavior, and so is
//! calling a trampoline from a thread other than the one that created it.
//! All unsafe code is isolated in this module and in the raw memory helpers.

pub(crate) mod callbacks;
pub(crate) mod caller;
pub mod loader;
pub(crate) mod plan;

pub use loader::{LibraryLoader, NativeLibrary, SymbolSource};
