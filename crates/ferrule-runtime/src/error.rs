//! Error taxonomy for the foreign-type bridge
//!
//! Every failure surfaced by the bridge is a [`BridgeError`]. All of them are
//! recoverable by the caller; the library loading sweep additionally catches
//! per-symbol errors and skips the offending symbol.

use thiserror::Error;

/// Errors raised by registry lookups, proxy operations and native calls
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A descriptor kind, encoding or width has no codec
    #[error("unsupported foreign type '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    /// A write or construct received a value of an incompatible type
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Numeric encode target too narrow for the supplied value
    #[error("argument does not fit into a {bits} bit {} integer", signedness(.signed))]
    Overflow { bits: usize, signed: bool },

    /// Indexing beyond the inferred length
    #[error("index {index} out of range for length {length}")]
    OutOfBounds { index: usize, length: usize },

    /// Initializer sequence larger than the destination
    #[error("sequence given is too long to be stored at this address (only {capacity} items)")]
    SequenceTooLong { capacity: usize },

    /// More positional initializers than assignable fields
    #[error("too many positional arguments (there are only {fields} fields)")]
    TooManyArguments { fields: usize },

    /// Native call with the wrong number of arguments
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// Constructor or call received arguments it cannot interpret
    #[error("{0}")]
    InvalidArguments(String),

    /// The allocator could not provide a block
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// Composite copy-construction from its own storage
    #[error("trying to copy inside yourself")]
    SelfCopy,

    /// Keyword initializer not matching any field (or matching one twice)
    #[error("invalid keyword argument '{0}'")]
    InvalidKeyword(String),

    /// Field whose foreign datatype could not be resolved
    #[error("field '{0}': field's foreign datatype is not handled")]
    InvalidField(String),

    /// Attribute lookup on a type without such a field
    #[error("'{ty}' has no field '{field}'")]
    NoSuchField { ty: String, field: String },

    /// The type has no constructor (raw addresses, void)
    #[error("cannot construct objects of foreign type '{0}'")]
    NotConstructible(String),

    /// Assignment refused to avoid truncating or aliasing copies
    #[error("{0}")]
    ReadOnly(String),

    /// Call-plan setup failed for a function signature
    #[error("cannot set up call to '{function}': {reason}")]
    CallSetup { function: String, reason: String },

    /// Error raised by a host callable invoked from native code
    #[error("host callback failed: {0}")]
    Callback(String),

    /// Native library could not be found in any search path
    #[error("library not found: {0}")]
    LibraryNotFound(String),

    /// Native library could not be opened
    #[error("loading of native shared library '{library}' failed: {reason}")]
    LoadFailed { library: String, reason: String },

    /// Symbol lookup failed
    #[error("symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    /// Inconsistent or incomplete type descriptor
    #[error("invalid type descriptor: {0}")]
    Descriptor(String),

    /// Malformed type manifest
    #[error("invalid type manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The owning bridge has been dropped
    #[error("the bridge session owning this object has been closed")]
    SessionClosed,
}

fn signedness(signed: &bool) -> &'static str {
    if *signed {
        "signed"
    } else {
        "unsigned"
    }
}

impl BridgeError {
    pub(crate) fn unsupported(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Unsupported {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_message_names_width_and_signedness() {
        let err = BridgeError::Overflow {
            bits: 8,
            signed: false,
        };
        assert_eq!(
            err.to_string(),
            "argument does not fit into a 8 bit unsigned integer"
        );

        let err = BridgeError::Overflow {
            bits: 32,
            signed: true,
        };
        assert_eq!(
            err.to_string(),
            "argument does not fit into a 32 bit signed integer"
        );
    }

    #[test]
    fn test_mismatch_names_both_types() {
        let err = BridgeError::mismatch("reference to object of type node", "int");
        assert_eq!(
            err.to_string(),
            "expected reference to object of type node, got int"
        );
    }

    #[test]
    fn test_json_errors_convert() {
        let err: BridgeError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, BridgeError::Manifest(_)));
    }
}
