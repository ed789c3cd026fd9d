//! Error types of the codec.
//!
//! - [`ConfigError`]: a type or hierarchy is declared in a way the codec cannot
//!   support. Raised while a driver is being built, never while data flows.
//! - [`EncodeError`]: writing a graph failed.
//! - [`DecodeError`]: reading a graph failed. Use [`DecodeError::is_malformed`] and
//!   [`DecodeError::is_unresolved`] to tell corrupt data from a missing migration.
//! - [`IdempotenceError`]: the write/read/write self-check failed.

use alloc::string::String;
use std::io;

use thiserror::Error;

// -----------------------------------------------------------------------------
// ConfigError

/// A programmer error in a type declaration, detected when its driver is built.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A level below a destroyable level does not declare itself destroyable.
    #[error("layered type `{leaf}`: level `{level}` must be destroyable because `{ancestor}` is")]
    BrokenDestroyableChain {
        leaf: String,
        level: String,
        ancestor: String,
    },
    /// A level's declared base type does not match the level it derives from.
    #[error("layered type `{leaf}`: level `{level}` declares base `{declared}` but derives from `{actual}`")]
    BrokenHierarchy {
        leaf: String,
        level: String,
        declared: String,
        actual: String,
    },
    /// The key is already bound to another known object.
    #[error("known object key `{0}` is already registered")]
    DuplicateKnownKey(String),
    /// The instance is already registered under another key.
    #[error("known object instance is already registered as `{0}`")]
    DuplicateKnownInstance(String),
    /// The type still has unbound generic parameters.
    #[error("type `{0}` has unbound generic parameters")]
    GenericParameter(String),
    /// Dictionary keys are always written as non-nullable.
    #[error("dictionary `{0}` has a nullable key type")]
    NullableKey(String),
}

// -----------------------------------------------------------------------------
// EncodeError

/// Failure while writing a graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// The byte sink failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A driver could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// No resolver produced a driver for the type.
    #[error("no driver for type `{ty}`")]
    NoDriver { ty: String },
    /// The type cannot be described on the wire.
    #[error("type `{ty}` cannot be written: {reason}")]
    Unsupported { ty: String, reason: &'static str },
    /// A framed payload is larger than the configured ceiling.
    #[error("payload of {len} bytes exceeds the {max} bytes ceiling")]
    Capacity { len: usize, max: usize },
    /// A driver received a value of another type than the one it was built for.
    #[error("driver `{driver}` expected a value of type `{expected}`")]
    UnexpectedValue {
        driver: String,
        expected: &'static str,
    },
    /// The known object handed to the writer is not registered.
    #[error("known object of type `{0}` is not registered")]
    UnknownKnownObject(&'static str),
    /// Error raised by user code.
    #[error("{0}")]
    Custom(String),
}

// -----------------------------------------------------------------------------
// DecodeError

/// Failure while reading a graph. A failed read never yields a partial graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The byte source failed.
    #[error(transparent)]
    Io(io::Error),
    /// The stream ended in the middle of a value.
    #[error("stream is truncated")]
    Truncated,
    /// The stream header names a format this reader does not know.
    #[error("unsupported stream format version {0}")]
    UnsupportedFormat(u8),
    /// Unknown value marker.
    #[error("invalid marker byte {0:#04x}")]
    InvalidMarker(u8),
    /// Unknown type descriptor tag.
    #[error("invalid type tag byte {0:#04x}")]
    InvalidTypeTag(u8),
    /// A boolean byte other than `0` or `1`.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// Type descriptors nest deeper than a reader accepts.
    #[error("type descriptors nest deeper than {0} levels")]
    TypeNestingTooDeep(u32),
    /// Back-reference to a type that was not read yet.
    #[error("type back-reference {0} is out of range")]
    InvalidTypeIndex(u32),
    /// Back-reference to an object that was not read yet.
    #[error("object back-reference {0} is out of range")]
    InvalidObjectIndex(u32),
    /// Back-reference to a shared string that was not read yet.
    #[error("shared string back-reference {0} is out of range")]
    InvalidSharedString(u32),
    /// A string payload is not UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    /// A variable-length integer does not fit its target.
    #[error("variable-length integer overflows")]
    VarIntOverflow,
    /// A framed payload announces more bytes than allowed.
    #[error("payload of {len} bytes exceeds the {max} bytes ceiling")]
    PayloadTooLarge { len: u64, max: usize },
    /// Debug sentinel mismatch: writer and reader disagree on the layout.
    #[error("stream desynchronized at {read_at} (writer was at {written_at})")]
    Desync {
        read_at: String,
        written_at: String,
    },
    /// The integral value does not name a variant of the enum.
    #[error("value {value} is not a variant of enum `{ty}`")]
    InvalidEnumValue { ty: String, value: i64 },
    /// No resolver could map the written type to the local one.
    #[error("no driver reads `{written}` as `{local}`")]
    NoDriver { written: String, local: String },
    /// The written type does not map to any local type.
    #[error("written type `{written}` has no local counterpart")]
    UnknownType { written: String },
    /// The data was written by a newer version of the type.
    #[error("`{ty}` was written with version {written}, this reader understands up to {supported}")]
    VersionTooNew {
        ty: String,
        written: i32,
        supported: i32,
    },
    /// The written hierarchy levels do not match the local ones.
    #[error("layered type `{ty}`: written levels [{written}] do not match local levels [{local}]")]
    HierarchyMismatch {
        ty: String,
        written: String,
        local: String,
    },
    /// The value read does not have the requested type.
    #[error("expected `{expected}`, found `{found}`")]
    TypeMismatch { expected: String, found: String },
    /// Null was read where a non-nullable value was requested.
    #[error("unexpected null for `{expected}`")]
    UnexpectedNull { expected: String },
    /// A numeric value does not fit the local type.
    #[error("value {value} cannot be converted to `{target}`")]
    Conversion { value: String, target: &'static str },
    /// The known object key is not registered in this process.
    #[error("known object `{0}` is not registered")]
    UnknownKnownObject(String),
    /// Back-reference to an instance that was read as a value type.
    #[error("object {0} was read as a value and cannot be referenced")]
    DetachedReference(u32),
    /// A deferred object cannot be read into a value type.
    #[error("deferred object of type `{ty}` cannot be read as a value")]
    DeferredValue { ty: String },
    /// A driver could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Error raised by user code.
    #[error("{0}")]
    Custom(String),
}

impl DecodeError {
    /// Returns `true` if the stream itself is corrupt or truncated.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Truncated
                | Self::UnsupportedFormat(_)
                | Self::InvalidMarker(_)
                | Self::InvalidTypeTag(_)
                | Self::InvalidBool(_)
                | Self::TypeNestingTooDeep(_)
                | Self::InvalidTypeIndex(_)
                | Self::InvalidObjectIndex(_)
                | Self::InvalidSharedString(_)
                | Self::InvalidUtf8
                | Self::VarIntOverflow
                | Self::PayloadTooLarge { .. }
                | Self::Desync { .. }
                | Self::InvalidEnumValue { .. }
        )
    }

    /// Returns `true` if a written type could not be mapped to a local type or driver.
    ///
    /// This is usually fixed by registering the local type or a migration hook.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::NoDriver { .. } | Self::UnknownType { .. })
    }
}

impl From<io::Error> for DecodeError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(error)
        }
    }
}

// -----------------------------------------------------------------------------
// IdempotenceError

/// Failure of [`Codec::check_idempotence`](crate::Codec::check_idempotence).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdempotenceError {
    #[error("first write failed")]
    Encode(#[source] EncodeError),
    #[error("reading the first write back failed")]
    Decode(#[source] DecodeError),
    #[error("writing the value read back failed")]
    Reencode(#[source] EncodeError),
    /// The second write differs from the first one.
    #[error("second write differs at byte {offset} ({first_len} vs {second_len} bytes)")]
    Mismatch {
        offset: usize,
        first_len: usize,
        second_len: usize,
    },
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::io;

    use super::DecodeError;

    #[test]
    fn eof_is_truncation() {
        let error = DecodeError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(error, DecodeError::Truncated));
        assert!(error.is_malformed());
        assert!(!error.is_unresolved());

        let error = DecodeError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!error.is_malformed());
    }

    #[test]
    fn classification() {
        let error = DecodeError::NoDriver {
            written: "i32".into(),
            local: "alloc::string::String".into(),
        };
        assert!(error.is_unresolved());
        assert!(!error.is_malformed());
        assert_eq!(
            error.to_string(),
            "no driver reads `i32` as `alloc::string::String`"
        );
    }
}
