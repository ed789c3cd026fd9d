//! Byte-level stream format.
//!
//! A stream starts with a two byte header (format version, flags) followed by
//! values. Every value that can be shared or null starts with a [`Marker`];
//! type descriptors start with a [`TypeTag`].

mod sink;
mod source;

pub use sink::Sink;
pub use source::{RewindableSource, Source};

use crate::error::DecodeError;
use crate::types::ClassKind;

/// Format version written in the stream header.
pub(crate) const FORMAT_VERSION: u8 = 1;

/// Header flag: the stream carries debug sentinels.
pub(crate) const FLAG_DEBUG: u8 = 0b0000_0001;

/// Deepest nesting of type descriptors a reader accepts.
pub(crate) const MAX_TYPE_NESTING: u32 = 64;

/// Magic number preceding every debug sentinel.
pub(crate) const SENTINEL: u32 = 0x5EA1_7E11;

// -----------------------------------------------------------------------------
// Marker

/// Leading byte of a value written through an object position.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Absent value.
    Null = 0,
    /// The canonical empty object.
    EmptyObject = 1,
    /// Type descriptor followed by the payload.
    ObjectData = 2,
    /// Index of an object written earlier in the session.
    ObjectRef = 3,
    /// Type descriptor only, the payload follows once the nesting unwinds.
    DeferredObject = 4,
    /// Key of a process-wide well-known object.
    KnownObject = 5,
    /// A type descriptor as the value itself.
    Type = 6,
}

impl Marker {
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0 => Self::Null,
            1 => Self::EmptyObject,
            2 => Self::ObjectData,
            3 => Self::ObjectRef,
            4 => Self::DeferredObject,
            5 => Self::KnownObject,
            6 => Self::Type,
            _ => return Err(DecodeError::InvalidMarker(byte)),
        })
    }
}

// -----------------------------------------------------------------------------
// TypeTag

/// Leading byte of a fresh type descriptor.
///
/// Named types use the upper-case letter of their [`ClassKind`]; the closed form
/// of a generic type uses the lower-case one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Nullable,
    Pointer,
    ByRef,
    Array,
    Enum,
    /// A generic definition with no arguments bound.
    Open,
    Plain(ClassKind),
    Closed(ClassKind),
}

impl TypeTag {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Nullable => b'N',
            Self::Pointer => b'P',
            Self::ByRef => b'R',
            Self::Array => b'A',
            Self::Enum => b'E',
            Self::Open => b'G',
            Self::Plain(kind) => kind.letter(),
            Self::Closed(kind) => kind.letter().to_ascii_lowercase(),
        }
    }

    pub const fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            b'N' => Self::Nullable,
            b'P' => Self::Pointer,
            b'R' => Self::ByRef,
            b'A' => Self::Array,
            b'E' => Self::Enum,
            b'G' => Self::Open,
            _ => match ClassKind::from_letter(byte.to_ascii_uppercase()) {
                Some(kind) if byte.is_ascii_uppercase() => Self::Plain(kind),
                Some(kind) => Self::Closed(kind),
                None => return Err(DecodeError::InvalidTypeTag(byte)),
            },
        })
    }

    /// The class kind of named descriptors.
    #[inline]
    pub const fn class_kind(self) -> Option<ClassKind> {
        match self {
            Self::Plain(kind) | Self::Closed(kind) => Some(kind),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Varints

/// Zig-zag mapping of signed integers onto unsigned ones.
#[inline]
pub(crate) const fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub(crate) const fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Marker, TypeTag, unzigzag, zigzag};
    use crate::types::ClassKind;

    #[test]
    fn tags() {
        for tag in [
            TypeTag::Nullable,
            TypeTag::Array,
            TypeTag::Enum,
            TypeTag::Open,
            TypeTag::Plain(ClassKind::Sealed),
            TypeTag::Closed(ClassKind::Value),
        ] {
            assert_eq!(TypeTag::from_byte(tag.to_byte()).unwrap(), tag);
        }
        assert_eq!(TypeTag::Closed(ClassKind::Class).to_byte(), b'c');
        assert!(TypeTag::from_byte(b'z').is_err());
    }

    #[test]
    fn markers() {
        assert_eq!(Marker::from_byte(3).unwrap(), Marker::ObjectRef);
        assert!(Marker::from_byte(7).unwrap_err().is_malformed());
    }

    #[test]
    fn zigzag_mapping() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(unzigzag(zigzag(i64::MIN)), i64::MIN);
        assert_eq!(unzigzag(zigzag(i64::MAX)), i64::MAX);
    }
}
