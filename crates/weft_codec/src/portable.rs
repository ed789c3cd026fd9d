use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::any::{Any, type_name};

use crate::driver::{nullable_driver, slot_driver};
use crate::error::DecodeError;
use crate::object::Obj;
use crate::types::{LocalType, NamedType, NullableShape, Shape, Ty};

/// Type descriptor values are written under this name when they appear as a
/// generic argument.
pub static TYPE: NamedType = NamedType::new(Some("weft"), "Type").sealed();

// -----------------------------------------------------------------------------
// View & Read

/// What the serializer sees of a value in an object position.
pub enum View<'a> {
    Null,
    /// A value of a value type, written with the driver of `LocalType`.
    Value(&'a dyn Any, &'static LocalType),
    Object(Obj),
    /// A process-wide known object.
    Known(Arc<dyn Any + Send + Sync>, &'static str),
    Type(Ty),
}

/// What the deserializer produced for a value in an object position.
pub enum Read {
    Null,
    Value(Box<dyn Any>),
    Object(Obj),
    Known(Arc<dyn Any + Send + Sync>),
    Type(Ty),
}

impl Read {
    /// A short description of the variant for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Value(_) => "a value".to_string(),
            Self::Object(obj) => obj.local_type().ty().to_string(),
            Self::Known(_) => "a known object".to_string(),
            Self::Type(_) => "a type".to_string(),
        }
    }

    pub(crate) fn into_object<T>(self) -> Result<Obj, DecodeError> {
        match self {
            Self::Object(obj) => Ok(obj),
            Self::Null => Err(DecodeError::UnexpectedNull {
                expected: type_name::<T>().to_string(),
            }),
            other => Err(DecodeError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                found: other.describe(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// Portable

/// A type the codec can write and read.
///
/// Implemented for primitives, strings, the standard collections, tuples and
/// `Option`, and through the crate macros for user types.
pub trait Portable: Sized + 'static {
    /// The codec's description of this type.
    fn local() -> &'static LocalType;

    /// How this value is written in an object position.
    fn view(&self) -> View<'_> {
        View::Value(self, Self::local())
    }

    /// Rebuilds a value from what the deserializer read.
    fn from_read(read: Read) -> Result<Self, DecodeError> {
        match read {
            Read::Value(value) => value.downcast::<Self>().map(|value| *value).map_err(|_| {
                DecodeError::TypeMismatch {
                    expected: type_name::<Self>().to_string(),
                    found: "a value of another type".to_string(),
                }
            }),
            Read::Null => Err(DecodeError::UnexpectedNull {
                expected: type_name::<Self>().to_string(),
            }),
            other => Err(DecodeError::TypeMismatch {
                expected: type_name::<Self>().to_string(),
                found: other.describe(),
            }),
        }
    }
}

impl<T: Portable> Portable for Option<T> {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            let inner = T::local();
            if inner.is_reference() {
                // References are nullable already and keep their written type.
                let shape = NullableShape { inner, build: None };
                LocalType::new::<Self>(inner.ty().clone(), Shape::Nullable(shape))
                    .with_slot(slot_driver::<Self>)
            } else {
                let shape = NullableShape {
                    inner,
                    build: Some(nullable_driver::<T>),
                };
                LocalType::new::<Self>(Ty::nullable(inner.ty().clone()), Shape::Nullable(shape))
            }
        })
    }

    fn view(&self) -> View<'_> {
        match self {
            Some(value) => value.view(),
            None => View::Null,
        }
    }

    fn from_read(read: Read) -> Result<Self, DecodeError> {
        match read {
            Read::Null => Ok(None),
            read => T::from_read(read).map(Some),
        }
    }
}

impl Portable for Ty {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            LocalType::new::<Self>(Ty::named(&TYPE), Shape::Type).with_slot(slot_driver::<Self>)
        })
    }

    fn view(&self) -> View<'_> {
        View::Type(self.clone())
    }

    fn from_read(read: Read) -> Result<Self, DecodeError> {
        match read {
            Read::Type(ty) => Ok(ty),
            other => Err(DecodeError::TypeMismatch {
                expected: "a type".to_string(),
                found: other.describe(),
            }),
        }
    }
}
