use alloc::boxed::Box;
use core::any::type_name;
use core::fmt;
use std::sync::OnceLock;

use super::{Ty, TypeRegistry};
use crate::driver::{BasicKind, Composite, DriverRef, EnumShape};
use crate::error::ConfigError;

// -----------------------------------------------------------------------------
// Shape

/// How a local type is serialized, which selects the resolver that handles it.
pub enum Shape {
    /// A primitive with a built-in driver.
    Basic(BasicKind),
    Enum(EnumShape),
    /// A built-in collection or tuple, synthesized from its argument drivers.
    Composite(CompositeShape),
    Nullable(NullableShape),
    /// A value type with a convention driver.
    Value(ConventionShape),
    /// A reference type with a convention driver.
    Object(ConventionShape),
    /// The universal root: any object, written polymorphically.
    Root,
    /// A handle to a process-wide well-known object.
    Known,
    /// A type descriptor used as a value.
    Type,
}

pub struct CompositeShape {
    pub kind: Composite,
    pub args: Box<[&'static LocalType]>,
    /// Builds the driver from one driver per argument.
    pub build: fn(&[DriverRef]) -> DriverRef,
}

pub struct NullableShape {
    pub inner: &'static LocalType,
    /// `None` when the inner type is a reference type: those are nullable already.
    pub build: Option<fn(DriverRef) -> DriverRef>,
}

/// Serialization convention declared by a user type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convention {
    /// One unversioned payload.
    Simple,
    /// One payload whose reader receives the written version.
    Versioned,
    /// One payload per hierarchy level, root first.
    Layered,
    /// A hand-written driver.
    Custom,
}

impl Convention {
    /// Simple and versioned payloads can be read by each other's drivers.
    #[inline]
    pub fn is_compatible(self, other: Self) -> bool {
        self == other || matches!((self, other), (Self::Simple, Self::Versioned) | (Self::Versioned, Self::Simple))
    }
}

pub struct ConventionShape {
    pub convention: Convention,
    pub build: fn() -> Result<DriverRef, ConfigError>,
}

impl ConventionShape {
    #[inline]
    pub const fn new(convention: Convention, build: fn() -> Result<DriverRef, ConfigError>) -> Self {
        Self { convention, build }
    }
}

// -----------------------------------------------------------------------------
// LocalType

/// Everything the codec knows about one Rust type.
///
/// There is exactly one `LocalType` per Rust type, created on first use and
/// alive until the process ends; see [`Portable::local`](crate::Portable::local).
pub struct LocalType {
    ty: Ty,
    type_name: &'static str,
    shape: Shape,
    slot: Option<fn() -> DriverRef>,
    slot_driver: OnceLock<DriverRef>,
}

impl LocalType {
    /// Returns the `LocalType` of `T`, creating it with `init` on first use.
    ///
    /// `init` runs without any lock held and may be called by several threads
    /// at once; the first result stored wins.
    #[inline]
    pub fn of<T: 'static>(init: impl FnOnce() -> LocalType) -> &'static LocalType {
        TypeRegistry::global().local_or_insert::<T>(init)
    }

    pub fn new<T: 'static>(ty: Ty, shape: Shape) -> Self {
        Self {
            ty,
            type_name: type_name::<T>(),
            shape,
            slot: None,
            slot_driver: OnceLock::new(),
        }
    }

    /// Marks a reference type: positions of this type are written through the
    /// object path, with the driver built by `slot`.
    pub fn with_slot(mut self, slot: fn() -> DriverRef) -> Self {
        self.slot = Some(slot);
        self
    }

    #[inline]
    pub fn ty(&self) -> &Ty {
        &self.ty
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns `true` if values of this type go through the object path.
    #[inline]
    pub fn is_reference(&self) -> bool {
        self.slot.is_some()
    }

    /// The driver of reference positions of this type.
    pub fn slot_driver(&self) -> Option<DriverRef> {
        let make = self.slot?;
        Some(self.slot_driver.get_or_init(make).clone())
    }

    /// The argument types of a composite, or the inner type of a nullable.
    pub fn args(&self) -> &[&'static LocalType] {
        match &self.shape {
            Shape::Composite(shape) => &shape.args,
            Shape::Nullable(shape) => core::slice::from_ref(&shape.inner),
            _ => &[],
        }
    }

    /// The inner type of a nullable, `self` otherwise.
    pub fn non_null(&'static self) -> &'static LocalType {
        match &self.shape {
            Shape::Nullable(shape) => shape.inner,
            _ => self,
        }
    }

    #[inline]
    pub(crate) fn addr(&'static self) -> usize {
        core::ptr::from_ref(self) as usize
    }
}

impl fmt::Debug for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalType")
            .field("ty", &self.ty)
            .field("type_name", &self.type_name)
            .field("reference", &self.is_reference())
            .finish()
    }
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use super::{Convention, Shape};
    use crate::Portable;

    #[test]
    fn one_local_per_type() {
        let a = <Vec<String> as Portable>::local();
        let b = <Vec<String> as Portable>::local();
        assert!(core::ptr::eq(a, b));
        assert!(!a.is_reference());
        assert!(matches!(a.shape(), Shape::Composite(_)));
        assert!(core::ptr::eq(a.args()[0], <String as Portable>::local()));
    }

    #[test]
    fn nullable_wraps() {
        let local = <Option<u16> as Portable>::local();
        assert!(local.ty().is_nullable());
        assert!(core::ptr::eq(local.non_null(), <u16 as Portable>::local()));
    }

    #[test]
    fn conventions() {
        assert!(Convention::Simple.is_compatible(Convention::Versioned));
        assert!(!Convention::Layered.is_compatible(Convention::Simple));
        assert!(Convention::Custom.is_compatible(Convention::Custom));
    }
}
