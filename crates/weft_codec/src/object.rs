//! Reference types: shared, mutable, identity-tracked instances.
//!
//! A reference type is a [`Class`] stored in a [`Gc`]. Positions that may hold any
//! object use [`Obj`], the type-erased handle. The codec tracks objects by
//! address: writing the same instance twice produces one payload and one
//! back-reference, and the reader rebuilds the same sharing and cycles.

use alloc::rc::Rc;
use alloc::string::ToString;
use core::any::Any;
use core::cell::{Ref, RefCell, RefMut};
use core::fmt;

use crate::driver::{DriverRef, slot_driver};
use crate::error::{ConfigError, DecodeError};
use crate::portable::{Portable, Read, View};
use crate::types::{Convention, ConventionShape, LocalType, NamedType, Shape, Ty};

/// The universal root every reference type derives from.
pub static OBJECT: NamedType = NamedType::new(Some("weft"), "Object");

// -----------------------------------------------------------------------------
// Class

/// A reference type.
///
/// Usually implemented with [`impl_class!`](crate::impl_class), which picks the
/// driver from a serialization convention.
pub trait Class: Default + 'static {
    const CONVENTION: Convention;

    /// The name this class is written under.
    fn named() -> &'static NamedType;

    /// Builds the driver writing and filling instances of this class.
    fn build_driver() -> Result<DriverRef, ConfigError>;

    /// A destroyed instance writes a reduced payload and is reported to the
    /// serializer's observer.
    fn is_destroyed(&self) -> bool {
        false
    }
}

// -----------------------------------------------------------------------------
// Object

/// Type-erased object behind an [`Obj`].
pub trait Object: Any {
    fn object_type(&self) -> &'static LocalType;

    fn is_destroyed(&self) -> bool;
}

impl<T: Class> Object for RefCell<T> {
    fn object_type(&self) -> &'static LocalType {
        <Gc<T> as Portable>::local()
    }

    fn is_destroyed(&self) -> bool {
        // An instance being filled is mutably borrowed and not destroyed yet.
        self.try_borrow().is_ok_and(|value| value.is_destroyed())
    }
}

/// The canonical empty object. It has no payload and no fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Root;

impl Object for RefCell<Root> {
    fn object_type(&self) -> &'static LocalType {
        <Obj as Portable>::local()
    }

    fn is_destroyed(&self) -> bool {
        false
    }
}

// -----------------------------------------------------------------------------
// Gc

/// A shared, mutable instance of a class.
pub struct Gc<T>(Rc<RefCell<T>>);

impl<T: Class> Gc<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// # Panics
    ///
    /// Panics if the instance is mutably borrowed.
    #[inline]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the instance is borrowed.
    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn to_obj(&self) -> Obj {
        Obj(self.0.clone())
    }

    /// Returns the value if this is the only handle to it.
    pub fn try_unwrap(self) -> Result<T, Self> {
        Rc::try_unwrap(self.0).map(RefCell::into_inner).map_err(Self)
    }
}

impl<T> Clone for Gc<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Class> Default for Gc<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("Gc").field(&*value).finish(),
            Err(_) => f.write_str("Gc(<borrowed>)"),
        }
    }
}

impl<T: Class> From<Gc<T>> for Obj {
    fn from(value: Gc<T>) -> Self {
        Obj(value.0)
    }
}

impl<T: Class> Portable for Gc<T> {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            let shape = ConventionShape::new(T::CONVENTION, T::build_driver);
            LocalType::new::<Self>(Ty::named(T::named()), Shape::Object(shape))
                .with_slot(slot_driver::<Self>)
        })
    }

    fn view(&self) -> View<'_> {
        View::Object(self.to_obj())
    }

    fn from_read(read: Read) -> Result<Self, DecodeError> {
        let obj = read.into_object::<Self>()?;
        obj.downcast::<T>().ok_or_else(|| DecodeError::TypeMismatch {
            expected: T::named().full_name(),
            found: obj.local_type().ty().to_string(),
        })
    }
}

// -----------------------------------------------------------------------------
// Obj

/// A handle to any object. Equality of handles is identity of instances.
#[derive(Clone)]
pub struct Obj(Rc<dyn Object>);

impl Obj {
    /// A new canonical empty object.
    pub fn root() -> Self {
        Self(Rc::new(RefCell::new(Root)))
    }

    pub fn new<T: Class>(value: T) -> Self {
        Gc::new(value).into()
    }

    #[inline]
    pub fn local_type(&self) -> &'static LocalType {
        self.0.object_type()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.0.is_destroyed()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        matches!(self.local_type().shape(), Shape::Root)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Obj) -> bool {
        self.addr() == other.addr()
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    /// The `RefCell` holding the instance.
    #[inline]
    pub fn as_any(&self) -> &dyn Any {
        let object: &dyn Object = &*self.0;
        object
    }

    #[inline]
    pub fn is<T: Class>(&self) -> bool {
        self.as_any().is::<RefCell<T>>()
    }

    pub fn downcast<T: Class>(&self) -> Option<Gc<T>> {
        let any: Rc<dyn Any> = self.0.clone();
        any.downcast::<RefCell<T>>().ok().map(Gc)
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Obj {}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({} @ {:#x})", self.local_type().ty(), self.addr())
    }
}

impl Portable for Obj {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            LocalType::new::<Self>(Ty::named(&OBJECT), Shape::Root).with_slot(slot_driver::<Self>)
        })
    }

    fn view(&self) -> View<'_> {
        View::Object(self.clone())
    }

    fn from_read(read: Read) -> Result<Self, DecodeError> {
        read.into_object::<Self>()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Gc, Obj};
    use crate::tests::Peer;

    #[test]
    fn identity() {
        let peer = Gc::new(Peer::named("a"));
        let obj = peer.to_obj();
        assert!(obj.ptr_eq(&peer.clone().into()));
        assert!(!obj.ptr_eq(&Obj::new(Peer::named("a"))));
        assert!(obj.is::<Peer>());
        assert!(obj.downcast::<Peer>().unwrap().ptr_eq(&peer));
        assert!(!obj.is_root());
        assert!(Obj::root().is_root());
    }

    #[test]
    fn unwrap_only_handle() {
        let peer = Gc::new(Peer::named("b"));
        let other = peer.clone();
        let peer = peer.try_unwrap().unwrap_err();
        drop(other);
        assert_eq!(peer.try_unwrap().unwrap().name, "b");
    }
}
