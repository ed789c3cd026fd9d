//! Drivers: the code that writes and reads the payload of one type.
//!
//! A driver is built once by a [resolver](crate::resolve) and shared through a
//! [`DriverRef`]. Value drivers implement [`Driver::write`] and [`Driver::read`];
//! object drivers implement [`Driver::write`], [`Driver::create`] and
//! [`Driver::fill`] so that an instance exists, and can be referenced, before
//! its payload is read.

mod basic;
mod convention;
mod enums;
mod generic;

pub use basic::{BasicKind, BasicResolver, ConvertDriver};
pub(crate) use basic::written_kind;
pub use convention::{
    ConventionResolver, ObjectDriver, Simple, ValueDriver, Versioned, simple_object, simple_value,
    versioned_object, versioned_value,
};
pub use enums::{EnumDriver, EnumResolver, EnumShape, Integral};
pub use generic::{
    Composite, CompositeGroup, GenericResolver, KeyValue, MapDriver, NullableDriver, SeqDriver,
    Stack, TupleDriver,
};
pub(crate) use generic::{nullable_driver, register_definitions};

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use core::any::{Any, type_name};
use core::marker::PhantomData;

use bitflags::bitflags;

use crate::de::{Deserializer, ReadTypeInfo};
use crate::error::{DecodeError, EncodeError};
use crate::object::Obj;
use crate::portable::Portable;
use crate::ser::Serializer;

/// A shared driver.
pub type DriverRef = Arc<dyn Driver>;

// -----------------------------------------------------------------------------
// CacheLevel

/// How widely a driver may be reused.
///
/// Levels are ordered: a driver built from other drivers has the highest
/// level among its own and theirs, see [`combine`](Self::combine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheLevel {
    /// Depends on the local type only; shared by every codec in the process.
    SharedContext,
    /// Depends on the codec's resolvers; shared by that codec's sessions.
    Context,
    /// Depends on the written type being read; never reused.
    Never,
}

impl CacheLevel {
    #[inline]
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }
}

bitflags! {
    /// Capabilities of a driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DriverFlags: u8 {
        /// Writes and fills instances of a reference type.
        const OBJECT = 1 << 0;
        /// Past the depth ceiling the payload may be written later.
        const DEFERRABLE = 1 << 1;
    }
}

// -----------------------------------------------------------------------------
// Driver

pub trait Driver: Send + Sync + 'static {
    /// Written in descriptors; the reader selects a compatible driver by it.
    fn name(&self) -> Option<&str>;

    /// Version written in descriptors, [`NamedType::UNVERSIONED`] when untracked.
    ///
    /// [`NamedType::UNVERSIONED`]: crate::types::NamedType::UNVERSIONED
    fn version(&self) -> i32 {
        -1
    }

    fn cache_level(&self) -> CacheLevel {
        CacheLevel::SharedContext
    }

    fn flags(&self) -> DriverFlags {
        DriverFlags::empty()
    }

    /// Writes the payload of `value`. For object drivers `value` is the
    /// `RefCell` holding the instance.
    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError>;

    /// Reads a value payload.
    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let _ = r;
        Err(DecodeError::Custom(alloc::format!(
            "driver `{}` cannot read `{}` as a value",
            self.name().unwrap_or("?"),
            info
        )))
    }

    /// Allocates an empty instance.
    fn create(&self, info: &ReadTypeInfo) -> Result<Obj, DecodeError> {
        Err(DecodeError::Custom(alloc::format!(
            "driver `{}` cannot create `{}`",
            self.name().unwrap_or("?"),
            info
        )))
    }

    /// Reads the payload of an instance returned by [`create`](Self::create).
    fn fill(&self, r: &mut Deserializer<'_>, obj: &Obj, info: &ReadTypeInfo) -> Result<(), DecodeError> {
        let _ = (r, obj);
        Err(DecodeError::Custom(alloc::format!(
            "driver `{}` cannot fill `{}`",
            self.name().unwrap_or("?"),
            info
        )))
    }
}

/// Address of a shared driver, used to key caches by argument drivers.
#[inline]
pub(crate) fn driver_id(driver: &DriverRef) -> usize {
    Arc::as_ptr(driver).cast::<()>() as usize
}

/// Downcasts the value handed to [`Driver::write`].
pub fn expect_value<'a, T: 'static>(driver: &dyn Driver, value: &'a dyn Any) -> Result<&'a T, EncodeError> {
    value.downcast_ref::<T>().ok_or_else(|| EncodeError::UnexpectedValue {
        driver: driver.name().unwrap_or("?").to_string(),
        expected: type_name::<T>(),
    })
}

/// Unboxes the value produced by [`Driver::read`].
pub fn expect_read<T: 'static>(value: Box<dyn Any>) -> Result<T, DecodeError> {
    value.downcast::<T>().map(|value| *value).map_err(|_| DecodeError::TypeMismatch {
        expected: type_name::<T>().to_string(),
        found: "a value of another type".to_string(),
    })
}

/// Writes `item` with the driver resolved for its type.
#[inline]
pub fn write_item<T: 'static>(w: &mut Serializer<'_>, driver: &DriverRef, item: &T) -> Result<(), EncodeError> {
    driver.write(w, item)
}

/// Reads an item with the driver resolved for its type.
#[inline]
pub fn read_item<T: 'static>(
    r: &mut Deserializer<'_>,
    driver: &DriverRef,
    info: &ReadTypeInfo,
) -> Result<T, DecodeError> {
    expect_read(driver.read(r, info)?)
}

// -----------------------------------------------------------------------------
// SlotDriver

/// Driver of reference positions: writes through the object path, which handles
/// null, identity, known objects and polymorphism, then converts what was read.
pub struct SlotDriver<T>(PhantomData<fn() -> T>);

impl<T: Portable> Driver for SlotDriver<T> {
    fn name(&self) -> Option<&str> {
        None
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let value = expect_value::<T>(self, value)?;
        w.write_view(value.view())?;
        Ok(())
    }

    fn read(&self, r: &mut Deserializer<'_>, _: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let read = r.read_reference(T::local().non_null())?;
        Ok(Box::new(T::from_read(read)?))
    }
}

/// Builds the [`SlotDriver`] of `T`.
pub fn slot_driver<T: Portable>() -> DriverRef {
    Arc::new(SlotDriver::<T>(PhantomData))
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::CacheLevel;

    #[test]
    fn levels_combine_to_the_widest_restriction() {
        assert_eq!(CacheLevel::SharedContext.combine(CacheLevel::Context), CacheLevel::Context);
        assert_eq!(CacheLevel::Never.combine(CacheLevel::SharedContext), CacheLevel::Never);
        assert_eq!(
            CacheLevel::SharedContext.combine(CacheLevel::SharedContext),
            CacheLevel::SharedContext
        );
    }
}
