use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use core::any::{Any, type_name};
use core::cell::RefCell;

use super::{CacheLevel, Driver, DriverFlags, DriverRef, expect_value};
use crate::codec::Codec;
use crate::de::{Deserializer, ReadTypeInfo};
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::object::{Class, Gc, Obj};
use crate::portable::Portable;
use crate::resolve::{Resolver, pure_cache};
use crate::ser::Serializer;
use crate::types::{Convention, LocalType, NamedType, Shape};

// -----------------------------------------------------------------------------
// Conventions

/// A type written as one unversioned payload.
pub trait Simple: 'static {
    fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError>;

    fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError>;
}

/// A type written as one payload tagged with the version of its [`NamedType`].
///
/// The reader receives the version the payload was written with, which is
/// never above its own.
pub trait Versioned: 'static {
    fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError>;

    fn read_data(&mut self, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError>;
}

const SIMPLE: &str = "Simple";
const VERSIONED: &str = "Versioned";

type WriteFn<T> = fn(&T, &mut Serializer<'_>) -> Result<(), EncodeError>;
type ReadFn<T> = fn(&mut T, &mut Deserializer<'_>, i32) -> Result<(), DecodeError>;

fn read_simple<T: Simple>(value: &mut T, r: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
    value.read_data(r)
}

fn read_versioned<T: Versioned>(value: &mut T, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError> {
    value.read_data(r, version)
}

fn version_of(local: &LocalType) -> i32 {
    local
        .ty()
        .named_type()
        .map_or(NamedType::UNVERSIONED, NamedType::version)
}

// -----------------------------------------------------------------------------
// ValueDriver

/// Convention driver of a value type: reads into a default value.
pub struct ValueDriver<T> {
    name: &'static str,
    version: i32,
    write: WriteFn<T>,
    read: ReadFn<T>,
}

impl<T: Default + 'static> Driver for ValueDriver<T> {
    fn name(&self) -> Option<&str> {
        Some(self.name)
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        (self.write)(expect_value::<T>(self, value)?, w)
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let mut value = T::default();
        (self.read)(&mut value, r, info.version())?;
        Ok(Box::new(value))
    }
}

pub fn simple_value<T: Simple + Default + Portable>() -> Result<DriverRef, ConfigError> {
    Ok(Arc::new(ValueDriver::<T> {
        name: SIMPLE,
        version: NamedType::UNVERSIONED,
        write: T::write_data,
        read: read_simple::<T>,
    }))
}

pub fn versioned_value<T: Versioned + Default + Portable>() -> Result<DriverRef, ConfigError> {
    Ok(Arc::new(ValueDriver::<T> {
        name: VERSIONED,
        version: version_of(T::local()),
        write: T::write_data,
        read: read_versioned::<T>,
    }))
}

// -----------------------------------------------------------------------------
// ObjectDriver

/// Convention driver of a class: creates a default instance, then fills it.
pub struct ObjectDriver<T> {
    name: &'static str,
    version: i32,
    write: WriteFn<T>,
    read: ReadFn<T>,
}

impl<T: Class> ObjectDriver<T> {
    fn cell<'a>(&self, obj: &'a Obj) -> Result<&'a RefCell<T>, DecodeError> {
        obj.as_any()
            .downcast_ref::<RefCell<T>>()
            .ok_or_else(|| DecodeError::TypeMismatch {
                expected: type_name::<T>().into(),
                found: obj.local_type().ty().to_string(),
            })
    }
}

impl<T: Class> Driver for ObjectDriver<T> {
    fn name(&self) -> Option<&str> {
        Some(self.name)
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn flags(&self) -> DriverFlags {
        DriverFlags::OBJECT | DriverFlags::DEFERRABLE
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let cell = expect_value::<RefCell<T>>(self, value)?;
        let value = cell.try_borrow().map_err(|_| {
            EncodeError::Custom(alloc::format!("`{}` is mutably borrowed", type_name::<T>()))
        })?;
        (self.write)(&value, w)
    }

    fn create(&self, _: &ReadTypeInfo) -> Result<Obj, DecodeError> {
        Ok(Gc::new(T::default()).to_obj())
    }

    fn fill(&self, r: &mut Deserializer<'_>, obj: &Obj, info: &ReadTypeInfo) -> Result<(), DecodeError> {
        let cell = self.cell(obj)?;
        let mut value = cell.try_borrow_mut().map_err(|_| {
            DecodeError::Custom(alloc::format!("`{}` is borrowed while filled", type_name::<T>()))
        })?;
        (self.read)(&mut value, r, info.version())
    }
}

pub fn simple_object<T: Class + Simple>() -> Result<DriverRef, ConfigError> {
    Ok(Arc::new(ObjectDriver::<T> {
        name: SIMPLE,
        version: NamedType::UNVERSIONED,
        write: T::write_data,
        read: read_simple::<T>,
    }))
}

pub fn versioned_object<T: Class + Versioned>() -> Result<DriverRef, ConfigError> {
    Ok(Arc::new(ObjectDriver::<T> {
        name: VERSIONED,
        version: T::named().version(),
        write: T::write_data,
        read: read_versioned::<T>,
    }))
}

// -----------------------------------------------------------------------------
// Uncached

/// Wraps a driver whose selection depends on the written type, so that it is
/// neither cached nor combined into cached composites.
struct Uncached(DriverRef);

impl Driver for Uncached {
    fn name(&self) -> Option<&str> {
        self.0.name()
    }

    fn version(&self) -> i32 {
        self.0.version()
    }

    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Never
    }

    fn flags(&self) -> DriverFlags {
        self.0.flags()
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        self.0.write(w, value)
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        self.0.read(r, info)
    }

    fn create(&self, info: &ReadTypeInfo) -> Result<Obj, DecodeError> {
        self.0.create(info)
    }

    fn fill(&self, r: &mut Deserializer<'_>, obj: &Obj, info: &ReadTypeInfo) -> Result<(), DecodeError> {
        self.0.fill(r, obj, info)
    }
}

// -----------------------------------------------------------------------------
// ConventionResolver

/// Resolves the simple, versioned and custom conventions declared by user types.
///
/// A payload written by a simple driver can be read by a versioned one and the
/// other way around. Custom drivers only read what a driver of the same name wrote.
pub struct ConventionResolver;

fn names_match(written: Option<&str>, local: Option<&str>) -> bool {
    match (written, local) {
        (Some(written), Some(local)) if written == local => true,
        (Some(SIMPLE | VERSIONED), Some(SIMPLE | VERSIONED)) => true,
        _ => false,
    }
}

impl Resolver for ConventionResolver {
    fn resolve_write(&self, _: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        let (Shape::Value(shape) | Shape::Object(shape)) = local.shape() else {
            return Ok(None);
        };
        if shape.convention == Convention::Layered {
            return Ok(None);
        }
        pure_cache().get_or_try_insert(local, shape.build).map(Some)
    }

    fn resolve_read(
        &self,
        cx: &Codec,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        let Some(driver) = self.resolve_write(cx, local)? else {
            return Ok(None);
        };
        if !names_match(info.driver_name(), driver.name()) {
            log::debug!(
                "`{info}` was written by driver `{}`, `{local}` uses `{}`",
                info.driver_name().unwrap_or("?"),
                driver.name().unwrap_or("?")
            );
            return Ok(None);
        }
        if driver.version() >= 0 && info.version() > driver.version() {
            return Err(DecodeError::VersionTooNew {
                ty: local.ty().to_string(),
                written: info.version(),
                supported: driver.version(),
            });
        }
        if info.is_reference_kind() && matches!(local.shape(), Shape::Value(_)) {
            log::debug!("reading class `{info}` as value type `{local}`");
            return Ok(Some(Arc::new(Uncached(driver))));
        }
        Ok(Some(driver))
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::names_match;
    use crate::error::DecodeError;
    use crate::tests::{Gauge, GaugeV2, Peer};
    use crate::{Codec, Gc};

    #[test]
    fn driver_names() {
        assert!(names_match(Some("Simple"), Some("Versioned")));
        assert!(names_match(Some("Versioned"), Some("Simple")));
        assert!(names_match(Some("Custom"), Some("Custom")));
        assert!(!names_match(Some("Layered"), Some("Simple")));
        assert!(!names_match(None, Some("Simple")));
    }

    #[test]
    fn object_round_trip() {
        let codec = Codec::default();
        let peer = Gc::new(Peer::named("solo"));
        let bytes = codec.to_bytes(&peer).unwrap();
        let back = codec.from_bytes::<Gc<Peer>>(&bytes).unwrap();
        assert_eq!(back.borrow().name, "solo");
        assert!(back.borrow().other.is_none());
    }

    #[test]
    fn versions() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&Gauge { level: 7 }).unwrap();
        let back = codec.from_bytes::<GaugeV2>(&bytes).unwrap();
        assert_eq!(back, GaugeV2 { level: 7, unit: None });

        let bytes = codec
            .to_bytes(&GaugeV2 {
                level: 1,
                unit: Some("bar".into()),
            })
            .unwrap();
        let err = codec.from_bytes::<Gauge>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::VersionTooNew {
                written: 2,
                supported: 1,
                ..
            }
        ));
    }
}
