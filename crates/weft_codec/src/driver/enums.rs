use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;

use super::basic::Num;
use super::{BasicKind, CacheLevel, Driver, DriverRef, written_kind};
use crate::codec::Codec;
use crate::de::{Deserializer, ReadTypeInfo};
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::resolve::{Resolver, pure_cache};
use crate::ser::Serializer;
use crate::types::{LocalType, Shape};

// -----------------------------------------------------------------------------
// Integral

/// Primitives an enum can be represented by.
pub trait Integral: Copy + 'static {
    const KIND: BasicKind;
}

macro_rules! impl_integral {
    ($($ty:ty => $kind:ident),*) => {$(
        impl Integral for $ty {
            const KIND: BasicKind = BasicKind::$kind;
        }
    )*};
}

impl_integral!(i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32, u32 => U32, i64 => I64, u64 => U64);

// -----------------------------------------------------------------------------
// EnumShape

/// How an enum maps to its underlying integer. Built by [`portable_enum!`](crate::portable_enum).
pub struct EnumShape {
    pub underlying: BasicKind,
    pub to_i64: fn(&dyn Any) -> Option<i64>,
    pub from_i64: fn(i64) -> Option<Box<dyn Any>>,
}

// -----------------------------------------------------------------------------
// EnumDriver

/// Writes an enum as its underlying integer.
///
/// When the reader's underlying type differs from the written one, the value is
/// read as written and converted.
pub struct EnumDriver {
    local: &'static LocalType,
    written: BasicKind,
    level: CacheLevel,
}

impl EnumDriver {
    fn shape(&self) -> Result<&EnumShape, EncodeError> {
        match self.local.shape() {
            Shape::Enum(shape) => Ok(shape),
            _ => Err(EncodeError::Custom(alloc::format!("`{}` is not an enum", self.local))),
        }
    }
}

impl Driver for EnumDriver {
    fn name(&self) -> Option<&str> {
        Some("enum")
    }

    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let shape = self.shape()?;
        let Some(value) = (shape.to_i64)(value) else {
            return Err(EncodeError::UnexpectedValue {
                driver: "enum".into(),
                expected: self.local.type_name(),
            });
        };
        shape.underlying.write_num(w.sink(), Num::Int(value as i128))
    }

    fn read(&self, r: &mut Deserializer<'_>, _: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let shape = self.shape().map_err(|error| DecodeError::Custom(error.to_string()))?;
        let value = match self.written.read_num(r.source())? {
            Num::Int(value) => i64::try_from(value).ok(),
            Num::Bool(value) => Some(value as i64),
            Num::Float(_) => None,
        };
        value.and_then(shape.from_i64).ok_or_else(|| DecodeError::InvalidEnumValue {
            ty: self.local.ty().to_string(),
            value: value.unwrap_or_default(),
        })
    }
}

// -----------------------------------------------------------------------------
// EnumResolver

/// Resolves enums, adapting enums or integers written with another underlying type.
pub struct EnumResolver;

impl Resolver for EnumResolver {
    fn resolve_write(&self, _: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        let Shape::Enum(shape) = local.shape() else {
            return Ok(None);
        };
        let driver = pure_cache().get_or_try_insert(local, || {
            Ok(Arc::new(EnumDriver {
                local,
                written: shape.underlying,
                level: CacheLevel::SharedContext,
            }))
        })?;
        Ok(Some(driver))
    }

    fn resolve_read(
        &self,
        cx: &Codec,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        let Shape::Enum(shape) = local.shape() else {
            return Ok(None);
        };
        let Some(written) = written_kind(info).filter(|kind| kind.is_integral()) else {
            return Ok(None);
        };
        if written == shape.underlying {
            return Ok(self.resolve_write(cx, local)?);
        }
        log::debug!(
            "reading `{}` written as `{}` through an adapter",
            local,
            written.name()
        );
        Ok(Some(Arc::new(EnumDriver {
            local,
            written,
            level: CacheLevel::Never,
        })))
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use crate::Codec;
    use crate::error::DecodeError;
    use crate::tests::{Mood, MoodWide};

    #[test]
    fn round_trip() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&Mood::Cheerful).unwrap();
        assert_eq!(codec.from_bytes::<Mood>(&bytes).unwrap(), Mood::Cheerful);
        codec.check_idempotence(&vec![Mood::Calm, Mood::Grumpy]).unwrap();
    }

    #[test]
    fn underlying_type_adapts() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&Mood::Grumpy).unwrap();
        assert_eq!(codec.from_bytes::<MoodWide>(&bytes).unwrap(), MoodWide::Grumpy);

        let bytes = codec.to_bytes(&MoodWide::Elated).unwrap();
        let err = codec.from_bytes::<Mood>(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEnumValue { value: 300, .. }));
    }

    #[test]
    fn integers_read_as_enums() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&2_i32).unwrap();
        assert_eq!(codec.from_bytes::<Mood>(&bytes).unwrap(), Mood::Grumpy);
        let bytes = codec.to_bytes(&9_i32).unwrap();
        let err = codec.from_bytes::<Mood>(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEnumValue { value: 9, .. }));
        assert!(err.is_malformed());
    }
}
