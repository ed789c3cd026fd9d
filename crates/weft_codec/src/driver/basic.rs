use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::{Any, type_name};
use core::marker::PhantomData;
use core::time::Duration;
use std::sync::LazyLock;

use super::{CacheLevel, Driver, DriverRef, driver_id, expect_value};
use crate::codec::Codec;
use crate::de::{Deserializer, ReadTypeInfo};
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::portable::Portable;
use crate::resolve::{ContextKey, Resolver};
use crate::ser::Serializer;
use crate::types::{LocalType, NamedType, Shape, Ty};
use crate::wire::{Sink, Source, TypeTag};

// -----------------------------------------------------------------------------
// Primitive

/// A primitive with a fixed encoding.
trait Primitive: Portable {
    const KIND: BasicKind;

    fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError>;

    fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError>;

    fn to_num(&self) -> Option<Num> {
        None
    }

    fn from_num(num: Num) -> Result<Self, DecodeError> {
        Err(conversion(num, type_name::<Self>()))
    }
}

/// Intermediate of numeric conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Bool(bool),
    Int(i128),
    Float(f64),
}

fn conversion(num: Num, target: &'static str) -> DecodeError {
    let value = match num {
        Num::Bool(v) => v.to_string(),
        Num::Int(v) => v.to_string(),
        Num::Float(v) => v.to_string(),
    };
    DecodeError::Conversion { value, target }
}

/// Integral value of `num`, rounding floats half to even.
fn integral(num: Num, target: &'static str) -> Result<i128, DecodeError> {
    match num {
        Num::Bool(v) => Ok(v as i128),
        Num::Int(v) => Ok(v),
        Num::Float(v) => {
            let rounded = v.round_ties_even();
            if rounded.is_finite() && rounded >= i128::MIN as f64 && rounded < i128::MAX as f64 {
                Ok(rounded as i128)
            } else {
                Err(conversion(num, target))
            }
        }
    }
}

macro_rules! primitive_local {
    ($ty:ty, $named:ident) => {
        impl Portable for $ty {
            fn local() -> &'static LocalType {
                LocalType::of::<Self>(|| {
                    LocalType::new::<Self>(Ty::named(&$named), Shape::Basic(<$ty as Primitive>::KIND))
                })
            }
        }
    };
}

macro_rules! impl_signed {
    ($($ty:ty => $kind:ident, $named:ident;)*) => {$(
        pub static $named: NamedType = NamedType::new(None, stringify!($ty)).value();

        primitive_local!($ty, $named);

        impl Primitive for $ty {
            const KIND: BasicKind = BasicKind::$kind;

            fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
                sink.write_signed(*self as i64)
            }

            fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
                <$ty>::try_from(source.read_signed()?).map_err(|_| DecodeError::VarIntOverflow)
            }

            fn to_num(&self) -> Option<Num> {
                Some(Num::Int(*self as i128))
            }

            fn from_num(num: Num) -> Result<Self, DecodeError> {
                let value = integral(num, stringify!($ty))?;
                <$ty>::try_from(value).map_err(|_| conversion(num, stringify!($ty)))
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($ty:ty => $kind:ident, $named:ident;)*) => {$(
        pub static $named: NamedType = NamedType::new(None, stringify!($ty)).value();

        primitive_local!($ty, $named);

        impl Primitive for $ty {
            const KIND: BasicKind = BasicKind::$kind;

            fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
                sink.write_varint(*self as u64)
            }

            fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
                <$ty>::try_from(source.read_varint()?).map_err(|_| DecodeError::VarIntOverflow)
            }

            fn to_num(&self) -> Option<Num> {
                Some(Num::Int(*self as i128))
            }

            fn from_num(num: Num) -> Result<Self, DecodeError> {
                let value = integral(num, stringify!($ty))?;
                <$ty>::try_from(value).map_err(|_| conversion(num, stringify!($ty)))
            }
        }
    )*};
}

macro_rules! impl_float {
    ($($ty:ty => $kind:ident, $named:ident, $write:ident, $read:ident;)*) => {$(
        pub static $named: NamedType = NamedType::new(None, stringify!($ty)).value();

        primitive_local!($ty, $named);

        impl Primitive for $ty {
            const KIND: BasicKind = BasicKind::$kind;

            fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
                sink.$write(*self)
            }

            fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
                source.$read()
            }

            fn to_num(&self) -> Option<Num> {
                Some(Num::Float(*self as f64))
            }

            fn from_num(num: Num) -> Result<Self, DecodeError> {
                Ok(match num {
                    Num::Bool(v) => v as u8 as $ty,
                    Num::Int(v) => v as $ty,
                    Num::Float(v) => v as $ty,
                })
            }
        }
    )*};
}

impl_signed! {
    i8 => I8, I8_TYPE;
    i16 => I16, I16_TYPE;
    i32 => I32, I32_TYPE;
    i64 => I64, I64_TYPE;
}

impl_unsigned! {
    u8 => U8, U8_TYPE;
    u16 => U16, U16_TYPE;
    u32 => U32, U32_TYPE;
    u64 => U64, U64_TYPE;
}

impl_float! {
    f32 => F32, F32_TYPE, write_f32, read_f32;
    f64 => F64, F64_TYPE, write_f64, read_f64;
}

pub static BOOL_TYPE: NamedType = NamedType::new(None, "bool").value();
pub static CHAR_TYPE: NamedType = NamedType::new(None, "char").value();
pub static STRING_TYPE: NamedType = NamedType::new(None, "string").value();
pub static DURATION_TYPE: NamedType = NamedType::new(None, "duration").value();

primitive_local!(bool, BOOL_TYPE);
primitive_local!(char, CHAR_TYPE);
primitive_local!(String, STRING_TYPE);
primitive_local!(Duration, DURATION_TYPE);

impl Primitive for bool {
    const KIND: BasicKind = BasicKind::Bool;

    fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
        sink.write_bool(*self)
    }

    fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
        source.read_bool()
    }

    fn to_num(&self) -> Option<Num> {
        Some(Num::Bool(*self))
    }

    fn from_num(num: Num) -> Result<Self, DecodeError> {
        Ok(match num {
            Num::Bool(v) => v,
            Num::Int(v) => v != 0,
            Num::Float(v) => v != 0.0,
        })
    }
}

impl Primitive for char {
    const KIND: BasicKind = BasicKind::Char;

    fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
        sink.write_varint(*self as u64)
    }

    fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
        let code = source.read_u32_varint()?;
        char::from_u32(code).ok_or_else(|| DecodeError::Conversion {
            value: code.to_string(),
            target: "char",
        })
    }
}

impl Primitive for String {
    const KIND: BasicKind = BasicKind::String;

    fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
        sink.write_str(self)
    }

    fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
        source.read_str()
    }
}

impl Primitive for Duration {
    const KIND: BasicKind = BasicKind::Duration;

    fn encode(&self, sink: &mut Sink<'_>) -> Result<(), EncodeError> {
        sink.write_varint(self.as_secs())?;
        sink.write_varint(self.subsec_nanos() as u64)
    }

    fn decode(source: &mut Source<'_>) -> Result<Self, DecodeError> {
        let secs = source.read_varint()?;
        let nanos = source.read_u32_varint()?;
        if nanos >= 1_000_000_000 {
            return Err(DecodeError::Conversion {
                value: nanos.to_string(),
                target: "duration nanoseconds",
            });
        }
        Ok(Duration::new(secs, nanos))
    }
}

// -----------------------------------------------------------------------------
// BasicKind

/// The primitives with built-in drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
    String,
    Duration,
}

/// Expands `$body` with `$ty` bound to the Rust type of `$kind`.
macro_rules! with_primitive {
    ($kind:expr, $ty:ident => $body:expr) => {
        match $kind {
            BasicKind::Bool => { type $ty = bool; $body }
            BasicKind::I8 => { type $ty = i8; $body }
            BasicKind::U8 => { type $ty = u8; $body }
            BasicKind::I16 => { type $ty = i16; $body }
            BasicKind::U16 => { type $ty = u16; $body }
            BasicKind::I32 => { type $ty = i32; $body }
            BasicKind::U32 => { type $ty = u32; $body }
            BasicKind::I64 => { type $ty = i64; $body }
            BasicKind::U64 => { type $ty = u64; $body }
            BasicKind::F32 => { type $ty = f32; $body }
            BasicKind::F64 => { type $ty = f64; $body }
            BasicKind::Char => { type $ty = char; $body }
            BasicKind::String => { type $ty = String; $body }
            BasicKind::Duration => { type $ty = Duration; $body }
        }
    };
}

impl BasicKind {
    pub const ALL: [BasicKind; 14] = [
        Self::Bool,
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Char,
        Self::String,
        Self::Duration,
    ];

    /// The driver name written in descriptors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
            Self::String => "string",
            Self::Duration => "duration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Takes part in numeric conversions.
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Char | Self::String | Self::Duration)
    }

    pub const fn is_integral(self) -> bool {
        self.is_numeric() && !matches!(self, Self::Bool | Self::F32 | Self::F64)
    }

    pub fn local(self) -> &'static LocalType {
        with_primitive!(self, T => <T as Portable>::local())
    }

    /// The shared driver of this primitive.
    pub fn driver(self) -> DriverRef {
        static DRIVERS: LazyLock<Vec<DriverRef>> = LazyLock::new(|| {
            BasicKind::ALL
                .into_iter()
                .map(|kind| with_primitive!(kind, T => Arc::new(BasicDriver::<T>(PhantomData)) as DriverRef))
                .collect()
        });
        DRIVERS[self as usize].clone()
    }

    pub(crate) fn read_num(self, source: &mut Source<'_>) -> Result<Num, DecodeError> {
        with_primitive!(self, T => {
            let value = <T as Primitive>::decode(source)?;
            value.to_num().ok_or_else(|| DecodeError::Custom(alloc::format!("`{}` is not numeric", self.name())))
        })
    }

    pub(crate) fn write_num(self, sink: &mut Sink<'_>, num: Num) -> Result<(), EncodeError> {
        with_primitive!(self, T => {
            let value = <T as Primitive>::from_num(num).map_err(|error| EncodeError::Custom(error.to_string()))?;
            value.encode(sink)
        })
    }

    pub(crate) fn num_into_any(self, num: Num) -> Result<Box<dyn Any>, DecodeError> {
        with_primitive!(self, T => Ok(Box::new(<T as Primitive>::from_num(num)?) as Box<dyn Any>))
    }
}

// -----------------------------------------------------------------------------
// BasicDriver

/// Driver of one primitive.
pub(crate) struct BasicDriver<T>(PhantomData<fn() -> T>);

impl<T: Primitive> Driver for BasicDriver<T> {
    fn name(&self) -> Option<&str> {
        Some(T::KIND.name())
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        expect_value::<T>(self, value)?.encode(w.sink())
    }

    fn read(&self, r: &mut Deserializer<'_>, _: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        Ok(Box::new(T::decode(r.source())?))
    }
}

// -----------------------------------------------------------------------------
// ConvertDriver

/// Reads a numeric primitive written as another one.
///
/// Integers are range checked, floats are rounded half to even before being
/// narrowed to integers, booleans are 0 and 1.
pub struct ConvertDriver {
    from: BasicKind,
    to: BasicKind,
}

impl ConvertDriver {
    pub fn new(from: BasicKind, to: BasicKind) -> Self {
        Self { from, to }
    }
}

impl Driver for ConvertDriver {
    fn name(&self) -> Option<&str> {
        Some(self.to.name())
    }

    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Context
    }

    fn write(&self, _: &mut Serializer<'_>, _: &dyn Any) -> Result<(), EncodeError> {
        Err(EncodeError::Custom(alloc::format!(
            "conversion from `{}` to `{}` only reads",
            self.from.name(),
            self.to.name()
        )))
    }

    fn read(&self, r: &mut Deserializer<'_>, _: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let num = self.from.read_num(r.source())?;
        self.to.num_into_any(num)
    }
}

// -----------------------------------------------------------------------------
// BasicResolver

/// Resolves primitives, adapting numeric primitives written as another one.
pub struct BasicResolver;

/// The primitive a descriptor was written with; enums count as their underlying type.
pub(crate) fn written_kind(info: &ReadTypeInfo) -> Option<BasicKind> {
    let info = match info.tag() {
        TypeTag::Enum => info.element()?,
        _ => info,
    };
    BasicKind::from_name(info.driver_name()?)
}

impl Resolver for BasicResolver {
    fn resolve_write(&self, _: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        Ok(match local.shape() {
            Shape::Basic(kind) => Some(kind.driver()),
            _ => None,
        })
    }

    fn resolve_read(
        &self,
        cx: &Codec,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        let Shape::Basic(kind) = local.shape() else {
            return Ok(None);
        };
        let Some(written) = written_kind(info) else {
            return Ok(None);
        };
        if written == *kind {
            return Ok(Some(kind.driver()));
        }
        if !written.is_numeric() || !kind.is_numeric() {
            log::warn!("no conversion from `{}` to `{}`", written.name(), kind.name());
            return Ok(None);
        }
        let key = ContextKey::new(local, [driver_id(&written.driver())]);
        let driver = cx
            .context_cache()
            .get_or_insert(key, || Arc::new(ConvertDriver::new(written, *kind)));
        Ok(Some(driver))
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use core::time::Duration;

    use super::{BasicKind, Num, Primitive};
    use crate::error::DecodeError;
    use crate::{Codec, Portable};

    #[test]
    fn names_round_trip() {
        for kind in BasicKind::ALL {
            assert_eq!(BasicKind::from_name(kind.name()), Some(kind));
            assert!(matches!(kind.local().shape(), crate::types::Shape::Basic(k) if *k == kind));
        }
        assert_eq!(<i32 as Portable>::local().ty().to_string(), "i32");
    }

    #[test]
    fn conversions() {
        assert_eq!(i8::from_num(Num::Int(-128)).unwrap(), -128);
        assert!(matches!(u8::from_num(Num::Int(300)), Err(DecodeError::Conversion { .. })));
        assert_eq!(i32::from_num(Num::Float(2.5)).unwrap(), 2);
        assert_eq!(i32::from_num(Num::Float(3.5)).unwrap(), 4);
        assert!(i64::from_num(Num::Float(f64::NAN)).is_err());
        assert_eq!(f32::from_num(Num::Int(7)).unwrap(), 7.0);
        assert!(bool::from_num(Num::Int(2)).unwrap());
        assert_eq!(u16::from_num(Num::Bool(true)).unwrap(), 1);
    }

    #[test]
    fn primitives_round_trip() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&-5_i64).unwrap();
        assert_eq!(codec.from_bytes::<i64>(&bytes).unwrap(), -5);
        let bytes = codec.to_bytes(&'λ').unwrap();
        assert_eq!(codec.from_bytes::<char>(&bytes).unwrap(), 'λ');
        let value = Duration::new(3, 500);
        let bytes = codec.to_bytes(&value).unwrap();
        assert_eq!(codec.from_bytes::<Duration>(&bytes).unwrap(), value);
        let bytes = codec.to_bytes(&String::from("hi")).unwrap();
        assert_eq!(codec.from_bytes::<String>(&bytes).unwrap(), "hi");
    }

    #[test]
    fn numeric_adaptation() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&42_i32).unwrap();
        assert_eq!(codec.from_bytes::<i64>(&bytes).unwrap(), 42);
        assert_eq!(codec.from_bytes::<f64>(&bytes).unwrap(), 42.0);
        assert_eq!(codec.from_bytes::<u8>(&bytes).unwrap(), 42);

        let bytes = codec.to_bytes(&300_i32).unwrap();
        let err = codec.from_bytes::<u8>(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Conversion { target: "u8", .. }));

        let bytes = codec.to_bytes(&2.5_f64).unwrap();
        assert_eq!(codec.from_bytes::<i16>(&bytes).unwrap(), 2);

        let bytes = codec.to_bytes(&String::from("42")).unwrap();
        let err = codec.from_bytes::<i32>(&bytes).unwrap_err();
        assert!(err.is_unresolved());
    }
}
