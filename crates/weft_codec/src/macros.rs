//! Declaration macros binding user types to the codec.
//!
//! Each macro implements the binding trait and, with the `auto_register`
//! feature, submits the type to the [`TypeRegistry`](crate::types::TypeRegistry)
//! so that it can be read polymorphically before it is ever touched.

// -----------------------------------------------------------------------------
// Registration

#[cfg(feature = "auto_register")]
#[doc(hidden)]
#[macro_export]
macro_rules! __auto_register {
    ($ty:ty) => {
        // `submit!` registers through a link-time constructor.
        #[allow(unsafe_code)]
        const _: () = {
            fn __register() {
                let _ = <$ty as $crate::Portable>::local();
            }
            $crate::__macro_exports::inventory::submit! {
                $crate::__macro_exports::AutoRegistration::new(__register)
            }
        };
    };
}

#[cfg(not(feature = "auto_register"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __auto_register {
    ($ty:ty) => {};
}

// -----------------------------------------------------------------------------
// Classes

/// Implements [`Class`](crate::Class) with a convention driver.
///
/// The convention is one of:
///
/// - `simple`: the type implements [`Simple`](crate::Simple).
/// - `versioned`: the type implements [`Versioned`](crate::Versioned) and
///   writes the version of its named type.
/// - `layered`: the type implements [`Layer`](crate::Layer); destruction is
///   taken from the hierarchy.
/// - `custom(build)`: `build` returns the driver.
///
/// ```
/// use weft_codec::types::NamedType;
/// use weft_codec::{Deserializer, Serializer, Simple, impl_class};
/// use weft_codec::error::{DecodeError, EncodeError};
///
/// static NOTE: NamedType = NamedType::new(Some("docs"), "Note");
///
/// #[derive(Default)]
/// struct Note {
///     text: String,
/// }
///
/// impl Simple for Note {
///     fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
///         w.write_value(&self.text)
///     }
///
///     fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
///         self.text = r.read_value()?;
///         Ok(())
///     }
/// }
///
/// impl_class!(Note => NOTE, simple);
/// ```
#[macro_export]
macro_rules! impl_class {
    (@class $ty:ty => $named:path, $convention:ident, $build:expr) => {
        impl $crate::Class for $ty {
            const CONVENTION: $crate::types::Convention = $crate::types::Convention::$convention;

            fn named() -> &'static $crate::types::NamedType {
                &$named
            }

            fn build_driver() -> ::core::result::Result<$crate::driver::DriverRef, $crate::error::ConfigError> {
                ($build)()
            }
        }

        $crate::__auto_register!($crate::Gc<$ty>);
    };
    ($ty:ty => $named:path, simple) => {
        $crate::impl_class!(@class $ty => $named, Simple, $crate::driver::simple_object::<$ty>);
    };
    ($ty:ty => $named:path, versioned) => {
        $crate::impl_class!(@class $ty => $named, Versioned, $crate::driver::versioned_object::<$ty>);
    };
    ($ty:ty => $named:path, custom($build:expr)) => {
        $crate::impl_class!(@class $ty => $named, Custom, $build);
    };
    ($ty:ty => $named:path, layered) => {
        impl $crate::Class for $ty {
            const CONVENTION: $crate::types::Convention = $crate::types::Convention::Layered;

            fn named() -> &'static $crate::types::NamedType {
                &$named
            }

            fn build_driver() -> ::core::result::Result<$crate::driver::DriverRef, $crate::error::ConfigError> {
                $crate::layered_driver::<$ty>()
            }

            fn is_destroyed(&self) -> bool {
                <Self as $crate::Layer>::is_destroyed(self)
            }
        }

        $crate::__auto_register!($crate::Gc<$ty>);
    };
}

// -----------------------------------------------------------------------------
// Values

/// Implements [`Portable`](crate::Portable) for a value type written with the
/// `simple` or `versioned` convention. Values are copied, never tracked.
#[macro_export]
macro_rules! impl_value {
    (@value $ty:ty => $named:path, $convention:ident, $build:ident) => {
        impl $crate::Portable for $ty {
            fn local() -> &'static $crate::types::LocalType {
                $crate::types::LocalType::of::<Self>(|| {
                    let shape = $crate::types::ConventionShape::new(
                        $crate::types::Convention::$convention,
                        $crate::driver::$build::<$ty>,
                    );
                    $crate::types::LocalType::new::<Self>(
                        $crate::types::Ty::named(&$named),
                        $crate::types::Shape::Value(shape),
                    )
                })
            }
        }

        $crate::__auto_register!($ty);
    };
    ($ty:ty => $named:path, simple) => {
        $crate::impl_value!(@value $ty => $named, Simple, simple_value);
    };
    ($ty:ty => $named:path, versioned) => {
        $crate::impl_value!(@value $ty => $named, Versioned, versioned_value);
    };
}

// -----------------------------------------------------------------------------
// Enums

/// Implements [`Portable`](crate::Portable) for a fieldless `Copy` enum,
/// written as its discriminant in the integer type `repr`.
///
/// ```
/// use weft_codec::types::NamedType;
/// use weft_codec::{Codec, portable_enum};
///
/// static SUIT: NamedType = NamedType::new(Some("docs"), "Suit").enumeration();
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// #[repr(u8)]
/// enum Suit {
///     Hearts,
///     Spades = 7,
/// }
///
/// portable_enum!(Suit: u8 => SUIT { Hearts, Spades });
///
/// let codec = Codec::default();
/// let bytes = codec.to_bytes(&Suit::Spades).unwrap();
/// assert_eq!(codec.from_bytes::<Suit>(&bytes).unwrap(), Suit::Spades);
/// ```
#[macro_export]
macro_rules! portable_enum {
    ($ty:ty : $repr:ty => $named:path { $($variant:ident),* $(,)? }) => {
        impl $crate::Portable for $ty {
            fn local() -> &'static $crate::types::LocalType {
                $crate::types::LocalType::of::<Self>(|| {
                    let shape = $crate::driver::EnumShape {
                        underlying: <$repr as $crate::driver::Integral>::KIND,
                        to_i64: |value: &dyn $crate::__macro_exports::Any| {
                            value.downcast_ref::<$ty>().map(|value| *value as $repr as i64)
                        },
                        from_i64: |value: i64| {
                            $(
                                if value == <$ty>::$variant as $repr as i64 {
                                    let boxed: $crate::__macro_exports::Box<dyn $crate::__macro_exports::Any> =
                                        $crate::__macro_exports::Box::new(<$ty>::$variant);
                                    return ::core::option::Option::Some(boxed);
                                }
                            )*
                            ::core::option::Option::None
                        },
                    };
                    $crate::types::LocalType::new::<Self>(
                        $crate::types::Ty::named(&$named),
                        $crate::types::Shape::Enum(shape),
                    )
                })
            }
        }

        $crate::__auto_register!($ty);
    };
}

// -----------------------------------------------------------------------------
// Known objects

/// Registers a known object under `key` when the
/// [`KnownObjects`](crate::KnownObjects) table is first used.
///
/// Requires the `auto_register` feature; without it, register the object
/// with [`KnownObjects::register`](crate::KnownObjects::register).
#[cfg(feature = "auto_register")]
#[macro_export]
macro_rules! known_object {
    ($key:literal => $make:expr) => {
        #[allow(unsafe_code)]
        const _: () = {
            $crate::__macro_exports::inventory::submit! {
                $crate::__macro_exports::KnownRegistration::new($key, || {
                    let value: $crate::__macro_exports::Arc<dyn $crate::__macro_exports::Any + Send + Sync> =
                        $crate::__macro_exports::Arc::new($make);
                    value
                })
            }
        };
    };
}
