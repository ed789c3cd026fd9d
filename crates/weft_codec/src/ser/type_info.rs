use alloc::string::ToString;

use super::Serializer;
use crate::driver::DriverRef;
use crate::error::EncodeError;
use crate::object::OBJECT;
use crate::types::{LocalType, NamedType, Shape, Ty, TyKind};
use crate::wire::TypeTag;

fn unsupported(ty: &Ty, reason: &'static str) -> EncodeError {
    EncodeError::Unsupported {
        ty: ty.to_string(),
        reason,
    }
}

/// The local type of argument `index` of `local`.
fn arg_of(local: Option<&'static LocalType>, index: usize) -> Option<&'static LocalType> {
    local?.args().get(index).copied()
}

impl Serializer<'_> {
    /// Writes the descriptor of `ty`, or a back-reference to it.
    ///
    /// `local` supplies driver names and versions; without it, named types are
    /// written with no driver.
    pub(crate) fn write_type_info(&mut self, ty: &Ty, local: Option<&'static LocalType>) -> Result<(), EncodeError> {
        if let Some(index) = self.types.get(ty) {
            return self.sink.write_varint(u64::from(index) + 1);
        }
        self.sink.write_varint(0)?;
        self.write_descriptor(ty, local)?;
        // Children were registered while the descriptor was written.
        self.types.insert(ty.clone());
        Ok(())
    }

    fn write_descriptor(&mut self, ty: &Ty, local: Option<&'static LocalType>) -> Result<(), EncodeError> {
        match ty.kind() {
            TyKind::Param(_) => Err(unsupported(ty, "unbound generic parameter")),
            TyKind::Nullable(inner) => {
                self.sink.write_tag(TypeTag::Nullable)?;
                self.write_type_info(inner, arg_of(local, 0))
            }
            TyKind::Pointer(inner) => {
                self.sink.write_tag(TypeTag::Pointer)?;
                self.write_type_info(inner, None)
            }
            TyKind::ByRef(inner) => {
                self.sink.write_tag(TypeTag::ByRef)?;
                self.write_type_info(inner, None)
            }
            TyKind::Array(rank, element) => {
                self.sink.write_tag(TypeTag::Array)?;
                self.sink.write_u8(*rank)?;
                self.write_type_info(element, arg_of(local, 0))
            }
            TyKind::Named(named) if named.is_enum() => {
                let local = local.ok_or_else(|| unsupported(ty, "enum with no local type"))?;
                let Shape::Enum(shape) = local.shape() else {
                    return Err(unsupported(ty, "enum declared on a type that is not an enum"));
                };
                let driver = self.instance_driver(local)?;
                self.sink.write_tag(TypeTag::Enum)?;
                self.write_driver(driver.as_ref(), named)?;
                self.write_names(named)?;
                let underlying = shape.underlying.local();
                self.write_type_info(underlying.ty(), Some(underlying))
            }
            TyKind::Named(named) if named.is_generic() => {
                self.sink.write_tag(TypeTag::Open)?;
                self.write_names(named)?;
                self.sink.write_u8(named.arity())
            }
            TyKind::Named(named) => {
                let driver = self.descriptor_driver(local)?;
                self.sink.write_tag(TypeTag::Plain(named.class_kind()))?;
                self.write_driver(driver.as_ref(), named)?;
                self.write_names(named)?;
                self.write_bases(*named)
            }
            TyKind::Generic(definition, args) => {
                let count = u8::try_from(args.len()).map_err(|_| unsupported(ty, "too many generic arguments"))?;
                let driver = self.descriptor_driver(local)?;
                let local = local.map(LocalType::non_null);
                self.sink.write_tag(TypeTag::Closed(definition.class_kind()))?;
                self.write_driver(driver.as_ref(), definition)?;
                self.write_names(definition)?;
                self.sink.write_u8(count)?;
                for (index, arg) in args.iter().enumerate() {
                    let arg_local = arg_of(local, index);
                    if index == 0 && definition.is_keyed() {
                        // Keys are never null.
                        self.write_type_info(arg.non_nullable(), arg_local.map(LocalType::non_null))?;
                    } else {
                        self.write_type_info(arg, arg_local)?;
                    }
                }
                self.write_bases(*definition)
            }
        }
    }

    /// The driver named in a descriptor. Reference positions name the driver
    /// of their instances.
    fn descriptor_driver(&mut self, local: Option<&'static LocalType>) -> Result<Option<DriverRef>, EncodeError> {
        match local {
            Some(local) => self.instance_driver(local.non_null()),
            None => Ok(None),
        }
    }

    fn write_driver(&mut self, driver: Option<&DriverRef>, named: &NamedType) -> Result<(), EncodeError> {
        match driver {
            Some(driver) => {
                self.write_shared(driver.name())?;
                self.sink.write_smallint(driver.version())
            }
            None => {
                self.write_shared(None)?;
                self.sink.write_smallint(named.version())
            }
        }
    }

    fn write_names(&mut self, named: &NamedType) -> Result<(), EncodeError> {
        self.write_shared(named.namespace())?;
        self.write_shared(Some(named.name()))?;
        self.write_shared(named.assembly())
    }

    /// Writes the declared bases from the direct one up, stopping below the root.
    fn write_bases(&mut self, named: &'static NamedType) -> Result<(), EncodeError> {
        for base in named.ancestry().skip(1).take_while(|base| **base != OBJECT) {
            self.sink.write_bool(true)?;
            self.sink.write_smallint(base.version())?;
            self.write_names(base)?;
        }
        self.sink.write_bool(false)
    }

    /// Writes an interned string: `0` for none, `1` and the string the first
    /// time, `n + 2` for the `n`th string interned.
    pub(crate) fn write_shared(&mut self, value: Option<&str>) -> Result<(), EncodeError> {
        let Some(value) = value else {
            return self.sink.write_varint(0);
        };
        if let Some(index) = self.strings.get(value) {
            return self.sink.write_varint(u64::from(index) + 2);
        }
        self.sink.write_varint(1)?;
        self.sink.write_str(value)?;
        self.strings.insert(value.to_string());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use crate::driver::{KeyValue, Stack};
    use crate::types::Ty;
    use crate::{Codec, Portable};

    fn type_round_trip(ty: &Ty) -> Ty {
        let codec = Codec::default();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.write_type(ty).unwrap();
        }
        codec.from_bytes::<Ty>(&bytes).unwrap()
    }

    #[test]
    fn types_as_values() {
        for ty in [
            <i32 as Portable>::local().ty(),
            <Option<u8> as Portable>::local().ty(),
            <Vec<Option<String>> as Portable>::local().ty(),
            <Box<[f64]> as Portable>::local().ty(),
            <Stack<KeyValue<u8, String>> as Portable>::local().ty(),
        ] {
            assert_eq!(&type_round_trip(ty), ty);
        }
    }

    #[test]
    fn repeated_names_are_interned() {
        let codec = Codec::default();
        let one = codec.to_bytes(&vec![(1_u8, 2_u16)]).unwrap();
        let nested = codec.to_bytes(&vec![vec![(1_u8, 2_u16)]]).unwrap();
        // The outer list only adds a length and a descriptor made of
        // back-referenced strings.
        assert!(nested.len() < one.len() + 12);
    }
}
