//! Reading sessions.

mod migration;
mod type_info;

pub use migration::{MigrationHook, TypeMigration};
pub use type_info::{ReadTypeInfo, WrittenLevel};

use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::panic::Location;
use std::io::Read as IoRead;

use crate::codec::Codec;
use crate::driver::{DriverRef, expect_read};
use crate::error::DecodeError;
use crate::known::KnownObjects;
use crate::object::Obj;
use crate::portable::{Portable, Read};
use crate::types::{LocalType, Ty};
use crate::wire::{FLAG_DEBUG, FORMAT_VERSION, Marker, SENTINEL, Source};

/// An entry of the object table.
enum Slot {
    Object(Obj),
    /// A written object read into a value type: it has no identity left.
    Detached,
}

struct Deferred {
    driver: DriverRef,
    obj: Obj,
    info: Rc<ReadTypeInfo>,
}

// -----------------------------------------------------------------------------
// Deserializer

/// Reads one stream.
///
/// Mirrors the [`Serializer`](crate::Serializer): objects are created before
/// their payload is read and registered at once, so back-references inside
/// the payload, cycles included, resolve to the instance being filled.
pub struct Deserializer<'a> {
    source: Source<'a>,
    codec: &'a Codec,
    objects: Vec<Slot>,
    types: Vec<Rc<ReadTypeInfo>>,
    strings: Vec<Rc<str>>,
    deferred: Vec<Deferred>,
    depth: u32,
    type_depth: u32,
    debug: bool,
}

impl<'a> Deserializer<'a> {
    /// Starts a session, reading the stream header.
    pub fn new(codec: &'a Codec, input: &'a mut dyn IoRead) -> Result<Self, DecodeError> {
        let mut source = Source::new(input, codec.config().max_payload);
        let version = source.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedFormat(version));
        }
        let flags = source.read_u8()?;
        Ok(Self {
            source,
            codec,
            objects: Vec::new(),
            types: Vec::new(),
            strings: Vec::new(),
            deferred: Vec::new(),
            depth: 0,
            type_depth: 0,
            debug: flags & FLAG_DEBUG != 0,
        })
    }

    /// Primitive access for drivers.
    #[inline]
    pub fn source(&mut self) -> &mut Source<'a> {
        &mut self.source
    }

    #[inline]
    pub fn codec(&self) -> &'a Codec {
        self.codec
    }

    /// Object nesting depth of the payload being read.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns `true` if the stream carries debug sentinels.
    #[inline]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    // -------------------------------------------------------------------------
    // Values

    /// Reads a value written with [`Serializer::write`](crate::Serializer::write).
    pub fn read<T: Portable>(&mut self) -> Result<T, DecodeError> {
        let read = self.read_reference(T::local().non_null())?;
        T::from_read(read)
    }

    /// Reads a value written with [`Serializer::write_value`](crate::Serializer::write_value).
    pub fn read_value<T: Portable>(&mut self) -> Result<T, DecodeError> {
        let local = T::local();
        if local.is_reference() {
            return self.read();
        }
        let info = self.read_type_info()?;
        let driver = self.driver(&info, local)?;
        expect_read(driver.read(self, &info)?)
    }

    /// Reads an object position. `None` for null.
    pub fn read_object(&mut self) -> Result<Option<Obj>, DecodeError> {
        self.read()
    }

    /// Reads a type written with [`Serializer::write_type`](crate::Serializer::write_type).
    pub fn read_type(&mut self) -> Result<Ty, DecodeError> {
        self.read()
    }

    #[inline]
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.source.read_varint()?;
        usize::try_from(len).map_err(|_| DecodeError::VarIntOverflow)
    }

    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.source.read_bool()
    }

    #[inline]
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        self.source.read_str()
    }

    #[inline]
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        self.source.read_bytes()
    }

    // -------------------------------------------------------------------------
    // Object positions

    /// Reads a marker-prefixed value, mapping written objects onto `expected`
    /// or onto the local type registered under their written name.
    pub(crate) fn read_reference(&mut self, expected: &'static LocalType) -> Result<Read, DecodeError> {
        let read = match self.source.read_marker()? {
            Marker::Null => Read::Null,
            Marker::EmptyObject => {
                let obj = Obj::root();
                self.objects.push(Slot::Object(obj.clone()));
                Read::Object(obj)
            }
            Marker::ObjectRef => {
                let index = self.source.read_u32_varint()?;
                match self.objects.get(index as usize) {
                    Some(Slot::Object(obj)) => Read::Object(obj.clone()),
                    Some(Slot::Detached) => return Err(DecodeError::DetachedReference(index)),
                    None => return Err(DecodeError::InvalidObjectIndex(index)),
                }
            }
            Marker::KnownObject => {
                let key = self.read_shared()?.ok_or(DecodeError::InvalidSharedString(0))?;
                let value = KnownObjects::global()
                    .lookup(&key)
                    .ok_or_else(|| DecodeError::UnknownKnownObject(key.to_string()))?;
                Read::Known(value)
            }
            Marker::Type => {
                let info = self.read_type_info()?;
                let ty = info.local_ty().cloned().ok_or_else(|| DecodeError::UnknownType {
                    written: info.to_string(),
                })?;
                Read::Type(ty)
            }
            Marker::ObjectData => self.read_data(expected)?,
            Marker::DeferredObject => self.read_deferred(expected)?,
        };
        self.debug_check()?;
        if self.depth == 0 {
            self.drain()?;
        }
        Ok(read)
    }

    fn read_data(&mut self, expected: &'static LocalType) -> Result<Read, DecodeError> {
        let info = self.read_type_info()?;
        let local = self.local_for(&info, expected)?;
        let driver = self.driver(&info, local)?;
        let tracked = info.is_reference_kind();

        if local.is_reference() {
            let obj = driver.create(&info)?;
            if tracked {
                self.objects.push(Slot::Object(obj.clone()));
            }
            self.nested(tracked, |this| driver.fill(this, &obj, &info))?;
            Ok(Read::Object(obj))
        } else {
            if tracked {
                self.objects.push(Slot::Detached);
            }
            let value = self.nested(tracked, |this| driver.read(this, &info))?;
            Ok(Read::Value(value))
        }
    }

    fn read_deferred(&mut self, expected: &'static LocalType) -> Result<Read, DecodeError> {
        let info = self.read_type_info()?;
        let local = self.local_for(&info, expected)?;
        if !local.is_reference() {
            return Err(DecodeError::DeferredValue {
                ty: local.ty().to_string(),
            });
        }
        let driver = self.driver(&info, local)?;
        let obj = driver.create(&info)?;
        self.objects.push(Slot::Object(obj.clone()));
        log::trace!("deferred `{info}` at depth {}", self.depth);
        self.deferred.push(Deferred {
            driver,
            obj: obj.clone(),
            info,
        });
        Ok(Read::Object(obj))
    }

    fn nested<R>(
        &mut self,
        tracked: bool,
        read: impl FnOnce(&mut Self) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        let depth = self.depth;
        if tracked {
            self.depth += 1;
        }
        let result = read(self);
        self.depth = depth;
        result
    }

    /// Fills the deferred objects, last deferred first.
    fn drain(&mut self) -> Result<(), DecodeError> {
        while let Some(Deferred { driver, obj, info }) = self.deferred.pop() {
            log::trace!("filling deferred `{info}`, {} left", self.deferred.len());
            self.depth = 1;
            let result = driver.fill(self, &obj, &info);
            self.depth = 0;
            result?;
            self.debug_check()?;
        }
        Ok(())
    }

    /// The local type a written object is read as.
    ///
    /// A migration target wins. Otherwise value types are read as the type the
    /// caller asked for, and objects as the type registered under their name.
    fn local_for(
        &self,
        info: &ReadTypeInfo,
        expected: &'static LocalType,
    ) -> Result<&'static LocalType, DecodeError> {
        if let Some(target) = info.forced_target() {
            return Ok(target);
        }
        if !expected.is_reference() {
            return Ok(expected);
        }
        if info.local_ty() == Some(expected.ty()) {
            return Ok(expected);
        }
        info.local_type().ok_or_else(|| DecodeError::UnknownType {
            written: info.to_string(),
        })
    }

    fn driver(&self, info: &ReadTypeInfo, local: &'static LocalType) -> Result<DriverRef, DecodeError> {
        self.codec
            .resolve_instance_read(info, local)?
            .ok_or_else(|| DecodeError::NoDriver {
                written: info.to_string(),
                local: local.to_string(),
            })
    }

    // -------------------------------------------------------------------------
    // Debug

    /// Checks a sentinel written by [`Serializer::debug_sentinel`](crate::Serializer::debug_sentinel).
    /// Does nothing unless the stream was written in debug mode.
    #[track_caller]
    pub fn debug_check(&mut self) -> Result<(), DecodeError> {
        if !self.debug {
            return Ok(());
        }
        let caller = Location::caller();
        let desync = |written_at: String| DecodeError::Desync {
            read_at: alloc::format!("{}:{}", caller.file(), caller.line()),
            written_at,
        };
        if self.source.read_u32_fixed()? != SENTINEL {
            return Err(desync(String::from("?")));
        }
        // The location is informational; only the magic number is compared.
        let _written_at = self.source.read_str().map_err(|_| desync(String::from("?")))?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use crate::error::DecodeError;
    use crate::tests::{Link, Peer};
    use crate::{Codec, CodecConfig, Gc, Obj};

    #[test]
    fn values_in_order() {
        let codec = Codec::default();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            assert!(ser.write(&42_i32).unwrap());
            assert!(ser.write(&String::from("hi")).unwrap());
            assert!(!ser.write(&None::<Gc<Peer>>).unwrap());
        }
        let mut input = &bytes[..];
        let mut de = codec.deserializer(&mut input).unwrap();
        assert_eq!(de.read::<i32>().unwrap(), 42);
        assert_eq!(de.read::<String>().unwrap(), "hi");
        assert!(de.read::<Option<Gc<Peer>>>().unwrap().is_none());
        assert!(matches!(de.read::<i32>(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn shared_instances_are_written_once() {
        let codec = Codec::default();
        let a = Gc::new(Peer::named("a"));
        let once = codec.to_bytes(&vec![a.clone()]).unwrap();
        let twice = codec.to_bytes(&vec![a.clone(), a.clone()]).unwrap();
        // The second element is a marker and an index.
        assert_eq!(twice.len(), once.len() + 2);

        let back = codec.from_bytes::<Vec<Gc<Peer>>>(&twice).unwrap();
        assert!(back[0].ptr_eq(&back[1]));
        assert_eq!(back[0].borrow().name, "a");
    }

    #[test]
    fn cycles() {
        let codec = Codec::default();
        let a = Gc::new(Peer::named("a"));
        let b = Gc::new(Peer::named("b"));
        a.borrow_mut().other = Some(b.clone());
        b.borrow_mut().other = Some(a.clone());

        let bytes = codec.to_bytes(&a).unwrap();
        let a2 = codec.from_bytes::<Gc<Peer>>(&bytes).unwrap();
        let b2 = a2.borrow().other.clone().unwrap();
        assert_eq!(b2.borrow().name, "b");
        assert!(!a2.ptr_eq(&b2));
        assert!(b2.borrow().other.as_ref().unwrap().ptr_eq(&a2));

        let self_loop = Gc::new(Peer::named("loop"));
        self_loop.borrow_mut().other = Some(self_loop.clone());
        let bytes = codec.to_bytes(&self_loop).unwrap();
        let back = codec.from_bytes::<Gc<Peer>>(&bytes).unwrap();
        assert!(back.borrow().other.as_ref().unwrap().ptr_eq(&back));

        // Break the cycles so the test does not leak.
        for peer in [a, b, a2, b2, self_loop, back] {
            peer.borrow_mut().other = None;
        }
    }

    #[test]
    fn deep_graphs_are_deferred() {
        const LEN: u32 = 100_000;
        let codec = Codec::new(CodecConfig {
            max_depth: 0,
            ..CodecConfig::default()
        });
        let head = Link::chain(LEN);

        let bytes = codec.to_bytes(&head).unwrap();
        let back = codec.from_bytes::<Gc<Link>>(&bytes).unwrap();

        let mut count = 0;
        let mut node = Some(back);
        while let Some(link) = node {
            assert_eq!(link.borrow().value, count);
            count += 1;
            node = link.borrow().next.clone();
        }
        assert_eq!(count, LEN);
    }

    #[test]
    fn empty_objects_keep_identity() {
        let codec = Codec::default();
        let root = Obj::root();
        let bytes = codec.to_bytes(&vec![root.clone(), root]).unwrap();
        let back = codec.from_bytes::<Vec<Obj>>(&bytes).unwrap();
        assert!(back[0].is_root());
        assert_eq!(back[0], back[1]);
    }

    #[test]
    fn corrupt_streams() {
        let codec = Codec::default();
        let err = codec.from_bytes::<i32>(&[9, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(9)));
        let err = codec.from_bytes::<i32>(&[1, 0, 42]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMarker(42)));
        let err = codec.from_bytes::<Obj>(&[1, 0, 3, 7]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidObjectIndex(7)));
        let err = codec.from_bytes::<i32>(&[1, 0, 2, 5]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidTypeIndex(4)));
        assert!(err.is_malformed());
    }
}
