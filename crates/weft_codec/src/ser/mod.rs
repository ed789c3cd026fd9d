//! Writing sessions.

mod type_info;

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::panic::Location;
use std::io::Write;

use weft_utils::IndexTable;
use weft_utils::hash::HashMap;

use crate::codec::Codec;
use crate::driver::{CacheLevel, DriverFlags, DriverRef};
use crate::error::EncodeError;
use crate::known::KnownObjects;
use crate::object::Obj;
use crate::portable::{Portable, View};
use crate::types::{LocalType, Ty, TypeRegistry};
use crate::wire::{FLAG_DEBUG, FORMAT_VERSION, Marker, SENTINEL, Sink};

// -----------------------------------------------------------------------------
// Serializer

/// Writes one stream.
///
/// A session remembers every object and type descriptor it has written:
/// an instance reached twice is written once and then referenced by index,
/// which preserves sharing and makes cycles terminate.
///
/// Object payloads are written recursively until the nesting depth passes
/// [`CodecConfig::max_depth`](crate::CodecConfig::max_depth). Deeper objects
/// are written as a descriptor only, and their payload follows once the
/// outermost value is complete.
pub struct Serializer<'a> {
    sink: Sink<'a>,
    codec: &'a Codec,
    objects: IndexTable<usize>,
    /// Keeps written objects alive, so that their addresses stay unique.
    tracked: Vec<Obj>,
    types: IndexTable<Ty>,
    strings: IndexTable<String>,
    drivers: HashMap<usize, DriverRef>,
    deferred: Vec<(DriverRef, Obj)>,
    depth: u32,
    debug: bool,
    on_destroyed: Option<Box<dyn FnMut(&Obj) + 'a>>,
}

impl<'a> Serializer<'a> {
    /// Starts a session, writing the stream header.
    pub fn new(codec: &'a Codec, out: &'a mut dyn Write) -> Result<Self, EncodeError> {
        let config = codec.config();
        let mut sink = Sink::new(out, config.max_payload);
        sink.write_u8(FORMAT_VERSION)?;
        sink.write_u8(if config.debug_mode { FLAG_DEBUG } else { 0 })?;
        Ok(Self {
            sink,
            codec,
            objects: IndexTable::new(),
            tracked: Vec::new(),
            types: IndexTable::new(),
            strings: IndexTable::new(),
            drivers: HashMap::default(),
            deferred: Vec::new(),
            depth: 0,
            debug: config.debug_mode,
            on_destroyed: None,
        })
    }

    /// Primitive access for drivers.
    #[inline]
    pub fn sink(&mut self) -> &mut Sink<'a> {
        &mut self.sink
    }

    #[inline]
    pub fn codec(&self) -> &'a Codec {
        self.codec
    }

    /// Object nesting depth of the payload being written.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Calls `observer` with every destroyed instance, the first time it is written.
    pub fn on_destroyed(&mut self, observer: impl FnMut(&Obj) + 'a) {
        self.on_destroyed = Some(Box::new(observer));
    }

    // -------------------------------------------------------------------------
    // Values

    /// Writes `value` through an object position: a marker, then whatever the
    /// marker announces. Returns `false` if `value` was null.
    pub fn write<T: Portable>(&mut self, value: &T) -> Result<bool, EncodeError> {
        self.write_view(value.view())
    }

    /// Writes a value of a value type as its descriptor and payload, with no
    /// marker. Values of reference types are written as with [`write`](Self::write).
    pub fn write_value<T: Portable>(&mut self, value: &T) -> Result<(), EncodeError> {
        let local = T::local();
        if local.is_reference() {
            self.write_view(value.view())?;
            return Ok(());
        }
        let driver = self.required_driver(local)?;
        self.write_type_info(local.ty(), Some(local))?;
        driver.write(self, value)
    }

    /// Writes any object. Returns `false` if `obj` was `None`.
    pub fn write_object(&mut self, obj: Option<&Obj>) -> Result<bool, EncodeError> {
        match obj {
            Some(obj) => self.write_view(View::Object(obj.clone())),
            None => self.write_view(View::Null),
        }
    }

    /// Writes a type descriptor as a value.
    pub fn write_type(&mut self, ty: &Ty) -> Result<(), EncodeError> {
        self.write_view(View::Type(ty.clone()))?;
        Ok(())
    }

    #[inline]
    pub fn write_len(&mut self, len: usize) -> Result<(), EncodeError> {
        self.sink.write_varint(len as u64)
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.sink.write_bool(value)
    }

    #[inline]
    pub fn write_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.sink.write_str(value)
    }

    #[inline]
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.sink.write_bytes(value)
    }

    /// Flushes the output and ends the session.
    pub fn finish(mut self) -> Result<(), EncodeError> {
        debug_assert!(self.deferred.is_empty());
        log::trace!(
            "session wrote {} objects, {} types, {} strings",
            self.tracked.len(),
            self.types.len(),
            self.strings.len()
        );
        self.sink.flush()
    }

    // -------------------------------------------------------------------------
    // Object positions

    pub(crate) fn write_view(&mut self, view: View<'_>) -> Result<bool, EncodeError> {
        let written = match view {
            View::Null => {
                self.sink.write_marker(Marker::Null)?;
                false
            }
            View::Value(value, local) => {
                let driver = self.required_driver(local)?;
                self.sink.write_marker(Marker::ObjectData)?;
                self.write_type_info(local.ty(), Some(local))?;
                driver.write(self, value)?;
                true
            }
            View::Object(obj) => {
                self.write_obj(obj)?;
                true
            }
            View::Known(value, type_name) => {
                let key = KnownObjects::global()
                    .key_of(&value)
                    .ok_or(EncodeError::UnknownKnownObject(type_name))?;
                self.sink.write_marker(Marker::KnownObject)?;
                self.write_shared(Some(&key))?;
                true
            }
            View::Type(ty) => {
                self.sink.write_marker(Marker::Type)?;
                let local = TypeRegistry::global().find_local(&ty);
                self.write_type_info(&ty, local)?;
                true
            }
        };
        self.debug_sentinel()?;
        if self.depth == 0 {
            self.drain()?;
        }
        Ok(written)
    }

    fn write_obj(&mut self, obj: Obj) -> Result<(), EncodeError> {
        let (index, fresh) = self.objects.insert(obj.addr());
        if !fresh {
            self.sink.write_marker(Marker::ObjectRef)?;
            return self.sink.write_varint(u64::from(index));
        }
        self.tracked.push(obj.clone());

        if obj.is_destroyed()
            && let Some(observer) = &mut self.on_destroyed
        {
            observer(&obj);
        }
        if obj.is_root() {
            return self.sink.write_marker(Marker::EmptyObject);
        }

        let local = obj.local_type();
        let driver = self.required_driver(local)?;
        if self.depth > self.codec.config().max_depth && driver.flags().contains(DriverFlags::DEFERRABLE) {
            self.sink.write_marker(Marker::DeferredObject)?;
            self.write_type_info(local.ty(), Some(local))?;
            log::trace!("deferred `{}` at depth {}", local.ty(), self.depth);
            self.deferred.push((driver, obj));
            return Ok(());
        }

        self.sink.write_marker(Marker::ObjectData)?;
        self.write_type_info(local.ty(), Some(local))?;
        self.depth += 1;
        let result = driver.write(self, obj.as_any());
        self.depth -= 1;
        result
    }

    /// Writes the deferred payloads, last deferred first.
    fn drain(&mut self) -> Result<(), EncodeError> {
        while let Some((driver, obj)) = self.deferred.pop() {
            log::trace!("writing deferred `{}`, {} left", obj.local_type().ty(), self.deferred.len());
            self.depth = 1;
            let result = driver.write(self, obj.as_any());
            self.depth = 0;
            result?;
            self.debug_sentinel()?;
        }
        Ok(())
    }

    /// The driver writing instances of `local`, memoized for the session.
    fn instance_driver(&mut self, local: &'static LocalType) -> Result<Option<DriverRef>, EncodeError> {
        if let Some(driver) = self.drivers.get(&local.addr()) {
            return Ok(Some(driver.clone()));
        }
        let driver = self.codec.resolve_instance_write(local)?;
        if let Some(driver) = &driver
            && driver.cache_level() != CacheLevel::Never
        {
            self.drivers.insert(local.addr(), driver.clone());
        }
        Ok(driver)
    }

    fn required_driver(&mut self, local: &'static LocalType) -> Result<DriverRef, EncodeError> {
        self.instance_driver(local)?.ok_or_else(|| EncodeError::NoDriver {
            ty: local.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Debug

    /// Writes a sentinel and the caller's location when the session is in
    /// debug mode, for [`Deserializer::debug_check`](crate::Deserializer::debug_check).
    #[track_caller]
    pub fn debug_sentinel(&mut self) -> Result<(), EncodeError> {
        if !self.debug {
            return Ok(());
        }
        let caller = Location::caller();
        self.sink.write_u32_fixed(SENTINEL)?;
        self.sink.write_str(&alloc::format!("{}:{}", caller.file(), caller.line()))
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use crate::error::EncodeError;
    use crate::tests::Peer;
    use crate::types::Ty;
    use crate::{Codec, CodecConfig, Gc, Obj};

    #[test]
    fn header_records_debug_mode() {
        let codec = Codec::default();
        assert_eq!(codec.to_bytes(&None::<Obj>).unwrap(), [1, 0, 0]);

        let codec = Codec::new(CodecConfig {
            debug_mode: true,
            ..CodecConfig::default()
        });
        let bytes = codec.to_bytes(&None::<Obj>).unwrap();
        assert_eq!(&bytes[..3], [1, 1, 0]);
        assert_eq!(&bytes[3..7], 0x5EA1_7E11_u32.to_le_bytes());
    }

    #[test]
    fn descriptors_are_written_once() {
        let codec = Codec::default();
        let one = codec.to_bytes(&vec![Gc::new(Peer::named("a"))]).unwrap();
        let two = codec
            .to_bytes(&vec![Gc::new(Peer::named("a")), Gc::new(Peer::named("a"))])
            .unwrap();
        // marker, descriptor back-reference, string descriptor back-reference,
        // two bytes of name, null `other`
        let second = 1 + 1 + 1 + 2 + 1;
        assert_eq!(two.len(), one.len() + second);
    }

    #[test]
    fn destroyed_observer_runs_once_per_instance() {
        let codec = Codec::default();
        let alive = Gc::new(Peer::named("alive"));
        let mut seen = Vec::new();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.on_destroyed(|obj: &Obj| seen.push(obj.clone()));
            ser.write(&alive).unwrap();
            ser.finish().unwrap();
        }
        assert!(seen.is_empty());
    }

    #[test]
    fn type_parameters_cannot_be_written() {
        let codec = Codec::default();
        let mut bytes = Vec::new();
        let mut ser = codec.serializer(&mut bytes).unwrap();
        let err = ser.write_type(&Ty::param("T")).unwrap_err();
        assert!(matches!(err, EncodeError::Unsupported { .. }));
    }
}
