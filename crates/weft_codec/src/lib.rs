#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

// -----------------------------------------------------------------------------
// Alloc

extern crate alloc;

// -----------------------------------------------------------------------------
// Modules

mod codec;
mod config;
mod de;
mod known;
mod layered;
mod macros;
mod object;
mod portable;
mod ser;

pub mod driver;
pub mod error;
pub mod resolve;
pub mod types;
pub mod wire;

// -----------------------------------------------------------------------------
// Top-level exports

pub use codec::Codec;
pub use config::CodecConfig;
pub use de::{Deserializer, MigrationHook, ReadTypeInfo, TypeMigration, WrittenLevel};
pub use driver::{KeyValue, Simple, Stack, Versioned};
pub use error::{ConfigError, DecodeError, EncodeError, IdempotenceError};
pub use known::{KNOWN, Known, KnownObjects};
pub use layered::{Layer, LayeredDriver, layered_driver};
pub use object::{Class, Gc, OBJECT, Obj, Object, Root};
pub use portable::{Portable, Read, TYPE, View};
pub use ser::Serializer;

#[doc(hidden)]
pub mod __macro_exports {
    pub use alloc::boxed::Box;
    pub use alloc::sync::Arc;
    pub use core::any::Any;

    #[cfg(feature = "auto_register")]
    pub use crate::known::KnownRegistration;
    #[cfg(feature = "auto_register")]
    pub use crate::types::AutoRegistration;
    #[cfg(feature = "auto_register")]
    pub use inventory;
}

// -----------------------------------------------------------------------------
// Test fixtures

#[cfg(test)]
pub(crate) mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use crate::error::{DecodeError, EncodeError};
    use crate::types::NamedType;
    use crate::{Deserializer, Gc, Layer, Root, Serializer, Simple, Versioned};

    const NS: Option<&str> = Some("weft.tests");

    // -------------------------------------------------------------------------
    // Peer

    static PEER: NamedType = NamedType::new(NS, "Peer");

    /// A class pointing at another instance, possibly itself.
    #[derive(Debug, Default)]
    pub struct Peer {
        pub name: String,
        pub other: Option<Gc<Peer>>,
    }

    impl Peer {
        pub fn named(name: &str) -> Self {
            Self {
                name: name.into(),
                other: None,
            }
        }
    }

    impl Simple for Peer {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.name)?;
            w.write(&self.other)?;
            Ok(())
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.name = r.read_value()?;
            self.other = r.read()?;
            Ok(())
        }
    }

    crate::impl_class!(Peer => PEER, simple);

    /// The payload of a [`Peer`] as a value type.
    static CARD: NamedType = NamedType::new(NS, "Card").value();

    #[derive(Debug, Default)]
    pub struct Card {
        pub name: String,
        pub other: Option<Gc<Peer>>,
    }

    impl Simple for Card {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.name)?;
            w.write(&self.other)?;
            Ok(())
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.name = r.read_value()?;
            self.other = r.read()?;
            Ok(())
        }
    }

    crate::impl_value!(Card => CARD, simple);

    // -------------------------------------------------------------------------
    // Link

    static LINK: NamedType = NamedType::new(NS, "Link").sealed();

    #[derive(Default)]
    pub struct Link {
        pub value: u32,
        pub next: Option<Gc<Link>>,
    }

    impl Link {
        /// A list of `len` links valued `0..len`.
        pub fn chain(len: u32) -> Gc<Link> {
            let mut head = None;
            for value in (0..len).rev() {
                head = Some(Gc::new(Link { value, next: head }));
            }
            head.expect("a chain has at least one link")
        }
    }

    // Long chains would overflow the stack if dropped recursively.
    impl Drop for Link {
        fn drop(&mut self) {
            let mut next = self.next.take();
            while let Some(link) = next {
                next = match link.try_unwrap() {
                    Ok(mut link) => link.next.take(),
                    Err(_) => None,
                };
            }
        }
    }

    impl Simple for Link {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.value)?;
            w.write(&self.next)?;
            Ok(())
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.value = r.read_value()?;
            self.next = r.read()?;
            Ok(())
        }
    }

    crate::impl_class!(Link => LINK, simple);

    // -------------------------------------------------------------------------
    // Gauge

    static GAUGE: NamedType = NamedType::new(NS, "Gauge").value().with_version(1);
    static GAUGE_V2: NamedType = NamedType::new(NS, "Gauge").value().with_version(2);

    #[derive(Debug, Default, PartialEq)]
    pub struct Gauge {
        pub level: u32,
    }

    impl Versioned for Gauge {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.level)
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            self.level = r.read_value()?;
            Ok(())
        }
    }

    crate::impl_value!(Gauge => GAUGE, versioned);

    /// The next version of [`Gauge`], under the same name.
    #[derive(Debug, Default, PartialEq)]
    pub struct GaugeV2 {
        pub level: u32,
        pub unit: Option<String>,
    }

    impl Versioned for GaugeV2 {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.level)?;
            w.write_value(&self.unit)
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError> {
            self.level = r.read_value()?;
            if version >= 2 {
                self.unit = r.read_value()?;
            }
            Ok(())
        }
    }

    crate::impl_value!(GaugeV2 => GAUGE_V2, versioned);

    // -------------------------------------------------------------------------
    // Counter

    static COUNTER: NamedType = NamedType::new(NS, "Counter").value();

    /// Counts its own reads.
    #[derive(Debug, Default)]
    pub struct Counter(pub u32);

    impl Simple for Counter {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.0)
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.0 = r.read_value::<u32>()? + 1;
            Ok(())
        }
    }

    crate::impl_value!(Counter => COUNTER, simple);

    // -------------------------------------------------------------------------
    // Sloppy

    static SLOPPY: NamedType = NamedType::new(NS, "Sloppy").value();

    /// Writes one byte more than it reads.
    #[derive(Debug, Default)]
    pub struct Sloppy(pub u8);

    impl Simple for Sloppy {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.0)?;
            w.write_bool(true)
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.0 = r.read_value()?;
            Ok(())
        }
    }

    crate::impl_value!(Sloppy => SLOPPY, simple);

    // -------------------------------------------------------------------------
    // Mood

    static MOOD: NamedType = NamedType::new(NS, "Mood").enumeration();
    static MOOD_WIDE: NamedType = NamedType::new(NS, "MoodWide").enumeration();

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Mood {
        Calm,
        Cheerful,
        Grumpy = 2,
    }

    crate::portable_enum!(Mood: u8 => MOOD { Calm, Cheerful, Grumpy });

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(i16)]
    pub enum MoodWide {
        Calm,
        Cheerful,
        Grumpy = 2,
        Elated = 300,
    }

    crate::portable_enum!(MoodWide: i16 => MOOD_WIDE { Calm, Cheerful, Grumpy, Elated });

    // -------------------------------------------------------------------------
    // Layered shapes

    thread_local! {
        /// Levels written and read on this thread, in order.
        pub static LAYER_LOG: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    fn log_layer(entry: &'static str) {
        LAYER_LOG.with_borrow_mut(|log| log.push(entry));
    }

    static SHAPE: NamedType = NamedType::new(NS, "Shape");
    static RECT: NamedType = NamedType::new(NS, "Rect").with_base(&SHAPE);
    static SQUARE: NamedType = NamedType::new(NS, "Square").with_base(&RECT).sealed();
    static UNRULY: NamedType = NamedType::new(NS, "Unruly").with_base(&RECT);
    static CROOKED: NamedType = NamedType::new(NS, "Crooked").with_base(&SHAPE);

    /// The top level. It carries the destroyed flag but is not destroyable
    /// itself, so it is always written.
    #[derive(Debug, Default)]
    pub struct Shape {
        pub label: String,
        pub destroyed: bool,
    }

    impl Layer for Shape {
        type Base = Root;

        fn level_type() -> &'static NamedType {
            &SHAPE
        }

        fn base(&self) -> Option<&Root> {
            None
        }

        fn base_mut(&mut self) -> Option<&mut Root> {
            None
        }

        fn write_layer(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            log_layer("write Shape");
            w.write_value(&self.label)?;
            w.write_bool(self.destroyed)
        }

        fn read_layer(&mut self, r: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            log_layer("read Shape");
            self.label = r.read_value()?;
            self.destroyed = r.read_bool()?;
            Ok(())
        }

        fn is_destroyed(&self) -> bool {
            self.destroyed
        }
    }

    crate::impl_class!(Shape => SHAPE, layered);

    #[derive(Debug, Default)]
    pub struct Rect {
        pub base: Shape,
        pub width: u32,
    }

    impl Layer for Rect {
        type Base = Shape;

        const DESTROYABLE: bool = true;

        fn level_type() -> &'static NamedType {
            &RECT
        }

        fn base(&self) -> Option<&Shape> {
            Some(&self.base)
        }

        fn base_mut(&mut self) -> Option<&mut Shape> {
            Some(&mut self.base)
        }

        fn write_layer(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            log_layer("write Rect");
            w.write_value(&self.width)
        }

        fn read_layer(&mut self, r: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            log_layer("read Rect");
            self.width = r.read_value()?;
            Ok(())
        }
    }

    crate::impl_class!(Rect => RECT, layered);

    #[derive(Debug, Default)]
    pub struct Square {
        pub base: Rect,
        pub side: u32,
    }

    impl Layer for Square {
        type Base = Rect;

        const DESTROYABLE: bool = true;

        fn level_type() -> &'static NamedType {
            &SQUARE
        }

        fn base(&self) -> Option<&Rect> {
            Some(&self.base)
        }

        fn base_mut(&mut self) -> Option<&mut Rect> {
            Some(&mut self.base)
        }

        fn write_layer(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            log_layer("write Square");
            w.write_value(&self.side)
        }

        fn read_layer(&mut self, r: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            log_layer("read Square");
            self.side = r.read_value()?;
            Ok(())
        }
    }

    crate::impl_class!(Square => SQUARE, layered);

    /// Derives from a destroyable level without being destroyable.
    #[derive(Debug, Default)]
    pub struct Unruly {
        pub base: Rect,
    }

    impl Layer for Unruly {
        type Base = Rect;

        fn level_type() -> &'static NamedType {
            &UNRULY
        }

        fn base(&self) -> Option<&Rect> {
            Some(&self.base)
        }

        fn base_mut(&mut self) -> Option<&mut Rect> {
            Some(&mut self.base)
        }

        fn write_layer(&self, _: &mut Serializer<'_>) -> Result<(), EncodeError> {
            Ok(())
        }

        fn read_layer(&mut self, _: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            Ok(())
        }
    }

    crate::impl_class!(Unruly => UNRULY, layered);

    /// Embeds a `Rect` but declares `Shape` as its base.
    #[derive(Debug, Default)]
    pub struct Crooked {
        pub base: Rect,
    }

    impl Layer for Crooked {
        type Base = Rect;

        const DESTROYABLE: bool = true;

        fn level_type() -> &'static NamedType {
            &CROOKED
        }

        fn base(&self) -> Option<&Rect> {
            Some(&self.base)
        }

        fn base_mut(&mut self) -> Option<&mut Rect> {
            Some(&mut self.base)
        }

        fn write_layer(&self, _: &mut Serializer<'_>) -> Result<(), EncodeError> {
            Ok(())
        }

        fn read_layer(&mut self, _: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
            Ok(())
        }
    }

    crate::impl_class!(Crooked => CROOKED, layered);

    // -------------------------------------------------------------------------
    // End to end

    use crate::types::Ty;
    use crate::wire::RewindableSource;
    use crate::{Codec, CodecConfig, Portable, TypeMigration};

    #[test]
    fn debug_sentinels_catch_desync() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&Sloppy(3)).unwrap();
        // Without sentinels the extra byte goes unnoticed.
        assert_eq!(codec.from_bytes::<Sloppy>(&bytes).unwrap().0, 3);

        let debug = Codec::new(CodecConfig {
            debug_mode: true,
            ..CodecConfig::default()
        });
        let bytes = debug.to_bytes(&Sloppy(3)).unwrap();
        // The reader follows the stream header, whatever its own setting.
        let err = codec.from_bytes::<Sloppy>(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Desync { .. }));
        assert!(err.is_malformed());

        let bytes = debug.to_bytes(&vec![Gc::new(Peer::named("ok"))]).unwrap();
        assert_eq!(codec.from_bytes::<Vec<Gc<Peer>>>(&bytes).unwrap()[0].borrow().name, "ok");
    }

    static GHOST: NamedType = NamedType::new(Some("weft.tests.legacy"), "Ghost");

    #[test]
    fn second_pass_after_migration() {
        let mut codec = Codec::default();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.write_type(&Ty::named(&GHOST)).unwrap();
            ser.write(&7_u16).unwrap();
            ser.finish().unwrap();
        }

        let mut source = RewindableSource::new(&bytes[..]);
        {
            let mut de = codec.deserializer(&mut source).unwrap();
            let err = de.read_type().unwrap_err();
            assert!(matches!(err, DecodeError::UnknownType { ref written } if written == "weft.tests.legacy.Ghost"));
            assert!(err.is_unresolved());
        }

        codec.add_migration(|m: &mut TypeMigration<'_>| {
            if m.namespace() == Some("weft.tests.legacy") && m.name() == Some("Ghost") {
                m.set_namespace(Some("weft.tests"));
                m.set_name("Peer");
            }
        });
        source.rewind();
        let mut de = codec.deserializer(&mut source).unwrap();
        assert_eq!(&de.read_type().unwrap(), <Gc<Peer> as Portable>::local().ty());
        assert_eq!(de.read::<u16>().unwrap(), 7);
    }

    #[test]
    fn objects_read_into_values() {
        let codec = Codec::default();
        let peer = Gc::new(Peer::named("once"));
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.write(&peer).unwrap();
            ser.write(&peer).unwrap();
            ser.finish().unwrap();
        }

        let mut input = &bytes[..];
        let mut de = codec.deserializer(&mut input).unwrap();
        let card = de.read::<Card>().unwrap();
        assert_eq!(card.name, "once");
        assert!(card.other.is_none());
        // The copy has no identity left to refer to.
        let err = de.read::<Card>().unwrap_err();
        assert!(matches!(err, DecodeError::DetachedReference(0)));
    }

    static BUDDY: NamedType = NamedType::new(Some("weft.tests.legacy"), "Buddy");

    /// An older name of [`Peer`], with the same payload.
    #[derive(Debug, Default)]
    pub struct Buddy {
        pub name: String,
        pub other: Option<Gc<Buddy>>,
    }

    impl Simple for Buddy {
        fn write_data(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
            w.write_value(&self.name)?;
            w.write(&self.other)?;
            Ok(())
        }

        fn read_data(&mut self, r: &mut Deserializer<'_>) -> Result<(), DecodeError> {
            self.name = r.read_value()?;
            self.other = r.read()?;
            Ok(())
        }
    }

    crate::impl_class!(Buddy => BUDDY, simple);

    #[test]
    fn renamed_classes_keep_their_graph() {
        let mut codec = Codec::default();
        let a = Gc::new(Buddy {
            name: "a".into(),
            other: None,
        });
        let b = Gc::new(Buddy {
            name: "b".into(),
            other: Some(a.clone()),
        });
        a.borrow_mut().other = Some(b);
        let bytes = codec.to_bytes(&a).unwrap();
        assert!(codec.from_bytes::<Gc<Peer>>(&bytes).is_err());

        codec.add_migration(|m: &mut TypeMigration<'_>| {
            if m.namespace() == Some("weft.tests.legacy") && m.name() == Some("Buddy") {
                m.set_namespace(Some("weft.tests"));
                m.set_name("Peer");
            }
        });
        let a = codec.from_bytes::<Gc<Peer>>(&bytes).unwrap();
        let b = a.borrow().other.clone().unwrap();
        assert_eq!(a.borrow().name, "a");
        assert_eq!(b.borrow().name, "b");
        assert!(!a.ptr_eq(&b));
        assert!(b.borrow().other.as_ref().unwrap().ptr_eq(&a));
    }

    #[test]
    fn classes_retargeted_to_values() {
        let mut codec = Codec::default();
        let buddy = Gc::new(Buddy {
            name: "solo".into(),
            other: None,
        });
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.write(&buddy).unwrap();
            ser.write(&buddy).unwrap();
            ser.finish().unwrap();
        }

        // The old name leads nowhere; only the forced target reads it.
        codec.add_migration(|m: &mut TypeMigration<'_>| {
            if m.name() == Some("Buddy") {
                m.set_namespace(Some("weft.tests.gone"));
                m.set_name("Nobody");
                m.set_target_of::<Card>();
            }
        });
        let mut input = &bytes[..];
        let mut de = codec.deserializer(&mut input).unwrap();
        let card = de.read::<Card>().unwrap();
        assert_eq!(card.name, "solo");
        assert!(card.other.is_none());
        let err = de.read::<Card>().unwrap_err();
        assert!(matches!(err, DecodeError::DetachedReference(0)));
    }
}
