//! Layered convention: a class hierarchy written one level at a time, root first.
//!
//! Every level of the hierarchy implements [`Layer`] and only reads and writes
//! the fields it declares itself. The driver of the most derived class walks
//! the chain once, checks it, and then calls each level in order against the
//! single instance.
//!
//! ```text
//!  write / read order        struct nesting
//!  ------------------        --------------
//!  1. Shape                  Square { base: Rect { base: Shape { .. }, .. }, .. }
//!  2. Rect
//!  3. Square
//! ```
//!
//! A level may opt into the destroyable contract. From the first destroyable
//! level down, every level must opt in too. Once an instance is destroyed, the
//! levels below the first destroyable one are neither written nor read.

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::{Any, type_name};
use core::cell::RefCell;
use core::marker::PhantomData;

use crate::codec::Codec;
use crate::de::{Deserializer, ReadTypeInfo};
use crate::driver::{Driver, DriverFlags, DriverRef, expect_value};
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::object::{Class, Gc, OBJECT, Obj, Root};
use crate::resolve::{Resolver, pure_cache};
use crate::ser::Serializer;
use crate::types::{Convention, LocalType, NamedType, Shape};

// -----------------------------------------------------------------------------
// Layer

/// One level of a layered hierarchy.
///
/// `Base` is the level this one derives from, [`Root`] for the topmost level.
pub trait Layer: Default + 'static {
    type Base: Layer;

    /// The chain ends here. Only [`Root`] sets this.
    #[doc(hidden)]
    const IS_ROOT: bool = false;

    /// Instances of this level and every level below it may be destroyed.
    const DESTROYABLE: bool = false;

    /// The name of this level. Its declared base must be the base level's name.
    fn level_type() -> &'static NamedType;

    /// The embedded base level, `None` when deriving from [`Root`].
    fn base(&self) -> Option<&Self::Base>;

    fn base_mut(&mut self) -> Option<&mut Self::Base>;

    /// Writes the fields declared by this level.
    fn write_layer(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError>;

    /// Reads the fields declared by this level, written with `version`.
    fn read_layer(&mut self, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError>;

    fn is_destroyed(&self) -> bool {
        self.base().is_some_and(Layer::is_destroyed)
    }
}

impl Layer for Root {
    type Base = Root;

    const IS_ROOT: bool = true;

    fn level_type() -> &'static NamedType {
        &OBJECT
    }

    fn base(&self) -> Option<&Root> {
        None
    }

    fn base_mut(&mut self) -> Option<&mut Root> {
        None
    }

    fn write_layer(&self, _: &mut Serializer<'_>) -> Result<(), EncodeError> {
        Ok(())
    }

    fn read_layer(&mut self, _: &mut Deserializer<'_>, _: i32) -> Result<(), DecodeError> {
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// DynLayer

/// Object-safe view of a [`Layer`], used to walk from a leaf to its bases.
trait DynLayer {
    fn dyn_base(&self) -> Option<&dyn DynLayer>;

    fn dyn_base_mut(&mut self) -> Option<&mut dyn DynLayer>;

    fn dyn_write(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError>;

    fn dyn_read(&mut self, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError>;
}

impl<L: Layer> DynLayer for L {
    fn dyn_base(&self) -> Option<&dyn DynLayer> {
        self.base().map(|base| base as &dyn DynLayer)
    }

    fn dyn_base_mut(&mut self) -> Option<&mut dyn DynLayer> {
        self.base_mut().map(|base| base as &mut dyn DynLayer)
    }

    fn dyn_write(&self, w: &mut Serializer<'_>) -> Result<(), EncodeError> {
        self.write_layer(w)
    }

    fn dyn_read(&mut self, r: &mut Deserializer<'_>, version: i32) -> Result<(), DecodeError> {
        self.read_layer(r, version)
    }
}

/// The level `up` steps above `leaf`.
fn ancestor(leaf: &dyn DynLayer, up: usize) -> Option<&dyn DynLayer> {
    let mut level = leaf;
    for _ in 0..up {
        level = level.dyn_base()?;
    }
    Some(level)
}

fn ancestor_mut(leaf: &mut dyn DynLayer, up: usize) -> Option<&mut dyn DynLayer> {
    let mut level = leaf;
    for _ in 0..up {
        level = level.dyn_base_mut()?;
    }
    Some(level)
}

// -----------------------------------------------------------------------------
// Levels

#[derive(Debug, Clone, Copy)]
struct Level {
    named: &'static NamedType,
    destroyable: bool,
}

/// Collects the levels of `L`, leaf first.
fn collect<L: Layer>(out: &mut Vec<Level>) {
    if L::IS_ROOT {
        return;
    }
    out.push(Level {
        named: L::level_type(),
        destroyable: L::DESTROYABLE,
    });
    collect::<L::Base>(out);
}

/// The levels of `T` root first, and the index of the first destroyable one.
fn levels<T: Layer>() -> Result<(Box<[Level]>, Option<usize>), ConfigError> {
    let mut levels = Vec::new();
    collect::<T>(&mut levels);
    levels.reverse();

    let leaf = T::level_type();
    let mut boundary = None;
    for (index, level) in levels.iter().enumerate() {
        let parent = index.checked_sub(1).map(|parent| levels[parent].named);
        let declared = level.named.base().filter(|base| **base != OBJECT);
        if declared != parent {
            return Err(ConfigError::BrokenHierarchy {
                leaf: leaf.full_name(),
                level: level.named.full_name(),
                declared: declared.map_or_else(|| OBJECT.full_name(), NamedType::full_name),
                actual: parent.map_or_else(|| OBJECT.full_name(), NamedType::full_name),
            });
        }
        match boundary {
            None if level.destroyable => boundary = Some(index),
            Some(first) if !level.destroyable => {
                return Err(ConfigError::BrokenDestroyableChain {
                    leaf: leaf.full_name(),
                    level: level.named.full_name(),
                    ancestor: levels[first].named.full_name(),
                });
            }
            _ => {}
        }
    }
    Ok((levels.into_boxed_slice(), boundary))
}

// -----------------------------------------------------------------------------
// LayeredDriver

/// Writes and fills a class of a layered hierarchy.
pub struct LayeredDriver<T> {
    levels: Box<[Level]>,
    boundary: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

/// Builds the layered driver of `T`, checking its hierarchy.
pub fn layered_driver<T: Class + Layer>() -> Result<DriverRef, ConfigError> {
    let (levels, boundary) = levels::<T>()?;
    log::debug!(
        "layered driver for `{}` with {} levels",
        T::level_type(),
        levels.len()
    );
    Ok(Arc::new(LayeredDriver::<T> {
        levels,
        boundary,
        _marker: PhantomData,
    }))
}

impl<T: Class + Layer> LayeredDriver<T> {
    /// Number of levels to process: all of them, or up to the first destroyable
    /// one for a destroyed instance.
    fn extent(&self, destroyed: bool) -> usize {
        match self.boundary {
            Some(boundary) if destroyed => boundary + 1,
            _ => self.levels.len(),
        }
    }

    /// Written `(name, version)` of each level, root first.
    fn written_levels(info: &ReadTypeInfo) -> Vec<(&str, i32)> {
        let mut written: Vec<_> = info
            .bases()
            .iter()
            .rev()
            .map(|base| (base.name(), base.version()))
            .collect();
        written.push((info.target_name().unwrap_or_default(), info.version()));
        written
    }

    fn check_chain(&self, written: &[(&str, i32)]) -> Result<(), DecodeError> {
        let matches = written.len() == self.levels.len()
            && written
                .iter()
                .zip(&self.levels)
                .all(|((name, _), level)| *name == level.named.name());
        if matches {
            return Ok(());
        }
        let written: Vec<_> = written.iter().map(|(name, _)| *name).collect();
        let local: Vec<_> = self.levels.iter().map(|level| level.named.name()).collect();
        Err(DecodeError::HierarchyMismatch {
            ty: T::level_type().full_name(),
            written: written.join(" > "),
            local: local.join(" > "),
        })
    }
}

impl<T: Class + Layer> Driver for LayeredDriver<T> {
    fn name(&self) -> Option<&str> {
        Some("Layered")
    }

    fn version(&self) -> i32 {
        T::level_type().version()
    }

    fn flags(&self) -> DriverFlags {
        DriverFlags::OBJECT | DriverFlags::DEFERRABLE
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let cell = expect_value::<RefCell<T>>(self, value)?;
        let leaf = cell.try_borrow().map_err(|_| {
            EncodeError::Custom(alloc::format!("`{}` is mutably borrowed", type_name::<T>()))
        })?;
        let count = self.levels.len();
        for index in 0..self.extent(Layer::is_destroyed(&*leaf)) {
            let level = ancestor(&*leaf, count - 1 - index).ok_or_else(|| {
                EncodeError::Custom(alloc::format!(
                    "level `{}` of `{}` is missing",
                    self.levels[index].named,
                    type_name::<T>()
                ))
            })?;
            level.dyn_write(w)?;
        }
        Ok(())
    }

    fn create(&self, _: &ReadTypeInfo) -> Result<Obj, DecodeError> {
        Ok(Gc::new(T::default()).to_obj())
    }

    fn fill(&self, r: &mut Deserializer<'_>, obj: &Obj, info: &ReadTypeInfo) -> Result<(), DecodeError> {
        let written = Self::written_levels(info);
        self.check_chain(&written)?;

        let cell = obj
            .as_any()
            .downcast_ref::<RefCell<T>>()
            .ok_or_else(|| DecodeError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                found: obj.local_type().ty().to_string(),
            })?;
        let mut leaf = cell.try_borrow_mut().map_err(|_| {
            DecodeError::Custom(alloc::format!("`{}` is borrowed while filled", type_name::<T>()))
        })?;

        let count = self.levels.len();
        for (index, level) in self.levels.iter().enumerate() {
            let (_, version) = written[index];
            if level.named.version() >= 0 && version > level.named.version() {
                return Err(DecodeError::VersionTooNew {
                    ty: level.named.full_name(),
                    written: version,
                    supported: level.named.version(),
                });
            }
            let layer = ancestor_mut(&mut *leaf, count - 1 - index).ok_or_else(|| {
                DecodeError::Custom(alloc::format!("level `{}` of `{}` is missing", level.named, type_name::<T>()))
            })?;
            layer.dyn_read(r, version)?;
            if Some(index) == self.boundary && Layer::is_destroyed(&*leaf) {
                break;
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// LayeredResolver

/// Resolves classes declared with the layered convention.
pub struct LayeredResolver;

impl Resolver for LayeredResolver {
    fn resolve_write(&self, _: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        match local.shape() {
            Shape::Object(shape) if shape.convention == Convention::Layered => {
                pure_cache().get_or_try_insert(local, shape.build).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn resolve_read(
        &self,
        cx: &Codec,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        if info.driver_name() != Some("Layered") {
            return Ok(None);
        }
        Ok(self.resolve_write(cx, local)?)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::{Layer, layered_driver};
    use crate::error::{ConfigError, DecodeError};
    use crate::tests::{Crooked, LAYER_LOG, Rect, Shape, Square, Unruly};
    use crate::{Codec, Gc, Obj, TypeMigration};

    fn take_log() -> Vec<&'static str> {
        LAYER_LOG.with_borrow_mut(core::mem::take)
    }

    fn square(side: u32) -> Square {
        let mut square = Square::default();
        square.side = side;
        square.base.width = side;
        square.base.base.label = "sq".into();
        square
    }

    #[test]
    fn levels_run_root_first() {
        let codec = Codec::default();
        let value = Gc::new(square(4));
        take_log();

        let bytes = codec.to_bytes(&value).unwrap();
        assert_eq!(take_log(), ["write Shape", "write Rect", "write Square"]);

        let back = codec.from_bytes::<Gc<Square>>(&bytes).unwrap();
        assert_eq!(take_log(), ["read Shape", "read Rect", "read Square"]);
        let back = back.borrow();
        assert_eq!(back.side, 4);
        assert_eq!(back.base.width, 4);
        assert_eq!(back.base.base.label, "sq");
    }

    #[test]
    fn destroyed_instances_stop_at_the_boundary() {
        let codec = Codec::default();
        let mut value = square(9);
        value.base.base.destroyed = true;
        let value = Gc::new(value);
        take_log();

        let mut seen = Vec::new();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.on_destroyed(|obj: &Obj| seen.push(obj.clone()));
            ser.write(&value).unwrap();
            ser.write(&value).unwrap();
        }
        assert_eq!(seen.len(), 1);
        assert_eq!(take_log(), ["write Shape", "write Rect"]);

        let back = codec.from_bytes::<Gc<Square>>(&bytes).unwrap();
        assert_eq!(take_log(), ["read Shape", "read Rect"]);
        let back = back.borrow();
        assert!(back.is_destroyed());
        assert_eq!(back.side, 0);
        assert_eq!(back.base.width, 9);
    }

    #[test]
    fn broken_hierarchies_are_rejected() {
        let err = layered_driver::<Unruly>().err().unwrap();
        assert!(matches!(err, ConfigError::BrokenDestroyableChain { .. }));
        let err = layered_driver::<Crooked>().err().unwrap();
        assert!(matches!(err, ConfigError::BrokenHierarchy { .. }));
    }

    #[test]
    fn reshaped_hierarchy_is_a_fault() {
        let mut codec = Codec::default();
        codec.add_migration(|m: &mut TypeMigration<'_>| {
            if m.name() == Some("Rect") {
                m.set_target_of::<Gc<Square>>();
            }
        });
        let bytes = codec.to_bytes(&Gc::new(Rect::default())).unwrap();
        let err = codec.from_bytes::<Gc<Square>>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::HierarchyMismatch { ref written, ref local, .. }
                if written == "Shape > Rect" && local == "Shape > Rect > Square"
        ));
        assert_eq!(Shape::level_type().name(), "Shape");
    }
}
