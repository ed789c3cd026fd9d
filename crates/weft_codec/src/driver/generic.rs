//! Drivers synthesized for built-in generic shapes: arrays, lists, queues,
//! stacks, sets, dictionaries, key/value pairs, tuples and nullables.
//!
//! A composite driver is assembled from one driver per type argument, so the
//! same code serves every instantiation. It is cached per codec, keyed by the
//! local type and the identity of its argument drivers.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use std::collections::{HashMap, HashSet};

use super::{BasicKind, CacheLevel, Driver, DriverRef, driver_id, expect_value, read_item, write_item};
use crate::codec::Codec;
use crate::de::{Deserializer, ReadTypeInfo};
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::known::KNOWN;
use crate::object::Obj;
use crate::portable::Portable;
use crate::resolve::{ContextKey, Resolver};
use crate::ser::Serializer;
use crate::types::{CompositeShape, LocalType, NamedType, NullableShape, Shape, Ty, TypeRegistry};
use crate::wire::TypeTag;

// -----------------------------------------------------------------------------
// Definitions

pub static LIST: NamedType = NamedType::new(Some("weft"), "List`1").generic(1).value();
pub static QUEUE: NamedType = NamedType::new(Some("weft"), "Queue`1").generic(1).value();
pub static STACK: NamedType = NamedType::new(Some("weft"), "Stack`1").generic(1).value();
pub static SET: NamedType = NamedType::new(Some("weft"), "HashSet`1").generic(1).value();
pub static SORTED_SET: NamedType = NamedType::new(Some("weft"), "SortedSet`1").generic(1).value();
pub static DICTIONARY: NamedType = NamedType::new(Some("weft"), "Dictionary`2")
    .generic(2)
    .keyed()
    .value();
pub static SORTED_DICTIONARY: NamedType = NamedType::new(Some("weft"), "SortedDictionary`2")
    .generic(2)
    .keyed()
    .value();
pub static KEY_VALUE: NamedType = NamedType::new(Some("weft"), "KeyValue`2").generic(2).value();
pub static TUPLE2: NamedType = NamedType::new(Some("weft"), "Tuple`2").generic(2).value();
pub static TUPLE3: NamedType = NamedType::new(Some("weft"), "Tuple`3").generic(3).value();
pub static TUPLE4: NamedType = NamedType::new(Some("weft"), "Tuple`4").generic(4).value();

// -----------------------------------------------------------------------------
// Composite

/// The built-in generic shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composite {
    /// A one-dimensional array; written with an array descriptor.
    Array,
    List,
    Queue,
    /// Written bottom to top.
    Stack,
    Dictionary,
    SortedDictionary,
    Set,
    SortedSet,
    KeyValue,
    Tuple(u8),
}

/// Shapes whose payloads are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeGroup {
    Sequence,
    Stack,
    Map,
    Set,
    KeyValue,
    Tuple(u8),
}

impl Composite {
    const DEFINED: [Composite; 11] = [
        Self::List,
        Self::Queue,
        Self::Stack,
        Self::Dictionary,
        Self::SortedDictionary,
        Self::Set,
        Self::SortedSet,
        Self::KeyValue,
        Self::Tuple(2),
        Self::Tuple(3),
        Self::Tuple(4),
    ];

    /// The generic definition written for this shape. Arrays have none.
    pub fn definition(self) -> Option<&'static NamedType> {
        Some(match self {
            Self::Array => return None,
            Self::List => &LIST,
            Self::Queue => &QUEUE,
            Self::Stack => &STACK,
            Self::Dictionary => &DICTIONARY,
            Self::SortedDictionary => &SORTED_DICTIONARY,
            Self::Set => &SET,
            Self::SortedSet => &SORTED_SET,
            Self::KeyValue => &KEY_VALUE,
            Self::Tuple(2) => &TUPLE2,
            Self::Tuple(3) => &TUPLE3,
            Self::Tuple(4) => &TUPLE4,
            Self::Tuple(_) => return None,
        })
    }

    pub fn group(self) -> CompositeGroup {
        match self {
            Self::Array | Self::List | Self::Queue => CompositeGroup::Sequence,
            Self::Stack => CompositeGroup::Stack,
            Self::Dictionary | Self::SortedDictionary => CompositeGroup::Map,
            Self::Set | Self::SortedSet => CompositeGroup::Set,
            Self::KeyValue => CompositeGroup::KeyValue,
            Self::Tuple(arity) => CompositeGroup::Tuple(arity),
        }
    }

    /// Driver name of this shape.
    pub fn name(self) -> &'static str {
        match self {
            Self::Array => "Array",
            Self::List => "List",
            Self::Queue => "Queue",
            Self::Stack => "Stack",
            Self::Dictionary => "Dictionary",
            Self::SortedDictionary => "SortedDictionary",
            Self::Set => "HashSet",
            Self::SortedSet => "SortedSet",
            Self::KeyValue => "KeyValue",
            Self::Tuple(_) => "Tuple",
        }
    }

    /// The shape a descriptor was written with, after migration renames.
    pub fn written(info: &ReadTypeInfo) -> Option<Self> {
        match info.tag() {
            TypeTag::Array if info.rank() == 1 => Some(Self::Array),
            TypeTag::Closed(_) => {
                let (namespace, name) = (info.target_namespace(), info.target_name()?);
                Self::DEFINED.into_iter().find(|kind| {
                    kind.definition().is_some_and(|def| def.has_name(namespace, name))
                })
            }
            _ => None,
        }
    }
}

fn composite_local<C: 'static>(
    kind: Composite,
    args: &[&'static LocalType],
    build: fn(&[DriverRef]) -> DriverRef,
) -> LocalType {
    let ty = match kind.definition() {
        Some(def) => Ty::generic(def, args.iter().map(|arg| arg.ty().clone())),
        None => Ty::array(1, args[0].ty().clone()),
    };
    let shape = CompositeShape {
        kind,
        args: args.into(),
        build,
    };
    LocalType::new::<C>(ty, Shape::Composite(shape))
}

/// Encodes `item` on its own, in a scratch session.
///
/// Hashed collections write their items sorted by these bytes, so equal
/// collections produce equal streams whatever their iteration order.
fn encoded<T: 'static>(codec: &Codec, driver: &DriverRef, item: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    let mut scratch = Serializer::new(codec, &mut bytes)?;
    write_item(&mut scratch, driver, item)?;
    scratch.finish()?;
    Ok(bytes)
}

/// `items` in the order of their encoding under `driver`.
fn sorted_by_encoding<'v, T: 'static, E>(
    codec: &Codec,
    driver: &DriverRef,
    items: impl Iterator<Item = (&'v T, E)>,
) -> Result<Vec<(&'v T, E)>, EncodeError> {
    let mut keyed = Vec::new();
    for (item, extra) in items {
        keyed.push((encoded(codec, driver, item)?, item, extra));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, item, extra)| (item, extra)).collect())
}

#[inline]
fn level_of(drivers: &[DriverRef]) -> CacheLevel {
    drivers
        .iter()
        .fold(CacheLevel::Context, |level, driver| level.combine(driver.cache_level()))
}

// -----------------------------------------------------------------------------
// Sequences

/// A collection written as a length and its items in iteration order.
pub trait Sequence: Sized + 'static {
    type Item: Portable;
    const KIND: Composite;
    /// Iteration order is arbitrary; items are written sorted instead.
    const HASHED: bool = false;

    fn len(&self) -> usize;

    fn items(&self) -> impl Iterator<Item = &Self::Item>;

    fn from_items(items: Vec<Self::Item>) -> Self;
}

pub struct SeqDriver<C> {
    item: DriverRef,
    level: CacheLevel,
    _marker: PhantomData<fn() -> C>,
}

fn build_seq<C: Sequence>(drivers: &[DriverRef]) -> DriverRef {
    Arc::new(SeqDriver::<C> {
        item: drivers[0].clone(),
        level: level_of(drivers),
        _marker: PhantomData,
    })
}

impl<C: Sequence> Driver for SeqDriver<C> {
    fn name(&self) -> Option<&str> {
        Some(C::KIND.name())
    }

    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let seq = expect_value::<C>(self, value)?;
        w.write_len(seq.len())?;
        if C::HASHED {
            let items = sorted_by_encoding(w.codec(), &self.item, seq.items().map(|item| (item, ())))?;
            for (item, ()) in items {
                write_item(w, &self.item, item)?;
            }
            return Ok(());
        }
        for item in seq.items() {
            write_item(w, &self.item, item)?;
        }
        Ok(())
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let len = r.read_len()?;
        let item_info = info.item(0)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(read_item::<C::Item>(r, &self.item, item_info)?);
        }
        Ok(Box::new(C::from_items(items)))
    }
}

macro_rules! impl_sequence {
    ($kind:ident, [$($generics:tt)*] $ty:ty, $item:ty) => {
        impl<$($generics)*> Portable for $ty {
            fn local() -> &'static LocalType {
                LocalType::of::<Self>(|| {
                    composite_local::<Self>(Composite::$kind, &[<$item as Portable>::local()], build_seq::<Self>)
                })
            }
        }
    };
}

impl<T: Portable> Sequence for Vec<T> {
    type Item = T;
    const KIND: Composite = Composite::List;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        items
    }
}

impl<T: Portable> Sequence for VecDeque<T> {
    type Item = T;
    const KIND: Composite = Composite::Queue;

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        items.into()
    }
}

impl<T: Portable> Sequence for Box<[T]> {
    type Item = T;
    const KIND: Composite = Composite::Array;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        items.into_boxed_slice()
    }
}

impl<T: Portable> Sequence for Stack<T> {
    type Item = T;
    const KIND: Composite = Composite::Stack;

    fn len(&self) -> usize {
        self.items.len()
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T: Portable + Ord> Sequence for BTreeSet<T> {
    type Item = T;
    const KIND: Composite = Composite::SortedSet;

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }
}

impl<T, S> Sequence for HashSet<T, S>
where
    T: Portable + Eq + Hash,
    S: BuildHasher + Default + 'static,
{
    type Item = T;
    const KIND: Composite = Composite::Set;
    const HASHED: bool = true;

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn items(&self) -> impl Iterator<Item = &T> {
        self.iter()
    }

    fn from_items(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }
}

impl_sequence!(List, [T: Portable] Vec<T>, T);
impl_sequence!(Queue, [T: Portable] VecDeque<T>, T);
impl_sequence!(Array, [T: Portable] Box<[T]>, T);
impl_sequence!(Stack, [T: Portable] Stack<T>, T);
impl_sequence!(SortedSet, [T: Portable + Ord] BTreeSet<T>, T);
impl_sequence!(Set, [T: Portable + Eq + Hash, S: BuildHasher + Default + 'static] HashSet<T, S>, T);

// -----------------------------------------------------------------------------
// Stack

/// A last-in first-out collection, written bottom to top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack<T> {
    items: Vec<T>,
}

impl<T> Stack<T> {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, value: T) {
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates from the bottom to the top.
    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for Stack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// Maps

/// A dictionary written as a length and its entries in iteration order.
pub trait Mapping: Sized + 'static {
    type Key: Portable;
    type Value: Portable;
    const KIND: Composite;
    /// Iteration order is arbitrary; entries are written sorted by key instead.
    const HASHED: bool = false;

    fn len(&self) -> usize;

    fn entries(&self) -> impl Iterator<Item = (&Self::Key, &Self::Value)>;

    fn from_entries(entries: Vec<(Self::Key, Self::Value)>) -> Self;
}

pub struct MapDriver<C> {
    key: DriverRef,
    value: DriverRef,
    level: CacheLevel,
    _marker: PhantomData<fn() -> C>,
}

fn build_map<C: Mapping>(drivers: &[DriverRef]) -> DriverRef {
    Arc::new(MapDriver::<C> {
        key: drivers[0].clone(),
        value: drivers[1].clone(),
        level: level_of(drivers),
        _marker: PhantomData,
    })
}

impl<C: Mapping> Driver for MapDriver<C> {
    fn name(&self) -> Option<&str> {
        Some(C::KIND.name())
    }

    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        let map = expect_value::<C>(self, value)?;
        w.write_len(map.len())?;
        if C::HASHED {
            for (key, value) in sorted_by_encoding(w.codec(), &self.key, map.entries())? {
                write_item(w, &self.key, key)?;
                write_item(w, &self.value, value)?;
            }
            return Ok(());
        }
        for (key, value) in map.entries() {
            write_item(w, &self.key, key)?;
            write_item(w, &self.value, value)?;
        }
        Ok(())
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        let len = r.read_len()?;
        let (key_info, value_info) = (info.item(0)?, info.item(1)?);
        let mut entries = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = read_item::<C::Key>(r, &self.key, key_info)?;
            let value = read_item::<C::Value>(r, &self.value, value_info)?;
            entries.push((key, value));
        }
        Ok(Box::new(C::from_entries(entries)))
    }
}

impl<K: Portable + Ord, V: Portable> Mapping for BTreeMap<K, V> {
    type Key = K;
    type Value = V;
    const KIND: Composite = Composite::SortedDictionary;

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> {
        self.iter()
    }

    fn from_entries(entries: Vec<(K, V)>) -> Self {
        entries.into_iter().collect()
    }
}

impl<K, V, S> Mapping for HashMap<K, V, S>
where
    K: Portable + Eq + Hash,
    V: Portable,
    S: BuildHasher + Default + 'static,
{
    type Key = K;
    type Value = V;
    const KIND: Composite = Composite::Dictionary;
    const HASHED: bool = true;

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> {
        self.iter()
    }

    fn from_entries(entries: Vec<(K, V)>) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Portable + Ord, V: Portable> Portable for BTreeMap<K, V> {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            composite_local::<Self>(
                Composite::SortedDictionary,
                &[K::local(), V::local()],
                build_map::<Self>,
            )
        })
    }
}

impl<K, V, S> Portable for HashMap<K, V, S>
where
    K: Portable + Eq + Hash,
    V: Portable,
    S: BuildHasher + Default + 'static,
{
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            composite_local::<Self>(Composite::Dictionary, &[K::local(), V::local()], build_map::<Self>)
        })
    }
}

// -----------------------------------------------------------------------------
// Tuples & KeyValue

/// A fixed number of heterogeneous items.
pub trait TupleItems: Sized + 'static {
    const KIND: Composite;

    fn write_items(&self, w: &mut Serializer<'_>, drivers: &[DriverRef]) -> Result<(), EncodeError>;

    fn read_items(
        r: &mut Deserializer<'_>,
        drivers: &[DriverRef],
        info: &ReadTypeInfo,
    ) -> Result<Self, DecodeError>;
}

pub struct TupleDriver<C> {
    items: Box<[DriverRef]>,
    level: CacheLevel,
    _marker: PhantomData<fn() -> C>,
}

fn build_tuple<C: TupleItems>(drivers: &[DriverRef]) -> DriverRef {
    Arc::new(TupleDriver::<C> {
        items: drivers.into(),
        level: level_of(drivers),
        _marker: PhantomData,
    })
}

impl<C: TupleItems> Driver for TupleDriver<C> {
    fn name(&self) -> Option<&str> {
        Some(C::KIND.name())
    }

    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        expect_value::<C>(self, value)?.write_items(w, &self.items)
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        Ok(Box::new(C::read_items(r, &self.items, info)?))
    }
}

macro_rules! impl_tuple {
    ($arity:literal => $($name:ident $idx:tt),+) => {
        impl<$($name: Portable),+> Portable for ($($name,)+) {
            fn local() -> &'static LocalType {
                LocalType::of::<Self>(|| {
                    composite_local::<Self>(
                        Composite::Tuple($arity),
                        &[$(<$name as Portable>::local()),+],
                        build_tuple::<Self>,
                    )
                })
            }
        }

        impl<$($name: Portable),+> TupleItems for ($($name,)+) {
            const KIND: Composite = Composite::Tuple($arity);

            fn write_items(&self, w: &mut Serializer<'_>, drivers: &[DriverRef]) -> Result<(), EncodeError> {
                $( write_item(w, &drivers[$idx], &self.$idx)?; )+
                Ok(())
            }

            fn read_items(
                r: &mut Deserializer<'_>,
                drivers: &[DriverRef],
                info: &ReadTypeInfo,
            ) -> Result<Self, DecodeError> {
                Ok(($( read_item::<$name>(r, &drivers[$idx], info.item($idx)?)?, )+))
            }
        }
    };
}

impl_tuple!(2 => A 0, B 1);
impl_tuple!(3 => A 0, B 1, C 2);
impl_tuple!(4 => A 0, B 1, C 2, D 3);

/// A key and its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    pub const fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K: Portable, V: Portable> Portable for KeyValue<K, V> {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            composite_local::<Self>(Composite::KeyValue, &[K::local(), V::local()], build_tuple::<Self>)
        })
    }
}

impl<K: Portable, V: Portable> TupleItems for KeyValue<K, V> {
    const KIND: Composite = Composite::KeyValue;

    fn write_items(&self, w: &mut Serializer<'_>, drivers: &[DriverRef]) -> Result<(), EncodeError> {
        write_item(w, &drivers[0], &self.key)?;
        write_item(w, &drivers[1], &self.value)
    }

    fn read_items(
        r: &mut Deserializer<'_>,
        drivers: &[DriverRef],
        info: &ReadTypeInfo,
    ) -> Result<Self, DecodeError> {
        let key = read_item::<K>(r, &drivers[0], info.item(0)?)?;
        let value = read_item::<V>(r, &drivers[1], info.item(1)?)?;
        Ok(Self { key, value })
    }
}

// -----------------------------------------------------------------------------
// Nullable

/// Writes an optional value type as a presence flag and the value.
pub struct NullableDriver<T> {
    inner: DriverRef,
    level: CacheLevel,
    _marker: PhantomData<fn() -> T>,
}

pub(crate) fn nullable_driver<T: Portable>(inner: DriverRef) -> DriverRef {
    Arc::new(NullableDriver::<T> {
        level: CacheLevel::Context.combine(inner.cache_level()),
        inner,
        _marker: PhantomData,
    })
}

impl<T: Portable> Driver for NullableDriver<T> {
    fn name(&self) -> Option<&str> {
        Some("Nullable")
    }

    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn write(&self, w: &mut Serializer<'_>, value: &dyn Any) -> Result<(), EncodeError> {
        match expect_value::<Option<T>>(self, value)? {
            None => w.write_bool(false),
            Some(value) => {
                w.write_bool(true)?;
                write_item(w, &self.inner, value)
            }
        }
    }

    fn read(&self, r: &mut Deserializer<'_>, info: &ReadTypeInfo) -> Result<Box<dyn Any>, DecodeError> {
        if r.read_bool()? {
            let value = read_item::<T>(r, &self.inner, info.item(0)?)?;
            Ok(Box::new(Some(value)))
        } else {
            Ok(Box::new(None::<T>))
        }
    }
}

// -----------------------------------------------------------------------------
// GenericResolver

/// Synthesizes composite and nullable drivers from their argument drivers.
///
/// Declines when any argument has no driver, so that a later resolver may
/// still handle the type.
pub struct GenericResolver;

fn cached(
    cx: &Codec,
    local: &'static LocalType,
    drivers: &[DriverRef],
    build: impl FnOnce() -> DriverRef,
) -> DriverRef {
    if drivers.iter().any(|driver| driver.cache_level() == CacheLevel::Never) {
        return build();
    }
    let key = ContextKey::new(local, drivers.iter().map(driver_id));
    cx.context_cache().get_or_insert(key, build)
}

impl Resolver for GenericResolver {
    fn resolve_write(&self, cx: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        match local.shape() {
            Shape::Composite(shape) => {
                let keyed = shape.kind.definition().is_some_and(NamedType::is_keyed);
                if keyed && matches!(shape.args[0].shape(), Shape::Nullable(_)) {
                    return Err(ConfigError::NullableKey(local.ty().to_string()));
                }
                let mut drivers = Vec::with_capacity(shape.args.len());
                for arg in &shape.args {
                    match cx.resolve_write(arg)? {
                        Some(driver) => drivers.push(driver),
                        None => return Ok(None),
                    }
                }
                Ok(Some(cached(cx, local, &drivers, || (shape.build)(&drivers))))
            }
            Shape::Nullable(NullableShape {
                inner,
                build: Some(build),
            }) => {
                let Some(driver) = cx.resolve_write(inner)? else {
                    return Ok(None);
                };
                let drivers = [driver];
                Ok(Some(cached(cx, local, &drivers, || build(drivers[0].clone()))))
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
        match local.shape() {
            Shape::Composite(shape) => {
                let Some(written) = Composite::written(info) else {
                    return Ok(None);
                };
                if written.group() != shape.kind.group() {
                    log::debug!("`{info}` is not compatible with `{local}`");
                    return Ok(None);
                }
                let items = info.items();
                if items.len() != shape.args.len() {
                    return Ok(None);
                }
                let mut drivers = Vec::with_capacity(items.len());
                for (item, arg) in items.iter().zip(&shape.args) {
                    match cx.resolve_read(item, arg)? {
                        Some(driver) => drivers.push(driver),
                        None => return Ok(None),
                    }
                }
                Ok(Some(cached(cx, local, &drivers, || (shape.build)(&drivers))))
            }
            Shape::Nullable(NullableShape {
                inner,
                build: Some(build),
            }) => {
                if info.tag() != TypeTag::Nullable {
                    return Ok(None);
                }
                let Some(element) = info.element() else {
                    return Ok(None);
                };
                let Some(driver) = cx.resolve_read(element, inner)? else {
                    return Ok(None);
                };
                let drivers = [driver];
                Ok(Some(cached(cx, local, &drivers, || build(drivers[0].clone()))))
            }
            _ => Ok(None),
        }
    }
}

/// Makes the built-in names resolvable before any of their Rust types is used,
/// so that open generic descriptors read back without an instantiation.
pub(crate) fn register_definitions(registry: &TypeRegistry) {
    for kind in Composite::DEFINED {
        if let Some(def) = kind.definition() {
            registry.register_named(def);
        }
    }
    for kind in BasicKind::ALL {
        kind.local();
    }
    <Obj as Portable>::local();
    <Ty as Portable>::local();
    registry.register_named(&KNOWN);
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
    use alloc::string::String;
    use alloc::vec::Vec;
    use std::collections::{HashMap, HashSet};

    use super::{KeyValue, Stack};
    use crate::error::{ConfigError, EncodeError};
    use crate::{Codec, Portable};

    #[test]
    fn collections_round_trip() {
        let codec = Codec::default();

        let list = vec![Some(1_i32), None, Some(3)];
        codec.check_idempotence(&list).unwrap();
        let bytes = codec.to_bytes(&list).unwrap();
        assert_eq!(codec.from_bytes::<Vec<Option<i32>>>(&bytes).unwrap(), list);

        let mut map = BTreeMap::new();
        map.insert(String::from("a"), vec![1_u8, 2]);
        map.insert(String::from("b"), Vec::new());
        let bytes = codec.to_bytes(&map).unwrap();
        assert_eq!(codec.from_bytes::<BTreeMap<String, Vec<u8>>>(&bytes).unwrap(), map);

        let stack: Stack<u16> = [1, 2, 3].into_iter().collect();
        let bytes = codec.to_bytes(&stack).unwrap();
        let mut back = codec.from_bytes::<Stack<u16>>(&bytes).unwrap();
        assert_eq!(back.pop(), Some(3));

        let tuple = (1_u8, String::from("x"), KeyValue::new(false, 2.5_f64));
        let bytes = codec.to_bytes(&tuple).unwrap();
        assert_eq!(codec.from_bytes::<(u8, String, KeyValue<bool, f64>)>(&bytes).unwrap(), tuple);
    }

    #[test]
    fn hashed_collections_are_written_in_a_stable_order() {
        let codec = Codec::default();

        let map: HashMap<u32, u32> = (0..64).map(|n| (n * 7919, n)).collect();
        let set: HashSet<u32> = (0..64).map(|n| n * 104_729).collect();
        for _ in 0..8 {
            let bytes = codec.check_idempotence(&map).unwrap();
            assert_eq!(codec.from_bytes::<HashMap<u32, u32>>(&bytes).unwrap(), map);
            let bytes = codec.check_idempotence(&set).unwrap();
            assert_eq!(codec.from_bytes::<HashSet<u32>>(&bytes).unwrap(), set);
        }

        // Equal contents built in another order give the same bytes.
        let reversed: HashMap<u32, u32> = (0..64).rev().map(|n| (n * 7919, n)).collect();
        assert_eq!(codec.to_bytes(&map).unwrap(), codec.to_bytes(&reversed).unwrap());

        let names: HashMap<String, Vec<u8>> = ["delta", "alpha", "charlie", "bravo"]
            .into_iter()
            .map(|name| (String::from(name), name.as_bytes().to_vec()))
            .collect();
        let bytes = codec.check_idempotence(&names).unwrap();
        assert_eq!(codec.from_bytes::<HashMap<String, Vec<u8>>>(&bytes).unwrap(), names);

        // Sorted shapes keep their own order and read hashed data alike.
        let sorted: BTreeSet<u32> = set.iter().copied().collect();
        let bytes = codec.check_idempotence(&sorted).unwrap();
        assert_eq!(codec.from_bytes::<HashSet<u32>>(&bytes).unwrap(), set);
    }

    #[test]
    fn compatible_shapes_substitute() {
        let codec = Codec::default();
        let bytes = codec.to_bytes(&vec![3_i32, 1, 2]).unwrap();

        let array = codec.from_bytes::<Box<[i64]>>(&bytes).unwrap();
        assert_eq!(&*array, &[3, 1, 2]);
        let queue = codec.from_bytes::<VecDeque<i32>>(&bytes).unwrap();
        assert_eq!(queue.front(), Some(&3));

        let set: BTreeSet<u8> = [5, 6].into_iter().collect();
        let bytes = codec.to_bytes(&set).unwrap();
        let err = codec.from_bytes::<Vec<u8>>(&bytes).unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn dictionaries_need_non_nullable_keys() {
        let codec = Codec::default();
        let mut map: HashMap<Option<u8>, u8> = HashMap::new();
        map.insert(None, 1);
        let err = codec.to_bytes(&map).unwrap_err();
        assert!(matches!(err, EncodeError::Config(ConfigError::NullableKey(_))));
    }

    #[test]
    fn generic_shapes_are_synthesized_per_instantiation() {
        let a = <Vec<KeyValue<u8, String>> as Portable>::local();
        let b = <Vec<KeyValue<u8, i32>> as Portable>::local();
        assert_ne!(a.ty(), b.ty());
        assert_eq!(a.ty().to_string(), "weft.List`1<weft.KeyValue`2<u8, string>>");
    }
}
