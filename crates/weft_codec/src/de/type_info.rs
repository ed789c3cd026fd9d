use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::cell::OnceCell;
use core::fmt;

use super::Deserializer;
use super::migration::TypeMigration;
use crate::driver::DriverRef;
use crate::error::DecodeError;
use crate::types::{LocalType, Ty, TypeRegistry};
use crate::wire::{MAX_TYPE_NESTING, TypeTag};

// -----------------------------------------------------------------------------
// WrittenLevel

/// One written base of a class, from the direct base up.
#[derive(Debug, Clone)]
pub struct WrittenLevel {
    namespace: Option<Rc<str>>,
    name: Rc<str>,
    assembly: Option<Rc<str>>,
    version: i32,
}

impl WrittenLevel {
    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }

    #[inline]
    pub fn version(&self) -> i32 {
        self.version
    }
}

// -----------------------------------------------------------------------------
// ReadTypeInfo

/// A decoded type descriptor.
///
/// Nodes are shared: a descriptor written once and referenced again later in
/// the stream decodes to the same node. Apart from the driver memoized on it,
/// a node is immutable once migration hooks have run.
pub struct ReadTypeInfo {
    tag: TypeTag,
    driver_name: Option<Rc<str>>,
    version: i32,
    namespace: Option<Rc<str>>,
    name: Option<Rc<str>>,
    assembly: Option<Rc<str>>,
    rank: u8,
    arity: u8,
    items: Box<[Rc<ReadTypeInfo>]>,
    /// Levels from this node down to its deepest leaf.
    height: u32,
    bases: Box<[WrittenLevel]>,
    pub(super) target_namespace: Option<Rc<str>>,
    pub(super) target_name: Option<Rc<str>>,
    pub(super) target: Option<&'static LocalType>,
    pub(super) renamed_namespace: bool,
    pub(super) renamed: bool,
    local_ty: Option<Ty>,
    driver: OnceCell<(usize, DriverRef)>,
}

impl ReadTypeInfo {
    fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            driver_name: None,
            version: -1,
            namespace: None,
            name: None,
            assembly: None,
            rank: 0,
            arity: 0,
            items: Box::default(),
            height: 1,
            bases: Box::default(),
            target_namespace: None,
            target_name: None,
            target: None,
            renamed_namespace: false,
            renamed: false,
            local_ty: None,
            driver: OnceCell::new(),
        }
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Name of the driver that wrote the payload.
    #[inline]
    pub fn driver_name(&self) -> Option<&str> {
        self.driver_name.as_deref()
    }

    /// Written version, `-1` when untracked.
    #[inline]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }

    /// The namespace local types are looked up with, after migration.
    #[inline]
    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// The name local types are looked up with, after migration.
    #[inline]
    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    /// The local type forced by a migration hook.
    #[inline]
    pub fn forced_target(&self) -> Option<&'static LocalType> {
        self.target
    }

    /// Rank of an array descriptor.
    #[inline]
    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// Arity of an open generic descriptor.
    #[inline]
    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// The element of a nullable, pointer, by-ref or array descriptor, or the
    /// underlying type of an enum.
    #[inline]
    pub fn element(&self) -> Option<&ReadTypeInfo> {
        match self.tag {
            TypeTag::Plain(_) | TypeTag::Closed(_) | TypeTag::Open => None,
            _ => self.items.first().map(|item| &**item),
        }
    }

    /// Arguments of a closed generic, or the single element of the other
    /// structural descriptors.
    #[inline]
    pub fn items(&self) -> &[Rc<ReadTypeInfo>] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Result<&ReadTypeInfo, DecodeError> {
        self.items
            .get(index)
            .map(|item| &**item)
            .ok_or_else(|| DecodeError::TypeMismatch {
                expected: alloc::format!("a descriptor with {} arguments", index + 1),
                found: self.to_string(),
            })
    }

    /// Written bases, from the direct base up to the one below the root.
    #[inline]
    pub fn bases(&self) -> &[WrittenLevel] {
        &self.bases
    }

    /// Returns `true` if instances of the written type were tracked by identity.
    #[inline]
    pub fn is_reference_kind(&self) -> bool {
        self.tag.class_kind().is_some_and(|kind| kind.is_reference())
    }

    /// The local type this descriptor maps to, if every name in it resolves.
    #[inline]
    pub fn local_ty(&self) -> Option<&Ty> {
        self.local_ty.as_ref()
    }

    pub fn local_type(&self) -> Option<&'static LocalType> {
        self.target
            .or_else(|| TypeRegistry::global().find_local(self.local_ty.as_ref()?))
    }

    pub(crate) fn cached_driver(&self, local: &'static LocalType) -> Option<DriverRef> {
        let (addr, driver) = self.driver.get()?;
        (*addr == local.addr()).then(|| driver.clone())
    }

    pub(crate) fn cache_driver(&self, local: &'static LocalType, driver: &DriverRef) {
        let _ = self.driver.set((local.addr(), driver.clone()));
    }

    fn resolve_local_ty(&self) -> Option<Ty> {
        if let Some(target) = self.target {
            return Some(target.ty().clone());
        }
        let element = || self.items.first()?.local_ty().cloned();
        let named = || {
            let name = self.target_name()?;
            TypeRegistry::global().find_named(self.target_namespace(), name)
        };
        Some(match self.tag {
            TypeTag::Nullable => Ty::nullable(element()?),
            TypeTag::Pointer => Ty::pointer(element()?),
            TypeTag::ByRef => Ty::by_ref(element()?),
            TypeTag::Array => Ty::array(self.rank, element()?),
            TypeTag::Open | TypeTag::Enum | TypeTag::Plain(_) => Ty::named(named()?),
            TypeTag::Closed(_) => {
                let definition = named()?;
                if usize::from(definition.arity()) != self.items.len() {
                    return None;
                }
                let args: Option<Vec<Ty>> = self.items.iter().map(|item| item.local_ty().cloned()).collect();
                Ty::generic(definition, args?)
            }
        })
    }
}

impl fmt::Display for ReadTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = self.items.first();
        match (self.tag, element) {
            (TypeTag::Nullable, Some(inner)) => write!(f, "{inner}?"),
            (TypeTag::Pointer, Some(inner)) => write!(f, "{inner}*"),
            (TypeTag::ByRef, Some(inner)) => write!(f, "{inner}&"),
            (TypeTag::Array, Some(inner)) => {
                write!(f, "{inner}[")?;
                for _ in 1..self.rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            _ => {
                if let Some(namespace) = &self.namespace {
                    write!(f, "{namespace}.")?;
                }
                f.write_str(self.name.as_deref().unwrap_or("?"))?;
                if let TypeTag::Closed(_) = self.tag {
                    f.write_str("<")?;
                    for (index, item) in self.items.iter().enumerate() {
                        if index > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ReadTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTypeInfo")
            .field("written", &alloc::format!("{self}"))
            .field("driver", &self.driver_name)
            .field("version", &self.version)
            .field("local", &self.local_ty)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Decoding

impl Deserializer<'_> {
    /// Reads a descriptor, or a back-reference to one read before.
    pub(crate) fn read_type_info(&mut self) -> Result<Rc<ReadTypeInfo>, DecodeError> {
        let index = self.source.read_u32_varint()?;
        if index > 0 {
            let index = index - 1;
            return self
                .types
                .get(index as usize)
                .cloned()
                .ok_or(DecodeError::InvalidTypeIndex(index));
        }
        if self.type_depth >= MAX_TYPE_NESTING {
            return Err(DecodeError::TypeNestingTooDeep(MAX_TYPE_NESTING));
        }
        self.type_depth += 1;
        let info = self.read_descriptor();
        self.type_depth -= 1;
        let info = Rc::new(info?);
        self.types.push(info.clone());
        Ok(info)
    }

    fn read_descriptor(&mut self) -> Result<ReadTypeInfo, DecodeError> {
        let tag = self.source.read_tag()?;
        let mut info = ReadTypeInfo::new(tag);
        match tag {
            TypeTag::Nullable | TypeTag::Pointer | TypeTag::ByRef => {
                info.items = Box::new([self.read_type_info()?]);
            }
            TypeTag::Array => {
                info.rank = self.source.read_u8()?;
                info.items = Box::new([self.read_type_info()?]);
            }
            TypeTag::Open => {
                self.read_names(&mut info)?;
                info.arity = self.source.read_u8()?;
            }
            TypeTag::Enum => {
                self.read_driver(&mut info)?;
                self.read_names(&mut info)?;
                info.items = Box::new([self.read_type_info()?]);
            }
            TypeTag::Plain(_) => {
                self.read_driver(&mut info)?;
                self.read_names(&mut info)?;
                info.bases = self.read_bases()?;
            }
            TypeTag::Closed(_) => {
                self.read_driver(&mut info)?;
                self.read_names(&mut info)?;
                let count = self.source.read_u8()?;
                let items: Result<Vec<_>, _> = (0..count).map(|_| self.read_type_info()).collect();
                info.items = items?.into_boxed_slice();
                info.bases = self.read_bases()?;
            }
        }

        // Back-references can stack nodes without nesting the reads.
        info.height = 1 + info.items.iter().map(|item| item.height).max().unwrap_or(0);
        if info.height > MAX_TYPE_NESTING {
            return Err(DecodeError::TypeNestingTooDeep(MAX_TYPE_NESTING));
        }

        info.target_namespace = info.namespace.clone();
        info.target_name = info.name.clone();
        for hook in self.codec.migrations() {
            hook(&mut TypeMigration::new(&mut info));
        }
        info.local_ty = info.resolve_local_ty();
        Ok(info)
    }

    fn read_driver(&mut self, info: &mut ReadTypeInfo) -> Result<(), DecodeError> {
        info.driver_name = self.read_shared()?;
        info.version = self.source.read_smallint()?;
        Ok(())
    }

    fn read_names(&mut self, info: &mut ReadTypeInfo) -> Result<(), DecodeError> {
        info.namespace = self.read_shared()?;
        info.name = self.read_shared()?;
        info.assembly = self.read_shared()?;
        Ok(())
    }

    fn read_bases(&mut self) -> Result<Box<[WrittenLevel]>, DecodeError> {
        let mut bases = Vec::new();
        while self.source.read_bool()? {
            let version = self.source.read_smallint()?;
            let namespace = self.read_shared()?;
            let name = self.read_shared()?.ok_or(DecodeError::InvalidSharedString(0))?;
            let assembly = self.read_shared()?;
            bases.push(WrittenLevel {
                namespace,
                name,
                assembly,
                version,
            });
        }
        Ok(bases.into_boxed_slice())
    }

    /// Reads an interned string: `0` is none, `1` a new string, `n` the
    /// string interned `n - 2`th.
    pub(crate) fn read_shared(&mut self) -> Result<Option<Rc<str>>, DecodeError> {
        match self.source.read_u32_varint()? {
            0 => Ok(None),
            1 => {
                let value: Rc<str> = self.source.read_str()?.into();
                self.strings.push(value.clone());
                Ok(Some(value))
            }
            n => self
                .strings
                .get(n as usize - 2)
                .cloned()
                .map(Some)
                .ok_or(DecodeError::InvalidSharedString(n - 2)),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use std::thread;

    use crate::error::DecodeError;
    use crate::wire::MAX_TYPE_NESTING;
    use crate::{Codec, Portable};

    #[test]
    fn nested_descriptors_are_bounded() {
        let mut bytes = vec![1, 0, 2];
        for _ in 0..200_000 {
            bytes.extend_from_slice(&[0, b'N']);
        }
        // A small stack would overflow long before the input is exhausted.
        let err = thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || Codec::default().from_bytes::<i32>(&bytes).unwrap_err())
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(err, DecodeError::TypeNestingTooDeep(MAX_TYPE_NESTING)));
        assert!(err.is_malformed());
    }

    #[test]
    fn stacked_back_references_are_bounded() {
        let codec = Codec::default();
        let mut bytes = Vec::new();
        {
            let mut ser = codec.serializer(&mut bytes).unwrap();
            ser.write_type(<Option<i32> as Portable>::local().ty()).unwrap();
            ser.finish().unwrap();
        }
        // Descriptors 0 and 1 are `i32` and `i32?`; each new one wraps the last.
        let wrappers = MAX_TYPE_NESTING as u8;
        for index in 1..=wrappers {
            bytes.extend_from_slice(&[6, 0, b'N', index + 1]);
        }

        let mut input = &bytes[..];
        let mut de = codec.deserializer(&mut input).unwrap();
        de.read_type().unwrap();
        for _ in 2..MAX_TYPE_NESTING {
            let result = de.read_type();
            assert!(!matches!(result, Err(DecodeError::TypeNestingTooDeep(_))));
        }
        let err = de.read_type().unwrap_err();
        assert!(matches!(err, DecodeError::TypeNestingTooDeep(_)));
    }
}
