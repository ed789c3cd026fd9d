use alloc::string::String;
use core::fmt;
use core::hash::{Hash, Hasher};

use bitflags::bitflags;

// -----------------------------------------------------------------------------
// TypeFlags

bitflags! {
    /// Properties of a [`NamedType`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u8 {
        /// Copied by value; never tracked by identity.
        const VALUE = 1 << 0;
        /// A class that cannot be derived from.
        const SEALED = 1 << 1;
        const INTERFACE = 1 << 2;
        const ENUM = 1 << 3;
        /// A two-argument dictionary-like generic; its first argument is a key.
        const KEYED = 1 << 4;
    }
}

// -----------------------------------------------------------------------------
// ClassKind

/// Kind letter of a named type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Sealed,
    Interface,
    Value,
}

impl ClassKind {
    /// Returns `true` for the kinds whose instances are tracked by identity.
    #[inline]
    pub const fn is_reference(self) -> bool {
        !matches!(self, Self::Value)
    }

    pub(crate) const fn letter(self) -> u8 {
        match self {
            Self::Class => b'C',
            Self::Sealed => b'S',
            Self::Interface => b'I',
            Self::Value => b'V',
        }
    }

    pub(crate) const fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'C' => Some(Self::Class),
            b'S' => Some(Self::Sealed),
            b'I' => Some(Self::Interface),
            b'V' => Some(Self::Value),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// NamedType

/// The name under which a type is written, declared as a `static`.
///
/// Named types are the vocabulary of the wire format: a written descriptor
/// carries the namespace, name and assembly of a `NamedType`, the reader maps
/// them back to its own declarations by namespace and name.
///
/// A reference type may derive from another one with [`with_base`](Self::with_base);
/// the chain ends at the universal root and is written with every descriptor.
///
/// # Examples
///
/// ```
/// use weft_codec::types::NamedType;
///
/// static ANIMAL: NamedType = NamedType::new(Some("zoo"), "Animal").with_version(2);
/// static DOG: NamedType = NamedType::new(Some("zoo"), "Dog").with_base(&ANIMAL).sealed();
///
/// assert_eq!(DOG.full_name(), "zoo.Dog");
/// assert_eq!(DOG.base().map(|b| b.version()), Some(2));
/// assert!(DOG.class_kind().is_reference());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NamedType {
    namespace: Option<&'static str>,
    name: &'static str,
    assembly: Option<&'static str>,
    flags: TypeFlags,
    arity: u8,
    version: i32,
    base: Option<&'static NamedType>,
}

impl NamedType {
    /// Version of types that do not track versions.
    pub const UNVERSIONED: i32 = -1;

    /// A reference type with no base, version and assembly.
    pub const fn new(namespace: Option<&'static str>, name: &'static str) -> Self {
        Self {
            namespace,
            name,
            assembly: None,
            flags: TypeFlags::empty(),
            arity: 0,
            version: Self::UNVERSIONED,
            base: None,
        }
    }

    pub const fn value(mut self) -> Self {
        self.flags = self.flags.union(TypeFlags::VALUE);
        self
    }

    pub const fn sealed(mut self) -> Self {
        self.flags = self.flags.union(TypeFlags::SEALED);
        self
    }

    pub const fn interface(mut self) -> Self {
        self.flags = self.flags.union(TypeFlags::INTERFACE);
        self
    }

    pub const fn enumeration(mut self) -> Self {
        self.flags = self.flags.union(TypeFlags::ENUM.union(TypeFlags::VALUE));
        self
    }

    /// Marks a generic definition taking `arity` arguments.
    pub const fn generic(mut self, arity: u8) -> Self {
        self.arity = arity;
        self
    }

    /// Marks a dictionary-like generic definition whose first argument is a key.
    pub const fn keyed(mut self) -> Self {
        self.flags = self.flags.union(TypeFlags::KEYED);
        self
    }

    pub const fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub const fn with_base(mut self, base: &'static NamedType) -> Self {
        self.base = Some(base);
        self
    }

    pub const fn with_assembly(mut self, assembly: &'static str) -> Self {
        self.assembly = Some(assembly);
        self
    }

    #[inline]
    pub const fn namespace(&self) -> Option<&'static str> {
        self.namespace
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn assembly(&self) -> Option<&'static str> {
        self.assembly
    }

    #[inline]
    pub const fn flags(&self) -> TypeFlags {
        self.flags
    }

    #[inline]
    pub const fn arity(&self) -> u8 {
        self.arity
    }

    #[inline]
    pub const fn version(&self) -> i32 {
        self.version
    }

    #[inline]
    pub const fn base(&self) -> Option<&'static NamedType> {
        self.base
    }

    #[inline]
    pub const fn is_enum(&self) -> bool {
        self.flags.contains(TypeFlags::ENUM)
    }

    #[inline]
    pub const fn is_keyed(&self) -> bool {
        self.flags.contains(TypeFlags::KEYED)
    }

    #[inline]
    pub const fn is_generic(&self) -> bool {
        self.arity > 0
    }

    pub const fn class_kind(&self) -> ClassKind {
        if self.flags.contains(TypeFlags::VALUE) {
            ClassKind::Value
        } else if self.flags.contains(TypeFlags::INTERFACE) {
            ClassKind::Interface
        } else if self.flags.contains(TypeFlags::SEALED) {
            ClassKind::Sealed
        } else {
            ClassKind::Class
        }
    }

    /// `namespace.name`, or `name` alone without a namespace.
    pub fn full_name(&self) -> String {
        match self.namespace {
            Some(ns) => alloc::format!("{ns}.{}", self.name),
            None => String::from(self.name),
        }
    }

    /// Compares namespace and name, the key used to match written types.
    #[inline]
    pub fn has_name(&self, namespace: Option<&str>, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    /// Iterates from `self` up to the last declared base.
    pub fn ancestry(&'static self) -> impl Iterator<Item = &'static NamedType> {
        core::iter::successors(Some(self), |ty| ty.base)
    }
}

/// Identity is the namespace, name and arity. The assembly is informational.
impl PartialEq for NamedType {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name && self.arity == other.arity
    }
}

impl Eq for NamedType {}

impl Hash for NamedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.name.hash(state);
        self.arity.hash(state);
    }
}

impl fmt::Display for NamedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = self.namespace {
            write!(f, "{ns}.")?;
        }
        f.write_str(self.name)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{ClassKind, NamedType};

    static BASE: NamedType = NamedType::new(Some("weft.tests.named"), "Base").with_version(3);
    static LEAF: NamedType = NamedType::new(Some("weft.tests.named"), "Leaf")
        .with_base(&BASE)
        .with_assembly("tests")
        .sealed();

    #[test]
    fn builders() {
        assert_eq!(LEAF.class_kind(), ClassKind::Sealed);
        assert_eq!(LEAF.assembly(), Some("tests"));
        assert_eq!(LEAF.version(), NamedType::UNVERSIONED);
        let chain: Vec<_> = LEAF.ancestry().map(NamedType::name).collect();
        assert_eq!(chain, ["Leaf", "Base"]);

        static COUNT: NamedType = NamedType::new(None, "Count").enumeration();
        assert!(COUNT.is_enum());
        assert_eq!(COUNT.class_kind(), ClassKind::Value);
        assert_eq!(COUNT.to_string(), "Count");
    }

    #[test]
    fn identity_ignores_assembly() {
        let a = NamedType::new(Some("ns"), "T").with_assembly("a");
        let b = NamedType::new(Some("ns"), "T").with_assembly("b");
        assert_eq!(a, b);
        assert_ne!(a, NamedType::new(Some("ns"), "T").generic(1));
        assert!(a.has_name(Some("ns"), "T"));
        assert!(!a.has_name(None, "T"));
    }
}
