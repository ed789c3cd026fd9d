use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use super::{ClassKind, NamedType};

// -----------------------------------------------------------------------------
// Ty

/// A structural type description: the shape the wire format can express.
///
/// `Ty` is cheap to clone and compares structurally, so it serves as a cache key
/// across sessions and threads.
///
/// ```
/// use weft_codec::types::Ty;
/// use weft_codec::Portable;
///
/// let ty = <Vec<Option<i32>> as Portable>::local().ty().clone();
/// assert_eq!(ty.to_string(), "weft.List`1<i32?>");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ty(Arc<TyKind>);

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
    /// A non-generic type, or an open generic definition.
    Named(&'static NamedType),
    /// A generic definition with every argument bound.
    Generic(&'static NamedType, Box<[Ty]>),
    /// An array of the given rank.
    Array(u8, Ty),
    Nullable(Ty),
    Pointer(Ty),
    ByRef(Ty),
    /// An unbound generic parameter. Cannot be written.
    Param(&'static str),
}

impl Ty {
    #[inline]
    pub fn new(kind: TyKind) -> Self {
        Self(Arc::new(kind))
    }

    #[inline]
    pub fn named(ty: &'static NamedType) -> Self {
        Self::new(TyKind::Named(ty))
    }

    pub fn generic(definition: &'static NamedType, args: impl IntoIterator<Item = Ty>) -> Self {
        Self::new(TyKind::Generic(definition, args.into_iter().collect()))
    }

    #[inline]
    pub fn array(rank: u8, element: Ty) -> Self {
        Self::new(TyKind::Array(rank, element))
    }

    #[inline]
    pub fn nullable(inner: Ty) -> Self {
        Self::new(TyKind::Nullable(inner))
    }

    #[inline]
    pub fn pointer(inner: Ty) -> Self {
        Self::new(TyKind::Pointer(inner))
    }

    #[inline]
    pub fn by_ref(inner: Ty) -> Self {
        Self::new(TyKind::ByRef(inner))
    }

    #[inline]
    pub fn param(name: &'static str) -> Self {
        Self::new(TyKind::Param(name))
    }

    #[inline]
    pub fn kind(&self) -> &TyKind {
        &self.0
    }

    /// The named type or generic definition at the top of this type.
    pub fn named_type(&self) -> Option<&'static NamedType> {
        match self.kind() {
            TyKind::Named(ty) | TyKind::Generic(ty, _) => Some(*ty),
            _ => None,
        }
    }

    #[inline]
    pub fn is_nullable(&self) -> bool {
        matches!(self.kind(), TyKind::Nullable(_))
    }

    /// Strips one nullable wrapper.
    pub fn non_nullable(&self) -> &Ty {
        match self.kind() {
            TyKind::Nullable(inner) => inner,
            _ => self,
        }
    }

    /// Returns `true` if instances of this type are tracked by identity.
    pub fn is_reference(&self) -> bool {
        match self.kind() {
            TyKind::Named(ty) | TyKind::Generic(ty, _) => {
                !ty.is_enum() && ty.class_kind() != ClassKind::Value
            }
            TyKind::Array(..) | TyKind::Nullable(_) => false,
            TyKind::Pointer(_) | TyKind::ByRef(_) | TyKind::Param(_) => false,
        }
    }

    /// Returns `true` if an unbound parameter occurs anywhere in this type.
    pub fn has_params(&self) -> bool {
        match self.kind() {
            TyKind::Param(_) => true,
            TyKind::Named(_) => false,
            TyKind::Generic(_, args) => args.iter().any(Ty::has_params),
            TyKind::Array(_, inner)
            | TyKind::Nullable(inner)
            | TyKind::Pointer(inner)
            | TyKind::ByRef(inner) => inner.has_params(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TyKind::Named(ty) => fmt::Display::fmt(ty, f),
            TyKind::Generic(ty, args) => {
                write!(f, "{ty}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            TyKind::Array(1, inner) => write!(f, "{inner}[]"),
            TyKind::Array(rank, inner) => {
                write!(f, "{inner}[")?;
                for _ in 1..*rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            TyKind::Nullable(inner) => write!(f, "{inner}?"),
            TyKind::Pointer(inner) => write!(f, "{inner}*"),
            TyKind::ByRef(inner) => write!(f, "{inner}&"),
            TyKind::Param(name) => f.write_str(name),
        }
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::Ty;
    use crate::types::NamedType;

    static PAIR: NamedType = NamedType::new(Some("weft.tests.ty"), "Pair`2").generic(2).value();
    static ITEM: NamedType = NamedType::new(Some("weft.tests.ty"), "Item");

    #[test]
    fn structural_identity() {
        let a = Ty::generic(&PAIR, [Ty::named(&ITEM), Ty::nullable(Ty::named(&ITEM))]);
        let b = Ty::generic(&PAIR, [Ty::named(&ITEM), Ty::nullable(Ty::named(&ITEM))]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "weft.tests.ty.Pair`2<weft.tests.ty.Item, weft.tests.ty.Item?>");
        assert!(!a.is_reference());
        assert!(Ty::named(&ITEM).is_reference());
        assert_eq!(Ty::array(2, Ty::named(&ITEM)).to_string(), "weft.tests.ty.Item[,]");
    }

    #[test]
    fn params() {
        let open = Ty::generic(&PAIR, [Ty::param("K"), Ty::named(&ITEM)]);
        assert!(open.has_params());
        assert!(!Ty::nullable(Ty::named(&ITEM)).has_params());
        assert_eq!(Ty::nullable(Ty::named(&ITEM)).non_nullable(), &Ty::named(&ITEM));
    }
}
