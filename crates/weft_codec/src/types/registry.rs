use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::TypeId;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use weft_utils::TypeIdMap;
use weft_utils::hash::{FixedHashState, HashMap};

use super::{LocalType, NamedType, Ty};

// -----------------------------------------------------------------------------
// TypeRegistry

/// Process-wide index of local types.
///
/// Local types register themselves on first use. The reader looks written types up
/// here by namespace and name, so a type must have been used (or registered) in
/// the reading process before it can be read polymorphically. With the
/// `auto_register` feature, types declared through the crate macros are
/// registered on the first name lookup.
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    locals: TypeIdMap<&'static LocalType>,
    by_ty: HashMap<Ty, &'static LocalType>,
    by_name: HashMap<&'static str, Vec<&'static NamedType>>,
}

static GLOBAL: TypeRegistry = TypeRegistry::new();

impl TypeRegistry {
    const fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                locals: TypeIdMap::new(),
                by_ty: HashMap::with_hasher(FixedHashState),
                by_name: HashMap::with_hasher(FixedHashState),
            }),
        }
    }

    #[inline]
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn local_or_insert<T: 'static>(
        &self,
        init: impl FnOnce() -> LocalType,
    ) -> &'static LocalType {
        let id = TypeId::of::<T>();
        if let Some(local) = self.read().locals.get(&id).copied() {
            return local;
        }

        let local = init();

        let mut inner = self.write();
        if let Some(local) = inner.locals.get(&id).copied() {
            return local;
        }
        let local: &'static LocalType = Box::leak(Box::new(local));
        inner.locals.get_or_insert(id, || local);
        inner.by_ty.entry(local.ty().clone()).or_insert(local);
        if let Some(named) = local.ty().named_type() {
            inner.insert_names(named);
        }
        log::trace!("registered local type `{}` as `{}`", local.type_name(), local.ty());
        local
    }

    /// Makes `named` and its bases resolvable by name without a local type.
    pub fn register_named(&self, named: &'static NamedType) {
        self.write().insert_names(named);
    }

    /// Finds the named type declared as `namespace.name`.
    ///
    /// Returns `None` if no such type is registered, or if several different
    /// types were declared under that name.
    pub fn find_named(&self, namespace: Option<&str>, name: &str) -> Option<&'static NamedType> {
        self.ensure_auto_registered();
        let inner = self.read();
        let mut found = inner
            .by_name
            .get(name)?
            .iter()
            .copied()
            .filter(|ty| ty.namespace() == namespace);
        let first = found.next()?;
        if found.next().is_some() {
            log::warn!("type name `{first}` is ambiguous and cannot be resolved");
            return None;
        }
        Some(first)
    }

    /// Finds the local type described by `ty`.
    pub fn find_local(&self, ty: &Ty) -> Option<&'static LocalType> {
        self.ensure_auto_registered();
        self.read().by_ty.get(ty).copied()
    }

    /// Number of local types created so far.
    pub fn len(&self) -> usize {
        self.read().locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_auto_registered(&self) {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            crate::driver::register_definitions(self);
            #[cfg(feature = "auto_register")]
            {
                let mut count = 0_usize;
                for entry in inventory::iter::<AutoRegistration> {
                    (entry.0)();
                    count += 1;
                }
                log::debug!("auto-registered {count} types");
            }
        });
    }
}

impl Inner {
    fn insert_names(&mut self, named: &'static NamedType) {
        for ty in named.ancestry() {
            let list = self.by_name.entry(ty.name()).or_default();
            if list.iter().any(|known| *known == ty) {
                continue;
            }
            if list.iter().any(|known| known.namespace() == ty.namespace()) {
                log::warn!("type name `{ty}` is declared more than once");
            }
            list.push(ty);
        }
    }
}

// -----------------------------------------------------------------------------
// AutoRegistration

/// Static registration of a type, collected with `inventory`.
#[cfg(feature = "auto_register")]
pub struct AutoRegistration(fn());

#[cfg(feature = "auto_register")]
impl AutoRegistration {
    pub const fn new(register: fn()) -> Self {
        Self(register)
    }
}

#[cfg(feature = "auto_register")]
inventory::collect!(AutoRegistration);

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::TypeRegistry;
    use crate::Portable;
    use crate::types::{NamedType, Ty};

    static FIRST: NamedType = NamedType::new(Some("weft.tests.registry"), "Twin");
    static SECOND: NamedType = NamedType::new(Some("weft.tests.registry"), "Twin").generic(1);
    static ALONE: NamedType = NamedType::new(Some("weft.tests.registry"), "Alone");

    #[test]
    fn lookup_by_name_and_ty() {
        let registry = TypeRegistry::global();
        registry.register_named(&ALONE);
        let found = registry.find_named(Some("weft.tests.registry"), "Alone").unwrap();
        assert!(core::ptr::eq(found, &ALONE));
        assert!(registry.find_named(None, "Alone").is_none());

        let local = <Option<i64> as Portable>::local();
        let ty = Ty::nullable(<i64 as Portable>::local().ty().clone());
        let found = registry.find_local(&ty).unwrap();
        assert!(core::ptr::eq(found, local));
    }

    #[test]
    fn ambiguous_names_do_not_resolve() {
        let registry = TypeRegistry::global();
        registry.register_named(&FIRST);
        registry.register_named(&SECOND);
        assert!(registry.find_named(Some("weft.tests.registry"), "Twin").is_none());
    }
}
