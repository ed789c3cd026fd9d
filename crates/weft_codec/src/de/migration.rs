use alloc::rc::Rc;
use alloc::sync::Arc;

use super::ReadTypeInfo;
use crate::portable::Portable;
use crate::types::LocalType;
use crate::wire::TypeTag;

/// A reader-side hook run on every decoded descriptor before its local type
/// is resolved. Hooks run in registration order.
pub type MigrationHook = Arc<dyn Fn(&mut TypeMigration<'_>) + Send + Sync>;

/// Mutable view of a descriptor that is being decoded.
///
/// Each kind of rewrite is applied at most once per descriptor: the first hook
/// to rename the namespace, rename the type or force a target wins, and later
/// attempts return `false`.
///
/// ```
/// use weft_codec::{Codec, TypeMigration};
///
/// let mut codec = Codec::default();
/// codec.add_migration(|m: &mut TypeMigration<'_>| {
///     if m.namespace() == Some("legacy.shapes") {
///         m.set_namespace(Some("shapes"));
///     }
/// });
/// ```
pub struct TypeMigration<'a> {
    info: &'a mut ReadTypeInfo,
}

impl<'a> TypeMigration<'a> {
    pub(super) fn new(info: &'a mut ReadTypeInfo) -> Self {
        Self { info }
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.info.tag()
    }

    /// The written namespace.
    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.info.namespace()
    }

    /// The written name.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.info.name()
    }

    #[inline]
    pub fn driver_name(&self) -> Option<&str> {
        self.info.driver_name()
    }

    #[inline]
    pub fn version(&self) -> i32 {
        self.info.version()
    }

    /// The arguments of a closed generic, already migrated.
    #[inline]
    pub fn items(&self) -> &[Rc<ReadTypeInfo>] {
        self.info.items()
    }

    /// Looks the local type up under another namespace.
    pub fn set_namespace(&mut self, namespace: Option<&str>) -> bool {
        if self.info.renamed_namespace {
            return false;
        }
        self.info.renamed_namespace = true;
        self.info.target_namespace = namespace.map(Rc::from);
        true
    }

    /// Looks the local type up under another name.
    pub fn set_name(&mut self, name: &str) -> bool {
        if self.info.renamed {
            return false;
        }
        self.info.renamed = true;
        self.info.target_name = Some(Rc::from(name));
        true
    }

    /// Reads the descriptor as `local`, whatever its name.
    pub fn set_target(&mut self, local: &'static LocalType) -> bool {
        if self.info.target.is_some() {
            return false;
        }
        log::debug!("reading `{}` as `{local}`", self.info);
        self.info.target = Some(local);
        true
    }

    #[inline]
    pub fn set_target_of<T: Portable>(&mut self) -> bool {
        self.set_target(T::local())
    }
}

// -----------------------------------------------------------------------------
// Tests
