//! Process-wide well-known objects.
//!
//! A known object is written as its registration key only, and the reader
//! substitutes its own instance registered under the same key. This is how
//! singletons such as default comparers survive a round trip without being copied.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::any::{Any, type_name};
use core::ops::Deref;
use std::sync::{PoisonError, RwLock};

use weft_utils::hash::{FixedHashState, HashMap};

use crate::driver::slot_driver;
use crate::error::{ConfigError, DecodeError};
use crate::portable::{Portable, Read, View};
use crate::types::{LocalType, NamedType, Shape, Ty};

/// Known objects are written under this name when they appear as a generic argument.
pub static KNOWN: NamedType = NamedType::new(Some("weft"), "Known").sealed();

type Shared = Arc<dyn Any + Send + Sync>;

#[inline]
fn addr(value: &Shared) -> usize {
    Arc::as_ptr(value).cast::<()>() as usize
}

// -----------------------------------------------------------------------------
// Known

/// A handle to a registered known object.
pub struct Known<T>(Arc<T>);

impl<T: Any + Send + Sync> Known<T> {
    #[inline]
    pub fn arc(&self) -> &Arc<T> {
        &self.0
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Known<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Known<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Known<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Known").field(&*self.0).finish()
    }
}

impl<T: Any + Send + Sync> Portable for Known<T> {
    fn local() -> &'static LocalType {
        LocalType::of::<Self>(|| {
            LocalType::new::<Self>(Ty::named(&KNOWN), Shape::Known).with_slot(slot_driver::<Self>)
        })
    }

    fn view(&self) -> View<'_> {
        View::Known(self.0.clone(), type_name::<T>())
    }

    fn from_read(read: Read) -> Result<Self, DecodeError> {
        match read {
            Read::Known(value) => value.downcast::<T>().map(Known).map_err(|_| {
                DecodeError::TypeMismatch {
                    expected: type_name::<T>().to_string(),
                    found: "a known object of another type".to_string(),
                }
            }),
            Read::Null => Err(DecodeError::UnexpectedNull {
                expected: type_name::<T>().to_string(),
            }),
            other => Err(DecodeError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                found: other.describe(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// KnownObjects

/// The bijection between keys and known instances.
pub struct KnownObjects {
    inner: RwLock<Table>,
}

struct Table {
    by_key: HashMap<String, Shared>,
    by_addr: HashMap<usize, String>,
}

static GLOBAL: KnownObjects = KnownObjects {
    inner: RwLock::new(Table {
        by_key: HashMap::with_hasher(FixedHashState),
        by_addr: HashMap::with_hasher(FixedHashState),
    }),
};

impl KnownObjects {
    /// The process-wide table.
    ///
    /// With the `auto_register` feature, objects declared with
    /// [`known_object!`](crate::known_object) are registered on first access.
    pub fn global() -> &'static KnownObjects {
        #[cfg(feature = "auto_register")]
        {
            static ONCE: std::sync::Once = std::sync::Once::new();
            ONCE.call_once(|| {
                for entry in inventory::iter::<KnownRegistration> {
                    if let Err(error) = GLOBAL.insert(entry.key.to_string(), (entry.make)()) {
                        log::error!("static known object `{}` rejected: {error}", entry.key);
                    }
                }
            });
        }
        &GLOBAL
    }

    /// Registers `value` under `key`.
    ///
    /// Registering the same instance under the same key again is a no-op.
    pub fn register<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: Arc<T>,
    ) -> Result<Known<T>, ConfigError> {
        self.insert(key.into(), value.clone())?;
        Ok(Known(value))
    }

    fn insert(&self, key: String, value: Shared) -> Result<(), ConfigError> {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let addr = addr(&value);
        if let Some(existing) = table.by_key.get(&key) {
            if self::addr(existing) == addr {
                return Ok(());
            }
            return Err(ConfigError::DuplicateKnownKey(key));
        }
        if let Some(existing) = table.by_addr.get(&addr) {
            return Err(ConfigError::DuplicateKnownInstance(existing.clone()));
        }
        log::debug!("registered known object `{key}`");
        table.by_addr.insert(addr, key.clone());
        table.by_key.insert(key, value);
        Ok(())
    }

    /// The object registered under `key`, if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Known<T>> {
        self.lookup(key)?.downcast::<T>().ok().map(Known)
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<Shared> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.by_key.get(key).cloned()
    }

    /// The key `value` is registered under.
    pub(crate) fn key_of(&self, value: &Shared) -> Option<String> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.by_addr.get(&addr(value)).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -----------------------------------------------------------------------------
// KnownRegistration

/// Static registration of a known object, collected with `inventory`.
#[cfg(feature = "auto_register")]
pub struct KnownRegistration {
    key: &'static str,
    make: fn() -> Shared,
}

#[cfg(feature = "auto_register")]
impl KnownRegistration {
    pub const fn new(key: &'static str, make: fn() -> Arc<dyn Any + Send + Sync>) -> Self {
        Self { key, make }
    }
}

#[cfg(feature = "auto_register")]
inventory::collect!(KnownRegistration);

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::{Known, KnownObjects};
    use crate::Codec;
    use crate::error::{ConfigError, EncodeError};

    #[derive(Debug, PartialEq)]
    struct Ordering(u8);

    #[test]
    fn bijection() {
        let objects = KnownObjects::global();
        let ascending = Arc::new(Ordering(1));
        let known = objects.register("weft.tests.known.asc", ascending.clone()).unwrap();
        assert!(Arc::ptr_eq(known.arc(), &ascending));

        // Same pair again is accepted.
        objects.register("weft.tests.known.asc", ascending.clone()).unwrap();

        let err = objects.register("weft.tests.known.asc", Arc::new(Ordering(1))).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKnownKey(_)));
        let err = objects.register("weft.tests.known.other", ascending).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKnownInstance(key) if key == "weft.tests.known.asc"));

        let found: Known<Ordering> = objects.get("weft.tests.known.asc").unwrap();
        assert!(found.ptr_eq(&known));
        assert!(objects.get::<u32>("weft.tests.known.asc").is_none());
    }

    #[test]
    fn written_by_key() {
        let codec = Codec::default();
        let value = KnownObjects::global()
            .register("weft.tests.known.written", Arc::new(Ordering(7)))
            .unwrap();
        let bytes = codec.to_bytes(&vec![value.clone(), value.clone()]).unwrap();
        let back = codec.from_bytes::<Vec<Known<Ordering>>>(&bytes).unwrap();
        assert!(back[0].ptr_eq(&value));
        assert!(back[1].ptr_eq(&value));

        let stray = Known(Arc::new(Ordering(8)));
        let err = codec.to_bytes(&stray).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownKnownObject(_)));
    }
}
