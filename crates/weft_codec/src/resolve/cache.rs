use alloc::boxed::Box;
use std::sync::{PoisonError, RwLock};

use weft_utils::hash::{FixedHashState, HashMap};

use crate::driver::{CacheLevel, DriverRef};
use crate::error::ConfigError;
use crate::types::LocalType;

// -----------------------------------------------------------------------------
// PureCache

/// Process-wide cache of drivers that depend on the local type only.
///
/// Keyed by the address of the [`LocalType`], which is unique per Rust type and
/// lives as long as the process.
pub struct PureCache(RwLock<HashMap<usize, DriverRef>>);

static PURE: PureCache = PureCache(RwLock::new(HashMap::with_hasher(FixedHashState)));

/// The process-wide pure-type cache.
#[inline]
pub fn pure_cache() -> &'static PureCache {
    &PURE
}

impl PureCache {
    /// Returns the driver of `local`, building it with `build` on first use.
    ///
    /// `build` runs without the lock held, and may run on several threads at
    /// once; the first driver inserted is kept and returned to every caller.
    pub fn get_or_try_insert(
        &self,
        local: &'static LocalType,
        build: impl FnOnce() -> Result<DriverRef, ConfigError>,
    ) -> Result<DriverRef, ConfigError> {
        let key = local.addr();
        if let Some(driver) = self.get_by_addr(key) {
            return Ok(driver);
        }
        let driver = build()?;
        Ok(self.insert_by_addr(key, local, driver))
    }

    #[inline]
    pub fn get(&self, local: &'static LocalType) -> Option<DriverRef> {
        self.get_by_addr(local.addr())
    }

    #[inline(never)]
    fn get_by_addr(&self, key: usize) -> Option<DriverRef> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    #[inline(never)]
    fn insert_by_addr(&self, key: usize, local: &LocalType, driver: DriverRef) -> DriverRef {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| {
                log::debug!("cached driver of `{local}` process-wide");
                driver
            })
            .clone()
    }
}

// -----------------------------------------------------------------------------
// ContextCache

/// Key of a driver synthesized from other drivers: the local type and the
/// identity of each argument driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    local: usize,
    drivers: Box<[usize]>,
}

impl ContextKey {
    pub fn new(local: &'static LocalType, drivers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            local: local.addr(),
            drivers: drivers.into_iter().collect(),
        }
    }
}

/// Cache owned by one [`Codec`](crate::Codec) and shared by its sessions.
pub struct ContextCache(RwLock<HashMap<ContextKey, DriverRef>>);

impl ContextCache {
    pub fn new() -> Self {
        Self(RwLock::new(HashMap::with_hasher(FixedHashState)))
    }

    /// Returns the driver cached under `key`, or builds it.
    ///
    /// Drivers of level [`CacheLevel::Never`] are returned without being stored.
    pub fn get_or_insert(&self, key: ContextKey, build: impl FnOnce() -> DriverRef) -> DriverRef {
        if let Some(driver) = self.0.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return driver.clone();
        }
        let driver = build();
        if driver.cache_level() == CacheLevel::Never {
            return driver;
        }
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(driver)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Tests
