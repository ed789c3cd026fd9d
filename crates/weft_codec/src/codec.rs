//! The shared codec context.

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::io::{Read, Write};

use crate::config::CodecConfig;
use crate::de::{Deserializer, MigrationHook, ReadTypeInfo, TypeMigration};
use crate::driver::{CacheLevel, DriverRef};
use crate::error::{ConfigError, DecodeError, EncodeError, IdempotenceError};
use crate::portable::Portable;
use crate::resolve::{ContextCache, Resolver, builtin_resolvers};
use crate::ser::Serializer;
use crate::types::LocalType;

// -----------------------------------------------------------------------------
// Codec

/// Configuration, resolver chain, migration hooks and driver cache shared by
/// every session created from it.
///
/// A `Codec` is `Send + Sync`: build it once, then open sessions from any
/// thread. Sessions themselves are single-threaded.
///
/// ```
/// use weft_codec::Codec;
///
/// let codec = Codec::default();
/// let bytes = codec.to_bytes(&vec![1_u8, 2, 3]).unwrap();
/// assert_eq!(codec.from_bytes::<Vec<u8>>(&bytes).unwrap(), [1, 2, 3]);
/// ```
pub struct Codec {
    config: CodecConfig,
    resolvers: Vec<Box<dyn Resolver>>,
    hooks: Vec<MigrationHook>,
    cache: ContextCache,
}

impl Codec {
    /// A codec with the built-in resolvers.
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            resolvers: builtin_resolvers(),
            hooks: Vec::new(),
            cache: ContextCache::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Appends a resolver, consulted after the built-in ones.
    pub fn add_resolver(&mut self, resolver: impl Resolver) {
        self.resolvers.push(Box::new(resolver));
        self.cache.clear();
    }

    /// Inserts a resolver ahead of every other one, overriding built-in drivers.
    pub fn prepend_resolver(&mut self, resolver: impl Resolver) {
        self.resolvers.insert(0, Box::new(resolver));
        self.cache.clear();
    }

    /// Adds a hook run on every descriptor read by this codec's sessions.
    pub fn add_migration(&mut self, hook: impl Fn(&mut TypeMigration<'_>) + Send + Sync + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    #[inline]
    pub(crate) fn migrations(&self) -> &[MigrationHook] {
        &self.hooks
    }

    #[inline]
    pub fn context_cache(&self) -> &ContextCache {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Resolution

    /// The driver of positions of type `local`: the slot driver of reference
    /// types, the instance driver otherwise.
    pub fn resolve_write(&self, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        if let Some(slot) = local.slot_driver() {
            return Ok(Some(slot));
        }
        self.resolve_instance_write(local)
    }

    /// The driver writing the payload of `local`, from the first resolver that
    /// accepts it.
    pub fn resolve_instance_write(&self, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError> {
        if local.ty().has_params() {
            return Err(ConfigError::GenericParameter(local.ty().to_string()));
        }
        for resolver in &self.resolvers {
            if let Some(driver) = resolver.resolve_write(self, local)? {
                return Ok(Some(driver));
            }
        }
        Ok(None)
    }

    /// The driver reading positions of type `local` written as `info`.
    pub fn resolve_read(
        &self,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        if let Some(slot) = local.slot_driver() {
            return Ok(Some(slot));
        }
        self.resolve_instance_read(info, local)
    }

    /// The driver reading a payload written as `info` into `local`.
    ///
    /// When the written type is `local` itself, the driver is remembered on the
    /// descriptor node and found again without walking the chain.
    pub fn resolve_instance_read(
        &self,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError> {
        if let Some(driver) = info.cached_driver(local) {
            return Ok(Some(driver));
        }
        for resolver in &self.resolvers {
            if let Some(driver) = resolver.resolve_read(self, info, local)? {
                if info.local_ty() == Some(local.ty()) && driver.cache_level() != CacheLevel::Never {
                    info.cache_driver(local, &driver);
                }
                return Ok(Some(driver));
            }
        }
        log::debug!("no resolver reads `{info}` as `{local}`");
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Sessions

    pub fn serializer<'a>(&'a self, out: &'a mut dyn Write) -> Result<Serializer<'a>, EncodeError> {
        Serializer::new(self, out)
    }

    pub fn deserializer<'a>(&'a self, input: &'a mut dyn Read) -> Result<Deserializer<'a>, DecodeError> {
        Deserializer::new(self, input)
    }

    /// Writes `value` as a complete stream.
    pub fn to_bytes<T: Portable>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::new();
        let mut ser = self.serializer(&mut bytes)?;
        ser.write(value)?;
        ser.finish()?;
        Ok(bytes)
    }

    /// Reads the first value of a stream written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes<T: Portable>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        let mut input = bytes;
        let mut de = self.deserializer(&mut input)?;
        de.read()
    }

    /// Writes `value`, reads it back and writes the result again, and checks
    /// that both writes are identical. Returns the bytes of the first write.
    pub fn check_idempotence<T: Portable>(&self, value: &T) -> Result<Vec<u8>, IdempotenceError> {
        let first = self.to_bytes(value).map_err(IdempotenceError::Encode)?;
        let back: T = self.from_bytes(&first).map_err(IdempotenceError::Decode)?;
        let second = self.to_bytes(&back).map_err(IdempotenceError::Reencode)?;
        if first == second {
            return Ok(first);
        }
        let offset = first
            .iter()
            .zip(&second)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| first.len().min(second.len()));
        Err(IdempotenceError::Mismatch {
            offset,
            first_len: first.len(),
            second_len: second.len(),
        })
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

// -----------------------------------------------------------------------------
// Tests
