//! Driver resolution.
//!
//! A [`Codec`] holds an ordered chain of [`Resolver`]s. The first resolver that
//! returns a driver wins; returning `Ok(None)` declines and lets the next one
//! try. Resolvers cache nothing themselves: drivers are memoized in one of
//! three tiers chosen by their [`CacheLevel`](crate::driver::CacheLevel).
//!
//! | Tier            | Scope         | Used for                                     |
//! |-----------------|---------------|----------------------------------------------|
//! | [`PureCache`]   | process       | drivers depending on the local type only     |
//! | [`ContextCache`]| one `Codec`   | drivers built from other drivers             |
//! | none            | one call      | adapters chosen by the written type          |

mod cache;

pub use cache::{ContextCache, ContextKey, PureCache, pure_cache};

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::codec::Codec;
use crate::de::ReadTypeInfo;
use crate::driver::{BasicResolver, ConventionResolver, DriverRef, EnumResolver, GenericResolver};
use crate::error::{ConfigError, DecodeError};
use crate::layered::LayeredResolver;
use crate::types::LocalType;

// -----------------------------------------------------------------------------
// Resolver

/// Finds or synthesizes the driver of a local type.
pub trait Resolver: Send + Sync + 'static {
    /// The driver writing `local`.
    ///
    /// An error here is a configuration error: the type can never be written.
    fn resolve_write(&self, cx: &Codec, local: &'static LocalType) -> Result<Option<DriverRef>, ConfigError>;

    /// The driver reading what was written as `info` into `local`.
    fn resolve_read(
        &self,
        cx: &Codec,
        info: &ReadTypeInfo,
        local: &'static LocalType,
    ) -> Result<Option<DriverRef>, DecodeError>;
}

/// The built-in chain, in priority order.
pub(crate) fn builtin_resolvers() -> Vec<Box<dyn Resolver>> {
    alloc::vec![
        Box::new(BasicResolver),
        Box::new(EnumResolver),
        Box::new(GenericResolver),
        Box::new(ConventionResolver),
        Box::new(LayeredResolver),
    ]
}
