//! Type descriptions: named declarations, structural types and local types.
//!
//! - [`NamedType`]: a `static` declaration of the name a type is written under.
//! - [`Ty`]: a structural type built from named types, the unit of wire descriptors.
//! - [`LocalType`]: the codec's view of one Rust type, created once per process.
//! - [`TypeRegistry`]: the process-wide index the reader resolves written names with.

mod local;
mod named;
mod registry;
mod ty;

pub use local::{CompositeShape, Convention, ConventionShape, LocalType, NullableShape, Shape};
pub use named::{ClassKind, NamedType, TypeFlags};
#[cfg(feature = "auto_register")]
pub use registry::AutoRegistration;
pub use registry::TypeRegistry;
pub use ty::{Ty, TyKind};
