//! porkchop-sem - The static type system.
//!
//! Defines the [`Type`] lattice with structural equality and assignability,
//! the compact one-character-per-node descriptor encoding, and the raw
//! 64-bit [`ConstValue`] used for compile-time constants.

pub mod types;
pub mod value;

pub use types::{identity_kind, DescriptorError, IdentityKind, ScalarKind, Type};
pub use value::ConstValue;
