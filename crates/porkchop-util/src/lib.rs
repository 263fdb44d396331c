//! porkchop-util - Foundation types shared by every phase of the compiler.
//!
//! This crate provides the pieces that the lexer, parser, code generator and
//! virtual machine all agree on: source segments, the source buffer, the
//! structured diagnostic type, and Unicode classification helpers.

pub mod diagnostic;
pub mod source;
pub mod span;
pub mod unicode;

pub use diagnostic::{Category, Diagnostic, ErrorMessage, MessageKind};
pub use source::Source;
pub use span::Segment;

// Re-export the hash map flavour used throughout the workspace.
pub use rustc_hash::{FxHashMap, FxHashSet};
