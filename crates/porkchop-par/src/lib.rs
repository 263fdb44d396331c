//! porkchop-par - Parsing and semantic analysis.
//!
//! A recursive-descent parser over a precedence ladder produces a typed
//! expression tree: every node caches its inferred type (and, where
//! possible, its compile-time constant) as it is constructed. Name
//! resolution, the function table (the continuum) and bytecode emission
//! over the finished tree live here as well.

pub mod ast;
pub mod emit;
pub mod externals;
pub mod function;
pub mod local;
pub mod parser;

pub use ast::{Declarator, DeclaratorKind, Expr, ExprKind, Lookup};
pub use emit::compile;
pub use externals::external_prototypes;
pub use function::{Continuum, FunctionDefinition, FunctionReference};
pub use parser::parse_program;
