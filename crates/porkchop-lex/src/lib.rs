//! porkchop-lex - Lexical analysis.
//!
//! Turns a [`porkchop_util::Source`] into a flat token stream. Tokens carry
//! (line, column, width, kind) and no text; lexeme text is always read back
//! from the source buffer. Every logical line contributes a synthetic
//! [`TokenKind::Linebreak`] terminator, and bracket nesting is validated
//! while tokens are produced.

pub mod lexer;
pub mod literal;
pub mod token;

pub use lexer::tokenize;
pub use literal::{parse_char, parse_float, parse_int, parse_string};
pub use token::{Token, TokenKind};
