//! porkchop-gen - Bytecode representation and emission.
//!
//! The compiler talks to an abstract [`Assembler`] sink; three realisations
//! exist: an in-memory instruction list executed by the interpreter, a
//! compact binary module, and a human-readable textual form. The binary
//! form can be decoded back into an executable [`Assembly`].

pub mod asm;
pub mod binary;
pub mod interpretation;
pub mod opcode;
pub mod text;

pub use asm::Assembler;
pub use binary::{decode, BinAssembler, ByteBuf, DecodeError};
pub use interpretation::{Assembly, CodeUnit, Instruction, Interpretation, Operand};
pub use opcode::{Opcode, OperandClass};
pub use text::TextAssembler;
