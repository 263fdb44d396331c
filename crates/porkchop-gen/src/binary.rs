//! The compact binary module form.
//!
//! Variable-length integers use 7 bits per byte, little-endian, with the
//! continuation bit in the MSB. Strings are a varint length followed by
//! raw bytes; type operands use the self-delimiting descriptor encoding.
//!
//! Layout:
//!
//! ```text
//! varint  stringPoolCount    repeat { varint length; bytes }
//! varint  prototypeCount     repeat { serialized Func type }
//! varint  labelTableCount    repeat { varint key; varint value }
//! per function:              varint bodyLength; instruction bytes
//! ```
//!
//! External functions occupy the leading function indices by convention
//! and are not written; the decoder re-attaches them.

use std::io::{self, Write};

use indexmap::IndexSet;
use porkchop_sem::{DescriptorError, Type};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::asm::Assembler;
use crate::interpretation::{Assembly, CodeUnit, Instruction, Operand};
use crate::opcode::{Opcode, OperandClass};

/// A growable little-endian byte buffer with varint support.
#[derive(Clone, Debug, Default)]
pub struct ByteBuf {
    pub buffer: Vec<u8>,
}

impl ByteBuf {
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn put_opcode(&mut self, opcode: Opcode) -> &mut Self {
        self.buffer.push(opcode as u8);
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    pub fn put_varint(&mut self, mut value: u64) -> &mut Self {
        while value > 0x7F {
            self.buffer.push(0x80 | (value & 0x7F) as u8);
            value >>= 7;
        }
        self.buffer.push(value as u8);
        self
    }
}

/// [`Assembler`] realisation writing the binary module.
#[derive(Default)]
pub struct BinAssembler {
    string_pool: IndexSet<String>,
    prototypes: Vec<Type>,
    labels: FxHashMap<u64, u64>,
    instructions: u64,
    functions: Vec<ByteBuf>,
    buffer: ByteBuf,
}

impl BinAssembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Assembler for BinAssembler {
    fn const_raw(&mut self, bits: u64) {
        self.buffer.put_opcode(Opcode::Const).put_varint(bits);
        self.instructions += 1;
    }

    fn sconst(&mut self, value: &str) {
        let (index, _) = self.string_pool.insert_full(value.to_owned());
        self.indexed(Opcode::Sconst, index);
    }

    fn opcode(&mut self, opcode: Opcode) {
        self.buffer.put_opcode(opcode);
        self.instructions += 1;
    }

    fn indexed(&mut self, opcode: Opcode, index: usize) {
        self.buffer.put_opcode(opcode).put_varint(index as u64);
        self.instructions += 1;
    }

    fn label(&mut self, index: usize) {
        self.labels.insert(index as u64, self.instructions);
        self.opcode(Opcode::Nop);
    }

    fn labeled(&mut self, opcode: Opcode, index: usize) {
        self.buffer.put_opcode(opcode).put_varint(index as u64);
        self.instructions += 1;
    }

    fn typed(&mut self, opcode: Opcode, ty: &Type) {
        self.buffer
            .put_opcode(opcode)
            .put_bytes(ty.serialize().as_bytes());
        self.instructions += 1;
    }

    fn cons(&mut self, opcode: Opcode, ty: &Type, size: usize) {
        self.buffer
            .put_opcode(opcode)
            .put_bytes(ty.serialize().as_bytes())
            .put_varint(size as u64);
        self.instructions += 1;
    }

    fn func(&mut self, prototype: &Type) {
        self.prototypes.push(prototype.clone());
    }

    fn begin_function(&mut self) {
        self.instructions = 0;
        self.buffer.clear();
    }

    fn end_function(&mut self) {
        self.functions.push(std::mem::take(&mut self.buffer));
    }

    fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut buf = ByteBuf::default();
        buf.put_varint(self.string_pool.len() as u64);
        for string in &self.string_pool {
            buf.put_varint(string.len() as u64).put_bytes(string.as_bytes());
        }
        buf.put_varint(self.prototypes.len() as u64);
        for prototype in &self.prototypes {
            buf.put_bytes(prototype.serialize().as_bytes());
        }
        let mut labels: Vec<(u64, u64)> = self.labels.iter().map(|(k, v)| (*k, *v)).collect();
        labels.sort_unstable();
        buf.put_varint(labels.len() as u64);
        for (key, value) in labels {
            buf.put_varint(key).put_varint(value);
        }
        for function in &self.functions {
            buf.put_varint(function.len() as u64).put_bytes(&function.buffer);
        }
        out.write_all(&buf.buffer)
    }
}

/// A malformed binary module.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of module")]
    UnexpectedEnd,
    #[error("varint is too long")]
    VarintOverflow,
    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unresolved label {0}")]
    UnresolvedLabel(u64),
    #[error("module string is not UTF-8")]
    BadString,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remains(&self) -> bool {
        self.pos < self.bytes.len()
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 64 {
                return Err(DecodeError::VarintOverflow);
            }
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + count > self.bytes.len() {
            return Err(DecodeError::UnexpectedEnd);
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn type_descriptor(&mut self) -> Result<Type, DecodeError> {
        let (ty, consumed) = Type::deserialize(&self.bytes[self.pos..])?;
        self.pos += consumed;
        Ok(ty)
    }
}

/// Decodes a binary module back into an executable [`Assembly`].
///
/// `external_count` external function units are prepended, matching the
/// index convention used when the module was written.
pub fn decode(bytes: &[u8], external_count: usize) -> Result<Assembly, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };
    let mut assembly = Assembly::default();
    for index in 0..external_count {
        assembly.functions.push(CodeUnit::External(index));
    }

    let strings = reader.varint()?;
    for _ in 0..strings {
        let length = reader.varint()? as usize;
        let text = std::str::from_utf8(reader.take(length)?)
            .map_err(|_| DecodeError::BadString)?;
        assembly.string_pool.insert(text.to_owned());
    }

    let prototypes = reader.varint()?;
    for _ in 0..prototypes {
        let prototype = reader.type_descriptor()?;
        assembly.prototypes.push(prototype);
    }

    let label_count = reader.varint()?;
    let mut labels = FxHashMap::default();
    for _ in 0..label_count {
        let key = reader.varint()?;
        let value = reader.varint()?;
        labels.insert(key, value);
    }

    while reader.remains() {
        let length = reader.varint()? as usize;
        let body = reader.take(length)?;
        assembly
            .functions
            .push(CodeUnit::Bytecode(decode_body(body, &labels)?));
    }
    Ok(assembly)
}

fn decode_body(
    bytes: &[u8],
    labels: &FxHashMap<u64, u64>,
) -> Result<Vec<Instruction>, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };
    let mut instructions = Vec::new();
    while reader.remains() {
        let byte = reader.byte()?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode(byte))?;
        let operand = match opcode.operand_class() {
            OperandClass::None => Operand::None,
            OperandClass::Index => Operand::Index(reader.varint()?),
            OperandClass::Label => {
                let label = reader.varint()?;
                let offset = *labels
                    .get(&label)
                    .ok_or(DecodeError::UnresolvedLabel(label))?;
                Operand::Index(offset)
            }
            OperandClass::Type => Operand::Type(reader.type_descriptor()?),
            OperandClass::Cons => {
                let ty = reader.type_descriptor()?;
                let size = reader.varint()?;
                Operand::Cons(ty, size)
            }
        };
        instructions.push(Instruction { opcode, operand });
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = ByteBuf::default();
            buf.put_varint(value);
            let mut reader = Reader {
                bytes: &buf.buffer,
                pos: 0,
            };
            assert_eq!(reader.varint().unwrap(), value);
            assert_eq!(reader.pos, buf.len());
        }
    }

    #[test]
    fn test_module_roundtrip() {
        let mut sink = BinAssembler::new();
        sink.func(&Type::func(vec![], Type::INT));
        sink.begin_function();
        sink.typed(Opcode::Local, &Type::INT);
        sink.sconst("greeting");
        sink.opcode(Opcode::Pop);
        sink.const_int(-3);
        sink.labeled(Opcode::Jmp, 0);
        sink.label(0);
        sink.cons(Opcode::List, &Type::list(Type::INT), 2);
        sink.opcode(Opcode::Return);
        sink.end_function();

        let mut bytes = Vec::new();
        sink.write(&mut bytes).unwrap();
        let assembly = decode(&bytes, 0).unwrap();

        assert_eq!(assembly.string_pool.len(), 1);
        assert_eq!(assembly.string(0), "greeting");
        assert_eq!(assembly.prototypes, vec![Type::func(vec![], Type::INT)]);
        let CodeUnit::Bytecode(code) = &assembly.functions[0] else {
            panic!("expected bytecode");
        };
        assert_eq!(code[0].opcode, Opcode::Local);
        assert_eq!(code[0].operand, Operand::Type(Type::INT));
        assert_eq!(code[3].operand, Operand::Index((-3i64) as u64));
        // the jump resolved to the nop the label became
        assert_eq!(code[4].opcode, Opcode::Jmp);
        assert_eq!(code[4].operand, Operand::Index(5));
        assert_eq!(code[6].operand, Operand::Cons(Type::list(Type::INT), 2));
    }

    #[test]
    fn test_externals_prepended() {
        let sink = BinAssembler::new();
        let mut bytes = Vec::new();
        sink.write(&mut bytes).unwrap();
        let assembly = decode(&bytes, 2).unwrap();
        assert_eq!(assembly.functions.len(), 2);
        assert!(matches!(assembly.functions[0], CodeUnit::External(0)));
    }

    #[test]
    fn test_truncated_module() {
        assert!(matches!(decode(&[0x80], 0), Err(DecodeError::UnexpectedEnd)));
    }
}
