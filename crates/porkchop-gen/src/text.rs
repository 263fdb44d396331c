//! The human-readable textual form.
//!
//! Global lines carry the string pool (`string <len> <hex bytes>`) and the
//! prototype table (`func <descriptor>`); each function body is delimited
//! by `(` and `)` lines with one instruction per line. Labels print as an
//! `Lnnn:` prefix and operands are decimal, except `const` which is hex.

use std::fmt::Write as _;
use std::io::{self, Write};

use indexmap::IndexSet;
use porkchop_sem::Type;

use crate::asm::Assembler;
use crate::opcode::Opcode;

/// [`Assembler`] realisation producing mnemonic text.
#[derive(Default)]
pub struct TextAssembler {
    string_pool: IndexSet<String>,
    prototypes: Vec<Type>,
    lines: Vec<String>,
}

impl TextAssembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Assembler for TextAssembler {
    fn const_raw(&mut self, bits: u64) {
        self.lines.push(format!("const {bits:X}"));
    }

    fn sconst(&mut self, value: &str) {
        let (index, _) = self.string_pool.insert_full(value.to_owned());
        self.indexed(Opcode::Sconst, index);
    }

    fn opcode(&mut self, opcode: Opcode) {
        self.lines.push(opcode.mnemonic().to_owned());
    }

    fn indexed(&mut self, opcode: Opcode, index: usize) {
        self.lines.push(format!("{} {index}", opcode.mnemonic()));
    }

    fn label(&mut self, index: usize) {
        self.lines.push(format!("L{index}: nop"));
    }

    fn labeled(&mut self, opcode: Opcode, index: usize) {
        self.lines.push(format!("{} L{index}", opcode.mnemonic()));
    }

    fn typed(&mut self, opcode: Opcode, ty: &Type) {
        self.lines
            .push(format!("{} {}", opcode.mnemonic(), ty.serialize()));
    }

    fn cons(&mut self, opcode: Opcode, ty: &Type, size: usize) {
        self.lines
            .push(format!("{} {} {size}", opcode.mnemonic(), ty.serialize()));
    }

    fn func(&mut self, prototype: &Type) {
        self.prototypes.push(prototype.clone());
    }

    fn begin_function(&mut self) {
        self.lines.push("(".to_owned());
    }

    fn end_function(&mut self) {
        self.lines.push(")".to_owned());
    }

    fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut text = String::new();
        for string in &self.string_pool {
            let _ = write!(text, "string {} ", string.len());
            for byte in string.as_bytes() {
                let _ = write!(text, "{byte:02X}");
            }
            text.push('\n');
        }
        for prototype in &self.prototypes {
            let _ = writeln!(text, "func {}", prototype.serialize());
        }
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        out.write_all(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_output() {
        let mut sink = TextAssembler::new();
        sink.func(&Type::func(vec![Type::STRING], Type::NONE));
        sink.begin_function();
        sink.sconst("hi");
        sink.label(2);
        sink.labeled(Opcode::Jmp, 2);
        sink.const_int(255);
        sink.typed(Opcode::Local, &Type::INT);
        sink.opcode(Opcode::Return);
        sink.end_function();

        let mut bytes = Vec::new();
        sink.write(&mut bytes).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "string 2 6869");
        assert_eq!(lines[1], "func $s:v");
        assert_eq!(lines[2], "(");
        assert_eq!(lines[3], "sconst 0");
        assert_eq!(lines[4], "L2: nop");
        assert_eq!(lines[5], "jmp L2");
        assert_eq!(lines[6], "const FF");
        assert_eq!(lines[7], "local i");
        assert_eq!(lines[8], "return");
        assert_eq!(lines[9], ")");
    }
}
