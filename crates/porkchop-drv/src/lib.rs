//! porkchop-drv - The driver.
//!
//! Wires the pipeline together: source text through the lexer and parser
//! into a continuum, emitted through any of the three sinks, and executed
//! on the VM. Exit-code conventions live here too.

use std::io::{self, Write};

use porkchop_gen::{Assembler, Assembly, BinAssembler, Interpretation, TextAssembler};
use porkchop_lex::{tokenize, Token, TokenKind};
use porkchop_par::{compile, parse_program, Continuum};
use porkchop_util::{Diagnostic, Source};
use porkchop_vm::{Env, Value, Vm, VmError};

/// Exit code for compile-time diagnostics.
pub const EXIT_COMPILE_ERROR: i32 = -1;
/// Exit code for an empty input with nothing to compile.
pub const EXIT_EMPTY_INPUT: i32 = -2;
/// Exit code for a runtime exception.
pub const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code for internal failures.
pub const EXIT_INTERNAL_ERROR: i32 = -1000;

/// A compiled program: the source it came from and its continuum.
#[derive(Debug)]
pub struct Compiler {
    pub source: Source,
    pub tokens: Vec<Token>,
    pub continuum: Continuum,
}

impl Compiler {
    /// Runs the front end over `text`.
    pub fn compile(text: &str) -> Result<Self, Diagnostic> {
        let source = Source::new(text);
        let tokens = tokenize(&source)?;
        let continuum = parse_program(&source, &tokens)?;
        Ok(Self {
            source,
            tokens,
            continuum,
        })
    }

    /// True when the input held no tokens besides linebreaks.
    pub fn is_empty(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| token.kind == TokenKind::Linebreak)
    }

    /// Emits the continuum into an executable in-memory assembly.
    pub fn assembly(&self) -> Assembly {
        let mut sink = Interpretation::new(self.continuum.external_count());
        compile(&self.continuum, &mut sink);
        sink.finish()
    }

    /// Emits the continuum as a binary module.
    pub fn write_binary(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut sink = BinAssembler::new();
        compile(&self.continuum, &mut sink);
        sink.write(out)
    }

    /// Emits the continuum as mnemonic text.
    pub fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut sink = TextAssembler::new();
        compile(&self.continuum, &mut sink);
        sink.write(out)
    }
}

/// Compiles and runs a program in one step against the given
/// environment.
pub fn run_source(text: &str, env: Env) -> Result<Result<Value, VmError>, Diagnostic> {
    let compiler = Compiler::compile(text)?;
    Ok(Vm::new(compiler.assembly(), env).run())
}

/// Maps a finished run onto a process exit code, printing runtime
/// faults to stderr the way the top-level runner does.
pub fn exit_code(result: Result<Value, VmError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(_) => 0,
        Err(VmError::Exit(code)) => code as i32,
        Err(VmError::Runtime(error)) => {
            let _ = writeln!(stderr, "Runtime exception occurred:");
            let _ = writeln!(stderr, "{error}");
            EXIT_RUNTIME_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_pipeline() {
        let compiler = Compiler::compile("println(\"hi\")").unwrap();
        assert!(!compiler.is_empty());
        let assembly = compiler.assembly();
        assert!(assembly.string_pool.contains("hi"));
    }

    #[test]
    fn test_empty_detection() {
        assert!(Compiler::compile("").unwrap().is_empty());
        assert!(Compiler::compile("\n\n# only a comment\n").unwrap().is_empty());
        assert!(!Compiler::compile("1").unwrap().is_empty());
    }

    #[test]
    fn test_exit_codes() {
        let mut stderr = Vec::new();
        assert_eq!(exit_code(Ok(Value::NONE), &mut stderr), 0);
        assert_eq!(exit_code(Err(VmError::Exit(7)), &mut stderr), 7);
        assert_eq!(
            exit_code(Err(VmError::fault("index out of bound")), &mut stderr),
            EXIT_RUNTIME_ERROR
        );
        let text = String::from_utf8(stderr).unwrap();
        assert!(text.contains("Runtime exception occurred:"));
        assert!(text.contains("index out of bound"));
    }

    #[test]
    fn test_external_tables_agree() {
        // the compiler's prototype table and the VM's callable table are
        // coupled by index; pin them together
        let prototypes = porkchop_par::external_prototypes();
        assert_eq!(prototypes.len(), porkchop_vm::external::TABLE.len());
        for ((proto_name, _), (vm_name, _)) in
            prototypes.iter().zip(porkchop_vm::external::TABLE)
        {
            assert_eq!(proto_name, vm_name);
        }
    }
}
