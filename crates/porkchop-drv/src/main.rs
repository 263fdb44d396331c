//! The `porkchop` binary.
//!
//! `porkchop <input> [args...]` interprets a script; `-b`/`-t` instead
//! write the compiled module in binary or textual form. Richer CLI
//! surfaces (the shell, highlighting, tree dumps) live outside this
//! crate.

use std::fs;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use porkchop_drv::{exit_code, Compiler, EXIT_COMPILE_ERROR, EXIT_EMPTY_INPUT};
use porkchop_vm::{Env, Vm};

enum Mode {
    Interpret,
    Binary(String),
    Text(String),
}

struct Options {
    input: String,
    mode: Mode,
    args: Vec<String>,
}

fn parse_args() -> Result<Options> {
    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        bail!("too few arguments, input file expected\nusage: porkchop <input> [-b|-t <output>] [args...]");
    };
    let mut mode = Mode::Interpret;
    let mut rest = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-b" | "--bytecode" => {
                let output = args.next().context("-b expects an output file")?;
                mode = Mode::Binary(output);
            }
            "-t" | "--text-asm" => {
                let output = args.next().context("-t expects an output file")?;
                mode = Mode::Text(output);
            }
            _ => rest.push(arg),
        }
    }
    Ok(Options {
        input,
        mode,
        args: rest,
    })
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(error) => {
            eprintln!("fatal: {error}");
            return ExitCode::from(10);
        }
    };
    let text = match fs::read(&options.input) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                eprintln!("fatal: sourcecode of Porkchop is required to be encoded with UTF-8");
                return code(EXIT_COMPILE_ERROR);
            }
        },
        Err(error) => {
            eprintln!("fatal: failed to open input file {}: {error}", options.input);
            return ExitCode::from(20);
        }
    };

    let compiler = match Compiler::compile(&text) {
        Ok(compiler) => compiler,
        Err(diagnostic) => {
            eprint!("{}", diagnostic.render(&porkchop_util::Source::new(&text)));
            return code(EXIT_COMPILE_ERROR);
        }
    };
    if compiler.is_empty() {
        eprintln!("Compilation Error: Empty input with nothing to compile");
        return code(EXIT_EMPTY_INPUT);
    }

    match options.mode {
        Mode::Binary(output) => write_module(&output, |out| compiler.write_binary(out)),
        Mode::Text(output) => write_module(&output, |out| compiler.write_text(out)),
        Mode::Interpret => {
            let env = Env::stdio(options.args);
            let mut vm = Vm::new(compiler.assembly(), env);
            code(exit_code(vm.run(), &mut std::io::stderr()))
        }
    }
}

fn write_module(
    output: &str,
    write: impl FnOnce(&mut dyn std::io::Write) -> std::io::Result<()>,
) -> ExitCode {
    let file = match fs::File::create(output) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("fatal: failed to open output file {output}: {error}");
            return ExitCode::from(21);
        }
    };
    let mut out: Box<dyn std::io::Write> = Box::new(file);
    match write(&mut out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("fatal: failed to write module: {error}");
            ExitCode::from(21)
        }
    }
}

fn code(value: i32) -> ExitCode {
    // negative conventions wrap the way C exit statuses do
    ExitCode::from(value as u8)
}
