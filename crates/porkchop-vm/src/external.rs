//! The host primitive table.
//!
//! A fixed table of callables bound at VM init; entries occupy the
//! leading function indices, in the same order the compiler registers
//! their prototypes. Each takes a slice of raw values and returns one,
//! allocating through the VM where it needs strings or lists.

use std::io::BufRead;
use std::time::{SystemTime, UNIX_EPOCH};

use porkchop_sem::ScalarKind;

use crate::error::VmError;
use crate::object::{self, value_to_string, ListRepr, Obj};
use crate::value::Value;
use crate::vm::Vm;

pub type External = fn(&mut Vm, &[Value]) -> Result<Value, VmError>;

/// Names and callables, in function-index order.
pub const TABLE: &[(&str, External)] = &[
    ("print", print),
    ("println", println),
    ("readLine", read_line),
    ("i2s", i2s),
    ("f2s", f2s),
    ("s2i", s2i),
    ("s2f", s2f),
    ("exit", exit),
    ("millis", millis),
    ("nanos", nanos),
    ("getargs", getargs),
    ("output", output),
    ("input", input),
    ("flush", flush),
    ("eof", eof),
    ("typename", typename),
    ("gc", run_gc),
    ("toBytes", to_bytes),
    ("toChars", to_chars),
    ("fromBytes", from_bytes),
    ("fromChars", from_chars),
];

pub fn invoke(vm: &mut Vm, index: usize, args: &[Value]) -> Result<Value, VmError> {
    let (_, callable) = TABLE[index];
    callable(vm, args)
}

fn arg_string(vm: &Vm, args: &[Value], index: usize) -> String {
    match vm.heap.get(args[index].as_obj()) {
        Obj::Str(value) => value.clone(),
        _ => unreachable!("external expected a string argument"),
    }
}

fn io_fault(error: std::io::Error) -> VmError {
    VmError::fault(format!("I/O failure: {error}"))
}

fn print(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = arg_string(vm, args, 0);
    vm.env.out.write_all(text.as_bytes()).map_err(io_fault)?;
    Ok(Value::NONE)
}

fn println(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    print(vm, args)?;
    vm.env.out.write_all(b"\n").map_err(io_fault)?;
    vm.env.out.flush().map_err(io_fault)?;
    Ok(Value::NONE)
}

fn read_line(vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    let mut line = String::new();
    vm.env.input.read_line(&mut line).map_err(io_fault)?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    let obj = vm.alloc(Obj::Str(line));
    Ok(Value::from_obj(obj))
}

fn i2s(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = value_to_string(&vm.heap, args[0], &porkchop_sem::Type::INT);
    let obj = vm.alloc(Obj::Str(text));
    Ok(Value::from_obj(obj))
}

fn f2s(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = value_to_string(&vm.heap, args[0], &porkchop_sem::Type::FLOAT);
    let obj = vm.alloc(Obj::Str(text));
    Ok(Value::from_obj(obj))
}

fn s2i(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = arg_string(vm, args, 0);
    text.trim()
        .parse::<i64>()
        .map(Value::from_int)
        .map_err(|_| VmError::fault(format!("failed to parse int from \"{text}\"")))
}

fn s2f(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = arg_string(vm, args, 0);
    text.trim()
        .parse::<f64>()
        .map(Value::from_float)
        .map_err(|_| VmError::fault(format!("failed to parse float from \"{text}\"")))
}

fn exit(_vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    Err(VmError::Exit(args[0].as_int()))
}

fn millis(_vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::from_int(elapsed.as_millis() as i64))
}

fn nanos(_vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::from_int(elapsed.as_nanos() as i64))
}

fn getargs(vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    let arguments = vm.env.args.clone();
    vm.heap.disable();
    let elements: Vec<Value> = arguments
        .into_iter()
        .map(|argument| Value::from_obj(vm.alloc(Obj::Str(argument))))
        .collect();
    let list = vm.alloc(Obj::List(ListRepr::Object {
        elements,
        element: porkchop_sem::Type::STRING,
    }));
    vm.heap.enable();
    Ok(Value::from_obj(list))
}

fn output(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let path = arg_string(vm, args, 0);
    if vm.env.io_locked {
        return Err(VmError::fault("failed to reopen output stream"));
    }
    let file = std::fs::File::create(&path)
        .map_err(|_| VmError::fault("failed to reopen output stream"))?;
    vm.env.out = Box::new(file);
    Ok(Value::NONE)
}

fn input(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let path = arg_string(vm, args, 0);
    if vm.env.io_locked {
        return Err(VmError::fault("failed to reopen input stream"));
    }
    let file = std::fs::File::open(&path)
        .map_err(|_| VmError::fault("failed to reopen input stream"))?;
    vm.env.input = Box::new(std::io::BufReader::new(file));
    Ok(Value::NONE)
}

fn flush(vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    vm.env.out.flush().map_err(io_fault)?;
    Ok(Value::NONE)
}

fn eof(vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    let at_end = vm.env.input.fill_buf().map_err(io_fault)?.is_empty();
    Ok(Value::from_bool(at_end))
}

fn typename(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let name = object::type_of(&vm.heap, args[0].as_obj()).to_string();
    let obj = vm.alloc(Obj::Str(name));
    Ok(Value::from_obj(obj))
}

fn run_gc(vm: &mut Vm, _args: &[Value]) -> Result<Value, VmError> {
    vm.gc();
    Ok(Value::NONE)
}

fn to_bytes(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = arg_string(vm, args, 0);
    let obj = vm.alloc(Obj::List(ListRepr::Byte(text.into_bytes())));
    Ok(Value::from_obj(obj))
}

fn to_chars(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text = arg_string(vm, args, 0);
    let elements = text.chars().map(Value::from_char).collect();
    let obj = vm.alloc(Obj::List(ListRepr::Scalar {
        elements,
        kind: ScalarKind::Char,
    }));
    Ok(Value::from_obj(obj))
}

fn from_bytes(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let bytes = match vm.heap.get(args[0].as_obj()) {
        Obj::List(ListRepr::Byte(elements)) => elements.clone(),
        _ => unreachable!("fromBytes expects a byte list"),
    };
    let text = String::from_utf8(bytes)
        .map_err(|_| VmError::fault("failed to decode Unicode"))?;
    let obj = vm.alloc(Obj::Str(text));
    Ok(Value::from_obj(obj))
}

fn from_chars(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
    let text: String = match vm.heap.get(args[0].as_obj()) {
        Obj::List(ListRepr::Scalar { elements, .. }) => {
            elements.iter().map(|value| value.as_char_lossy()).collect()
        }
        Obj::List(repr) if repr.is_empty() => String::new(),
        _ => unreachable!("fromChars expects a char list"),
    };
    let obj = vm.alloc(Obj::Str(text));
    Ok(Value::from_obj(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Env;
    use porkchop_gen::Assembly;

    fn test_vm(input: &str) -> (Vm, crate::vm::SharedBuffer) {
        let (env, buffer) = Env::captured(input);
        (Vm::new(Assembly::default(), env), buffer)
    }

    #[test]
    fn test_print_and_println() {
        let (mut vm, buffer) = test_vm("");
        let text = vm.alloc(Obj::Str("hello".to_owned()));
        println(&mut vm, &[Value::from_obj(text)]).unwrap();
        assert_eq!(buffer.contents(), "hello\n");
    }

    #[test]
    fn test_read_line_and_eof() {
        let (mut vm, _) = test_vm("first\nsecond");
        let line = read_line(&mut vm, &[]).unwrap();
        assert!(matches!(vm.heap.get(line.as_obj()), Obj::Str(s) if s == "first"));
        assert!(!eof(&mut vm, &[]).unwrap().as_bool());
        read_line(&mut vm, &[]).unwrap();
        assert!(eof(&mut vm, &[]).unwrap().as_bool());
    }

    #[test]
    fn test_string_number_conversions() {
        let (mut vm, _) = test_vm("");
        let text = vm.alloc(Obj::Str(" 42 ".to_owned()));
        assert_eq!(s2i(&mut vm, &[Value::from_obj(text)]).unwrap().as_int(), 42);
        let result = i2s(&mut vm, &[Value::from_int(-5)]).unwrap();
        assert!(matches!(vm.heap.get(result.as_obj()), Obj::Str(s) if s == "-5"));
        let bad = vm.alloc(Obj::Str("nope".to_owned()));
        assert!(s2i(&mut vm, &[Value::from_obj(bad)]).is_err());
    }

    #[test]
    fn test_exit_unwinds() {
        let (mut vm, _) = test_vm("");
        assert!(matches!(
            exit(&mut vm, &[Value::from_int(3)]),
            Err(VmError::Exit(3))
        ));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let (mut vm, _) = test_vm("");
        let text = vm.alloc(Obj::Str("hé".to_owned()));
        let bytes = to_bytes(&mut vm, &[Value::from_obj(text)]).unwrap();
        let back = from_bytes(&mut vm, &[bytes]).unwrap();
        assert!(matches!(vm.heap.get(back.as_obj()), Obj::Str(s) if s == "hé"));
    }

    #[test]
    fn test_chars_roundtrip() {
        let (mut vm, _) = test_vm("");
        let text = vm.alloc(Obj::Str("中a".to_owned()));
        let chars = to_chars(&mut vm, &[Value::from_obj(text)]).unwrap();
        match vm.heap.get(chars.as_obj()) {
            Obj::List(repr) => assert_eq!(repr.len(), 2),
            _ => panic!("expected a list"),
        }
        let back = from_chars(&mut vm, &[chars]).unwrap();
        assert!(matches!(vm.heap.get(back.as_obj()), Obj::Str(s) if s == "中a"));
    }

    #[test]
    fn test_locked_streams_refuse_reopen() {
        let (mut vm, _) = test_vm("");
        let path = vm.alloc(Obj::Str("somewhere.txt".to_owned()));
        assert!(output(&mut vm, &[Value::from_obj(path)]).is_err());
        assert!(input(&mut vm, &[Value::from_obj(path)]).is_err());
    }

    #[test]
    fn test_typename() {
        let (mut vm, _) = test_vm("");
        let boxed = vm.alloc(Obj::AnyScalar {
            value: Value::from_int(1),
            kind: ScalarKind::Int,
        });
        let name = typename(&mut vm, &[Value::from_obj(boxed)]).unwrap();
        assert!(matches!(vm.heap.get(name.as_obj()), Obj::Str(s) if s == "int"));
    }

    #[test]
    fn test_table_is_dense_and_unique() {
        for (i, (name, _)) in TABLE.iter().enumerate() {
            assert!(
                TABLE[i + 1..].iter().all(|(other, _)| other != name),
                "duplicate external {name}"
            );
        }
        assert_eq!(TABLE.len(), 21);
    }
}
