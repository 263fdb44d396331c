//! The interpreter core.
//!
//! One VM owns the heap, the frame stack and the I/O environment, and
//! executes one function at a time. Calls recurse through the host
//! stack; coroutines suspend by handing their frame to a heap object and
//! resume from the instruction after the `YIELD` they stopped at.
//!
//! The `FCONST`/`BIND`/`CALL` and compare/`JMP0` fusions mirror the
//! unfused semantics exactly; they only skip materialising intermediate
//! values.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::io::{self, BufRead, BufReader, Write};
use std::rc::Rc;

use porkchop_gen::{Assembly, CodeUnit, Instruction, Opcode, Operand};
use porkchop_sem::{identity_kind, ScalarKind, Type};
use porkchop_util::unicode;

use crate::error::VmError;
use crate::external;
use crate::frame::Frame;
use crate::heap::Heap;
use crate::object::{
    self, obj_equals, obj_hash, obj_to_string, value_equals, value_hash, value_to_string,
    Coroutine, DictRepr, FuncObj, ListRepr, Obj, SetRepr,
};
use crate::value::{ObjRef, Value};

/// The process-wide mutable I/O state, threaded explicitly.
pub struct Env {
    pub out: Box<dyn Write>,
    pub input: Box<dyn BufRead>,
    pub args: Vec<String>,
    /// When set, `input()`/`output()` refuse to reopen the streams.
    pub io_locked: bool,
}

impl Env {
    pub fn stdio(args: Vec<String>) -> Self {
        Self {
            out: Box::new(io::stdout()),
            input: Box::new(BufReader::new(io::stdin())),
            args,
            io_locked: false,
        }
    }

    /// An environment reading from a fixed string and writing into a
    /// shareable buffer; used by tests and the end-to-end scenarios.
    pub fn captured(input: &str) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let env = Self {
            out: Box::new(buffer.clone()),
            input: Box::new(BufReader::new(io::Cursor::new(input.as_bytes().to_vec()))),
            args: Vec::new(),
            io_locked: true,
        };
        (env, buffer)
    }
}

/// A clonable in-memory sink for captured output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How a frame's execution ended.
enum End {
    Return(Value),
    Yield(Value),
}

pub struct Vm {
    pub assembly: Rc<Assembly>,
    pub heap: Heap,
    pub frames: Vec<Frame>,
    /// Freshly allocated objects kept alive across nested allocations.
    pub temporaries: Vec<ObjRef>,
    pub env: Env,
}

impl Vm {
    pub fn new(assembly: Assembly, env: Env) -> Self {
        Self {
            assembly: Rc::new(assembly),
            heap: Heap::new(),
            frames: Vec::new(),
            temporaries: Vec::new(),
            env,
        }
    }

    /// The entry function: the first non-external unit.
    pub fn entry(&self) -> usize {
        self.assembly
            .functions
            .iter()
            .position(|unit| matches!(unit, CodeUnit::Bytecode(_)))
            .unwrap_or(0)
    }

    /// Runs the program to completion.
    pub fn run(&mut self) -> Result<Value, VmError> {
        let entry = self.entry();
        self.call_function(entry, Vec::new()).map(|(value, _)| value)
    }

    // ------------------------------------------------------------------
    // heap services
    // ------------------------------------------------------------------

    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.gc();
        }
        self.heap.insert(obj)
    }

    pub fn gc(&mut self) {
        let mut roots = Vec::new();
        for frame in &self.frames {
            for (value, is_ref) in frame.stack.iter().zip(&frame.refs) {
                if *is_ref {
                    roots.push(*value);
                }
            }
        }
        for temporary in &self.temporaries {
            roots.push(Value::from_obj(*temporary));
        }
        self.heap.mark(roots);
        self.heap.sweep();
    }

    /// Runs `f` with collection suppressed, for multi-step constructions
    /// whose intermediate state must not be observed as collectable.
    fn without_gc<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.heap.disable();
        let result = f(self);
        self.heap.enable();
        result
    }

    /// Runs `f` with `obj` pinned as a GC root.
    fn with_temp<R>(&mut self, obj: ObjRef, f: impl FnOnce(&mut Self) -> R) -> R {
        self.temporaries.push(obj);
        let result = f(self);
        self.temporaries.pop();
        result
    }

    fn alloc_string(&mut self, value: String) -> ObjRef {
        self.alloc(Obj::Str(value))
    }

    // ------------------------------------------------------------------
    // calls and coroutines
    // ------------------------------------------------------------------

    /// Invokes function `func` with `captures` as its leading stack
    /// slots, returning the result value and its reference-ness.
    pub fn call_function(
        &mut self,
        func: usize,
        captures: Vec<Value>,
    ) -> Result<(Value, bool), VmError> {
        let assembly = Rc::clone(&self.assembly);
        let Some(Type::Func(_, ret)) = assembly.prototypes.get(func) else {
            return Err(VmError::fault(format!("no such function {func}")));
        };
        match &assembly.functions[func] {
            CodeUnit::External(index) => {
                let value = external::invoke(self, *index, &captures)
                    .map_err(|error| error.trace(func))?;
                Ok((value, !ret.is_value_based()))
            }
            CodeUnit::Bytecode(code) => {
                let mut frame = Frame::new(func, captures);
                let mut pc = 0;
                while pc < code.len() && code[pc].opcode == Opcode::Local {
                    let Operand::Type(typ) = &code[pc].operand else {
                        unreachable!("local carries a type operand")
                    };
                    frame.local(typ);
                    pc += 1;
                }
                frame.pc = pc;
                if pc < code.len() && code[pc].opcode == Opcode::Yield {
                    // a generator: wrap the primed frame in a coroutine
                    let element = match &**ret {
                        Type::Iter(element) => (**element).clone(),
                        other => other.clone(),
                    };
                    let coroutine = self.without_gc(|vm| {
                        vm.alloc(Obj::Coroutine(Coroutine {
                            frame: Some(frame),
                            element,
                            cache: None,
                        }))
                    });
                    return Ok((Value::from_obj(coroutine), true));
                }
                self.frames.push(frame);
                let result = self.execute(code);
                self.frames.pop();
                match result {
                    Ok(End::Return(value)) | Ok(End::Yield(value)) => {
                        Ok((value, !ret.is_value_based()))
                    }
                    Err(error) => Err(error.trace(func)),
                }
            }
        }
    }

    /// Resumes a suspended coroutine; true when it yielded a value.
    fn resume_coroutine(&mut self, obj: ObjRef) -> Result<bool, VmError> {
        let mut frame = match self.heap.get_mut(obj) {
            Obj::Coroutine(coroutine) => match coroutine.frame.take() {
                Some(frame) => frame,
                None => return Ok(false),
            },
            _ => unreachable!("resume on a non-coroutine"),
        };
        frame.pc += 1; // step past the yield it suspended on
        let func = frame.func;
        let assembly = Rc::clone(&self.assembly);
        let CodeUnit::Bytecode(code) = &assembly.functions[func] else {
            unreachable!("coroutine frame of an external function")
        };
        self.frames.push(frame);
        let result = self.execute(code);
        let frame = self.frames.pop().expect("the frame just pushed");
        match result {
            Ok(End::Yield(value)) => {
                let Obj::Coroutine(coroutine) = self.heap.get_mut(obj) else {
                    unreachable!("coroutine vanished while running")
                };
                coroutine.frame = Some(frame);
                coroutine.cache = Some(value);
                Ok(true)
            }
            Ok(End::Return(_)) => {
                let Obj::Coroutine(coroutine) = self.heap.get_mut(obj) else {
                    unreachable!("coroutine vanished while running")
                };
                coroutine.cache = None;
                Ok(false)
            }
            Err(error) => Err(error.trace(func)),
        }
    }

    // ------------------------------------------------------------------
    // the dispatch loop
    // ------------------------------------------------------------------

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn execute(&mut self, code: &[Instruction]) -> Result<End, VmError> {
        loop {
            let pc = self.frame().pc;
            let instruction = &code[pc];
            let mut next_pc = pc + 1;
            match instruction.opcode {
                Opcode::Nop => {}
                Opcode::Dup => self.frame().dup(),
                Opcode::Pop => {
                    self.frame().pop();
                }
                Opcode::Jmp => next_pc = instruction.operand.index() as usize,
                Opcode::Jmp0 => {
                    if !self.frame().pop().as_bool() {
                        next_pc = instruction.operand.index() as usize;
                    }
                }
                Opcode::Return => return Ok(End::Return(self.frame().top())),
                Opcode::Yield => return Ok(End::Yield(self.frame().top())),
                Opcode::Const => self.frame().push_value(Value(instruction.operand.index())),
                Opcode::Sconst => {
                    let text = self
                        .assembly
                        .string(instruction.operand.index() as usize)
                        .to_owned();
                    let obj = self.alloc_string(text);
                    self.frame().push(Value::from_obj(obj), true);
                }
                Opcode::Fconst => {
                    next_pc = self.fconst(instruction.operand.index() as usize, code, pc)?;
                }
                Opcode::Load => self.frame().load(instruction.operand.index() as usize),
                Opcode::Store => self.frame().store(instruction.operand.index() as usize),
                Opcode::Tload => self.tload(instruction.operand.index() as usize),
                Opcode::Lload => self.lload()?,
                Opcode::Lstore => self.lstore()?,
                Opcode::Dload => self.dload()?,
                Opcode::Dstore => self.dstore(),
                Opcode::Call => {
                    let obj = self.frame().pop().as_obj();
                    let (func, captures) = match self.heap.get(obj) {
                        Obj::Func(func) => (func.func, func.captures.clone()),
                        _ => unreachable!("call on a non-function object"),
                    };
                    let (value, is_ref) = self.call_function(func, captures)?;
                    self.frame().push(value, is_ref);
                }
                Opcode::Bind => {
                    next_pc = self.bind(instruction.operand.index() as usize, code, pc)?;
                }
                Opcode::Local => unreachable!("local outside the prologue"),
                Opcode::As => {
                    let Operand::Type(target) = &instruction.operand else {
                        unreachable!("as carries a type operand")
                    };
                    self.downcast(target.clone())?;
                }
                Opcode::Is => {
                    let Operand::Type(target) = &instruction.operand else {
                        unreachable!("is carries a type operand")
                    };
                    let obj = self.frame().pop().as_obj();
                    let matches = object::type_of(&self.heap, obj) == *target;
                    self.frame().push_value(Value::from_bool(matches));
                }
                Opcode::Any => {
                    let Operand::Type(target) = &instruction.operand else {
                        unreachable!("any carries a type operand")
                    };
                    let kind = target.scalar().unwrap_or(ScalarKind::None);
                    let value = self.frame().pop();
                    let obj = self.alloc(Obj::AnyScalar { value, kind });
                    self.frame().push(Value::from_obj(obj), true);
                }
                Opcode::I2b => {
                    let value = self.frame().pop().as_int();
                    self.frame().push_value(Value::from_int(value & 0xFF));
                }
                Opcode::I2c => {
                    let value = self.frame().pop().as_int();
                    if unicode::is_invalid_char(value) {
                        return Err(VmError::fault("invalid int to cast to char"));
                    }
                    self.frame().push_value(Value(value as u64));
                }
                Opcode::I2f => {
                    let value = self.frame().pop().as_int();
                    self.frame().push_value(Value::from_float(value as f64));
                }
                Opcode::F2i => {
                    let value = self.frame().pop().as_float();
                    self.frame().push_value(Value::from_int(value as i64));
                }
                Opcode::Tuple => {
                    let Operand::Type(typ) = &instruction.operand else {
                        unreachable!("tuple carries a type operand")
                    };
                    let Type::Tuple(types) = typ.clone() else {
                        unreachable!("tuple constructor with a non-tuple type")
                    };
                    let elements = self.frame().pop_n(types.len());
                    let obj =
                        self.without_gc(|vm| vm.alloc(Obj::Tuple { elements, types }));
                    self.frame().push(Value::from_obj(obj), true);
                }
                Opcode::List => {
                    let (typ, size) = cons_operand(instruction);
                    self.list(typ, size);
                }
                Opcode::Set => {
                    let (typ, size) = cons_operand(instruction);
                    self.set(typ, size);
                }
                Opcode::Dict => {
                    let (typ, size) = cons_operand(instruction);
                    self.dict(typ, size);
                }
                Opcode::Ineg => {
                    let value = self.frame().pop().as_int();
                    self.frame().push_value(Value::from_int(value.wrapping_neg()));
                }
                Opcode::Fneg => {
                    let value = self.frame().pop().as_float();
                    self.frame().push_value(Value::from_float(-value));
                }
                Opcode::Not => {
                    let value = self.frame().pop().as_bool();
                    self.frame().push_value(Value::from_bool(!value));
                }
                Opcode::Inv => {
                    let value = self.frame().pop().as_int();
                    self.frame().push_value(Value::from_int(!value));
                }
                Opcode::Or => self.binary_int(|a, b| a | b),
                Opcode::Xor => self.binary_int(|a, b| a ^ b),
                Opcode::And => self.binary_int(|a, b| a & b),
                Opcode::Shl => self.binary_int(|a, b| a.wrapping_shl(b as u32)),
                Opcode::Shr => self.binary_int(|a, b| a.wrapping_shr(b as u32)),
                Opcode::Ushr => {
                    let shift = self.frame().pop().as_int();
                    let value = self.frame().pop().bits();
                    self.frame()
                        .push_value(Value(value.wrapping_shr(shift as u32)));
                }
                Opcode::Sadd => {
                    let right = self.pop_string();
                    let left = self.pop_string();
                    let obj = self.alloc_string(left + &right);
                    self.frame().push(Value::from_obj(obj), true);
                }
                Opcode::Iadd => self.binary_int(i64::wrapping_add),
                Opcode::Isub => self.binary_int(i64::wrapping_sub),
                Opcode::Imul => self.binary_int(i64::wrapping_mul),
                Opcode::Idiv => self.binary_int_checked(i64::wrapping_div)?,
                Opcode::Irem => self.binary_int_checked(i64::wrapping_rem)?,
                Opcode::Fadd => self.binary_float(|a, b| a + b),
                Opcode::Fsub => self.binary_float(|a, b| a - b),
                Opcode::Fmul => self.binary_float(|a, b| a * b),
                Opcode::Fdiv => self.binary_float(|a, b| a / b),
                Opcode::Frem => self.binary_float(|a, b| a % b),
                Opcode::Inc => {
                    let index = instruction.operand.index() as usize;
                    let frame = self.frame();
                    frame.stack[index] =
                        Value::from_int(frame.stack[index].as_int().wrapping_add(1));
                }
                Opcode::Dec => {
                    let index = instruction.operand.index() as usize;
                    let frame = self.frame();
                    frame.stack[index] =
                        Value::from_int(frame.stack[index].as_int().wrapping_sub(1));
                }
                Opcode::Ucmp => {
                    let right = self.frame().pop().bits();
                    let left = self.frame().pop().bits();
                    next_pc =
                        self.finish_compare(left.partial_cmp(&right), instruction, code, pc);
                }
                Opcode::Icmp => {
                    let right = self.frame().pop().as_int();
                    let left = self.frame().pop().as_int();
                    next_pc =
                        self.finish_compare(left.partial_cmp(&right), instruction, code, pc);
                }
                Opcode::Fcmp => {
                    let right = self.frame().pop().as_float();
                    let left = self.frame().pop().as_float();
                    next_pc =
                        self.finish_compare(left.partial_cmp(&right), instruction, code, pc);
                }
                Opcode::Scmp => {
                    let right = self.pop_string();
                    let left = self.pop_string();
                    next_pc =
                        self.finish_compare(left.partial_cmp(&right), instruction, code, pc);
                }
                Opcode::Ocmp => {
                    let right = self.frame().pop().as_obj();
                    let left = self.frame().pop().as_obj();
                    let ordering = if obj_equals(&self.heap, left, right) {
                        Some(Ordering::Equal)
                    } else {
                        None
                    };
                    next_pc = self.finish_compare(ordering, instruction, code, pc);
                }
                Opcode::Iter => self.iter(),
                Opcode::Move => {
                    let obj = self.frame().pop().as_obj();
                    let moved = self.with_temp(obj, |vm| vm.advance(obj))?;
                    self.frame().push_value(Value::from_bool(moved));
                }
                Opcode::Get => self.get()?,
                Opcode::I2s => self.to_string_op(Type::INT),
                Opcode::F2s => self.to_string_op(Type::FLOAT),
                Opcode::B2s => self.to_string_op(Type::BYTE),
                Opcode::Z2s => self.to_string_op(Type::BOOL),
                Opcode::C2s => self.to_string_op(Type::CHAR),
                Opcode::O2s => {
                    let obj = self.frame().pop().as_obj();
                    let text = self.with_temp(obj, |vm| {
                        let text = obj_to_string(&vm.heap, obj);
                        vm.alloc_string(text)
                    });
                    self.frame().push(Value::from_obj(text), true);
                }
                Opcode::Add => self.collection_add(),
                Opcode::Remove => self.collection_remove(),
                Opcode::In => {
                    let obj = self.frame().pop().as_obj();
                    let value = self.frame().pop();
                    let contains = self.contains(obj, value);
                    self.frame().push_value(Value::from_bool(contains));
                }
                Opcode::Sizeof => {
                    let obj = self.frame().pop().as_obj();
                    let size = match self.heap.get(obj) {
                        Obj::Str(value) => value.len(),
                        Obj::List(repr) => repr.len(),
                        Obj::Set(repr) => repr.len(),
                        Obj::Dict(repr) => repr.len(),
                        _ => unreachable!("sizeof on an unsized object"),
                    };
                    self.frame().push_value(Value::from_int(size as i64));
                }
                Opcode::Fhash => {
                    let value = self.frame().pop();
                    let hash = value_hash(&self.heap, value, porkchop_sem::IdentityKind::Float);
                    self.frame().push_value(Value(hash));
                }
                Opcode::Ohash => {
                    let obj = self.frame().pop().as_obj();
                    let hash = obj_hash(&self.heap, obj);
                    self.frame().push_value(Value(hash));
                }
                Opcode::Sjoin => {
                    let count = instruction.operand.index() as usize;
                    let parts = self.frame().pop_n(count);
                    let mut joined = String::new();
                    for part in parts {
                        match self.heap.get(part.as_obj()) {
                            Obj::Str(value) => joined.push_str(value),
                            _ => unreachable!("sjoin on a non-string"),
                        }
                    }
                    let obj = self.alloc_string(joined);
                    self.frame().push(Value::from_obj(obj), true);
                }
            }
            self.frame().pc = next_pc;
        }
    }

    // ------------------------------------------------------------------
    // opcode bodies
    // ------------------------------------------------------------------

    fn binary_int(&mut self, op: impl FnOnce(i64, i64) -> i64) {
        let right = self.frame().pop().as_int();
        let left = self.frame().pop().as_int();
        self.frame().push_value(Value::from_int(op(left, right)));
    }

    fn binary_int_checked(
        &mut self,
        op: impl FnOnce(i64, i64) -> i64,
    ) -> Result<(), VmError> {
        let right = self.frame().pop().as_int();
        if right == 0 {
            return Err(VmError::fault("divided by zero"));
        }
        let left = self.frame().pop().as_int();
        self.frame().push_value(Value::from_int(op(left, right)));
        Ok(())
    }

    fn binary_float(&mut self, op: impl FnOnce(f64, f64) -> f64) {
        let right = self.frame().pop().as_float();
        let left = self.frame().pop().as_float();
        self.frame().push_value(Value::from_float(op(left, right)));
    }

    fn pop_string(&mut self) -> String {
        let obj = self.frame().pop().as_obj();
        match self.heap.get(obj) {
            Obj::Str(value) => value.clone(),
            _ => unreachable!("expected a string object"),
        }
    }

    fn finish_compare(
        &mut self,
        ordering: Option<Ordering>,
        instruction: &Instruction,
        code: &[Instruction],
        pc: usize,
    ) -> usize {
        let result = match instruction.operand.index() {
            0 => ordering == Some(Ordering::Equal),
            1 => ordering != Some(Ordering::Equal),
            2 => ordering == Some(Ordering::Less),
            3 => ordering == Some(Ordering::Greater),
            4 => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            5 => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            _ => unreachable!("unknown comparison sub-opcode"),
        };
        // a following JMP0 consumes the result directly
        if let Some(next) = code.get(pc + 1) {
            if next.opcode == Opcode::Jmp0 {
                return if result {
                    pc + 2
                } else {
                    next.operand.index() as usize
                };
            }
        }
        self.frame().push_value(Value::from_bool(result));
        pc + 1
    }

    fn fconst(
        &mut self,
        index: usize,
        code: &[Instruction],
        pc: usize,
    ) -> Result<usize, VmError> {
        let prototype = self.assembly.prototypes[index].clone();
        let next = code.get(pc + 1).map(|i| i.opcode);
        let after = code.get(pc + 2).map(|i| i.opcode);
        if next == Some(Opcode::Bind) && after == Some(Opcode::Call) {
            let size = code[pc + 1].operand.index() as usize;
            let args = self.frame().pop_n(size);
            let (value, is_ref) = self.call_function(index, args)?;
            self.frame().push(value, is_ref);
            return Ok(pc + 3);
        }
        if next == Some(Opcode::Call) {
            let (value, is_ref) = self.call_function(index, Vec::new())?;
            self.frame().push(value, is_ref);
            return Ok(pc + 2);
        }
        if next == Some(Opcode::Bind) {
            let size = code[pc + 1].operand.index() as usize;
            let captures = self.frame().pop_n(size);
            let obj = self.make_bound(index, prototype, Vec::new(), Vec::new(), captures);
            self.frame().push(Value::from_obj(obj), true);
            return Ok(pc + 2);
        }
        let obj = self.alloc(Obj::Func(FuncObj {
            func: index,
            prototype,
            captures: Vec::new(),
            capture_refs: Vec::new(),
        }));
        self.frame().push(Value::from_obj(obj), true);
        Ok(pc + 1)
    }

    fn make_bound(
        &mut self,
        func: usize,
        prototype: Type,
        captures: Vec<Value>,
        capture_refs: Vec<bool>,
        bound: Vec<Value>,
    ) -> ObjRef {
        let Type::Func(parameters, ret) = prototype else {
            unreachable!("binding a non-function prototype")
        };
        let mut captures = captures;
        let mut capture_refs = capture_refs;
        capture_refs.extend(
            parameters[..bound.len()]
                .iter()
                .map(|parameter| !parameter.is_value_based()),
        );
        let bound_len = bound.len();
        captures.extend(bound);
        let remaining = Type::Func(parameters[bound_len..].to_vec(), ret);
        self.without_gc(|vm| {
            vm.alloc(Obj::Func(FuncObj {
                func,
                prototype: remaining,
                captures,
                capture_refs,
            }))
        })
    }

    fn bind(
        &mut self,
        size: usize,
        code: &[Instruction],
        pc: usize,
    ) -> Result<usize, VmError> {
        let obj = self.frame().pop().as_obj();
        let bound = self.frame().pop_n(size);
        if code.get(pc + 1).map(|i| i.opcode) == Some(Opcode::Call) {
            let (func, mut captures) = match self.heap.get(obj) {
                Obj::Func(func) => (func.func, func.captures.clone()),
                _ => unreachable!("bind on a non-function object"),
            };
            captures.extend(bound);
            let (value, is_ref) = self.call_function(func, captures)?;
            self.frame().push(value, is_ref);
            return Ok(pc + 2);
        }
        let (func, prototype, captures, capture_refs) = match self.heap.get(obj) {
            Obj::Func(func) => (
                func.func,
                func.prototype.clone(),
                func.captures.clone(),
                func.capture_refs.clone(),
            ),
            _ => unreachable!("bind on a non-function object"),
        };
        let new = self.with_temp(obj, |vm| {
            vm.make_bound(func, prototype, captures, capture_refs, bound)
        });
        self.frame().push(Value::from_obj(new), true);
        Ok(pc + 1)
    }

    fn downcast(&mut self, target: Type) -> Result<(), VmError> {
        let obj = self.frame().pop().as_obj();
        let actual = object::type_of(&self.heap, obj);
        if !target.assignable_from(&actual) {
            return Err(VmError::fault(format!(
                "cannot cast {actual} to {target}"
            )));
        }
        if target.is_value_based() {
            let value = match self.heap.get(obj) {
                Obj::AnyScalar { value, .. } => *value,
                _ => unreachable!("value-based cast source is boxed"),
            };
            self.frame().push_value(value);
        } else {
            self.frame().push(Value::from_obj(obj), true);
        }
        Ok(())
    }

    fn tload(&mut self, index: usize) {
        let obj = self.frame().pop().as_obj();
        let (value, is_ref) = match self.heap.get(obj) {
            Obj::Tuple { elements, types } => {
                (elements[index], !types[index].is_value_based())
            }
            _ => unreachable!("tload on a non-tuple object"),
        };
        self.frame().push(value, is_ref);
    }

    fn lload(&mut self) -> Result<(), VmError> {
        let index = self.frame().pop().as_int();
        let obj = self.frame().pop().as_obj();
        let (value, is_ref) = match self.heap.get(obj) {
            Obj::List(repr) => {
                if index < 0 || index as usize >= repr.len() {
                    return Err(VmError::fault("index out of bound"));
                }
                (repr.load(index as usize), repr.holds_objects())
            }
            _ => unreachable!("lload on a non-list object"),
        };
        self.frame().push(value, is_ref);
        Ok(())
    }

    fn lstore(&mut self) -> Result<(), VmError> {
        let index = self.frame().pop().as_int();
        let obj = self.frame().pop().as_obj();
        let value = self.frame().top();
        match self.heap.get_mut(obj) {
            Obj::List(repr) => {
                if index < 0 || index as usize >= repr.len() {
                    return Err(VmError::fault("index out of bound"));
                }
                repr.store(index as usize, value);
            }
            _ => unreachable!("lstore on a non-list object"),
        }
        Ok(())
    }

    fn dict_key_kind(&self, obj: ObjRef) -> porkchop_sem::IdentityKind {
        match self.heap.get(obj) {
            Obj::Dict(repr) => identity_kind(&repr.key),
            _ => unreachable!("dict operation on a non-dict object"),
        }
    }

    fn dload(&mut self) -> Result<(), VmError> {
        let key = self.frame().pop();
        let obj = self.frame().pop().as_obj();
        let kind = self.dict_key_kind(obj);
        let hash = value_hash(&self.heap, key, kind);
        let (entry, is_ref) = match self.heap.get(obj) {
            Obj::Dict(repr) => {
                let found = repr.buckets.get(&hash).and_then(|bucket| {
                    bucket
                        .iter()
                        .find(|(candidate, _)| {
                            value_equals(&self.heap, *candidate, key, kind)
                        })
                        .map(|(_, value)| *value)
                });
                (found, !repr.value.is_value_based())
            }
            _ => unreachable!("dload on a non-dict object"),
        };
        let Some(value) = entry else {
            return Err(VmError::fault("missing such a key"));
        };
        self.frame().push(value, is_ref);
        Ok(())
    }

    fn dstore(&mut self) {
        let key = self.frame().pop();
        let obj = self.frame().pop().as_obj();
        let value = self.frame().top();
        self.dict_insert(obj, key, value);
    }

    fn dict_insert(&mut self, obj: ObjRef, key: Value, value: Value) {
        let kind = self.dict_key_kind(obj);
        let hash = value_hash(&self.heap, key, kind);
        // locate the entry first, then mutate
        let position = match self.heap.get(obj) {
            Obj::Dict(repr) => repr.buckets.get(&hash).and_then(|bucket| {
                bucket
                    .iter()
                    .position(|(candidate, _)| value_equals(&self.heap, *candidate, key, kind))
            }),
            _ => unreachable!("dict insert on a non-dict object"),
        };
        match self.heap.get_mut(obj) {
            Obj::Dict(repr) => {
                let bucket = repr.buckets.entry(hash).or_default();
                match position {
                    Some(index) => bucket[index].1 = value,
                    None => bucket.push((key, value)),
                }
            }
            _ => unreachable!("dict insert on a non-dict object"),
        }
    }

    fn list(&mut self, typ: &Type, size: usize) {
        let elements = self.frame().pop_n(size);
        let Type::List(element) = typ else {
            unreachable!("list constructor with a non-list type")
        };
        let repr = match element.scalar() {
            Some(ScalarKind::None) => ListRepr::None { count: size },
            Some(ScalarKind::Bool) => {
                ListRepr::Bool(elements.iter().map(|v| v.as_bool()).collect())
            }
            Some(ScalarKind::Byte) => {
                ListRepr::Byte(elements.iter().map(|v| v.as_byte()).collect())
            }
            Some(kind) if element.is_value_based() => ListRepr::Scalar { elements, kind },
            _ => ListRepr::Object {
                elements,
                element: (**element).clone(),
            },
        };
        let obj = self.without_gc(|vm| vm.alloc(Obj::List(repr)));
        self.frame().push(Value::from_obj(obj), true);
    }

    fn set(&mut self, typ: &Type, size: usize) {
        let elements = self.frame().pop_n(size);
        let Type::Set(element) = typ else {
            unreachable!("set constructor with a non-set type")
        };
        let obj = self.without_gc(|vm| {
            let repr = match element.scalar() {
                Some(ScalarKind::None) => SetRepr::None {
                    state: !elements.is_empty(),
                },
                Some(ScalarKind::Bool) => {
                    let mut states = [false; 2];
                    for value in &elements {
                        states[value.as_bool() as usize] = true;
                    }
                    SetRepr::Bool { states }
                }
                Some(ScalarKind::Byte) => {
                    let mut bits = Box::new([0u64; 4]);
                    for value in &elements {
                        let byte = value.as_byte();
                        bits[(byte / 64) as usize] |= 1u64 << (byte % 64);
                    }
                    SetRepr::Byte { bits }
                }
                _ => {
                    let kind = identity_kind(element);
                    let mut buckets: rustc_hash::FxHashMap<u64, Vec<Value>> =
                        rustc_hash::FxHashMap::default();
                    for value in elements {
                        let hash = value_hash(&vm.heap, value, kind);
                        let bucket = buckets.entry(hash).or_default();
                        if !bucket
                            .iter()
                            .any(|existing| value_equals(&vm.heap, *existing, value, kind))
                        {
                            bucket.push(value);
                        }
                    }
                    SetRepr::Hashed {
                        buckets,
                        element: (**element).clone(),
                    }
                }
            };
            vm.alloc(Obj::Set(repr))
        });
        self.frame().push(Value::from_obj(obj), true);
    }

    fn dict(&mut self, typ: &Type, size: usize) {
        let elements = self.frame().pop_n(size * 2);
        let Type::Dict(key_type, value_type) = typ else {
            unreachable!("dict constructor with a non-dict type")
        };
        let kind = identity_kind(key_type);
        let obj = self.without_gc(|vm| {
            let mut repr = DictRepr {
                buckets: rustc_hash::FxHashMap::default(),
                key: (**key_type).clone(),
                value: (**value_type).clone(),
            };
            for pair in elements.chunks_exact(2) {
                let (key, value) = (pair[0], pair[1]);
                let hash = value_hash(&vm.heap, key, kind);
                let bucket = repr.buckets.entry(hash).or_default();
                match bucket
                    .iter()
                    .position(|(existing, _)| value_equals(&vm.heap, *existing, key, kind))
                {
                    Some(index) => bucket[index].1 = value,
                    None => bucket.push((key, value)),
                }
            }
            vm.alloc(Obj::Dict(repr))
        });
        self.frame().push(Value::from_obj(obj), true);
    }

    fn iter(&mut self) {
        let obj = self.frame().pop().as_obj();
        let iterator = self.with_temp(obj, |vm| match vm.heap.get(obj) {
            Obj::List(repr) => {
                let refs = repr.holds_objects();
                vm.alloc(Obj::ListIter {
                    list: obj,
                    pos: 0,
                    cache: None,
                    refs,
                })
            }
            Obj::Set(repr) => {
                let items = repr.items();
                let refs = !repr.element_type().is_value_based();
                vm.alloc(Obj::SetIter {
                    set: obj,
                    items,
                    pos: 0,
                    cache: None,
                    refs,
                })
            }
            Obj::Dict(repr) => {
                let items = repr.items();
                let key_refs = !repr.key.is_value_based();
                let value_refs = !repr.value.is_value_based();
                vm.alloc(Obj::DictIter {
                    dict: obj,
                    items,
                    pos: 0,
                    cache: None,
                    key_refs,
                    value_refs,
                })
            }
            // an iterator (or coroutine) is its own iterator
            _ => obj,
        });
        self.frame().push(Value::from_obj(iterator), true);
    }

    /// MOVE: advances an iterator, filling its cache.
    fn advance(&mut self, obj: ObjRef) -> Result<bool, VmError> {
        enum Step {
            List { pos: usize },
            Snapshot,
            Dict { key: Value, value: Value },
            Coroutine,
            Done,
        }
        let step = match self.heap.get(obj) {
            Obj::ListIter { pos, .. } => Step::List { pos: *pos },
            Obj::SetIter { items, pos, .. } => {
                if *pos < items.len() {
                    Step::Snapshot
                } else {
                    Step::Done
                }
            }
            Obj::DictIter { items, pos, .. } => {
                if *pos < items.len() {
                    let (key, value) = items[*pos];
                    Step::Dict { key, value }
                } else {
                    Step::Done
                }
            }
            Obj::Coroutine(_) => Step::Coroutine,
            _ => unreachable!("move on a non-iterator object"),
        };
        match step {
            Step::Done => Ok(false),
            Step::Coroutine => self.resume_coroutine(obj),
            Step::List { pos } => {
                let Obj::ListIter { list, .. } = self.heap.get(obj) else {
                    unreachable!()
                };
                let list = *list;
                let element = match self.heap.get(list) {
                    Obj::List(repr) if pos < repr.len() => Some(repr.load(pos)),
                    Obj::List(_) => None,
                    _ => unreachable!("list iterator over a non-list"),
                };
                let Obj::ListIter { pos: cursor, cache, .. } = self.heap.get_mut(obj) else {
                    unreachable!()
                };
                match element {
                    Some(value) => {
                        *cursor = pos + 1;
                        *cache = Some(value);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Step::Snapshot => {
                let Obj::SetIter { items, pos, cache, .. } = self.heap.get_mut(obj) else {
                    unreachable!()
                };
                *cache = Some(items[*pos]);
                *pos += 1;
                Ok(true)
            }
            Step::Dict { key, value } => {
                let (key_type, value_type) = match self.heap.get(obj) {
                    Obj::DictIter { dict, .. } => match self.heap.get(*dict) {
                        Obj::Dict(repr) => (repr.key.clone(), repr.value.clone()),
                        _ => unreachable!("dict iterator over a non-dict"),
                    },
                    _ => unreachable!(),
                };
                let pair = self.without_gc(|vm| {
                    vm.alloc(Obj::Tuple {
                        elements: vec![key, value],
                        types: vec![key_type, value_type],
                    })
                });
                let Obj::DictIter { pos, cache, .. } = self.heap.get_mut(obj) else {
                    unreachable!()
                };
                *pos += 1;
                *cache = Some(Value::from_obj(pair));
                Ok(true)
            }
        }
    }

    /// GET: reads the iterator cache.
    fn get(&mut self) -> Result<(), VmError> {
        let obj = self.frame().pop().as_obj();
        let (value, is_ref) = match self.heap.get(obj) {
            Obj::ListIter { cache, refs, .. } => (*cache, *refs),
            Obj::SetIter { cache, refs, .. } => (*cache, *refs),
            Obj::DictIter { cache, .. } => (*cache, true),
            Obj::Coroutine(coroutine) => {
                (coroutine.cache, !coroutine.element.is_value_based())
            }
            _ => unreachable!("get on a non-iterator object"),
        };
        let Some(value) = value else {
            return Err(VmError::fault("iterator has no value to yield"));
        };
        self.frame().push(value, is_ref);
        Ok(())
    }

    fn to_string_op(&mut self, typ: Type) {
        let value = self.frame().pop();
        let text = value_to_string(&self.heap, value, &typ);
        let obj = self.alloc_string(text);
        self.frame().push(Value::from_obj(obj), true);
    }

    fn contains(&self, obj: ObjRef, value: Value) -> bool {
        match self.heap.get(obj) {
            Obj::List(repr) => {
                let kind = identity_kind(&repr.element_type());
                (0..repr.len())
                    .any(|i| value_equals(&self.heap, repr.load(i), value, kind))
            }
            Obj::Set(repr) => match repr {
                SetRepr::None { state } => *state,
                SetRepr::Bool { states } => states[value.as_bool() as usize],
                SetRepr::Byte { bits } => {
                    let byte = value.as_byte();
                    bits[(byte / 64) as usize] & (1u64 << (byte % 64)) != 0
                }
                SetRepr::Hashed { buckets, element } => {
                    let kind = identity_kind(element);
                    let hash = value_hash(&self.heap, value, kind);
                    buckets.get(&hash).is_some_and(|bucket| {
                        bucket
                            .iter()
                            .any(|existing| value_equals(&self.heap, *existing, value, kind))
                    })
                }
            },
            Obj::Dict(repr) => {
                let kind = identity_kind(&repr.key);
                let hash = value_hash(&self.heap, value, kind);
                repr.buckets.get(&hash).is_some_and(|bucket| {
                    bucket
                        .iter()
                        .any(|(key, _)| value_equals(&self.heap, *key, value, kind))
                })
            }
            _ => unreachable!("containment on a non-collection object"),
        }
    }

    /// ADD: inserts into a collection and leaves the collection.
    fn collection_add(&mut self) {
        let value = self.frame().pop();
        let obj = self.frame().pop().as_obj();
        match self.heap.get(obj) {
            Obj::List(_) => match self.heap.get_mut(obj) {
                Obj::List(repr) => repr.push(value),
                _ => unreachable!(),
            },
            Obj::Set(_) => self.set_add(obj, value),
            Obj::Dict(_) => {
                // the element of a dict is a (key, value) pair
                let (key, entry) = match self.heap.get(value.as_obj()) {
                    Obj::Tuple { elements, .. } => (elements[0], elements[1]),
                    _ => unreachable!("dict element is a pair"),
                };
                self.dict_insert(obj, key, entry);
            }
            _ => unreachable!("add on a non-collection object"),
        }
        self.frame().push(Value::from_obj(obj), true);
    }

    fn set_add(&mut self, obj: ObjRef, value: Value) {
        let (kind, hash, exists) = match self.heap.get(obj) {
            Obj::Set(SetRepr::Hashed { buckets, element }) => {
                let kind = identity_kind(element);
                let hash = value_hash(&self.heap, value, kind);
                let exists = buckets.get(&hash).is_some_and(|bucket| {
                    bucket
                        .iter()
                        .any(|existing| value_equals(&self.heap, *existing, value, kind))
                });
                (Some(kind), hash, exists)
            }
            Obj::Set(_) => (None, 0, false),
            _ => unreachable!("set add on a non-set object"),
        };
        match self.heap.get_mut(obj) {
            Obj::Set(SetRepr::None { state }) => *state = true,
            Obj::Set(SetRepr::Bool { states }) => states[value.as_bool() as usize] = true,
            Obj::Set(SetRepr::Byte { bits }) => {
                let byte = value.as_byte();
                bits[(byte / 64) as usize] |= 1u64 << (byte % 64);
            }
            Obj::Set(SetRepr::Hashed { buckets, .. }) => {
                debug_assert!(kind.is_some());
                if !exists {
                    buckets.entry(hash).or_default().push(value);
                }
            }
            _ => unreachable!("set add on a non-set object"),
        }
    }

    /// REMOVE: removes from a collection and leaves the collection.
    fn collection_remove(&mut self) {
        let value = self.frame().pop();
        let obj = self.frame().pop().as_obj();
        match self.heap.get(obj) {
            Obj::List(repr) => {
                let kind = identity_kind(&repr.element_type());
                let position = (0..repr.len())
                    .find(|i| value_equals(&self.heap, repr.load(*i), value, kind));
                if let Some(index) = position {
                    match self.heap.get_mut(obj) {
                        Obj::List(ListRepr::None { count }) => *count -= 1,
                        Obj::List(ListRepr::Bool(elements)) => {
                            elements.remove(index);
                        }
                        Obj::List(ListRepr::Byte(elements)) => {
                            elements.remove(index);
                        }
                        Obj::List(ListRepr::Scalar { elements, .. }) => {
                            elements.remove(index);
                        }
                        Obj::List(ListRepr::Object { elements, .. }) => {
                            elements.remove(index);
                        }
                        _ => unreachable!(),
                    }
                }
            }
            Obj::Set(_) => self.set_remove(obj, value),
            Obj::Dict(repr) => {
                let kind = identity_kind(&repr.key);
                let hash = value_hash(&self.heap, value, kind);
                let position = repr.buckets.get(&hash).and_then(|bucket| {
                    bucket
                        .iter()
                        .position(|(key, _)| value_equals(&self.heap, *key, value, kind))
                });
                if let Some(index) = position {
                    match self.heap.get_mut(obj) {
                        Obj::Dict(repr) => {
                            repr.buckets.get_mut(&hash).expect("bucket exists").remove(index);
                        }
                        _ => unreachable!(),
                    }
                }
            }
            _ => unreachable!("remove on a non-collection object"),
        }
        self.frame().push(Value::from_obj(obj), true);
    }

    fn set_remove(&mut self, obj: ObjRef, value: Value) {
        let removal = match self.heap.get(obj) {
            Obj::Set(SetRepr::Hashed { buckets, element }) => {
                let kind = identity_kind(element);
                let hash = value_hash(&self.heap, value, kind);
                buckets
                    .get(&hash)
                    .and_then(|bucket| {
                        bucket
                            .iter()
                            .position(|existing| value_equals(&self.heap, *existing, value, kind))
                    })
                    .map(|index| (hash, index))
            }
            Obj::Set(_) => None,
            _ => unreachable!("set remove on a non-set object"),
        };
        match self.heap.get_mut(obj) {
            Obj::Set(SetRepr::None { state }) => *state = false,
            Obj::Set(SetRepr::Bool { states }) => states[value.as_bool() as usize] = false,
            Obj::Set(SetRepr::Byte { bits }) => {
                let byte = value.as_byte();
                bits[(byte / 64) as usize] &= !(1u64 << (byte % 64));
            }
            Obj::Set(SetRepr::Hashed { buckets, .. }) => {
                if let Some((hash, index)) = removal {
                    buckets.get_mut(&hash).expect("bucket exists").remove(index);
                }
            }
            _ => unreachable!("set remove on a non-set object"),
        }
    }
}

fn cons_operand(instruction: &Instruction) -> (&Type, usize) {
    match &instruction.operand {
        Operand::Cons(typ, size) => (typ, *size as usize),
        _ => unreachable!("constructor carries a cons operand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porkchop_gen::{Assembler, Interpretation};

    fn run_single(build: impl FnOnce(&mut Interpretation)) -> Result<Value, VmError> {
        let mut sink = Interpretation::new(0);
        build(&mut sink);
        let (env, _) = Env::captured("");
        Vm::new(sink.finish(), env).run()
    }

    #[test]
    fn test_arithmetic() {
        let value = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::INT));
            sink.begin_function();
            sink.const_int(2);
            sink.const_int(3);
            sink.opcode(Opcode::Iadd);
            sink.const_int(4);
            sink.opcode(Opcode::Imul);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap();
        assert_eq!(value.as_int(), 20);
    }

    #[test]
    fn test_divide_by_zero_faults() {
        let error = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::INT));
            sink.begin_function();
            sink.const_int(1);
            sink.const_int(0);
            sink.opcode(Opcode::Idiv);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap_err();
        assert!(error.to_string().contains("divided by zero"));
        assert!(error.to_string().contains("at func 0"));
    }

    #[test]
    fn test_jump_and_compare_fusion() {
        // if 1 < 2 { 10 } else { 20 }
        let value = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::INT));
            sink.begin_function();
            sink.const_int(1);
            sink.const_int(2);
            sink.indexed(Opcode::Icmp, 2); // LT, fused with the jmp0
            sink.labeled(Opcode::Jmp0, 0);
            sink.const_int(10);
            sink.labeled(Opcode::Jmp, 1);
            sink.label(0);
            sink.const_int(20);
            sink.label(1);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap();
        assert_eq!(value.as_int(), 10);
    }

    #[test]
    fn test_list_iteration() {
        // sum [1,2,3] with ITER/MOVE/GET
        let value = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::INT));
            sink.begin_function();
            sink.typed(Opcode::Local, &Type::INT); // the running sum
            sink.const_int(1);
            sink.const_int(2);
            sink.const_int(3);
            sink.cons(Opcode::List, &Type::list(Type::INT), 3);
            sink.opcode(Opcode::Iter);
            sink.label(0);
            sink.opcode(Opcode::Dup);
            sink.opcode(Opcode::Move);
            sink.labeled(Opcode::Jmp0, 1);
            sink.opcode(Opcode::Dup);
            sink.opcode(Opcode::Get);
            sink.indexed(Opcode::Load, 0);
            sink.opcode(Opcode::Iadd);
            sink.indexed(Opcode::Store, 0);
            sink.opcode(Opcode::Pop);
            sink.labeled(Opcode::Jmp, 0);
            sink.label(1);
            sink.opcode(Opcode::Pop);
            sink.indexed(Opcode::Load, 0);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap();
        assert_eq!(value.as_int(), 6);
    }

    #[test]
    fn test_any_boxing_roundtrip() {
        let value = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::INT));
            sink.begin_function();
            sink.const_int(41);
            sink.typed(Opcode::Any, &Type::INT);
            sink.typed(Opcode::As, &Type::INT);
            sink.const_int(1);
            sink.opcode(Opcode::Iadd);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap();
        assert_eq!(value.as_int(), 42);
    }

    #[test]
    fn test_bad_cast_faults() {
        let error = run_single(|sink| {
            sink.func(&Type::func(vec![], Type::STRING));
            sink.begin_function();
            sink.const_int(1);
            sink.typed(Opcode::Any, &Type::INT);
            sink.typed(Opcode::As, &Type::STRING);
            sink.opcode(Opcode::Return);
            sink.end_function();
        })
        .unwrap_err();
        assert!(error.to_string().contains("cannot cast int to string"));
    }

    #[test]
    fn test_gc_during_execution() {
        // build many short-lived strings, then check the heap stayed small
        let mut sink = Interpretation::new(0);
        sink.func(&Type::func(vec![], Type::INT));
        sink.begin_function();
        sink.typed(Opcode::Local, &Type::INT);
        sink.label(0);
        sink.indexed(Opcode::Load, 0);
        sink.const_int(3000);
        sink.indexed(Opcode::Icmp, 2); // LT
        sink.labeled(Opcode::Jmp0, 1);
        sink.sconst("transient");
        sink.opcode(Opcode::Pop);
        sink.indexed(Opcode::Inc, 0);
        sink.labeled(Opcode::Jmp, 0);
        sink.label(1);
        sink.indexed(Opcode::Load, 0);
        sink.opcode(Opcode::Return);
        sink.end_function();
        let (env, _) = Env::captured("");
        let mut vm = Vm::new(sink.finish(), env);
        let value = vm.run().unwrap();
        assert_eq!(value.as_int(), 3000);
        // far fewer live objects than allocations
        assert!(vm.heap.len() < 3000);
    }
}

