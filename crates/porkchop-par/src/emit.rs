//! Bytecode emission over the typed tree.
//!
//! Each function of the continuum is walked once per sink. Jump targets
//! use label indices drawn from one program-wide counter; the sink
//! rewrites them to instruction offsets. Implicit widening into `any`
//! boxes value scalars at every assignment-shaped edge (stores, calls,
//! returns), keeping the reference tags on stack slots truthful.

use porkchop_gen::{Assembler, Opcode};
use porkchop_lex::TokenKind;
use porkchop_sem::{identity_kind, IdentityKind, ScalarKind, Type};

use crate::ast::{Declarator, DeclaratorKind, Expr, ExprKind, Lookup};
use crate::function::{Continuum, FunctionDefinition, FunctionReference};

/// Emits the whole continuum through `asm`: first every prototype, then
/// every function body in index order.
pub fn compile(continuum: &Continuum, asm: &mut dyn Assembler) {
    for reference in &continuum.functions {
        asm.func(reference.prototype());
    }
    let mut labels = 0usize;
    for reference in &continuum.functions {
        let definition = match reference {
            FunctionReference::External { .. } => continue,
            FunctionReference::Named { definition, .. } => definition
                .as_ref()
                .unwrap_or_else(|| unreachable!("declared function without definition")),
            FunctionReference::Lambda { definition } => definition,
            FunctionReference::Main { definition } => definition
                .as_ref()
                .unwrap_or_else(|| unreachable!("main is not defined")),
        };
        emit_function(definition, asm, &mut labels);
    }
}

fn emit_function(def: &FunctionDefinition, asm: &mut dyn Assembler, labels: &mut usize) {
    let Type::Func(_, ret) = &def.prototype else {
        unreachable!("function prototype is not a function type")
    };
    asm.begin_function();
    for typ in &def.locals {
        asm.typed(Opcode::Local, typ);
    }
    if def.generator {
        // suspend immediately: the call wraps this frame in a coroutine
        asm.opcode(Opcode::Yield);
    }
    let mut gen = CodeGen {
        asm,
        labels,
        loops: Vec::new(),
        ret: (**ret).clone(),
    };
    gen.emit(&def.body);
    if !def.generator {
        let ret = gen.ret.clone();
        gen.convert(&def.body.typ, &ret);
    }
    gen.asm.opcode(Opcode::Return);
    gen.asm.end_function();
}

struct CodeGen<'a> {
    asm: &'a mut dyn Assembler,
    labels: &'a mut usize,
    /// Break targets of the open loops, innermost last.
    loops: Vec<usize>,
    /// Declared return type of the function being emitted.
    ret: Type,
}

impl<'a> CodeGen<'a> {
    fn fresh_label(&mut self) -> usize {
        let label = *self.labels;
        *self.labels += 1;
        label
    }

    /// Boxes a value scalar when it flows into an `any` slot.
    fn convert(&mut self, from: &Type, to: &Type) {
        if to.is_any() && from.is_value_based() {
            self.asm.typed(Opcode::Any, from);
        }
    }

    fn emit_converted(&mut self, expr: &Expr, to: &Type) {
        self.emit(expr);
        self.convert(&expr.typ, to);
    }

    fn emit_if_else(
        &mut self,
        cond: &Expr,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) {
        let label_else = self.fresh_label();
        let label_end = self.fresh_label();
        self.emit(cond);
        self.asm.labeled(Opcode::Jmp0, label_else);
        then(self);
        self.asm.labeled(Opcode::Jmp, label_end);
        self.asm.label(label_else);
        otherwise(self);
        self.asm.label(label_end);
    }

    /// Emits the `*2S` conversion that leaves a string for `+` on strings.
    fn stringify(&mut self, typ: &Type) {
        match typ.scalar() {
            Some(ScalarKind::None) => {
                self.asm.opcode(Opcode::Pop);
                self.asm.sconst("()");
            }
            Some(ScalarKind::Bool) => self.asm.opcode(Opcode::Z2s),
            Some(ScalarKind::Byte) => self.asm.opcode(Opcode::B2s),
            Some(ScalarKind::Int) => self.asm.opcode(Opcode::I2s),
            Some(ScalarKind::Float) => self.asm.opcode(Opcode::F2s),
            Some(ScalarKind::Char) => self.asm.opcode(Opcode::C2s),
            Some(ScalarKind::String) => {}
            _ => self.asm.opcode(Opcode::O2s),
        }
    }

    fn emit(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::BoolConst(value) => self.asm.const_bool(*value),
            ExprKind::CharConst(value) => self.asm.const_raw(*value as u64),
            ExprKind::StringConst(value) => self.asm.sconst(value),
            ExprKind::IntConst(value) => self.asm.const_int(*value),
            ExprKind::FloatConst(value) => self.asm.const_float(*value),
            ExprKind::Id(lookup) => match lookup {
                Lookup::None => self.asm.const0(),
                Lookup::Local(index) => self.asm.indexed(Opcode::Load, *index),
                Lookup::Function(index) => self.asm.indexed(Opcode::Fconst, *index),
            },
            ExprKind::Prefix { op, rhs } => self.emit_prefix(*op, rhs),
            ExprKind::StatefulPrefix { increment, rhs } => {
                let step = if *increment { Opcode::Inc } else { Opcode::Dec };
                if let ExprKind::Id(Lookup::Local(index)) = rhs.kind {
                    self.asm.indexed(step, index);
                    self.asm.indexed(Opcode::Load, index);
                } else {
                    self.emit(rhs);
                    self.asm.const1();
                    self.asm.opcode(if *increment { Opcode::Iadd } else { Opcode::Isub });
                    self.emit_store(rhs, &Type::INT);
                }
            }
            ExprKind::StatefulPostfix { increment, lhs } => {
                let step = if *increment { Opcode::Inc } else { Opcode::Dec };
                if let ExprKind::Id(Lookup::Local(index)) = lhs.kind {
                    self.asm.indexed(Opcode::Load, index);
                    self.asm.indexed(step, index);
                } else {
                    self.emit(lhs);
                    self.asm.opcode(Opcode::Dup);
                    self.asm.const1();
                    self.asm.opcode(if *increment { Opcode::Iadd } else { Opcode::Isub });
                    self.emit_store(lhs, &Type::INT);
                    self.asm.opcode(Opcode::Pop);
                }
            }
            ExprKind::Infix { op, lhs, rhs } => self.emit_infix(*op, lhs, rhs, &expr.typ),
            ExprKind::Compare { op, lhs, rhs } => self.emit_compare(*op, lhs, rhs),
            ExprKind::Logical {
                conjunction,
                lhs,
                rhs,
            } => {
                if *conjunction {
                    self.emit_if_else(lhs, |gen| gen.emit(rhs), |gen| gen.asm.const_bool(false));
                } else {
                    self.emit_if_else(lhs, |gen| gen.asm.const_bool(true), |gen| gen.emit(rhs));
                }
            }
            ExprKind::In { lhs, rhs } => {
                self.emit(lhs);
                self.emit(rhs);
                self.asm.opcode(Opcode::In);
            }
            ExprKind::Assign { op, lhs, rhs } => self.emit_assign(*op, lhs, rhs),
            ExprKind::Access { lhs, rhs } => {
                self.emit(lhs);
                match &lhs.typ {
                    Type::Tuple(_) => {
                        let index = rhs.constant.expect("tuple index is constant").as_int();
                        self.asm.indexed(Opcode::Tload, index as usize);
                    }
                    Type::List(_) => {
                        self.emit(rhs);
                        self.asm.opcode(Opcode::Lload);
                    }
                    Type::Dict(..) => {
                        self.emit(rhs);
                        self.asm.opcode(Opcode::Dload);
                    }
                    _ => unreachable!("access on a non-indexable type"),
                }
            }
            ExprKind::Invoke { callee, args } => {
                let Type::Func(parameters, _) = &callee.typ else {
                    unreachable!("call on a non-function type")
                };
                for (arg, parameter) in args.iter().zip(parameters) {
                    self.emit_converted(arg, parameter);
                }
                self.emit(callee);
                if !args.is_empty() {
                    self.asm.indexed(Opcode::Bind, args.len());
                }
                self.asm.opcode(Opcode::Call);
            }
            ExprKind::Dot { lhs, rhs } => {
                let Type::Func(parameters, _) = &rhs.typ else {
                    unreachable!("bind on a non-function type")
                };
                self.emit_converted(lhs, &parameters[0]);
                self.emit(rhs);
                self.asm.indexed(Opcode::Bind, 1);
            }
            ExprKind::As { lhs } => self.emit_as(lhs, &expr.typ),
            ExprKind::Is { lhs, target } => {
                if lhs.typ.is_any() {
                    self.emit(lhs);
                    self.asm.typed(Opcode::Is, target);
                } else {
                    let value = expr.constant.expect("static 'is' folds");
                    self.asm.const_bool(value.as_bool());
                }
            }
            ExprKind::Default => match &expr.typ {
                Type::Scalar(ScalarKind::String) => self.asm.sconst(""),
                Type::List(_) => self.asm.cons(Opcode::List, &expr.typ, 0),
                Type::Set(_) => self.asm.cons(Opcode::Set, &expr.typ, 0),
                Type::Dict(..) => self.asm.cons(Opcode::Dict, &expr.typ, 0),
                _ => self.asm.const0(),
            },
            ExprKind::TupleLit(elements) => {
                for element in elements {
                    self.emit(element);
                }
                self.asm.typed(Opcode::Tuple, &expr.typ);
            }
            ExprKind::ListLit(elements) => {
                for element in elements {
                    self.emit(element);
                }
                self.asm.cons(Opcode::List, &expr.typ, elements.len());
            }
            ExprKind::SetLit(elements) => {
                for element in elements {
                    self.emit(element);
                }
                self.asm.cons(Opcode::Set, &expr.typ, elements.len());
            }
            ExprKind::DictLit(pairs) => {
                for (key, value) in pairs {
                    self.emit(key);
                    self.emit(value);
                }
                self.asm.cons(Opcode::Dict, &expr.typ, pairs.len());
            }
            ExprKind::Clause(lines) => {
                if lines.is_empty() {
                    self.asm.const0();
                } else {
                    for (i, line) in lines.iter().enumerate() {
                        if i > 0 {
                            self.asm.opcode(Opcode::Pop);
                        }
                        self.emit(line);
                    }
                }
            }
            ExprKind::IfElse {
                cond,
                then,
                otherwise,
            } => {
                self.emit_if_else(cond, |gen| gen.emit(then), |gen| gen.emit(otherwise));
            }
            ExprKind::While { cond, body } => {
                let label_loop = self.fresh_label();
                let label_break = self.fresh_label();
                self.loops.push(label_break);
                self.asm.label(label_loop);
                self.emit(cond);
                self.asm.labeled(Opcode::Jmp0, label_break);
                self.emit(body);
                self.asm.opcode(Opcode::Pop);
                self.asm.labeled(Opcode::Jmp, label_loop);
                self.asm.label(label_break);
                self.asm.const0();
                self.loops.pop();
            }
            ExprKind::For {
                declarator,
                iterable,
                body,
            } => {
                let label_loop = self.fresh_label();
                let label_break = self.fresh_label();
                let element = iterable
                    .typ
                    .element_of(false)
                    .expect("for loop iterates an iterable");
                self.loops.push(label_break);
                self.emit(iterable);
                self.asm.opcode(Opcode::Iter);
                self.asm.label(label_loop);
                self.asm.opcode(Opcode::Dup);
                self.asm.opcode(Opcode::Move);
                self.asm.labeled(Opcode::Jmp0, label_break);
                self.asm.opcode(Opcode::Dup);
                self.asm.opcode(Opcode::Get);
                self.emit_declarator(declarator, &element);
                self.asm.opcode(Opcode::Pop);
                self.emit(body);
                self.asm.opcode(Opcode::Pop);
                self.asm.labeled(Opcode::Jmp, label_loop);
                self.asm.label(label_break);
                self.asm.opcode(Opcode::Pop);
                self.asm.const0();
                self.loops.pop();
            }
            ExprKind::Break => {
                let target = *self.loops.last().expect("break inside a loop");
                self.asm.labeled(Opcode::Jmp, target);
            }
            ExprKind::Return(rhs) => {
                let ret = self.ret.clone();
                self.emit_converted(rhs, &ret);
                self.asm.opcode(Opcode::Return);
            }
            ExprKind::YieldReturn(rhs) => {
                self.emit(rhs);
                self.asm.opcode(Opcode::Yield);
            }
            ExprKind::YieldBreak => {
                self.asm.const0();
                self.asm.opcode(Opcode::Return);
            }
            ExprKind::Fn(index) => self.asm.indexed(Opcode::Fconst, *index),
            ExprKind::Lambda { captures, index } => {
                for capture in captures {
                    self.emit(capture);
                }
                self.asm.indexed(Opcode::Fconst, *index);
                if !captures.is_empty() {
                    self.asm.indexed(Opcode::Bind, captures.len());
                }
            }
            ExprKind::Let {
                declarator,
                initializer,
            } => {
                self.emit(initializer);
                self.emit_declarator(declarator, &initializer.typ);
            }
        }
    }

    fn emit_prefix(&mut self, op: TokenKind, rhs: &Expr) {
        if op == TokenKind::Sizeof {
            if let Type::Tuple(elements) = &rhs.typ {
                self.asm.const_int(elements.len() as i64);
            } else {
                self.emit(rhs);
                self.asm.opcode(Opcode::Sizeof);
            }
            return;
        }
        self.emit(rhs);
        match op {
            TokenKind::Add => {}
            TokenKind::Sub => self.asm.opcode(if rhs.typ.is_int() {
                Opcode::Ineg
            } else {
                Opcode::Fneg
            }),
            TokenKind::Not => self.asm.opcode(Opcode::Not),
            TokenKind::Inv => {
                self.asm.opcode(Opcode::Inv);
                if rhs.typ.is_byte() {
                    self.asm.opcode(Opcode::I2b);
                }
            }
            TokenKind::AtAt => match identity_kind(&rhs.typ) {
                IdentityKind::Float => self.asm.opcode(Opcode::Fhash),
                IdentityKind::Object => self.asm.opcode(Opcode::Ohash),
                IdentityKind::SelfBits => {}
            },
            TokenKind::And => self.asm.opcode(Opcode::Iter),
            TokenKind::Mul => self.asm.opcode(Opcode::Get),
            TokenKind::Shr => self.asm.opcode(Opcode::Move),
            _ => unreachable!("not a prefix operator"),
        }
    }

    fn emit_infix(&mut self, op: TokenKind, lhs: &Expr, rhs: &Expr, typ: &Type) {
        if op == TokenKind::Add && typ.is_string() {
            self.emit(lhs);
            self.stringify(&lhs.typ);
            self.emit(rhs);
            self.stringify(&rhs.typ);
            self.asm.opcode(Opcode::Sadd);
            return;
        }
        self.emit(lhs);
        self.emit(rhs);
        let int = lhs.typ.is_int();
        match op {
            TokenKind::Or => self.asm.opcode(Opcode::Or),
            TokenKind::Xor => self.asm.opcode(Opcode::Xor),
            TokenKind::And => self.asm.opcode(Opcode::And),
            TokenKind::Shl => {
                self.asm.opcode(Opcode::Shl);
                if lhs.typ.is_byte() {
                    self.asm.opcode(Opcode::I2b);
                }
            }
            TokenKind::Shr => self.asm.opcode(Opcode::Shr),
            TokenKind::Ushr => self.asm.opcode(Opcode::Ushr),
            TokenKind::Add => self.asm.opcode(if int { Opcode::Iadd } else { Opcode::Fadd }),
            TokenKind::Sub => self.asm.opcode(if int { Opcode::Isub } else { Opcode::Fsub }),
            TokenKind::Mul => self.asm.opcode(if int { Opcode::Imul } else { Opcode::Fmul }),
            TokenKind::Div => self.asm.opcode(if int { Opcode::Idiv } else { Opcode::Fdiv }),
            TokenKind::Rem => self.asm.opcode(if int { Opcode::Irem } else { Opcode::Frem }),
            _ => unreachable!("not an infix operator"),
        }
    }

    fn emit_compare(&mut self, op: TokenKind, lhs: &Expr, rhs: &Expr) {
        if lhs.typ.is_none() {
            self.asm
                .const_bool(matches!(op, TokenKind::Eq | TokenKind::Eqq));
            return;
        }
        self.emit(lhs);
        self.emit(rhs);
        let opcode = if matches!(op, TokenKind::Eqq | TokenKind::Neq) {
            Opcode::Ucmp
        } else {
            match lhs.typ.scalar() {
                Some(ScalarKind::Bool | ScalarKind::Byte | ScalarKind::Char) => Opcode::Ucmp,
                Some(ScalarKind::Int) => Opcode::Icmp,
                Some(ScalarKind::Float) => Opcode::Fcmp,
                Some(ScalarKind::String) => Opcode::Scmp,
                _ => Opcode::Ocmp,
            }
        };
        let cmp = match op {
            TokenKind::Eq | TokenKind::Eqq => 0,
            TokenKind::Ne | TokenKind::Neq => 1,
            TokenKind::Lt => 2,
            TokenKind::Gt => 3,
            TokenKind::Le => 4,
            TokenKind::Ge => 5,
            _ => unreachable!("not a comparison"),
        };
        self.asm.indexed(opcode, cmp);
    }

    fn emit_assign(&mut self, op: TokenKind, lhs: &Expr, rhs: &Expr) {
        if op == TokenKind::Assign {
            self.emit(rhs);
            self.emit_store(lhs, &rhs.typ);
            return;
        }
        if matches!(op, TokenKind::AssignAdd | TokenKind::AssignSub)
            && lhs.typ.element_of(true).is_some()
        {
            self.emit(lhs);
            self.emit(rhs);
            self.asm.opcode(if op == TokenKind::AssignSub {
                Opcode::Remove
            } else {
                Opcode::Add
            });
            return;
        }
        let int = lhs.typ.is_int();
        self.emit(lhs);
        self.emit(rhs);
        match op {
            TokenKind::AssignAnd => self.asm.opcode(Opcode::And),
            TokenKind::AssignXor => self.asm.opcode(Opcode::Xor),
            TokenKind::AssignOr => self.asm.opcode(Opcode::Or),
            TokenKind::AssignShl => {
                self.asm.opcode(Opcode::Shl);
                if lhs.typ.is_byte() {
                    self.asm.opcode(Opcode::I2b);
                }
            }
            TokenKind::AssignShr => self.asm.opcode(Opcode::Shr),
            TokenKind::AssignUshr => self.asm.opcode(Opcode::Ushr),
            TokenKind::AssignAdd => {
                if lhs.typ.is_string() {
                    self.stringify(&rhs.typ);
                    self.asm.opcode(Opcode::Sadd);
                } else {
                    self.asm.opcode(if int { Opcode::Iadd } else { Opcode::Fadd });
                }
            }
            TokenKind::AssignSub => self.asm.opcode(if int { Opcode::Isub } else { Opcode::Fsub }),
            TokenKind::AssignMul => self.asm.opcode(if int { Opcode::Imul } else { Opcode::Fmul }),
            TokenKind::AssignDiv => self.asm.opcode(if int { Opcode::Idiv } else { Opcode::Fdiv }),
            TokenKind::AssignRem => self.asm.opcode(if int { Opcode::Irem } else { Opcode::Frem }),
            _ => unreachable!("not an assignment operator"),
        }
        self.emit_store(lhs, &lhs.typ);
    }

    /// Stores the value on top of the stack into an lvalue, leaving the
    /// stored value on the stack. `incoming` is the static type of the
    /// value being stored, used for boxing decisions.
    fn emit_store(&mut self, lhs: &Expr, incoming: &Type) {
        match &lhs.kind {
            ExprKind::Id(lookup) => match lookup {
                Lookup::None => {
                    self.asm.opcode(Opcode::Pop);
                    self.asm.const0();
                }
                Lookup::Local(index) => {
                    self.convert(incoming, &lhs.typ);
                    self.asm.indexed(Opcode::Store, *index);
                }
                Lookup::Function(_) => unreachable!("function is not assignable"),
            },
            ExprKind::Access {
                lhs: collection,
                rhs: key,
            } => {
                self.convert(incoming, &lhs.typ);
                self.emit(collection);
                self.emit(key);
                match &collection.typ {
                    Type::List(_) => self.asm.opcode(Opcode::Lstore),
                    Type::Dict(..) => self.asm.opcode(Opcode::Dstore),
                    _ => unreachable!("store on a non-indexable type"),
                }
            }
            ExprKind::TupleLit(elements) => {
                let Type::Tuple(incoming_elements) = incoming else {
                    unreachable!("destructured value is not a tuple")
                };
                for (index, (element, element_type)) in
                    elements.iter().zip(incoming_elements).enumerate()
                {
                    self.asm.opcode(Opcode::Dup);
                    self.asm.indexed(Opcode::Tload, index);
                    self.emit_store(element, element_type);
                    self.asm.opcode(Opcode::Pop);
                }
            }
            _ => unreachable!("not an assignable expression"),
        }
    }

    /// Binds the value on top of the stack to a declarator, leaving the
    /// value on the stack.
    fn emit_declarator(&mut self, declarator: &Declarator, incoming: &Type) {
        match &declarator.kind {
            DeclaratorKind::Simple { index, .. } => match index {
                Some(slot) => {
                    self.convert(incoming, &declarator.typ);
                    self.asm.indexed(Opcode::Store, *slot);
                }
                None => {
                    self.asm.opcode(Opcode::Pop);
                    self.asm.const0();
                }
            },
            DeclaratorKind::Tuple(elements) => {
                let Type::Tuple(incoming_elements) = incoming else {
                    unreachable!("destructured value is not a tuple")
                };
                for (index, (element, element_type)) in
                    elements.iter().zip(incoming_elements).enumerate()
                {
                    self.asm.opcode(Opcode::Dup);
                    self.asm.indexed(Opcode::Tload, index);
                    self.emit_declarator(element, element_type);
                    self.asm.opcode(Opcode::Pop);
                }
            }
        }
    }

    fn emit_as(&mut self, lhs: &Expr, target: &Type) {
        self.emit(lhs);
        if &lhs.typ == target {
            return;
        }
        if lhs.typ.is_any() {
            self.asm.typed(Opcode::As, target);
        } else if target.is_any() {
            if lhs.typ.is_value_based() {
                self.asm.typed(Opcode::Any, &lhs.typ);
            }
        } else if target.is_none() {
            self.asm.opcode(Opcode::Pop);
            self.asm.const0();
        } else if lhs.typ.is_int() {
            if target.is_byte() {
                self.asm.opcode(Opcode::I2b);
            } else if target.is_char() {
                self.asm.opcode(Opcode::I2c);
            } else if target.is_float() {
                self.asm.opcode(Opcode::I2f);
            }
        } else if target.is_int() && lhs.typ.is_float() {
            self.asm.opcode(Opcode::F2i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use porkchop_gen::{CodeUnit, Instruction, Interpretation, Operand};
    use porkchop_lex::tokenize;
    use porkchop_util::Source;

    fn compile_main(text: &str) -> (Vec<Instruction>, usize) {
        let source = Source::new(text);
        let tokens = tokenize(&source).unwrap();
        let continuum = parse_program(&source, &tokens).unwrap();
        let mut sink = Interpretation::new(continuum.external_count());
        compile(&continuum, &mut sink);
        let assembly = sink.finish();
        let entry = continuum.entry();
        let CodeUnit::Bytecode(code) = &assembly.functions[entry] else {
            panic!("main is not bytecode")
        };
        (code.clone(), entry)
    }

    fn opcodes(code: &[Instruction]) -> Vec<Opcode> {
        code.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_hello_world() {
        let (code, _) = compile_main("println(\"hello\")");
        assert_eq!(
            opcodes(&code),
            vec![
                Opcode::Sconst,
                Opcode::Fconst,
                Opcode::Bind,
                Opcode::Call,
                Opcode::Return,
            ]
        );
        // println is external index 1
        assert_eq!(code[1].operand, Operand::Index(1));
    }

    #[test]
    fn test_local_prologue() {
        let (code, _) = compile_main("let x = 5\nx");
        assert_eq!(code[0].opcode, Opcode::Local);
        assert_eq!(code[0].operand, Operand::Type(Type::INT));
        assert_eq!(
            opcodes(&code[1..]),
            vec![
                Opcode::Const,
                Opcode::Store,
                Opcode::Pop,
                Opcode::Load,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn test_while_shape() {
        let (code, _) = compile_main("let i = 0\nwhile i < 3 { i = i + 1 }");
        let ops = opcodes(&code);
        // comparison drives a jmp0, the loop closes with an unconditional jmp
        assert!(ops.contains(&Opcode::Icmp));
        assert!(ops.contains(&Opcode::Jmp0));
        assert!(ops.contains(&Opcode::Jmp));
    }

    #[test]
    fn test_for_shape() {
        let (code, _) = compile_main("for x in [1, 2] { x }");
        let ops = opcodes(&code);
        assert!(ops.contains(&Opcode::Iter));
        assert!(ops.contains(&Opcode::Move));
        assert!(ops.contains(&Opcode::Get));
        assert!(ops.contains(&Opcode::List));
    }

    #[test]
    fn test_boxing_into_any() {
        let (code, _) = compile_main("let a: any = 1 as any\na");
        assert!(opcodes(&code).contains(&Opcode::Any));
    }

    #[test]
    fn test_implicit_boxing_on_assignment() {
        let (code, _) = compile_main("let a: any = 1\na");
        assert!(opcodes(&code).contains(&Opcode::Any));
    }

    #[test]
    fn test_string_concat() {
        let (code, _) = compile_main("\"n = \" + 42");
        let ops = opcodes(&code);
        assert!(ops.contains(&Opcode::I2s));
        assert!(ops.contains(&Opcode::Sadd));
    }

    #[test]
    fn test_inc_fuses_on_locals() {
        let (code, _) = compile_main("let i = 0\n++i");
        assert!(opcodes(&code).contains(&Opcode::Inc));
    }

    #[test]
    fn test_generator_prologue() {
        let source = Source::new("let g = $(): *int = { yield 1; yield break }\ng");
        let tokens = tokenize(&source).unwrap();
        let continuum = parse_program(&source, &tokens).unwrap();
        let mut sink = Interpretation::new(continuum.external_count());
        compile(&continuum, &mut sink);
        let assembly = sink.finish();
        // the lambda is the last function; its body starts with YIELD
        let CodeUnit::Bytecode(code) = assembly.functions.last().unwrap() else {
            panic!()
        };
        assert_eq!(code[0].opcode, Opcode::Yield);
    }

    #[test]
    fn test_static_is_emits_constant() {
        let (code, _) = compile_main("1 is int");
        assert_eq!(code[0].opcode, Opcode::Const);
        assert_eq!(code[0].operand, Operand::Index(1));
    }
}
