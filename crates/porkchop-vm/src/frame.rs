//! Activation records.

use porkchop_sem::Type;

use crate::value::Value;

/// One activation: an operand stack with a parallel bit-vector telling
/// which slots hold GC references, the instruction pointer, and the
/// function index for fault traces.
#[derive(Debug)]
pub struct Frame {
    pub stack: Vec<Value>,
    pub refs: Vec<bool>,
    pub func: usize,
    pub pc: usize,
}

impl Frame {
    /// A frame whose leading slots are the bound captures/arguments.
    /// Their reference tags are assigned by the `LOCAL` prologue.
    pub fn new(func: usize, captures: Vec<Value>) -> Self {
        let mut stack = captures;
        stack.reserve(32);
        Self {
            stack,
            refs: Vec::with_capacity(32),
            func,
            pc: 0,
        }
    }

    /// Declares the next local: tags the slot and zero-fills it when it
    /// is not an incoming argument. Reference slots start null.
    pub fn local(&mut self, typ: &Type) {
        let is_ref = !typ.is_value_based();
        self.refs.push(is_ref);
        if self.refs.len() > self.stack.len() {
            self.stack.push(if is_ref { Value::NULL_OBJ } else { Value::NONE });
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value, is_ref: bool) {
        self.stack.push(value);
        self.refs.push(is_ref);
    }

    #[inline]
    pub fn push_value(&mut self, value: Value) {
        self.push(value, false);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.refs.pop();
        self.stack.pop().expect("operand stack underflow")
    }

    /// Pops `n` slots, preserving their order.
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len() - n;
        self.refs.truncate(at);
        self.stack.split_off(at)
    }

    #[inline]
    pub fn top(&self) -> Value {
        *self.stack.last().expect("operand stack underflow")
    }

    pub fn dup(&mut self) {
        self.stack.push(self.top());
        self.refs.push(*self.refs.last().expect("operand stack underflow"));
    }

    pub fn load(&mut self, index: usize) {
        self.stack.push(self.stack[index]);
        self.refs.push(self.refs[index]);
    }

    /// Non-destructive store: the value stays on the stack.
    pub fn store(&mut self, index: usize) {
        self.stack[index] = self.top();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_prologue_over_captures() {
        let mut frame = Frame::new(0, vec![Value::from_int(7)]);
        frame.local(&Type::INT); // the parameter slot
        frame.local(&Type::STRING); // a fresh reference local
        assert_eq!(frame.stack.len(), 2);
        assert_eq!(frame.refs, vec![false, true]);
        assert_eq!(frame.stack[0], Value::from_int(7));
        assert!(frame.stack[1].is_null_obj());
    }

    #[test]
    fn test_pop_n_order() {
        let mut frame = Frame::new(0, vec![]);
        frame.push_value(Value::from_int(1));
        frame.push_value(Value::from_int(2));
        frame.push_value(Value::from_int(3));
        let popped = frame.pop_n(2);
        assert_eq!(popped, vec![Value::from_int(2), Value::from_int(3)]);
        assert_eq!(frame.stack.len(), 1);
    }

    #[test]
    fn test_store_keeps_value() {
        let mut frame = Frame::new(0, vec![]);
        frame.local(&Type::INT);
        frame.push_value(Value::from_int(9));
        frame.store(0);
        assert_eq!(frame.stack[0], Value::from_int(9));
        assert_eq!(frame.stack.len(), 2);
    }
}
