//! Runtime faults.

use std::fmt;

use thiserror::Error;

/// A runtime fault unwinding towards the top-level runner.
///
/// The message accretes an `at func N` entry for every function boundary
/// it crosses, mirroring a call trace.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<usize>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for func in &self.trace {
            write!(f, "\n    at func {func}")?;
        }
        Ok(())
    }
}

/// Everything that can stop execution.
#[derive(Debug, Error)]
pub enum VmError {
    /// Division by zero, bad index, failed cast, and friends.
    #[error("{0}")]
    Runtime(RuntimeError),
    /// The program called `exit(n)`.
    #[error("exit({0})")]
    Exit(i64),
}

impl VmError {
    pub fn fault(message: impl Into<String>) -> Self {
        VmError::Runtime(RuntimeError::new(message))
    }

    /// Records the function boundary being unwound through.
    pub fn trace(mut self, func: usize) -> Self {
        if let VmError::Runtime(error) = &mut self {
            error.trace.push(func);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_accretes() {
        let error = VmError::fault("divided by zero").trace(3).trace(1);
        assert_eq!(error.to_string(), "divided by zero\n    at func 3\n    at func 1");
    }

    #[test]
    fn test_exit_untraced() {
        let error = VmError::Exit(2).trace(3);
        assert_eq!(error.to_string(), "exit(2)");
    }
}
