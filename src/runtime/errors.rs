use std::fmt;
use std::rc::Rc;

use crate::frontend::position::Position;
use crate::runtime::value::Value;

/// Classification of runtime failures. The kind is stable API: hosts match
/// on it, scripts observe it through the error tuple produced by `try`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StackOverflow,
    InvalidOperation,
    InvalidIndexType,
    InvalidKeyType,
    InvalidValueType,
    NotConvertible,
    DivisionByZero,
    NoSuchField,
    WrongNumArgs,
    MissingArg,
    UnexpectedArg,
    MissingEntry,
    UnexpectedEntry,
    IndexOutOfBounds,
    Immutable,
    MutatedDuringIteration,
    Thrown,
    Cancelled,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::StackOverflow => "stack overflow",
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::InvalidIndexType => "invalid index type",
            ErrorKind::InvalidKeyType => "invalid key type",
            ErrorKind::InvalidValueType => "invalid value type",
            ErrorKind::NotConvertible => "not convertible",
            ErrorKind::DivisionByZero => "division by zero",
            ErrorKind::NoSuchField => "no such field",
            ErrorKind::WrongNumArgs => "wrong number of arguments",
            ErrorKind::MissingArg => "missing argument",
            ErrorKind::UnexpectedArg => "unexpected argument",
            ErrorKind::MissingEntry => "missing entry",
            ErrorKind::UnexpectedEntry => "unexpected entry",
            ErrorKind::IndexOutOfBounds => "index out of bounds",
            ErrorKind::Immutable => "immutable value",
            ErrorKind::MutatedDuringIteration => "mutated during iteration",
            ErrorKind::Thrown => "thrown",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// One resolved stack-trace frame, oldest-first in [`RuntimeError::trace`].
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub file: Rc<str>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Payload carried by `throw`; the value scripts observe through `try`.
    pub value: Option<Value>,
    /// Underlying error for host failures wrapped with call context.
    pub cause: Option<Box<RuntimeError>>,
    pub trace: Vec<TraceEntry>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            cause: None,
            trace: Vec::new(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    pub fn unsupported_operator(op: &str, lhs: &str, rhs: &str) -> Self {
        Self::invalid_operation(format!(
            "unsupported operation: {} {} {}",
            lhs, op, rhs
        ))
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            ErrorKind::IndexOutOfBounds,
            format!("index {} out of bounds for length {}", index, len),
        )
    }

    pub fn invalid_index_type(type_name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidIndexType,
            format!("cannot index with {}", type_name),
        )
    }

    pub fn invalid_key_type(type_name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidKeyType,
            format!("{} is not hashable", type_name),
        )
    }

    pub fn no_such_field(type_name: &str, field: &str) -> Self {
        Self::new(
            ErrorKind::NoSuchField,
            format!("{} has no field {:?}", type_name, field),
        )
    }

    pub fn not_convertible(from: &str, to: &str) -> Self {
        Self::new(
            ErrorKind::NotConvertible,
            format!("cannot convert {} to {}", from, to),
        )
    }

    pub fn wrong_num_args(min: usize, max: Option<usize>, got: usize) -> Self {
        let expected = match max {
            Some(max) if max == min => format!("{}", min),
            Some(max) => format!("{}..{}", min, max),
            None => format!("at least {}", min),
        };
        Self::new(
            ErrorKind::WrongNumArgs,
            format!("wrong number of arguments: expected {}, got {}", expected, got),
        )
    }

    pub fn immutable(type_name: &str) -> Self {
        Self::new(
            ErrorKind::Immutable,
            format!("cannot mutate immutable {}", type_name),
        )
    }

    pub fn mutated_during_iteration(type_name: &str) -> Self {
        Self::new(
            ErrorKind::MutatedDuringIteration,
            format!("cannot mutate {} during iteration", type_name),
        )
    }

    pub fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "stack overflow")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "execution cancelled")
    }

    pub fn thrown(value: Value, message: String) -> Self {
        let mut err = Self::new(ErrorKind::Thrown, message);
        err.value = Some(value);
        err
    }

    /// Wraps a host/builtin failure with call context, preserving the
    /// original error as the cause.
    pub fn during_call(name: &str, cause: RuntimeError) -> Self {
        let mut err = Self::new(
            cause.kind,
            format!("{} (during call to {})", cause.message, name),
        );
        err.value = cause.value.clone();
        err.cause = Some(Box::new(cause));
        err
    }

    pub fn push_trace(&mut self, file: Rc<str>, pos: Position) {
        // Trace is rendered oldest-first; unwinding discovers frames
        // newest-first, so prepend.
        self.trace.insert(0, TraceEntry { file, pos });
    }

    /// Walks the cause chain to the original failure.
    pub fn root_cause(&self) -> &RuntimeError {
        let mut err = self;
        while let Some(cause) = &err.cause {
            err = cause;
        }
        err
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime Error: {}", self.message)?;
        for entry in &self.trace {
            write!(f, "\n\tat {}:{}", entry.file, entry.pos)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_trace() {
        let mut err = RuntimeError::division_by_zero();
        err.push_trace("main.toy".into(), Position::new(3, 5));
        err.push_trace("main.toy".into(), Position::new(1, 1));
        assert_eq!(
            err.to_string(),
            "Runtime Error: division by zero\n\tat main.toy:1:1\n\tat main.toy:3:5"
        );
    }

    #[test]
    fn test_during_call_preserves_cause() {
        let cause = RuntimeError::new(ErrorKind::InvalidValueType, "bad argument");
        let wrapped = RuntimeError::during_call("len", cause);
        assert_eq!(wrapped.kind, ErrorKind::InvalidValueType);
        assert_eq!(wrapped.root_cause().message, "bad argument");
        assert!(wrapped.message.contains("during call to len"));
    }

    #[test]
    fn test_wrong_num_args_message() {
        assert_eq!(
            RuntimeError::wrong_num_args(2, Some(2), 3).message,
            "wrong number of arguments: expected 2, got 3"
        );
        assert_eq!(
            RuntimeError::wrong_num_args(1, None, 0).message,
            "wrong number of arguments: expected at least 1, got 0"
        );
    }
}
