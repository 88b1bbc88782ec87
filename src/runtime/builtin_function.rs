use std::fmt;
use std::rc::Rc;

use crate::runtime::errors::RuntimeError;
use crate::runtime::value::Value;
use crate::runtime::vm::VM;

/// Host-provided callable. Builtins receive the running VM so they can
/// call back into script code or report positioned errors.
pub type BuiltinFn = fn(&mut VM, Vec<Value>) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: Rc<str>,
    pub func: BuiltinFn,
    pub receiver: Option<Value>,
}

impl BuiltinFunction {
    pub fn new(name: impl AsRef<str>, func: BuiltinFn) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            func,
            receiver: None,
        }
    }

    /// A copy bound to `receiver`; the receiver is prepended to the
    /// arguments on call.
    pub fn bind(&self, receiver: Value) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func,
            receiver: Some(receiver),
        }
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
