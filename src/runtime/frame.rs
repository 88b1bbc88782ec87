use std::rc::Rc;

use crate::bytecode::op_code::Instructions;
use crate::runtime::closure::Closure;
use crate::runtime::value::Value;

/// A deferred call captured by `OpDefer`, replayed LIFO on return.
#[derive(Debug, Clone)]
pub struct DeferredCall {
    pub callable: Value,
    pub args: Vec<Value>,
    /// Compile-time slot; indexes the function's defer-site position table.
    pub slot: usize,
}

#[derive(Clone)]
pub struct Frame {
    pub closure: Rc<Closure>,
    /// Instruction pointer; starts at -1 and is advanced before each fetch.
    pub ip: isize,
    /// Stack index of locals[0].
    pub base_pointer: usize,
    pub defers: Vec<DeferredCall>,
    /// Set on frames pushed by a nested invoke (defer drain, try, builtin
    /// callback); the nested run loop stops when such a frame returns.
    pub sub_vm: bool,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: -1,
            base_pointer,
            defers: Vec::new(),
            sub_vm: false,
        }
    }

    pub fn instructions(&self) -> &Instructions {
        &self.closure.function.instructions
    }
}
