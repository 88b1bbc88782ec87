use std::rc::Rc;

use crate::runtime::compiled_function::CompiledFunction;
use crate::runtime::value::{CellRef, Value};

/// A compiled function paired with its captured free-variable cells.
/// Closures capturing the same local share the same cell.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<CellRef>,
    pub receiver: Option<Value>,
}

impl Closure {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<CellRef>) -> Self {
        Self {
            function,
            free,
            receiver: None,
        }
    }
}
