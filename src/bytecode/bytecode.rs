use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::op_code::{Instructions, OpCode, format_instructions, read_operands};
use crate::runtime::compiled_function::CompiledFunction;
use crate::runtime::value::Value;

/// Compilation output: the main function, the constant pool it references,
/// and the file set for source-position rendering.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub main_function: Rc<CompiledFunction>,
    pub constants: Vec<Value>,
    pub files: Vec<Rc<str>>,
}

/// Structural identity of a constant for deduplication. Scalars fold by
/// value; heap constants (functions, shared module values) fold by pointer
/// identity, which keeps functions with different capture sites distinct.
#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    Char(char),
    Str(String),
    Type(&'static str),
    Ptr(usize),
}

fn const_key(value: &Value) -> ConstKey {
    match value {
        Value::Nil => ConstKey::Nil,
        Value::Bool(b) => ConstKey::Bool(*b),
        Value::Int(i) => ConstKey::Int(*i),
        Value::Float(f) => ConstKey::Float(f.to_bits()),
        Value::Char(c) => ConstKey::Char(*c),
        Value::String(s) => ConstKey::Str(s.to_string()),
        Value::Type(tag) => ConstKey::Type(tag.name()),
        Value::Bytes(b) => ConstKey::Ptr(Rc::as_ptr(b) as usize),
        Value::Array(a) => ConstKey::Ptr(Rc::as_ptr(a) as usize),
        Value::Table(t) => ConstKey::Ptr(Rc::as_ptr(t) as usize),
        Value::Tuple(t) => ConstKey::Ptr(Rc::as_ptr(t) as *const Value as usize),
        Value::Range(r) => ConstKey::Ptr(Rc::as_ptr(r) as usize),
        Value::Function(f) => ConstKey::Ptr(Rc::as_ptr(f) as usize),
        Value::Closure(c) => ConstKey::Ptr(Rc::as_ptr(c) as usize),
        Value::Builtin(b) => ConstKey::Ptr(Rc::as_ptr(b) as usize),
        Value::Iterator(i) => ConstKey::Ptr(Rc::as_ptr(i) as usize),
        Value::Cell(c) => ConstKey::Ptr(Rc::as_ptr(c) as usize),
        Value::Splat(s) => ConstKey::Ptr(Rc::as_ptr(s) as usize),
    }
}

/// Rewrites every OpConstant/OpClosure constant index through `remap`.
fn rewrite_const_indices(instructions: &mut Instructions, remap: &HashMap<usize, usize>) {
    let mut ip = 0;
    while ip < instructions.len() {
        let op = OpCode::from(instructions[ip]);
        let (operands, read) = read_operands(op, instructions, ip + 1);
        if matches!(op, OpCode::OpConstant | OpCode::OpClosure) {
            let new_index = remap[&operands[0]];
            instructions[ip + 1] = (new_index >> 8) as u8;
            instructions[ip + 2] = new_index as u8;
        }
        ip += 1 + read;
    }
}

/// Collects the constant indices referenced by an instruction stream.
fn referenced_constants(instructions: &Instructions) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut ip = 0;
    while ip < instructions.len() {
        let op = OpCode::from(instructions[ip]);
        let (operands, read) = read_operands(op, instructions, ip + 1);
        if matches!(op, OpCode::OpConstant | OpCode::OpClosure) {
            indices.push(operands[0]);
        }
        ip += 1 + read;
    }
    indices
}

impl Bytecode {
    pub fn new(
        main_function: Rc<CompiledFunction>,
        constants: Vec<Value>,
        files: Vec<Rc<str>>,
    ) -> Self {
        Self {
            main_function,
            constants,
            files,
        }
    }

    /// Disassembly of the main function.
    pub fn format_instructions(&self) -> String {
        format_instructions(&self.main_function.instructions)
    }

    /// One line per constant; function constants include an indented
    /// disassembly of their body.
    pub fn format_constants(&self) -> String {
        let mut out = String::new();
        for (index, constant) in self.constants.iter().enumerate() {
            out.push_str(&format!("{:04} {}\n", index, constant));
            if let Value::Function(func) = constant {
                for line in format_instructions(&func.instructions).lines() {
                    out.push_str(&format!("     {}\n", line));
                }
            }
        }
        out
    }

    /// Number of live constant-pool objects; checked against the optional
    /// compilation cap after deduplication.
    pub fn const_object_count(&self) -> usize {
        self.constants.len()
    }

    /// Folds structural duplicates in the constant pool to one entry and
    /// rewrites every constant reference in the main function and in every
    /// compiled-function constant.
    pub fn remove_duplicates(&mut self) {
        let mut seen: HashMap<ConstKey, usize> = HashMap::new();
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut new_constants: Vec<Value> = Vec::new();

        for (index, constant) in self.constants.iter().enumerate() {
            let key = const_key(constant);
            let new_index = *seen.entry(key).or_insert_with(|| {
                new_constants.push(constant.clone());
                new_constants.len() - 1
            });
            remap.insert(index, new_index);
        }

        if new_constants.len() == self.constants.len() {
            return;
        }
        self.constants = new_constants;
        self.rewrite_all(&remap);
    }

    /// Drops constants unreachable from the main function (transitively
    /// through function constants) and remaps the survivors.
    pub fn remove_unused(&mut self) {
        let mut reachable = vec![false; self.constants.len()];
        let mut pending = referenced_constants(&self.main_function.instructions);
        while let Some(index) = pending.pop() {
            if reachable[index] {
                continue;
            }
            reachable[index] = true;
            if let Value::Function(func) = &self.constants[index] {
                pending.extend(referenced_constants(&func.instructions));
            }
        }

        if reachable.iter().all(|r| *r) {
            return;
        }

        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut new_constants = Vec::new();
        for (index, constant) in self.constants.iter().enumerate() {
            if reachable[index] {
                remap.insert(index, new_constants.len());
                new_constants.push(constant.clone());
            }
        }
        self.constants = new_constants;
        self.rewrite_all(&remap);
    }

    fn rewrite_all(&mut self, remap: &HashMap<usize, usize>) {
        let main = Rc::make_mut(&mut self.main_function);
        rewrite_const_indices(&mut main.instructions, remap);
        for constant in &mut self.constants {
            if let Value::Function(func) = constant {
                let func = Rc::make_mut(func);
                rewrite_const_indices(&mut func.instructions, remap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op_code::make;

    fn func_with(instructions: Instructions) -> Rc<CompiledFunction> {
        Rc::new(CompiledFunction::new(instructions, 0, 0))
    }

    fn constant_refs(bytecode: &Bytecode) -> Vec<usize> {
        referenced_constants(&bytecode.main_function.instructions)
    }

    #[test]
    fn test_remove_duplicates_folds_scalars() {
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpConstant, &[1]));
        instructions.extend(make(OpCode::OpConstant, &[2]));
        instructions.extend(make(OpCode::OpSuspend, &[]));
        let mut bytecode = Bytecode::new(
            func_with(instructions),
            vec![Value::Int(7), Value::string("x"), Value::Int(7)],
            vec![],
        );
        bytecode.remove_duplicates();
        assert_eq!(bytecode.constants, vec![Value::Int(7), Value::string("x")]);
        assert_eq!(constant_refs(&bytecode), vec![0, 1, 0]);
    }

    #[test]
    fn test_remove_duplicates_keeps_distinct_functions() {
        let f1 = Value::Function(func_with(make(OpCode::OpReturn, &[0])));
        let f2 = Value::Function(func_with(make(OpCode::OpReturn, &[0])));
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpConstant, &[1]));
        instructions.extend(make(OpCode::OpSuspend, &[]));
        let mut bytecode = Bytecode::new(func_with(instructions), vec![f1, f2], vec![]);
        bytecode.remove_duplicates();
        // Equal bodies but distinct identities stay separate.
        assert_eq!(bytecode.constants.len(), 2);
    }

    #[test]
    fn test_remove_duplicates_folds_shared_module_value() {
        let module = Value::table(crate::runtime::table::ValueMap::new());
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpConstant, &[1]));
        instructions.extend(make(OpCode::OpSuspend, &[]));
        let mut bytecode = Bytecode::new(
            func_with(instructions),
            vec![module.clone(), module],
            vec![],
        );
        bytecode.remove_duplicates();
        assert_eq!(bytecode.constants.len(), 1);
        assert_eq!(constant_refs(&bytecode), vec![0, 0]);
    }

    #[test]
    fn test_remove_unused_drops_unreferenced() {
        let mut inner = Instructions::new();
        inner.extend(make(OpCode::OpConstant, &[3]));
        inner.extend(make(OpCode::OpReturn, &[1]));
        let inner_fn = Value::Function(func_with(inner));

        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[2]));
        instructions.extend(make(OpCode::OpSuspend, &[]));
        let mut bytecode = Bytecode::new(
            func_with(instructions),
            vec![
                Value::Int(0),    // unused
                Value::Int(1),    // unused
                inner_fn,         // used by main
                Value::string("reached through the function"),
            ],
            vec![],
        );
        bytecode.remove_unused();
        assert_eq!(bytecode.constants.len(), 2);
        // Main now references the function at its new index.
        assert_eq!(constant_refs(&bytecode), vec![0]);
        match &bytecode.constants[0] {
            Value::Function(func) => {
                assert_eq!(referenced_constants(&func.instructions), vec![1]);
            }
            other => panic!("expected function constant, got {:?}", other),
        }
    }
}
