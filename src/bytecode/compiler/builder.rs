use std::rc::Rc;

use crate::bytecode::compilation_scope::EmittedInstruction;
use crate::bytecode::op_code::{OpCode, make};
use crate::bytecode::symbol::{Symbol, SymbolScope};
use crate::frontend::position::Position;
use crate::runtime::compiled_function::SourceMapEntry;
use crate::runtime::value::Value;

use super::{CompileResult, Compiler, ScalarKey};

impl Compiler {
    /// Appends one instruction to the current scope, recording its source
    /// position, and returns its offset.
    pub(super) fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let scope = &mut self.scopes[self.scope_index];
        let pos = scope.instructions.len();
        scope.instructions.extend_from_slice(&instruction);
        scope.source_map.push(SourceMapEntry {
            offset: pos as u32,
            pos: self.current_pos,
        });
        scope.previous_instruction = scope.last_instruction.clone();
        scope.last_instruction = EmittedInstruction {
            opcode: Some(op),
            position: pos,
        };
        pos
    }

    pub(super) fn last_instruction_is(&self, op: OpCode) -> bool {
        self.scopes[self.scope_index].last_instruction.opcode == Some(op)
    }

    pub(super) fn current_offset(&self) -> usize {
        self.scopes[self.scope_index].instructions.len()
    }

    /// Rewrites the u16 operand of the jump emitted at `instruction_pos` to
    /// point at `target`.
    pub(super) fn patch_jump(&mut self, instruction_pos: usize, target: usize) {
        let instructions = &mut self.scopes[self.scope_index].instructions;
        instructions[instruction_pos + 1] = (target >> 8) as u8;
        instructions[instruction_pos + 2] = target as u8;
    }

    /// Patches the jump at `instruction_pos` to the current end of the
    /// instruction stream.
    pub(super) fn patch_jump_here(&mut self, instruction_pos: usize) {
        let target = self.current_offset();
        self.patch_jump(instruction_pos, target);
    }

    /// Adds a constant, folding duplicate scalars into one pool entry.
    pub(super) fn add_constant(&mut self, value: Value) -> usize {
        let key = match &value {
            Value::Int(i) => Some(ScalarKey::Int(*i)),
            Value::Float(f) => Some(ScalarKey::Float(f.to_bits())),
            Value::Char(c) => Some(ScalarKey::Char(*c)),
            Value::String(s) => Some(ScalarKey::Str(s.clone())),
            _ => None,
        };
        if let Some(key) = key {
            if let Some(&index) = self.scalar_constants.get(&key) {
                return index;
            }
            self.constants.push(value);
            let index = self.constants.len() - 1;
            self.scalar_constants.insert(key, index);
            return index;
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub(super) fn emit_constant_index(
        &mut self,
        index: usize,
        pos: Position,
    ) -> CompileResult<()> {
        if u16::try_from(index).is_err() {
            return Err(self.error("constant pool limit exceeded", pos));
        }
        self.emit(OpCode::OpConstant, &[index]);
        Ok(())
    }

    pub(super) fn emit_constant_value(&mut self, value: Value, pos: Position) -> CompileResult<()> {
        match value {
            Value::Bool(true) => {
                self.emit(OpCode::OpTrue, &[]);
                Ok(())
            }
            Value::Bool(false) => {
                self.emit(OpCode::OpFalse, &[]);
                Ok(())
            }
            Value::Nil => {
                self.emit(OpCode::OpNull, &[]);
                Ok(())
            }
            other => {
                let index = self.add_constant(other);
                self.emit_constant_index(index, pos)
            }
        }
    }

    pub(super) fn emit_string_constant(
        &mut self,
        text: impl AsRef<str>,
        pos: Position,
    ) -> CompileResult<()> {
        self.emit_constant_value(Value::String(Rc::from(text.as_ref())), pos)
    }

    pub(super) fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(OpCode::OpGetGlobal, &[symbol.index]);
            }
            SymbolScope::Local => {
                self.emit(OpCode::OpGetLocal, &[symbol.index]);
            }
            SymbolScope::Builtin => {
                self.emit(OpCode::OpGetBuiltin, &[symbol.index]);
            }
            SymbolScope::Free => {
                self.emit(OpCode::OpGetFree, &[symbol.index]);
            }
        }
    }

    /// Emits the store for a resolved binding. The first store into a local
    /// defines the slot; later stores write through any capture cell.
    pub(super) fn store_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(OpCode::OpSetGlobal, &[symbol.index]);
            }
            SymbolScope::Local => {
                if symbol.local_assigned {
                    self.emit(OpCode::OpSetLocal, &[symbol.index]);
                } else {
                    self.emit(OpCode::OpDefineLocal, &[symbol.index]);
                }
            }
            SymbolScope::Free => {
                self.emit(OpCode::OpSetFree, &[symbol.index]);
            }
            SymbolScope::Builtin => unreachable!("builtins are not assignable"),
        }
    }
}
