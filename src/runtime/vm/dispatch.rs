use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::op_code::{OpCode, read_u8, read_u16};
use crate::frontend::token::TokenType;
use crate::runtime::closure::Closure;
use crate::runtime::errors::RuntimeError;
use crate::runtime::iterator::ValueIterator;
use crate::runtime::ops::{binary_op, compare, unary_op, unindent_string};
use crate::runtime::table::ValueMap;
use crate::runtime::value::Value;

use super::VM;

impl VM {
    fn advance(&mut self, operand_bytes: isize) {
        self.current_frame_mut().ip += operand_bytes;
    }

    fn jump_to(&mut self, target: usize) {
        // The step loop pre-increments, so land one before the target.
        self.current_frame_mut().ip = target as isize - 1;
    }

    fn op_token(byte: u8) -> Result<TokenType, RuntimeError> {
        TokenType::from_op_byte(byte)
            .ok_or_else(|| RuntimeError::invalid_operation("malformed operator instruction"))
    }

    pub(super) fn execute_op(
        &mut self,
        op: OpCode,
        closure: &Rc<Closure>,
        ip: usize,
    ) -> Result<(), RuntimeError> {
        let instructions = &closure.function.instructions;
        match op {
            OpCode::OpConstant => {
                let index = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                let value = self.constant(index)?;
                self.push(value)
            }
            OpCode::OpTrue => self.push(Value::Bool(true)),
            OpCode::OpFalse => self.push(Value::Bool(false)),
            OpCode::OpNull => self.push(Value::Nil),
            OpCode::OpPop => {
                self.pop()?;
                Ok(())
            }
            OpCode::OpBinaryOp => {
                let token = Self::op_token(read_u8(instructions, ip + 1))?;
                self.advance(1);
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = binary_op(token, &lhs, &rhs)?;
                self.push(result)
            }
            OpCode::OpCompare => {
                let token = Self::op_token(read_u8(instructions, ip + 1))?;
                self.advance(1);
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = compare(token, &lhs, &rhs)?;
                self.push(Value::Bool(result))
            }
            OpCode::OpUnaryOp => {
                let token = Self::op_token(read_u8(instructions, ip + 1))?;
                self.advance(1);
                let operand = self.pop()?;
                let result = unary_op(token, &operand)?;
                self.push(result)
            }
            OpCode::OpJump => {
                let target = read_u16(instructions, ip + 1) as usize;
                if target <= ip {
                    // Backward branch: cancellation poll point.
                    self.check_cancelled()?;
                }
                self.jump_to(target);
                Ok(())
            }
            OpCode::OpJumpFalsy => {
                let target = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                let cond = self.pop()?;
                if cond.is_falsy() {
                    if target <= ip {
                        self.check_cancelled()?;
                    }
                    self.jump_to(target);
                }
                Ok(())
            }
            OpCode::OpAndJump => {
                let target = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                if self.peek(0)?.is_falsy() {
                    // Short-circuit: the falsy value is the result.
                    self.jump_to(target);
                } else {
                    self.pop()?;
                }
                Ok(())
            }
            OpCode::OpOrJump => {
                let target = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                if self.peek(0)?.is_falsy() {
                    self.pop()?;
                } else {
                    // Short-circuit: the truthy value is the result.
                    self.jump_to(target);
                }
                Ok(())
            }
            OpCode::OpGetGlobal => {
                let index = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                let value = self
                    .globals
                    .get(index)
                    .cloned()
                    .ok_or_else(|| RuntimeError::invalid_operation("global index out of range"))?;
                self.push(value)
            }
            OpCode::OpSetGlobal => {
                let index = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                let value = self.pop()?;
                match self.globals.get_mut(index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::invalid_operation("global index out of range")),
                }
            }
            OpCode::OpGetLocal => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let slot = self.current_frame().base_pointer + index;
                let value = match &self.stack[slot] {
                    Value::Cell(cell) => cell.borrow().clone(),
                    other => other.clone(),
                };
                self.push(value)
            }
            OpCode::OpSetLocal => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let value = self.pop()?;
                let slot = self.current_frame().base_pointer + index;
                // Captured locals live in cells; write through them so
                // closures observe the update.
                match &self.stack[slot] {
                    Value::Cell(cell) => *cell.borrow_mut() = value,
                    _ => self.stack[slot] = value,
                }
                Ok(())
            }
            OpCode::OpDefineLocal => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let value = self.pop()?;
                let slot = self.current_frame().base_pointer + index;
                // A definition starts a fresh binding: any previous capture
                // cell is abandoned, not written through.
                self.stack[slot] = value;
                Ok(())
            }
            OpCode::OpGetBuiltin => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let value = self.builtin(index)?;
                self.push(value)
            }
            OpCode::OpGetFree => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let value = closure.free[index].borrow().clone();
                self.push(value)
            }
            OpCode::OpSetFree => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let value = self.pop()?;
                *closure.free[index].borrow_mut() = value;
                Ok(())
            }
            OpCode::OpGetLocalPtr => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                let slot = self.current_frame().base_pointer + index;
                // Box the slot into a cell in place (idempotent), so the
                // enclosing function and every closure alias one cell.
                let cell = match &self.stack[slot] {
                    Value::Cell(cell) => cell.clone(),
                    _ => {
                        let current = std::mem::replace(&mut self.stack[slot], Value::Nil);
                        let cell = Rc::new(RefCell::new(current));
                        self.stack[slot] = Value::Cell(cell.clone());
                        cell
                    }
                };
                self.push(Value::Cell(cell))
            }
            OpCode::OpGetFreePtr => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                self.push(Value::Cell(closure.free[index].clone()))
            }
            OpCode::OpClosure => {
                let const_index = read_u16(instructions, ip + 1) as usize;
                let num_free = read_u8(instructions, ip + 3) as usize;
                self.advance(3);
                let Value::Function(proto) = self.constant(const_index)? else {
                    return Err(RuntimeError::invalid_operation(
                        "closure over a non-function constant",
                    ));
                };
                let mut cells = Vec::with_capacity(num_free);
                for value in self.take_args(num_free) {
                    match value {
                        Value::Cell(cell) => cells.push(cell),
                        _ => {
                            return Err(RuntimeError::invalid_operation(
                                "closure capture is not a cell",
                            ));
                        }
                    }
                }
                self.push(Value::Closure(Rc::new(Closure::new(proto, cells))))
            }
            OpCode::OpArray => {
                let count = read_u16(instructions, ip + 1) as usize;
                let splat = read_u8(instructions, ip + 3) == 1;
                self.advance(3);
                let elems = self.collect_values(count, splat)?;
                self.push(Value::array(elems))
            }
            OpCode::OpTuple => {
                let count = read_u16(instructions, ip + 1) as usize;
                let splat = read_u8(instructions, ip + 3) == 1;
                self.advance(3);
                let elems = self.collect_values(count, splat)?;
                self.push(Value::tuple(elems))
            }
            OpCode::OpTable => {
                let count = read_u16(instructions, ip + 1) as usize;
                self.advance(2);
                let mut values = self.take_args(count);
                let mut map = ValueMap::new();
                for pair in values.chunks_exact_mut(2) {
                    let key = std::mem::replace(&mut pair[0], Value::Nil);
                    let value = std::mem::replace(&mut pair[1], Value::Nil);
                    map.insert(key, value)?;
                }
                self.push(Value::table(map))
            }
            OpCode::OpString => {
                let count = read_u16(instructions, ip + 1) as usize;
                let unindent = read_u8(instructions, ip + 3) == 1;
                self.advance(3);
                let parts = self.take_args(count);
                let mut text = String::new();
                for part in parts {
                    text.push_str(&part.to_display_string());
                }
                if unindent {
                    text = unindent_string(&text);
                }
                self.push(Value::string(text))
            }
            OpCode::OpSplat => {
                let value = self.pop()?;
                self.push(Value::Splat(Rc::new(value)))
            }
            OpCode::OpIndex => {
                let with_ok = read_u8(instructions, ip + 1) == 1;
                self.advance(1);
                self.execute_index(with_ok)
            }
            OpCode::OpSetIndex => self.execute_set_index(),
            OpCode::OpSliceIndex => {
                let mask = read_u8(instructions, ip + 1);
                self.advance(1);
                self.execute_slice(mask)
            }
            OpCode::OpIdxAssignAssert => {
                let expected = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                self.execute_unpack_assert(expected)
            }
            OpCode::OpIdxElem => {
                let index = read_u8(instructions, ip + 1) as usize;
                self.advance(1);
                self.execute_unpack_elem(index)
            }
            OpCode::OpCall => {
                let argc = read_u8(instructions, ip + 1) as usize;
                let splat = read_u8(instructions, ip + 2) == 1;
                self.advance(2);
                self.check_cancelled()?;
                self.execute_call(argc, splat, false)?;
                Ok(())
            }
            OpCode::OpTry => {
                let argc = read_u8(instructions, ip + 1) as usize;
                let splat = read_u8(instructions, ip + 2) == 1;
                self.advance(2);
                self.check_cancelled()?;
                self.execute_try(argc, splat)
            }
            OpCode::OpReturn => {
                let has_value = read_u8(instructions, ip + 1) == 1;
                self.advance(1);
                let result = if has_value { self.pop()? } else { Value::Nil };
                // Defers fire before the frame goes away; their failures
                // replace the return.
                self.drain_top_frame_defers()?;
                let frame = self.frames.pop().expect("return without a frame");
                self.reset_sp(frame.base_pointer.saturating_sub(1));
                self.push(result)
            }
            OpCode::OpThrow => {
                let has_value = read_u8(instructions, ip + 1) == 1;
                self.advance(1);
                let value = if has_value { self.pop()? } else { Value::Nil };
                let message = value.to_display_string();
                Err(RuntimeError::thrown(value, message))
            }
            OpCode::OpDefer => {
                let argc = read_u8(instructions, ip + 1) as usize;
                let splat = read_u8(instructions, ip + 2) == 1;
                let slot = read_u16(instructions, ip + 3) as usize;
                self.advance(4);
                self.execute_defer(argc, splat, slot)
            }
            OpCode::OpIteratorInit => {
                let value = self.pop()?;
                let iterator = ValueIterator::new(value)?;
                self.push(Value::Iterator(Rc::new(RefCell::new(iterator))))
            }
            OpCode::OpIteratorNext => {
                let mask = read_u8(instructions, ip + 1);
                self.advance(1);
                let Value::Iterator(iterator) = self.pop()? else {
                    return Err(RuntimeError::invalid_operation("iterator state corrupted"));
                };
                match iterator.borrow_mut().next() {
                    Some((key, value)) => {
                        if mask & 0x1 != 0 {
                            self.push(key)?;
                        }
                        if mask & 0x2 != 0 {
                            self.push(value)?;
                        }
                        self.push(Value::Bool(true))
                    }
                    None => self.push(Value::Bool(false)),
                }
            }
            OpCode::OpIteratorClose => {
                let Value::Iterator(iterator) = self.pop()? else {
                    return Err(RuntimeError::invalid_operation("iterator state corrupted"));
                };
                iterator.borrow_mut().close();
                Ok(())
            }
            OpCode::OpFreeze => {
                let value = self.pop()?;
                let frozen = value.freeze();
                self.push(frozen)
            }
            OpCode::OpSuspend => {
                // End of the main function: drain its defers and halt.
                self.drain_top_frame_defers()?;
                self.halt();
                Ok(())
            }
        }
    }
}
