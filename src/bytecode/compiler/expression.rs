use std::rc::Rc;

use crate::bytecode::op_code::OpCode;
use crate::bytecode::symbol::SymbolScope;
use crate::frontend::ast::{Expression, FuncParams, Statement, StringPart};
use crate::frontend::position::Position;
use crate::frontend::token::{StringKind, TokenType};
use crate::runtime::compiled_function::CompiledFunction;
use crate::runtime::ops::unindent_string;
use crate::runtime::value::Value;

use super::{CompileResult, Compiler, optimizer};

impl Compiler {
    pub(super) fn compile_expression(&mut self, expr: &Expression) -> CompileResult<()> {
        self.current_pos = expr.pos();
        match expr {
            Expression::Ident { name, pos } => {
                let (symbol, _) = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| self.error(format!("unresolved reference {:?}", name), *pos))?;
                self.load_symbol(&symbol);
                Ok(())
            }
            Expression::IntLit { value, pos } => self.emit_constant_value(Value::Int(*value), *pos),
            Expression::FloatLit { value, pos } => {
                self.emit_constant_value(Value::Float(*value), *pos)
            }
            Expression::BoolLit { value, pos } => {
                self.emit_constant_value(Value::Bool(*value), *pos)
            }
            Expression::CharLit { value, pos } => {
                self.emit_constant_value(Value::Char(*value), *pos)
            }
            Expression::NilLit { pos } => self.emit_constant_value(Value::Nil, *pos),
            Expression::StringLit { parts, kind, pos } => {
                self.compile_string(parts, *kind, *pos)
            }
            Expression::Paren { expr, .. } => self.compile_expression(expr),
            Expression::Unary { op, operand, pos } => {
                self.compile_expression(operand)?;
                match op {
                    TokenType::Bang | TokenType::Minus | TokenType::Plus | TokenType::Caret => {
                        self.emit(OpCode::OpUnaryOp, &[op.as_op_byte() as usize]);
                        Ok(())
                    }
                    other => Err(self.error(format!("invalid unary operator {}", other), *pos)),
                }
            }
            Expression::Binary { op, lhs, rhs, pos } => self.compile_binary(*op, lhs, rhs, *pos),
            Expression::Cond {
                cond, then, alt, ..
            } => {
                self.compile_expression(cond)?;
                let jump_falsy = self.emit(OpCode::OpJumpFalsy, &[0xFFFF]);
                self.compile_expression(then)?;
                let jump_end = self.emit(OpCode::OpJump, &[0xFFFF]);
                self.patch_jump_here(jump_falsy);
                self.compile_expression(alt)?;
                self.patch_jump_here(jump_end);
                Ok(())
            }
            Expression::ArrayLit { elements, pos } => {
                let (count, splat) = self.compile_expr_list(elements)?;
                if count > u16::MAX as usize {
                    return Err(self.error("array literal too large", *pos));
                }
                self.emit(OpCode::OpArray, &[count, usize::from(splat)]);
                Ok(())
            }
            Expression::TableLit { entries, pos } => {
                for (key, value) in entries {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                if entries.len() * 2 > u16::MAX as usize {
                    return Err(self.error("table literal too large", *pos));
                }
                self.emit(OpCode::OpTable, &[entries.len() * 2]);
                Ok(())
            }
            Expression::TupleLit { elements, pos } => {
                let (count, splat) = self.compile_expr_list(elements)?;
                if count > u16::MAX as usize {
                    return Err(self.error("tuple literal too large", *pos));
                }
                self.emit(OpCode::OpTuple, &[count, usize::from(splat)]);
                Ok(())
            }
            Expression::Selector { expr, field, pos } => {
                self.compile_expression(expr)?;
                self.emit_string_constant(field, *pos)?;
                self.emit(OpCode::OpIndex, &[0]);
                Ok(())
            }
            Expression::Index { expr, index, .. } => {
                self.compile_expression(expr)?;
                self.compile_expression(index)?;
                self.emit(OpCode::OpIndex, &[0]);
                Ok(())
            }
            Expression::Slice {
                expr, low, high, ..
            } => {
                self.compile_expression(expr)?;
                let mut mask = 0usize;
                if let Some(low) = low {
                    self.compile_expression(low)?;
                    mask |= 0x1;
                }
                if let Some(high) = high {
                    self.compile_expression(high)?;
                    mask |= 0x2;
                }
                self.emit(OpCode::OpSliceIndex, &[mask]);
                Ok(())
            }
            Expression::FuncLit { params, body, pos } => self.compile_func_lit(params, body, *pos),
            Expression::Call { func, args, pos } => {
                self.compile_expression(func)?;
                let (argc, splat) = self.compile_expr_list(args)?;
                if argc > u8::MAX as usize {
                    return Err(self.error("too many call arguments", *pos));
                }
                self.emit(OpCode::OpCall, &[argc, usize::from(splat)]);
                Ok(())
            }
            Expression::Splat { pos, .. } => Err(self.error(
                "splat is only allowed in calls, arrays and tuples",
                *pos,
            )),
            Expression::Import { module, pos } => self.compile_import(module, *pos),
            Expression::Try { call, pos } => match call.unparenthesized() {
                // A call shields that call; any other callable is invoked
                // with no arguments.
                Expression::Call { func, args, .. } => {
                    self.compile_expression(func)?;
                    let (argc, splat) = self.compile_expr_list(args)?;
                    if argc > u8::MAX as usize {
                        return Err(self.error("too many call arguments", *pos));
                    }
                    self.emit(OpCode::OpTry, &[argc, usize::from(splat)]);
                    Ok(())
                }
                other => {
                    self.compile_expression(other)?;
                    self.emit(OpCode::OpTry, &[0, 0]);
                    Ok(())
                }
            },
        }
    }

    fn compile_binary(
        &mut self,
        op: TokenType,
        lhs: &Expression,
        rhs: &Expression,
        pos: Position,
    ) -> CompileResult<()> {
        match op {
            TokenType::AndAnd => {
                self.compile_expression(lhs)?;
                let jump = self.emit(OpCode::OpAndJump, &[0xFFFF]);
                self.compile_expression(rhs)?;
                self.patch_jump_here(jump);
                Ok(())
            }
            TokenType::OrOr => {
                self.compile_expression(lhs)?;
                let jump = self.emit(OpCode::OpOrJump, &[0xFFFF]);
                self.compile_expression(rhs)?;
                self.patch_jump_here(jump);
                Ok(())
            }
            op if op.is_comparison() => {
                self.compile_expression(lhs)?;
                self.compile_expression(rhs)?;
                self.emit(OpCode::OpCompare, &[op.as_op_byte() as usize]);
                Ok(())
            }
            TokenType::Plus
            | TokenType::Minus
            | TokenType::Star
            | TokenType::Slash
            | TokenType::Percent
            | TokenType::Amp
            | TokenType::Pipe
            | TokenType::Caret
            | TokenType::AmpCaret
            | TokenType::Shl
            | TokenType::Shr
            | TokenType::Nullish => {
                self.compile_expression(lhs)?;
                self.compile_expression(rhs)?;
                self.emit(OpCode::OpBinaryOp, &[op.as_op_byte() as usize]);
                Ok(())
            }
            other => Err(self.error(format!("invalid operator {}", other), pos)),
        }
    }

    /// Compiles an expression list, wrapping splat elements with `OpSplat`.
    /// Returns the element count and whether any splat was present.
    pub(super) fn compile_expr_list(
        &mut self,
        exprs: &[Expression],
    ) -> CompileResult<(usize, bool)> {
        let mut has_splat = false;
        for expr in exprs {
            if let Expression::Splat { expr: inner, .. } = expr {
                has_splat = true;
                self.compile_expression(inner)?;
                self.emit(OpCode::OpSplat, &[]);
            } else {
                self.compile_expression(expr)?;
            }
        }
        Ok((exprs.len(), has_splat))
    }

    fn compile_string(
        &mut self,
        parts: &[StringPart],
        kind: StringKind,
        pos: Position,
    ) -> CompileResult<()> {
        let unindent = kind == StringKind::DoubleSingleQuote;
        if let [StringPart::Text(text)] = parts {
            // Plain literals fold to a constant; indent-trimming happens at
            // compile time.
            let text = if unindent {
                unindent_string(text)
            } else {
                text.clone()
            };
            return self.emit_string_constant(text, pos);
        }
        for part in parts {
            match part {
                StringPart::Text(text) => self.emit_string_constant(text, pos)?,
                StringPart::Interp(expr) => self.compile_expression(expr)?,
            }
        }
        if parts.len() > u16::MAX as usize {
            return Err(self.error("string literal too large", pos));
        }
        self.emit(OpCode::OpString, &[parts.len(), usize::from(unindent)]);
        Ok(())
    }

    fn compile_func_lit(
        &mut self,
        params: &FuncParams,
        body: &Statement,
        pos: Position,
    ) -> CompileResult<()> {
        for (i, name) in params.names.iter().enumerate() {
            if params.names[..i].contains(name) {
                return Err(self.error(format!("duplicate parameter {:?}", name), pos));
            }
        }
        if params.names.len() > u8::MAX as usize {
            return Err(self.error("too many parameters", pos));
        }

        self.enter_scope();
        for name in &params.names {
            self.symbol_table.define(name);
            self.symbol_table.mark_assigned(name);
        }
        match body {
            // A block body shares the function scope with its parameters.
            Statement::Block { statements, .. } => {
                for statement in statements {
                    self.compile_statement(statement)?;
                }
            }
            short => self.compile_statement(short)?,
        }
        if !self.last_instruction_is(OpCode::OpReturn) {
            self.emit(OpCode::OpReturn, &[0]);
        }

        let (scope, free_symbols, num_locals) = self.leave_scope();
        let (instructions, source_map, dead_locals) =
            optimizer::eliminate_dead_code(scope.instructions, scope.source_map);

        let mut proto = CompiledFunction::new(
            instructions,
            num_locals.saturating_sub(dead_locals),
            params.names.len(),
        );
        proto.num_optionals = params.num_optionals;
        proto.var_args = params.var_args;
        proto.file = self.file.clone();
        proto.source_map = Self::compress_source_map(source_map);
        proto.defer_sites = scope.defer_sites;

        // Push the captured cells in free-symbol order, creating cells for
        // locals that have not been assigned yet (self-recursive capture).
        for original in &free_symbols {
            match original.scope {
                SymbolScope::Local => {
                    if !original.local_assigned {
                        self.emit(OpCode::OpNull, &[]);
                        self.emit(OpCode::OpDefineLocal, &[original.index]);
                        self.symbol_table.mark_assigned(&original.name);
                    }
                    self.emit(OpCode::OpGetLocalPtr, &[original.index]);
                }
                SymbolScope::Free => {
                    self.emit(OpCode::OpGetFreePtr, &[original.index]);
                }
                SymbolScope::Global | SymbolScope::Builtin => {
                    unreachable!("globals are never captured")
                }
            }
        }

        let const_index = self.add_constant(Value::Function(Rc::new(proto)));
        if free_symbols.is_empty() {
            self.emit_constant_index(const_index, pos)
        } else {
            if u16::try_from(const_index).is_err() {
                return Err(self.error("constant pool limit exceeded", pos));
            }
            if free_symbols.len() > u8::MAX as usize {
                return Err(self.error("too many captured variables", pos));
            }
            self.emit(OpCode::OpClosure, &[const_index, free_symbols.len()]);
            Ok(())
        }
    }
}
