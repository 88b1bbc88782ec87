use crate::bytecode::compilation_scope::LoopContext;
use crate::bytecode::op_code::OpCode;
use crate::bytecode::symbol::SymbolScope;
use crate::frontend::ast::{BranchKind, Expression, Statement};
use crate::frontend::position::Position;
use crate::frontend::token::TokenType;

use super::{CompileResult, Compiler};

impl Compiler {
    pub(super) fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        self.compile_statement_labeled(statement, None)
    }

    fn compile_statement_labeled(
        &mut self,
        statement: &Statement,
        label: Option<&str>,
    ) -> CompileResult<()> {
        self.current_pos = statement.pos();
        match statement {
            Statement::Labeled { label, stmt, pos } => {
                if !matches!(stmt.as_ref(), Statement::For { .. } | Statement::ForIn { .. }) {
                    return Err(self.error("label must precede a loop", *pos));
                }
                if self.label_in_scope(label) {
                    return Err(self.error(format!("label {:?} already declared", label), *pos));
                }
                self.compile_statement_labeled(stmt, Some(label))
            }
            Statement::Expr { expr } => {
                self.compile_expression(expr)?;
                self.emit(OpCode::OpPop, &[]);
                Ok(())
            }
            Statement::IncDec {
                lhs,
                increment,
                pos,
            } => {
                let one = Expression::IntLit {
                    value: 1,
                    pos: *pos,
                };
                let base = if *increment {
                    TokenType::Plus
                } else {
                    TokenType::Minus
                };
                self.compile_compound_assign(lhs, &one, base, false, *pos)
            }
            Statement::Assign { lhs, rhs, op, pos } => self.compile_assign(lhs, rhs, *op, *pos),
            Statement::If {
                init,
                cond,
                body,
                alt,
                pos: _,
            } => self.compile_if(init.as_deref(), cond, body, alt.as_deref()),
            Statement::For {
                init,
                cond,
                post,
                body,
                ..
            } => self.compile_for(init.as_deref(), cond.as_ref(), post.as_deref(), body, label),
            Statement::ForIn {
                key,
                value,
                iterable,
                body,
                pos,
            } => self.compile_for_in(key.as_deref(), value.as_deref(), iterable, body, label, *pos),
            Statement::Branch { kind, label, pos } => {
                self.compile_branch(*kind, label.as_deref(), *pos)
            }
            Statement::Block { statements, .. } => {
                self.enter_block();
                for statement in statements {
                    self.compile_statement(statement)?;
                }
                self.leave_block();
                Ok(())
            }
            Statement::ShortFuncBody { expr } => {
                self.compile_expression(expr)?;
                self.emit(OpCode::OpReturn, &[1]);
                Ok(())
            }
            Statement::Return { results, pos } => self.compile_return(results, *pos),
            Statement::Defer { call, pos } => self.compile_defer(call, *pos),
            Statement::Throw { values, pos } => self.compile_throw(values, *pos),
            Statement::Export { result, pos } => self.compile_export(result, *pos),
        }
    }

    fn label_in_scope(&self, label: &str) -> bool {
        self.scopes[self.scope_index]
            .loops
            .iter()
            .any(|l| l.label.as_deref() == Some(label))
    }

    fn compile_if(
        &mut self,
        init: Option<&Statement>,
        cond: &Expression,
        body: &Statement,
        alt: Option<&Statement>,
    ) -> CompileResult<()> {
        let has_init = init.is_some();
        if has_init {
            // The init binding is visible in the condition and both arms.
            self.enter_block();
        }
        if let Some(init) = init {
            self.compile_statement(init)?;
        }
        self.compile_expression(cond)?;
        let jump_falsy = self.emit(OpCode::OpJumpFalsy, &[0xFFFF]);
        self.compile_statement(body)?;
        match alt {
            Some(alt) => {
                let jump_end = self.emit(OpCode::OpJump, &[0xFFFF]);
                self.patch_jump_here(jump_falsy);
                self.compile_statement(alt)?;
                self.patch_jump_here(jump_end);
            }
            None => {
                self.patch_jump_here(jump_falsy);
            }
        }
        if has_init {
            self.leave_block();
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Statement>,
        cond: Option<&Expression>,
        post: Option<&Statement>,
        body: &Statement,
        label: Option<&str>,
    ) -> CompileResult<()> {
        self.enter_block();
        if let Some(init) = init {
            self.compile_statement(init)?;
        }
        let loop_start = self.current_offset();
        let exit_jump = match cond {
            Some(cond) => {
                self.compile_expression(cond)?;
                Some(self.emit(OpCode::OpJumpFalsy, &[0xFFFF]))
            }
            None => None,
        };

        self.scopes[self.scope_index].loops.push(LoopContext {
            label: label.map(String::from),
            ..LoopContext::default()
        });
        self.compile_statement(body)?;

        let continue_target = self.current_offset();
        if let Some(post) = post {
            self.compile_statement(post)?;
        }
        self.emit(OpCode::OpJump, &[loop_start]);

        let exit = self.current_offset();
        if let Some(jump) = exit_jump {
            self.patch_jump(jump, exit);
        }
        let ctx = self.scopes[self.scope_index]
            .loops
            .pop()
            .expect("loop stack underflow");
        for pos in ctx.break_positions {
            self.patch_jump(pos, exit);
        }
        for pos in ctx.continue_positions {
            self.patch_jump(pos, continue_target);
        }
        self.leave_block();
        Ok(())
    }

    fn compile_for_in(
        &mut self,
        key: Option<&str>,
        value: Option<&str>,
        iterable: &Expression,
        body: &Statement,
        label: Option<&str>,
        pos: Position,
    ) -> CompileResult<()> {
        self.enter_block();

        // The iterator lives in a hidden binding; the name contains a colon
        // so scripts cannot collide with it.
        self.compile_expression(iterable)?;
        self.emit(OpCode::OpIteratorInit, &[]);
        let iter_symbol = self.symbol_table.define(":it");
        self.store_symbol(&iter_symbol);
        self.symbol_table.mark_assigned(":it");

        let mask = usize::from(key.is_some()) | (usize::from(value.is_some()) << 1);
        let loop_start = self.current_offset();
        self.load_for_in_iterator(pos)?;
        self.emit(OpCode::OpIteratorNext, &[mask]);
        let exit_jump = self.emit(OpCode::OpJumpFalsy, &[0xFFFF]);

        // Stack now holds (key?, value?) with value on top.
        if let Some(value) = value {
            let symbol = self.symbol_table.define(value);
            self.store_symbol(&symbol);
            self.symbol_table.mark_assigned(value);
        }
        if let Some(key) = key {
            let symbol = self.symbol_table.define(key);
            self.store_symbol(&symbol);
            self.symbol_table.mark_assigned(key);
        }

        self.scopes[self.scope_index].loops.push(LoopContext {
            label: label.map(String::from),
            ..LoopContext::default()
        });
        self.compile_statement(body)?;
        self.emit(OpCode::OpJump, &[loop_start]);

        let exit = self.current_offset();
        self.patch_jump(exit_jump, exit);
        let ctx = self.scopes[self.scope_index]
            .loops
            .pop()
            .expect("loop stack underflow");
        for pos in ctx.break_positions {
            self.patch_jump(pos, exit);
        }
        for pos in ctx.continue_positions {
            self.patch_jump(pos, loop_start);
        }

        // The iterator closes on every exit path, breaks included.
        self.load_for_in_iterator(pos)?;
        self.emit(OpCode::OpIteratorClose, &[]);
        self.leave_block();
        Ok(())
    }

    fn load_for_in_iterator(&mut self, pos: Position) -> CompileResult<()> {
        let (symbol, _) = self
            .symbol_table
            .resolve(":it")
            .ok_or_else(|| self.error("iterator binding vanished", pos))?;
        self.load_symbol(&symbol);
        Ok(())
    }

    fn compile_branch(
        &mut self,
        kind: BranchKind,
        label: Option<&str>,
        pos: Position,
    ) -> CompileResult<()> {
        let loops = &self.scopes[self.scope_index].loops;
        let target = match label {
            Some(label) => loops
                .iter()
                .rposition(|l| l.label.as_deref() == Some(label))
                .ok_or_else(|| self.error(format!("unknown label {:?}", label), pos))?,
            None => {
                if loops.is_empty() {
                    let name = match kind {
                        BranchKind::Break => "break",
                        BranchKind::Continue => "continue",
                    };
                    return Err(self.error(format!("{} outside loop", name), pos));
                }
                loops.len() - 1
            }
        };
        let jump = self.emit(OpCode::OpJump, &[0xFFFF]);
        let ctx = &mut self.scopes[self.scope_index].loops[target];
        match kind {
            BranchKind::Break => ctx.break_positions.push(jump),
            BranchKind::Continue => ctx.continue_positions.push(jump),
        }
        Ok(())
    }

    fn compile_return(&mut self, results: &[Expression], _pos: Position) -> CompileResult<()> {
        match results.len() {
            0 => {
                self.emit(OpCode::OpReturn, &[0]);
            }
            1 => {
                self.compile_expression(&results[0])?;
                self.emit(OpCode::OpReturn, &[1]);
            }
            n => {
                // Multiple results return as one tuple.
                let (count, splat) = self.compile_expr_list(results)?;
                debug_assert_eq!(count, n);
                self.emit(OpCode::OpTuple, &[count, usize::from(splat)]);
                self.emit(OpCode::OpReturn, &[1]);
            }
        }
        Ok(())
    }

    fn compile_defer(&mut self, call: &Expression, pos: Position) -> CompileResult<()> {
        let Expression::Call { func, args, .. } = call.unparenthesized() else {
            return Err(self.error("defer requires a function call", pos));
        };
        self.compile_expression(func)?;
        let (argc, splat) = self.compile_expr_list(args)?;
        if argc > u8::MAX as usize {
            return Err(self.error("too many arguments in deferred call", pos));
        }
        let slot = self.scopes[self.scope_index].defer_sites.len();
        self.scopes[self.scope_index].defer_sites.push(pos);
        self.emit(OpCode::OpDefer, &[argc, usize::from(splat), slot]);
        Ok(())
    }

    fn compile_throw(&mut self, values: &[Expression], _pos: Position) -> CompileResult<()> {
        match values.len() {
            0 => {
                self.emit(OpCode::OpThrow, &[0]);
            }
            1 => {
                self.compile_expression(&values[0])?;
                self.emit(OpCode::OpThrow, &[1]);
            }
            n => {
                let (count, splat) = self.compile_expr_list(values)?;
                debug_assert_eq!(count, n);
                self.emit(OpCode::OpTuple, &[count, usize::from(splat)]);
                self.emit(OpCode::OpThrow, &[1]);
            }
        }
        Ok(())
    }

    fn compile_export(&mut self, result: &Expression, pos: Position) -> CompileResult<()> {
        if !self.inside_module() {
            // Plain scripts ignore export statements entirely.
            return Ok(());
        }
        if !self.at_module_top_level() {
            return Err(self.error("export is only allowed at module top level", pos));
        }
        self.compile_expression(result)?;
        self.emit(OpCode::OpFreeze, &[]);
        self.emit(OpCode::OpReturn, &[1]);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Assignment
    // ---------------------------------------------------------------

    fn compile_assign(
        &mut self,
        lhs: &[Expression],
        rhs: &[Expression],
        op: TokenType,
        pos: Position,
    ) -> CompileResult<()> {
        if let Some(base) = op.compound_base() {
            if lhs.len() != 1 || rhs.len() != 1 {
                return Err(self.error(
                    "compound assignment requires a single target and value",
                    pos,
                ));
            }
            let nullish = op == TokenType::NullishAssign;
            return self.compile_compound_assign(&lhs[0], &rhs[0], base, nullish, pos);
        }

        let define = op == TokenType::Define;
        if define {
            let mut names = Vec::with_capacity(lhs.len());
            for target in lhs {
                match target.unparenthesized() {
                    Expression::Ident { name, .. } => names.push(name.as_str()),
                    other => {
                        return Err(self.error(
                            ":= requires a bare identifier on the left",
                            other.pos(),
                        ));
                    }
                }
            }
            if let Some(dup) = Self::find_duplicate(&names) {
                return Err(self.error(format!("{:?} repeated on left side of :=", dup), pos));
            }
            let new_count = names
                .iter()
                .filter(|name| !self.symbol_table.exists_in_current_block(name))
                .count();
            if new_count == 0 {
                return Err(self.error("no new variables on left side of :=", pos));
            }
            // Define up front so the right side can reference the bindings
            // (self-recursive functions rely on this).
            for name in &names {
                if !self.symbol_table.exists_in_current_block(name) {
                    self.symbol_table.define(*name);
                }
            }
        }

        if lhs.len() == rhs.len() {
            if lhs.len() == 1 {
                self.compile_expression(&rhs[0])?;
                return self.store_target(&lhs[0], define);
            }
            for value in rhs {
                self.compile_expression(value)?;
            }
            for target in lhs.iter().rev() {
                self.store_target(target, define)?;
            }
            return Ok(());
        }

        if rhs.len() == 1 {
            // Unpacking: the single right side must be a sequence of
            // exactly lhs.len() values.
            if lhs.len() > u8::MAX as usize {
                return Err(self.error("too many assignment targets", pos));
            }
            self.compile_expression(&rhs[0])?;
            self.emit(OpCode::OpIdxAssignAssert, &[lhs.len()]);
            for (index, target) in lhs.iter().enumerate() {
                self.emit(OpCode::OpIdxElem, &[index]);
                self.store_target(target, define)?;
            }
            self.emit(OpCode::OpPop, &[]);
            return Ok(());
        }

        Err(self.error(
            format!(
                "assignment count mismatch: {} targets, {} values",
                lhs.len(),
                rhs.len()
            ),
            pos,
        ))
    }

    fn find_duplicate<'a>(names: &[&'a str]) -> Option<&'a str> {
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Some(name);
            }
        }
        None
    }

    /// Emits the store for one assignment target. The assigned value must
    /// already be on the stack.
    fn store_target(&mut self, target: &Expression, define: bool) -> CompileResult<()> {
        match target.unparenthesized() {
            Expression::Ident { name, pos } => {
                let symbol = match self.symbol_table.resolve(name) {
                    Some((symbol, _)) => symbol,
                    // A plain assignment to a new name at the top level
                    // defines a global implicitly.
                    None if !define && self.symbol_table.is_global_scope() => {
                        self.symbol_table.define(name)
                    }
                    None => {
                        return Err(
                            self.error(format!("unresolved reference {:?}", name), *pos)
                        );
                    }
                };
                if symbol.scope == SymbolScope::Builtin {
                    return Err(self.error(format!("cannot assign to builtin {:?}", name), *pos));
                }
                self.store_symbol(&symbol);
                self.symbol_table.mark_assigned(name);
                Ok(())
            }
            Expression::Selector { expr, field, pos } => {
                if define {
                    return Err(self.error(":= requires a bare identifier on the left", *pos));
                }
                self.compile_expression(expr)?;
                self.emit_string_constant(field, *pos)?;
                self.emit(OpCode::OpSetIndex, &[]);
                Ok(())
            }
            Expression::Index { expr, index, pos } => {
                if define {
                    return Err(self.error(":= requires a bare identifier on the left", *pos));
                }
                self.compile_expression(expr)?;
                self.compile_expression(index)?;
                self.emit(OpCode::OpSetIndex, &[]);
                Ok(())
            }
            other => Err(self.error("cannot assign to this expression", other.pos())),
        }
    }

    pub(super) fn compile_compound_assign(
        &mut self,
        lhs: &Expression,
        rhs: &Expression,
        base: TokenType,
        nullish: bool,
        pos: Position,
    ) -> CompileResult<()> {
        match lhs.unparenthesized() {
            Expression::Ident { name, pos } => {
                let (symbol, _) = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| self.error(format!("unresolved reference {:?}", name), *pos))?;
                if symbol.scope == SymbolScope::Builtin {
                    return Err(self.error(format!("cannot assign to builtin {:?}", name), *pos));
                }
                self.load_symbol(&symbol);
                self.compile_expression(rhs)?;
                self.emit(OpCode::OpBinaryOp, &[base.as_op_byte() as usize]);
                self.store_symbol(&symbol);
                Ok(())
            }
            Expression::Selector { .. } | Expression::Index { .. } => {
                // Load-op-store; the collection and key expressions are
                // evaluated twice.
                self.compile_index_target(lhs, nullish)?;
                self.compile_expression(rhs)?;
                self.emit(OpCode::OpBinaryOp, &[base.as_op_byte() as usize]);
                match lhs.unparenthesized() {
                    Expression::Selector { expr, field, pos } => {
                        self.compile_expression(expr)?;
                        self.emit_string_constant(field, *pos)?;
                    }
                    Expression::Index { expr, index, .. } => {
                        self.compile_expression(expr)?;
                        self.compile_expression(index)?;
                    }
                    _ => unreachable!(),
                }
                self.emit(OpCode::OpSetIndex, &[]);
                Ok(())
            }
            _ => Err(self.error("cannot assign to this expression", pos)),
        }
    }

    /// Loads the current value of an index/selector target. With `nullish`
    /// a missing entry loads nil instead of erroring, so `??=` can fill it.
    fn compile_index_target(&mut self, lhs: &Expression, nullish: bool) -> CompileResult<()> {
        match lhs.unparenthesized() {
            Expression::Selector { expr, field, pos } => {
                self.compile_expression(expr)?;
                self.emit_string_constant(field, *pos)?;
            }
            Expression::Index { expr, index, .. } => {
                self.compile_expression(expr)?;
                self.compile_expression(index)?;
            }
            _ => unreachable!(),
        }
        self.emit(OpCode::OpIndex, &[usize::from(nullish)]);
        Ok(())
    }
}
