use std::rc::Rc;

use crate::bytecode::op_code::OpCode;
use crate::runtime::closure::Closure;
use crate::runtime::compiled_function::CompiledFunction;
use crate::runtime::errors::{ErrorKind, RuntimeError};
use crate::runtime::frame::{DeferredCall, Frame};
use crate::runtime::ops::splat_elements;
use crate::runtime::table::ValueMap;
use crate::runtime::value::{Value, convert};

use super::{MAX_FRAMES, STACK_SIZE, VM};

pub(super) enum CallOutcome {
    /// The call completed inline (builtin or type conversion); its result
    /// is on the stack.
    Value,
    /// A frame was pushed (or reused); the dispatch loop continues inside
    /// the callee.
    Frame,
}

impl VM {
    /// Replaces splat markers in the top `argc` stack values with their
    /// expanded elements; returns the new argument count.
    pub(super) fn expand_splats(&mut self, argc: usize) -> Result<usize, RuntimeError> {
        let values = self.take_args(argc);
        let mut expanded = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Splat(inner) => expanded.extend(splat_elements(&inner)?),
                other => expanded.push(other),
            }
        }
        let count = expanded.len();
        for value in expanded {
            self.push(value)?;
        }
        Ok(count)
    }

    pub(super) fn execute_call(
        &mut self,
        argc: usize,
        splat: bool,
        sub_vm: bool,
    ) -> Result<CallOutcome, RuntimeError> {
        let argc = if splat { self.expand_splats(argc)? } else { argc };
        let callee = self.peek(argc)?.clone();
        match callee {
            Value::Builtin(builtin) => {
                let mut args = self.take_args(argc);
                self.pop()?;
                if let Some(receiver) = &builtin.receiver {
                    args.insert(0, receiver.clone());
                }
                let result = (builtin.func)(self, args)
                    .map_err(|err| RuntimeError::during_call(&builtin.name, err))?;
                self.push(result)?;
                Ok(CallOutcome::Value)
            }
            Value::Type(tag) => {
                let args = self.take_args(argc);
                self.pop()?;
                if args.len() != 1 {
                    return Err(RuntimeError::wrong_num_args(1, Some(1), args.len()));
                }
                let result = convert(&args[0], tag)?;
                self.push(result)?;
                Ok(CallOutcome::Value)
            }
            Value::Function(func) => {
                self.call_closure(Rc::new(Closure::new(func, Vec::new())), argc, sub_vm)
            }
            Value::Closure(closure) => self.call_closure(closure, argc, sub_vm),
            other => Err(RuntimeError::invalid_operation(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<Closure>,
        argc: usize,
        sub_vm: bool,
    ) -> Result<CallOutcome, RuntimeError> {
        let mut argc = argc;
        if let Some(receiver) = &closure.receiver {
            // Bound receiver becomes the leading argument: shift it in
            // below the explicit arguments.
            let args = self.take_args(argc);
            self.push(receiver.clone())?;
            for arg in args {
                self.push(arg)?;
            }
            argc += 1;
        }

        let func = closure.function.clone();
        if !sub_vm && self.is_tail_call(&closure) {
            return self.reuse_current_frame(&func, argc);
        }

        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::stack_overflow());
        }
        let args = self.take_args(argc);
        self.pop()?;
        let args = Self::bind_args(&func, args)?;

        let base_pointer = self.sp;
        if base_pointer + func.num_locals > STACK_SIZE {
            return Err(RuntimeError::stack_overflow());
        }
        for (index, arg) in args.into_iter().enumerate() {
            self.stack[base_pointer + index] = arg;
        }
        self.sp = base_pointer + func.num_locals;
        let mut frame = Frame::new(closure, base_pointer);
        frame.sub_vm = sub_vm;
        self.frames.push(frame);
        Ok(CallOutcome::Frame)
    }

    /// Self-recursive tail call detection: the callee is the currently
    /// executing closure and the next instruction returns (directly, or
    /// after popping an unused call result). Frames holding registered
    /// defers are never reused, so their defers fire once per activation.
    fn is_tail_call(&self, callee: &Closure) -> bool {
        let frame = self.current_frame();
        if !frame.defers.is_empty() {
            return false;
        }
        let same_function = Rc::ptr_eq(&frame.closure.function, &callee.function);
        let same_cells = frame.closure.free.len() == callee.free.len()
            && frame
                .closure
                .free
                .iter()
                .zip(&callee.free)
                .all(|(a, b)| Rc::ptr_eq(a, b));
        same_function && same_cells && self.next_instruction_returns()
    }

    fn next_instruction_returns(&self) -> bool {
        let frame = self.current_frame();
        let instructions = frame.instructions();
        let next = (frame.ip + 1) as usize;
        if next >= instructions.len() {
            return false;
        }
        match OpCode::from(instructions[next]) {
            OpCode::OpReturn => true,
            OpCode::OpPop => {
                let after = next + 1;
                after < instructions.len()
                    && OpCode::from(instructions[after]) == OpCode::OpReturn
            }
            _ => false,
        }
    }

    /// Tail call: rebind arguments over the current frame's locals and
    /// restart its instruction pointer. Recursion depth stays O(1).
    fn reuse_current_frame(
        &mut self,
        func: &Rc<CompiledFunction>,
        argc: usize,
    ) -> Result<CallOutcome, RuntimeError> {
        let args = self.take_args(argc);
        self.pop()?;
        let args = Self::bind_args(func, args)?;

        let base_pointer = self.current_frame().base_pointer;
        let num_args = args.len();
        for (index, arg) in args.into_iter().enumerate() {
            self.stack[base_pointer + index] = arg;
        }
        for index in num_args..func.num_locals {
            self.stack[base_pointer + index] = Value::Nil;
        }
        self.reset_sp(base_pointer + func.num_locals);
        self.current_frame_mut().ip = -1;
        Ok(CallOutcome::Frame)
    }

    /// Validates arity and normalizes arguments into the locals layout:
    /// optionals padded with nil, the varargs tail packed into an array.
    fn bind_args(
        func: &CompiledFunction,
        mut args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let required = func.required_params();
        let max = if func.var_args {
            None
        } else {
            Some(func.num_parameters)
        };
        if args.len() < required || max.is_some_and(|max| args.len() > max) {
            return Err(RuntimeError::wrong_num_args(required, max, args.len()));
        }

        if func.var_args {
            let fixed = func.num_parameters - 1;
            while args.len() < fixed {
                args.push(Value::Nil);
            }
            let rest = args.split_off(fixed);
            args.push(Value::array(rest));
        } else {
            while args.len() < func.num_parameters {
                args.push(Value::Nil);
            }
        }
        Ok(args)
    }

    /// Invokes a callable to completion from native code (defer drain,
    /// try, builtins calling back into script code).
    pub(crate) fn call_value(
        &mut self,
        callable: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let depth = self.frames.len();
        let entry_sp = self.sp;
        let argc = args.len();

        let invoke = |vm: &mut VM| -> Result<Value, RuntimeError> {
            vm.push(callable)?;
            for arg in args {
                vm.push(arg)?;
            }
            match vm.execute_call(argc, false, true)? {
                CallOutcome::Value => vm.pop(),
                CallOutcome::Frame => {
                    vm.run_frames(depth)?;
                    vm.pop()
                }
            }
        };

        let result = invoke(self);
        if result.is_err() {
            self.reset_sp(entry_sp.min(self.sp));
        }
        result
    }

    pub(super) fn execute_try(&mut self, argc: usize, splat: bool) -> Result<(), RuntimeError> {
        let argc = if splat { self.expand_splats(argc)? } else { argc };
        let args = self.take_args(argc);
        let callable = self.pop()?;
        match self.call_value(callable, args) {
            Ok(value) => self.push(value),
            // Cancellation is not catchable.
            Err(err) if err.kind == ErrorKind::Cancelled => Err(err),
            Err(err) => {
                let value = Self::error_to_value(&err);
                self.push(value)
            }
        }
    }

    /// The value scripts observe for a caught failure: a pair of the
    /// thrown value (or message) and a frozen details table.
    fn error_to_value(err: &RuntimeError) -> Value {
        let error_value = err
            .value
            .clone()
            .unwrap_or_else(|| Value::string(&err.message));

        let mut details = ValueMap::new();
        let entries = [
            (Value::string("error"), Value::Bool(true)),
            (Value::string("kind"), Value::string(err.kind.name())),
            (Value::string("message"), Value::string(&err.message)),
        ];
        for (key, value) in entries {
            details
                .insert(key, value)
                .expect("fresh map accepts insertion");
        }
        if let Some(entry) = err.trace.first() {
            details
                .insert(
                    Value::string("at"),
                    Value::string(format!("{}:{}", entry.file, entry.pos)),
                )
                .expect("fresh map accepts insertion");
        }
        Value::tuple(vec![error_value, Value::table(details).freeze()])
    }

    pub(super) fn execute_defer(
        &mut self,
        argc: usize,
        splat: bool,
        slot: usize,
    ) -> Result<(), RuntimeError> {
        let argc = if splat { self.expand_splats(argc)? } else { argc };
        let args = self.take_args(argc);
        let callable = self.pop()?;
        if !matches!(
            callable,
            Value::Function(_) | Value::Closure(_) | Value::Builtin(_) | Value::Type(_)
        ) {
            return Err(RuntimeError::invalid_operation(format!(
                "{} is not callable",
                callable.type_name()
            )));
        }
        self.current_frame_mut().defers.push(DeferredCall {
            callable,
            args,
            slot,
        });
        Ok(())
    }
}
