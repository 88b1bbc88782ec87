use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bytecode::bytecode::Bytecode;
use crate::bytecode::op_code::OpCode;
use crate::runtime::builtins;
use crate::runtime::closure::Closure;
use crate::runtime::errors::RuntimeError;
use crate::runtime::frame::Frame;
use crate::runtime::value::Value;

mod dispatch;
mod function_call;
mod index_ops;


pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 1024;
pub const MAX_FRAMES: usize = 1024;

/// Cooperative cancellation signal. Cheap to clone; may be triggered from
/// any thread. The VM polls it at backward jumps and call boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Single-threaded stack virtual machine. One VM runs one script instance;
/// concurrent execution uses independent VMs.
pub struct VM {
    constants: Vec<Value>,
    pub globals: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    frames: Vec<Frame>,
    builtins: Vec<Value>,
    cancel: Option<CancelToken>,
    /// Set while deferred calls drain; suppresses cancellation polling so
    /// in-flight defers run to completion.
    draining_defers: bool,
    halted: bool,
}

impl VM {
    pub fn new(bytecode: &Bytecode) -> Self {
        Self::with_globals(bytecode, Vec::new())
    }

    /// Builds a VM around an existing globals array (the host API reuses
    /// globals across runs).
    pub fn with_globals(bytecode: &Bytecode, mut globals: Vec<Value>) -> Self {
        globals.resize(GLOBALS_SIZE, Value::Nil);
        let main_closure = Rc::new(Closure::new(bytecode.main_function.clone(), Vec::new()));
        let sp = main_closure.function.num_locals;
        Self {
            constants: bytecode.constants.clone(),
            globals,
            stack: vec![Value::Nil; STACK_SIZE],
            sp,
            frames: vec![Frame::new(main_closure, 0)],
            builtins: builtins::registry(),
            cancel: None,
            draining_defers: false,
            halted: false,
        }
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.run_frames(0)
    }

    /// Runs with a cancellation token. On cancellation the run returns a
    /// Cancelled error; registered defers still fire during unwinding.
    pub fn run_context(&mut self, token: &CancelToken) -> Result<(), RuntimeError> {
        self.cancel = Some(token.clone());
        let result = self.run_frames(0);
        self.cancel = None;
        result
    }

    /// Executes until the VM halts (OpSuspend) or the frame stack drops to
    /// `stop_depth` (a nested invoke returned).
    fn run_frames(&mut self, stop_depth: usize) -> Result<(), RuntimeError> {
        while !self.halted && self.frames.len() > stop_depth {
            if let Err(err) = self.step() {
                return Err(self.unwind(err, stop_depth));
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        let closure = {
            let frame = self.current_frame_mut();
            frame.ip += 1;
            frame.closure.clone()
        };
        let ip = self.current_frame().ip as usize;
        let op = OpCode::from(closure.function.instructions[ip]);
        self.execute_op(op, &closure, ip)
    }

    /// Unwinds frames down to `stop_depth`, draining each frame's defers
    /// and collecting the stack trace oldest-first. A deferred call's own
    /// failure replaces the unwinding error (last failure wins).
    fn unwind(&mut self, mut err: RuntimeError, stop_depth: usize) -> RuntimeError {
        while self.frames.len() > stop_depth {
            {
                let frame = self.frames.last().expect("unwind with empty frame stack");
                let func = &frame.closure.function;
                if frame.ip >= 0
                    && let Some(pos) = func.position_at(frame.ip as usize)
                {
                    err.push_trace(func.file.clone(), pos);
                }
            }
            if let Err(defer_err) = self.drain_top_frame_defers() {
                err = defer_err;
            }
            let frame = self.frames.pop().expect("unwind with empty frame stack");
            self.reset_sp(frame.base_pointer.saturating_sub(1));
        }
        err
    }

    /// Replays the top frame's deferred calls in LIFO order. Failures do
    /// not stop the drain; the last failure becomes the result.
    pub(super) fn drain_top_frame_defers(&mut self) -> Result<(), RuntimeError> {
        let mut pending = None;
        let saved = self.draining_defers;
        self.draining_defers = true;
        loop {
            let Some(call) = self
                .frames
                .last_mut()
                .expect("defer drain with empty frame stack")
                .defers
                .pop()
            else {
                break;
            };
            let site = {
                let frame = self.frames.last().expect("frame");
                let func = &frame.closure.function;
                func.defer_sites
                    .get(call.slot)
                    .map(|pos| (func.file.clone(), *pos))
            };
            match self.call_value(call.callable, call.args) {
                Ok(_) => {}
                Err(mut err) => {
                    if let Some((file, pos)) = site {
                        err.push_trace(file, pos);
                    }
                    pending = Some(err);
                }
            }
        }
        self.draining_defers = saved;
        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(super) fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if self.draining_defers {
            return Ok(());
        }
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(RuntimeError::cancelled()),
            _ => Ok(()),
        }
    }

    pub(super) fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    pub(super) fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    pub(super) fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::stack_overflow());
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    pub(super) fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::invalid_operation("stack underflow"));
        }
        self.sp -= 1;
        Ok(std::mem::replace(&mut self.stack[self.sp], Value::Nil))
    }

    pub(super) fn peek(&self, distance: usize) -> Result<&Value, RuntimeError> {
        if self.sp <= distance {
            return Err(RuntimeError::invalid_operation("stack underflow"));
        }
        Ok(&self.stack[self.sp - 1 - distance])
    }

    /// Truncates the stack, dropping the abandoned values so resources
    /// (iterator leases, cells) release promptly.
    pub(super) fn reset_sp(&mut self, to: usize) {
        for index in to..self.sp {
            self.stack[index] = Value::Nil;
        }
        self.sp = to;
    }

    /// Pops `count` values, preserving their stack order.
    pub(super) fn take_args(&mut self, count: usize) -> Vec<Value> {
        let start = self.sp - count;
        let mut args = Vec::with_capacity(count);
        for index in start..self.sp {
            args.push(std::mem::replace(&mut self.stack[index], Value::Nil));
        }
        self.sp = start;
        args
    }

    pub(super) fn constant(&self, index: usize) -> Result<Value, RuntimeError> {
        self.constants
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::invalid_operation("constant index out of range"))
    }

    pub(super) fn builtin(&self, index: usize) -> Result<Value, RuntimeError> {
        self.builtins
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::invalid_operation("builtin index out of range"))
    }

    pub(super) fn halt(&mut self) {
        self.halted = true;
    }
}
