use crate::bytecode::op_code::{Instructions, OpCode};
use crate::frontend::position::Position;
use crate::runtime::compiled_function::SourceMapEntry;

#[derive(Debug, Clone, Default)]
pub struct EmittedInstruction {
    pub opcode: Option<OpCode>,
    pub position: usize,
}

/// One loop on the compile-time loop stack: its optional label and the
/// jump-operand positions to patch once the loop's bounds are known.
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    pub label: Option<String>,
    pub break_positions: Vec<usize>,
    pub continue_positions: Vec<usize>,
}

/// Per-function emission buffer: instruction bytes, one source-map entry
/// per instruction, defer call sites and the loop stack.
#[derive(Debug, Clone, Default)]
pub struct CompilationScope {
    pub instructions: Instructions,
    pub source_map: Vec<SourceMapEntry>,
    pub defer_sites: Vec<Position>,
    pub last_instruction: EmittedInstruction,
    pub previous_instruction: EmittedInstruction,
    pub loops: Vec<LoopContext>,
}

impl CompilationScope {
    pub fn new() -> Self {
        Self::default()
    }
}
