pub mod bytecode;
pub mod compilation_scope;
pub mod compiler;
pub mod op_code;
pub mod symbol;
pub mod symbol_table;

pub use bytecode::Bytecode;
pub use compiler::{CompileError, Compiler};
