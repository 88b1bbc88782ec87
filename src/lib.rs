//! An embeddable scripting language: a small dynamically-typed language
//! with first-class functions, closures, modules, arrays, tables, tuples,
//! ranges, deferred statements and labeled loops. The crate compiles
//! scripts to bytecode and interprets them on a stack VM; hosts embed it
//! through [`Script`] and [`Compiled`].

pub mod bytecode;
pub mod frontend;
pub mod modules;
pub mod runtime;
pub mod script;

pub use bytecode::{Bytecode, CompileError, Compiler};
pub use frontend::{ParseError, Parser};
pub use modules::{ModuleKind, ModuleMap};
pub use runtime::errors::{ErrorKind, RuntimeError};
pub use runtime::value::Value;
pub use runtime::vm::{CancelToken, VM};
pub use script::{Compiled, Script};
