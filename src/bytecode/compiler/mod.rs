use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::bytecode::bytecode::Bytecode;
use crate::bytecode::compilation_scope::CompilationScope;
use crate::bytecode::op_code::OpCode;
use crate::bytecode::symbol_table::SymbolTable;
use crate::frontend::ast::Program;
use crate::frontend::parser::Parser;
use crate::frontend::position::Position;
use crate::modules::{ModuleKind, ModuleMap};
use crate::runtime::builtins;
use crate::runtime::compiled_function::{CompiledFunction, SourceMapEntry};
use crate::runtime::value::Value;

mod builder;
mod errors;
mod expression;
mod optimizer;
mod statement;

pub use errors::CompileError;

#[cfg(test)]
mod compiler_test;

pub(super) type CompileResult<T> = Result<T, CompileError>;

/// Default extension list for file imports.
pub const DEFAULT_IMPORT_EXTENSIONS: &[&str] = &[".toy"];

/// Constant-pool key for scalar deduplication.
#[derive(PartialEq, Eq, Hash)]
enum ScalarKey {
    Int(i64),
    Float(u64),
    Char(char),
    Str(Rc<str>),
}

#[derive(Clone, Copy)]
struct CachedModule {
    const_index: usize,
    /// Source modules compile to a parameterless function and are invoked
    /// at the import site; builtin modules are plain constants.
    callable: bool,
}

/// Walks the AST and emits instructions plus a constant pool.
///
/// Scopes form a stack (the innermost is the function being compiled);
/// loops stack per scope for break/continue patching; the symbol table
/// chain mirrors lexical nesting.
pub struct Compiler {
    constants: Vec<Value>,
    scalar_constants: HashMap<ScalarKey, usize>,
    pub symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
    file: Rc<str>,
    files: Vec<Rc<str>>,
    pub(super) current_pos: Position,
    modules: Rc<ModuleMap>,
    import_dir: Option<PathBuf>,
    import_extensions: Vec<String>,
    module_cache: HashMap<String, CachedModule>,
    compiling_modules: Vec<String>,
    /// Scope indices of module bodies currently being compiled; `export`
    /// is valid only at the innermost one.
    module_scopes: Vec<usize>,
}

impl Compiler {
    pub fn new(file: impl AsRef<str>) -> Self {
        let file: Rc<str> = Rc::from(file.as_ref());
        Self {
            constants: Vec::new(),
            scalar_constants: HashMap::new(),
            symbol_table: Self::base_symbol_table(),
            scopes: vec![CompilationScope::new()],
            scope_index: 0,
            files: vec![file.clone()],
            file,
            current_pos: Position::default(),
            modules: Rc::new(ModuleMap::new()),
            import_dir: None,
            import_extensions: DEFAULT_IMPORT_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            module_cache: HashMap::new(),
            compiling_modules: Vec::new(),
            module_scopes: Vec::new(),
        }
    }

    /// Root table with every builtin registered at its fixed index.
    fn base_symbol_table() -> SymbolTable {
        let mut table = SymbolTable::new();
        for (index, name) in builtins::names().iter().enumerate() {
            table.define_builtin(index, *name);
        }
        table
    }

    pub fn set_modules(&mut self, modules: Rc<ModuleMap>) {
        self.modules = modules;
    }

    pub fn set_import_dir(&mut self, dir: impl Into<PathBuf>) {
        self.import_dir = Some(dir.into());
    }

    pub fn set_import_extensions(&mut self, extensions: Vec<String>) {
        self.import_extensions = extensions;
    }

    /// Pre-defines a global before compilation; used by the host API to
    /// seed prelude variables.
    pub fn define_global(&mut self, name: &str) -> usize {
        let symbol = self.symbol_table.define(name);
        self.symbol_table.mark_assigned(name);
        symbol.index
    }

    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        self.emit(OpCode::OpSuspend, &[]);
        Ok(())
    }

    /// Finalizes compilation into a bytecode container. The main function's
    /// body gets the same dead-code pass as nested functions.
    pub fn bytecode(mut self) -> Bytecode {
        let scope = std::mem::take(&mut self.scopes[0]);
        let (instructions, source_map, _) =
            optimizer::eliminate_dead_code(scope.instructions, scope.source_map);
        let mut main = CompiledFunction::new(instructions, self.symbol_table.max_symbols, 0);
        main.file = self.file.clone();
        main.name = Some(Rc::from("<main>"));
        main.source_map = Self::compress_source_map(source_map);
        main.defer_sites = scope.defer_sites;
        Bytecode::new(Rc::new(main), self.constants, self.files)
    }

    /// Name → global-slot mapping for the host API.
    pub fn global_definitions(&self) -> Vec<(String, usize)> {
        self.symbol_table.global_definitions()
    }

    pub(super) fn error(&self, message: impl Into<String>, pos: Position) -> CompileError {
        CompileError::new(message, self.file.clone(), pos)
    }

    pub(super) fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::new());
        self.scope_index += 1;
        self.symbol_table = std::mem::take(&mut self.symbol_table).fork(false);
    }

    /// Pops the function scope, returning its emission buffer together with
    /// the captured free symbols and the local-slot watermark.
    pub(super) fn leave_scope(
        &mut self,
    ) -> (
        CompilationScope,
        Vec<crate::bytecode::symbol::Symbol>,
        usize,
    ) {
        let scope = self.scopes.pop().expect("scope stack underflow");
        self.scope_index -= 1;
        let table = std::mem::take(&mut self.symbol_table);
        let free_symbols = table.free_symbols.clone();
        let num_locals = table.max_symbols;
        self.symbol_table = table.unfork();
        (scope, free_symbols, num_locals)
    }

    pub(super) fn enter_block(&mut self) {
        self.symbol_table = std::mem::take(&mut self.symbol_table).fork(true);
    }

    pub(super) fn leave_block(&mut self) {
        self.symbol_table = std::mem::take(&mut self.symbol_table).unfork();
    }

    pub(super) fn compress_source_map(entries: Vec<SourceMapEntry>) -> Vec<SourceMapEntry> {
        let mut compressed: Vec<SourceMapEntry> = Vec::new();
        for entry in entries {
            match compressed.last() {
                Some(last) if last.pos == entry.pos => {}
                _ => compressed.push(entry),
            }
        }
        compressed
    }

    // ---------------------------------------------------------------
    // Imports
    // ---------------------------------------------------------------

    pub(super) fn compile_import(&mut self, module: &str, pos: Position) -> CompileResult<()> {
        if let Some(cached) = self.module_cache.get(module).copied() {
            self.emit_constant_index(cached.const_index, pos)?;
            if cached.callable {
                self.emit(OpCode::OpCall, &[0, 0]);
            }
            return Ok(());
        }

        match self.modules.clone().get(module) {
            Some(ModuleKind::Builtin(value)) => {
                let const_index = self.add_constant(value.clone());
                self.module_cache.insert(
                    module.to_string(),
                    CachedModule {
                        const_index,
                        callable: false,
                    },
                );
                self.emit_constant_index(const_index, pos)
            }
            Some(ModuleKind::Source(source)) => {
                let source = source.clone();
                let file: Rc<str> = Rc::from(format!("{}{}", module, self.default_extension()));
                self.compile_module(module, &source, file, pos)
            }
            None => self.compile_file_import(module, pos),
        }
    }

    fn default_extension(&self) -> &str {
        self.import_extensions
            .first()
            .map(String::as_str)
            .unwrap_or(".toy")
    }

    /// Resolves a module against the import directory and extension list.
    fn compile_file_import(&mut self, module: &str, pos: Position) -> CompileResult<()> {
        let Some(dir) = self.import_dir.clone() else {
            return Err(self.error(format!("module {:?} not found", module), pos));
        };
        for extension in self.import_extensions.clone() {
            let path = dir.join(format!("{}{}", module, extension));
            if let Ok(source) = std::fs::read_to_string(&path) {
                let file: Rc<str> = Rc::from(path.to_string_lossy().into_owned());
                return self.compile_module(module, &source, file, pos);
            }
        }
        Err(self.error(format!("module {:?} not found", module), pos))
    }

    /// Compiles a source module into a parameterless function constant,
    /// then emits the import-site call. Each module path compiles at most
    /// once; cycles are rejected.
    fn compile_module(
        &mut self,
        module: &str,
        source: &str,
        file: Rc<str>,
        pos: Position,
    ) -> CompileResult<()> {
        if self.compiling_modules.iter().any(|m| m == module) {
            let mut chain: Vec<&str> = self.compiling_modules.iter().map(String::as_str).collect();
            chain.push(module);
            return Err(self.error(
                format!("cyclic module import: {}", chain.join(" -> ")),
                pos,
            ));
        }

        let program = Parser::parse(source)
            .map_err(|err| CompileError::new(err.message, file.clone(), err.pos))?;

        self.compiling_modules.push(module.to_string());
        let saved_file = std::mem::replace(&mut self.file, file.clone());
        self.files.push(file);
        // Modules see builtins but not the importing script's globals.
        let saved_table = std::mem::replace(&mut self.symbol_table, Self::base_symbol_table());
        self.symbol_table = std::mem::take(&mut self.symbol_table).fork(false);
        self.scopes.push(CompilationScope::new());
        self.scope_index += 1;
        self.module_scopes.push(self.scope_index);

        let mut compile_body = || -> CompileResult<()> {
            for statement in &program.statements {
                self.compile_statement(statement)?;
            }
            Ok(())
        };
        let result = compile_body();

        self.module_scopes.pop();
        if let Err(err) = result {
            // Unwind the module scope before reporting.
            self.scopes.pop();
            self.scope_index -= 1;
            self.symbol_table = saved_table;
            self.file = saved_file;
            self.compiling_modules.pop();
            return Err(err);
        }

        if !self.last_instruction_is(OpCode::OpReturn) {
            self.emit(OpCode::OpReturn, &[0]);
        }

        let scope = self.scopes.pop().expect("module scope");
        self.scope_index -= 1;
        let num_locals = self.symbol_table.max_symbols;
        self.symbol_table = saved_table;
        let module_file = std::mem::replace(&mut self.file, saved_file);
        self.compiling_modules.pop();

        let (instructions, source_map, dead_locals) =
            optimizer::eliminate_dead_code(scope.instructions, scope.source_map);
        let mut proto = CompiledFunction::new(instructions, num_locals.saturating_sub(dead_locals), 0);
        proto.file = module_file;
        proto.name = Some(Rc::from(module));
        proto.source_map = Self::compress_source_map(source_map);
        proto.defer_sites = scope.defer_sites;

        let const_index = self.add_constant(Value::Function(Rc::new(proto)));
        self.module_cache.insert(
            module.to_string(),
            CachedModule {
                const_index,
                callable: true,
            },
        );
        self.emit_constant_index(const_index, pos)?;
        self.emit(OpCode::OpCall, &[0, 0]);
        Ok(())
    }

    /// Whether `export` is valid here: at the top level of the module
    /// currently being compiled.
    pub(super) fn at_module_top_level(&self) -> bool {
        self.module_scopes.last() == Some(&self.scope_index)
    }

    pub(super) fn inside_module(&self) -> bool {
        !self.module_scopes.is_empty()
    }
}
