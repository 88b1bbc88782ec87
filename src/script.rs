use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::bytecode::bytecode::Bytecode;
use crate::bytecode::compiler::{CompileError, Compiler};
use crate::frontend::parser::Parser;
use crate::frontend::position::Position;
use crate::modules::ModuleMap;
use crate::runtime::errors::RuntimeError;
use crate::runtime::value::Value;
use crate::runtime::vm::{CancelToken, GLOBALS_SIZE, VM};

/// A source buffer plus host configuration, ready to compile.
///
/// The host seeds named prelude values, registers importable modules, and
/// optionally caps the constant pool. `compile` produces a [`Compiled`]
/// unit that can run repeatedly and be cloned for concurrent instances.
pub struct Script {
    source: String,
    file: Rc<str>,
    variables: Vec<(String, Value)>,
    modules: Rc<ModuleMap>,
    import_dir: Option<PathBuf>,
    import_extensions: Option<Vec<String>>,
    max_const_objects: Option<usize>,
}

impl Script {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            file: Rc::from("<script>"),
            variables: Vec::new(),
            modules: Rc::new(ModuleMap::with_stdlib()),
            import_dir: None,
            import_extensions: None,
            max_const_objects: None,
        }
    }

    /// Sets the file name used in diagnostics.
    pub fn with_file(mut self, file: impl AsRef<str>) -> Self {
        self.file = Rc::from(file.as_ref());
        self
    }

    /// Adds a named value visible to the script as a global.
    pub fn add_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.variables.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.variables.push((name, value));
        }
    }

    pub fn set_imports(&mut self, modules: ModuleMap) {
        self.modules = Rc::new(modules);
    }

    /// Enables file imports resolved against `dir`.
    pub fn set_import_dir(&mut self, dir: impl Into<PathBuf>) {
        self.import_dir = Some(dir.into());
    }

    pub fn set_import_extensions(&mut self, extensions: Vec<String>) {
        self.import_extensions = Some(extensions);
    }

    /// Fails compilation when the deduplicated constant pool exceeds `cap`.
    pub fn set_max_const_objects(&mut self, cap: usize) {
        self.max_const_objects = Some(cap);
    }

    pub fn compile(&self) -> Result<Compiled, CompileError> {
        let program = Parser::parse(&self.source)
            .map_err(|err| CompileError::new(err.message, self.file.clone(), err.pos))?;

        let mut compiler = Compiler::new(self.file.as_ref());
        compiler.set_modules(self.modules.clone());
        if let Some(dir) = &self.import_dir {
            compiler.set_import_dir(dir);
        }
        if let Some(extensions) = &self.import_extensions {
            compiler.set_import_extensions(extensions.clone());
        }

        let mut globals = vec![Value::Nil; GLOBALS_SIZE];
        for (name, value) in &self.variables {
            let index = compiler.define_global(name);
            globals[index] = value.clone();
        }

        compiler.compile(&program)?;
        let global_names: HashMap<String, usize> =
            compiler.global_definitions().into_iter().collect();

        let mut bytecode = compiler.bytecode();
        bytecode.remove_duplicates();
        bytecode.remove_unused();
        if let Some(cap) = self.max_const_objects
            && bytecode.const_object_count() > cap
        {
            return Err(CompileError::new(
                format!(
                    "constant pool holds {} objects, limit is {}",
                    bytecode.const_object_count(),
                    cap
                ),
                self.file.clone(),
                Position::default(),
            ));
        }

        Ok(Compiled {
            bytecode: Rc::new(bytecode),
            globals,
            global_names: Rc::new(global_names),
        })
    }
}

/// A compiled script instance: shared bytecode plus this instance's
/// globals. Cloning is cheap (the bytecode is shared, the globals array is
/// copied) and gives an independently runnable instance.
#[derive(Clone, Debug)]
pub struct Compiled {
    bytecode: Rc<Bytecode>,
    globals: Vec<Value>,
    global_names: Rc<HashMap<String, usize>>,
}

impl Compiled {
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let globals = std::mem::take(&mut self.globals);
        let mut vm = VM::with_globals(&self.bytecode, globals);
        let result = vm.run();
        self.globals = vm.into_globals();
        result
    }

    /// Runs with a cooperative cancellation token; see
    /// [`CancelToken`].
    pub fn run_context(&mut self, token: &CancelToken) -> Result<(), RuntimeError> {
        let globals = std::mem::take(&mut self.globals);
        let mut vm = VM::with_globals(&self.bytecode, globals);
        let result = vm.run_context(token);
        self.globals = vm.into_globals();
        result
    }

    /// Reads a named global.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.global_names
            .get(name)
            .and_then(|index| self.globals.get(*index))
            .cloned()
    }

    /// Writes a named global; returns false when the script never defined
    /// that name.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.global_names.get(name) {
            Some(index) => {
                self.globals[*index] = value;
                true
            }
            None => false,
        }
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }
}
