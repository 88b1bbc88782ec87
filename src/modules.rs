use std::collections::HashMap;

use crate::runtime::builtins::modules::{json_module, math_module};
use crate::runtime::value::Value;

/// What an importable name resolves to.
#[derive(Debug, Clone)]
pub enum ModuleKind {
    /// Host-provided value (typically a frozen table); imported as-is.
    Builtin(Value),
    /// Script source compiled lazily, at most once per path.
    Source(String),
}

/// Name → module registry consulted by the compiler for `import(...)`.
/// Names missing here fall back to the file loader when an import
/// directory is configured.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    entries: HashMap<String, ModuleKind>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default registry: the `math` and `json` builtin modules.
    pub fn with_stdlib() -> Self {
        let mut map = Self::new();
        map.add_builtin("math", math_module());
        map.add_builtin("json", json_module());
        map
    }

    pub fn add_builtin(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), ModuleKind::Builtin(value));
    }

    pub fn add_source(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.entries
            .insert(name.into(), ModuleKind::Source(source.into()));
    }

    pub fn get(&self, name: &str) -> Option<&ModuleKind> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdlib_contents() {
        let map = ModuleMap::with_stdlib();
        assert!(matches!(map.get("math"), Some(ModuleKind::Builtin(_))));
        assert!(matches!(map.get("json"), Some(ModuleKind::Builtin(_))));
        assert!(map.get("missing").is_none());
    }

    #[test]
    fn test_source_modules() {
        let mut map = ModuleMap::new();
        map.add_source("answer", "export 42");
        assert!(matches!(map.get("answer"), Some(ModuleKind::Source(_))));
    }
}
