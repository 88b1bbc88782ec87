use std::rc::Rc;

use crate::bytecode::bytecode::Bytecode;
use crate::bytecode::compiler::{CompileError, Compiler};
use crate::frontend::parser::Parser;
use crate::modules::ModuleMap;
use crate::runtime::value::Value;

fn compile_src(source: &str) -> Result<Bytecode, CompileError> {
    compile_with_modules(source, ModuleMap::new())
}

fn compile_with_modules(source: &str, modules: ModuleMap) -> Result<Bytecode, CompileError> {
    let program = Parser::parse(source)
        .map_err(|err| CompileError::new(err.message, Rc::from("test.toy"), err.pos))?;
    let mut compiler = Compiler::new("test.toy");
    compiler.set_modules(Rc::new(modules));
    compiler.compile(&program)?;
    Ok(compiler.bytecode())
}

fn compile_err(source: &str) -> CompileError {
    compile_src(source).expect_err("compilation should fail")
}

#[test]
fn test_scalar_constants_are_deduplicated() {
    let bytecode = compile_src("a := 1 + 1; b := \"x\" + \"x\"").unwrap();
    let ints = bytecode
        .constants
        .iter()
        .filter(|c| matches!(c, Value::Int(1)))
        .count();
    let strs = bytecode
        .constants
        .iter()
        .filter(|c| matches!(c, Value::String(s) if s.as_ref() == "x"))
        .count();
    assert_eq!(ints, 1);
    assert_eq!(strs, 1);
}

#[test]
fn test_unresolved_reference() {
    let err = compile_err("a := missing + 1");
    assert!(err.message.contains("unresolved reference"));
    assert!(err.message.contains("missing"));
}

#[test]
fn test_no_new_variables_on_define() {
    let err = compile_err("a := 1; a := 2");
    assert!(err.message.contains("no new variables"));
    // A mix of new and existing names is fine.
    assert!(compile_src("a := 1; a, b := 2, 3").is_ok());
}

#[test]
fn test_define_requires_bare_identifier() {
    let err = compile_err("t := {}; t.x := 1");
    assert!(err.message.contains("bare identifier"));
}

#[test]
fn test_assignment_count_mismatch() {
    let err = compile_err("a, b := 1, 2, 3");
    assert!(err.message.contains("assignment count mismatch"));
}

#[test]
fn test_branch_outside_loop() {
    assert!(compile_err("break").message.contains("break outside loop"));
    assert!(
        compile_err("continue")
            .message
            .contains("continue outside loop")
    );
}

#[test]
fn test_unknown_label() {
    let err = compile_err("for { break missing }");
    assert!(err.message.contains("unknown label"));
}

#[test]
fn test_label_conflict() {
    let err = compile_err("x: for { x: for { break } }");
    assert!(err.message.contains("already declared"));
}

#[test]
fn test_label_must_precede_loop() {
    let err = compile_err("x: a := 1");
    assert!(err.message.contains("label must precede a loop"));
}

#[test]
fn test_duplicate_parameter() {
    let err = compile_err("f := fn(a, a) { return a }");
    assert!(err.message.contains("duplicate parameter"));
}

#[test]
fn test_cannot_assign_to_builtin() {
    let err = compile_err("len = 5");
    assert!(err.message.contains("cannot assign to builtin"));
}

#[test]
fn test_export_ignored_outside_modules() {
    // Non-module compilations silently drop export statements.
    let bytecode = compile_src("export 42; a := 1").unwrap();
    assert!(!bytecode.format_instructions().contains("OpFreeze"));
}

#[test]
fn test_export_inside_module_function_rejected() {
    let mut modules = ModuleMap::new();
    modules.add_source("bad", "f := fn() { export 1 }; f()");
    let err = compile_with_modules("import(\"bad\")", modules)
        .expect_err("nested export should fail");
    assert!(err.message.contains("module top level"));
}

#[test]
fn test_module_not_found() {
    let err = compile_err("import(\"nope\")");
    assert!(err.message.contains("module \"nope\" not found"));
}

#[test]
fn test_cyclic_import_rejected() {
    let mut modules = ModuleMap::new();
    modules.add_source("mod1", "import(\"mod2\")");
    modules.add_source("mod2", "import(\"mod1\")");
    let err =
        compile_with_modules("import(\"mod1\")", modules).expect_err("cycle should fail");
    assert!(err.message.contains("cyclic module import"));
    assert!(err.message.contains("mod1 -> mod2 -> mod1"));
}

#[test]
fn test_module_compiles_once() {
    let mut modules = ModuleMap::new();
    modules.add_source("shared", "export 1");
    let bytecode =
        compile_with_modules("a := import(\"shared\"); b := import(\"shared\")", modules)
            .unwrap();
    let module_fns = bytecode
        .constants
        .iter()
        .filter(
            |c| matches!(c, Value::Function(f) if f.name.as_deref() == Some("shared")),
        )
        .count();
    assert_eq!(module_fns, 1);
}

#[test]
fn test_closure_emits_capture_opcodes() {
    let bytecode = compile_src(
        "make := fn() { x := 1; return fn() { return x } }",
    )
    .unwrap();
    let rendered = bytecode.format_constants();
    assert!(rendered.contains("OpGetLocalPtr"));
    assert!(rendered.contains("OpClosure"));
    assert!(rendered.contains("OpGetFree"));
}

#[test]
fn test_self_capture_gets_define_nil_rewrite() {
    let bytecode = compile_src(
        "outer := fn() { f := fn() { return f() }; return f }",
    )
    .unwrap();
    let rendered = bytecode.format_constants();
    // The cell is materialized with nil before the closure captures it.
    assert!(rendered.contains("OpNull"));
    assert!(rendered.contains("OpGetLocalPtr"));
}

#[test]
fn test_defer_emits_slot() {
    let bytecode = compile_src("f := fn() { defer len(\"\") ; defer len(\"\") }").unwrap();
    let rendered = bytecode.format_constants();
    assert!(rendered.contains("OpDefer 1 0 0"));
    assert!(rendered.contains("OpDefer 1 0 1"));
}

#[test]
fn test_main_ends_with_suspend() {
    let bytecode = compile_src("a := 1").unwrap();
    let rendered = bytecode.format_instructions();
    assert!(rendered.trim_end().ends_with("OpSuspend"));
}

#[test]
fn test_dead_code_after_return_is_removed() {
    let bytecode = compile_src("f := fn() { return 1; a := 2; return a }").unwrap();
    let rendered = bytecode.format_constants();
    // Only the reachable return remains.
    assert_eq!(rendered.matches("OpReturn").count(), 1);
    assert!(!rendered.contains("OpDefineLocal"));
}

#[test]
fn test_num_locals_tracks_block_reuse() {
    let bytecode = compile_src(
        "f := fn() {\n\
           { a := 1; b := 2; len(\"\") }\n\
           { c := 3; len(\"\") }\n\
         }",
    )
    .unwrap();
    let func = bytecode
        .constants
        .iter()
        .find_map(|c| match c {
            Value::Function(f) => Some(f.clone()),
            _ => None,
        })
        .expect("function constant");
    // Sibling blocks reuse slots: the widest block needs two.
    assert_eq!(func.num_locals, 2);
}

#[test]
fn test_top_level_blocks_use_main_locals() {
    let bytecode = compile_src("{ a := 1; len(\"\") }").unwrap();
    assert_eq!(bytecode.main_function.num_locals, 1);
    assert!(bytecode.format_instructions().contains("OpDefineLocal"));
}

#[test]
fn test_and_or_compile_to_short_circuit_jumps() {
    let bytecode = compile_src("a := 1 && 2; b := 1 || 2").unwrap();
    let rendered = bytecode.format_instructions();
    assert!(rendered.contains("OpAndJump"));
    assert!(rendered.contains("OpOrJump"));
}

#[test]
fn test_splat_positions_are_flagged() {
    let bytecode = compile_src("xs := [1]; f := fn(...a) { }; f(...xs)").unwrap();
    let rendered = bytecode.format_instructions();
    assert!(rendered.contains("OpSplat"));
    assert!(rendered.contains("OpCall 1 1"));
}

#[test]
fn test_compile_error_rendering() {
    let err = compile_err("a := missing");
    let rendered = err.to_string();
    assert!(rendered.starts_with("compile error: "));
    assert!(rendered.contains("└─ at test.toy:1:6"));
}
