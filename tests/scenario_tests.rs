//! End-to-end scripts exercising the full pipeline through the public
//! embedding API.

use toy::{ModuleMap, Parser, Script, VM, Value};

fn run(source: &str) -> toy::Compiled {
    let mut compiled = Script::new(source)
        .with_file("scenario.toy")
        .compile()
        .unwrap_or_else(|err| panic!("{}", err));
    compiled.run().unwrap_or_else(|err| panic!("{}", err));
    compiled
}

fn out(source: &str) -> Value {
    run(source).get("out").expect("script defines `out`")
}

#[test]
fn scenario_loop_sum() {
    assert_eq!(
        out("out = 0; for i := 1; i <= 10; i++ { out += i }"),
        Value::Int(55)
    );
}

#[test]
fn scenario_recursive_fib() {
    assert_eq!(
        out(
            "fib := fn(n) { if n < 2 { return n }; return fib(n - 1) + fib(n - 2) }\n\
             out = fib(15)"
        ),
        Value::Int(610)
    );
}

#[test]
fn scenario_tail_call_loop() {
    // Depth 9999 would blow the frame cap without tail-call reuse.
    assert_eq!(
        out(
            "iter := fn(n, m) { if n == m { return n }; return iter(n + 1, m) }\n\
             out = iter(0, 9999)"
        ),
        Value::Int(9999)
    );
}

#[test]
fn scenario_defer_order() {
    assert_eq!(
        out(
            "out = []\n\
             fn() { defer append(out, 1); defer append(out, 2); defer append(out, 3) }()\n\
             out"
        ),
        out("out = [3, 2, 1]")
    );
}

#[test]
fn scenario_closure_cell_sharing() {
    assert_eq!(
        out(
            "make := fn() {\n\
               x := 0\n\
               inc := fn() { x++; return x }\n\
               get := fn() { return x }\n\
               return [inc, get]\n\
             }\n\
             pair := make()\n\
             pair[0]()\n\
             pair[0]()\n\
             out = pair[1]()"
        ),
        Value::Int(2)
    );
}

#[test]
fn scenario_module_cycle_is_rejected() {
    let mut modules = ModuleMap::new();
    modules.add_source("mod1", "import(\"mod2\")");
    modules.add_source("mod2", "import(\"mod1\")");
    let mut script = Script::new("import(\"mod1\")");
    script.set_imports(modules);
    let err = script.compile().expect_err("cycle should fail");
    assert!(err.message.contains("cyclic module import"));
}

#[test]
fn scenario_frozen_table_mutation_is_an_error() {
    assert_eq!(
        out(
            "t := immutable({a: 1})\n\
             err := try(fn() { t.b = 2 })\n\
             out = is_error(err)"
        ),
        Value::Bool(true)
    );
}

// ---------------------------------------------------------------------
// Round-trips and laws
// ---------------------------------------------------------------------

#[test]
fn law_int_string_round_trip() {
    for value in [0i64, 1, 42, 999_999, i64::MAX / 2] {
        let source = format!("out = int(string({}))", value);
        assert_eq!(out(&source), Value::Int(value));
    }
}

#[test]
fn law_float_string_round_trip() {
    assert_eq!(out("out = float(string(3.25))"), Value::Float(3.25));
    assert_eq!(out("out = float(string(0.1))"), Value::Float(0.1));
}

#[test]
fn law_array_literal_equals_appended() {
    assert_eq!(
        out("out = [1, 2, 3]"),
        out("out = []; append(out, 1); append(out, 2); append(out, 3); out")
    );
}

#[test]
fn law_immutable_equals_original() {
    assert_eq!(out("out = immutable(5) == 5"), Value::Bool(true));
    assert_eq!(out("out = immutable(\"s\") == \"s\""), Value::Bool(true));
    assert_eq!(
        out("a := [1, [2]]; out = immutable(a) == a"),
        Value::Bool(true)
    );
    assert_eq!(
        out("t := {a: 1}; out = immutable(t) == t"),
        Value::Bool(true)
    );
}

#[test]
fn law_freeze_is_idempotent() {
    assert_eq!(
        out("a := immutable([1, 2]); out = immutable(a) == a"),
        Value::Bool(true)
    );
}

#[test]
fn law_clone_isolates() {
    assert_eq!(
        out("a := [1]; b := clone(a); append(b, 2); out = len(a) * 10 + len(b)"),
        Value::Int(12)
    );
    assert_eq!(
        out("t := {a: [1]}; c := clone(t); append(c.a, 2); out = len(t.a)"),
        Value::Int(1)
    );
}

#[test]
fn law_optimized_bytecode_runs_identically() {
    let source = "\
        fib := fn(n) { if n < 2 { return n }; return fib(n - 1) + fib(n - 2) }\n\
        parts := []\n\
        for i := 0; i < 8; i++ { append(parts, fib(i)) }\n\
        out = \"${parts}\" + \"${1 + 1}\" + \"${1 + 1}\"";

    let program = Parser::parse(source).unwrap();
    let mut compiler = toy::Compiler::new("law.toy");
    compiler.compile(&program).unwrap();
    let out_index = compiler
        .global_definitions()
        .into_iter()
        .find(|(name, _)| name == "out")
        .map(|(_, index)| index)
        .expect("out global");
    let bytecode = compiler.bytecode();

    let mut plain_vm = VM::new(&bytecode);
    plain_vm.run().unwrap();
    let plain = plain_vm.into_globals()[out_index].clone();

    let mut optimized = bytecode.clone();
    optimized.remove_duplicates();
    optimized.remove_unused();
    assert!(optimized.const_object_count() <= bytecode.const_object_count());

    let mut optimized_vm = VM::new(&optimized);
    optimized_vm.run().unwrap();
    let after = optimized_vm.into_globals()[out_index].clone();

    assert_eq!(plain, after);
}

#[test]
fn boundary_slice_and_index_behaviors() {
    assert_eq!(out("out = len([1, 2, 3][1:1])"), Value::Int(0));
    assert_eq!(out("out = \"abc\"[99]"), Value::Nil);

    let mut compiled = Script::new("out = [1, 2][0:99]").compile().unwrap();
    assert!(compiled.run().is_err());
    let mut compiled = Script::new("i := -2; out = [1, 2, 3][i:]").compile().unwrap();
    assert!(compiled.run().is_err());
    let mut compiled = Script::new("out = [1][3]").compile().unwrap();
    assert!(compiled.run().is_err());
}

#[test]
fn iteration_yield_count_matches_len() {
    assert_eq!(
        out(
            "count := fn(it) { n := 0; for _, v in it { n += 1 }; return n }\n\
             out = count([1, 2, 3]) == len([1, 2, 3])\n\
             out = out && count(\"hé\") == len(\"hé\")\n\
             out = out && count({a: 1, b: 2}) == len({a: 1, b: 2})\n\
             out = out && count(range(5, 0)) == len(range(5, 0))"
        ),
        Value::Bool(true)
    );
}
