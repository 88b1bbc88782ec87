//! Host embedding API: prelude variables, named globals, cloning,
//! compilation limits.

use toy::{Script, Value};

#[test]
fn test_prelude_variable() {
    let mut script = Script::new("out = host_value * 2");
    script.add_variable("host_value", Value::Int(21));
    let mut compiled = script.compile().unwrap_or_else(|err| panic!("{}", err));
    compiled.run().unwrap();
    assert_eq!(compiled.get("out"), Some(Value::Int(42)));
}

#[test]
fn test_add_variable_replaces_existing() {
    let mut script = Script::new("out = x");
    script.add_variable("x", Value::Int(1));
    script.add_variable("x", Value::Int(2));
    let mut compiled = script.compile().unwrap();
    compiled.run().unwrap();
    assert_eq!(compiled.get("out"), Some(Value::Int(2)));
}

#[test]
fn test_set_named_global_before_run() {
    let mut script = Script::new("out = x + 1");
    script.add_variable("x", Value::Int(0));
    let mut compiled = script.compile().unwrap();
    assert!(compiled.set("x", Value::Int(41)));
    assert!(!compiled.set("unknown", Value::Int(1)));
    compiled.run().unwrap();
    assert_eq!(compiled.get("out"), Some(Value::Int(42)));
}

#[test]
fn test_globals_persist_across_runs() {
    let mut script = Script::new("counter = counter + 1");
    script.add_variable("counter", Value::Int(0));
    let mut compiled = script.compile().unwrap();
    compiled.run().unwrap();
    compiled.run().unwrap();
    compiled.run().unwrap();
    assert_eq!(compiled.get("counter"), Some(Value::Int(3)));
}

#[test]
fn test_clone_runs_independently() {
    let mut script = Script::new("counter = counter + 1");
    script.add_variable("counter", Value::Int(0));
    let compiled = script.compile().unwrap();

    let mut first = compiled.clone();
    let mut second = compiled.clone();
    first.run().unwrap();
    first.run().unwrap();
    second.run().unwrap();

    assert_eq!(first.get("counter"), Some(Value::Int(2)));
    assert_eq!(second.get("counter"), Some(Value::Int(1)));
}

#[test]
fn test_get_unknown_global() {
    let compiled = Script::new("a := 1").compile().unwrap();
    assert_eq!(compiled.get("missing"), None);
}

#[test]
fn test_max_const_objects_cap() {
    let mut script = Script::new("a := \"one\" + \"two\" + \"three\" + \"four\"");
    script.set_max_const_objects(2);
    let err = script.compile().expect_err("over the cap");
    assert!(err.message.contains("limit is 2"));

    // The cap applies after deduplication.
    let mut script = Script::new("a := \"x\" + \"x\" + \"x\" + \"x\"");
    script.set_max_const_objects(2);
    assert!(script.compile().is_ok());
}

#[test]
fn test_parse_errors_surface_as_compile_errors() {
    let err = Script::new("a := (1 +")
        .with_file("broken.toy")
        .compile()
        .expect_err("syntax error");
    let rendered = err.to_string();
    assert!(rendered.starts_with("compile error: "));
    assert!(rendered.contains("broken.toy"));
}

#[test]
fn test_host_values_round_trip_through_script() {
    let mut script = Script::new("out = append(clone(xs), 4)");
    script.add_variable("xs", Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    let mut compiled = script.compile().unwrap();
    compiled.run().unwrap();
    match compiled.get("out") {
        Some(Value::Array(arr)) => assert_eq!(arr.len(), 4),
        other => panic!("expected array, got {:?}", other),
    }
    // The host's original array is untouched.
    match compiled.get("xs") {
        Some(Value::Array(arr)) => assert_eq!(arr.len(), 3),
        other => panic!("expected array, got {:?}", other),
    }
}
