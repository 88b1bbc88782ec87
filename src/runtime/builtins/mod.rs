use std::io::Write;
use std::rc::Rc;

use crate::runtime::builtin_function::{BuiltinFn, BuiltinFunction};
use crate::runtime::errors::{ErrorKind, RuntimeError};
use crate::runtime::ops;
use crate::runtime::value::{RangeValue, TypeTag, Value};
use crate::runtime::vm::VM;

pub mod modules;

/// Builtin names in registry order. The compiler registers these indices;
/// the VM resolves `OpGetBuiltin` against [`registry`] in the same order.
pub fn names() -> &'static [&'static str] {
    &[
        "print", "println", "len", "append", "clone", "immutable", "is_error", "range",
        "format", "type_of", "contains", "bool", "int", "float", "char", "string", "bytes",
    ]
}

/// Values behind `OpGetBuiltin`, index-aligned with [`names`]. Type
/// descriptors are first-class values callable as converters.
pub fn registry() -> Vec<Value> {
    fn builtin(name: &'static str, func: BuiltinFn) -> Value {
        Value::Builtin(Rc::new(BuiltinFunction::new(name, func)))
    }
    vec![
        builtin("print", builtin_print),
        builtin("println", builtin_println),
        builtin("len", builtin_len),
        builtin("append", builtin_append),
        builtin("clone", builtin_clone),
        builtin("immutable", builtin_immutable),
        builtin("is_error", builtin_is_error),
        builtin("range", builtin_range),
        builtin("format", builtin_format),
        builtin("type_of", builtin_type_of),
        builtin("contains", builtin_contains),
        Value::Type(TypeTag::Bool),
        Value::Type(TypeTag::Int),
        Value::Type(TypeTag::Float),
        Value::Type(TypeTag::Char),
        Value::Type(TypeTag::String),
        Value::Type(TypeTag::Bytes),
    ]
}

fn expect_args(args: &[Value], min: usize, max: Option<usize>) -> Result<(), RuntimeError> {
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        return Err(RuntimeError::wrong_num_args(min, max, args.len()));
    }
    Ok(())
}

fn builtin_print(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let text = args
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ");
    print!("{}", text);
    let _ = std::io::stdout().flush();
    Ok(Value::Nil)
}

fn builtin_println(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let text = args
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", text);
    Ok(Value::Nil)
}

fn builtin_len(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, Some(1))?;
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Array(a) => a.len(),
        Value::Table(t) => t.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Range(r) => r.len(),
        other => {
            return Err(RuntimeError::new(
                ErrorKind::InvalidValueType,
                format!("{} has no length", other.type_name()),
            ));
        }
    };
    Ok(Value::Int(len as i64))
}

/// Appends values to an array in place and returns the array.
fn builtin_append(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, None)?;
    let mut args = args.into_iter();
    let target = args.next().expect("arity checked");
    let Value::Array(arr) = &target else {
        return Err(RuntimeError::new(
            ErrorKind::InvalidValueType,
            format!("cannot append to {}", target.type_name()),
        ));
    };
    for value in args {
        arr.push(value)?;
    }
    Ok(target.clone())
}

fn builtin_clone(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, Some(1))?;
    Ok(args[0].clone_deep())
}

fn builtin_immutable(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, Some(1))?;
    Ok(args[0].freeze())
}

/// Recognizes the (error-value, details) pair produced by a caught
/// failure: a two-tuple whose second element is a table with `error: true`.
fn builtin_is_error(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, Some(1))?;
    let is_error = match &args[0] {
        Value::Tuple(items) if items.len() == 2 => match &items[1] {
            Value::Table(map) => map
                .borrow()
                .lookup(&Value::string("error"))
                .is_some_and(|v| v.equal(&Value::Bool(true))),
            _ => false,
        },
        _ => false,
    };
    Ok(Value::Bool(is_error))
}

fn builtin_range(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 2, Some(3))?;
    let mut ints = Vec::with_capacity(3);
    for arg in &args {
        match arg {
            Value::Int(i) => ints.push(*i),
            other => {
                return Err(RuntimeError::new(
                    ErrorKind::InvalidValueType,
                    format!("range bounds must be ints, got {}", other.type_name()),
                ));
            }
        }
    }
    let step = ints.get(2).copied().unwrap_or(1);
    let range = RangeValue::new(ints[0], ints[1], step)?;
    Ok(Value::Range(Rc::new(range)))
}

/// Replaces each `{}` in the format string with the next argument.
fn builtin_format(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, None)?;
    let Value::String(template) = &args[0] else {
        return Err(RuntimeError::new(
            ErrorKind::InvalidValueType,
            format!("format template must be a string, got {}", args[0].type_name()),
        ));
    };
    let mut out = String::with_capacity(template.len());
    let mut rest: &str = template;
    let mut next = 1;
    while let Some(found) = rest.find("{}") {
        out.push_str(&rest[..found]);
        match args.get(next) {
            Some(value) => out.push_str(&value.to_display_string()),
            None => {
                return Err(RuntimeError::new(
                    ErrorKind::MissingArg,
                    "not enough arguments for format template",
                ));
            }
        }
        next += 1;
        rest = &rest[found + 2..];
    }
    out.push_str(rest);
    if next < args.len() {
        return Err(RuntimeError::new(
            ErrorKind::UnexpectedArg,
            "too many arguments for format template",
        ));
    }
    Ok(Value::string(out))
}

fn builtin_type_of(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 1, Some(1))?;
    Ok(Value::Type(args[0].type_tag()))
}

fn builtin_contains(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_args(&args, 2, Some(2))?;
    Ok(Value::Bool(ops::contains(&args[0], &args[1])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::bytecode::Bytecode;
    use crate::runtime::compiled_function::CompiledFunction;

    fn dummy_vm() -> VM {
        let main = Rc::new(CompiledFunction::new(
            crate::bytecode::op_code::make(crate::bytecode::op_code::OpCode::OpSuspend, &[]),
            0,
            0,
        ));
        VM::new(&Bytecode::new(main, Vec::new(), Vec::new()))
    }

    #[test]
    fn test_registry_matches_names() {
        assert_eq!(registry().len(), names().len());
    }

    #[test]
    fn test_len() {
        let mut vm = dummy_vm();
        assert_eq!(
            builtin_len(&mut vm, vec![Value::string("héllo")]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            builtin_len(&mut vm, vec![Value::array(vec![Value::Nil])]).unwrap(),
            Value::Int(1)
        );
        assert!(builtin_len(&mut vm, vec![Value::Int(3)]).is_err());
    }

    #[test]
    fn test_append_mutates_in_place() {
        let mut vm = dummy_vm();
        let arr = Value::array(vec![Value::Int(1)]);
        builtin_append(&mut vm, vec![arr.clone(), Value::Int(2), Value::Int(3)]).unwrap();
        if let Value::Array(a) = &arr {
            assert_eq!(a.len(), 3);
        }
    }

    #[test]
    fn test_format() {
        let mut vm = dummy_vm();
        assert_eq!(
            builtin_format(
                &mut vm,
                vec![Value::string("{} + {} = {}"), Value::Int(1), Value::Int(2), Value::Int(3)]
            )
            .unwrap(),
            Value::string("1 + 2 = 3")
        );
        assert!(builtin_format(&mut vm, vec![Value::string("{}")]).is_err());
        assert!(
            builtin_format(&mut vm, vec![Value::string("x"), Value::Int(1)]).is_err()
        );
    }

    #[test]
    fn test_range_builtin() {
        let mut vm = dummy_vm();
        let range = builtin_range(&mut vm, vec![Value::Int(0), Value::Int(10)]).unwrap();
        match range {
            Value::Range(r) => assert_eq!(r.len(), 10),
            other => panic!("expected range, got {:?}", other),
        }
        assert!(
            builtin_range(&mut vm, vec![Value::Int(0), Value::Int(10), Value::Int(0)]).is_err()
        );
    }
}
