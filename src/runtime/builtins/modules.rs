use std::rc::Rc;

use crate::runtime::builtin_function::{BuiltinFn, BuiltinFunction};
use crate::runtime::errors::{ErrorKind, RuntimeError};
use crate::runtime::table::ValueMap;
use crate::runtime::value::{Value, hash_value};
use crate::runtime::vm::VM;

fn module_table(entries: Vec<(&'static str, Value)>) -> Value {
    let mut map = ValueMap::new();
    for (name, value) in entries {
        map.insert(Value::string(name), value)
            .expect("fresh map accepts insertion");
    }
    Value::table(map).freeze()
}

fn builtin(name: &'static str, func: BuiltinFn) -> Value {
    Value::Builtin(Rc::new(BuiltinFunction::new(name, func)))
}

fn numeric(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::new(
            ErrorKind::InvalidValueType,
            format!("expected a number, got {}", other.type_name()),
        )),
    }
}

fn arity(args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::wrong_num_args(min, Some(max), args.len()));
    }
    Ok(())
}

/// The `math` builtin module.
pub fn math_module() -> Value {
    module_table(vec![
        ("pi", Value::Float(std::f64::consts::PI)),
        ("e", Value::Float(std::f64::consts::E)),
        ("abs", builtin("math.abs", math_abs)),
        ("min", builtin("math.min", math_min)),
        ("max", builtin("math.max", math_max)),
        ("floor", builtin("math.floor", math_floor)),
        ("ceil", builtin("math.ceil", math_ceil)),
        ("sqrt", builtin("math.sqrt", math_sqrt)),
        ("pow", builtin("math.pow", math_pow)),
    ])
}

fn math_abs(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RuntimeError::new(
            ErrorKind::InvalidValueType,
            format!("expected a number, got {}", other.type_name()),
        )),
    }
}

fn fold_numeric(
    args: Vec<Value>,
    pick: fn(&Value, &Value) -> bool,
) -> Result<Value, RuntimeError> {
    let mut best: Option<Value> = None;
    for arg in args {
        numeric(&arg)?;
        best = Some(match best {
            None => arg,
            Some(current) => {
                if pick(&arg, &current) {
                    arg
                } else {
                    current
                }
            }
        });
    }
    Ok(best.expect("arity checked"))
}

fn math_min(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, usize::MAX)?;
    fold_numeric(args, |a, b| {
        numeric(a).unwrap_or(f64::NAN) < numeric(b).unwrap_or(f64::NAN)
    })
}

fn math_max(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, usize::MAX)?;
    fold_numeric(args, |a, b| {
        numeric(a).unwrap_or(f64::NAN) > numeric(b).unwrap_or(f64::NAN)
    })
}

fn math_floor(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    Ok(Value::Float(numeric(&args[0])?.floor()))
}

fn math_ceil(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    Ok(Value::Float(numeric(&args[0])?.ceil()))
}

fn math_sqrt(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    Ok(Value::Float(numeric(&args[0])?.sqrt()))
}

fn math_pow(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 2, 2)?;
    Ok(Value::Float(numeric(&args[0])?.powf(numeric(&args[1])?)))
}

/// The `json` builtin module, bridged through `serde_json::Value`.
pub fn json_module() -> Value {
    module_table(vec![
        ("encode", builtin("json.encode", json_encode)),
        ("decode", builtin("json.decode", json_decode)),
    ])
}

fn to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(i) => Ok(serde_json::Value::from(*i)),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                RuntimeError::new(ErrorKind::NotConvertible, "non-finite float in json")
            }),
        Value::Char(c) => Ok(serde_json::Value::String(c.to_string())),
        Value::String(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Array(arr) => {
            let items: Result<Vec<_>, _> = arr.elems().iter().map(to_json).collect();
            Ok(serde_json::Value::Array(items?))
        }
        Value::Tuple(items) => {
            let items: Result<Vec<_>, _> = items.iter().map(to_json).collect();
            Ok(serde_json::Value::Array(items?))
        }
        Value::Table(map) => {
            let mut object = serde_json::Map::new();
            for (key, value) in map.borrow().entries() {
                if hash_value(&key).is_none() {
                    return Err(RuntimeError::invalid_key_type(key.type_name()));
                }
                object.insert(key.to_display_string(), to_json(&value)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        other => Err(RuntimeError::new(
            ErrorKind::NotConvertible,
            format!("cannot encode {} as json", other.type_name()),
        )),
    }
}

fn from_json(value: serde_json::Value) -> Result<Value, RuntimeError> {
    match value {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(RuntimeError::new(
                    ErrorKind::NotConvertible,
                    "json number out of range",
                ))
            }
        }
        serde_json::Value::String(s) => Ok(Value::string(s)),
        serde_json::Value::Array(items) => {
            let elems: Result<Vec<_>, _> = items.into_iter().map(from_json).collect();
            Ok(Value::array(elems?))
        }
        serde_json::Value::Object(object) => {
            let mut map = ValueMap::new();
            for (key, value) in object {
                map.insert(Value::string(key), from_json(value)?)?;
            }
            Ok(Value::table(map))
        }
    }
}

fn json_encode(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    let encoded = to_json(&args[0])?;
    Ok(Value::string(encoded.to_string()))
}

fn json_decode(_vm: &mut VM, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity(&args, 1, 1)?;
    let Value::String(text) = &args[0] else {
        return Err(RuntimeError::new(
            ErrorKind::InvalidValueType,
            format!("expected a string, got {}", args[0].type_name()),
        ));
    };
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| RuntimeError::new(ErrorKind::NotConvertible, err.to_string()))?;
    from_json(parsed)
}
