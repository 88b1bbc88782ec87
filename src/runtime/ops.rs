use std::cmp::Ordering;
use std::rc::Rc;

use crate::frontend::token::TokenType;
use crate::runtime::errors::{ErrorKind, RuntimeError};
use crate::runtime::value::Value;

/// Binary operator dispatch over the full ordered type matrix.
///
/// `??` short-circuits on a non-nil left operand; everything else goes
/// through the matrix. Because dispatch is centralized rather than
/// per-type, the swap-and-retry fallback is only observable in comparisons,
/// where a reflected retry is attempted before the original error surfaces.
pub fn binary_op(op: TokenType, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    if op == TokenType::Nullish {
        return Ok(match lhs {
            Value::Nil => rhs.clone(),
            other => other.clone(),
        });
    }

    let unsupported =
        || RuntimeError::unsupported_operator(&op.to_string(), lhs.type_name(), rhs.type_name());

    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => int_binary_op(op, *l, *r),
        (Value::Int(l), Value::Float(r)) => float_binary_op(op, *l as f64, *r),
        (Value::Float(l), Value::Int(r)) => float_binary_op(op, *l, *r as f64),
        (Value::Float(l), Value::Float(r)) => float_binary_op(op, *l, *r),
        (Value::Char(l), Value::Int(r)) => match op {
            TokenType::Plus => char_offset(*l, *r),
            TokenType::Minus => char_offset(*l, -*r),
            _ => Err(unsupported()),
        },
        (Value::Int(l), Value::Char(r)) if op == TokenType::Plus => char_offset(*r, *l),
        (Value::Char(l), Value::Char(r)) if op == TokenType::Minus => {
            Ok(Value::Int(*l as i64 - *r as i64))
        }
        (Value::String(l), Value::String(r)) if op == TokenType::Plus => {
            let mut s = String::with_capacity(l.len() + r.len());
            s.push_str(l);
            s.push_str(r);
            Ok(Value::string(s))
        }
        (Value::String(l), Value::Char(r)) if op == TokenType::Plus => {
            let mut s = l.to_string();
            s.push(*r);
            Ok(Value::string(s))
        }
        (Value::Char(l), Value::String(r)) if op == TokenType::Plus => {
            let mut s = l.to_string();
            s.push_str(r);
            Ok(Value::string(s))
        }
        (Value::Bytes(l), Value::Bytes(r)) if op == TokenType::Plus => {
            let mut data = l.to_vec();
            data.extend_from_slice(&r.data());
            Ok(Value::bytes(data))
        }
        (Value::Array(l), Value::Array(r)) if op == TokenType::Plus => {
            let mut elems = l.elems().to_vec();
            elems.extend(r.elems().iter().cloned());
            Ok(Value::array(elems))
        }
        (Value::Tuple(l), Value::Tuple(r)) if op == TokenType::Plus => {
            let mut elems = l.to_vec();
            elems.extend(r.iter().cloned());
            Ok(Value::tuple(elems))
        }
        _ => Err(unsupported()),
    }
}

fn char_offset(ch: char, offset: i64) -> Result<Value, RuntimeError> {
    let code = ch as i64 + offset;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or_else(|| {
            RuntimeError::invalid_operation(format!("char offset {} out of range", code))
        })
}

fn int_binary_op(op: TokenType, l: i64, r: i64) -> Result<Value, RuntimeError> {
    let value = match op {
        TokenType::Plus => l.wrapping_add(r),
        TokenType::Minus => l.wrapping_sub(r),
        TokenType::Star => l.wrapping_mul(r),
        TokenType::Slash => {
            if r == 0 {
                return Err(RuntimeError::division_by_zero());
            }
            l.wrapping_div(r)
        }
        TokenType::Percent => {
            if r == 0 {
                return Err(RuntimeError::division_by_zero());
            }
            l.wrapping_rem(r)
        }
        TokenType::Amp => l & r,
        TokenType::Pipe => l | r,
        TokenType::Caret => l ^ r,
        TokenType::AmpCaret => l & !r,
        TokenType::Shl => shift(l, r, false)?,
        TokenType::Shr => shift(l, r, true)?,
        _ => {
            return Err(RuntimeError::unsupported_operator(
                &op.to_string(),
                "int",
                "int",
            ));
        }
    };
    Ok(Value::Int(value))
}

fn shift(l: i64, r: i64, right: bool) -> Result<i64, RuntimeError> {
    if r < 0 {
        return Err(RuntimeError::invalid_operation("negative shift count"));
    }
    if r >= 64 {
        // Shifted fully out: zero, or the sign for arithmetic right shift.
        return Ok(if right { l >> 63 } else { 0 });
    }
    Ok(if right { l >> r } else { l << r })
}

fn float_binary_op(op: TokenType, l: f64, r: f64) -> Result<Value, RuntimeError> {
    let value = match op {
        TokenType::Plus => l + r,
        TokenType::Minus => l - r,
        TokenType::Star => l * r,
        TokenType::Slash => {
            if r == 0.0 {
                return Err(RuntimeError::division_by_zero());
            }
            l / r
        }
        TokenType::Percent => {
            if r == 0.0 {
                return Err(RuntimeError::division_by_zero());
            }
            l % r
        }
        _ => {
            return Err(RuntimeError::unsupported_operator(
                &op.to_string(),
                "float",
                "float",
            ));
        }
    };
    Ok(Value::Float(value))
}

pub fn unary_op(op: TokenType, operand: &Value) -> Result<Value, RuntimeError> {
    match op {
        // `!x` is defined for every value through falsiness.
        TokenType::Bang => Ok(Value::Bool(operand.is_falsy())),
        TokenType::Minus => match operand {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(RuntimeError::invalid_operation(format!(
                "unsupported operation: -{}",
                other.type_name()
            ))),
        },
        TokenType::Plus => match operand {
            Value::Int(_) | Value::Float(_) => Ok(operand.clone()),
            other => Err(RuntimeError::invalid_operation(format!(
                "unsupported operation: +{}",
                other.type_name()
            ))),
        },
        TokenType::Caret => match operand {
            Value::Int(i) => Ok(Value::Int(!i)),
            other => Err(RuntimeError::invalid_operation(format!(
                "unsupported operation: ^{}",
                other.type_name()
            ))),
        },
        _ => Err(RuntimeError::invalid_operation(format!(
            "unknown unary operator {}",
            op
        ))),
    }
}

fn reflect(op: TokenType) -> TokenType {
    match op {
        TokenType::Lt => TokenType::Gt,
        TokenType::Gt => TokenType::Lt,
        TokenType::LtEq => TokenType::GtEq,
        TokenType::GtEq => TokenType::LtEq,
        other => other,
    }
}

/// Comparison dispatch. Equality is total (with the implicit nil rule);
/// ordering is defined for numbers, chars, strings and bytes. A failed
/// ordering is retried with the sides swapped and the operator reflected;
/// if that fails too, the original error is reported.
pub fn compare(op: TokenType, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    match op {
        TokenType::Eq => return Ok(lhs.equal(rhs)),
        TokenType::NotEq => return Ok(!lhs.equal(rhs)),
        _ => {}
    }
    match compare_order(op, lhs, rhs) {
        Ok(result) => Ok(result),
        Err(err)
            if err.kind == ErrorKind::InvalidOperation && lhs.type_tag() != rhs.type_tag() =>
        {
            compare_order(reflect(op), rhs, lhs).map_err(|_| err)
        }
        Err(err) => Err(err),
    }
}

fn compare_order(op: TokenType, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    let ordering = match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::Int(l), Value::Float(r)) => (*l as f64).partial_cmp(r),
        (Value::Float(l), Value::Int(r)) => l.partial_cmp(&(*r as f64)),
        (Value::Float(l), Value::Float(r)) => l.partial_cmp(r),
        (Value::Char(l), Value::Char(r)) => Some(l.cmp(r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bytes(l), Value::Bytes(r)) => Some((*l.data()).cmp(&r.data())),
        _ => {
            return Err(RuntimeError::unsupported_operator(
                &op.to_string(),
                lhs.type_name(),
                rhs.type_name(),
            ));
        }
    };
    // NaN comparisons are false for every ordering operator.
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        TokenType::Lt => ordering == Ordering::Less,
        TokenType::LtEq => ordering != Ordering::Greater,
        TokenType::Gt => ordering == Ordering::Greater,
        TokenType::GtEq => ordering != Ordering::Less,
        _ => false,
    })
}

/// Container membership: arrays/tuples by element equality, tables by key,
/// strings by substring or char, bytes by byte, ranges by value.
pub fn contains(container: &Value, needle: &Value) -> Result<bool, RuntimeError> {
    match container {
        Value::Array(arr) => Ok(arr.elems().iter().any(|v| v.equal(needle))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equal(needle))),
        Value::Table(map) => Ok(map.borrow().contains(needle)),
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_ref() as &str)),
            Value::Char(c) => Ok(s.contains(*c)),
            other => Err(RuntimeError::invalid_operation(format!(
                "cannot search string for {}",
                other.type_name()
            ))),
        },
        Value::Bytes(b) => match needle {
            Value::Int(byte) => {
                let byte = u8::try_from(*byte).map_err(|_| {
                    RuntimeError::invalid_operation("byte value out of range")
                })?;
                Ok(b.data().contains(&byte))
            }
            other => Err(RuntimeError::invalid_operation(format!(
                "cannot search bytes for {}",
                other.type_name()
            ))),
        },
        Value::Range(r) => match needle {
            Value::Int(v) => Ok(r.contains(*v)),
            _ => Ok(false),
        },
        other => Err(RuntimeError::invalid_operation(format!(
            "{} is not a container",
            other.type_name()
        ))),
    }
}

/// Strips heredoc-style indentation from a double-single-quoted string:
/// a leading blank line is dropped, and the whitespace prefix of the final
/// (whitespace-only) line is removed from every line.
pub fn unindent_string(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    let indent = match lines.last() {
        Some(last) if last.trim().is_empty() => {
            let indent = last.to_string();
            lines.pop();
            indent
        }
        _ => String::new(),
    };
    lines
        .iter()
        .map(|line| line.strip_prefix(indent.as_str()).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expands a splat payload into elements. Sequences splat to their items;
/// mappings splat to (key, value) tuples.
pub fn splat_elements(value: &Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Array(arr) => Ok(arr.elems().to_vec()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Range(r) => Ok((0..r.len()).map(|i| Value::Int(r.at(i))).collect()),
        Value::Table(map) => Ok(map
            .borrow()
            .entries()
            .into_iter()
            .map(|(k, v)| Value::Tuple(Rc::from(vec![k, v])))
            .collect()),
        Value::String(s) => Ok(s.chars().map(Value::Char).collect()),
        other => Err(RuntimeError::invalid_operation(format!(
            "cannot splat {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(
            binary_op(TokenType::Plus, &Value::Int(2), &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            binary_op(TokenType::AmpCaret, &Value::Int(0b1100), &Value::Int(0b1010)).unwrap(),
            Value::Int(0b0100)
        );
        assert_eq!(
            binary_op(TokenType::Shl, &Value::Int(1), &Value::Int(4)).unwrap(),
            Value::Int(16)
        );
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary_op(TokenType::Slash, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        let err = binary_op(TokenType::Percent, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
    }

    #[test]
    fn test_mixed_numeric_promotes_to_float() {
        assert_eq!(
            binary_op(TokenType::Star, &Value::Int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_string_and_char_concat() {
        assert_eq!(
            binary_op(TokenType::Plus, &Value::string("ab"), &Value::Char('c')).unwrap(),
            Value::string("abc")
        );
        assert_eq!(
            binary_op(TokenType::Plus, &Value::Char('a'), &Value::string("bc")).unwrap(),
            Value::string("abc")
        );
    }

    #[test]
    fn test_char_arithmetic() {
        assert_eq!(
            binary_op(TokenType::Plus, &Value::Char('a'), &Value::Int(1)).unwrap(),
            Value::Char('b')
        );
        assert_eq!(
            binary_op(TokenType::Minus, &Value::Char('b'), &Value::Char('a')).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_nullish() {
        assert_eq!(
            binary_op(TokenType::Nullish, &Value::Nil, &Value::Int(5)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            binary_op(TokenType::Nullish, &Value::Int(1), &Value::Int(5)).unwrap(),
            Value::Int(1)
        );
        // Falsy but non-nil values win.
        assert_eq!(
            binary_op(TokenType::Nullish, &Value::Int(0), &Value::Int(5)).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_unsupported_operator_reports_types() {
        let err = binary_op(TokenType::Minus, &Value::string("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperation);
        assert!(err.message.contains("string"));
        assert!(err.message.contains("int"));
    }

    #[test]
    fn test_bang_covers_all_types() {
        assert_eq!(
            unary_op(TokenType::Bang, &Value::Nil).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            unary_op(TokenType::Bang, &Value::string("x")).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(TokenType::Lt, &Value::Int(1), &Value::Int(2)).unwrap());
        assert!(compare(TokenType::GtEq, &Value::Float(2.0), &Value::Int(2)).unwrap());
        assert!(compare(TokenType::Lt, &Value::string("a"), &Value::string("b")).unwrap());
        assert!(compare(TokenType::Eq, &Value::Nil, &Value::Nil).unwrap());
        assert!(!compare(TokenType::Eq, &Value::Int(0), &Value::Nil).unwrap());
        assert!(compare(TokenType::NotEq, &Value::Int(0), &Value::Nil).unwrap());
    }

    #[test]
    fn test_nan_ordering_is_false() {
        let nan = Value::Float(f64::NAN);
        assert!(!compare(TokenType::Lt, &nan, &Value::Int(1)).unwrap());
        assert!(!compare(TokenType::GtEq, &nan, &Value::Int(1)).unwrap());
    }

    #[test]
    fn test_incomparable_ordering_errors() {
        let err = compare(TokenType::Lt, &Value::string("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_contains() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert!(contains(&arr, &Value::Int(2)).unwrap());
        assert!(!contains(&arr, &Value::Int(3)).unwrap());
        assert!(contains(&Value::string("hello"), &Value::string("ell")).unwrap());
        assert!(contains(&Value::string("hello"), &Value::Char('h')).unwrap());
    }

    #[test]
    fn test_unindent_string() {
        assert_eq!(
            unindent_string("\n    line one\n      line two\n    "),
            "line one\n  line two"
        );
        assert_eq!(unindent_string("plain"), "plain");
    }

    #[test]
    fn test_splat_elements() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            splat_elements(&arr).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
        assert!(splat_elements(&Value::Int(1)).is_err());
    }
}
