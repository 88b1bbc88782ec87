use std::rc::Rc;

use crate::runtime::errors::RuntimeError;
use crate::runtime::value::{ByteString, Value};

use super::VM;

fn expect_int_index(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::invalid_index_type(other.type_name())),
    }
}

fn checked_index(index: i64, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|i| *i < len)
}

impl VM {
    pub(super) fn execute_index(&mut self, with_ok: bool) -> Result<(), RuntimeError> {
        let index = self.pop()?;
        let target = self.pop()?;
        let value = Self::index_value(&target, &index, with_ok)?;
        self.push(value)
    }

    /// Positional and keyed access. `with_ok` turns missing-entry failures
    /// into nil (used by `??=` on selectors).
    fn index_value(target: &Value, index: &Value, with_ok: bool) -> Result<Value, RuntimeError> {
        match target {
            Value::Array(arr) => {
                let i = expect_int_index(index)?;
                match checked_index(i, arr.len()).and_then(|i| arr.get(i)) {
                    Some(value) => Ok(value),
                    None if with_ok => Ok(Value::Nil),
                    None => Err(RuntimeError::index_out_of_bounds(i, arr.len())),
                }
            }
            Value::Tuple(items) => {
                let i = expect_int_index(index)?;
                match checked_index(i, items.len()).map(|i| items[i].clone()) {
                    Some(value) => Ok(value),
                    None if with_ok => Ok(Value::Nil),
                    None => Err(RuntimeError::index_out_of_bounds(i, items.len())),
                }
            }
            Value::Bytes(bytes) => {
                let i = expect_int_index(index)?;
                match checked_index(i, bytes.len()).and_then(|i| bytes.get(i)) {
                    Some(byte) => Ok(Value::Int(byte as i64)),
                    None if with_ok => Ok(Value::Nil),
                    None => Err(RuntimeError::index_out_of_bounds(i, bytes.len())),
                }
            }
            // Out-of-range string access yields the nil sentinel rather
            // than an error.
            Value::String(s) => {
                let i = expect_int_index(index)?;
                match usize::try_from(i).ok().and_then(|i| s.chars().nth(i)) {
                    Some(ch) => Ok(Value::Char(ch)),
                    None => Ok(Value::Nil),
                }
            }
            Value::Range(range) => {
                let i = expect_int_index(index)?;
                match checked_index(i, range.len()) {
                    Some(i) => Ok(Value::Int(range.at(i))),
                    None if with_ok => Ok(Value::Nil),
                    None => Err(RuntimeError::index_out_of_bounds(i, range.len())),
                }
            }
            Value::Table(map) => {
                let map = map.borrow();
                if crate::runtime::value::hash_value(index).is_none() {
                    if with_ok {
                        return Ok(Value::Nil);
                    }
                    return Err(RuntimeError::invalid_key_type(index.type_name()));
                }
                // A missing key reads as nil.
                Ok(map.lookup(index).unwrap_or(Value::Nil))
            }
            other => match index {
                Value::String(field) => Err(RuntimeError::no_such_field(other.type_name(), field)),
                _ => Err(RuntimeError::invalid_operation(format!(
                    "{} is not indexable",
                    other.type_name()
                ))),
            },
        }
    }

    /// Stack: [value, target, key] → target[key] = value.
    pub(super) fn execute_set_index(&mut self) -> Result<(), RuntimeError> {
        let key = self.pop()?;
        let target = self.pop()?;
        let value = self.pop()?;
        match &target {
            Value::Array(arr) => {
                let i = expect_int_index(&key)?;
                match usize::try_from(i) {
                    Ok(i) => arr.set(i, value),
                    Err(_) => Err(RuntimeError::index_out_of_bounds(i, arr.len())),
                }
            }
            Value::Table(map) => map.borrow_mut().insert(key, value),
            Value::Bytes(bytes) => {
                let i = expect_int_index(&key)?;
                let byte = match value {
                    Value::Int(b) if (0..=255).contains(&b) => b as u8,
                    other => {
                        return Err(RuntimeError::new(
                            crate::runtime::errors::ErrorKind::InvalidValueType,
                            format!("cannot store {} in bytes", other.type_name()),
                        ));
                    }
                };
                match usize::try_from(i) {
                    Ok(i) => bytes.set(i, byte),
                    Err(_) => Err(RuntimeError::index_out_of_bounds(i, bytes.len())),
                }
            }
            other => Err(RuntimeError::invalid_operation(format!(
                "cannot assign into {}",
                other.type_name()
            ))),
        }
    }

    /// Stack: [target, low?, high?] by mask (0x1 = low, 0x2 = high).
    pub(super) fn execute_slice(&mut self, mask: u8) -> Result<(), RuntimeError> {
        let high = if mask & 0x2 != 0 {
            Some(self.pop()?)
        } else {
            None
        };
        let low = if mask & 0x1 != 0 {
            Some(self.pop()?)
        } else {
            None
        };
        let target = self.pop()?;

        let len = match &target {
            Value::Array(arr) => arr.len(),
            Value::String(s) => s.chars().count(),
            Value::Bytes(bytes) => bytes.len(),
            Value::Tuple(items) => items.len(),
            other => {
                return Err(RuntimeError::invalid_operation(format!(
                    "{} is not sliceable",
                    other.type_name()
                )));
            }
        };

        let resolve = |bound: Option<Value>, default: usize| -> Result<usize, RuntimeError> {
            match bound {
                None => Ok(default),
                Some(value) => {
                    let i = expect_int_index(&value)?;
                    if i < 0 {
                        return Err(RuntimeError::index_out_of_bounds(i, len));
                    }
                    Ok(i as usize)
                }
            }
        };
        let low = resolve(low, 0)?;
        let high = resolve(high, len)?;
        if low > high || high > len {
            return Err(RuntimeError::invalid_operation(format!(
                "invalid slice bounds {}..{} for length {}",
                low, high, len
            )));
        }

        let result = match &target {
            Value::Array(arr) => Value::Array(Rc::new(arr.slice_copy(low, high))),
            Value::String(s) => {
                let sliced: String = s.chars().skip(low).take(high - low).collect();
                Value::string(sliced)
            }
            Value::Bytes(bytes) => {
                let data = bytes.data()[low..high].to_vec();
                if bytes.is_immutable() {
                    Value::Bytes(Rc::new(ByteString::frozen(data)))
                } else {
                    Value::bytes(data)
                }
            }
            Value::Tuple(items) => Value::tuple(items[low..high].to_vec()),
            _ => unreachable!("length was computed for this target"),
        };
        self.push(result)
    }

    /// Verifies the sequence on top of the stack has exactly `expected`
    /// elements (multi-assignment unpacking). Leaves the sequence in place.
    pub(super) fn execute_unpack_assert(&mut self, expected: usize) -> Result<(), RuntimeError> {
        let target = self.peek(0)?;
        let actual = match target {
            Value::Array(arr) => arr.len(),
            Value::Tuple(items) => items.len(),
            other => {
                return Err(RuntimeError::new(
                    crate::runtime::errors::ErrorKind::InvalidValueType,
                    format!("cannot unpack {}", other.type_name()),
                ));
            }
        };
        if actual != expected {
            return Err(RuntimeError::new(
                crate::runtime::errors::ErrorKind::InvalidValueType,
                format!("cannot unpack {} values into {} targets", actual, expected),
            ));
        }
        Ok(())
    }

    /// Pushes element `index` of the sequence on top of the stack,
    /// leaving the sequence in place.
    pub(super) fn execute_unpack_elem(&mut self, index: usize) -> Result<(), RuntimeError> {
        let value = match self.peek(0)? {
            Value::Array(arr) => arr.get(index),
            Value::Tuple(items) => items.get(index).cloned(),
            _ => None,
        };
        match value {
            Some(value) => self.push(value),
            None => Err(RuntimeError::index_out_of_bounds(index as i64, 0)),
        }
    }

    /// Pops `count` values, expanding splat markers when `splat` is set.
    pub(super) fn collect_values(
        &mut self,
        count: usize,
        splat: bool,
    ) -> Result<Vec<Value>, RuntimeError> {
        if !splat {
            return Ok(self.take_args(count));
        }
        let values = self.take_args(count);
        let mut expanded = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Splat(inner) => {
                    expanded.extend(crate::runtime::ops::splat_elements(&inner)?)
                }
                other => expanded.push(other),
            }
        }
        Ok(expanded)
    }
}
