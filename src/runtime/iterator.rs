use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::errors::RuntimeError;
use crate::runtime::table::ValueMap;
use crate::runtime::value::{Array, ByteString, RangeValue, Value};

/// Live iteration state over an iterable value.
///
/// Mappings yield (key, value); plain sequences yield (index, value) with
/// the index starting at zero. Creating an iterator over a mutable array or
/// table takes an iteration lease which is released by [`close`], or by
/// drop as a safety net.
///
/// [`close`]: ValueIterator::close
#[derive(Debug)]
pub enum ValueIterator {
    Array {
        array: Rc<Array>,
        index: usize,
        closed: bool,
    },
    Table {
        map: Rc<RefCell<ValueMap>>,
        cursor: Option<usize>,
        closed: bool,
    },
    Range {
        range: Rc<RangeValue>,
        index: usize,
    },
    String {
        string: Rc<str>,
        byte: usize,
        index: usize,
    },
    Bytes {
        bytes: Rc<ByteString>,
        index: usize,
    },
    Tuple {
        items: Rc<[Value]>,
        index: usize,
    },
}

impl ValueIterator {
    pub fn new(value: Value) -> Result<ValueIterator, RuntimeError> {
        match value {
            Value::Array(array) => {
                array.begin_iteration();
                Ok(ValueIterator::Array {
                    array,
                    index: 0,
                    closed: false,
                })
            }
            Value::Table(map) => {
                map.borrow_mut().begin_iteration();
                let cursor = map.borrow().first_entry();
                Ok(ValueIterator::Table {
                    map,
                    cursor,
                    closed: false,
                })
            }
            Value::Range(range) => Ok(ValueIterator::Range { range, index: 0 }),
            Value::String(string) => Ok(ValueIterator::String {
                string,
                byte: 0,
                index: 0,
            }),
            Value::Bytes(bytes) => Ok(ValueIterator::Bytes { bytes, index: 0 }),
            Value::Tuple(items) => Ok(ValueIterator::Tuple { items, index: 0 }),
            other => Err(RuntimeError::invalid_operation(format!(
                "{} is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Pulls the next (key, value) pair, or `None` when exhausted.
    pub fn next(&mut self) -> Option<(Value, Value)> {
        match self {
            ValueIterator::Array { array, index, .. } => {
                let value = array.get(*index)?;
                let key = Value::Int(*index as i64);
                *index += 1;
                Some((key, value))
            }
            ValueIterator::Table { map, cursor, .. } => {
                let entry = (*cursor)?;
                let map_ref = map.borrow();
                let pair = (map_ref.key_at(entry), map_ref.value_at(entry));
                *cursor = map_ref.next_entry(entry);
                Some(pair)
            }
            ValueIterator::Range { range, index } => {
                if *index >= range.len() {
                    return None;
                }
                let pair = (Value::Int(*index as i64), Value::Int(range.at(*index)));
                *index += 1;
                Some(pair)
            }
            ValueIterator::String {
                string,
                byte,
                index,
            } => {
                let ch = string[*byte..].chars().next()?;
                let pair = (Value::Int(*index as i64), Value::Char(ch));
                *byte += ch.len_utf8();
                *index += 1;
                Some(pair)
            }
            ValueIterator::Bytes { bytes, index } => {
                let byte = bytes.get(*index)?;
                let pair = (Value::Int(*index as i64), Value::Int(byte as i64));
                *index += 1;
                Some(pair)
            }
            ValueIterator::Tuple { items, index } => {
                let value = items.get(*index)?.clone();
                let pair = (Value::Int(*index as i64), value);
                *index += 1;
                Some(pair)
            }
        }
    }

    /// Releases the iteration lease. Idempotent.
    pub fn close(&mut self) {
        match self {
            ValueIterator::Array { array, closed, .. } => {
                if !*closed {
                    array.end_iteration();
                    *closed = true;
                }
            }
            ValueIterator::Table { map, closed, .. } => {
                if !*closed {
                    map.borrow_mut().end_iteration();
                    *closed = true;
                }
            }
            _ => {}
        }
    }
}

impl Drop for ValueIterator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_iteration_yields_index_value() {
        let arr = Value::array(vec![Value::Int(10), Value::Int(20)]);
        let mut iter = ValueIterator::new(arr).unwrap();
        assert_eq!(iter.next(), Some((Value::Int(0), Value::Int(10))));
        assert_eq!(iter.next(), Some((Value::Int(1), Value::Int(20))));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_table_iteration_yields_key_value_in_insertion_order() {
        let mut map = ValueMap::new();
        map.insert(Value::string("a"), Value::Int(1)).unwrap();
        map.insert(Value::string("b"), Value::Int(2)).unwrap();
        let table = Value::table(map);
        let mut iter = ValueIterator::new(table).unwrap();
        assert_eq!(iter.next(), Some((Value::string("a"), Value::Int(1))));
        assert_eq!(iter.next(), Some((Value::string("b"), Value::Int(2))));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_lease_is_released_on_close() {
        let arr = match Value::array(vec![Value::Int(1)]) {
            Value::Array(rc) => rc,
            _ => unreachable!(),
        };
        let mut iter = ValueIterator::new(Value::Array(arr.clone())).unwrap();
        assert!(arr.push(Value::Int(2)).is_err());
        iter.close();
        assert!(arr.push(Value::Int(2)).is_ok());
        // Closing twice is harmless.
        iter.close();
        assert!(arr.push(Value::Int(3)).is_ok());
    }

    #[test]
    fn test_yield_count_matches_len() {
        let values = [
            Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::string("héllo"),
            Value::bytes(vec![1, 2, 3, 4]),
            Value::tuple(vec![Value::Nil, Value::Bool(true)]),
            Value::Range(Rc::new(RangeValue::new(0, 7, 2).unwrap())),
        ];
        let lens = [3usize, 5, 4, 2, 4];
        for (value, len) in values.into_iter().zip(lens) {
            let mut iter = ValueIterator::new(value).unwrap();
            let mut count = 0;
            while iter.next().is_some() {
                count += 1;
            }
            assert_eq!(count, len);
        }
    }

    #[test]
    fn test_descending_range_iteration() {
        let range = Value::Range(Rc::new(RangeValue::new(3, 0, 1).unwrap()));
        let mut iter = ValueIterator::new(range).unwrap();
        let mut values = Vec::new();
        while let Some((_, v)) = iter.next() {
            values.push(v);
        }
        assert_eq!(values, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_not_iterable() {
        assert!(ValueIterator::new(Value::Int(3)).is_err());
        assert!(ValueIterator::new(Value::Nil).is_err());
    }
}
