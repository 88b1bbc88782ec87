use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::runtime::builtin_function::BuiltinFunction;
use crate::runtime::closure::Closure;
use crate::runtime::compiled_function::CompiledFunction;
use crate::runtime::errors::RuntimeError;
use crate::runtime::iterator::ValueIterator;
use crate::runtime::table::ValueMap;

/// Mutable cell shared by closures capturing the same local.
pub type CellRef = Rc<RefCell<Value>>;

/// First-class type descriptor. Callable as a constructor/converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Nil,
    Bool,
    Int,
    Float,
    Char,
    String,
    Bytes,
    Array,
    Table,
    Tuple,
    Range,
    Function,
    Builtin,
    Type,
    Iterator,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Char => "char",
            TypeTag::String => "string",
            TypeTag::Bytes => "bytes",
            TypeTag::Array => "array",
            TypeTag::Table => "table",
            TypeTag::Tuple => "tuple",
            TypeTag::Range => "range",
            TypeTag::Function => "function",
            TypeTag::Builtin => "builtin",
            TypeTag::Type => "type",
            TypeTag::Iterator => "iterator",
        }
    }
}

/// Growable value sequence. Mutable by default; freezing produces a deep
/// immutable copy. `itercount` is the live-iterator lease: while nonzero the
/// array rejects mutation.
#[derive(Debug)]
pub struct Array {
    elems: RefCell<Vec<Value>>,
    immutable: bool,
    itercount: Cell<u32>,
}

impl Array {
    pub fn new(elems: Vec<Value>) -> Self {
        Self {
            elems: RefCell::new(elems),
            immutable: false,
            itercount: Cell::new(0),
        }
    }

    pub fn frozen(elems: Vec<Value>) -> Self {
        Self {
            elems: RefCell::new(elems),
            immutable: true,
            itercount: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.elems.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn elems(&self) -> Ref<'_, Vec<Value>> {
        self.elems.borrow()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.elems.borrow().get(index).cloned()
    }

    fn check_mutable(&self) -> Result<(), RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("array"));
        }
        if self.itercount.get() > 0 {
            return Err(RuntimeError::mutated_during_iteration("array"));
        }
        Ok(())
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), RuntimeError> {
        self.check_mutable()?;
        let mut elems = self.elems.borrow_mut();
        let len = elems.len();
        match elems.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::index_out_of_bounds(index as i64, len)),
        }
    }

    pub fn push(&self, value: Value) -> Result<(), RuntimeError> {
        self.check_mutable()?;
        self.elems.borrow_mut().push(value);
        Ok(())
    }

    /// Copies the `low..high` range into a fresh array that inherits the
    /// parent's immutability.
    pub fn slice_copy(&self, low: usize, high: usize) -> Array {
        let elems = self.elems.borrow()[low..high].to_vec();
        if self.immutable {
            Array::frozen(elems)
        } else {
            Array::new(elems)
        }
    }

    pub fn begin_iteration(&self) {
        if !self.immutable {
            self.itercount.set(self.itercount.get() + 1);
        }
    }

    pub fn end_iteration(&self) {
        if !self.immutable {
            let count = self.itercount.get();
            debug_assert!(count > 0);
            self.itercount.set(count.saturating_sub(1));
        }
    }
}

/// Mutable-length byte sequence.
#[derive(Debug)]
pub struct ByteString {
    data: RefCell<Vec<u8>>,
    immutable: bool,
}

impl ByteString {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RefCell::new(data),
            immutable: false,
        }
    }

    pub fn frozen(data: Vec<u8>) -> Self {
        Self {
            data: RefCell::new(data),
            immutable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn data(&self) -> Ref<'_, Vec<u8>> {
        self.data.borrow()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.data.borrow().get(index).copied()
    }

    pub fn set(&self, index: usize, byte: u8) -> Result<(), RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("bytes"));
        }
        let mut data = self.data.borrow_mut();
        let len = data.len();
        match data.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                Ok(())
            }
            None => Err(RuntimeError::index_out_of_bounds(index as i64, len)),
        }
    }

    pub fn push(&self, byte: u8) -> Result<(), RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("bytes"));
        }
        self.data.borrow_mut().push(byte);
        Ok(())
    }
}

/// Integer range with exclusive stop. `step` is always positive; the
/// direction is inferred from start vs stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self, RuntimeError> {
        if step <= 0 {
            return Err(RuntimeError::invalid_operation("range step must be positive"));
        }
        Ok(Self { start, stop, step })
    }

    pub fn len(&self) -> usize {
        if self.start == self.stop {
            return 0;
        }
        let distance = (self.stop - self.start).unsigned_abs();
        (((distance - 1) / self.step.unsigned_abs()) + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> i64 {
        let offset = index as i64 * self.step;
        if self.start <= self.stop {
            self.start + offset
        } else {
            self.start - offset
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        let (lo, hi, from) = if self.start <= self.stop {
            (self.start, self.stop, self.start)
        } else {
            (self.stop + 1, self.start + 1, self.start)
        };
        value >= lo && value < hi && (value - from).rem_euclid(self.step) == 0
    }
}

/// Runtime value used by the VM stack, globals, constants and closures.
///
/// Heap kinds are `Rc`-shared: cloning a value is a refcount bump, and all
/// holders observe mutation (unless frozen). Value graphs are expected to be
/// acyclic; the language provides no back-edge besides storing a container
/// in itself, which leaks under `Rc` but is otherwise harmless.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(Rc<str>),
    Bytes(Rc<ByteString>),
    Array(Rc<Array>),
    Table(Rc<RefCell<ValueMap>>),
    Tuple(Rc<[Value]>),
    Range(Rc<RangeValue>),
    /// Compiled function prototype (no captures).
    Function(Rc<CompiledFunction>),
    /// Prototype plus captured free-variable cells.
    Closure(Rc<Closure>),
    Builtin(Rc<BuiltinFunction>),
    Type(TypeTag),
    /// Internal: live iteration state. Never user-visible.
    Iterator(Rc<RefCell<ValueIterator>>),
    /// Internal: free-variable cell. Never user-visible.
    Cell(CellRef),
    /// Internal: transient splat marker. Never user-visible.
    Splat(Rc<Value>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(elems: Vec<Value>) -> Value {
        Value::Array(Rc::new(Array::new(elems)))
    }

    pub fn tuple(elems: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(elems))
    }

    pub fn table(map: ValueMap) -> Value {
        Value::Table(Rc::new(RefCell::new(map)))
    }

    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Rc::new(ByteString::new(data)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Char(_) => TypeTag::Char,
            Value::String(_) => TypeTag::String,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::Array(_) => TypeTag::Array,
            Value::Table(_) => TypeTag::Table,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::Range(_) => TypeTag::Range,
            Value::Function(_) | Value::Closure(_) => TypeTag::Function,
            Value::Builtin(_) => TypeTag::Builtin,
            Value::Type(_) => TypeTag::Type,
            Value::Iterator(_) | Value::Cell(_) | Value::Splat(_) => TypeTag::Iterator,
        }
    }

    /// Canonical runtime type label used in diagnostics and builtins.
    pub fn type_name(&self) -> &'static str {
        self.type_tag().name()
    }

    /// Falsy values: nil, false, zero numbers, NUL char, and empty
    /// sequences/collections. Everything else is truthy.
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0 || f.is_nan(),
            Value::Char(c) => *c == '\0',
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Table(t) => t.borrow().len() == 0,
            Value::Tuple(t) => t.is_empty(),
            Value::Range(r) => r.is_empty(),
            _ => false,
        }
    }

    /// Deep structural equality. Numeric kinds compare across Int/Float;
    /// functions and builtins compare by identity; `nil` equals only `nil`.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, _) | (_, Value::Nil) => false,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Int(l), Value::Float(r)) => (*l as f64) == *r,
            (Value::Float(l), Value::Int(r)) => *l == (*r as f64),
            (Value::Float(l), Value::Float(r)) => l == r,
            (Value::Char(l), Value::Char(r)) => l == r,
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Bytes(l), Value::Bytes(r)) => *l.data() == *r.data(),
            (Value::Array(l), Value::Array(r)) => {
                if Rc::ptr_eq(l, r) {
                    return true;
                }
                let (l, r) = (l.elems(), r.elems());
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| a.equal(b))
            }
            (Value::Table(l), Value::Table(r)) => {
                if Rc::ptr_eq(l, r) {
                    return true;
                }
                l.borrow().equal(&r.borrow())
            }
            (Value::Tuple(l), Value::Tuple(r)) => {
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| a.equal(b))
            }
            (Value::Range(l), Value::Range(r)) => l == r,
            (Value::Function(l), Value::Function(r)) => Rc::ptr_eq(l, r),
            (Value::Closure(l), Value::Closure(r)) => Rc::ptr_eq(l, r),
            (Value::Builtin(l), Value::Builtin(r)) => Rc::ptr_eq(l, r),
            (Value::Type(l), Value::Type(r)) => l == r,
            _ => false,
        }
    }

    /// Deep clone: fresh storage for arrays, tables, bytes and tuples, so
    /// mutating the clone never affects the original. Clones are mutable
    /// even when the source was frozen.
    pub fn clone_deep(&self) -> Value {
        match self {
            Value::Bytes(b) => Value::bytes(b.to_vec()),
            Value::Array(a) => {
                let elems = a.elems().iter().map(Value::clone_deep).collect();
                Value::array(elems)
            }
            Value::Table(t) => Value::table(t.borrow().clone_deep()),
            Value::Tuple(t) => Value::tuple(t.iter().map(Value::clone_deep).collect()),
            other => other.clone(),
        }
    }

    /// Whether mutating operations on this value are rejected.
    pub fn is_immutable(&self) -> bool {
        match self {
            Value::Bytes(b) => b.is_immutable(),
            Value::Array(a) => a.is_immutable(),
            Value::Table(t) => t.borrow().is_immutable(),
            Value::Tuple(t) => t.iter().all(Value::is_immutable),
            Value::Iterator(_) | Value::Cell(_) | Value::Splat(_) => false,
            _ => true,
        }
    }

    /// Returns an immutable view of this value. Freezing is monotone: a
    /// frozen value can never become mutable again.
    ///
    /// Arrays freeze by deep-cloning into an immutable array; tables flip
    /// their flag in place (so every holder observes it) and freeze their
    /// entries recursively. The flag is set before recursing, which makes
    /// self-referential tables terminate.
    pub fn freeze(&self) -> Value {
        match self {
            Value::Bytes(b) => {
                if b.is_immutable() {
                    self.clone()
                } else {
                    Value::Bytes(Rc::new(ByteString::frozen(b.to_vec())))
                }
            }
            Value::Array(a) => {
                if a.is_immutable() {
                    return self.clone();
                }
                let elems = a.elems().iter().map(Value::freeze).collect();
                Value::Array(Rc::new(Array::frozen(elems)))
            }
            Value::Table(t) => {
                if t.borrow().is_immutable() {
                    return self.clone();
                }
                t.borrow_mut().set_immutable();
                // Freeze entries without holding a borrow across recursion.
                let mut entry = t.borrow().first_entry();
                while let Some(index) = entry {
                    let value = t.borrow().value_at(index);
                    let frozen = value.freeze();
                    t.borrow_mut().replace_value_at(index, frozen);
                    entry = t.borrow().next_entry(index);
                }
                self.clone()
            }
            Value::Tuple(t) => Value::Tuple(t.iter().map(Value::freeze).collect()),
            other => other.clone(),
        }
    }

    /// Interpolation-friendly text: strings and chars render without quotes.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Bytes(b) => String::from_utf8_lossy(&b.data()).into_owned(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Char(v) => write!(f, "'{}'", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "bytes[{}]", v.len()),
            Value::Array(elements) => {
                let items: Vec<String> = elements.elems().iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Table(map) => write!(f, "{}", map.borrow()),
            Value::Tuple(elements) => {
                let items: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
            Value::Range(r) => {
                if r.step == 1 {
                    write!(f, "range({}, {})", r.start, r.stop)
                } else {
                    write!(f, "range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Value::Function(func) => match &func.name {
                Some(name) => write!(f, "<function {}>", name),
                None => write!(f, "<function>"),
            },
            Value::Closure(closure) => match &closure.function.name {
                Some(name) => write!(f, "<function {}>", name),
                None => write!(f, "<function>"),
            },
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Value::Type(tag) => write!(f, "<type {}>", tag.name()),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::Cell(_) => write!(f, "<cell>"),
            Value::Splat(_) => write!(f, "<splat>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(tag: u8, bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET ^ (tag as u64);
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable 64-bit hash for hashable values; `None` for unhashable kinds.
///
/// Equal values hash equal: a Float with an exact integer value hashes as
/// that Int. Zero is reserved by the hash table, so a zero result is bumped
/// to one.
pub fn hash_value(value: &Value) -> Option<u64> {
    let hash = match value {
        Value::Nil => fnv1a(0, &[]),
        Value::Bool(b) => fnv1a(1, &[*b as u8]),
        Value::Int(i) => fnv1a(2, &i.to_le_bytes()),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                fnv1a(2, &(*f as i64).to_le_bytes())
            } else {
                fnv1a(3, &f.to_bits().to_le_bytes())
            }
        }
        Value::Char(c) => fnv1a(4, &(*c as u32).to_le_bytes()),
        Value::String(s) => fnv1a(5, s.as_bytes()),
        Value::Bytes(b) => fnv1a(6, &b.data()),
        _ => return None,
    };
    Some(if hash == 0 { 1 } else { hash })
}

/// Cross-type coercion used by callable type descriptors.
pub fn convert(value: &Value, target: TypeTag) -> Result<Value, RuntimeError> {
    let fail = || RuntimeError::not_convertible(value.type_name(), target.name());
    if value.type_tag() == target {
        return Ok(value.clone());
    }
    match target {
        TypeTag::Bool => Ok(Value::Bool(!value.is_falsy())),
        TypeTag::Int => match value {
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            Value::Char(c) => Ok(Value::Int(*c as i64)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },
        TypeTag::Float => match value {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },
        TypeTag::Char => match value {
            Value::Int(i) => u32::try_from(*i)
                .ok()
                .and_then(char::from_u32)
                .map(Value::Char)
                .ok_or_else(fail),
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(fail()),
                }
            }
            _ => Err(fail()),
        },
        TypeTag::String => Ok(Value::string(value.to_display_string())),
        TypeTag::Bytes => match value {
            Value::String(s) => Ok(Value::bytes(s.as_bytes().to_vec())),
            _ => Err(fail()),
        },
        TypeTag::Array => match value {
            Value::Tuple(t) => Ok(Value::array(t.to_vec())),
            Value::Range(r) => {
                let elems = (0..r.len()).map(|i| Value::Int(r.at(i))).collect();
                Ok(Value::array(elems))
            }
            Value::Bytes(b) => {
                let elems = b.data().iter().map(|&byte| Value::Int(byte as i64)).collect();
                Ok(Value::array(elems))
            }
            _ => Err(fail()),
        },
        TypeTag::Tuple => match value {
            Value::Array(a) => Ok(Value::tuple(a.elems().to_vec())),
            _ => Err(fail()),
        },
        _ => Err(fail()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::string("x").type_name(), "string");
        assert_eq!(Value::array(vec![]).type_name(), "array");
        assert_eq!(Value::Type(TypeTag::Int).type_name(), "type");
    }

    #[test]
    fn test_falsiness() {
        assert!(Value::Nil.is_falsy());
        assert!(Value::Bool(false).is_falsy());
        assert!(Value::Int(0).is_falsy());
        assert!(Value::string("").is_falsy());
        assert!(!Value::Int(1).is_falsy());
        assert!(!Value::Bool(true).is_falsy());
        assert!(!Value::array(vec![Value::Nil]).is_falsy());
    }

    #[test]
    fn test_numeric_equality_crosses_kinds() {
        assert!(Value::Int(1).equal(&Value::Float(1.0)));
        assert!(!Value::Int(1).equal(&Value::Float(1.5)));
    }

    #[test]
    fn test_equal_hash_law() {
        let pairs = [
            (Value::Int(7), Value::Float(7.0)),
            (Value::string("abc"), Value::string("abc")),
            (Value::Bool(true), Value::Bool(true)),
        ];
        for (a, b) in pairs {
            assert!(a.equal(&b));
            assert_eq!(hash_value(&a), hash_value(&b));
        }
        assert!(hash_value(&Value::array(vec![])).is_none());
    }

    #[test]
    fn test_clone_deep_isolates_mutation() {
        let original = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let clone = original.clone_deep();
        if let Value::Array(arr) = &clone {
            arr.push(Value::Int(3)).unwrap();
        }
        if let Value::Array(arr) = &original {
            assert_eq!(arr.len(), 2);
        }
    }

    #[test]
    fn test_freeze_is_monotone_and_deep() {
        let inner = Value::array(vec![Value::Int(1)]);
        let outer = Value::array(vec![inner]);
        let frozen = outer.freeze();
        assert!(frozen.is_immutable());
        let twice = frozen.freeze();
        assert!(twice.equal(&frozen));
        if let Value::Array(arr) = &frozen {
            assert!(arr.push(Value::Int(2)).is_err());
            if let Some(Value::Array(inner)) = arr.get(0) {
                assert!(inner.is_immutable());
            } else {
                panic!("expected nested array");
            }
        }
    }

    #[test]
    fn test_mutation_during_iteration_fails() {
        let arr = Rc::new(Array::new(vec![Value::Int(1)]));
        arr.begin_iteration();
        assert!(arr.push(Value::Int(2)).is_err());
        arr.end_iteration();
        assert!(arr.push(Value::Int(2)).is_ok());
    }

    #[test]
    fn test_range_len_and_at() {
        let up = RangeValue::new(0, 10, 1).unwrap();
        assert_eq!(up.len(), 10);
        assert_eq!(up.at(0), 0);
        assert_eq!(up.at(9), 9);

        let down = RangeValue::new(10, 0, 1).unwrap();
        assert_eq!(down.len(), 10);
        assert_eq!(down.at(0), 10);
        assert_eq!(down.at(9), 1);

        let stepped = RangeValue::new(0, 10, 3).unwrap();
        assert_eq!(stepped.len(), 4);
        assert_eq!(stepped.at(3), 9);

        let empty = RangeValue::new(5, 5, 1).unwrap();
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn test_range_contains() {
        let r = RangeValue::new(0, 10, 2).unwrap();
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(!r.contains(10));
    }

    #[test]
    fn test_convert() {
        assert_eq!(
            convert(&Value::string("42"), TypeTag::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            convert(&Value::Int(97), TypeTag::Char).unwrap(),
            Value::Char('a')
        );
        assert_eq!(
            convert(&Value::Char('a'), TypeTag::Int).unwrap(),
            Value::Int(97)
        );
        assert_eq!(
            convert(&Value::string("hi"), TypeTag::Bytes).unwrap(),
            Value::bytes(b"hi".to_vec())
        );
        assert!(convert(&Value::Nil, TypeTag::Int).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::string("hi").to_string(), "\"hi\"");
        assert_eq!(Value::string("hi").to_display_string(), "hi");
        assert_eq!(
            Value::array(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "[1, 2]"
        );
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Nil]).to_string(),
            "(1, nil)"
        );
    }
}
