use std::fmt;

use crate::runtime::errors::RuntimeError;
use crate::runtime::value::{Value, hash_value};

const BUCKET_SIZE: usize = 8;
// Grow when average bucket occupancy passes 6.5 of 8.
const LOAD_NUM: usize = 13;
const LOAD_DEN: usize = 2;
const NIL: usize = usize::MAX;

const CTRL_EMPTY: u8 = 0;
const CTRL_TOMB: u8 = 1;
const CTRL_FULL: u8 = 2;

#[derive(Debug, Clone)]
struct Slot {
    ctrl: u8,
    /// Zero means vacant; live hashes are never zero.
    hash: u64,
    key: Value,
    value: Value,
    prev: usize,
    next: usize,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            ctrl: CTRL_EMPTY,
            hash: 0,
            key: Value::Nil,
            value: Value::Nil,
            prev: NIL,
            next: NIL,
        }
    }
}

/// Insertion-ordered hash table keyed by hashable values.
///
/// Open addressing over fixed-capacity buckets of eight slots; a probe walks
/// slots within a bucket and overflows into the following bucket. Live
/// entries are threaded on a doubly-linked list in insertion order, which is
/// the iteration order. `itercount` is the live-iterator lease: while
/// nonzero, only overwrites of existing keys are permitted.
#[derive(Debug, Clone)]
pub struct ValueMap {
    slots: Vec<Slot>,
    buckets: usize,
    len: usize,
    tombs: usize,
    head: usize,
    tail: usize,
    immutable: bool,
    itercount: u32,
}

impl ValueMap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            buckets: 0,
            len: 0,
            tombs: 0,
            head: NIL,
            tail: NIL,
            immutable: false,
            itercount: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub(crate) fn set_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn begin_iteration(&mut self) {
        if !self.immutable {
            self.itercount += 1;
        }
    }

    pub fn end_iteration(&mut self) {
        if !self.immutable {
            self.itercount = self.itercount.saturating_sub(1);
        }
    }

    fn key_hash(key: &Value) -> Result<u64, RuntimeError> {
        hash_value(key).ok_or_else(|| RuntimeError::invalid_key_type(key.type_name()))
    }

    /// Probe for the slot holding `key`. Stops at the first never-used slot
    /// in the chain; tombstones are skipped so deletion does not break
    /// later entries.
    fn find_slot(&self, key: &Value, hash: u64) -> Option<usize> {
        if self.buckets == 0 {
            return None;
        }
        let mut bucket = (hash as usize) % self.buckets;
        for _ in 0..self.buckets {
            let base = bucket * BUCKET_SIZE;
            for offset in 0..BUCKET_SIZE {
                let slot = &self.slots[base + offset];
                match slot.ctrl {
                    CTRL_EMPTY => return None,
                    CTRL_FULL if slot.hash == hash && slot.key.equal(key) => {
                        return Some(base + offset);
                    }
                    _ => {}
                }
            }
            bucket = (bucket + 1) % self.buckets;
        }
        None
    }

    /// First reusable slot (tombstone or empty) in probe order.
    fn find_insert_slot(&self, hash: u64) -> usize {
        let mut bucket = (hash as usize) % self.buckets;
        loop {
            let base = bucket * BUCKET_SIZE;
            for offset in 0..BUCKET_SIZE {
                if self.slots[base + offset].ctrl != CTRL_FULL {
                    return base + offset;
                }
            }
            bucket = (bucket + 1) % self.buckets;
        }
    }

    fn grow(&mut self) {
        let new_buckets = if self.buckets == 0 { 1 } else { self.buckets * 2 };
        let mut order = Vec::with_capacity(self.len);
        let mut index = self.head;
        while index != NIL {
            let slot = &self.slots[index];
            order.push((slot.hash, slot.key.clone(), slot.value.clone()));
            index = slot.next;
        }

        self.slots = vec![Slot::vacant(); new_buckets * BUCKET_SIZE];
        self.buckets = new_buckets;
        self.len = 0;
        self.tombs = 0;
        self.head = NIL;
        self.tail = NIL;
        for (hash, key, value) in order {
            self.insert_raw(hash, key, value);
        }
    }

    fn insert_raw(&mut self, hash: u64, key: Value, value: Value) {
        let index = self.find_insert_slot(hash);
        let slot = &mut self.slots[index];
        slot.ctrl = CTRL_FULL;
        slot.hash = hash;
        slot.key = key;
        slot.value = value;
        slot.prev = self.tail;
        slot.next = NIL;
        if self.tail != NIL {
            self.slots[self.tail].next = index;
        } else {
            self.head = index;
        }
        self.tail = index;
        self.len += 1;
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("table"));
        }
        let hash = Self::key_hash(&key)?;

        // Overwriting an existing key is permitted even during iteration.
        if let Some(index) = self.find_slot(&key, hash) {
            self.slots[index].value = value;
            return Ok(());
        }
        if self.itercount > 0 {
            return Err(RuntimeError::mutated_during_iteration("table"));
        }

        // Mutable byte keys are snapshotted so their hash stays stable.
        let key = if matches!(key, Value::Bytes(_)) {
            key.clone_deep()
        } else {
            key
        };

        if self.buckets == 0 || (self.len + self.tombs + 1) * LOAD_DEN > self.buckets * LOAD_NUM {
            self.grow();
        }
        self.insert_raw(hash, key, value);
        Ok(())
    }

    pub fn lookup(&self, key: &Value) -> Option<Value> {
        let hash = hash_value(key)?;
        self.find_slot(key, hash)
            .map(|index| self.slots[index].value.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        match hash_value(key) {
            Some(hash) => self.find_slot(key, hash).is_some(),
            None => false,
        }
    }

    pub fn delete(&mut self, key: &Value) -> Result<Option<Value>, RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("table"));
        }
        if self.itercount > 0 {
            return Err(RuntimeError::mutated_during_iteration("table"));
        }
        let hash = Self::key_hash(key)?;
        let Some(index) = self.find_slot(key, hash) else {
            return Ok(None);
        };

        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }

        let slot = &mut self.slots[index];
        let value = std::mem::replace(&mut slot.value, Value::Nil);
        slot.key = Value::Nil;
        slot.hash = 0;
        slot.ctrl = CTRL_TOMB;
        slot.prev = NIL;
        slot.next = NIL;
        self.len -= 1;
        self.tombs += 1;
        Ok(Some(value))
    }

    pub fn clear(&mut self) -> Result<(), RuntimeError> {
        if self.immutable {
            return Err(RuntimeError::immutable("table"));
        }
        if self.itercount > 0 {
            return Err(RuntimeError::mutated_during_iteration("table"));
        }
        self.slots.clear();
        self.buckets = 0;
        self.len = 0;
        self.tombs = 0;
        self.head = NIL;
        self.tail = NIL;
        Ok(())
    }

    /// Unordered key-set equality with value equality.
    pub fn equal(&self, other: &ValueMap) -> bool {
        if self.len != other.len {
            return false;
        }
        let mut index = self.head;
        while index != NIL {
            let slot = &self.slots[index];
            match other.lookup(&slot.key) {
                Some(value) if value.equal(&slot.value) => {}
                _ => return false,
            }
            index = slot.next;
        }
        true
    }

    pub fn clone_deep(&self) -> ValueMap {
        let mut clone = ValueMap::new();
        let mut index = self.head;
        while index != NIL {
            let slot = &self.slots[index];
            // Keys are already private to this map; values clone deeply.
            clone
                .insert(slot.key.clone(), slot.value.clone_deep())
                .expect("fresh map accepts insertion");
            index = slot.next;
        }
        clone
    }

    // Entry cursors used by iterators and freezing. Slot indices stay valid
    // while iteration or freezing is in progress because growth only happens
    // on new-key insertion, which both forbid.

    pub(crate) fn first_entry(&self) -> Option<usize> {
        if self.head == NIL { None } else { Some(self.head) }
    }

    pub(crate) fn next_entry(&self, index: usize) -> Option<usize> {
        let next = self.slots[index].next;
        if next == NIL { None } else { Some(next) }
    }

    pub(crate) fn key_at(&self, index: usize) -> Value {
        self.slots[index].key.clone()
    }

    pub(crate) fn value_at(&self, index: usize) -> Value {
        self.slots[index].value.clone()
    }

    /// Internal value replacement that bypasses the immutability check;
    /// used when freezing entries in place.
    pub(crate) fn replace_value_at(&mut self, index: usize, value: Value) {
        self.slots[index].value = value;
    }

    /// Values in insertion order.
    pub fn elements(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.len);
        let mut index = self.head;
        while index != NIL {
            values.push(self.slots[index].value.clone());
            index = self.slots[index].next;
        }
        values
    }

    /// (key, value) pairs in insertion order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        let mut pairs = Vec::with_capacity(self.len);
        let mut index = self.head;
        while index != NIL {
            let slot = &self.slots[index];
            pairs.push((slot.key.clone(), slot.value.clone()));
            index = slot.next;
        }
        pairs
    }
}

impl Default for ValueMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .entries()
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}
