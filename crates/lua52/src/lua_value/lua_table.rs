// LuaTable - dense array part plus an insertion-ordered hash part.
//
// The hash part keeps entries in a vector indexed by an ahash map, so a
// traversal can resume from any key in O(1). Removing a key leaves a nil
// value in place (a traversal may clear fields as it goes); dead entries are
// dropped when a new key is inserted and at least half the entries are dead.

use std::cell::Cell;
use std::collections::HashMap;

use ahash::RandomState;
use thiserror::Error;

use super::{LuaString, LuaValue, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidKey {
    #[error("table index is nil")]
    Nil,
    #[error("table index is NaN")]
    NaN,
}

#[derive(Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    node: Vec<(LuaValue, LuaValue)>,
    index: HashMap<LuaValue, usize, RandomState>,
    dead: usize,
    metatable: Option<TableRef>,
    /// Bit `i` set: the event with tag `i` is known to be absent when this
    /// table is used as a metatable. Cleared on every raw write.
    flags: Cell<u8>,
}

impl LuaTable {
    pub fn new(narray: usize, nhash: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(narray),
            node: Vec::with_capacity(nhash),
            index: HashMap::with_capacity_and_hasher(nhash, RandomState::new()),
            dead: 0,
            metatable: None,
            flags: Cell::new(0),
        }
    }

    #[inline(always)]
    fn array_index(key: &LuaValue, len: usize) -> Option<usize> {
        match key {
            LuaValue::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= len as f64 => {
                Some(*n as usize - 1)
            }
            _ => None,
        }
    }

    /// Raw read
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = Self::array_index(key, self.array.len()) {
            return self.array[i].clone();
        }
        if key.is_nil() {
            return LuaValue::Nil;
        }
        match self.index.get(key) {
            Some(&i) => self.node[i].1.clone(),
            None => LuaValue::Nil,
        }
    }

    #[inline]
    pub fn get_int(&self, key: i64) -> LuaValue {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            return self.array[key as usize - 1].clone();
        }
        match self.index.get(&LuaValue::Number(key as f64)) {
            Some(&i) => self.node[i].1.clone(),
            None => LuaValue::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.get(&LuaValue::String(LuaString::from(key)))
    }

    /// Raw write. A nil value removes the key.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), InvalidKey> {
        match &key {
            LuaValue::Nil => return Err(InvalidKey::Nil),
            LuaValue::Number(n) if n.is_nan() => return Err(InvalidKey::NaN),
            _ => {}
        }
        self.flags.set(0);
        if let Some(i) = Self::array_index(&key, self.array.len()) {
            self.array[i] = value;
            return Ok(());
        }
        if let LuaValue::Number(n) = key {
            if n == (self.array.len() + 1) as f64 && !value.is_nil() {
                self.array.push(value);
                self.migrate_from_hash();
                return Ok(());
            }
        }
        self.hash_set(key, value);
        Ok(())
    }

    pub fn set_int(&mut self, key: i64, value: LuaValue) {
        // integer keys are never nil or NaN
        let _ = self.set(LuaValue::Number(key as f64), value);
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        let _ = self.set(LuaValue::String(LuaString::from(key)), value);
    }

    fn hash_set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(&i) = self.index.get(&key) {
            let slot = &mut self.node[i].1;
            match (slot.is_nil(), value.is_nil()) {
                (true, false) => self.dead -= 1,
                (false, true) => self.dead += 1,
                _ => {}
            }
            *slot = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        if self.dead > 0 && self.dead * 2 >= self.node.len() {
            self.compact();
        }
        self.index.insert(key.clone(), self.node.len());
        self.node.push((key, value));
    }

    /// Move keys n+1, n+2, ... from the hash part into the array part
    fn migrate_from_hash(&mut self) {
        loop {
            let next = LuaValue::Number((self.array.len() + 1) as f64);
            match self.index.get(&next) {
                Some(&i) if !self.node[i].1.is_nil() => {
                    let v = std::mem::take(&mut self.node[i].1);
                    self.dead += 1;
                    self.array.push(v);
                }
                _ => break,
            }
        }
    }

    fn compact(&mut self) {
        self.node.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (i, (k, _)) in self.node.iter().enumerate() {
            self.index.insert(k.clone(), i);
        }
        self.dead = 0;
    }

    /// A border: `t[n] ~= nil and t[n+1] == nil` (0 if `t[1]` is nil)
    pub fn len(&self) -> usize {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // binary search for a border inside the array part
            let (mut i, mut j) = (0usize, n);
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.node.len() == self.dead {
            return n;
        }
        self.unbound_search(n)
    }

    fn unbound_search(&self, start: usize) -> usize {
        let mut i = start;
        let mut j = start + 1;
        while !self.get_int(j as i64).is_nil() {
            i = j;
            if j > (i32::MAX as usize) / 2 {
                // pathological table: linear search
                let mut k = 1;
                while !self.get_int(k as i64).is_nil() {
                    k += 1;
                }
                return k - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Traversal step: the entry after `key` (`nil` starts the traversal).
    /// `Err` if `key` is not present in the table.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let asize = self.array.len();
        let mut i = match key {
            LuaValue::Nil => 0,
            k => match Self::array_index(k, asize) {
                Some(ai) => ai + 1,
                None => match self.index.get(k) {
                    Some(&h) => asize + h + 1,
                    None => return Err(()),
                },
            },
        };
        while i < asize {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), self.array[i].clone())));
            }
            i += 1;
        }
        for (k, v) in &self.node[i - asize..] {
            if !v.is_nil() {
                return Ok(Some((k.clone(), v.clone())));
            }
        }
        Ok(None)
    }

    /// All live entries, array part first
    pub fn iter(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (LuaValue::Number((i + 1) as f64), v.clone()));
        let hash = self
            .node
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.clone(), v.clone()));
        array.chain(hash)
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    #[inline(always)]
    pub(crate) fn tm_known_absent(&self, tag: u8) -> bool {
        self.flags.get() & (1 << tag) != 0
    }

    #[inline(always)]
    pub(crate) fn mark_tm_absent(&self, tag: u8) {
        self.flags.set(self.flags.get() | (1 << tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> LuaValue {
        LuaValue::number(n)
    }

    #[test]
    fn test_array_growth_and_migration() {
        let mut t = LuaTable::new(0, 0);
        t.set(num(2.0), num(20.0)).unwrap();
        t.set(num(3.0), num(30.0)).unwrap();
        assert_eq!(t.array_len(), 0);
        t.set(num(1.0), num(10.0)).unwrap();
        // 2 and 3 moved over from the hash part
        assert_eq!(t.array_len(), 3);
        assert_eq!(t.get_int(3), num(30.0));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_border() {
        let mut t = LuaTable::new(0, 0);
        assert_eq!(t.len(), 0);
        for i in 1..=10 {
            t.set_int(i, num(i as f64));
        }
        assert_eq!(t.len(), 10);
        t.set_int(10, LuaValue::nil());
        assert_eq!(t.len(), 9);
        t.set_int(5, LuaValue::nil());
        let n = t.len();
        assert!(n == 4 || n == 9);
        assert!(!t.get_int(n as i64).is_nil() && t.get_int(n as i64 + 1).is_nil());
    }

    #[test]
    fn test_invalid_keys() {
        let mut t = LuaTable::new(0, 0);
        assert_eq!(t.set(LuaValue::nil(), num(1.0)), Err(InvalidKey::Nil));
        assert_eq!(t.set(num(f64::NAN), num(1.0)), Err(InvalidKey::NaN));
        assert!(t.get(&num(f64::NAN)).is_nil());
    }

    #[test]
    fn test_traversal_with_removal() {
        let mut t = LuaTable::new(0, 0);
        t.set_int(1, num(1.0));
        t.set_str("a", num(2.0));
        t.set_str("b", num(3.0));
        t.set_str("c", num(4.0));
        let mut seen = 0;
        let mut key = LuaValue::nil();
        while let Some((k, _)) = t.next(&key).unwrap() {
            // clearing the current field keeps the traversal valid
            t.set(k.clone(), LuaValue::nil()).unwrap();
            key = k;
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(t.next(&LuaValue::nil()).unwrap().is_none());
        assert!(t.next(&LuaValue::from("zzz")).is_err());
    }

    #[test]
    fn test_flags_reset_on_write() {
        let mut t = LuaTable::new(0, 0);
        t.mark_tm_absent(0);
        assert!(t.tm_known_absent(0));
        t.set_str("__index", num(1.0));
        assert!(!t.tm_known_absent(0));
    }
}
