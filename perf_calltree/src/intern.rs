//! Interning tables scoped to a single parse.
//!
//! Each table hands out one shared [`Rc`] per distinct key, so equal input
//! text always yields the same reference for the lifetime of the table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Deduplicates free-form strings (offsets, names, files, thread ids).
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: HashSet<Rc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance for `raw`, creating it on first sight.
    pub fn intern(&mut self, raw: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(raw) {
            return existing.clone();
        }
        let value: Rc<str> = Rc::from(raw);
        self.strings.insert(value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Deduplicates objects keyed by exact text.
pub struct KeyedInterner<V> {
    values: HashMap<Box<str>, Rc<V>>,
}

impl<V> KeyedInterner<V> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Return the value stored under `key`, building it with `make` only
    /// when the key has not been seen before.
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> V) -> Rc<V> {
        if let Some(existing) = self.values.get(key) {
            return existing.clone();
        }
        let value = Rc::new(make());
        self.values.insert(key.into(), value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for KeyedInterner<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for KeyedInterner<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedInterner")
            .field("len", &self.values.len())
            .finish()
    }
}
