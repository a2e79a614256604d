//! Old-name to new-name tables built by the renamers.
//!
//! Keys use internal names: `a/b/C` for classes, `a/b/C.field` for fields and
//! `a/b/C.method(desc)` for methods. Several keys may map to the same new name; that is how an
//! override-equivalence set shares one identity.
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;

/// Key of a field in a [`SymbolMap`].
pub fn field_key(owner: &str, name: &str) -> String {
    format!("{owner}.{name}")
}

/// Key of a method in a [`SymbolMap`].
pub fn method_key(owner: &str, name: &str, desc: &str) -> String {
    format!("{owner}.{name}{desc}")
}

/// A concurrent, append-mostly symbol table.
#[derive(Debug, Default)]
pub struct SymbolMap {
    entries: DashMap<String, String>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name mapped to `key`, allocating one with `allocate` if there is none. The
    /// lookup and the insert happen under one shard lock, so concurrent claims of the same key
    /// agree on the result.
    pub fn claim<F>(&self, key: &str, allocate: F) -> String
    where
        F: FnOnce() -> String,
    {
        self.entries
            .entry(key.to_string())
            .or_insert_with(allocate)
            .clone()
    }

    /// Like [`claim`](Self::claim) for allocators that can fail. A failed allocation leaves
    /// `key` unmapped.
    pub fn try_claim<F, E>(&self, key: &str, allocate: F) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let value = allocate()?;
                entry.insert(value.clone());
                Ok(value)
            }
        }
    }

    /// Maps `key` to `value` unless it is already mapped. Returns the value in effect.
    pub fn insert_if_absent(&self, key: &str, value: &str) -> String {
        self.claim(key, || value.to_string())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A plain copy of the table, for the read-only remap phase.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
