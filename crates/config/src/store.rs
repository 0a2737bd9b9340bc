//! In-memory plugin option store.
//!
//! The host owns exactly one [`OptionStore`]. It is loaded from the
//! `[options]` table at startup, mutated only from the dispatch thread, and
//! written back when dirty.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct OptionStore {
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl OptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store `value`, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.dirty = true;
        self.values.insert(key.into(), value.into())
    }

    pub fn unset(&mut self, key: &str) -> Option<String> {
        let old = self.values.remove(key);
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.iter().filter(move |(k, _)| k.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when something changed since load or the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}
