//! String-keyed counter map used by the sampling collector to accumulate
//! folded-stack hit counts. Unlike [`super::intmap::IntMap`] the profiler's
//! original C implementation gave this its own open-addressed string table;
//! Rust's `std::collections::HashMap` already is that table, so this is a
//! thin wrapper rather than a reimplementation.

use std::collections::HashMap;

#[derive(Default)]
pub struct StrMap {
    counts: HashMap<String, u64>,
}

impl StrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StrMap {
            counts: HashMap::with_capacity(capacity),
        }
    }

    /// Increments the counter for `key`, creating it at 1 if absent, and
    /// returns the new value.
    pub fn increment(&mut self, key: &str) -> u64 {
        let entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.counts.get(key).copied()
    }

    pub fn iterate(&self, mut visit: impl FnMut(&str, u64)) {
        for (key, value) in &self.counts {
            visit(key, *value);
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_independently_per_key() {
        let mut map = StrMap::new();
        assert_eq!(map.increment("a;b"), 1);
        assert_eq!(map.increment("a;b"), 2);
        assert_eq!(map.increment("a;c"), 1);
        assert_eq!(map.get("a;b"), Some(2));
        assert_eq!(map.get("a;c"), Some(1));
        assert_eq!(map.get("missing"), None);
        assert_eq!(map.len(), 2);
    }
}
