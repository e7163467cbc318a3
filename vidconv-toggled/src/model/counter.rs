use std::collections::HashMap;
use std::hash::Hash;

/// Counts per key where a count of zero means "absent".
/// Decrementing to zero removes the key, so the map only ever holds positive counts.
#[derive(Debug, Clone)]
pub struct Counter<K> {
    counts: HashMap<K, usize>,
}

impl<K> Default for Counter<K> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Counter<K> {
    #[cfg(test)]
    pub fn get(&self, key: &K) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, key: K) -> usize {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrementing an absent key is a no-op
    pub fn decrement(&mut self, key: &K) -> usize {
        let Some(count) = self.counts.get_mut(key) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(key);
        }
        remaining
    }

    pub fn contains(&self, key: &K) -> bool {
        self.counts.contains_key(key)
    }
}
