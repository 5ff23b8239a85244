//! Per-worker object reuse
//!
//! Searches and map decodes hand out owned buffers. An [`Arena`] keeps the
//! released ones around so a worker that processes many query batches stops
//! allocating once it has warmed up. Arenas are not shared: every thread owns
//! its own.

use std::collections::HashMap;

use crate::search::SearchResult;

/// Default number of idle objects kept per kind
pub const DEFAULT_ARENA_CAPACITY: usize = 4096;

/// Free lists of value buffers and k-mer maps
#[derive(Debug)]
pub struct Arena {
    values: Vec<Vec<u64>>,
    maps: Vec<HashMap<u64, Vec<u64>>>,
    capacity: usize,

    /// Objects handed out and not yet returned
    outstanding: usize,
}
impl Default for Arena {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }
}
impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an arena keeping at most `capacity` idle objects per kind
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::new(),
            maps: Vec::new(),
            capacity,
            outstanding: 0,
        }
    }

    /// Returns an empty value buffer
    pub fn acquire_values(&mut self) -> Vec<u64> {
        self.outstanding += 1;
        self.values.pop().unwrap_or_default()
    }

    /// Takes back a buffer obtained from [`Arena::acquire_values`]
    pub fn release_values(&mut self, mut values: Vec<u64>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.values.len() < self.capacity {
            values.clear();
            self.values.push(values);
        }
    }

    /// Takes back the value buffers of consumed search results
    pub fn release_results<I: IntoIterator<Item = SearchResult>>(&mut self, results: I) {
        for result in results {
            self.release_values(result.values);
        }
    }

    /// Drops every result past `len`, returning their buffers
    pub fn truncate_results(&mut self, results: &mut Vec<SearchResult>, len: usize) {
        if len < results.len() {
            let tail: Vec<SearchResult> = results.drain(len..).collect();
            self.release_results(tail);
        }
    }

    /// Returns an empty k-mer map
    pub fn acquire_map(&mut self) -> HashMap<u64, Vec<u64>> {
        self.outstanding += 1;
        self.maps.pop().unwrap_or_default()
    }

    /// Takes back a map obtained from [`Arena::acquire_map`]
    ///
    /// The map's value lists are recycled into the value free list.
    pub fn release_map(&mut self, mut map: HashMap<u64, Vec<u64>>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        for (_, mut values) in map.drain() {
            if self.values.len() >= self.capacity {
                break;
            }
            values.clear();
            self.values.push(values);
        }
        if self.maps.len() < self.capacity {
            map.clear();
            self.maps.push(map);
        }
    }

    /// Number of objects handed out and not yet released
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of idle objects of either kind
    #[must_use]
    pub fn idle(&self) -> usize {
        self.values.len() + self.maps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(values: Vec<u64>) -> SearchResult {
        SearchResult {
            mask: 0,
            kmer: 1,
            prefix_len: 4,
            reverse: false,
            values,
        }
    }

    #[test]
    fn test_values_are_reused() {
        let mut arena = Arena::new();
        let mut values = arena.acquire_values();
        values.extend([1, 2, 3]);
        let capacity = values.capacity();
        assert_eq!(arena.outstanding(), 1);

        arena.release_values(values);
        assert_eq!(arena.outstanding(), 0);
        assert_eq!(arena.idle(), 1);

        let values = arena.acquire_values();
        assert!(values.is_empty());
        assert_eq!(values.capacity(), capacity);
    }

    #[test]
    fn test_capacity_bound() {
        let mut arena = Arena::with_capacity(2);
        let buffers: Vec<_> = (0..5).map(|_| arena.acquire_values()).collect();
        for buffer in buffers {
            arena.release_values(buffer);
        }
        assert_eq!(arena.idle(), 2);
        assert_eq!(arena.outstanding(), 0);
    }

    #[test]
    fn test_truncate_results() {
        let mut arena = Arena::new();
        let mut results: Vec<SearchResult> = (0..4)
            .map(|i| {
                let mut values = arena.acquire_values();
                values.push(i);
                result(values)
            })
            .collect();
        arena.truncate_results(&mut results, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(arena.outstanding(), 1);
        assert_eq!(arena.idle(), 3);

        arena.truncate_results(&mut results, 5);
        assert_eq!(results.len(), 1);
        arena.release_results(results);
        assert_eq!(arena.outstanding(), 0);
    }

    #[test]
    fn test_map_recycles_values() {
        let mut arena = Arena::new();
        let mut map = arena.acquire_map();
        map.insert(1, vec![1, 2]);
        map.insert(2, vec![3]);
        arena.release_map(map);
        assert_eq!(arena.outstanding(), 0);
        assert_eq!(arena.idle(), 3);
        assert!(arena.acquire_map().is_empty());
    }
}
