//! Bounded in-memory entry store

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use log::trace;

use super::CacheEntry;

/// Keyed store of cache entries with a hard size bound.
///
/// Keys are opaque to the store. The bound is enforced right after every
/// insertion by evicting the least-recently-accessed entries; reads never
/// evict.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use scoutdash_lib::cache::{CacheEntry, EntryStore, FreshnessClass};
///
/// let mut store = EntryStore::new(2);
/// let now = Utc::now();
/// store.insert("a", CacheEntry::new(1, FreshnessClass::Live, now));
/// store.insert("b", CacheEntry::new(2, FreshnessClass::Live, now));
/// let evicted = store.insert("c", CacheEntry::new(3, FreshnessClass::Live, now));
/// assert_eq!(evicted, vec!["a".to_string()]);
/// assert_eq!(store.len(), 2);
/// ```
#[derive(Debug)]
pub struct EntryStore<T> {
    entries: HashMap<String, Slot<T>>,
    max_entries: usize,
    next_seq: u64,
}

#[derive(Debug)]
struct Slot<T> {
    entry: CacheEntry<T>,
    /// Write order, breaks ties between equal access times.
    seq: u64,
}

impl<T> EntryStore<T> {
    /// Creates an empty store holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            next_seq: 0,
        }
    }

    /// Returns the configured size bound.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the number of entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the entry for `key` without recording an access.
    pub fn get(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    /// Returns a mutable handle to the entry for `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry<T>> {
        self.entries.get_mut(key).map(|slot| &mut slot.entry)
    }

    /// Inserts or replaces the entry for `key`, then enforces the size bound.
    ///
    /// The key being written is never chosen for eviction by its own insert.
    /// Returns the evicted keys.
    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry<T>) -> Vec<String> {
        let key = key.into();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key.clone(), Slot { entry, seq });
        self.enforce_capacity(Some(&key))
    }

    /// Removes the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.remove(key).map(|slot| slot.entry)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Evicts least-recently-accessed entries until the size bound holds.
    ///
    /// Equal access times evict the older write first. `protect` is skipped.
    /// Returns the evicted keys, oldest first.
    pub fn enforce_capacity(&mut self, protect: Option<&str>) -> Vec<String> {
        if self.entries.len() <= self.max_entries {
            return Vec::new();
        }
        let excess = self.entries.len() - self.max_entries;

        let mut ranked: Vec<(DateTime<Utc>, u64, &String)> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != protect)
            .map(|(key, slot)| (slot.entry.last_accessed_at, slot.seq, key))
            .collect();
        ranked.sort_unstable();

        let victims: Vec<String> = ranked
            .into_iter()
            .take(excess)
            .map(|(_, _, key)| key.clone())
            .collect();

        for key in &victims {
            self.entries.remove(key);
        }
        trace!(
            "evicted {} entries, {} remain: {:?}",
            victims.len(),
            self.entries.len(),
            victims
        );
        victims
    }
}
