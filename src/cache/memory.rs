//! In-memory cache of decoded images with LRU eviction.

use crate::cache::stats::CacheStats;
use crate::decode::DecodedImage;
use crate::key::ContentKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Entry in the memory cache.
struct Entry {
    image: Arc<DecodedImage>,
    /// Charged size in units; never zero.
    size_units: usize,
    /// Monotonic recency stamp for LRU ordering.
    last_used: u64,
}

/// Bounded in-memory cache keyed by sized [`ContentKey`].
///
/// Size accounting is in units (decoded byte footprint); an entry whose
/// computed footprint is zero is charged one unit so admission stays
/// bounded. Eviction removes the least recently used entry first.
///
/// Safe for concurrent get/put from multiple callers; a lookup racing a
/// put for the same key returns either the old or the new value.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_size_units: usize,
}

struct Inner {
    entries: HashMap<ContentKey, Entry>,
    size_units: usize,
    tick: u64,
    stats: CacheStats,
}

impl MemoryStore {
    /// Create a memory store with the given capacity in size units.
    pub fn new(max_size_units: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                size_units: 0,
                tick: 0,
                stats: CacheStats::new(),
            }),
            max_size_units,
        }
    }

    /// Get a cached image, bumping its recency on hit.
    pub fn get(&self, key: &ContentKey) -> Option<Arc<DecodedImage>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_used = tick;
            let image = Arc::clone(&entry.image);
            inner.stats.record_hit();
            Some(image)
        } else {
            inner.stats.record_miss();
            None
        }
    }

    /// Insert an image, evicting least recently used entries as needed to
    /// stay within capacity.
    pub fn put(&self, key: ContentKey, image: Arc<DecodedImage>) {
        let size_units = image.byte_footprint().max(1);
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(old) = inner.entries.remove(&key) {
            inner.size_units -= old.size_units;
        }

        let evicted = inner.evict_until_fits(size_units, self.max_size_units);
        if evicted > 0 {
            debug!(evicted, "memory cache evicted entries");
        }

        inner.size_units += size_units;
        inner.entries.insert(
            key,
            Entry {
                image,
                size_units,
                last_used: tick,
            },
        );

        // An entry larger than the whole store gets evicted right back out;
        // capacity is a hard ceiling.
        let over = inner.evict_until_fits(0, self.max_size_units);
        if over > 0 {
            debug!(evicted = over, "memory cache rejected oversized entry");
        }

        let size = inner.size_units as u64;
        let count = inner.entries.len() as u64;
        inner.stats.update_size(size, count);
    }

    /// Check whether a key is present without affecting recency.
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.inner.lock().unwrap().entries.contains_key(key)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.size_units = 0;
        inner.stats.update_size(0, 0);
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn size_units(&self) -> usize {
        self.inner.lock().unwrap().size_units
    }

    pub fn max_size_units(&self) -> usize {
        self.max_size_units
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }
}

impl Inner {
    /// Evict least recently used entries until `incoming` units fit under
    /// `max`. Returns the number of evicted entries.
    fn evict_until_fits(&mut self, incoming: usize, max: usize) -> u64 {
        let mut evicted = 0;
        while !self.entries.is_empty() && self.size_units + incoming > max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    if let Some(entry) = self.entries.remove(&key) {
                        self.size_units -= entry.size_units;
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        self.stats.record_evictions(evicted);
        evicted
    }
}
