//! Bounded LRU of prepared statements

use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zqlz_core::StatementSignature;

/// Called with every value the cache lets go of.
///
/// Runs after the cache lock is released, exactly once per value.
pub trait EvictionListener<V>: Send + Sync {
    fn on_evict(&self, signature: &StatementSignature, value: V);
}

impl<V, F> EvictionListener<V> for F
where
    F: Fn(&StatementSignature, V) + Send + Sync,
{
    fn on_evict(&self, signature: &StatementSignature, value: V) {
        self(signature, value)
    }
}

/// Outcome of [`StatementCache::insert`]
#[derive(Debug)]
pub enum Admission<V> {
    /// The value now in the cache for this signature
    Cached(V),
    /// Caching is disabled; the caller owns the value and must clean it up
    Uncached(V),
}

impl<V> Admission<V> {
    pub fn into_inner(self) -> V {
        match self {
            Admission::Cached(value) | Admission::Uncached(value) => value,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Admission::Cached(_))
    }
}

/// Hit/miss counters of one cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when there were none
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    uses: u64,
    last_used: Instant,
}

struct CacheState<V> {
    /// Least recently used first
    entries: IndexMap<StatementSignature, CacheEntry<V>>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    peak_size: usize,
}

impl<V> CacheState<V> {
    /// Pop least recently used entries until `len <= capacity`
    fn evict_overflow(&mut self, evicted: &mut Vec<(StatementSignature, V)>) {
        while self.entries.len() > self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((signature, entry)) => {
                    self.evictions += 1;
                    evicted.push((signature, entry.value));
                }
                None => break,
            }
        }
    }
}

/// Capacity-bounded cache keyed by [`StatementSignature`]
///
/// A capacity of zero disables caching: the cache is emptied and every
/// insert hands the value straight back.
pub struct StatementCache<V, L> {
    state: Mutex<CacheState<V>>,
    listener: L,
}

impl<V: Clone, L: EvictionListener<V>> StatementCache<V, L> {
    pub fn new(capacity: usize, listener: L) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: IndexMap::with_capacity(capacity),
                capacity,
                hits: 0,
                misses: 0,
                evictions: 0,
                peak_size: 0,
            }),
            listener,
        }
    }

    /// Look up a statement, marking it most recently used on a hit
    pub fn get(&self, signature: &StatementSignature) -> Option<V> {
        let mut state = self.state.lock();
        let Some(index) = state.entries.get_index_of(signature) else {
            state.misses += 1;
            return None;
        };

        state.hits += 1;
        let last = state.entries.len() - 1;
        state.entries.move_index(index, last);
        let (_, entry) = state.entries.get_index_mut(last)?;
        entry.uses += 1;
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    /// Add a freshly prepared statement.
    ///
    /// If another caller cached the same signature first, the cached value
    /// wins and `value` goes to the listener. Overflow evicts the least
    /// recently used entries.
    pub fn insert(&self, signature: StatementSignature, value: V) -> Admission<V> {
        let mut evicted = Vec::new();
        let admission = {
            let mut state = self.state.lock();
            if state.capacity == 0 {
                return Admission::Uncached(value);
            }

            if let Some(entry) = state.entries.get(&signature) {
                let existing = entry.value.clone();
                evicted.push((signature, value));
                Admission::Cached(existing)
            } else {
                state.entries.insert(
                    signature,
                    CacheEntry {
                        value: value.clone(),
                        uses: 1,
                        last_used: Instant::now(),
                    },
                );
                state.evict_overflow(&mut evicted);
                state.peak_size = state.peak_size.max(state.entries.len());
                Admission::Cached(value)
            }
        };

        self.notify(evicted);
        admission
    }

    /// Change the capacity.
    ///
    /// Zero empties the cache immediately. Any other value only bounds
    /// future inserts.
    pub fn set_capacity(&self, capacity: usize) {
        let evicted = {
            let mut state = self.state.lock();
            state.capacity = capacity;
            if capacity == 0 {
                let count = state.entries.len() as u64;
                state.evictions += count;
                state
                    .entries
                    .drain(..)
                    .map(|(signature, entry)| (signature, entry.value))
                    .collect()
            } else {
                Vec::new()
            }
        };
        self.notify(evicted);
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Remove every entry, handing each to the listener
    pub fn clear(&self) {
        let evicted: Vec<_> = {
            let mut state = self.state.lock();
            state
                .entries
                .drain(..)
                .map(|(signature, entry)| (signature, entry.value))
                .collect()
        };
        self.notify(evicted);
    }

    /// Signatures from least to most recently used
    pub fn signatures(&self) -> Vec<StatementSignature> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// How often a cached statement was requested, including its first use
    pub fn uses(&self, signature: &StatementSignature) -> Option<u64> {
        self.state.lock().entries.get(signature).map(|entry| entry.uses)
    }

    /// When a cached statement was last requested
    pub fn last_used(&self, signature: &StatementSignature) -> Option<Instant> {
        self.state
            .lock()
            .entries
            .get(signature)
            .map(|entry| entry.last_used)
    }

    pub fn contains(&self, signature: &StatementSignature) -> bool {
        self.state.lock().entries.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            peak_size: state.peak_size,
            capacity: state.capacity,
        }
    }

    fn notify(&self, evicted: Vec<(StatementSignature, V)>) {
        for (signature, value) in evicted {
            tracing::trace!(statement = %signature, "statement evicted from cache");
            self.listener.on_evict(&signature, value);
        }
    }
}
