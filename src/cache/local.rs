//! Bounded local cache tier: LRU over both a byte budget and an entry-count
//! budget, with lazy TTL expiry on read and an opportunistic expiry sweep
//! before LRU eviction kicks in.

use crate::types::AnalysisResult;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::trace;

struct StoredEntry {
    value: AnalysisResult,
    expires_at: Instant,
    size_bytes: usize,
    access_seq: u64,
}

pub(crate) struct LocalCache {
    max_bytes: usize,
    max_entries: usize,
    entries: HashMap<String, StoredEntry>,
    /// access sequence -> key; lowest sequence is least recently used
    access_order: BTreeMap<u64, String>,
    next_seq: u64,
    current_bytes: usize,
    evictions: u64,
}

impl LocalCache {
    pub(crate) fn new(max_bytes: usize, max_entries: usize) -> Self {
        Self {
            max_bytes,
            max_entries,
            entries: HashMap::new(),
            access_order: BTreeMap::new(),
            next_seq: 0,
            current_bytes: 0,
            evictions: 0,
        }
    }

    /// Lookup with recency bump. Expired entries are evicted and reported as
    /// a miss.
    pub(crate) fn get(&mut self, key: &str) -> Option<AnalysisResult> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => return None,
        };

        if expired {
            self.remove(key);
            self.evictions += 1;
            trace!(key = %key, "expired cache entry evicted on read");
            return None;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let entry = self.entries.get_mut(key)?;
        let old_seq = entry.access_seq;
        entry.access_seq = seq;
        let value = entry.value.clone();
        self.access_order.remove(&old_seq);
        self.access_order.insert(seq, key.to_string());
        Some(value)
    }

    pub(crate) fn insert(&mut self, key: String, value: AnalysisResult, ttl: Duration) {
        let size_bytes = approximate_size(&value);
        if size_bytes > self.max_bytes {
            trace!(key = %key, size_bytes, "entry larger than cache capacity, not stored");
            return;
        }

        if self.entries.contains_key(&key) {
            self.remove(&key);
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.current_bytes += size_bytes;
        self.access_order.insert(seq, key.clone());
        self.entries.insert(
            key,
            StoredEntry {
                value,
                expires_at: Instant::now() + ttl,
                size_bytes,
                access_seq: seq,
            },
        );

        self.evict_over_capacity();
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.current_bytes = 0;
    }

    pub(crate) fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    fn over_capacity(&self) -> bool {
        self.current_bytes > self.max_bytes || self.entries.len() > self.max_entries
    }

    fn evict_over_capacity(&mut self) {
        if !self.over_capacity() {
            return;
        }

        // Expired entries go first so live data survives the sweep.
        self.sweep_expired();

        while self.over_capacity() {
            let lru_key = match self.access_order.iter().next() {
                Some((_, key)) => key.clone(),
                None => break,
            };
            self.remove(&lru_key);
            self.evictions += 1;
            trace!(key = %lru_key, "evicted least-recently-used cache entry");
        }
    }

    fn sweep_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.evictions += 1;
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.current_bytes -= entry.size_bytes;
            self.access_order.remove(&entry.access_seq);
        }
    }
}

/// Serialized size stands in for the in-memory footprint, matching what a
/// distributed tier would store.
fn approximate_size(value: &AnalysisResult) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}
