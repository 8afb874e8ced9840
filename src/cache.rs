//! In-memory table of pre-assembled responses.
//!
//! Entries are complete wire responses (status line, headers, body) keyed by
//! canonical path plus negotiated encoding, so a hit is served verbatim with
//! no per-request assembly. The table has a fixed slot count; collisions
//! displace the occupant of a round-robin write cursor rather than chaining,
//! and TTL expiry plus the two memory caps bound staleness and footprint.
//! There is no LRU: for static assets, displacement plus TTL is enough.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::compress::Encoding;

/// Largest single response the cache will hold.
pub const PER_ENTRY_CAP: usize = 5 * 1024 * 1024;

/// Ceiling on the summed size of all cached responses.
pub const GLOBAL_CAP: usize = 100 * 1024 * 1024;

/// Minimum spacing between lazy expiry sweeps triggered from `lookup`.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// One cached response. `bytes` is the full wire image.
#[derive(Debug)]
pub struct CacheEntry {
    pub path: String,
    pub encoding: Encoding,
    pub etag: String,
    pub bytes: Arc<[u8]>,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Why an insert was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The response exceeds the per-entry size cap.
    EntryTooLarge,
    /// The global cap would be exceeded even after purging expired entries.
    CacheFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Skipped(SkipReason),
}

/// Counters exposed by [`ResponseCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
}

struct Inner {
    slots: Vec<Option<Arc<CacheEntry>>>,
    cursor: usize,
    bytes_in_use: usize,
    last_purge: Instant,
    hits: u64,
    misses: u64,
    evictions: u64,
    peak_bytes: usize,
}

/// Shared response cache. All operations serialize behind one mutex; each
/// holds it for O(1) work except the bounded linear sweep on lookup miss.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(slots: usize, ttl: Duration, now: Instant) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![None; slots],
                cursor: 0,
                bytes_in_use: 0,
                last_purge: now,
                hits: 0,
                misses: 0,
                evictions: 0,
                peak_bytes: 0,
            }),
            ttl,
        }
    }

    fn slot_for(&self, path: &str, encoding: Encoding, slots: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        encoding.tag().hash(&mut hasher);
        (hasher.finish() as usize) % slots
    }

    fn entry_matches(entry: &CacheEntry, path: &str, encoding: Encoding) -> bool {
        entry.path == path && entry.encoding == encoding
    }

    fn entry_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) < self.ttl
    }

    /// Finds a fresh entry for `(path, encoding)`.
    ///
    /// Probes the hash slot first, then falls back to a linear sweep for
    /// entries displaced to the write cursor by an earlier collision.
    pub fn lookup(&self, path: &str, encoding: Encoding, now: Instant) -> Option<Arc<CacheEntry>> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if now.duration_since(inner.last_purge) >= PURGE_INTERVAL {
            self.purge_locked(inner, now);
        }

        let slots = inner.slots.len();
        let idx = self.slot_for(path, encoding, slots);

        if let Some(entry) = &inner.slots[idx] {
            if Self::entry_matches(entry, path, encoding) && self.entry_fresh(entry, now) {
                let hit = Arc::clone(entry);
                inner.hits += 1;
                tracing::debug!(path = %path, encoding = encoding.tag(), "cache hit");
                return Some(hit);
            }
        }

        for (i, slot) in inner.slots.iter().enumerate() {
            if i == idx {
                continue;
            }
            if let Some(entry) = slot {
                if Self::entry_matches(entry, path, encoding) && self.entry_fresh(entry, now) {
                    let hit = Arc::clone(entry);
                    inner.hits += 1;
                    tracing::debug!(path = %path, encoding = encoding.tag(), "cache hit (displaced)");
                    return Some(hit);
                }
            }
        }

        inner.misses += 1;
        tracing::debug!(path = %path, encoding = encoding.tag(), "cache miss");
        None
    }

    /// Stores a pre-assembled response.
    ///
    /// The hash slot is used when it is empty or already holds this key; a
    /// colliding occupant sends the write to the round-robin cursor slot
    /// instead, displacing whatever lives there.
    pub fn insert(
        &self,
        path: &str,
        encoding: Encoding,
        etag: &str,
        bytes: Vec<u8>,
        now: Instant,
    ) -> InsertOutcome {
        let len = bytes.len();
        if len > PER_ENTRY_CAP {
            return InsertOutcome::Skipped(SkipReason::EntryTooLarge);
        }

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if inner.bytes_in_use + len > GLOBAL_CAP {
            self.purge_locked(inner, now);
            if inner.bytes_in_use + len > GLOBAL_CAP {
                return InsertOutcome::Skipped(SkipReason::CacheFull);
            }
        }

        let slots = inner.slots.len();
        let idx = self.slot_for(path, encoding, slots);

        let target = match &inner.slots[idx] {
            Some(entry) if !Self::entry_matches(entry, path, encoding) => {
                let cursor = inner.cursor;
                inner.cursor = (inner.cursor + 1) % slots;
                cursor
            }
            _ => idx,
        };

        if let Some(old) = inner.slots[target].take() {
            inner.bytes_in_use -= old.len();
            if !Self::entry_matches(&old, path, encoding) {
                inner.evictions += 1;
            }
        }

        inner.slots[target] = Some(Arc::new(CacheEntry {
            path: path.to_string(),
            encoding,
            etag: etag.to_string(),
            bytes: bytes.into(),
            inserted_at: now,
        }));
        inner.bytes_in_use += len;
        inner.peak_bytes = inner.peak_bytes.max(inner.bytes_in_use);

        tracing::debug!(path = %path, encoding = encoding.tag(), len, "cached response");

        InsertOutcome::Inserted
    }

    /// Removes every entry older than the TTL.
    pub fn purge_expired(&self, now: Instant) {
        let mut guard = self.inner.lock().unwrap();
        self.purge_locked(&mut guard, now);
    }

    fn purge_locked(&self, inner: &mut Inner, now: Instant) {
        let ttl = self.ttl;
        let mut freed = 0usize;
        let mut purged = 0u64;
        for slot in inner.slots.iter_mut() {
            let expired = match slot {
                Some(entry) => now.duration_since(entry.inserted_at) >= ttl,
                None => false,
            };
            if expired {
                if let Some(entry) = slot.take() {
                    freed += entry.len();
                    purged += 1;
                }
            }
        }
        inner.bytes_in_use -= freed;
        inner.evictions += purged;
        inner.last_purge = now;
        if purged > 0 {
            tracing::debug!(purged, freed, "purged expired cache entries");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            bytes_in_use: inner.bytes_in_use,
            peak_bytes: inner.peak_bytes,
        }
    }
}
