//! In-memory cache service backed by DashMap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use pfs_config::log_cache_debug;

use crate::{CacheError, CacheKey, CacheService, CachedValue, Result};

struct Entry {
    value: CachedValue,
    expires_at: Option<Instant>,
    pinned: bool,
    charge: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Bytes currently charged
    pub used_bytes: u64,
}

/// Process-local cache with optional byte budget.
///
/// When an insert would exceed the budget, expired entries go first, then
/// unpinned ones. If pinned entries alone exceed it the insert fails with
/// [`CacheError::Full`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Entry>,
    capacity: Option<u64>,
    used: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl MemoryCache {
    /// Unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(capacity: Option<u64>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            used_bytes: self.used.load(Ordering::Relaxed),
        }
    }

    fn take(&self, key: &CacheKey) -> bool {
        self.take_if(key, |_| true)
    }

    /// Remove `key` only if its current entry satisfies `f`, checked under
    /// the shard lock.
    fn take_if(&self, key: &CacheKey, f: impl FnOnce(&Entry) -> bool) -> bool {
        match self.entries.remove_if(key, |_, entry| f(entry)) {
            Some((_, old)) => {
                self.used.fetch_sub(old.charge, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Free room for `needed` bytes within the budget.
    fn make_room(&self, capacity: u64, needed: u64) -> Result<()> {
        let fits = |cache: &Self| cache.used.load(Ordering::Relaxed) + needed <= capacity;
        if fits(self) {
            return Ok(());
        }

        let now = Instant::now();
        let mut victims: Vec<(bool, CacheKey)> = self
            .entries
            .iter()
            .filter(|e| !e.pinned || e.is_expired(now))
            .map(|e| (!e.is_expired(now), *e.key()))
            .collect();
        // Expired first
        victims.sort_by_key(|(live, _)| *live);

        for (_, key) in victims {
            if fits(self) {
                break;
            }
            self.take_if(&key, |e| !e.pinned || e.is_expired(now));
        }

        if fits(self) {
            Ok(())
        } else {
            Err(CacheError::Full {
                needed,
                available: capacity.saturating_sub(self.used.load(Ordering::Relaxed)),
            })
        }
    }
}

impl CacheService for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedValue>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }

        // Expired. A fresh entry inserted since the lookup stays.
        self.take_if(key, |e| e.is_expired(now));
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn insert(
        &self,
        key: CacheKey,
        value: CachedValue,
        ttl: Option<Duration>,
        pin: bool,
    ) -> Result<()> {
        let charge = value.charge();
        self.take(&key);
        if let Some(capacity) = self.capacity {
            self.make_room(capacity, charge)?;
        }

        log_cache_debug!("insert", kind = value.kind(), bytes = charge, pinned = pin);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
                pinned: pin,
                charge,
            },
        );
        self.used.fetch_add(charge, Ordering::Relaxed);
        self.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.take(key))
    }
}
