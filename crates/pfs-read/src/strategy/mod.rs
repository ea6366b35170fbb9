//! Read strategies.
//!
//! - [`no_cache`]: fresh plan every call, bytes straight from the backend
//! - [`segment`]: fresh plan every call, object cache lines in the cache
//! - [`file`]: file size and file cache lines in the cache, whole-file plan
//!   shared between line misses

pub mod file;
pub mod no_cache;
pub mod segment;

use std::sync::Arc;

use pfs_cache::{CacheKey, CacheService, CachedValue};
use pfs_config::log_read_warn;

use crate::{ReadError, Result};

/// Where the no-cache strategy gets its read plan from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// Ask the metadata service for exactly the requested window
    Fresh,
    /// Reuse the whole-file plan cached under the inode, fetching it on miss
    WholeFile { file_size: u64 },
}

/// Position of one read step inside a cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineSlice {
    pub segment: u64,
    pub line_start: u64,
    /// Offset of the first wanted byte inside the line
    pub within: usize,
    /// Wanted bytes, never past the end of the line
    pub len: usize,
}

impl LineSlice {
    /// Slice of the line holding `pos`, limited to `end`.
    pub fn at(pos: u64, end: u64, line_size: u64) -> Self {
        let segment = pos / line_size;
        let line_start = segment * line_size;
        let line_end = line_start.saturating_add(line_size);
        let len = (end - pos).min(line_end - pos);
        Self {
            segment,
            line_start,
            within: (pos - line_start) as usize,
            len: len as usize,
        }
    }

    /// Line bytes needed to serve this slice.
    #[inline]
    pub fn needed(&self) -> usize {
        self.within + self.len
    }

    pub fn copy_from(&self, line: &[u8], dest: &mut [u8]) {
        dest[..self.len].copy_from_slice(&line[self.within..self.needed()]);
    }
}

/// Cached line under `key` if it holds at least `needed` bytes.
///
/// A line too short for the request is reported as a miss.
pub(crate) fn cached_line<K: CacheService + ?Sized>(
    cache: &K,
    key: &CacheKey,
    needed: usize,
) -> Result<Option<Arc<[u8]>>> {
    match cache.get(key)? {
        Some(CachedValue::Line(line)) if line.len() >= needed => Ok(Some(line)),
        Some(CachedValue::Line(_)) | None => Ok(None),
        Some(other) => Err(ReadError::CacheKindMismatch {
            expected: "line",
            found: other.kind(),
        }),
    }
}

/// Pin `value` under `key`. A failed insert only loses the caching; the
/// caller already holds the bytes.
pub(crate) fn remember<K: CacheService + ?Sized>(cache: &K, key: CacheKey, value: CachedValue) {
    if let Err(e) = cache.insert(key, value, None, true) {
        log_read_warn!(
            "Cache insert failed, serving uncached",
            key = tracing::field::debug(&key),
            error = tracing::field::display(&e)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_cache::MemoryCache;

    #[test]
    fn test_line_slice() {
        let s = LineSlice::at(70, 200, 64);
        assert_eq!(s.segment, 1);
        assert_eq!(s.line_start, 64);
        assert_eq!(s.within, 6);
        assert_eq!(s.len, 58);

        let s = LineSlice::at(10, 50, 64);
        assert_eq!((s.segment, s.within, s.len), (0, 10, 40));
        assert_eq!(s.needed(), 50);

        let s = LineSlice::at(u64::MAX - 8, u64::MAX, 64);
        assert_eq!(s.line_start, u64::MAX - 63);
        assert_eq!((s.within, s.len), (55, 8));
    }

    #[test]
    fn test_short_cached_line_is_a_miss() {
        let cache = MemoryCache::new();
        let key = CacheKey::file_line(1, 0);
        cache
            .insert(key, CachedValue::Line(Arc::from(vec![1u8; 10])), None, true)
            .unwrap();

        assert!(cached_line(&cache, &key, 10).unwrap().is_some());
        assert!(cached_line(&cache, &key, 11).unwrap().is_none());
    }

    #[test]
    fn test_wrong_kind_is_an_error() {
        let cache = MemoryCache::new();
        let key = CacheKey::file_line(1, 0);
        cache.insert(key, CachedValue::Size(5), None, true).unwrap();
        assert!(matches!(
            cached_line(&cache, &key, 1),
            Err(ReadError::CacheKindMismatch {
                expected: "line",
                found: "size"
            })
        ));
    }
}
