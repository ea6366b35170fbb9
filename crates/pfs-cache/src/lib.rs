//! # pfs-cache
//!
//! Cache service used by the read strategies.
//!
//! Three key families share one cache:
//!
//! | Key                                   | Value          | Used by       |
//! |---------------------------------------|----------------|---------------|
//! | `Inode { inode }`                     | whole-file plan| FileCache     |
//! | `Segment { segment, object_id }`      | cache line     | SegmentCache  |
//! | `FileSegment { inode, segment, .. }`  | size or line   | FileCache     |
//!
//! A miss is `Ok(None)`, never an error.

mod memory;

pub use memory::{CacheStats, MemoryCache};

use std::sync::Arc;
use std::time::Duration;

use pfs_ipc::{RangeMapping, ReadPlan};
use thiserror::Error;

/// Errors reported by a cache service
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache full: {needed} bytes needed, {available} available after eviction")]
    Full { needed: u64, available: u64 },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Fixed-size cache key. Built per call on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Whole-file read plan of an inode
    Inode { inode: u64 },
    /// Cache line of a backend object
    Segment { segment: u64, object_id: u64 },
    /// Cache line of a file, or its size when `is_size` is set
    FileSegment {
        inode: u64,
        segment: u64,
        is_size: bool,
    },
}

impl CacheKey {
    /// Length of [`to_bytes`](Self::to_bytes): tag + three u64 slots.
    pub const ENCODED_LEN: usize = 25;

    pub fn file_size(inode: u64) -> Self {
        CacheKey::FileSegment {
            inode,
            segment: 0,
            is_size: true,
        }
    }

    pub fn file_line(inode: u64, segment: u64) -> Self {
        CacheKey::FileSegment {
            inode,
            segment,
            is_size: false,
        }
    }

    /// Inode this key belongs to, if the family is inode-scoped.
    pub fn inode(&self) -> Option<u64> {
        match *self {
            CacheKey::Inode { inode } | CacheKey::FileSegment { inode, .. } => Some(inode),
            CacheKey::Segment { .. } => None,
        }
    }

    /// Stable byte layout for cache services keyed by raw bytes.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let (tag, slots) = match *self {
            CacheKey::Inode { inode } => (1u8, [inode, 0, 0]),
            CacheKey::Segment { segment, object_id } => (2, [segment, object_id, 0]),
            CacheKey::FileSegment {
                inode,
                segment,
                is_size,
            } => (3, [inode, segment, u64::from(is_size)]),
        };

        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0] = tag;
        for (i, v) in slots.iter().enumerate() {
            buf[1 + i * 8..9 + i * 8].copy_from_slice(&v.to_le_bytes());
        }
        buf
    }
}

/// Value stored under a [`CacheKey`].
#[derive(Debug, Clone)]
pub enum CachedValue {
    Plan(Arc<ReadPlan>),
    Size(u64),
    Line(Arc<[u8]>),
}

impl CachedValue {
    /// Approximate memory charged against a cache budget.
    pub fn charge(&self) -> u64 {
        match self {
            CachedValue::Plan(plan) => {
                let records = plan.ranges.len() * std::mem::size_of::<RangeMapping>();
                let paths: usize = plan.ranges.iter().map(|r| r.object_path.len()).sum();
                (std::mem::size_of::<ReadPlan>() + records + paths) as u64
            }
            CachedValue::Size(_) => 8,
            CachedValue::Line(line) => line.len() as u64,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CachedValue::Plan(_) => "plan",
            CachedValue::Size(_) => "size",
            CachedValue::Line(_) => "line",
        }
    }
}

/// Key/value cache the read strategies store plans, sizes and lines in.
pub trait CacheService: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedValue>>;

    /// Store `value`. `ttl = None` never expires; a pinned entry is never
    /// evicted to make room.
    fn insert(
        &self,
        key: CacheKey,
        value: CachedValue,
        ttl: Option<Duration>,
        pin: bool,
    ) -> Result<()>;

    /// Drop an entry; returns whether one was present.
    fn remove(&self, key: &CacheKey) -> Result<bool>;
}
