//! Test doubles for the metadata service and blob connections.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use std::time::Duration;

use pfs_blob::{BlobConnection, BlobError, ByteRange, RangeSink};
use pfs_cache::{CacheError, CacheKey, CacheService, CachedValue};
use pfs_ipc::{FileStat, IpcError, MetadataService, RangeMapping, ReadPlan};

pub const OBJ: &str = "/v1/AUTH_test/c/0000000000000a2f";

/// `(object_path, object_offset, size)`; an empty path is a hole.
pub type Extent = (&'static str, u64, u64);

/// Metadata service answering from fixed file layouts.
///
/// Plan call `n` is served from layout `n`, the last layout repeats. Plans
/// go through the wire codec so they look exactly like daemon replies.
pub struct StubMetadata {
    file_size: u64,
    layouts: Vec<Vec<Extent>>,
    plan_calls: usize,
    stat_calls: usize,
    last_window: Option<(u64, u64)>,
    plan_error: Option<u64>,
}

impl StubMetadata {
    pub fn single_object(file_size: u64) -> Self {
        Self::layouts(file_size, vec![vec![(OBJ, 0, file_size)]])
    }

    pub fn layouts(file_size: u64, layouts: Vec<Vec<Extent>>) -> Self {
        assert!(!layouts.is_empty());
        Self {
            file_size,
            layouts,
            plan_calls: 0,
            stat_calls: 0,
            last_window: None,
            plan_error: None,
        }
    }

    /// Answer every plan call with a remote error.
    pub fn fail_plans_with(&mut self, code: u64) {
        self.plan_error = Some(code);
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls
    }

    pub fn last_plan_window(&self) -> Option<(u64, u64)> {
        self.last_window
    }
}

impl MetadataService for StubMetadata {
    fn read_plan(&mut self, inode: u64, offset: u64, length: u64) -> pfs_ipc::Result<ReadPlan> {
        let index = self.plan_calls.min(self.layouts.len() - 1);
        self.plan_calls += 1;
        self.last_window = Some((offset, length));
        if let Some(code) = self.plan_error {
            return Err(IpcError::Remote { code });
        }

        let layout = &self.layouts[index];

        let end = offset.saturating_add(length).min(self.file_size);
        let mut ranges = Vec::new();
        let mut logical = 0;
        for &(path, object_offset, size) in layout {
            let start = logical.max(offset);
            let stop = (logical + size).min(end);
            if start < stop {
                ranges.push(RangeMapping {
                    object_path: path.to_string(),
                    object_offset: object_offset + (start - logical),
                    logical_offset: start,
                    size: stop - start,
                });
            }
            logical += size;
        }

        let plan = ReadPlan {
            inode,
            file_size: self.file_size,
            covered_size: ranges.iter().map(|r| r.size).sum(),
            ranges,
        };
        ReadPlan::decode(&plan.encode(), inode, offset)
    }

    fn stat(&mut self, _inode: u64) -> pfs_ipc::Result<FileStat> {
        self.stat_calls += 1;
        Ok(FileStat {
            size: self.file_size,
            mtime: 0,
            mode: 0o100644,
        })
    }
}

/// Connection whose first `n` GETs fail with a reset.
pub struct FailingConnection<C> {
    inner: C,
    failures: Arc<AtomicU32>,
}

impl<C: BlobConnection> FailingConnection<C> {
    pub fn new(inner: C, n: u32) -> (Self, Arc<AtomicU32>) {
        let failures = Arc::new(AtomicU32::new(n));
        (
            Self {
                inner,
                failures: Arc::clone(&failures),
            },
            failures,
        )
    }
}

impl<C: BlobConnection> BlobConnection for FailingConnection<C> {
    fn send_get(&mut self, object_path: &str, ranges: &[ByteRange]) -> pfs_blob::Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(BlobError::Io(io::Error::from(io::ErrorKind::ConnectionReset)));
        }
        self.inner.send_get(object_path, ranges)
    }

    fn recv_get(&mut self, sinks: &mut [RangeSink<'_>]) -> pfs_blob::Result<()> {
        self.inner.recv_get(sinks)
    }
}

/// Cache service whose lookups always fail.
pub struct UnavailableCache;

impl CacheService for UnavailableCache {
    fn get(&self, _key: &CacheKey) -> pfs_cache::Result<Option<CachedValue>> {
        Err(CacheError::Unavailable("backend down".to_string()))
    }

    fn insert(
        &self,
        _key: CacheKey,
        _value: CachedValue,
        _ttl: Option<Duration>,
        _pin: bool,
    ) -> pfs_cache::Result<()> {
        Err(CacheError::Unavailable("backend down".to_string()))
    }

    fn remove(&self, _key: &CacheKey) -> pfs_cache::Result<bool> {
        Ok(false)
    }
}
