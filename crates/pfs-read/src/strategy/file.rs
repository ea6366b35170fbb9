//! FileCache strategy.
//!
//! The file size lives under `FileSegment { inode, 0, is_size: true }`, seeded
//! by a stat call. Data lives per file cache line under
//! `FileSegment { inode, segment, is_size: false }`. A line miss reads the
//! aligned line through the no-cache strategy with the whole-file plan, so
//! every miss of one file shares a single plan fetch.

use std::sync::Arc;

use pfs_blob::{BlobConnection, ConnectionPool};
use pfs_cache::{CacheKey, CacheService, CachedValue};
use pfs_config::log_read_debug;
use pfs_ipc::MetadataService;
use tracing::instrument;

use crate::strategy::{cached_line, no_cache, remember, LineSlice, PlanSource};
use crate::{ReadError, ReadRequest, Result};

/// Read `req` through the file cache-line cache.
#[instrument(skip(metadata, pool, cache, dest), level = "debug")]
pub fn read<M, C, K>(
    metadata: &mut M,
    pool: &ConnectionPool<C>,
    cache: &K,
    req: ReadRequest,
    dest: &mut [u8],
    line_size: u64,
) -> Result<u64>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let file_size = file_size(metadata, cache, req.inode)?;
    if req.offset >= file_size {
        return Ok(0);
    }
    let end = req.offset + req.length.min(file_size - req.offset);

    let mut pos = req.offset;
    while pos < end {
        let slice = LineSlice::at(pos, end, line_size);
        let key = CacheKey::file_line(req.inode, slice.segment);

        let line = match cached_line(cache, &key, slice.needed())? {
            Some(line) => line,
            None => {
                let line = load_line(metadata, pool, cache, req.inode, &slice, line_size, file_size)?;
                remember(cache, key, CachedValue::Line(Arc::clone(&line)));
                line
            }
        };

        let at = (pos - req.offset) as usize;
        slice.copy_from(&line, &mut dest[at..]);
        pos += slice.len as u64;
    }

    Ok(end - req.offset)
}

/// Cached file size, fetched with a stat call on miss.
fn file_size<M, K>(metadata: &mut M, cache: &K, inode: u64) -> Result<u64>
where
    M: MetadataService,
    K: CacheService + ?Sized,
{
    let key = CacheKey::file_size(inode);
    match cache.get(&key)? {
        Some(CachedValue::Size(size)) => return Ok(size),
        Some(other) => {
            return Err(ReadError::CacheKindMismatch {
                expected: "size",
                found: other.kind(),
            })
        }
        None => {}
    }

    let stat = metadata.stat(inode)?;
    log_read_debug!("File size cached", inode = inode, size = stat.size);
    remember(cache, key, CachedValue::Size(stat.size));
    Ok(stat.size)
}

/// Read one aligned line of the file, truncated to the bytes that exist.
fn load_line<M, C, K>(
    metadata: &mut M,
    pool: &ConnectionPool<C>,
    cache: &K,
    inode: u64,
    slice: &LineSlice,
    line_size: u64,
    file_size: u64,
) -> Result<Arc<[u8]>>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let sub = ReadRequest::new(inode, slice.line_start, line_size);
    let mut buf = vec![0u8; line_size as usize];
    let got = no_cache::read(
        metadata,
        pool,
        cache,
        sub,
        &mut buf,
        PlanSource::WholeFile { file_size },
    )?;

    buf.truncate(got as usize);
    if buf.len() < slice.needed() {
        return Err(ReadError::ShortRead {
            filled: got,
            expected: slice.needed() as u64,
        });
    }
    Ok(Arc::from(buf))
}
