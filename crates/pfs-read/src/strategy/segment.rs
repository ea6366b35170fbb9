//! SegmentCache strategy.
//!
//! The plan is fetched fresh on every attempt. Data is cached per object
//! cache line under `Segment { segment, object_id }`. A line miss is served by
//! one direct GET of the aligned line. When that GET fails, or returns fewer
//! bytes than the plan promised, the plan is taken to be stale and the whole
//! attempt restarts from the plan fetch.

use std::sync::Arc;

use pfs_blob::{get_range, BlobConnection, BlobError, ConnectionPool};
use pfs_cache::{CacheKey, CacheService, CachedValue};
use pfs_config::{log_read_debug, log_read_warn};
use pfs_ipc::MetadataService;
use tracing::instrument;

use crate::io_plan::{IoPlan, IoRange};
use crate::strategy::{cached_line, remember, LineSlice};
use crate::{ReadError, ReadRequest, Result};

enum Attempt {
    Done(u64),
    Stale,
}

/// Read `req` through the object cache-line cache.
///
/// At most `max_attempts` plans are fetched; running out is
/// [`ReadError::StalePlan`].
#[instrument(skip(metadata, pool, cache, dest), level = "debug")]
pub fn read<M, C, K>(
    metadata: &mut M,
    pool: &ConnectionPool<C>,
    cache: &K,
    req: ReadRequest,
    dest: &mut [u8],
    line_size: u64,
    max_attempts: u32,
) -> Result<u64>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        match try_read(metadata, pool, cache, req, dest, line_size)? {
            Attempt::Done(n) => return Ok(n),
            Attempt::Stale => {
                log_read_warn!(
                    "Stale read plan, refetching",
                    inode = req.inode,
                    attempt = attempt
                );
            }
        }
    }
    Err(ReadError::StalePlan { attempts })
}

fn try_read<M, C, K>(
    metadata: &mut M,
    pool: &ConnectionPool<C>,
    cache: &K,
    req: ReadRequest,
    dest: &mut [u8],
    line_size: u64,
) -> Result<Attempt>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let plan = metadata.read_plan(req.inode, req.offset, req.length)?;
    let mut io_plan = IoPlan::build(&plan, dest, req.offset, req.length)?;
    let total = io_plan.total_len;

    for object in io_plan.objects.iter_mut().filter(|o| !o.is_hole()) {
        for range in object.ranges.iter_mut() {
            let fresh = copy_range(
                pool,
                cache,
                &object.object_path,
                object.object_id,
                range,
                line_size,
            )?;
            if !fresh {
                return Ok(Attempt::Stale);
            }
        }
    }
    Ok(Attempt::Done(total))
}

/// Serve one IO range line by line. `Ok(false)` means the plan is stale.
fn copy_range<C, K>(
    pool: &ConnectionPool<C>,
    cache: &K,
    object_path: &str,
    object_id: u64,
    range: &mut IoRange<'_>,
    line_size: u64,
) -> Result<bool>
where
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let mut pos = range.range.start;
    while pos < range.range.end {
        let slice = LineSlice::at(pos, range.range.end, line_size);
        let key = CacheKey::Segment {
            segment: slice.segment,
            object_id,
        };

        let line = match cached_line(cache, &key, slice.needed())? {
            Some(line) => line,
            None => {
                let data = match get_range(pool, object_path, slice.line_start, line_size) {
                    Ok(data) => data,
                    // Pool exhaustion says nothing about the plan.
                    Err(e @ (BlobError::EmptyPool | BlobError::PoolTimeout(_))) => {
                        return Err(e.into())
                    }
                    Err(e) => {
                        log_read_debug!(
                            "Direct GET failed",
                            object = object_path,
                            segment = slice.segment,
                            error = tracing::field::display(&e)
                        );
                        return Ok(false);
                    }
                };
                if data.len() < slice.needed() {
                    log_read_debug!(
                        "Object shorter than plan",
                        object = object_path,
                        segment = slice.segment,
                        got = data.len()
                    );
                    return Ok(false);
                }

                let line: Arc<[u8]> = Arc::from(data);
                remember(cache, key, CachedValue::Line(Arc::clone(&line)));
                line
            }
        };

        let at = (pos - range.range.start) as usize;
        slice.copy_from(&line, &mut range.dest[at..]);
        pos += slice.len as u64;
    }

    range.filled = range.dest.len();
    Ok(true)
}
