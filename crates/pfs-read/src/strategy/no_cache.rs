//! NoCache strategy: plan, IO plan, batched fill.

use std::sync::Arc;

use pfs_blob::{BlobConnection, ConnectionPool};
use pfs_cache::{CacheKey, CacheService, CachedValue};
use pfs_config::log_read_debug;
use pfs_ipc::{MetadataService, ReadPlan};
use tracing::instrument;

use crate::fetch;
use crate::io_plan::IoPlan;
use crate::strategy::{remember, PlanSource};
use crate::{ReadError, ReadRequest, Result};

/// Read `req` into `dest` straight from the backend.
///
/// Returns the bytes of the request inside the file. Every byte of that
/// window is either delivered by the backend or lies in a hole, otherwise
/// the call fails with [`ReadError::ShortRead`].
#[instrument(skip(metadata, pool, cache, dest), level = "debug")]
pub fn read<M, C, K>(
    metadata: &mut M,
    pool: &ConnectionPool<C>,
    cache: &K,
    req: ReadRequest,
    dest: &mut [u8],
    source: PlanSource,
) -> Result<u64>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    let plan = match source {
        PlanSource::Fresh => Arc::new(metadata.read_plan(req.inode, req.offset, req.length)?),
        PlanSource::WholeFile { file_size } => {
            whole_file_plan(metadata, cache, req.inode, file_size)?
        }
    };

    let mut io_plan = IoPlan::build(&plan, dest, req.offset, req.length)?;
    let total = io_plan.total_len;
    let delivered = fetch::fill(pool, &mut io_plan)?;
    let holes = io_plan.hole_bytes();

    if delivered + holes != total {
        return Err(ReadError::ShortRead {
            filled: delivered + holes,
            expected: total,
        });
    }
    Ok(total)
}

/// Whole-file plan of `inode`, from the cache or fetched and pinned there.
fn whole_file_plan<M, K>(
    metadata: &mut M,
    cache: &K,
    inode: u64,
    file_size: u64,
) -> Result<Arc<ReadPlan>>
where
    M: MetadataService,
    K: CacheService + ?Sized,
{
    let key = CacheKey::Inode { inode };
    match cache.get(&key)? {
        Some(CachedValue::Plan(plan)) => return Ok(plan),
        Some(other) => {
            return Err(ReadError::CacheKindMismatch {
                expected: "plan",
                found: other.kind(),
            })
        }
        None => {}
    }

    let plan = Arc::new(metadata.read_plan(inode, 0, file_size)?);
    log_read_debug!(
        "Whole-file plan cached",
        inode = inode,
        file_size = plan.file_size,
        ranges = plan.ranges.len()
    );
    remember(cache, key, CachedValue::Plan(Arc::clone(&plan)));
    Ok(plan)
}
