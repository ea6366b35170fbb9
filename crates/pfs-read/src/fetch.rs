//! Batched fetch of an IO plan from the blob store.
//!
//! Objects are fetched in waves of at most `pool.size()` objects. Within a
//! wave every connection is acquired first, then every GET is sent, then
//! every response is read, so the requests of one wave are in flight
//! together. Connections go back to the pool when their guards drop, on
//! success and on every error path.

use pfs_blob::{BlobConnection, ByteRange, ConnectionPool, PooledConnection};
use pfs_config::log_blob_debug;
use tracing::instrument;

use crate::io_plan::{IoPlan, IoPlanObject};
use crate::Result;

/// Fill every non-hole range of `plan` from the backend.
///
/// Returns the bytes the backend delivered. Ranges past the end of an
/// object are filled partially; the caller decides whether that is a short
/// read. The first error stops the remaining reads.
#[instrument(skip_all, fields(objects = plan.objects.len()), level = "debug")]
pub fn fill<C: BlobConnection>(pool: &ConnectionPool<C>, plan: &mut IoPlan<'_>) -> Result<u64> {
    let wave = pool.size().max(1);
    let mut backed: Vec<&mut IoPlanObject<'_>> =
        plan.objects.iter_mut().filter(|o| !o.is_hole()).collect();

    let mut filled = 0;
    for batch in backed.chunks_mut(wave) {
        filled += fill_wave(pool, batch)?;
    }
    Ok(filled)
}

fn fill_wave<C: BlobConnection>(
    pool: &ConnectionPool<C>,
    batch: &mut [&mut IoPlanObject<'_>],
) -> Result<u64> {
    let mut conns: Vec<PooledConnection<'_, C>> = Vec::with_capacity(batch.len());
    for _ in 0..batch.len() {
        conns.push(pool.acquire()?);
    }

    for (conn, object) in conns.iter_mut().zip(batch.iter()) {
        let ranges: Vec<ByteRange> = object.ranges.iter().map(|r| r.range).collect();
        conn.send_get(&object.object_path, &ranges)?;
    }

    let mut filled = 0u64;
    for (conn, object) in conns.iter_mut().zip(batch.iter_mut()) {
        conn.recv_get(&mut object.ranges)?;
        let got: u64 = object.ranges.iter().map(|r| r.filled as u64).sum();
        log_blob_debug!(
            "Object filled",
            object = object.object_path.as_str(),
            ranges = object.ranges.len(),
            bytes = got
        );
        filled += got;
    }
    Ok(filled)
}
