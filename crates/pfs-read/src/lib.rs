//! # pfs-read
//!
//! Read path of the ProxyFS client.
//!
//! A logical read `(inode, offset, length)` becomes ranged GETs against
//! backend objects:
//!
//! 1. a read plan maps the file window onto objects ([`pfs_ipc`])
//! 2. [`IoPlan::build`] projects the plan onto the caller's buffer
//! 3. [`fetch::fill`] issues one batched GET per object
//!
//! [`ReadPath`] runs one of three strategies on top, selected by
//! [`ReadMode`]:
//!
//! | Mode      | Plan                    | Cached data                   |
//! |-----------|-------------------------|-------------------------------|
//! | `None`    | fresh per call          | nothing                       |
//! | `Segment` | fresh per call          | object cache lines            |
//! | `File`    | whole-file, cached      | file size + file cache lines  |

pub mod fetch;
pub mod io_plan;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use io_plan::{IoPlan, IoPlanObject, IoRange};
pub use strategy::PlanSource;

use std::sync::Arc;

use pfs_blob::{BlobConnection, BlobError, ConnectionPool};
use pfs_cache::{CacheError, CacheKey, CacheService, CachedValue};
use pfs_config::{log_read_debug, ReadConfig, ReadMode};
use pfs_ipc::{IpcError, MetadataService};
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur on the read path
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("metadata service: {0}")]
    Metadata(#[from] IpcError),

    #[error("blob store: {0}")]
    Storage(#[from] BlobError),

    #[error("cache service: {0}")]
    Cache(#[from] CacheError),

    #[error("cache holds a {found} value where a {expected} was expected")]
    CacheKindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("read plan has a gap at logical offset {offset}")]
    PlanGap { offset: u64 },

    #[error("read plan covers {covered} of {wanted} bytes")]
    IncompletePlan { covered: u64, wanted: u64 },

    #[error("short read: {filled} of {expected} bytes")]
    ShortRead { filled: u64, expected: u64 },

    #[error("read plan still stale after {attempts} attempts")]
    StalePlan { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, ReadError>;

/// A logical read of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub inode: u64,
    pub offset: u64,
    pub length: u64,
}

impl ReadRequest {
    pub fn new(inode: u64, offset: u64, length: u64) -> Self {
        Self {
            inode,
            offset,
            length,
        }
    }
}

/// Read client for one mount.
///
/// Owns the metadata connection, so one instance serves one caller at a
/// time. The connection pool and the cache are shared through `Arc` and may
/// back several instances.
pub struct ReadPath<M, C, K: ?Sized> {
    metadata: M,
    pool: Arc<ConnectionPool<C>>,
    cache: Arc<K>,
    config: ReadConfig,
}

impl<M, C, K> ReadPath<M, C, K>
where
    M: MetadataService,
    C: BlobConnection,
    K: CacheService + ?Sized,
{
    pub fn new(metadata: M, pool: Arc<ConnectionPool<C>>, cache: Arc<K>, config: ReadConfig) -> Self {
        Self {
            metadata,
            pool,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut M {
        &mut self.metadata
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<K> {
        &self.cache
    }

    /// Read `req` into `dest`, returning the bytes filled.
    ///
    /// Never reports partial results: either the whole window (clamped to the
    /// file size) is filled or an error is returned. Bytes of holes are left
    /// as they were in `dest` except under `ReadMode::File`, where they read
    /// as zero.
    #[instrument(skip(self, dest), fields(mode = ?self.config.mode), level = "debug")]
    pub fn read(&mut self, req: ReadRequest, dest: &mut [u8]) -> Result<u64> {
        if (dest.len() as u64) < req.length {
            return Err(ReadError::InvalidArgument(
                "destination buffer shorter than requested length",
            ));
        }
        let line_size = self.config.cache_line_size;
        if line_size == 0 && self.config.mode != ReadMode::None {
            return Err(ReadError::InvalidArgument("cache line size is zero"));
        }

        let pool = &*self.pool;
        let cache = &*self.cache;
        let filled = match self.config.mode {
            ReadMode::None => strategy::no_cache::read(
                &mut self.metadata,
                pool,
                cache,
                req,
                dest,
                PlanSource::Fresh,
            )?,
            ReadMode::Segment => strategy::segment::read(
                &mut self.metadata,
                pool,
                cache,
                req,
                dest,
                line_size,
                self.config.max_plan_retries,
            )?,
            ReadMode::File => {
                strategy::file::read(&mut self.metadata, pool, cache, req, dest, line_size)?
            }
        };

        log_read_debug!(
            "Read complete",
            inode = req.inode,
            offset = req.offset,
            bytes = filled
        );
        Ok(filled)
    }

    /// Drop everything cached for `inode`: its whole-file plan, its size and
    /// its file cache lines.
    ///
    /// Object cache lines are keyed by object, not inode, and stay.
    #[instrument(skip(self), level = "debug")]
    pub fn invalidate(&self, inode: u64) -> Result<()> {
        let cache = &*self.cache;
        let plan_key = CacheKey::Inode { inode };
        let size_key = CacheKey::file_size(inode);

        let mut known_size = 0;
        if let Some(CachedValue::Plan(plan)) = cache.get(&plan_key)? {
            known_size = plan.file_size;
        }
        if let Some(CachedValue::Size(size)) = cache.get(&size_key)? {
            known_size = known_size.max(size);
        }

        cache.remove(&plan_key)?;
        cache.remove(&size_key)?;

        let line_size = self.config.cache_line_size;
        let mut lines = 0u64;
        if line_size != 0 {
            for segment in 0..known_size.div_ceil(line_size) {
                if cache.remove(&CacheKey::file_line(inode, segment))? {
                    lines += 1;
                }
            }
        }

        log_read_debug!("Inode invalidated", inode = inode, lines = lines);
        Ok(())
    }
}

#[cfg(unix)]
mod open {
    use super::*;
    use pfs_blob::{DirBlobStore, DirConnection};
    use pfs_cache::MemoryCache;
    use pfs_config::Config;
    use pfs_ipc::MetadataClient;
    use std::os::unix::net::UnixStream;

    /// Read path over the daemon socket, a directory blob store and an
    /// in-memory cache.
    pub type LocalReadPath = ReadPath<MetadataClient<UnixStream>, DirConnection, MemoryCache>;

    impl LocalReadPath {
        /// Wire every collaborator from `config`.
        pub fn open(config: &Config) -> Result<Self> {
            let metadata = MetadataClient::connect_unix(
                config.metadata.socket.clone(),
                config.metadata.mount_id,
                config.metadata.reconnect_attempts,
            )?;
            let store = DirBlobStore::new(&config.blob.root)?;
            let pool = store
                .pool(config.blob.pool_size)
                .with_acquire_timeout(config.blob.acquire_timeout());
            let cache = MemoryCache::with_capacity_bytes(config.cache.capacity_bytes);

            Ok(Self::new(
                metadata,
                Arc::new(pool),
                Arc::new(cache),
                config.read.clone(),
            ))
        }

        /// Open with the process-wide configuration.
        pub fn open_default() -> Result<Self> {
            let config = pfs_config::config().clone();
            Self::open(&config)
        }
    }
}

#[cfg(unix)]
pub use open::LocalReadPath;
