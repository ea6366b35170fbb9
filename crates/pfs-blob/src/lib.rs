//! # pfs-blob
//!
//! Blob store client side of the ProxyFS read path.
//!
//! Backend objects are read with batched ranged GETs. A GET is split into a
//! request phase ([`BlobConnection::send_get`]) and a response phase
//! ([`BlobConnection::recv_get`]) so a caller holding several connections can
//! put every request in flight before reading any response.
//!
//! ## Pieces
//!
//! - [`ConnectionPool`]: bounded, blocking pool of connections
//! - [`DirBlobStore`]: objects stored as files under a root directory
//! - [`get_range`]: one-shot single-range GET through the pool

mod pool;
mod store;

pub use pool::{ConnectionPool, PooledConnection};
pub use store::{DirBlobStore, DirConnection, GetStats};

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

/// Errors that can occur reading from the blob store
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Invalid object path: {path}")]
    InvalidPath { path: String },

    #[error("connection pool has no connections")]
    EmptyPool,

    #[error("no pooled connection became available within {0:?}")]
    PoolTimeout(Duration),

    #[error("response read without a pending request")]
    NoPendingRequest,

    #[error("response ranges do not match the pending request")]
    RangeMismatch,
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Half-open byte range `[start, end)` inside one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// `[start, start + len)`, cut short at `u64::MAX`.
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// HTTP `Range` header form (inclusive end).
    pub fn http_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Destination of one range of a GET response.
#[derive(Debug)]
pub struct RangeSink<'a> {
    pub range: ByteRange,
    /// Exactly `range.len()` bytes
    pub dest: &'a mut [u8],
    /// Bytes actually written into `dest`
    pub filled: usize,
}

impl<'a> RangeSink<'a> {
    pub fn new(range: ByteRange, dest: &'a mut [u8]) -> Self {
        debug_assert_eq!(range.len(), dest.len() as u64);
        Self {
            range,
            dest,
            filled: 0,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.filled == self.dest.len()
    }
}

/// A connection able to serve batched ranged GETs.
pub trait BlobConnection: Send {
    /// Issue one GET for `ranges` of `object_path`.
    fn send_get(&mut self, object_path: &str, ranges: &[ByteRange]) -> Result<()>;

    /// Read the response of the last `send_get` into `sinks`.
    ///
    /// `sinks` must carry the requested ranges in request order. A range
    /// reaching past the end of the object is filled partially.
    fn recv_get(&mut self, sinks: &mut [RangeSink<'_>]) -> Result<()>;
}

/// GET `[offset, offset + length)` of one object through the pool.
///
/// The returned buffer is truncated to the bytes the backend delivered.
#[instrument(skip(pool), level = "debug")]
pub fn get_range<C: BlobConnection>(
    pool: &ConnectionPool<C>,
    object_path: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    let range = ByteRange::new(offset, length);
    let mut data = vec![0u8; range.len() as usize];

    let mut conn = pool.acquire()?;
    conn.send_get(object_path, &[range])?;

    let mut sinks = [RangeSink::new(range, &mut data)];
    conn.recv_get(&mut sinks)?;
    let filled = sinks[0].filled;

    data.truncate(filled);
    Ok(data)
}
