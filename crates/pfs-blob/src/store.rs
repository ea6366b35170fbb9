//! Directory-backed blob store.
//!
//! An object path such as `/v1/AUTH_acct/container/0000000000000a2f` maps to
//! `<root>/v1/AUTH_acct/container/0000000000000a2f`. Connections serve
//! ranged GETs from a read-only memory map of the object file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pfs_config::log_blob_debug;
use tracing::instrument;

use crate::{BlobConnection, BlobError, ByteRange, ConnectionPool, RangeSink, Result};

/// Counters of GET traffic served by a store
#[derive(Debug, Default)]
struct GetCounters {
    requests: AtomicU64,
    ranges: AtomicU64,
    bytes: AtomicU64,
}

/// Snapshot of GET traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetStats {
    /// GET requests issued (one per object per batch)
    pub requests: u64,
    /// Ranges requested across all GETs
    pub ranges: u64,
    /// Bytes delivered into sinks
    pub bytes: u64,
}

/// Blob store keeping each object as a file under `root`.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
    counters: Arc<GetCounters>,
}

impl DirBlobStore {
    /// Open a store at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            counters: Arc::new(GetCounters::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object. Paths escaping the root are rejected.
    pub fn object_file(&self, object_path: &str) -> Result<PathBuf> {
        let rel = Path::new(object_path.trim_start_matches('/'));
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if object_path.is_empty() || escapes {
            return Err(BlobError::InvalidPath {
                path: object_path.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }

    /// Write an object, replacing any previous content.
    ///
    /// Uses temp file + rename so concurrent readers see old or new bytes,
    /// never a mix.
    #[instrument(skip(self, data), level = "debug")]
    pub fn put(&self, object_path: &str, data: &[u8]) -> Result<()> {
        let path = self.object_file(object_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(
            "{}.{}.{:?}.tmp",
            file_name,
            std::process::id(),
            std::thread::current().id()
        ));

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(BlobError::Io(e));
        }
        Ok(())
    }

    pub fn exists(&self, object_path: &str) -> bool {
        self.object_file(object_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Remove an object.
    pub fn delete(&self, object_path: &str) -> Result<()> {
        let path = self.object_file(object_path)?;
        fs::remove_file(&path).map_err(|e| not_found_or_io(e, object_path))
    }

    /// New connection to this store.
    pub fn connect(&self) -> DirConnection {
        DirConnection {
            store: self.clone(),
            pending: None,
        }
    }

    /// Pool of `size` connections to this store.
    pub fn pool(&self, size: usize) -> ConnectionPool<DirConnection> {
        ConnectionPool::new((0..size).map(|_| self.connect()))
    }

    /// GET traffic served so far by this store and all its connections.
    pub fn stats(&self) -> GetStats {
        GetStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            ranges: self.counters.ranges.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
        }
    }
}

fn not_found_or_io(e: io::Error, object_path: &str) -> BlobError {
    if e.kind() == io::ErrorKind::NotFound {
        BlobError::NotFound {
            path: object_path.to_string(),
        }
    } else {
        BlobError::Io(e)
    }
}

struct PendingGet {
    /// `None` for an empty object (nothing to map)
    map: Option<memmap2::Mmap>,
    ranges: Vec<ByteRange>,
}

/// One connection to a [`DirBlobStore`].
pub struct DirConnection {
    store: DirBlobStore,
    pending: Option<PendingGet>,
}

impl BlobConnection for DirConnection {
    fn send_get(&mut self, object_path: &str, ranges: &[ByteRange]) -> Result<()> {
        let path = self.store.object_file(object_path)?;
        let file = File::open(&path).map_err(|e| not_found_or_io(e, object_path))?;

        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // Safety: objects are replaced by rename, never modified in place.
            Some(unsafe { memmap2::Mmap::map(&file) }?)
        };

        let counters = &self.store.counters;
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters
            .ranges
            .fetch_add(ranges.len() as u64, Ordering::Relaxed);
        log_blob_debug!("GET", object = object_path, ranges = ranges.len());

        self.pending = Some(PendingGet {
            map,
            ranges: ranges.to_vec(),
        });
        Ok(())
    }

    fn recv_get(&mut self, sinks: &mut [RangeSink<'_>]) -> Result<()> {
        let pending = self.pending.take().ok_or(BlobError::NoPendingRequest)?;
        if sinks.len() != pending.ranges.len()
            || sinks.iter().zip(&pending.ranges).any(|(s, r)| s.range != *r)
        {
            return Err(BlobError::RangeMismatch);
        }

        let object: &[u8] = pending.map.as_deref().unwrap_or(&[]);
        let mut delivered = 0u64;
        for sink in sinks.iter_mut() {
            let start = (sink.range.start as usize).min(object.len());
            let end = (sink.range.end as usize).min(object.len());
            let n = (end - start).min(sink.dest.len());
            sink.dest[..n].copy_from_slice(&object[start..start + n]);
            sink.filled = n;
            delivered += n as u64;
        }

        self.store
            .counters
            .bytes
            .fetch_add(delivered, Ordering::Relaxed);
        Ok(())
    }
}
