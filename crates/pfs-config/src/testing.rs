//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated metadata socket paths
//! - Temporary blob store roots
//! - A `Config` pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use pfs_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config(64);
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::logging::{init_logging, LogLevel};
use crate::{Config, ReadMode};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Unique metadata socket path for this test
    pub socket_path: PathBuf,
    /// Isolated blob store root
    pub blob_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment.
    ///
    /// Also installs a warn-level subscriber; `RUST_LOG` overrides it.
    pub fn new() -> anyhow::Result<Self> {
        init_logging(LogLevel::Warn);
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let blob_root = root.join("blobs");
        std::fs::create_dir_all(&blob_root)?;

        let socket_path = root.join(format!("pfs-test-{}.sock", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            socket_path,
            blob_root,
            test_id,
        })
    }

    /// Config wired to this environment's paths with the given cache line.
    pub fn config(&self, cache_line_size: u64) -> Config {
        let mut cfg = Config::default();
        cfg.read.cache_line_size = cache_line_size;
        cfg.metadata.socket = self.socket_path.clone();
        cfg.blob.root = self.blob_root.clone();
        cfg.blob.pool_size = 4;
        cfg
    }

    /// Same as [`config`](Self::config) with an explicit read mode.
    pub fn config_with_mode(&self, mode: ReadMode, cache_line_size: u64) -> Config {
        let mut cfg = self.config(cache_line_size);
        cfg.read.mode = mode;
        cfg
    }

    /// Write an object directly into the blob root
    pub fn create_object(&self, object_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.blob_root.join(object_path.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
