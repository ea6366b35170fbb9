//! Blocking connection pool.
//!
//! Idle connections sit in a bounded crossbeam channel; `acquire` receives
//! one (blocking while all are checked out) and the returned guard sends it
//! back when dropped.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::{BlobConnection, BlobError, Result};

pub struct ConnectionPool<C> {
    idle_tx: Sender<C>,
    idle_rx: Receiver<C>,
    size: usize,
    acquire_timeout: Option<Duration>,
}

impl<C: BlobConnection> ConnectionPool<C> {
    /// Pool over a fixed set of connections.
    pub fn new(conns: impl IntoIterator<Item = C>) -> Self {
        let conns: Vec<C> = conns.into_iter().collect();
        let size = conns.len();
        let (idle_tx, idle_rx) = bounded(size.max(1));
        for conn in conns {
            // Capacity equals the number of connections.
            let _ = idle_tx.try_send(conn);
        }
        Self {
            idle_tx,
            idle_rx,
            size,
            acquire_timeout: None,
        }
    }

    /// Bound how long `acquire` waits; `None` waits forever.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Total connections owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently idle.
    pub fn available(&self) -> usize {
        self.idle_rx.len()
    }

    /// Check out a connection, blocking until one is idle.
    pub fn acquire(&self) -> Result<PooledConnection<'_, C>> {
        if self.size == 0 {
            return Err(BlobError::EmptyPool);
        }

        // The pool owns a sender, so the channel never disconnects.
        let conn = match self.acquire_timeout {
            None => self.idle_rx.recv().map_err(|_| BlobError::EmptyPool)?,
            Some(timeout) => self.idle_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => BlobError::PoolTimeout(timeout),
                RecvTimeoutError::Disconnected => BlobError::EmptyPool,
            })?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
        })
    }

    fn release(&self, conn: C) {
        let _ = self.idle_tx.try_send(conn);
    }
}

/// Checked-out connection; returns to the pool on drop.
pub struct PooledConnection<'a, C: BlobConnection> {
    conn: Option<C>,
    pool: &'a ConnectionPool<C>,
}

impl<C: BlobConnection> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl<C: BlobConnection> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl<C: BlobConnection> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteRange, RangeSink};

    struct NullConn(u32);

    impl BlobConnection for NullConn {
        fn send_get(&mut self, _object_path: &str, _ranges: &[ByteRange]) -> Result<()> {
            Ok(())
        }
        fn recv_get(&mut self, _sinks: &mut [RangeSink<'_>]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let pool = ConnectionPool::new([NullConn(1), NullConn(2)]);
        assert_eq!(pool.size(), 2);
        {
            let a = pool.acquire().unwrap();
            let b = pool.acquire().unwrap();
            assert_ne!(a.0, b.0);
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_acquire_timeout_when_exhausted() {
        let pool = ConnectionPool::new([NullConn(1)])
            .with_acquire_timeout(Some(Duration::from_millis(10)));
        let _held = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(BlobError::PoolTimeout(_))));
    }

    #[test]
    fn test_empty_pool_fails_fast() {
        let pool: ConnectionPool<NullConn> = ConnectionPool::new(Vec::new());
        assert!(matches!(pool.acquire(), Err(BlobError::EmptyPool)));
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let pool = std::sync::Arc::new(ConnectionPool::new([NullConn(7)]));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = std::sync::Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().map(|c| c.0).unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap(), 7);
    }
}
