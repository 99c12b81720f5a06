//! Buffer pool for request and response bodies.
//!
//! Every outgoing packet body and every incoming frame lives in a
//! [`PooledBuffer`]. Buffers are recycled through a per-connection
//! [`BufferPool`] so that steady-state traffic does not allocate.
//!
//! # Design
//!
//! - The pool is a mutex-guarded free list of `BytesMut` regions
//! - A buffer is returned exactly once: [`PooledBuffer::release`] is
//!   idempotent and `Drop` releases anything not released explicitly
//! - After release the region is moved back into the pool, so the handle can
//!   no longer reach it
//! - [`BufferPool::disabled`] allocates and discards, which must behave
//!   identically apart from allocation counts
//!
//! # Usage
//!
//! ```
//! use iproto_client::BufferPool;
//!
//! let pool = BufferPool::new(16);
//! let mut buf = pool.get(64);
//! buf.bytes_mut().extend_from_slice(b"body");
//! buf.release();
//! buf.release(); // no-op
//! assert_eq!(pool.idle_count(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

/// Default number of idle buffers kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Buffers that grew beyond this capacity are discarded instead of pooled.
pub const DEFAULT_MAX_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Smallest region handed out, so tiny requests still get reusable buffers.
pub const MIN_BUFFER_CAPACITY: usize = 256;

struct PoolInner {
    idle: Mutex<Vec<BytesMut>>,
    max_idle: usize,
    max_buffer_capacity: usize,
}

impl PoolInner {
    fn take(&self) -> Option<BytesMut> {
        self.idle.lock().pop()
    }

    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_buffer_capacity {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// Pool of reusable byte regions.
///
/// Cheaply cloneable; clones share the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Option<Arc<PoolInner>>,
}

impl BufferPool {
    /// Create a pool keeping at most `max_idle` idle buffers.
    pub fn new(max_idle: usize) -> Self {
        Self::with_limits(max_idle, DEFAULT_MAX_BUFFER_CAPACITY)
    }

    /// Create a pool with an explicit per-buffer capacity ceiling.
    pub fn with_limits(max_idle: usize, max_buffer_capacity: usize) -> Self {
        Self {
            inner: Some(Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                max_buffer_capacity,
            })),
        }
    }

    /// Create a pool that never recycles (allocate on get, discard on release).
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Check whether this pool recycles buffers.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of idle buffers currently held.
    pub fn idle_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.idle.lock().len())
    }

    /// Get an empty buffer with at least `size` bytes of writable capacity.
    ///
    /// The buffer may be recycled; its spare capacity is not zeroed.
    pub fn get(&self, size: usize) -> PooledBuffer {
        let buf = match self.inner.as_ref().and_then(|inner| inner.take()) {
            Some(mut buf) => {
                buf.reserve(size);
                buf
            }
            None => BytesMut::with_capacity(size.max(MIN_BUFFER_CAPACITY)),
        };

        PooledBuffer {
            buf,
            id: None,
            pool: self.inner.clone(),
            released: false,
        }
    }

    /// Get a buffer that also carries a correlation id.
    ///
    /// Used when the body is built first and the header, which needs the id,
    /// is produced afterwards.
    pub fn get_with_id(&self, size: usize, id: u32) -> PooledBuffer {
        let mut buf = self.get(size);
        buf.id = Some(id);
        buf
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("enabled", &self.is_enabled())
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// A writable byte region borrowed from a [`BufferPool`].
pub struct PooledBuffer {
    buf: BytesMut,
    id: Option<u32>,
    pool: Option<Arc<PoolInner>>,
    released: bool,
}

impl PooledBuffer {
    /// Correlation id stashed by [`BufferPool::get_with_id`].
    #[inline]
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Contents of the buffer (empty once released).
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the underlying region.
    ///
    /// After release this is a detached empty buffer that is never pooled.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of bytes written.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Total capacity of the region.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Check whether the buffer has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Return the region to its pool. Calling this again is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let buf = std::mem::take(&mut self.buf);
        if let Some(pool) = self.pool.take() {
            pool.put(buf);
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_has_capacity() {
        let pool = BufferPool::new(4);
        let buf = pool.get(4096);
        assert!(buf.capacity() >= 4096);
        assert!(buf.is_empty());
        assert_eq!(buf.id(), None);
    }

    #[test]
    fn test_get_with_id() {
        let pool = BufferPool::new(4);
        let buf = pool.get_with_id(16, 42);
        assert_eq!(buf.id(), Some(42));
    }

    #[test]
    fn test_release_returns_to_pool() {
        let pool = BufferPool::new(4);
        let mut buf = pool.get(16);
        buf.bytes_mut().extend_from_slice(b"hello");

        buf.release();
        assert!(buf.is_released());
        assert!(buf.bytes().is_empty());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_double_release_is_noop() {
        let pool = BufferPool::new(4);
        let mut buf = pool.get(16);

        buf.release();
        buf.release();
        drop(buf);

        // Only one region went back to the pool
        assert_eq!(pool.idle_count(), 1);

        // And it is handed out exactly once
        let a = pool.get(16);
        assert_eq!(pool.idle_count(), 0);
        let b = pool.get(16);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let pool = BufferPool::new(4);
        {
            let _buf = pool.get(16);
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_writes_after_release_do_not_reach_pool() {
        let pool = BufferPool::new(4);
        let mut buf = pool.get(16);
        buf.release();

        buf.bytes_mut().extend_from_slice(b"late");
        drop(buf);

        let recycled = pool.get(16);
        assert!(recycled.is_empty());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_recycled_buffer_is_cleared() {
        let pool = BufferPool::new(4);
        let mut buf = pool.get(16);
        buf.bytes_mut().extend_from_slice(b"stale data");
        drop(buf);

        let buf = pool.get(8);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 8);
    }

    #[test]
    fn test_max_idle_respected() {
        let pool = BufferPool::new(2);
        let bufs: Vec<_> = (0..5).map(|_| pool.get(16)).collect();
        drop(bufs);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_oversized_buffer_discarded() {
        let pool = BufferPool::with_limits(4, 1024);
        let buf = pool.get(4096);
        drop(buf);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_disabled_pool() {
        let pool = BufferPool::disabled();
        assert!(!pool.is_enabled());

        let mut buf = pool.get(32);
        buf.bytes_mut().extend_from_slice(b"x");
        buf.release();
        buf.release();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_clone_shares_free_list() {
        let pool = BufferPool::new(4);
        let other = pool.clone();
        drop(other.get(16));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_concurrent_get_release() {
        let pool = BufferPool::new(64);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buf = pool.get(64);
                        buf.bytes_mut().extend_from_slice(&[1, 2, 3]);
                        buf.release();
                        buf.release();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(pool.idle_count() <= 8);
    }
}
