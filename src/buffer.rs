//! Read buffers handed to the native loop, pooled and released on drop.

use std::{
    alloc::{handle_alloc_error, Layout},
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Hands out scratch buffers for read callbacks.
///
/// Every [`ReadBuffer`] goes back to the pool when it is dropped, so a
/// buffer is released exactly once per acquisition on every exit path of
/// the read callback. Up to `capacity` released buffers are kept for reuse;
/// the rest are freed.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    stats: Arc<BufferStats>,
    capacity: usize,
}

#[derive(Default)]
struct BufferStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            stats: Arc::new(BufferStats::default()),
            capacity,
        }
    }

    /// Returns a buffer of exactly `suggested_size` bytes.
    ///
    /// Allocation failure is fatal: the process aborts through
    /// [`handle_alloc_error`]. There is no recovery path.
    pub fn acquire(&self, suggested_size: usize) -> ReadBuffer {
        let mut buf = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();

        buf.clear();
        if buf.try_reserve_exact(suggested_size).is_err() {
            let layout = Layout::array::<u8>(suggested_size).unwrap_or_else(|_| Layout::new::<u8>());
            handle_alloc_error(layout);
        }
        buf.resize(suggested_size, 0);
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);

        ReadBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.pool),
            stats: Arc::clone(&self.stats),
            capacity: self.capacity,
        }
    }

    /// Buffers currently parked in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn acquired(&self) -> usize {
        self.stats.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::Relaxed)
    }

    /// Buffers handed out and not yet released.
    pub fn in_flight(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// A read buffer on loan from a [`BufferPool`].
pub struct ReadBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    stats: Arc<BufferStats>,
    capacity: usize,
}

impl ReadBuffer {
    /// Builds a buffer with no pool behind it. Dropping it just frees it.
    pub fn unpooled(size: usize) -> Self {
        let stats = BufferStats::default();
        stats.acquired.fetch_add(1, Ordering::Relaxed);
        Self {
            buf: Some(vec![0; size]),
            pool: Arc::new(Mutex::new(VecDeque::new())),
            stats: Arc::new(stats),
            capacity: 0,
        }
    }
}

impl std::ops::Deref for ReadBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl std::ops::DerefMut for ReadBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for ReadBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.stats.released.fetch_add(1, Ordering::Relaxed);
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.len() < self.capacity {
                pool.push_back(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuse() {
        let pool = BufferPool::new(1);

        let buf1 = pool.acquire(1024);
        let ptr1 = buf1.as_ptr();
        drop(buf1);

        let buf2 = pool.acquire(512);
        assert_eq!(buf2.as_ptr(), ptr1, "Pool should reuse the same allocation");
        assert_eq!(buf2.len(), 512);
    }

    #[test]
    fn test_buffer_is_suggested_size() {
        let pool = BufferPool::new(2);
        let small = pool.acquire(16);
        drop(small);
        let big = pool.acquire(70_000);
        assert_eq!(big.len(), 70_000);
    }

    #[test]
    fn test_pool_capacity_limit() {
        let pool = BufferPool::new(2);

        let a = pool.acquire(64);
        let b = pool.acquire(64);
        let c = pool.acquire(64);
        assert_eq!(pool.available(), 0);

        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2, "Pool should respect capacity limit");
    }

    #[test]
    fn test_release_counted_once() {
        let pool = BufferPool::new(4);
        for _ in 0..3 {
            let buf = pool.acquire(8);
            assert_eq!(pool.in_flight(), 1);
            drop(buf);
        }
        assert_eq!(pool.acquired(), 3);
        assert_eq!(pool.released(), 3);
        assert_eq!(pool.in_flight(), 0);
    }
}
