//! Pooled byte buffers for bridge copy loops.
//!
//! Each copy direction checks one buffer out for its lifetime. The
//! buffer goes back to the pool when the guard drops, on every exit
//! path including panics, so a failed session never leaks its buffer.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Shared arena of fixed-capacity byte buffers.
///
/// Cloning is cheap; clones share the same arena. A checked-out buffer
/// belongs to exactly one caller, so buffer contents are never shared
/// between sessions.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Check a buffer out, reusing a returned one when available.
    ///
    /// Contents of a reused buffer are stale; callers only read the
    /// prefix they themselves filled.
    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.inner.buffer_size]);
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// Number of idle buffers held by the arena.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// Exclusive checkout of one pool buffer.
///
/// Dereferences to a byte slice of the pool's buffer size. Dropping the
/// guard returns the buffer; there is no explicit return call.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().push(buf);
            self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn checkout_and_return() {
        let pool = BufferPool::new(64);
        assert_eq!(pool.outstanding(), 0);

        let buf = pool.acquire();
        assert_eq!(buf.len(), 64);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.idle(), 0);

        drop(buf);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn returned_buffers_are_reused() {
        let pool = BufferPool::new(16);
        drop(pool.acquire());
        assert_eq!(pool.idle(), 1);

        let _buf = pool.acquire();
        // Reused the returned buffer instead of allocating a second one
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn writes_are_visible_through_the_guard() {
        let pool = BufferPool::new(8);
        let mut buf = pool.acquire();
        buf[..3].copy_from_slice(b"abc");
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn clones_share_one_arena() {
        let pool = BufferPool::new(32);
        let clone = pool.clone();

        let a = pool.acquire();
        let b = clone.acquire();
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(clone.outstanding(), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn concurrent_checkout_from_threads() {
        let pool = BufferPool::new(128);
        std::thread::scope(|s| {
            for _ in 0..8 {
                let pool = pool.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.acquire();
                        buf[0] = 1;
                    }
                });
            }
        });
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn buffer_returned_even_when_holder_panics() {
        let pool = BufferPool::new(16);
        let result = std::thread::spawn({
            let pool = pool.clone();
            move || {
                let _buf = pool.acquire();
                panic!("boom");
            }
        })
        .join();

        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);
    }
}
