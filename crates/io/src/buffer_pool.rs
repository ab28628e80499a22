//! Fixed buffer pools sized at ring registration.

use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

/// A pooled, alignment-guaranteed I/O buffer. Buffers travel back to their
/// pool through [BufferPool::release]; dropping one instead shrinks the pool.
#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    index: u16,
}

impl Buffer {
    /// The registered buffer index for fixed-buffer opcodes.
    pub const fn index(&self) -> u16 {
        self.index
    }

    /// The buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The buffer contents, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Raw pointer for SQE construction.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Capacity of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has zero capacity. Pool buffers never do.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    free: Vec<Buffer>,
    waiters: VecDeque<Waker>,
}

/// A pool of identically sized buffers with fiber-aware allocation.
/// `alloc` returns immediately; `alloc_fiber` suspends the calling fiber
/// until a buffer is released, woken in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    /// Creates a pool of `count` buffers of `size` bytes each, indexed from
    /// `first_index` in the ring's registered-buffer table.
    pub fn new(count: usize, size: usize, first_index: u16) -> Self {
        let free = (0..count)
            .map(|i| Buffer {
                data: vec![0u8; size].into_boxed_slice(),
                index: first_index + i as u16,
            })
            .collect();
        Self { inner: Arc::new(Mutex::new(PoolInner { free, waiters: VecDeque::new() })) }
    }

    /// Takes a buffer from the pool, or `None` when the pool is empty.
    pub fn alloc(&self) -> Option<Buffer> {
        self.inner.lock().free.pop()
    }

    /// Takes a buffer from the pool, suspending the calling fiber until one
    /// is released.
    pub fn alloc_fiber(&self) -> AllocFuture {
        AllocFuture { pool: self.clone() }
    }

    /// Returns a buffer to the pool and wakes the longest-waiting fiber.
    pub fn release(&self, buffer: Buffer) {
        let waiter = {
            let mut inner = self.inner.lock();
            inner.free.push(buffer);
            inner.waiters.pop_front()
        };
        if let Some(waiter) = waiter {
            waiter.wake();
        }
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// The iovec table for ring registration, ordered by buffer index. Only
    /// valid at construction time, before any buffer has been allocated.
    pub(crate) fn iovec_table(&self) -> Vec<libc::iovec> {
        let mut inner = self.inner.lock();
        inner.free.sort_by_key(Buffer::index);
        inner
            .free
            .iter_mut()
            .map(|buffer| libc::iovec {
                iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
                iov_len: buffer.len(),
            })
            .collect()
    }
}

/// Future returned by [BufferPool::alloc_fiber].
#[derive(Debug)]
pub struct AllocFuture {
    pool: BufferPool,
}

impl Future for AllocFuture {
    type Output = Buffer;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.pool.inner.lock();
        if let Some(buffer) = inner.free.pop() {
            return Poll::Ready(buffer);
        }
        inner.waiters.push_back(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_release() {
        let pool = BufferPool::new(2, 4096, 0);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert_ne!(a.index(), b.index());

        pool.release(a);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.alloc().unwrap().len(), 4096);
        pool.release(b);
    }
}
