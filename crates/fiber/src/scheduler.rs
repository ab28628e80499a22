//! The single-threaded cooperative fiber scheduler.

use monad_io::AsyncIo;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Wake, Waker},
};

type Fiber = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Waking a fiber appends it to the shared ready queue; resumption order is
/// exactly the order wake events were observed.
struct FiberWaker {
    id: usize,
    ready: Arc<Mutex<VecDeque<usize>>>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.ready.lock().push_back(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready.lock().push_back(self.id);
    }
}

/// A cooperative, single-threaded fiber scheduler.
///
/// Fibers are future state machines. The ready queue is FIFO: `pick_next`
/// pops the head, a wake appends. There is no preemption and no per-fiber
/// deadline; every suspended fiber has a concrete wake-up (an I/O completion
/// or a buffer release), so the idle hook simply drains the ring.
pub struct FiberScheduler {
    fibers: Vec<Option<Fiber>>,
    ready: Arc<Mutex<VecDeque<usize>>>,
    live: usize,
}

impl std::fmt::Debug for FiberScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberScheduler")
            .field("fibers", &self.fibers.len())
            .field("live", &self.live)
            .finish()
    }
}

impl Default for FiberScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self { fibers: Vec::new(), ready: Arc::new(Mutex::new(VecDeque::new())), live: 0 }
    }

    /// Adds a fiber to the scheduler; it becomes ready immediately.
    pub fn spawn(&mut self, fiber: impl Future<Output = ()> + 'static) {
        let id = self.fibers.len();
        self.fibers.push(Some(Box::pin(fiber)));
        self.live += 1;
        self.ready.lock().push_back(id);
    }

    /// Number of fibers that have not yet completed.
    pub const fn live(&self) -> usize {
        self.live
    }

    /// Pops the next ready fiber, FIFO.
    fn pick_next(&self) -> Option<usize> {
        self.ready.lock().pop_front()
    }

    /// The idle hook: with an I/O runtime attached, drain its completions;
    /// otherwise there is nothing to wait for.
    fn suspend_until(&self, io: Option<&AsyncIo>) -> bool {
        io.map(|io| io.in_flight() > 0 && {
            io.poll_nonblocking();
            true
        })
        .unwrap_or(false)
    }

    /// Cross-thread scheduling does not exist at this tier.
    pub const fn notify(&self) {}

    /// Runs fibers until every one of them has completed. Deterministic
    /// termination: the ready queue drains, and each empty pass must be
    /// explainable by in-flight I/O.
    pub fn run(&mut self, io: Option<&AsyncIo>) {
        while self.live > 0 {
            let Some(id) = self.pick_next() else {
                assert!(
                    self.suspend_until(io),
                    "fiber deadlock: {} fibers suspended with no pending wake-up",
                    self.live
                );
                continue;
            };
            let Some(fiber) = self.fibers[id].as_mut() else {
                // Stale wake for a completed fiber.
                continue;
            };

            let waker = Waker::from(Arc::new(FiberWaker { id, ready: Arc::clone(&self.ready) }));
            let mut cx = Context::from_waker(&waker);
            if let Poll::Ready(()) = fiber.as_mut().poll(&mut cx) {
                self.fibers[id] = None;
                self.live -= 1;
            }
        }
        self.fibers.clear();
    }

    /// Convenience: run a single fiber to completion and return its output.
    pub fn block_on<T: 'static>(
        &mut self,
        io: Option<&AsyncIo>,
        fiber: impl Future<Output = T> + 'static,
    ) -> T {
        let slot = std::rc::Rc::new(std::cell::RefCell::new(None));
        let out = std::rc::Rc::clone(&slot);
        self.spawn(async move {
            *out.borrow_mut() = Some(fiber.await);
        });
        self.run(io);
        let result = slot.borrow_mut().take().expect("fiber ran to completion");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monad_io::BufferPool;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_fifo_resumption_order() {
        let mut scheduler = FiberScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..4 {
            let order = Rc::clone(&order);
            scheduler.spawn(async move {
                order.borrow_mut().push(i);
            });
        }
        scheduler.run(None);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_buffer_pool_wakes_waiter() {
        let mut scheduler = FiberScheduler::new();
        let pool = BufferPool::new(1, 64, 0);
        let got = Rc::new(RefCell::new(0u32));

        let held = pool.alloc().unwrap();
        {
            let pool = pool.clone();
            let got = Rc::clone(&got);
            scheduler.spawn(async move {
                let buffer = pool.alloc_fiber().await;
                *got.borrow_mut() += 1;
                pool.release(buffer);
            });
        }
        {
            let pool = pool.clone();
            scheduler.spawn(async move {
                // Release the held buffer from a second fiber so the first
                // one can make progress.
                pool.release(held);
            });
        }
        scheduler.run(None);
        assert_eq!(*got.borrow(), 1);
    }

    #[test]
    fn test_block_on_returns_value() {
        let mut scheduler = FiberScheduler::new();
        let value = scheduler.block_on(None, async { 7u64 });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_fibers_suspend_on_ring_reads() {
        use monad_io::{AsyncIoConfig, BLOCK_SIZE};
        use std::{os::fd::AsRawFd, sync::Arc};

        let Ok(io) = AsyncIo::new(AsyncIoConfig::default()) else {
            // Kernel without io_uring support; nothing to drive.
            return;
        };
        let io = Arc::new(io);
        let file = tempfile::NamedTempFile::new().unwrap();
        let fd = file.as_file().as_raw_fd();
        for block in 0..4u64 {
            io.write_block_sync(fd, block * BLOCK_SIZE as u64, &[block as u8; BLOCK_SIZE])
                .unwrap();
        }

        let mut scheduler = FiberScheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for block in 0..4u64 {
            let io = Arc::clone(&io);
            let seen = Rc::clone(&seen);
            scheduler.spawn(async move {
                let buffer = io.read_block_fiber(fd, block * BLOCK_SIZE as u64).await.unwrap();
                assert!(buffer.as_slice().iter().all(|byte| *byte == block as u8));
                io.release_read_buffer(buffer);
                seen.borrow_mut().push(block);
            });
        }
        scheduler.run(Some(&io));

        let mut seen = seen.borrow().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
