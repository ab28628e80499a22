//! A bounded pool of worker threads executing CPU-bound fibers in priority
//! order.

use parking_lot::{Condvar, Mutex};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::Arc,
    thread::JoinHandle,
};
use tracing::trace;

/// Work priority. Lower values run earlier; ties run in submission order.
pub type Priority = u64;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    priority: Priority,
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, seq)
        // pops first.
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

#[derive(Default)]
struct PoolQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

/// A fixed set of worker threads draining a priority heap. The pool shares
/// no mutable state with the submitting thread except the queue itself.
pub struct PriorityPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for PriorityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityPool").field("workers", &self.workers.len()).finish()
    }
}

impl PriorityPool {
    /// Spawns `workers` threads named `monad-worker-N`.
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue::default()),
            available: Condvar::new(),
        });

        let handles = (0..workers.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("monad-worker-{i}"))
                    .spawn(move || Self::worker_loop(&shared))
                    .expect("spawn worker thread")
            })
            .collect();

        Self { shared, workers: handles }
    }

    fn worker_loop(shared: &PoolShared) {
        loop {
            let task = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(queued) = queue.heap.pop() {
                        break queued;
                    }
                    if queue.shutdown {
                        return;
                    }
                    shared.available.wait(&mut queue);
                }
            };
            trace!(target: "fiber_pool", priority = task.priority, seq = task.seq, "run task");
            (task.task)();
        }
    }

    /// Submits a task at `priority`. Lower priorities run earlier.
    pub fn submit(&self, priority: Priority, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.shared.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(QueuedTask { priority, seq, task: Box::new(task) });
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A one-shot value cell fulfilled by a worker and awaited by consumers.
/// Transaction `i + 1`'s receipt assembly waits on `promise[i]` to preserve
/// index order regardless of execution order.
pub struct Promise<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    /// Creates an unfulfilled promise.
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(None), Condvar::new())) }
    }

    /// Fulfils the promise, waking all waiters. Must be called exactly once.
    pub fn set(&self, value: T) {
        let (slot, condvar) = &*self.inner;
        let mut guard = slot.lock();
        assert!(guard.is_none(), "promise fulfilled twice");
        *guard = Some(value);
        condvar.notify_all();
    }

    /// Returns the value if already fulfilled.
    pub fn try_get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.0.lock().clone()
    }

    /// Blocks until the promise is fulfilled and returns a copy.
    pub fn wait(&self) -> T
    where
        T: Clone,
    {
        let (slot, condvar) = &*self.inner;
        let mut guard = slot.lock();
        loop {
            if let Some(value) = guard.as_ref() {
                return value.clone();
            }
            condvar.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    #[test]
    fn test_priority_order_single_worker() {
        let pool = PriorityPool::new(1);
        let gate = Promise::<()>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Block the worker so the remaining tasks queue up and sort.
        {
            let gate = gate.clone();
            pool.submit(0, move || gate.wait());
        }
        for priority in [30u64, 10, 20] {
            let order = Arc::clone(&order);
            pool.submit(priority, move || order.lock().push(priority));
        }
        gate.set(());

        let done = Promise::<()>::new();
        {
            let done = done.clone();
            pool.submit(u64::MAX, move || done.set(()));
        }
        done.wait();
        assert_eq!(*order.lock(), vec![10, 20, 30]);
    }

    #[test]
    fn test_all_tasks_run() {
        let pool = PriorityPool::new(4);
        let counter = Arc::new(AtomicU64::new(0));
        let done = Promise::<()>::new();
        let total = 100u64;

        for i in 0..total {
            let counter = Arc::clone(&counter);
            let done = done.clone();
            pool.submit(i, move || {
                if counter.fetch_add(1, AtomicOrdering::SeqCst) + 1 == total {
                    done.set(());
                }
            });
        }
        done.wait();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), total);
    }

    #[test]
    fn test_promise_try_get() {
        let promise = Promise::new();
        assert_eq!(promise.try_get(), None);
        promise.set(5u32);
        assert_eq!(promise.try_get(), Some(5));
        assert_eq!(promise.wait(), 5);
    }
}
