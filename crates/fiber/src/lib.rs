//! Cooperative scheduling for the Monad execution engine.
//!
//! Two tiers: a single-threaded [FiberScheduler] whose fibers suspend on
//! I/O and buffer-pool pressure, and a [PriorityPool] of worker threads for
//! CPU-bound fibers (sender recovery, transaction execution). The tiers
//! share nothing but work queues.

mod scheduler;
pub use scheduler::FiberScheduler;

mod priority;
pub use priority::{Priority, PriorityPool, Promise};
