//! `io_uring`-driven asynchronous block I/O for the Monad storage engine.
//!
//! A single-threaded [AsyncIo] owns the ring. Submissions are picked up by a
//! kernel polling thread (SQPOLL); completions are drained on the owning
//! thread by [AsyncIo::poll_nonblocking], which the fiber scheduler calls
//! whenever it runs out of ready fibers. Fibers never block on I/O: a read
//! parks the fiber on a [CompletionToken] and the completion wakes it.

mod errors;
pub use errors::{IoError, IoResult};

mod token;
pub use token::{CompletionToken, TokenFuture, FIBER_COMPLETION_MAGIC};

mod buffer_pool;
pub use buffer_pool::{Buffer, BufferPool};

mod uring;
pub use uring::{AsyncIo, AsyncIoConfig, BLOCK_SIZE};
