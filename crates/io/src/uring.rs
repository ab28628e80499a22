//! The [AsyncIo] runtime: a single-threaded `io_uring` with an SQPOLL
//! kernel thread and fixed registered buffer pools.

use crate::{Buffer, BufferPool, CompletionToken, IoError, IoResult};
use io_uring::{opcode, squeue, types, IoUring};
use parking_lot::Mutex;
use std::{
    os::fd::RawFd,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::warn;

/// The I/O granularity of the storage pool. All reads and writes are whole,
/// aligned blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Retries before an I/O failure is escalated as fatal.
const MAX_IO_RETRIES: u32 = 3;

/// Construction parameters for [AsyncIo].
#[derive(Debug, Clone, Copy)]
pub struct AsyncIoConfig {
    /// Submission queue depth.
    pub entries: u32,
    /// SQPOLL kernel thread idle time before it parks, in milliseconds.
    pub sqpoll_idle_ms: u32,
    /// Number of fixed read buffers.
    pub read_buffers: usize,
    /// Number of fixed write buffers.
    pub write_buffers: usize,
}

impl Default for AsyncIoConfig {
    fn default() -> Self {
        Self { entries: 256, sqpoll_idle_ms: 100, read_buffers: 64, write_buffers: 16 }
    }
}

/// The `io_uring` runtime. One instance serves one storage pool; a single
/// thread drives completions, but the handle is shareable so state reads
/// behind the block-state lock can reach it.
pub struct AsyncIo {
    ring: Mutex<IoUring>,
    read_pool: BufferPool,
    write_pool: BufferPool,
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for AsyncIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIo")
            .field("read_pool", &self.read_pool)
            .field("write_pool", &self.write_pool)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl AsyncIo {
    /// Builds the ring, spawns the SQPOLL thread and registers both buffer
    /// pools.
    pub fn new(config: AsyncIoConfig) -> IoResult<Self> {
        let ring = IoUring::builder()
            .setup_sqpoll(config.sqpoll_idle_ms)
            .build(config.entries)
            .map_err(|e| IoError::Setup(e.to_string()))?;

        let read_pool = BufferPool::new(config.read_buffers, BLOCK_SIZE, 0);
        let write_pool =
            BufferPool::new(config.write_buffers, BLOCK_SIZE, config.read_buffers as u16);

        let iovecs: Vec<libc::iovec> =
            [&read_pool, &write_pool].into_iter().flat_map(BufferPool::iovec_table).collect();
        // Safety: the iovecs point into pool buffers, which live (at stable
        // heap addresses) as long as the pools owned by `self`.
        unsafe {
            ring.submitter()
                .register_buffers(&iovecs)
                .map_err(|e| IoError::Setup(e.to_string()))?;
        }

        Ok(Self {
            ring: Mutex::new(ring),
            read_pool,
            write_pool,
            in_flight: AtomicUsize::new(0),
        })
    }

    /// The read-side buffer pool.
    pub const fn read_pool(&self) -> &BufferPool {
        &self.read_pool
    }

    /// The write-side buffer pool.
    pub const fn write_pool(&self) -> &BufferPool {
        &self.write_pool
    }

    /// Number of submitted operations whose completions have not been
    /// drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Enqueues one SQE, draining the submission queue once if it is full,
    /// and kicks the SQPOLL thread.
    fn push(&self, sqe: squeue::Entry) -> IoResult<()> {
        let mut ring = self.ring.lock();
        // Safety: the entry's buffers and user_data outlive the operation;
        // buffers are pool-owned and tokens are reference counted.
        unsafe {
            if ring.submission().push(&sqe).is_err() {
                ring.submit()?;
                ring.submission().push(&sqe).map_err(|_| IoError::SubmissionQueueFull)?;
            }
        }
        ring.submit()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Submits a fixed-buffer read of one block at `offset`.
    pub fn submit_read(
        &self,
        fd: RawFd,
        offset: u64,
        buffer: &mut Buffer,
        token: &Arc<CompletionToken>,
    ) -> IoResult<()> {
        let sqe = opcode::ReadFixed::new(
            types::Fd(fd),
            buffer.as_mut_ptr(),
            BLOCK_SIZE as u32,
            buffer.index(),
        )
        .offset(offset)
        .build()
        .user_data(CompletionToken::into_user_data(token));
        self.push(sqe)
    }

    /// Submits a fixed-buffer write of one block at `offset`.
    pub fn submit_write(
        &self,
        fd: RawFd,
        offset: u64,
        buffer: &mut Buffer,
        token: &Arc<CompletionToken>,
    ) -> IoResult<()> {
        let sqe = opcode::WriteFixed::new(
            types::Fd(fd),
            buffer.as_mut_ptr(),
            BLOCK_SIZE as u32,
            buffer.index(),
        )
        .offset(offset)
        .build()
        .user_data(CompletionToken::into_user_data(token));
        self.push(sqe)
    }

    /// Drains the completion queue without blocking, signalling every fiber
    /// whose token completed. Returns the number of completions processed.
    pub fn poll_nonblocking(&self) -> usize {
        let mut ring = self.ring.lock();
        let mut completion = ring.completion();
        completion.sync();
        let mut drained = 0;
        for cqe in completion.by_ref() {
            // Safety: user_data values on this ring are only ever produced
            // by CompletionToken::into_user_data.
            if unsafe { CompletionToken::complete(cqe.user_data(), cqe.result()) } {
                drained += 1;
            }
        }
        self.in_flight.fetch_sub(drained, Ordering::AcqRel);
        drained
    }

    /// Blocks until at least one completion is available, then drains.
    fn wait_and_poll(&self) -> IoResult<usize> {
        self.ring.lock().submit_and_wait(1)?;
        Ok(self.poll_nonblocking())
    }

    /// Reads one block at `offset`, driving the ring until the completion
    /// arrives. Used from non-fiber contexts (commit paths); the fiber path
    /// is [Self::read_block_fiber]. Retries transient failures up to the
    /// fatal limit.
    pub fn read_block_sync(&self, fd: RawFd, offset: u64) -> IoResult<Buffer> {
        let mut buffer = match self.read_pool.alloc() {
            Some(buffer) => buffer,
            None => {
                // Drain completions until a reader releases a buffer.
                while self.read_pool.available() == 0 {
                    self.wait_and_poll()?;
                }
                self.read_pool.alloc().expect("buffer was released")
            }
        };

        for attempt in 0..MAX_IO_RETRIES {
            let token = Arc::new(CompletionToken::new());
            self.submit_read(fd, offset, &mut buffer, &token)?;
            while token.result().is_none() {
                self.wait_and_poll()?;
            }
            match token.result().expect("token completed") {
                n if n == BLOCK_SIZE as i32 => return Ok(buffer),
                n => {
                    warn!(target: "async_io", offset, result = n, attempt, "block read failed");
                }
            }
        }
        self.read_pool.release(buffer);
        Err(IoError::RetriesExhausted(MAX_IO_RETRIES))
    }

    /// Writes one block at `offset`, driving the ring until completion.
    /// Write failures are escalated after the fatal retry limit.
    pub fn write_block_sync(&self, fd: RawFd, offset: u64, data: &[u8]) -> IoResult<()> {
        assert!(data.len() <= BLOCK_SIZE, "write exceeds block size");
        let mut buffer = match self.write_pool.alloc() {
            Some(buffer) => buffer,
            None => {
                while self.write_pool.available() == 0 {
                    self.wait_and_poll()?;
                }
                self.write_pool.alloc().expect("buffer was released")
            }
        };
        buffer.as_mut_slice()[..data.len()].copy_from_slice(data);
        buffer.as_mut_slice()[data.len()..].fill(0);

        for attempt in 0..MAX_IO_RETRIES {
            let token = Arc::new(CompletionToken::new());
            self.submit_write(fd, offset, &mut buffer, &token)?;
            while token.result().is_none() {
                self.wait_and_poll()?;
            }
            match token.result().expect("token completed") {
                n if n == BLOCK_SIZE as i32 => {
                    self.write_pool.release(buffer);
                    return Ok(());
                }
                n => {
                    warn!(target: "async_io", offset, result = n, attempt, "block write failed");
                }
            }
        }
        self.write_pool.release(buffer);
        Err(IoError::RetriesExhausted(MAX_IO_RETRIES))
    }

    /// Reads one block at `offset` from fiber context: allocates from the
    /// read pool (suspending when empty), submits, and parks the fiber on
    /// the completion token. The caller releases the returned buffer.
    pub async fn read_block_fiber(&self, fd: RawFd, offset: u64) -> IoResult<Buffer> {
        let mut buffer = self.read_pool.alloc_fiber().await;
        for attempt in 0..MAX_IO_RETRIES {
            let token = Arc::new(CompletionToken::new());
            self.submit_read(fd, offset, &mut buffer, &token)?;
            let result = token.wait().await;
            if result == BLOCK_SIZE as i32 {
                return Ok(buffer);
            }
            warn!(target: "async_io", offset, result, attempt, "block read failed");
        }
        self.read_pool.release(buffer);
        Err(IoError::RetriesExhausted(MAX_IO_RETRIES))
    }

    /// Writes one block at `offset` from fiber context.
    pub async fn write_block_fiber(&self, fd: RawFd, offset: u64, data: &[u8]) -> IoResult<()> {
        assert!(data.len() <= BLOCK_SIZE, "write exceeds block size");
        let mut buffer = self.write_pool.alloc_fiber().await;
        buffer.as_mut_slice()[..data.len()].copy_from_slice(data);
        buffer.as_mut_slice()[data.len()..].fill(0);

        for attempt in 0..MAX_IO_RETRIES {
            let token = Arc::new(CompletionToken::new());
            self.submit_write(fd, offset, &mut buffer, &token)?;
            let result = token.wait().await;
            if result == BLOCK_SIZE as i32 {
                self.write_pool.release(buffer);
                return Ok(());
            }
            warn!(target: "async_io", offset, result, attempt, "block write failed");
        }
        self.write_pool.release(buffer);
        Err(IoError::RetriesExhausted(MAX_IO_RETRIES))
    }

    /// Releases a read buffer back to its pool.
    pub fn release_read_buffer(&self, buffer: Buffer) {
        self.read_pool.release(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, os::fd::AsRawFd};

    #[test]
    fn test_sync_block_roundtrip() {
        let Ok(io) = AsyncIo::new(AsyncIoConfig::default()) else {
            // Kernel without io_uring support; nothing to test here.
            return;
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![0xA5u8; BLOCK_SIZE];
        file.write_all(&vec![0u8; BLOCK_SIZE]).unwrap();
        file.flush().unwrap();

        let fd = file.as_file().as_raw_fd();
        io.write_block_sync(fd, 0, &payload).unwrap();
        let buffer = io.read_block_sync(fd, 0).unwrap();
        assert_eq!(buffer.as_slice(), payload.as_slice());
        io.release_read_buffer(buffer);
        assert_eq!(io.in_flight(), 0);
    }
}
