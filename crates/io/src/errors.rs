//! Errors for the `monad-io` crate.

/// A [Result] type alias where the error is [IoError].
pub type IoResult<T> = Result<T, IoError>;

/// An error type for async I/O operations.
#[derive(Debug, derive_more::Display, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The ring could not be constructed or configured.
    #[display("io_uring setup failed: {_0}")]
    Setup(String),
    /// The submission queue rejected an entry after draining.
    #[display("submission queue full")]
    SubmissionQueueFull,
    /// The kernel reported an error for an operation.
    #[display("operation failed: errno {_0}")]
    Errno(i32),
    /// An operation transferred fewer bytes than requested.
    #[display("short transfer: {got} of {want} bytes")]
    ShortTransfer {
        /// Bytes actually transferred.
        got: usize,
        /// Bytes requested.
        want: usize,
    },
    /// Retries exhausted; the storage layer treats this as fatal.
    #[display("i/o failed after {_0} retries")]
    RetriesExhausted(u32),
}

impl core::error::Error for IoError {}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        Self::Errno(err.raw_os_error().unwrap_or(-1))
    }
}
