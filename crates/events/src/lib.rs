//! The execution event ring: a fixed descriptor array plus a power-of-two
//! payload buffer, written lock-free by the execution thread and readable by
//! out-of-process observers.
//!
//! Publication protocol: the writer clears the descriptor's sequence number,
//! fills the payload and descriptor fields, then stores the sequence number
//! with release ordering. Readers spin on the sequence number with acquire
//! ordering; a number other than the expected one means the reader fell a
//! whole lap behind (the gap size is derivable), and payloads are validated
//! against the writer's window after copying.

mod ring;
pub use ring::{
    EventDescriptor, EventPayload, EventReader, EventRing, EventType, ReadOutcome,
};

mod record;
pub use record::{
    event_socket_path, record_block_exec_result, record_block_exec_start, BlockExecOutput,
    BlockRejectInfo, EventRecorder, DEFAULT_EVENT_SOCKET_PATH, MONAD_EVENT_DEFAULT_SOCKET_PATH,
};
