//! The descriptor/payload ring itself.

use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Payloads at or below this size are stored inline in the descriptor.
const INLINE_PAYLOAD_MAX: usize = 8;

/// Flag bit in `length` marking an inline payload.
const LENGTH_INLINE_FLAG: u32 = 1 << 31;

/// The kind of an execution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventType {
    /// Block execution began.
    BlockStart = 1,
    /// Block executed and committed; payload carries roots and gas.
    BlockEnd = 2,
    /// Block rejected; payload carries a domain id and status code.
    BlockReject = 3,
    /// A transaction receipt was published.
    TxnReceipt = 4,
    /// A call trace frame.
    CallFrame = 5,
}

impl EventType {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::BlockStart),
            2 => Some(Self::BlockEnd),
            3 => Some(Self::BlockReject),
            4 => Some(Self::TxnReceipt),
            5 => Some(Self::CallFrame),
            _ => None,
        }
    }
}

/// One slot of the descriptor array. Fields are only meaningful between a
/// release-store of `seqno` and the slot's next reuse, one lap later.
#[derive(Debug, Default)]
pub struct EventDescriptor {
    seqno: AtomicU64,
    event_type: AtomicU32,
    length: AtomicU32,
    block_flow_id: AtomicU64,
    txn_id: AtomicU64,
    epoch_nanos: AtomicU64,
    /// Byte offset into the payload buffer, or the payload itself when the
    /// inline flag is set in `length`.
    payload_word: AtomicU64,
}

/// A decoded event as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    /// Sequence number, strictly monotonic per ring.
    pub seqno: u64,
    /// Event kind.
    pub event_type: EventType,
    /// Block flow correlating all events of one block execution.
    pub block_flow_id: u64,
    /// Transaction index for per-transaction events.
    pub txn_id: u64,
    /// Writer-side timestamp.
    pub epoch_nanos: u64,
    /// Event payload bytes.
    pub payload: Vec<u8>,
}

/// Outcome of a reader poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// No new event yet.
    Empty,
    /// The next event, in order.
    Event(EventPayload),
    /// The reader fell behind and `missed` events are unrecoverable; it has
    /// been resynchronized to the oldest readable event.
    Gap {
        /// Number of events skipped.
        missed: u64,
    },
    /// The event's payload was overwritten before the copy completed.
    PayloadTorn,
}

/// The shared event ring.
#[derive(Debug)]
pub struct EventRing {
    descriptors: Box<[EventDescriptor]>,
    payload: UnsafeCell<Box<[u8]>>,
    /// Next sequence number to allocate, 1-based.
    next_seqno: AtomicU64,
    /// Total payload bytes ever written; the live window is the trailing
    /// buffer-size bytes.
    payload_head: AtomicU64,
}

// Safety: payload writes are serialized by seqno allocation and readers
// detect torn reads through the window check plus seqno re-validation.
unsafe impl Sync for EventRing {}
unsafe impl Send for EventRing {}

impl EventRing {
    /// Creates a ring with `2^descriptor_shift` descriptors and a
    /// `2^payload_shift`-byte payload buffer.
    pub fn new(descriptor_shift: u8, payload_shift: u8) -> Arc<Self> {
        let descriptor_count = 1usize << descriptor_shift;
        let payload_len = 1usize << payload_shift;
        let descriptors =
            (0..descriptor_count).map(|_| EventDescriptor::default()).collect::<Vec<_>>();
        Arc::new(Self {
            descriptors: descriptors.into_boxed_slice(),
            payload: UnsafeCell::new(vec![0u8; payload_len].into_boxed_slice()),
            next_seqno: AtomicU64::new(0),
            payload_head: AtomicU64::new(0),
        })
    }

    fn payload_len(&self) -> usize {
        // Safety: length never changes after construction.
        unsafe { (&*self.payload.get()).len() }
    }

    /// Emits one event. Called only from the execution thread; readers are
    /// lock-free.
    pub fn emit(
        &self,
        event_type: EventType,
        block_flow_id: u64,
        txn_id: u64,
        payload: &[u8],
    ) -> u64 {
        let seqno = self.next_seqno.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = &self.descriptors[(seqno as usize - 1) & (self.descriptors.len() - 1)];

        // Invalidate the slot for the duration of the rewrite.
        slot.seqno.store(0, Ordering::Release);

        let (length, payload_word) = if payload.len() <= INLINE_PAYLOAD_MAX {
            let mut word = [0u8; 8];
            word[..payload.len()].copy_from_slice(payload);
            (payload.len() as u32 | LENGTH_INLINE_FLAG, u64::from_le_bytes(word))
        } else {
            let offset = self.payload_head.fetch_add(payload.len() as u64, Ordering::AcqRel);
            self.copy_into_payload(offset, payload);
            (payload.len() as u32, offset)
        };

        slot.event_type.store(event_type as u32, Ordering::Relaxed);
        slot.length.store(length, Ordering::Relaxed);
        slot.block_flow_id.store(block_flow_id, Ordering::Relaxed);
        slot.txn_id.store(txn_id, Ordering::Relaxed);
        slot.epoch_nanos.store(epoch_nanos(), Ordering::Relaxed);
        slot.payload_word.store(payload_word, Ordering::Relaxed);
        slot.seqno.store(seqno, Ordering::Release);
        seqno
    }

    /// Wrap-around copy into the payload ring. The original maps the buffer
    /// twice so a straddling memcpy needs no split; here the split is
    /// explicit, with the same reader-visible layout.
    fn copy_into_payload(&self, offset: u64, payload: &[u8]) {
        let len = self.payload_len();
        let start = (offset as usize) & (len - 1);
        // Safety: the writer is single-threaded; concurrent readers handle
        // tearing via the window check.
        let buffer = unsafe { &mut *self.payload.get() };
        let first = payload.len().min(len - start);
        buffer[start..start + first].copy_from_slice(&payload[..first]);
        if first < payload.len() {
            buffer[..payload.len() - first].copy_from_slice(&payload[first..]);
        }
    }

    fn read_payload(&self, offset: u64, length: usize) -> Vec<u8> {
        let len = self.payload_len();
        let start = (offset as usize) & (len - 1);
        // Safety: the copy may race the writer; the caller validates the
        // window afterwards and discards torn data.
        let buffer = unsafe { &*self.payload.get() };
        let mut out = Vec::with_capacity(length);
        let first = length.min(len - start);
        out.extend_from_slice(&buffer[start..start + first]);
        if first < length {
            out.extend_from_slice(&buffer[..length - first]);
        }
        out
    }

    /// The most recently allocated sequence number.
    pub fn last_seqno(&self) -> u64 {
        self.next_seqno.load(Ordering::Acquire)
    }
}

/// A sequential reader over an [EventRing].
#[derive(Debug)]
pub struct EventReader {
    ring: Arc<EventRing>,
    next: u64,
}

impl EventReader {
    /// Creates a reader positioned at the next event to be written.
    pub fn new(ring: Arc<EventRing>) -> Self {
        let next = ring.last_seqno() + 1;
        Self { ring, next }
    }

    /// Polls for the next event.
    pub fn try_next(&mut self) -> ReadOutcome {
        let last = self.ring.last_seqno();
        if self.next > last {
            return ReadOutcome::Empty;
        }

        let descriptor_count = self.ring.descriptors.len() as u64;
        if last >= self.next + descriptor_count {
            // Lapped: resynchronize to the oldest slot that can still be
            // intact and report the hole.
            let oldest = last - descriptor_count + 1;
            let missed = oldest - self.next;
            self.next = oldest;
            return ReadOutcome::Gap { missed };
        }

        let slot =
            &self.ring.descriptors[(self.next as usize - 1) & (self.ring.descriptors.len() - 1)];
        let seqno = slot.seqno.load(Ordering::Acquire);
        if seqno != self.next {
            // Either still being written (0 / stale) or already reused.
            if seqno > self.next {
                let missed = seqno - self.next;
                self.next = seqno;
                return ReadOutcome::Gap { missed };
            }
            return ReadOutcome::Empty;
        }

        let raw_type = slot.event_type.load(Ordering::Relaxed);
        let length = slot.length.load(Ordering::Relaxed);
        let block_flow_id = slot.block_flow_id.load(Ordering::Relaxed);
        let txn_id = slot.txn_id.load(Ordering::Relaxed);
        let epoch_nanos = slot.epoch_nanos.load(Ordering::Relaxed);
        let payload_word = slot.payload_word.load(Ordering::Relaxed);

        let payload = if length & LENGTH_INLINE_FLAG != 0 {
            let len = (length & !LENGTH_INLINE_FLAG) as usize;
            payload_word.to_le_bytes()[..len].to_vec()
        } else {
            let data = self.ring.read_payload(payload_word, length as usize);
            // Window check: the payload bytes are only valid if the writer
            // has not advanced past them since.
            let head = self.ring.payload_head.load(Ordering::Acquire);
            let window_start = head.saturating_sub(self.ring.payload_len() as u64);
            if payload_word < window_start {
                self.next += 1;
                return ReadOutcome::PayloadTorn;
            }
            data
        };

        // The slot must not have been recycled while we copied.
        if slot.seqno.load(Ordering::Acquire) != self.next {
            return ReadOutcome::Empty;
        }

        let Some(event_type) = EventType::from_u32(raw_type) else {
            self.next += 1;
            return ReadOutcome::PayloadTorn;
        };

        let event = EventPayload {
            seqno: self.next,
            event_type,
            block_flow_id,
            txn_id,
            epoch_nanos,
            payload,
        };
        self.next += 1;
        ReadOutcome::Event(event)
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}
