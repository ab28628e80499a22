//! Block-level event recording: the execution loop's entry points into the
//! ring.

use crate::ring::{EventRing, EventType};
use alloy_consensus::Header;
use alloy_primitives::{B256, U256};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::info;

/// Environment variable overriding the event-server UNIX socket path.
pub const MONAD_EVENT_DEFAULT_SOCKET_PATH: &str = "MONAD_EVENT_DEFAULT_SOCKET_PATH";

/// Default UNIX socket the event server binds.
pub const DEFAULT_EVENT_SOCKET_PATH: &str = "/tmp/monad-event.sock";

/// Resolves the event-server socket path, honoring the environment override.
pub fn event_socket_path() -> PathBuf {
    std::env::var_os(MONAD_EVENT_DEFAULT_SOCKET_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EVENT_SOCKET_PATH))
}

/// Named pair holding the block execution outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockExecOutput {
    /// The executed Ethereum header.
    pub eth_header: Header,
    /// Its hash.
    pub eth_block_hash: B256,
}

/// Domain id + status code identifying why a block was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockRejectInfo {
    /// Error domain (transaction, block, db, internal).
    pub domain_id: u32,
    /// Domain-specific status code.
    pub status_code: u32,
}

#[derive(Debug, RlpEncodable)]
struct BlockStartPayload {
    bft_block_id: B256,
    chain_id: U256,
    eth_parent_hash: B256,
    block_number: u64,
    block_round: u64,
    epoch: u64,
    txn_count: u64,
}

#[derive(Debug, RlpEncodable)]
struct BlockEndPayload {
    eth_block_hash: B256,
    state_root: B256,
    receipts_root: B256,
    transactions_root: B256,
    gas_used: u64,
}

/// Per-process event recorder; one block flow is active at a time.
#[derive(Debug)]
pub struct EventRecorder {
    ring: Arc<EventRing>,
    active_flow: AtomicU64,
}

impl EventRecorder {
    /// Creates a recorder over `ring`.
    pub fn new(ring: Arc<EventRing>) -> Self {
        Self { ring, active_flow: AtomicU64::new(0) }
    }

    /// The ring this recorder writes to.
    pub const fn ring(&self) -> &Arc<EventRing> {
        &self.ring
    }

    /// The block flow id currently recording, zero when idle.
    pub fn active_flow(&self) -> u64 {
        self.active_flow.load(Ordering::Acquire)
    }

    /// Emits a transaction receipt event.
    pub fn record_txn_receipt(&self, txn_id: u64, payload: &[u8]) {
        let flow = self.active_flow();
        self.ring.emit(EventType::TxnReceipt, flow, txn_id, payload);
    }

    /// Emits a call frame event.
    pub fn record_call_frame(&self, txn_id: u64, payload: &[u8]) {
        let flow = self.active_flow();
        self.ring.emit(EventType::CallFrame, flow, txn_id, payload);
    }
}

/// Records the start of block execution: emits a `BLOCK_START` event and
/// sets the active block flow id on the recorder.
#[allow(clippy::too_many_arguments)]
pub fn record_block_exec_start(
    recorder: &EventRecorder,
    bft_block_id: B256,
    chain_id: U256,
    eth_parent_hash: B256,
    header: &Header,
    block_round: u64,
    epoch: u64,
    txn_count: usize,
) {
    let flow = header.number;
    recorder.active_flow.store(flow, Ordering::Release);

    let payload = BlockStartPayload {
        bft_block_id,
        chain_id,
        eth_parent_hash,
        block_number: header.number,
        block_round,
        epoch,
        txn_count: txn_count as u64,
    };
    let mut encoded = Vec::with_capacity(payload.length());
    payload.encode(&mut encoded);
    recorder.ring.emit(EventType::BlockStart, flow, 0, &encoded);

    info!(
        target: "block_events",
        block_number = header.number,
        round = block_round,
        txns = txn_count,
        "block execution start"
    );
}

/// Records the block execution outcome (a `BLOCK_END` event with the
/// computed roots, or `BLOCK_REJECT` with the failure code) and clears the
/// active flow. Passes the result through for `?`-chaining.
pub fn record_block_exec_result(
    recorder: &EventRecorder,
    result: Result<BlockExecOutput, BlockRejectInfo>,
) -> Result<BlockExecOutput, BlockRejectInfo> {
    let flow = recorder.active_flow();
    match &result {
        Ok(output) => {
            let payload = BlockEndPayload {
                eth_block_hash: output.eth_block_hash,
                state_root: output.eth_header.state_root,
                receipts_root: output.eth_header.receipts_root,
                transactions_root: output.eth_header.transactions_root,
                gas_used: output.eth_header.gas_used,
            };
            let mut encoded = Vec::with_capacity(payload.length());
            payload.encode(&mut encoded);
            recorder.ring.emit(EventType::BlockEnd, flow, 0, &encoded);
        }
        Err(reject) => {
            let mut encoded = Vec::with_capacity(reject.length());
            reject.encode(&mut encoded);
            recorder.ring.emit(EventType::BlockReject, flow, 0, &encoded);
        }
    }
    recorder.active_flow.store(0, Ordering::Release);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{EventReader, ReadOutcome};

    #[test]
    fn test_block_flow_lifecycle() {
        let ring = EventRing::new(6, 14);
        let recorder = EventRecorder::new(Arc::clone(&ring));
        let mut reader = EventReader::new(ring);

        let header = Header { number: 11, gas_used: 21_000, ..Default::default() };
        record_block_exec_start(
            &recorder,
            B256::repeat_byte(1),
            U256::from(1u64),
            B256::ZERO,
            &header,
            4,
            0,
            2,
        );
        assert_eq!(recorder.active_flow(), 11);

        let output =
            BlockExecOutput { eth_block_hash: B256::repeat_byte(2), eth_header: header };
        let result = record_block_exec_result(&recorder, Ok(output));
        assert!(result.is_ok());
        assert_eq!(recorder.active_flow(), 0);

        let ReadOutcome::Event(start) = reader.try_next() else { panic!("expected start") };
        assert_eq!(start.event_type, EventType::BlockStart);
        assert_eq!(start.block_flow_id, 11);
        let ReadOutcome::Event(end) = reader.try_next() else { panic!("expected end") };
        assert_eq!(end.event_type, EventType::BlockEnd);
    }

    #[test]
    fn test_reject_event() {
        let ring = EventRing::new(6, 14);
        let recorder = EventRecorder::new(Arc::clone(&ring));
        let mut reader = EventReader::new(ring);

        let result = record_block_exec_result(
            &recorder,
            Err(BlockRejectInfo { domain_id: 2, status_code: 7 }),
        );
        assert!(result.is_err());

        let ReadOutcome::Event(event) = reader.try_next() else { panic!("expected event") };
        assert_eq!(event.event_type, EventType::BlockReject);
    }

    #[test]
    fn test_socket_path_env_override() {
        // Default applies when the variable is unset.
        std::env::remove_var(MONAD_EVENT_DEFAULT_SOCKET_PATH);
        assert_eq!(event_socket_path(), PathBuf::from(DEFAULT_EVENT_SOCKET_PATH));

        std::env::set_var(MONAD_EVENT_DEFAULT_SOCKET_PATH, "/tmp/other.sock");
        assert_eq!(event_socket_path(), PathBuf::from("/tmp/other.sock"));
        std::env::remove_var(MONAD_EVENT_DEFAULT_SOCKET_PATH);
    }
}
