//! The EVMC-style boundary to the bytecode interpreter.
//!
//! Opcode execution is an external collaborator: the engine hands it a
//! message, a host (the transaction [State]) and the code object, and gets a
//! result back. Everything around the call (value transfer, fee accounting,
//! nonce bumps, warm/cold tracking, log collection) is the engine's own
//! responsibility.
//!
//! [State]: monad_state::State

use alloy_primitives::{Address, Bytes, B256, U256};
use monad_primitives::Revision;
use monad_state::{CallKind, Db, State};

/// The block-level execution environment handed to the interpreter through
/// `get_tx_context`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockEnv {
    /// Block number.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Fee recipient.
    pub beneficiary: Address,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Base fee per gas.
    pub base_fee: u128,
    /// Blob base fee per gas (EIP-4844).
    pub blob_base_fee: u128,
    /// The RANDAO mix of the block.
    pub prev_randao: B256,
    /// Chain id.
    pub chain_id: u64,
}

/// A call or create message handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The call kind.
    pub kind: CallKind,
    /// Call depth, 0 for the top-level message.
    pub depth: u32,
    /// Gas available to the message.
    pub gas: u64,
    /// The account whose code executes (or the created address).
    pub recipient: Address,
    /// The caller.
    pub sender: Address,
    /// Input data.
    pub input: Bytes,
    /// Value transferred with the message.
    pub value: U256,
    /// Whether state modification is forbidden.
    pub is_static: bool,
}

/// The interpreter's verdict on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmResult {
    /// Whether execution succeeded. A failure rolls the message's state
    /// changes back via the host checkpoint.
    pub success: bool,
    /// Gas left after execution.
    pub gas_remaining: u64,
    /// Refund accumulated by the interpreter (on top of host-side refunds).
    pub gas_refund: u64,
    /// Return or revert data; deployed code for creates.
    pub output: Bytes,
}

/// The interpreter contract. `execute` must be a pure function of the
/// message, host and code.
pub trait Evm: Send + Sync {
    /// Executes `code` in the context of `msg` against `host`.
    fn execute<D: Db>(
        &self,
        host: &mut State<'_, D>,
        revision: Revision,
        msg: &Message,
        code: &[u8],
    ) -> EvmResult;
}

/// An interpreter that treats every code object as a single STOP: it
/// succeeds without consuming gas or touching state. Plain value transfers
/// and all engine-side accounting still behave fully; used for tests and
/// for driving the engine without a VM build.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvm;

impl Evm for NoopEvm {
    fn execute<D: Db>(
        &self,
        _host: &mut State<'_, D>,
        _revision: Revision,
        msg: &Message,
        _code: &[u8],
    ) -> EvmResult {
        EvmResult {
            success: true,
            gas_remaining: msg.gas,
            gas_refund: 0,
            output: Bytes::new(),
        }
    }
}
