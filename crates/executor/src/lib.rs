//! The Monad block executor: optimistic parallel transaction execution
//! with consensus-aware state commitment.
//!
//! The pipeline for each consensus-proposed block:
//!
//! ```text
//! ConsensusBlockHeader + Body
//!       │
//!       ▼
//! [Sender Recovery]  - parallel, priority pool, per-tx ECDSA recover
//!       │
//!       ▼
//! [Parallel Executor] - fiber per tx, optimistic, retry on conflict
//!       │
//!       ▼
//! [Receipt/State Merge] - deterministic per-tx serial commit
//!       │
//!       ▼
//! [MPT Commit] - state/receipts/tx/withdrawals roots
//!       │
//!       ▼
//! [Output Header Validation] - match against the consensus input
//! ```

mod errors;
pub use errors::{BlockError, BlockResult, TransactionError, TransactionResult};

mod evm;
pub use evm::{BlockEnv, Evm, EvmResult, Message, NoopEvm};

mod tx;
pub use tx::TxContext;

mod gas;
pub use gas::{intrinsic_gas, max_gas_cost, total_blob_gas, GAS_PER_BLOB, MAX_INIT_CODE_SIZE};

mod chain;
pub use chain::{MonadChain, MAX_CODE_SIZE_EIP170, MAX_CODE_SIZE_MONAD};

mod reserve;
pub use reserve::{check_reserve, must_revert_for_reserve, FeeBuffer};

mod validate;
pub use validate::{
    static_validate_transaction, validate_ethereum_transaction, validate_transaction,
};

mod senders;
pub use senders::recover_senders;

mod metrics;
pub use metrics::BlockMetrics;

mod executor;
pub use executor::{
    build_receipts, commit_block, commit_block_outputs, execute_block, finalize_block,
    BlockOutputs, ExecutionResult, MAX_RETRIES,
};
