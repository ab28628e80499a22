//! The layered state store of the Monad execution engine.
//!
//! Three tiers serve per-transaction state:
//!
//! ```text
//! State (per tx)  ── transient journal + access set + refund
//!    │
//! BlockState      ── StateDeltas<Address, StateDelta> + Code
//!    │
//! Db              ── durable MPT
//! ```
//!
//! Transactions execute against a forked [State]; when one finishes,
//! [BlockState::can_merge] validates its reads against the current committed
//! view and [BlockState::merge] installs its writes, or the transaction
//! re-executes.

mod db;
pub use db::{encode_account, Db, DbAccount, InMemoryDb, TrieBackedDb, BLOCK_STORAGE_INCARNATION};

mod deltas;
pub use deltas::{Code, Delta, StateDelta, StateDeltas};

mod block_state;
pub use block_state::BlockState;

mod state;
pub use state::{
    AccessStats, AccessStatus, CallFrame, CallKind, ReadSet, State, StorageStatus, TxWrites,
};
