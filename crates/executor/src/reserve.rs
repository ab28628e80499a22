//! Sender reserve balance: a per-sender rolling fee buffer capping the fees
//! a block's worth of in-flight transactions can commit, active from
//! MonadFour.

use crate::{chain::MonadChain, errors::TransactionError};
use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Per-block record of the maximum fee each transaction can charge its
/// sender. Populated in transaction order before execution begins, so
/// validation of transaction `i` can see every earlier fee regardless of
/// execution interleaving.
#[derive(Debug, Default)]
pub struct FeeBuffer {
    fees: Mutex<HashMap<Address, BTreeMap<u64, U256>>>,
}

impl FeeBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records transaction `index`'s maximum fee against `sender`.
    pub fn record(&self, index: u64, sender: Address, fee: U256) {
        self.fees.lock().entry(sender).or_default().insert(index, fee);
    }

    /// Returns `(cumulative_fee, tx_fee)` for `sender` at `index`:
    /// the sum of the sender's fees for transactions `0..=index`, and the
    /// fee of transaction `index` itself (zero if it is not the sender's).
    pub fn get(&self, index: u64, sender: &Address) -> (U256, U256) {
        let fees = self.fees.lock();
        let Some(sender_fees) = fees.get(sender) else {
            return (U256::ZERO, U256::ZERO);
        };
        let cumulative = sender_fees
            .range(..=index)
            .fold(U256::ZERO, |acc, (_, fee)| acc.saturating_add(*fee));
        let tx_fee = sender_fees.get(&index).copied().unwrap_or_default();
        (cumulative, tx_fee)
    }

    /// Drops all records; called at block boundaries.
    pub fn clear(&self) {
        self.fees.lock().clear();
    }
}

/// The reserve check for transaction `index`: its fee must fit into what is
/// left of the sender's reserve after every earlier in-flight fee.
pub fn check_reserve(
    chain: &MonadChain,
    fee_buffer: &FeeBuffer,
    index: u64,
    sender: &Address,
    balance: U256,
) -> Result<(), TransactionError> {
    let (cumulative_fee, tx_fee) = fee_buffer.get(index, sender);
    debug_assert!(cumulative_fee >= tx_fee);
    let fees_without_tx = cumulative_fee - tx_fee;

    let max_reserve = chain.get_max_reserve(sender);
    let reserve = balance.min(max_reserve - max_reserve.min(fees_without_tx));
    if tx_fee > reserve {
        return Err(TransactionError::InsufficientReserveBalance);
    }
    Ok(())
}

/// The post-execution revert rule: if the sender's balance dropped below the
/// portion of its original balance protected for outstanding fees, the
/// transaction's state changes are rolled back (the fee charge stands).
pub fn must_revert_for_reserve(
    chain: &MonadChain,
    fee_buffer: &FeeBuffer,
    index: u64,
    sender: &Address,
    original_balance: U256,
    current_balance: U256,
) -> bool {
    let (cumulative_fee, _) = fee_buffer.get(index, sender);
    let max_reserve = chain.get_max_reserve(sender);
    let protected = (max_reserve - max_reserve.min(cumulative_fee)).min(original_balance);
    current_balance < protected
}
