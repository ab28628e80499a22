//! Intrinsic gas and fee arithmetic.

use crate::{errors::TransactionError, tx::TxContext};
use alloy_primitives::U256;
use monad_primitives::{Revision, Traits};

/// Base cost of any transaction (YP `G_transaction`).
const G_TRANSACTION: u64 = 21_000;
/// Per-byte calldata cost, zero bytes.
const G_TX_DATA_ZERO: u64 = 4;
/// Per-byte calldata cost, non-zero bytes (EIP-2028).
const G_TX_DATA_NONZERO: u64 = 16;
/// Per-byte calldata cost, non-zero bytes, pre-Istanbul.
const G_TX_DATA_NONZERO_FRONTIER: u64 = 68;
/// Additional cost of a contract creation.
const G_TX_CREATE: u64 = 32_000;
/// Per-word cost of init code (EIP-3860).
const G_INIT_CODE_WORD: u64 = 2;
/// Access list: per address (EIP-2930).
const G_ACCESS_LIST_ADDRESS: u64 = 2_400;
/// Access list: per storage key (EIP-2930).
const G_ACCESS_LIST_STORAGE_KEY: u64 = 1_900;
/// Per authorization tuple (EIP-7702).
const G_EMPTY_ACCOUNT_COST: u64 = 25_000;
/// Gas per blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 1 << 17;
/// Max init code size (EIP-3860).
pub const MAX_INIT_CODE_SIZE: usize = 49_152;

/// The intrinsic gas of a transaction: the amount charged before a single
/// opcode runs.
pub fn intrinsic_gas<T: Traits>(tx: &TxContext) -> Result<u64, TransactionError> {
    let mut gas: u64 = G_TRANSACTION;

    let nonzero_cost = if T::evm_rev_at_least(Revision::Istanbul) {
        G_TX_DATA_NONZERO
    } else {
        G_TX_DATA_NONZERO_FRONTIER
    };
    let nonzero = tx.input.iter().filter(|byte| **byte != 0).count() as u64;
    let zero = tx.input.len() as u64 - nonzero;
    gas = gas
        .checked_add(nonzero.checked_mul(nonzero_cost).ok_or(TransactionError::GasLimitOverflow)?)
        .and_then(|gas| gas.checked_add(zero * G_TX_DATA_ZERO))
        .ok_or(TransactionError::GasLimitOverflow)?;

    if tx.is_create() {
        gas = gas.checked_add(G_TX_CREATE).ok_or(TransactionError::GasLimitOverflow)?;
        if T::evm_rev_at_least(Revision::Shanghai) {
            let words = (tx.input.len() as u64).div_ceil(32);
            gas = gas
                .checked_add(words * G_INIT_CODE_WORD)
                .ok_or(TransactionError::GasLimitOverflow)?;
        }
    }

    for item in tx.access_list.iter() {
        gas = gas
            .checked_add(G_ACCESS_LIST_ADDRESS)
            .and_then(|gas| {
                gas.checked_add(item.storage_keys.len() as u64 * G_ACCESS_LIST_STORAGE_KEY)
            })
            .ok_or(TransactionError::GasLimitOverflow)?;
    }

    if let Some(count) = tx.authorization_count {
        gas = gas
            .checked_add(count as u64 * G_EMPTY_ACCOUNT_COST)
            .ok_or(TransactionError::GasLimitOverflow)?;
    }

    Ok(gas)
}

/// YP eq. 70: the maximum wei a transaction can cost, value included.
/// `None` means the sum overflows 256 bits, which no balance can cover.
pub fn max_gas_cost(tx: &TxContext) -> Option<U256> {
    let gas = U256::from(tx.gas_limit).checked_mul(U256::from(tx.max_fee_per_gas))?;
    let mut cost = tx.value.checked_add(gas)?;
    if let Some(blob_fee) = tx.max_fee_per_blob_gas {
        let blob = U256::from(blob_fee).checked_mul(U256::from(total_blob_gas(tx)))?;
        cost = cost.checked_add(blob)?;
    }
    Some(cost)
}

/// Total blob gas of an EIP-4844 transaction.
pub fn total_blob_gas(tx: &TxContext) -> u64 {
    tx.blob_hashes.len() as u64 * GAS_PER_BLOB
}

/// YP `g*`: the gas returned to the sender after execution, refund counter
/// capped at `gas_used / quotient` (EIP-3529 tightened the quotient).
pub fn g_star<T: Traits>(gas_limit: u64, gas_remaining: u64, refund: u64) -> u64 {
    let gas_used = gas_limit - gas_remaining;
    let quotient = if T::evm_rev_at_least(Revision::London) { 5 } else { 2 };
    refund.min(gas_used / quotient)
}

/// The sender's up-front gas purchase at the effective price.
pub fn prepaid_gas_cost(tx: &TxContext, base_fee: u128) -> U256 {
    U256::from(tx.gas_limit) * U256::from(tx.effective_gas_price(base_fee))
}

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::tx::TxContext;
    use alloy_primitives::{Bytes, Signature, U256};

    /// A minimal legacy value transfer for unit tests.
    pub(crate) fn transfer_tx() -> TxContext {
        TxContext {
            tx_type: 0,
            chain_id: Some(1),
            nonce: 0,
            gas_limit: 21_000,
            max_fee_per_gas: 1,
            max_priority_fee_per_gas: None,
            to: Some(alloy_primitives::Address::ZERO),
            value: U256::from(1u64),
            input: Bytes::new(),
            access_list: Default::default(),
            blob_hashes: Vec::new(),
            max_fee_per_blob_gas: None,
            authorization_count: None,
            signature: Signature::test_signature(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{tests_support::transfer_tx, *};
    use alloy_primitives::{Bytes, U256};
    use monad_primitives::revision::MonadFourTraits;

    #[test]
    fn test_plain_transfer_intrinsic_gas() {
        assert_eq!(intrinsic_gas::<MonadFourTraits>(&transfer_tx()).unwrap(), G_TRANSACTION);
    }

    #[test]
    fn test_calldata_costs() {
        let mut tx = transfer_tx();
        tx.input = Bytes::from_static(&[0, 0, 1, 2]);
        assert_eq!(
            intrinsic_gas::<MonadFourTraits>(&tx).unwrap(),
            G_TRANSACTION + 2 * G_TX_DATA_ZERO + 2 * G_TX_DATA_NONZERO
        );
    }

    #[test]
    fn test_create_includes_init_code_words() {
        let mut tx = transfer_tx();
        tx.to = None;
        tx.input = Bytes::from(vec![1u8; 33]);
        assert_eq!(
            intrinsic_gas::<MonadFourTraits>(&tx).unwrap(),
            G_TRANSACTION + 33 * G_TX_DATA_NONZERO + G_TX_CREATE + 2 * G_INIT_CODE_WORD
        );
    }

    #[test]
    fn test_max_gas_cost_includes_value() {
        let tx = transfer_tx();
        assert_eq!(max_gas_cost(&tx), Some(U256::from(21_001u64)));

        let mut overflowing = transfer_tx();
        overflowing.value = U256::MAX;
        assert_eq!(max_gas_cost(&overflowing), None);
    }

    #[test]
    fn test_refund_cap() {
        // 100k used, London quotient 5 → cap 20k.
        assert_eq!(g_star::<MonadFourTraits>(150_000, 50_000, 100_000), 20_000);
        assert_eq!(g_star::<MonadFourTraits>(150_000, 50_000, 10_000), 10_000);
    }
}
