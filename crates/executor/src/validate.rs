//! Transaction validation: static checks before sender recovery, dynamic
//! checks against the sender's authoritative account.

use crate::{
    chain::MonadChain,
    errors::{TransactionError, TransactionResult},
    gas::{intrinsic_gas, max_gas_cost, MAX_INIT_CODE_SIZE},
    reserve::{check_reserve, FeeBuffer},
    tx::TxContext,
};
use alloy_primitives::{Address, U256};
use monad_primitives::{MonadRevision, Revision, Traits};
use monad_state::{Db, State};

/// Version byte of a valid blob commitment hash (EIP-4844).
const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// EIP-7702 delegation designator prefix.
const DELEGATION_PREFIX: [u8; 3] = [0xEF, 0x01, 0x00];

/// Static checks: everything provable from the transaction alone plus the
/// block environment, before the sender is even known.
pub fn static_validate_transaction<T: Traits>(
    tx: &TxContext,
    base_fee_per_gas: Option<u128>,
    excess_blob_gas: Option<u64>,
    chain_id: u64,
) -> TransactionResult<()> {
    // Type gating per revision.
    let supported = match tx.tx_type {
        0 => true,
        1 => T::evm_rev_at_least(Revision::Berlin),
        2 => T::evm_rev_at_least(Revision::London),
        3 => T::evm_rev_at_least(Revision::Cancun),
        4 => T::evm_rev_at_least(Revision::Prague),
        _ => false,
    };
    if !supported {
        return Err(TransactionError::TypeNotSupported);
    }

    match tx.chain_id {
        Some(id) if id != chain_id => return Err(TransactionError::WrongChainId),
        // Pre-EIP-155 transactions carry no chain id.
        _ => {}
    }

    if tx.nonce == u64::MAX {
        return Err(TransactionError::NonceExceedsMax);
    }

    // Non-canonical `s` has been invalid since Homestead.
    if tx.signature.normalize_s().is_some() {
        return Err(TransactionError::InvalidSignature);
    }

    if let Some(priority) = tx.max_priority_fee_per_gas {
        if priority > tx.max_fee_per_gas {
            return Err(TransactionError::PriorityFeeGreaterThanMax);
        }
    }
    if let Some(base_fee) = base_fee_per_gas {
        if tx.max_fee_per_gas < base_fee {
            return Err(TransactionError::MaxFeeLessThanBase);
        }
    }

    if intrinsic_gas::<T>(tx)? > tx.gas_limit {
        return Err(TransactionError::IntrinsicGasGreaterThanLimit);
    }

    if tx.is_create()
        && T::evm_rev_at_least(Revision::Shanghai)
        && tx.input.len() > MAX_INIT_CODE_SIZE
    {
        return Err(TransactionError::InitCodeLimitExceeded);
    }

    if tx.tx_type == 3 {
        if excess_blob_gas.is_none() {
            return Err(TransactionError::TypeNotSupported);
        }
        if tx.blob_hashes.is_empty() {
            return Err(TransactionError::InvalidBlobHash);
        }
        if tx.blob_hashes.iter().any(|hash| hash[0] != VERSIONED_HASH_VERSION_KZG) {
            return Err(TransactionError::InvalidBlobHash);
        }
    }

    if tx.authorization_count == Some(0) {
        return Err(TransactionError::EmptyAuthorizationList);
    }

    Ok(())
}

/// YP eq. 71 checks against the sender's account in `state`. Reads go
/// through the snapshot, so a conflicting earlier transaction forces
/// re-validation on retry.
pub fn validate_ethereum_transaction<T: Traits, D: Db>(
    tx: &TxContext,
    sender: &Address,
    state: &mut State<'_, D>,
) -> TransactionResult<()> {
    let cost = max_gas_cost(tx);

    if !state.account_exists(sender) {
        if tx.nonce != 0 {
            return Err(TransactionError::BadNonce);
        }
        if cost != Some(U256::ZERO) {
            return Err(TransactionError::InsufficientBalance);
        }
        return Ok(());
    }

    let mut sender_is_eoa = state.get_code_hash(sender) == monad_primitives::NULL_CODE_HASH;
    if T::evm_rev_at_least(Revision::Prague) && !sender_is_eoa {
        // EIP-7702: a delegated EOA carries a designator, not real code.
        let code = state.get_code(sender);
        sender_is_eoa = code.starts_with(&DELEGATION_PREFIX);
    }
    if !sender_is_eoa {
        return Err(TransactionError::SenderNotEoa);
    }

    if state.get_nonce(sender) != tx.nonce {
        return Err(TransactionError::BadNonce);
    }

    let balance_covers = cost.is_some_and(|cost| state.get_balance(sender) >= cost);
    if !balance_covers {
        return Err(TransactionError::InsufficientBalance);
    }

    Ok(())
}

/// Full dynamic validation: the Ethereum rules, then the reserve-balance
/// rule from MonadFour on. An `InsufficientBalance` verdict is deferred to
/// the reserve check there, which subsumes it.
pub fn validate_transaction<T: Traits, D: Db>(
    chain: &MonadChain,
    fee_buffer: &FeeBuffer,
    index: u64,
    tx: &TxContext,
    sender: &Address,
    state: &mut State<'_, D>,
) -> TransactionResult<()> {
    let result = validate_ethereum_transaction::<T, D>(tx, sender, state);
    if !T::monad_rev_at_least(MonadRevision::MonadFour) {
        return result;
    }

    if let Err(err) = result {
        if err != TransactionError::InsufficientBalance {
            return Err(err);
        }
    }
    let balance = state
        .recent_account(sender)
        .map(|account| account.balance)
        .unwrap_or_default();
    check_reserve(chain, fee_buffer, index, sender, balance)
}
