//! Parallel sender recovery: one fiber per transaction on the CPU pool.

use alloy_consensus::TxEnvelope;
use alloy_primitives::Address;
use monad_fiber::{PriorityPool, Promise};
use tracing::warn;

/// Recovers every transaction's sender concurrently. The result vector is
/// index-aligned with `transactions`; `None` marks an unrecoverable
/// signature.
pub fn recover_senders(
    transactions: &[TxEnvelope],
    pool: &PriorityPool,
) -> Vec<Option<Address>> {
    let promises: Vec<Promise<Option<Address>>> =
        (0..transactions.len()).map(|_| Promise::new()).collect();

    for (index, tx) in transactions.iter().enumerate() {
        let tx = tx.clone();
        let promise = promises[index].clone();
        pool.submit(index as u64, move || {
            let recovered = recover_one(&tx);
            if recovered.is_none() {
                warn!(target: "block_executor", index, "sender recovery failed");
            }
            promise.set(recovered);
        });
    }

    promises.iter().map(Promise::wait).collect()
}

fn recover_one(tx: &TxEnvelope) -> Option<Address> {
    match tx {
        TxEnvelope::Legacy(signed) => signed.recover_signer().ok(),
        TxEnvelope::Eip2930(signed) => signed.recover_signer().ok(),
        TxEnvelope::Eip1559(signed) => signed.recover_signer().ok(),
        TxEnvelope::Eip4844(signed) => signed.recover_signer().ok(),
        TxEnvelope::Eip7702(signed) => signed.recover_signer().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{SignableTransaction, TxLegacy};
    use alloy_primitives::{Signature, TxKind, U256};

    fn signed_transfer(nonce: u64) -> (TxEnvelope, Address) {
        // A fixed test key: sign by brute construction through alloy's
        // signature test helper, then recover to learn the address.
        let tx = TxLegacy {
            chain_id: Some(1),
            nonce,
            gas_price: 1,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(2)),
            value: U256::from(1u64),
            input: Default::default(),
        };
        let signature = Signature::test_signature();
        let signed = tx.into_signed(signature);
        let expected = signed.recover_signer().ok();
        (TxEnvelope::Legacy(signed), expected.unwrap_or_default())
    }

    #[test]
    fn test_parallel_recovery_is_index_aligned() {
        let pool = PriorityPool::new(4);
        let pairs: Vec<_> = (0..8).map(signed_transfer).collect();
        let txs: Vec<_> = pairs.iter().map(|(tx, _)| tx.clone()).collect();

        let recovered = recover_senders(&txs, &pool);
        assert_eq!(recovered.len(), txs.len());
        for (result, (_, expected)) in recovered.iter().zip(&pairs) {
            assert_eq!(result.unwrap_or_default(), *expected);
        }
    }
}
