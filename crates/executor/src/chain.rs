//! Chain rules: revision selection, output-header validation, and the
//! Monad-specific knobs layered over the Ethereum base rules.

use crate::{
    errors::{BlockError, BlockResult},
    gas::g_star,
    tx::TxContext,
};
use alloy_consensus::Header;
use alloy_primitives::{Address, U256};
use monad_primitives::{MonadRevision, Revision, Traits};

/// EIP-170 contract code size limit.
pub const MAX_CODE_SIZE_EIP170: usize = 24_576;

/// Monad's enlarged code size limit, active from MonadTwo.
pub const MAX_CODE_SIZE_MONAD: usize = 128 * 1024;

/// Chain rules for a Monad chain (or plain Ethereum replay when
/// `monad_revision` is `None`).
#[derive(Debug, Clone)]
pub struct MonadChain {
    /// The chain id transactions must carry.
    pub chain_id: u64,
    /// The active Monad revision; `None` replays plain Ethereum rules.
    pub monad_revision: Option<MonadRevision>,
    /// Default per-sender reserve cap; the reserve-balance precompile can
    /// override this per address once it ships.
    pub default_max_reserve: U256,
}

impl MonadChain {
    /// A Monad chain at the given revision. The default reserve cap is a
    /// fee cushion (0.1 native token), far below typical balances.
    pub fn new(chain_id: u64, monad_revision: MonadRevision) -> Self {
        Self {
            chain_id,
            monad_revision: Some(monad_revision),
            default_max_reserve: U256::from(10u128.pow(17)),
        }
    }

    /// The EVM revision active at `(block_number, timestamp)`. Monad runs a
    /// Cancun base at every Monad revision.
    pub fn get_revision(&self, _block_number: u64, _timestamp: u64) -> Revision {
        Revision::Cancun
    }

    /// The Monad revision active at `(block_number, timestamp)`.
    pub const fn get_monad_revision(
        &self,
        _block_number: u64,
        _timestamp: u64,
    ) -> Option<MonadRevision> {
        self.monad_revision
    }

    /// The runtime revision tag pair for `with_revision!` dispatch.
    pub fn revision_pair(
        &self,
        block_number: u64,
        timestamp: u64,
    ) -> (Revision, Option<MonadRevision>) {
        (
            self.get_revision(block_number, timestamp),
            self.get_monad_revision(block_number, timestamp),
        )
    }

    /// Validates the computed output header against the consensus proposal.
    /// Mismatches are fatal for the block: nothing is persisted.
    pub fn validate_output_header(&self, input: &Header, output: &Header) -> BlockResult<()> {
        if input.ommers_hash != output.ommers_hash {
            return Err(BlockError::WrongOmmersHash);
        }
        if input.transactions_root != output.transactions_root {
            return Err(BlockError::WrongMerkleRoot);
        }
        if input.receipts_root != output.receipts_root {
            return Err(BlockError::WrongMerkleRoot);
        }
        if input.withdrawals_root != output.withdrawals_root {
            return Err(BlockError::WrongMerkleRoot);
        }
        if input.state_root != output.state_root {
            return Err(BlockError::WrongMerkleRoot);
        }

        // YP eq. 56, and the proposer's gas claim must match execution.
        if output.gas_used > output.gas_limit || input.gas_used != output.gas_used {
            return Err(BlockError::GasAboveLimit);
        }
        Ok(())
    }

    /// The gas refunded to the sender. Gone from MonadOne on; Ethereum
    /// `g*` semantics at MonadZero and on replay.
    pub fn compute_gas_refund<T: Traits>(
        &self,
        tx: &TxContext,
        gas_remaining: u64,
        refund: u64,
    ) -> u64 {
        if T::monad_rev_at_least(MonadRevision::MonadOne) {
            return 0;
        }
        g_star::<T>(tx.gas_limit, gas_remaining, refund)
    }

    /// The max deployed-code size at the active revision.
    pub fn get_max_code_size<T: Traits>(&self) -> usize {
        if T::monad_rev_at_least(MonadRevision::MonadTwo) {
            MAX_CODE_SIZE_MONAD
        } else {
            MAX_CODE_SIZE_EIP170
        }
    }

    /// The reserve-balance cap for `address`.
    pub fn get_max_reserve(&self, _address: &Address) -> U256 {
        self.default_max_reserve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use monad_primitives::revision::{MonadFourTraits, MonadZeroTraits};

    fn chain() -> MonadChain {
        MonadChain::new(1, MonadRevision::MonadFour)
    }

    #[test]
    fn test_output_header_match() {
        let header = Header { gas_limit: 30_000_000, gas_used: 21_000, ..Default::default() };
        assert!(chain().validate_output_header(&header, &header).is_ok());
    }

    #[test]
    fn test_merkle_root_mismatch() {
        let input = Header::default();
        let output = Header { state_root: B256::repeat_byte(1), ..Default::default() };
        assert_eq!(
            chain().validate_output_header(&input, &output),
            Err(BlockError::WrongMerkleRoot)
        );
    }

    #[test]
    fn test_gas_above_limit_rejected() {
        let header = Header { gas_limit: 21_000, gas_used: 21_001, ..Default::default() };
        assert_eq!(
            chain().validate_output_header(&header, &header),
            Err(BlockError::GasAboveLimit)
        );
    }

    #[test]
    fn test_refunds_removed_from_monad_one() {
        let chain = chain();
        let tx = crate::gas::tests_support::transfer_tx();
        assert_eq!(chain.compute_gas_refund::<MonadFourTraits>(&tx, 1_000, 500), 0);
        assert!(chain.compute_gas_refund::<MonadZeroTraits>(&tx, 1_000, 500) > 0);
    }

    #[test]
    fn test_code_size_schedule() {
        let chain = chain();
        assert_eq!(chain.get_max_code_size::<MonadFourTraits>(), MAX_CODE_SIZE_MONAD);
        assert_eq!(chain.get_max_code_size::<MonadZeroTraits>(), MAX_CODE_SIZE_EIP170);
    }
}
