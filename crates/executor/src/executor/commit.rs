//! Block commit: converting the block's state deltas into trie updates,
//! computing the output header, and validating it against the proposal.

use crate::{
    chain::MonadChain,
    errors::{BlockError, BlockResult},
    executor::{build_receipts, ExecutionResult},
};
use alloy_consensus::{Header, EMPTY_OMMER_ROOT_HASH};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{keccak256, Bloom, Bytes, B256};
use alloy_rlp::Encodable;
use monad_events::BlockExecOutput;
use monad_mpt::{
    account_path, bft_header_path, block_header_path, code_path, ordered_trie_with_encoder,
    proposal_path, receipt_path, storage_page_path, txn_path, withdrawal_path, NodeStore,
    NodeWriter, TrieDb, TrieUpdate,
};
use monad_primitives::{Block, ConsensusBlockHeader, Revision};
use monad_state::{encode_account, BlockState, Db};
use tracing::{error, info};

/// Everything execution computes about a block, ready to be stamped into a
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutputs {
    /// Root of the committed trie version.
    pub state_root: B256,
    /// Canonical transactions trie root.
    pub transactions_root: B256,
    /// Canonical receipts trie root.
    pub receipts_root: B256,
    /// Withdrawals trie root, Shanghai and later.
    pub withdrawals_root: Option<B256>,
    /// Ommers list hash.
    pub ommers_hash: B256,
    /// Union bloom over all logs.
    pub logs_bloom: Bloom,
    /// Total gas consumed.
    pub gas_used: u64,
}

impl BlockOutputs {
    /// Stamps the computed fields over the proposal's environment fields.
    pub fn into_header(self, proposed: &Header) -> Header {
        Header {
            ommers_hash: self.ommers_hash,
            state_root: self.state_root,
            transactions_root: self.transactions_root,
            receipts_root: self.receipts_root,
            withdrawals_root: self.withdrawals_root,
            logs_bloom: self.logs_bloom,
            gas_used: self.gas_used,
            ..proposed.clone()
        }
    }
}

/// Converts the block's merged deltas into trie updates, appends the block
/// artefacts under their sub-trie prefixes, and commits one trie version at
/// `(block_number, round)`. Write-side trie failures are fatal.
#[allow(clippy::too_many_arguments)]
pub fn commit_block_outputs<D, S>(
    chain: &MonadChain,
    trie: &TrieDb<S>,
    block_number: u64,
    round: u64,
    consensus_header: Option<&ConsensusBlockHeader>,
    parent_header: Option<&Header>,
    block: &Block,
    results: &[ExecutionResult],
    block_state: BlockState<D>,
) -> BlockResult<BlockOutputs>
where
    D: Db,
    S: NodeStore + NodeWriter,
{
    let revision = chain.get_revision(block_number, block.header.timestamp);
    let (receipts, gas_used, logs_bloom) = build_receipts(results);

    // Canonical artefact roots.
    let transactions_root =
        ordered_trie_with_encoder(&block.transactions, |tx, mut buf| tx.encode_2718(&mut buf))
            .root();
    let receipts_root =
        ordered_trie_with_encoder(&receipts, |receipt, mut buf| receipt.encode_2718(&mut buf))
            .root();
    let withdrawals_root = (revision >= Revision::Shanghai).then(|| {
        ordered_trie_with_encoder(&block.withdrawals, |withdrawal, mut buf| {
            withdrawal.encode(&mut buf)
        })
        .root()
    });
    let ommers_hash = if block.ommers.is_empty() {
        EMPTY_OMMER_ROOT_HASH
    } else {
        let mut encoded = Vec::new();
        block.ommers.encode(&mut encoded);
        keccak256(&encoded)
    };

    // State deltas and new code become trie updates.
    let (_, deltas, code) = block_state.into_parts();
    let mut updates = Vec::new();
    for entry in deltas.iter() {
        let (address, delta) = entry.pair();
        let hashed_address = keccak256(address);

        if let Some(account_delta) = &delta.account {
            match &account_delta.after {
                Some(account) => updates.push(TrieUpdate::put(
                    account_path(hashed_address),
                    encode_account(account),
                )),
                None => {
                    if account_delta.before.is_some() {
                        updates.push(TrieUpdate::delete(account_path(hashed_address)));
                    }
                }
            }
        }

        for ((incarnation, page_key), page_delta) in &delta.storage {
            let path = storage_page_path(hashed_address, *incarnation, *page_key);
            if page_delta.after.is_empty() {
                if !page_delta.before.is_empty() {
                    updates.push(TrieUpdate::delete(path));
                }
            } else {
                updates.push(TrieUpdate::put(path, page_delta.after.encode().into()));
            }
        }
    }
    for entry in code.iter() {
        updates.push(TrieUpdate::put(code_path(*entry.key()), entry.value().clone()));
    }

    // Block artefacts under their sub-trie prefixes.
    for (index, tx) in block.transactions.iter().enumerate() {
        updates.push(TrieUpdate::put(txn_path(index), tx.encoded_2718().into()));
    }
    for (index, receipt) in receipts.iter().enumerate() {
        updates.push(TrieUpdate::put(receipt_path(index), receipt.encoded_2718().into()));
    }
    for (index, withdrawal) in block.withdrawals.iter().enumerate() {
        let mut encoded = Vec::with_capacity(withdrawal.length());
        withdrawal.encode(&mut encoded);
        updates.push(TrieUpdate::put(withdrawal_path(index), encoded.into()));
    }

    // Consensus bookkeeping: the BFT header at its round, the proposal
    // metadata, and the parent's executed header for block-hash walks.
    if let Some(consensus_header) = consensus_header {
        updates.push(TrieUpdate::put(bft_header_path(round), rlp_bytes(consensus_header)));
        updates.push(TrieUpdate::put(
            proposal_path(round),
            rlp_bytes(&consensus_header.proposed_eth_header),
        ));
    }
    if let Some(parent_header) = parent_header {
        updates.push(TrieUpdate::put(block_header_path(), rlp_bytes(parent_header)));
    }

    // Write-side trie failures are fatal: the store is no longer coherent.
    let state_root = match trie.commit(updates, block_number, Some(round)) {
        Ok(root) => root,
        Err(err) => {
            error!(target: "triedb", %err, block_number, "trie commit failed");
            panic!("fatal: trie commit failed at block {block_number}: {err}");
        }
    };

    Ok(BlockOutputs {
        state_root,
        transactions_root,
        receipts_root,
        withdrawals_root,
        ommers_hash,
        logs_bloom,
        gas_used,
    })
}

/// Commits an executed block and validates the resulting header against the
/// consensus proposal. A mismatch rejects the block: the orphaned proposal
/// never reaches finalized history.
pub fn commit_block<D, S>(
    chain: &MonadChain,
    trie: &TrieDb<S>,
    consensus_header: &ConsensusBlockHeader,
    parent_header: Option<&Header>,
    block: &Block,
    results: &[ExecutionResult],
    block_state: BlockState<D>,
) -> BlockResult<BlockExecOutput>
where
    D: Db,
    S: NodeStore + NodeWriter,
{
    let proposed = &consensus_header.proposed_eth_header;
    let outputs = commit_block_outputs(
        chain,
        trie,
        proposed.number,
        consensus_header.round,
        Some(consensus_header),
        parent_header,
        block,
        results,
        block_state,
    )?;

    let output = outputs.into_header(proposed);
    chain.validate_output_header(proposed, &output)?;

    let eth_block_hash = output.hash_slow();
    info!(
        target: "block_executor",
        number = output.number,
        round = consensus_header.round,
        state_root = %output.state_root,
        %eth_block_hash,
        gas_used = output.gas_used,
        "block committed"
    );
    Ok(BlockExecOutput { eth_header: output, eth_block_hash })
}

/// Promotes the proposal committed at `(block_number, round)` into
/// finalized history, pruning sibling proposals at that height.
pub fn finalize_block<S>(trie: &TrieDb<S>, block_number: u64, round: u64) -> BlockResult<()>
where
    S: NodeStore + NodeWriter,
{
    if let Err(err) = trie.finalize(block_number, round) {
        error!(target: "triedb", %err, block_number, round, "finalize failed");
        return Err(BlockError::MissingProposal);
    }
    Ok(())
}

fn rlp_bytes<T: Encodable>(value: &T) -> Bytes {
    let mut encoded = Vec::with_capacity(value.length());
    value.encode(&mut encoded);
    encoded.into()
}
