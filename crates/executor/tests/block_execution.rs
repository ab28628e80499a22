//! End-to-end block execution tests: genesis, transfers, same-sender
//! conflicts, commit/finalize, and output-header rejection.

use alloy_consensus::{Header, SignableTransaction, TxLegacy, TxReceipt};
use alloy_primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256};
use k256::ecdsa::SigningKey;
use monad_executor::{
    commit_block, commit_block_outputs, execute_block, finalize_block, recover_senders,
    BlockError, Evm, EvmResult, FeeBuffer, Message, MonadChain, NoopEvm,
};
use monad_executor::BlockMetrics;
use monad_fiber::PriorityPool;
use monad_mpt::{account_path, code_path, MemoryNodeStore, TrieDb, TrieUpdate, EMPTY_ROOT_HASH};
use monad_primitives::{
    Account, Block, BlockHashBuffer, ConsensusBlockBody, ConsensusBlockHeader, MonadRevision,
    QuorumCertificate, Revision,
};
use monad_state::{encode_account, BlockState, Db, State, TrieBackedDb};
use std::sync::Arc;
use std::time::Duration;

const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
}

fn sign_legacy(tx: TxLegacy, key: &SigningKey) -> (alloy_consensus::TxEnvelope, Address) {
    let sig_hash = tx.signature_hash();
    let (signature, recovery_id) =
        key.sign_prehash_recoverable(sig_hash.as_slice()).expect("signing succeeds");
    let signature = Signature::from_rs_and_parity(
        U256::from_be_slice(&signature.r().to_bytes()),
        U256::from_be_slice(&signature.s().to_bytes()),
        recovery_id.is_y_odd(),
    )
    .expect("valid signature components");
    let signed = tx.into_signed(signature);
    let sender = signed.recover_signer().expect("recoverable");
    (alloy_consensus::TxEnvelope::Legacy(signed), sender)
}

fn transfer(nonce: u64, to: Address, value: u64, key: &SigningKey) -> (alloy_consensus::TxEnvelope, Address) {
    sign_legacy(
        TxLegacy {
            chain_id: Some(1),
            nonce,
            gas_price: 1,
            gas_limit: 21_000,
            to: TxKind::Call(to),
            value: U256::from(value),
            input: Bytes::new(),
        },
        key,
    )
}

struct Harness {
    chain: Arc<MonadChain>,
    trie: Arc<TrieDb<MemoryNodeStore>>,
    pool: PriorityPool,
    block_hashes: Arc<BlockHashBuffer>,
}

impl Harness {
    fn new() -> Self {
        Self {
            chain: Arc::new(MonadChain::new(1, MonadRevision::MonadFour)),
            trie: Arc::new(TrieDb::new(MemoryNodeStore::default())),
            pool: PriorityPool::new(4),
            block_hashes: Arc::new(BlockHashBuffer::new()),
        }
    }

    /// Seeds the finalized genesis version (block 0).
    fn genesis(&self, accounts: &[(Address, Account)], code: &[(B256, Bytes)]) {
        let mut updates: Vec<TrieUpdate> = accounts
            .iter()
            .map(|(address, account)| {
                TrieUpdate::put(account_path(keccak256(address)), encode_account(account))
            })
            .collect();
        for (hash, bytes) in code {
            updates.push(TrieUpdate::put(code_path(*hash), bytes.clone()));
        }
        self.trie.commit(updates, 0, None).expect("genesis commit");
    }

    fn block_state(&self, parent: Option<u64>) -> Arc<BlockState<TrieBackedDb<MemoryNodeStore>>> {
        let db = TrieBackedDb::new(Arc::clone(&self.trie));
        db.set_parent(parent);
        Arc::new(BlockState::new(db))
    }

    fn header(number: u64) -> Header {
        Header {
            number,
            gas_limit: 30_000_000,
            timestamp: number * 2,
            base_fee_per_gas: Some(1),
            beneficiary: Address::repeat_byte(0xFE),
            extra_data: Bytes::from_static(b"monad-test"),
            ..Default::default()
        }
    }

    fn run<E: Evm + 'static>(
        &self,
        evm: &Arc<E>,
        block: &Block,
        parent: Option<u64>,
        metrics: &Arc<BlockMetrics>,
    ) -> Result<
        (Vec<monad_executor::ExecutionResult>, BlockState<TrieBackedDb<MemoryNodeStore>>),
        BlockError,
    > {
        let block_state = self.block_state(parent);
        let senders = recover_senders(&block.transactions, &self.pool);
        let fee_buffer = Arc::new(FeeBuffer::new());
        let results = execute_block(
            &self.chain,
            evm,
            block,
            senders,
            &block_state,
            &self.block_hashes,
            &self.pool,
            metrics,
            &fee_buffer,
        )?;
        Ok((results, unwrap_block_state(block_state)))
    }
}

/// Workers release their Arc clones right after fulfilling the outcome
/// promise; spin out the tail of that race.
fn unwrap_block_state<D: Db>(mut shared: Arc<BlockState<D>>) -> BlockState<D> {
    loop {
        match Arc::try_unwrap(shared) {
            Ok(block_state) => return block_state,
            Err(still_shared) => {
                shared = still_shared;
                std::thread::yield_now();
            }
        }
    }
}

#[test]
fn test_genesis_empty_block() {
    let harness = Harness::new();
    let evm = Arc::new(NoopEvm);
    let metrics = Arc::new(BlockMetrics::new());

    let block = Block {
        header: Harness::header(0),
        ..Default::default()
    };
    let (results, block_state) = harness.run(&evm, &block, None, &metrics).unwrap();
    assert!(results.is_empty());

    let outputs = commit_block_outputs(
        &harness.chain,
        &harness.trie,
        0,
        1,
        None,
        None,
        &block,
        &results,
        block_state,
    )
    .unwrap();

    // An empty genesis commits the empty trie.
    assert_eq!(outputs.state_root, EMPTY_ROOT_HASH);
    assert_eq!(outputs.transactions_root, EMPTY_ROOT_HASH);
    assert_eq!(outputs.receipts_root, EMPTY_ROOT_HASH);
    assert_eq!(outputs.gas_used, 0);
}

#[test]
fn test_single_transfer_balances() {
    let harness = Harness::new();
    let evm = Arc::new(NoopEvm);
    let metrics = Arc::new(BlockMetrics::new());

    let key = signing_key(1);
    let recipient = Address::repeat_byte(0x22);
    let (tx, sender) = transfer(0, recipient, 1, &key);
    harness.genesis(
        &[(sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() })],
        &[],
    );

    let block = Block {
        header: Harness::header(1),
        transactions: vec![tx],
        ..Default::default()
    };
    let (results, block_state) = harness.run(&evm, &block, Some(0), &metrics).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].status);
    assert_eq!(results[0].gas_used, 21_000);

    let outputs = commit_block_outputs(
        &harness.chain,
        &harness.trie,
        1,
        1,
        None,
        None,
        &block,
        &results,
        block_state,
    )
    .unwrap();
    assert_eq!(outputs.gas_used, 21_000);
    finalize_block(&harness.trie, 1, 1).unwrap();

    let db = TrieBackedDb::new(Arc::clone(&harness.trie));
    db.set_parent(Some(1));
    let sender_account = db.read_account(&sender).unwrap();
    assert_eq!(sender_account.balance, U256::from(ONE_ETHER - 21_000 - 1));
    assert_eq!(sender_account.nonce, 1);
    assert_eq!(db.read_account(&recipient).unwrap().balance, U256::from(1u64));
}

/// An interpreter that stalls, widening the window in which a later
/// transaction forks a stale snapshot.
#[derive(Debug, Clone, Copy)]
struct SlowEvm;

impl Evm for SlowEvm {
    fn execute<D: Db>(
        &self,
        _host: &mut State<'_, D>,
        _revision: Revision,
        msg: &Message,
        _code: &[u8],
    ) -> EvmResult {
        std::thread::sleep(Duration::from_millis(50));
        EvmResult { success: true, gas_remaining: msg.gas, gas_refund: 0, output: Bytes::new() }
    }
}

#[test]
fn test_same_sender_conflict_retries_once() {
    let harness = Harness::new();
    let evm = Arc::new(SlowEvm);
    let metrics = Arc::new(BlockMetrics::new());

    let key = signing_key(2);
    let contract = Address::repeat_byte(0x33);
    let contract_code = Bytes::from_static(&[0x00]); // STOP
    let code_hash = keccak256(&contract_code);

    // Tx 0 calls the slow contract; tx 1 is a plain transfer from the same
    // sender. Tx 1 must observe tx 0's nonce bump and fee debit.
    let (tx0, sender) = sign_legacy(
        TxLegacy {
            chain_id: Some(1),
            nonce: 0,
            gas_price: 1,
            gas_limit: 100_000,
            to: TxKind::Call(contract),
            value: U256::ZERO,
            input: Bytes::new(),
        },
        &key,
    );
    let (tx1, sender_again) = transfer(1, Address::repeat_byte(0x44), 5, &key);
    assert_eq!(sender, sender_again);

    harness.genesis(
        &[
            (sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() }),
            (contract, Account { code_hash, ..Default::default() }),
        ],
        &[(code_hash, contract_code)],
    );

    let block = Block {
        header: Harness::header(1),
        transactions: vec![tx0, tx1],
        ..Default::default()
    };
    let (results, _block_state) = harness.run(&evm, &block, Some(0), &metrics).unwrap();

    assert!(results[0].status);
    assert!(results[1].status);
    // The second transaction forked a pre-merge snapshot and re-executed
    // exactly once.
    assert_eq!(metrics.num_retries(), 1);
}

#[test]
fn test_root_determinism_across_runs() {
    let run = || {
        let harness = Harness::new();
        let evm = Arc::new(NoopEvm);
        let metrics = Arc::new(BlockMetrics::new());
        let key = signing_key(3);
        let (tx_a, sender) = transfer(0, Address::repeat_byte(0x55), 100, &key);
        let (tx_b, _) = transfer(1, Address::repeat_byte(0x66), 200, &key);
        harness.genesis(
            &[(sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() })],
            &[],
        );
        let block = Block {
            header: Harness::header(1),
            transactions: vec![tx_a, tx_b],
            ..Default::default()
        };
        let (results, block_state) = harness.run(&evm, &block, Some(0), &metrics).unwrap();
        commit_block_outputs(
            &harness.chain,
            &harness.trie,
            1,
            1,
            None,
            None,
            &block,
            &results,
            block_state,
        )
        .unwrap()
    };

    let first = run();
    let second = run();
    assert_eq!(first.state_root, second.state_root);
    assert_eq!(first.receipts_root, second.receipts_root);
}

#[test]
fn test_receipt_ordering_and_cumulative_gas() {
    let harness = Harness::new();
    let evm = Arc::new(NoopEvm);
    let metrics = Arc::new(BlockMetrics::new());
    let key = signing_key(4);
    let (tx_a, sender) = transfer(0, Address::repeat_byte(0x77), 1, &key);
    let (tx_b, _) = transfer(1, Address::repeat_byte(0x88), 1, &key);
    harness.genesis(
        &[(sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() })],
        &[],
    );
    let block = Block {
        header: Harness::header(1),
        transactions: vec![tx_a, tx_b],
        ..Default::default()
    };
    let (results, _) = harness.run(&evm, &block, Some(0), &metrics).unwrap();

    let (receipts, total_gas, _) = monad_executor::build_receipts(&results);
    assert_eq!(receipts.len(), 2);
    assert_eq!(total_gas, 42_000);
    let cumulative: Vec<u128> =
        receipts.iter().map(|receipt| receipt.cumulative_gas_used()).collect();
    assert_eq!(cumulative, vec![21_000, 42_000]);
}

#[test]
fn test_output_header_mismatch_rejects_block() {
    // First run: learn the correct outputs.
    let harness = Harness::new();
    let evm = Arc::new(NoopEvm);
    let metrics = Arc::new(BlockMetrics::new());
    let key = signing_key(5);
    let (tx, sender) = transfer(0, Address::repeat_byte(0x99), 7, &key);
    harness.genesis(
        &[(sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() })],
        &[],
    );
    let block = Block {
        header: Harness::header(1),
        transactions: vec![tx],
        ..Default::default()
    };
    let (results, block_state) = harness.run(&evm, &block, Some(0), &metrics).unwrap();
    let outputs = commit_block_outputs(
        &harness.chain,
        &harness.trie,
        1,
        1,
        None,
        None,
        &block,
        &results,
        block_state,
    )
    .unwrap();

    // Second run against a proposal whose gas claim disagrees.
    let mut proposed = outputs.clone().into_header(&block.header);
    proposed.gas_used += 1;
    let body = ConsensusBlockBody {
        transactions: block.transactions.clone(),
        ..Default::default()
    };
    let consensus_header = ConsensusBlockHeader {
        parent_bft_id: B256::ZERO,
        round: 2,
        parent_round: 1,
        block_body_id: body.id(),
        proposed_eth_header: proposed,
        qc: QuorumCertificate::default(),
    };

    let harness2 = Harness::new();
    harness2.genesis(
        &[(sender, Account { balance: U256::from(ONE_ETHER), ..Default::default() })],
        &[],
    );
    let (results2, block_state2) = harness2.run(&evm, &block, Some(0), &metrics).unwrap();
    let err = commit_block(
        &harness2.chain,
        &harness2.trie,
        &consensus_header,
        None,
        &block,
        &results2,
        block_state2,
    )
    .unwrap_err();
    assert!(matches!(err, BlockError::GasAboveLimit | BlockError::WrongMerkleRoot));

    // Nothing reached finalized history.
    assert_eq!(harness2.trie.latest_finalized(), Some(0));
}
