//! The execution runloop: drives consensus blocks from a ledger directory
//! through execution, commit and finalization.

use alloy_consensus::Header;
use alloy_primitives::{Address, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use monad_events::{
    record_block_exec_result, record_block_exec_start, BlockExecOutput, BlockRejectInfo,
    EventRecorder, EventRing,
};
use monad_executor::{
    commit_block, commit_block_outputs, execute_block, finalize_block, recover_senders,
    BlockError, BlockMetrics, FeeBuffer, MonadChain, NoopEvm,
};
use monad_fiber::PriorityPool;
use monad_io::{AsyncIo, AsyncIoConfig};
use monad_mpt::{account_path, PoolNodeStore, TrieDb, TrieUpdate};
use monad_primitives::{
    Block, BlockHashBuffer, ConsensusBlockBody, ConsensusBlockHeader, MonadRevision,
};
use monad_state::{encode_account, BlockState, Db, TrieBackedDb};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

/// Why the runloop stopped.
#[derive(Debug)]
pub enum RunloopError {
    /// A ledger block failed structural checks (body id, decode).
    InvalidBlock(String),
    /// Execution or commit rejected a block.
    Rejected(BlockError),
    /// Anything environmental: I/O, storage pool.
    Fatal(String),
}

impl std::fmt::Display for RunloopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlock(msg) => write!(f, "invalid input block: {msg}"),
            Self::Rejected(err) => write!(f, "block rejected: {err}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

/// One ledger entry: a consensus header and its body.
#[derive(Debug, Clone, RlpEncodable, RlpDecodable)]
pub struct LedgerEntry {
    /// The proposal.
    pub header: ConsensusBlockHeader,
    /// The content-addressed body.
    pub body: ConsensusBlockBody,
}

/// The runloop: owns the storage pool, the worker pool and the event ring,
/// and executes blocks one at a time.
pub struct Runloop {
    chain: Arc<MonadChain>,
    evm: Arc<NoopEvm>,
    trie: Arc<TrieDb<PoolNodeStore>>,
    pool: PriorityPool,
    recorder: EventRecorder,
    block_hashes: BlockHashBuffer,
    ledger_path: PathBuf,
    /// Number of the next block to execute.
    head: u64,
    /// Round of the previous proposal.
    parent_round: u64,
    parent_header: Option<Header>,
    parent_bft_id: B256,
}

impl std::fmt::Debug for Runloop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runloop").field("head", &self.head).finish()
    }
}

impl Runloop {
    /// Opens (or creates) the storage pool at `db_path` and prepares to
    /// execute blocks from `ledger_path`.
    pub fn new(chain_id: u64, ledger_path: &Path, db_path: &Path) -> Result<Self, RunloopError> {
        // Prefer the io_uring runtime; fall back to positioned file I/O on
        // kernels without it.
        let io = AsyncIo::new(AsyncIoConfig::default())
            .inspect_err(|err| warn!(target: "runloop", %err, "io_uring unavailable"))
            .ok()
            .map(Arc::new);
        let store = PoolNodeStore::open(db_path, io).map_err(RunloopError::Fatal)?;
        let trie = Arc::new(TrieDb::new(store));
        let ring = EventRing::new(12, 20);
        let recorder = EventRecorder::new(ring);

        info!(
            target: "runloop",
            chain_id,
            ledger = %ledger_path.display(),
            db = %db_path.display(),
            event_socket = %monad_events::event_socket_path().display(),
            "runloop ready"
        );

        Ok(Self {
            chain: Arc::new(MonadChain::new(chain_id, MonadRevision::MonadFour)),
            evm: Arc::new(NoopEvm),
            trie,
            pool: PriorityPool::new(
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            ),
            recorder,
            block_hashes: BlockHashBuffer::new(),
            ledger_path: ledger_path.to_path_buf(),
            head: 0,
            parent_round: 0,
            parent_header: None,
            parent_bft_id: B256::ZERO,
        })
    }

    /// Number of the next block to execute.
    pub const fn head(&self) -> u64 {
        self.head
    }

    /// The most recently executed header, if any block has run.
    pub const fn latest_header(&self) -> Option<&Header> {
        self.parent_header.as_ref()
    }

    fn ledger_entry(&self, number: u64) -> Result<Option<LedgerEntry>, RunloopError> {
        let path = self.ledger_path.join(format!("block_{number:08}.rlp"));
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)
            .map_err(|e| RunloopError::Fatal(format!("read {}: {e}", path.display())))?;
        LedgerEntry::decode(&mut raw.as_slice())
            .map(Some)
            .map_err(|e| RunloopError::InvalidBlock(format!("{}: {e}", path.display())))
    }

    fn fresh_block_state(
        &self,
    ) -> Arc<BlockState<TrieBackedDb<PoolNodeStore>>> {
        let db = TrieBackedDb::new(Arc::clone(&self.trie));
        db.set_parent(self.head.checked_sub(1));
        Arc::new(BlockState::new(db))
    }

    /// Executes and finalizes `n_blocks` blocks. Ledger entries drive
    /// execution when present; otherwise the runloop proposes empty blocks
    /// itself (local chains, benchmarks).
    pub fn run(&mut self, n_blocks: u64) -> Result<(), RunloopError> {
        for _ in 0..n_blocks {
            match self.ledger_entry(self.head)? {
                Some(entry) => self.execute_ledger_block(entry)?,
                None => self.execute_self_proposed_block()?,
            }
        }
        Ok(())
    }

    fn execute_ledger_block(&mut self, entry: LedgerEntry) -> Result<(), RunloopError> {
        let consensus_header = entry.header;
        let body = entry.body;
        if body.id() != consensus_header.block_body_id {
            return Err(RunloopError::InvalidBlock(format!(
                "body id mismatch at block {}",
                consensus_header.number()
            )));
        }
        if consensus_header.number() != self.head {
            return Err(RunloopError::InvalidBlock(format!(
                "expected block {}, ledger carries {}",
                self.head,
                consensus_header.number()
            )));
        }
        if self.parent_bft_id != B256::ZERO
            && consensus_header.parent_bft_id != self.parent_bft_id
        {
            return Err(RunloopError::InvalidBlock(format!(
                "parent bft id mismatch at block {}",
                consensus_header.number()
            )));
        }

        let round = consensus_header.round;
        let block = Block::from_consensus(&consensus_header, body);
        record_block_exec_start(
            &self.recorder,
            consensus_header.bft_id(),
            U256::from(self.chain.chain_id),
            self.parent_header.as_ref().map(Header::hash_slow).unwrap_or_default(),
            &block.header,
            round,
            0,
            block.transactions.len(),
        );

        let executed = self.execute_inner(&block, &consensus_header);
        let reject_reason = executed.as_ref().err().copied();
        let result = record_block_exec_result(
            &self.recorder,
            executed.map_err(|err| {
                let (domain_id, status_code) = err.reject_code();
                BlockRejectInfo { domain_id, status_code }
            }),
        );
        let output = match result {
            Ok(output) => output,
            Err(reject) => {
                warn!(target: "runloop", ?reject, number = self.head, "block rejected");
                return Err(RunloopError::Rejected(
                    reject_reason.expect("reject implies an error"),
                ));
            }
        };

        finalize_block(&self.trie, self.head, round).map_err(RunloopError::Rejected)?;
        self.advance(output, round, consensus_header.bft_id());
        Ok(())
    }

    /// A self-proposed empty block: execute, commit, stamp the header from
    /// the computed outputs, finalize.
    fn execute_self_proposed_block(&mut self) -> Result<(), RunloopError> {
        let round = self.parent_round + 1;
        let header = Header {
            number: self.head,
            parent_hash: self.parent_header.as_ref().map(Header::hash_slow).unwrap_or_default(),
            gas_limit: 30_000_000,
            timestamp: self.parent_header.as_ref().map(|h| h.timestamp + 1).unwrap_or_default(),
            base_fee_per_gas: Some(0),
            ..Default::default()
        };
        let block = Block { header, ..Default::default() };

        let block_state = self.fresh_block_state();
        self.trie.set_block_and_round(self.head.saturating_sub(1), None);
        let metrics = Arc::new(BlockMetrics::new());
        let fee_buffer = Arc::new(FeeBuffer::new());
        let results = execute_block(
            &self.chain,
            &self.evm,
            &block,
            Vec::new(),
            &block_state,
            &Arc::new(self.block_hashes.clone()),
            &self.pool,
            &metrics,
            &fee_buffer,
        )
        .map_err(RunloopError::Rejected)?;

        let outputs = commit_block_outputs(
            &self.chain,
            &self.trie,
            self.head,
            round,
            None,
            self.parent_header.as_ref(),
            &block,
            &results,
            unwrap_block_state(block_state),
        )
        .map_err(RunloopError::Rejected)?;

        let eth_header = outputs.into_header(&block.header);
        let eth_block_hash = eth_header.hash_slow();
        finalize_block(&self.trie, self.head, round).map_err(RunloopError::Rejected)?;
        self.advance(
            BlockExecOutput { eth_header, eth_block_hash },
            round,
            B256::ZERO,
        );
        Ok(())
    }

    fn execute_inner(
        &mut self,
        block: &Block,
        consensus_header: &ConsensusBlockHeader,
    ) -> Result<BlockExecOutput, BlockError> {
        let block_state = self.fresh_block_state();
        self.trie
            .set_block_and_round(self.head.saturating_sub(1), None);

        let senders = recover_senders(&block.transactions, &self.pool);
        let metrics = Arc::new(BlockMetrics::new());
        let fee_buffer = Arc::new(FeeBuffer::new());
        let results = execute_block(
            &self.chain,
            &self.evm,
            block,
            senders,
            &block_state,
            &Arc::new(self.block_hashes.clone()),
            &self.pool,
            &metrics,
            &fee_buffer,
        )?;

        commit_block(
            &self.chain,
            &self.trie,
            consensus_header,
            self.parent_header.as_ref(),
            block,
            &results,
            unwrap_block_state(block_state),
        )
    }

    fn advance(&mut self, output: BlockExecOutput, round: u64, bft_id: B256) {
        self.block_hashes.push(output.eth_header.number, output.eth_block_hash);
        self.parent_header = Some(output.eth_header);
        self.parent_round = round;
        self.parent_bft_id = bft_id;
        self.head += 1;
    }

    /// Overwrites the balance of `address` as a finalized single-update
    /// block version. Intended for local-chain setup.
    pub fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), RunloopError> {
        let db = TrieBackedDb::new(Arc::clone(&self.trie));
        db.set_parent(self.head.checked_sub(1));
        let mut account = db.read_account(address).unwrap_or_default();
        account.balance = balance;

        self.trie
            .commit(
                vec![TrieUpdate::put(
                    account_path(alloy_primitives::keccak256(address)),
                    encode_account(&account),
                )],
                self.head,
                None,
            )
            .map_err(|e| RunloopError::Fatal(e.to_string()))?;
        self.head += 1;
        Ok(())
    }

    /// The balance of `address` at the head version.
    pub fn get_balance(&self, address: &Address) -> U256 {
        let db = TrieBackedDb::new(Arc::clone(&self.trie));
        db.set_parent(self.head.checked_sub(1));
        db.read_account(address).map(|account| account.balance).unwrap_or_default()
    }

    /// The state root of the head version.
    pub fn get_state_root(&self) -> B256 {
        self.head
            .checked_sub(1)
            .and_then(|head| self.trie.state_root_at(head).ok().flatten())
            .unwrap_or(monad_mpt::EMPTY_ROOT_HASH)
    }

    /// Writes a ledger entry for later replay. Used by tooling and tests.
    pub fn write_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), RunloopError> {
        let path =
            self.ledger_path.join(format!("block_{number:08}.rlp", number = entry.header.number()));
        let mut encoded = Vec::with_capacity(entry.length());
        entry.encode(&mut encoded);
        std::fs::write(&path, encoded)
            .map_err(|e| RunloopError::Fatal(format!("write {}: {e}", path.display())))
    }
}

/// Workers release their block-state handles right after publishing their
/// outcome; spin out the tail of that race before taking sole ownership.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_proposed_chain_advances() {
        let ledger = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let mut runloop =
            Runloop::new(1, ledger.path(), &db.path().join("pool.db")).unwrap();

        runloop.run(3).unwrap();
        assert_eq!(runloop.head(), 3);
        assert_ne!(runloop.get_state_root(), B256::ZERO);
    }

    #[test]
    fn test_ledger_replay_matches_self_proposal() {
        use monad_primitives::QuorumCertificate;

        // Chain A proposes one empty block to itself.
        let ledger_a = tempfile::tempdir().unwrap();
        let db_a = tempfile::tempdir().unwrap();
        let mut chain_a = Runloop::new(1, ledger_a.path(), &db_a.path().join("pool.db")).unwrap();
        chain_a.run(1).unwrap();
        let executed = chain_a.latest_header().unwrap().clone();

        // Chain B replays that block from its ledger.
        let body = ConsensusBlockBody::default();
        let entry = LedgerEntry {
            header: ConsensusBlockHeader {
                parent_bft_id: B256::ZERO,
                round: 1,
                parent_round: 0,
                block_body_id: body.id(),
                proposed_eth_header: executed,
                qc: QuorumCertificate::default(),
            },
            body,
        };

        let ledger_b = tempfile::tempdir().unwrap();
        let db_b = tempfile::tempdir().unwrap();
        let mut chain_b = Runloop::new(1, ledger_b.path(), &db_b.path().join("pool.db")).unwrap();
        chain_b.write_ledger_entry(&entry).unwrap();
        chain_b.run(1).unwrap();

        assert_eq!(chain_b.head(), 1);
        assert_eq!(chain_a.get_state_root(), chain_b.get_state_root());
    }

    #[test]
    fn test_corrupt_body_id_is_invalid_input() {
        use monad_primitives::QuorumCertificate;

        let ledger = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let mut runloop = Runloop::new(1, ledger.path(), &db.path().join("pool.db")).unwrap();

        let entry = LedgerEntry {
            header: ConsensusBlockHeader {
                parent_bft_id: B256::ZERO,
                round: 1,
                parent_round: 0,
                block_body_id: B256::repeat_byte(0xBD),
                proposed_eth_header: Header { number: 0, ..Default::default() },
                qc: QuorumCertificate::default(),
            },
            body: ConsensusBlockBody::default(),
        };
        runloop.write_ledger_entry(&entry).unwrap();

        assert!(matches!(runloop.run(1), Err(RunloopError::InvalidBlock(_))));
    }

    #[test]
    fn test_set_and_get_balance() {
        let ledger = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let mut runloop =
            Runloop::new(1, ledger.path(), &db.path().join("pool.db")).unwrap();

        let address = Address::repeat_byte(0xAB);
        assert_eq!(runloop.get_balance(&address), U256::ZERO);
        runloop.set_balance(&address, U256::from(1_000u64)).unwrap();
        assert_eq!(runloop.get_balance(&address), U256::from(1_000u64));

        // Balances survive further empty blocks.
        runloop.run(2).unwrap();
        assert_eq!(runloop.get_balance(&address), U256::from(1_000u64));
    }
}
