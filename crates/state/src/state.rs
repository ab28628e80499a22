//! Per-transaction state: a fork of [BlockState] with a revert journal,
//! warm/cold access tracking and the EVMC host surface plus the engine's
//! extensions (page storage, transient storage, block storage).
//!
//! [BlockState]: crate::BlockState

use crate::{block_state::BlockState, db::Db, db::BLOCK_STORAGE_INCARNATION};
use alloy_primitives::{keccak256, Address, Bytes, Log, LogData, B256, U256};
use monad_primitives::{Account, BlockHashBuffer, NULL_CODE_HASH};
use std::collections::{HashMap, HashSet};

/// Gas refunded for clearing a storage slot (EIP-3529).
const SSTORE_CLEARS_SCHEDULE: u64 = 4_800;

/// Outcome of a storage write, per the EVMC taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum StorageStatus {
    Assigned,
    Added,
    Deleted,
    Modified,
    DeletedAdded,
    ModifiedDeleted,
    DeletedRestored,
    AddedDeleted,
    ModifiedRestored,
}

/// Whether an account or slot was warm at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    /// First access in this transaction.
    Cold,
    /// Previously accessed (or pre-warmed via access list).
    Warm,
}

/// The kind of a call frame, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CallKind {
    Call,
    DelegateCall,
    CallCode,
    StaticCall,
    Create,
    Create2,
}

/// One enter/exit record of the call tree, emitted to the event ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// The call kind.
    pub kind: CallKind,
    /// Call depth, 0 for the top-level message.
    pub depth: u32,
    /// The caller.
    pub sender: Address,
    /// The callee (or the created address).
    pub recipient: Address,
    /// Value transferred.
    pub value: U256,
    /// Gas available to the frame.
    pub gas: u64,
    /// Length of the input data.
    pub input_len: usize,
}

/// Warm/cold access counters, aggregated into block metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    /// Warm account accesses.
    pub warm_account: u64,
    /// Cold account accesses.
    pub cold_account: u64,
    /// Warm storage accesses.
    pub warm_storage: u64,
    /// Cold storage accesses.
    pub cold_storage: u64,
}

/// Everything a transaction read from its [BlockState] snapshot. Merge
/// validation replays these against the current committed view; any
/// mismatch forces re-execution.
///
/// [BlockState]: crate::BlockState
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    /// Account views, as first observed.
    pub accounts: HashMap<Address, Option<Account>>,
    /// Slot views keyed by `(address, incarnation, slot)`.
    pub storage: HashMap<(Address, u64, B256), B256>,
}

/// Everything a transaction wants to install into [BlockState].
///
/// [BlockState]: crate::BlockState
#[derive(Debug, Clone, Default)]
pub struct TxWrites {
    /// Post-transaction account states. `None` removes the account.
    pub accounts: HashMap<Address, Option<Account>>,
    /// Slot writes as `(incarnation, slot, value)` per address.
    pub storage: HashMap<Address, Vec<(u64, B256, B256)>>,
    /// Newly deployed code.
    pub code: Vec<(B256, Bytes)>,
    /// Logs in emission order.
    pub logs: Vec<Log>,
    /// Call trace frames.
    pub call_frames: Vec<CallFrame>,
    /// Accumulated gas refund.
    pub refund: u64,
    /// Access counters.
    pub access_stats: AccessStats,
}

/// Journal entries carry the previous value so [State::revert] can undo.
#[derive(Debug, Clone)]
enum JournalEntry {
    AccountCreated { address: Address },
    AccountChanged { address: Address, prev: Account },
    AccountDestroyed { address: Address },
    DestructionCancelled { address: Address },
    StorageChanged { address: Address, incarnation: u64, key: B256, prev: B256 },
    TransientChanged { address: Address, key: B256, prev: B256 },
    LogEmitted,
    AccountAccessed { address: Address },
    StorageAccessed { address: Address, key: B256 },
    Touched { address: Address },
    RefundChanged { prev: u64 },
}

/// A per-transaction fork of the block state.
#[derive(Debug)]
pub struct State<'a, D: Db> {
    block: &'a BlockState<D>,
    block_hashes: Option<&'a BlockHashBuffer>,
    reads: ReadSet,

    accounts: HashMap<Address, Option<Account>>,
    /// Current slot values keyed by `(address, incarnation, slot)`.
    storage: HashMap<(Address, u64, B256), B256>,
    /// Start-of-transaction slot values; the refund/status baseline.
    original_storage: HashMap<(Address, u64, B256), B256>,
    transient: HashMap<(Address, B256), B256>,
    new_code: Vec<(B256, Bytes)>,

    accessed_accounts: HashSet<Address>,
    accessed_storage: HashSet<(Address, B256)>,
    destructs: HashSet<Address>,
    created: HashSet<Address>,
    touched: HashSet<Address>,
    logs: Vec<Log>,
    call_frames: Vec<CallFrame>,
    refund: u64,
    stats: AccessStats,

    journal: Vec<JournalEntry>,
    checkpoints: Vec<usize>,
}

impl<'a, D: Db> State<'a, D> {
    /// Forks a fresh transaction state off `block`.
    pub fn new(block: &'a BlockState<D>) -> Self {
        Self {
            block,
            block_hashes: None,
            reads: ReadSet::default(),
            accounts: HashMap::new(),
            storage: HashMap::new(),
            original_storage: HashMap::new(),
            transient: HashMap::new(),
            new_code: Vec::new(),
            accessed_accounts: HashSet::new(),
            accessed_storage: HashSet::new(),
            destructs: HashSet::new(),
            created: HashSet::new(),
            touched: HashSet::new(),
            logs: Vec::new(),
            call_frames: Vec::new(),
            refund: 0,
            stats: AccessStats::default(),
            journal: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Attaches the recent-block-hash window for `BLOCKHASH` service.
    pub fn with_block_hashes(mut self, block_hashes: &'a BlockHashBuffer) -> Self {
        self.block_hashes = Some(block_hashes);
        self
    }

    /// The reads this transaction has performed so far.
    pub const fn reads(&self) -> &ReadSet {
        &self.reads
    }

    /// The hash of a recent block, zero outside the 256-block window.
    pub fn get_block_hash(&self, number: u64) -> B256 {
        self.block_hashes.map(|hashes| hashes.get(number)).unwrap_or_default()
    }

    fn load_account(&mut self, address: &Address) -> Option<Account> {
        if let Some(cached) = self.accounts.get(address) {
            return *cached;
        }
        let loaded = self.block.recent_account(address);
        self.reads.accounts.insert(*address, loaded);
        self.accounts.insert(*address, loaded);
        loaded
    }

    fn account_mut_or_create(&mut self, address: &Address) -> &mut Account {
        let existing = self.load_account(address);
        match existing {
            Some(prev) => {
                self.journal.push(JournalEntry::AccountChanged { address: *address, prev });
            }
            None => {
                self.journal.push(JournalEntry::AccountCreated { address: *address });
                self.accounts.insert(*address, Some(Account::default()));
            }
        }
        self.accounts.get_mut(address).expect("just loaded").as_mut().expect("just created")
    }

    fn incarnation_of(&mut self, address: &Address) -> u64 {
        self.load_account(address).map(|account| account.incarnation).unwrap_or_default()
    }

    // ---- EVMC host surface -------------------------------------------------

    /// Whether an account exists at `address`.
    pub fn account_exists(&mut self, address: &Address) -> bool {
        self.load_account(address).is_some()
    }

    /// The balance of `address`, zero if absent.
    pub fn get_balance(&mut self, address: &Address) -> U256 {
        self.load_account(address).map(|account| account.balance).unwrap_or_default()
    }

    /// Sets the balance of `address`, creating the account if needed.
    pub fn set_balance(&mut self, address: &Address, balance: U256) {
        self.account_mut_or_create(address).balance = balance;
    }

    /// Adds `amount` to the balance of `address`.
    pub fn add_balance(&mut self, address: &Address, amount: U256) {
        let account = self.account_mut_or_create(address);
        account.balance = account.balance.saturating_add(amount);
    }

    /// Subtracts `amount`; the caller has validated sufficiency.
    pub fn subtract_balance(&mut self, address: &Address, amount: U256) {
        let account = self.account_mut_or_create(address);
        account.balance = account.balance.saturating_sub(amount);
    }

    /// The nonce of `address`, zero if absent.
    pub fn get_nonce(&mut self, address: &Address) -> u64 {
        self.load_account(address).map(|account| account.nonce).unwrap_or_default()
    }

    /// Sets the nonce of `address`.
    pub fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.account_mut_or_create(address).nonce = nonce;
    }

    /// The code hash of `address`, zero if the account is absent.
    pub fn get_code_hash(&mut self, address: &Address) -> B256 {
        self.load_account(address).map(|account| account.code_hash).unwrap_or_default()
    }

    /// The bytecode of `address`, empty if none.
    pub fn get_code(&mut self, address: &Address) -> Bytes {
        let Some(account) = self.load_account(address) else {
            return Bytes::new();
        };
        if !account.has_code() {
            return Bytes::new();
        }
        self.new_code
            .iter()
            .find(|(hash, _)| *hash == account.code_hash)
            .map(|(_, code)| code.clone())
            .or_else(|| self.block.recent_code(&account.code_hash))
            .unwrap_or_default()
    }

    /// The code size of `address`.
    pub fn get_code_size(&mut self, address: &Address) -> usize {
        self.get_code(address).len()
    }

    /// Copies code of `address` starting at `offset` into `out`, returning
    /// the number of bytes written.
    pub fn copy_code(&mut self, address: &Address, offset: usize, out: &mut [u8]) -> usize {
        let code = self.get_code(address);
        if offset >= code.len() {
            return 0;
        }
        let n = out.len().min(code.len() - offset);
        out[..n].copy_from_slice(&code[offset..offset + n]);
        n
    }

    /// Installs `code` on `address` and registers the code object under its
    /// keccak hash.
    pub fn set_code(&mut self, address: &Address, code: Bytes) {
        let code_hash = if code.is_empty() { NULL_CODE_HASH } else { keccak256(&code) };
        if code_hash != NULL_CODE_HASH {
            self.new_code.push((code_hash, code));
        }
        self.account_mut_or_create(address).code_hash = code_hash;
    }

    /// Marks `address` as created by this transaction, bumping the
    /// incarnation so storage written under previous incarnations reads
    /// zero. Recreation supersedes a same-transaction destruction: the
    /// account survives at the fresh incarnation.
    pub fn create_contract(&mut self, address: &Address) {
        let next_incarnation = match self.load_account(address) {
            Some(account) => {
                account.incarnation + u64::from(self.destructs.contains(address))
            }
            None => self.block.next_incarnation(address),
        };
        if self.destructs.remove(address) {
            self.journal.push(JournalEntry::DestructionCancelled { address: *address });
        }
        match self.load_account(address) {
            Some(prev) => {
                self.journal.push(JournalEntry::AccountChanged { address: *address, prev });
                let account = self.accounts.get_mut(address).expect("loaded").as_mut().expect("some");
                account.incarnation = next_incarnation;
                account.code_hash = NULL_CODE_HASH;
            }
            None => {
                self.journal.push(JournalEntry::AccountCreated { address: *address });
                self.accounts.insert(
                    *address,
                    Some(Account { incarnation: next_incarnation, ..Default::default() }),
                );
            }
        }
        self.created.insert(*address);
    }

    /// Reads a storage slot at the account's current incarnation.
    pub fn get_storage(&mut self, address: &Address, key: &B256) -> B256 {
        let incarnation = self.incarnation_of(address);
        self.slot_value(address, incarnation, key)
    }

    fn slot_value(&mut self, address: &Address, incarnation: u64, key: &B256) -> B256 {
        let slot = (*address, incarnation, *key);
        if let Some(value) = self.storage.get(&slot) {
            return *value;
        }
        let value = self.block.recent_storage(address, incarnation, key);
        self.reads.storage.insert(slot, value);
        self.original_storage.insert(slot, value);
        self.storage.insert(slot, value);
        value
    }

    /// Writes a storage slot and classifies the transition.
    pub fn set_storage(&mut self, address: &Address, key: &B256, value: B256) -> StorageStatus {
        let incarnation = self.incarnation_of(address);
        self.write_slot(address, incarnation, key, value)
    }

    fn write_slot(
        &mut self,
        address: &Address,
        incarnation: u64,
        key: &B256,
        value: B256,
    ) -> StorageStatus {
        let current = self.slot_value(address, incarnation, key);
        let slot = (*address, incarnation, *key);
        let original = *self.original_storage.get(&slot).expect("populated by slot_value");

        if current == value {
            return StorageStatus::Assigned;
        }

        self.journal.push(JournalEntry::StorageChanged {
            address: *address,
            incarnation,
            key: *key,
            prev: current,
        });
        self.storage.insert(slot, value);

        let status = storage_status(original, current, value);
        match status {
            StorageStatus::Deleted | StorageStatus::ModifiedDeleted => {
                self.add_refund(SSTORE_CLEARS_SCHEDULE);
            }
            StorageStatus::DeletedAdded | StorageStatus::DeletedRestored => {
                self.remove_refund(SSTORE_CLEARS_SCHEDULE);
            }
            _ => {}
        }
        status
    }

    /// Reads a transient storage slot (EIP-1153).
    pub fn get_transient_storage(&mut self, address: &Address, key: &B256) -> B256 {
        self.transient.get(&(*address, *key)).copied().unwrap_or_default()
    }

    /// Writes a transient storage slot (EIP-1153).
    pub fn set_transient_storage(&mut self, address: &Address, key: &B256, value: B256) {
        let prev = self.get_transient_storage(address, key);
        if prev == value {
            return;
        }
        self.journal.push(JournalEntry::TransientChanged { address: *address, key: *key, prev });
        self.transient.insert((*address, *key), value);
    }

    /// Reads a block storage slot: persistent storage outside incarnation
    /// scoping, used by system contracts.
    pub fn get_block_storage(&mut self, address: &Address, key: &B256) -> B256 {
        self.slot_value(address, BLOCK_STORAGE_INCARNATION, key)
    }

    /// Writes a block storage slot.
    pub fn set_block_storage(&mut self, address: &Address, key: &B256, value: B256) {
        self.write_slot(address, BLOCK_STORAGE_INCARNATION, key, value);
    }

    /// Records an account access (EIP-2929), returning its prior warmth.
    pub fn access_account(&mut self, address: &Address) -> AccessStatus {
        if self.accessed_accounts.insert(*address) {
            self.journal.push(JournalEntry::AccountAccessed { address: *address });
            self.stats.cold_account += 1;
            AccessStatus::Cold
        } else {
            self.stats.warm_account += 1;
            AccessStatus::Warm
        }
    }

    /// Records a storage access (EIP-2929), returning its prior warmth.
    pub fn access_storage(&mut self, address: &Address, key: &B256) -> AccessStatus {
        if self.accessed_storage.insert((*address, *key)) {
            self.journal.push(JournalEntry::StorageAccessed { address: *address, key: *key });
            self.stats.cold_storage += 1;
            AccessStatus::Cold
        } else {
            self.stats.warm_storage += 1;
            AccessStatus::Warm
        }
    }

    /// SELFDESTRUCT: moves the whole balance to `beneficiary` and, when the
    /// account was created in this transaction or pre-Cancun semantics are
    /// in force, schedules destruction. Returns whether the account was
    /// newly added to the destruct set.
    pub fn selfdestruct(
        &mut self,
        address: &Address,
        beneficiary: &Address,
        only_if_created: bool,
    ) -> bool {
        let balance = self.get_balance(address);
        if beneficiary != address {
            self.add_balance(beneficiary, balance);
        }
        self.set_balance(address, U256::ZERO);
        self.touch(beneficiary);

        if only_if_created && !self.created.contains(address) {
            return false;
        }
        if self.destructs.insert(*address) {
            self.journal.push(JournalEntry::AccountDestroyed { address: *address });
            true
        } else {
            false
        }
    }

    /// Appends a log.
    pub fn store_log(&mut self, address: &Address, topics: Vec<B256>, data: Bytes) {
        self.journal.push(JournalEntry::LogEmitted);
        self.logs.push(Log { address: *address, data: LogData::new_unchecked(topics, data) });
    }

    /// Marks `address` as touched for EIP-161 empty-account clearing.
    pub fn touch(&mut self, address: &Address) {
        if self.touched.insert(*address) {
            self.journal.push(JournalEntry::Touched { address: *address });
        }
    }

    /// Records a call trace frame.
    pub fn emit_call_frame(&mut self, frame: CallFrame) {
        self.call_frames.push(frame);
    }

    /// The authoritative merged view of an account, bypassing this fork's
    /// local writes. Used by the validator to re-check fee debits from
    /// earlier transactions.
    pub fn recent_account(&mut self, address: &Address) -> Option<Account> {
        let recent = self.block.recent_account(address);
        // Revalidated at merge time like any other read.
        self.reads.accounts.entry(*address).or_insert(recent);
        recent
    }

    /// Accumulated refund counter.
    pub const fn refund(&self) -> u64 {
        self.refund
    }

    fn add_refund(&mut self, amount: u64) {
        self.journal.push(JournalEntry::RefundChanged { prev: self.refund });
        self.refund += amount;
    }

    fn remove_refund(&mut self, amount: u64) {
        self.journal.push(JournalEntry::RefundChanged { prev: self.refund });
        self.refund = self.refund.saturating_sub(amount);
    }

    // ---- checkpointing -----------------------------------------------------

    /// Opens a checkpoint. Each checkpoint is closed by exactly one
    /// [Self::commit] or [Self::revert]; checkpoints nest.
    pub fn checkpoint(&mut self) {
        self.checkpoints.push(self.journal.len());
    }

    /// Discards the innermost checkpoint, keeping its changes.
    pub fn commit(&mut self) {
        self.checkpoints.pop().expect("commit without checkpoint");
    }

    /// Rolls every change back to the innermost checkpoint.
    pub fn revert(&mut self) {
        let mark = self.checkpoints.pop().expect("revert without checkpoint");
        while self.journal.len() > mark {
            match self.journal.pop().expect("journal bounded by mark") {
                JournalEntry::AccountCreated { address } => {
                    self.accounts.insert(address, None);
                    self.created.remove(&address);
                }
                JournalEntry::AccountChanged { address, prev } => {
                    self.accounts.insert(address, Some(prev));
                }
                JournalEntry::AccountDestroyed { address } => {
                    self.destructs.remove(&address);
                }
                JournalEntry::DestructionCancelled { address } => {
                    self.destructs.insert(address);
                }
                JournalEntry::StorageChanged { address, incarnation, key, prev } => {
                    self.storage.insert((address, incarnation, key), prev);
                }
                JournalEntry::TransientChanged { address, key, prev } => {
                    self.transient.insert((address, key), prev);
                }
                JournalEntry::LogEmitted => {
                    self.logs.pop();
                }
                JournalEntry::AccountAccessed { address } => {
                    self.accessed_accounts.remove(&address);
                }
                JournalEntry::StorageAccessed { address, key } => {
                    self.accessed_storage.remove(&(address, key));
                }
                JournalEntry::Touched { address } => {
                    self.touched.remove(&address);
                }
                JournalEntry::RefundChanged { prev } => {
                    self.refund = prev;
                }
            }
        }
    }

    /// Number of open checkpoints.
    pub fn open_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    // ---- transaction completion -------------------------------------------

    /// Finishes the transaction: applies destructions and EIP-161 clearing,
    /// and splits the fork into its read set and write set.
    pub fn into_parts(mut self) -> (ReadSet, TxWrites) {
        assert!(self.checkpoints.is_empty(), "unbalanced checkpoints at transaction end");

        // Destroyed accounts disappear.
        for address in &self.destructs {
            self.accounts.insert(*address, None);
        }
        // Touched-empty accounts are cleared (EIP-161).
        for address in &self.touched {
            if let Some(Some(account)) = self.accounts.get(address) {
                if account.is_empty() {
                    self.accounts.insert(*address, None);
                }
            }
        }

        let mut writes = TxWrites {
            code: self.new_code,
            logs: self.logs,
            call_frames: self.call_frames,
            refund: self.refund,
            access_stats: self.stats,
            ..Default::default()
        };

        for (address, account) in &self.accounts {
            if self.reads.accounts.get(address) != Some(account) {
                writes.accounts.insert(*address, *account);
            }
        }
        for ((address, incarnation, key), value) in &self.storage {
            let unchanged = self.original_storage.get(&(*address, *incarnation, *key))
                == Some(value);
            if !unchanged {
                writes
                    .storage
                    .entry(*address)
                    .or_default()
                    .push((*incarnation, *key, *value));
            }
        }

        (self.reads, writes)
    }
}

/// Classifies a storage transition per the EVMC status taxonomy.
/// `original` is the start-of-transaction value, `current` the value before
/// this write, `value` the value being written.
fn storage_status(original: B256, current: B256, value: B256) -> StorageStatus {
    let zero = B256::ZERO;
    if original == current {
        // Clean slot.
        if original == zero {
            StorageStatus::Added
        } else if value == zero {
            StorageStatus::Deleted
        } else {
            StorageStatus::Modified
        }
    } else {
        // Dirty slot.
        if original == zero {
            if value == zero {
                StorageStatus::AddedDeleted
            } else {
                StorageStatus::Assigned
            }
        } else if current == zero {
            if value == original {
                StorageStatus::DeletedRestored
            } else {
                StorageStatus::DeletedAdded
            }
        } else if value == zero {
            StorageStatus::ModifiedDeleted
        } else if value == original {
            StorageStatus::ModifiedRestored
        } else {
            StorageStatus::Assigned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::InMemoryDb, BlockState};

    fn setup() -> (InMemoryDb, Address) {
        let mut db = InMemoryDb::default();
        let address = Address::repeat_byte(0xAB);
        db.insert_account(
            address,
            Account { balance: U256::from(1_000u64), nonce: 1, ..Default::default() },
        );
        (db, address)
    }

    #[test]
    fn test_balance_read_through_layers() {
        let (db, address) = setup();
        let block = BlockState::new(db);
        let mut state = State::new(&block);
        assert_eq!(state.get_balance(&address), U256::from(1_000u64));
        assert_eq!(state.get_balance(&Address::ZERO), U256::ZERO);
    }

    #[test]
    fn test_checkpoint_revert_restores_everything() {
        let (db, address) = setup();
        let block = BlockState::new(db);
        let mut state = State::new(&block);
        let key = B256::with_last_byte(1);

        state.checkpoint();
        state.set_balance(&address, U256::from(5u64));
        state.set_storage(&address, &key, B256::with_last_byte(9));
        state.set_transient_storage(&address, &key, B256::with_last_byte(7));
        state.store_log(&address, vec![], Bytes::new());
        assert_eq!(state.access_account(&address), AccessStatus::Cold);
        state.revert();

        assert_eq!(state.get_balance(&address), U256::from(1_000u64));
        assert_eq!(state.get_storage(&address, &key), B256::ZERO);
        assert_eq!(state.get_transient_storage(&address, &key), B256::ZERO);
        assert!(state.logs.is_empty());
        // The access set was rolled back, so the account is cold again.
        assert_eq!(state.access_account(&address), AccessStatus::Cold);
    }

    #[test]
    fn test_nested_checkpoints() {
        let (db, address) = setup();
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        state.checkpoint();
        state.set_balance(&address, U256::from(10u64));
        state.checkpoint();
        state.set_balance(&address, U256::from(20u64));
        state.revert();
        assert_eq!(state.get_balance(&address), U256::from(10u64));
        state.commit();
        assert_eq!(state.get_balance(&address), U256::from(10u64));
    }

    #[test]
    fn test_storage_status_transitions() {
        let zero = B256::ZERO;
        let a = B256::with_last_byte(1);
        let b = B256::with_last_byte(2);

        assert_eq!(storage_status(zero, zero, a), StorageStatus::Added);
        assert_eq!(storage_status(a, a, zero), StorageStatus::Deleted);
        assert_eq!(storage_status(a, a, b), StorageStatus::Modified);
        assert_eq!(storage_status(zero, a, zero), StorageStatus::AddedDeleted);
        assert_eq!(storage_status(a, zero, a), StorageStatus::DeletedRestored);
        assert_eq!(storage_status(a, zero, b), StorageStatus::DeletedAdded);
        assert_eq!(storage_status(a, b, zero), StorageStatus::ModifiedDeleted);
        assert_eq!(storage_status(a, b, a), StorageStatus::ModifiedRestored);
    }

    #[test]
    fn test_refund_on_clear() {
        let (mut db, address) = setup();
        let key = B256::with_last_byte(3);
        db.insert_slot(address, 0, key, B256::with_last_byte(1));
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        state.checkpoint();
        assert_eq!(state.set_storage(&address, &key, B256::ZERO), StorageStatus::Deleted);
        assert_eq!(state.refund(), SSTORE_CLEARS_SCHEDULE);
        state.commit();
    }

    #[test]
    fn test_selfdestruct_transfers_balance() {
        let (db, address) = setup();
        let beneficiary = Address::repeat_byte(0xBE);
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        state.checkpoint();
        // Pre-Cancun semantics: destruction unconditional.
        assert!(state.selfdestruct(&address, &beneficiary, false));
        assert!(!state.selfdestruct(&address, &beneficiary, false));
        state.commit();

        assert_eq!(state.get_balance(&beneficiary), U256::from(1_000u64));
        let (_, writes) = state.into_parts();
        assert_eq!(writes.accounts.get(&address), Some(&None));
    }

    #[test]
    fn test_cancun_selfdestruct_only_if_created() {
        let (db, address) = setup();
        let beneficiary = Address::repeat_byte(0xBE);
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        state.checkpoint();
        assert!(!state.selfdestruct(&address, &beneficiary, true));
        state.commit();
        let (_, writes) = state.into_parts();
        // Balance moved but the account survived.
        assert!(matches!(writes.accounts.get(&address), Some(Some(_))));
    }

    #[test]
    fn test_incarnation_bump_zeroes_storage() {
        let (mut db, address) = setup();
        let key = B256::with_last_byte(4);
        db.insert_slot(address, 0, key, B256::with_last_byte(0xEE));
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        state.checkpoint();
        assert_eq!(state.get_storage(&address, &key), B256::with_last_byte(0xEE));
        state.selfdestruct(&address, &Address::ZERO, false);
        state.create_contract(&address);
        // New incarnation: prior storage reads zero.
        assert_eq!(state.get_storage(&address, &key), B256::ZERO);
        state.commit();

        let (_, writes) = state.into_parts();
        let account = writes.accounts.get(&address).unwrap().unwrap();
        assert_eq!(account.incarnation, 1);
    }

    #[test]
    fn test_into_parts_only_reports_changes() {
        let (db, address) = setup();
        let other = Address::repeat_byte(0xCD);
        let block = BlockState::new(db);
        let mut state = State::new(&block);

        // Pure read: no write entry.
        state.get_balance(&address);
        state.checkpoint();
        state.add_balance(&other, U256::from(5u64));
        state.commit();

        let (reads, writes) = state.into_parts();
        assert!(reads.accounts.contains_key(&address));
        assert!(!writes.accounts.contains_key(&address));
        assert_eq!(writes.accounts.get(&other).unwrap().unwrap().balance, U256::from(5u64));
    }

    #[test]
    fn test_block_storage_independent_of_incarnation() {
        let (db, address) = setup();
        let block = BlockState::new(db);
        let mut state = State::new(&block);
        let key = B256::with_last_byte(8);

        state.checkpoint();
        state.set_block_storage(&address, &key, B256::with_last_byte(1));
        state.create_contract(&address);
        assert_eq!(state.get_block_storage(&address, &key), B256::with_last_byte(1));
        state.commit();
    }
}
