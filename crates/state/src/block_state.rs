//! The block-scoped state layer: committed per-address deltas over the
//! durable [Db], shared by all transaction fibers of one block.

use crate::{
    db::Db,
    deltas::{Code, Delta, StateDelta, StateDeltas},
    state::{ReadSet, TxWrites},
};
use alloy_primitives::{Address, Bytes, B256};
use monad_mpt::StoragePage;
use monad_primitives::Account;
use tracing::trace;

/// Block-scoped state: the base [Db] plus everything already merged from
/// finished transactions. Concurrent fibers read freely; merging is the
/// serial, in-index-order step.
#[derive(Debug)]
pub struct BlockState<D> {
    db: D,
    deltas: StateDeltas,
    code: Code,
}

impl<D: Db> BlockState<D> {
    /// Creates an empty block state over `db`.
    pub fn new(db: D) -> Self {
        Self { db, deltas: StateDeltas::default(), code: Code::default() }
    }

    /// The base database.
    pub const fn db(&self) -> &D {
        &self.db
    }

    /// The authoritative current view of `address`: the latest merged
    /// `after` state, or the committed base.
    pub fn recent_account(&self, address: &Address) -> Option<Account> {
        if let Some(delta) = self.deltas.get(address) {
            if let Some(account_delta) = &delta.account {
                return account_delta.after;
            }
        }
        self.db.read_account(address)
    }

    /// The authoritative current value of a storage slot under
    /// `(address, incarnation)`.
    pub fn recent_storage(&self, address: &Address, incarnation: u64, key: &B256) -> B256 {
        let page_key = StoragePage::page_key(key);
        if let Some(delta) = self.deltas.get(address) {
            if let Some(page_delta) = delta.storage.get(&(incarnation, page_key)) {
                return page_delta.after.slots[StoragePage::slot_offset(key)];
            }
        }
        self.db.read_page(address, incarnation, &page_key).slots[StoragePage::slot_offset(key)]
    }

    /// Code by hash: block-deployed first, then the committed base.
    pub fn recent_code(&self, code_hash: &B256) -> Option<Bytes> {
        if let Some(code) = self.code.get(code_hash) {
            return Some(code.clone());
        }
        self.db.read_code(code_hash)
    }

    /// The incarnation a contract recreated at `address` must use so that
    /// storage written under prior incarnations reads zero.
    pub fn next_incarnation(&self, address: &Address) -> u64 {
        if let Some(delta) = self.deltas.get(address) {
            if let Some(account_delta) = &delta.account {
                return match (&account_delta.before, &account_delta.after) {
                    (_, Some(account)) => account.incarnation + 1,
                    (Some(before), None) => before.incarnation + 1,
                    (None, None) => 0,
                };
            }
        }
        self.db.read_account(address).map(|account| account.incarnation + 1).unwrap_or(0)
    }

    /// Validates a finished transaction's reads against the current merged
    /// view. Any stale read means the transaction observed state that a
    /// later-merging predecessor has since changed, and must re-execute.
    pub fn can_merge(&self, reads: &ReadSet) -> bool {
        let accounts_stable = reads
            .accounts
            .iter()
            .all(|(address, expected)| self.recent_account(address) == *expected);
        if !accounts_stable {
            return false;
        }
        reads.storage.iter().all(|((address, incarnation, key), expected)| {
            self.recent_storage(address, *incarnation, key) == *expected
        })
    }

    /// Installs a finished transaction's writes. For first-write entries the
    /// delta's `before` is pinned to what this block state already had.
    pub fn merge(&self, writes: &TxWrites) {
        for (address, after) in &writes.accounts {
            let mut entry = self.deltas.entry(*address).or_default();
            match &mut entry.account {
                Some(delta) => delta.after = *after,
                None => {
                    let before = self.db.read_account(address);
                    entry.account = Some(Delta { before, after: *after });
                }
            }
        }

        for (address, slots) in &writes.storage {
            let mut entry = self.deltas.entry(*address).or_default();
            let StateDelta { storage, slot_keys, .. } = &mut *entry;
            for (incarnation, key, value) in slots {
                let page_key = StoragePage::page_key(key);
                let page_delta = storage.entry((*incarnation, page_key)).or_insert_with(|| {
                    Delta::unchanged(self.db.read_page(address, *incarnation, &page_key))
                });
                page_delta.after.slots[StoragePage::slot_offset(key)] = *value;

                let keys = slot_keys.entry((*incarnation, page_key)).or_default();
                if !keys.contains(key) {
                    keys.push(*key);
                }
            }
        }

        for (code_hash, code) in &writes.code {
            // First committed value wins; content addressing makes any
            // second writer identical anyway.
            self.code.entry(*code_hash).or_insert_with(|| code.clone());
        }

        trace!(
            target: "block_state",
            accounts = writes.accounts.len(),
            storage = writes.storage.len(),
            "merged transaction writes"
        );
    }

    /// Tears the block state into its delta maps and base for commit.
    pub fn into_parts(self) -> (D, StateDeltas, Code) {
        (self.db, self.deltas, self.code)
    }
}
