//! The durable base layer below [BlockState]: committed accounts, storage
//! pages and code at the block's parent version.
//!
//! [BlockState]: crate::BlockState

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use monad_mpt::{
    account_path, code_path, storage_page_path, Nibbles, NodeStore, NodeWriter, StoragePage,
    TrieDb,
};
use monad_primitives::Account;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};
use tracing::error;

/// Incarnation sentinel scoping block storage, which survives account
/// recreation.
pub const BLOCK_STORAGE_INCARNATION: u64 = u64::MAX;

/// The account record as the engine's own database stores it. Unlike the
/// Ethereum trie-account encoding this carries the incarnation; pages live
/// under the account path, so no per-account storage root is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct DbAccount {
    /// Account nonce.
    pub nonce: u64,
    /// Account balance.
    pub balance: U256,
    /// Hash of the account's bytecode.
    pub code_hash: B256,
    /// Incarnation at last commit.
    pub incarnation: u64,
}

impl From<&Account> for DbAccount {
    fn from(account: &Account) -> Self {
        Self {
            nonce: account.nonce,
            balance: account.balance,
            code_hash: account.code_hash,
            incarnation: account.incarnation,
        }
    }
}

impl From<DbAccount> for Account {
    fn from(db_account: DbAccount) -> Self {
        Self {
            nonce: db_account.nonce,
            balance: db_account.balance,
            code_hash: db_account.code_hash,
            storage_root: Default::default(),
            incarnation: db_account.incarnation,
        }
    }
}

/// Committed-state reads at the parent version of the executing block.
pub trait Db: Send + Sync {
    /// The committed account at `address`, if any.
    fn read_account(&self, address: &Address) -> Option<Account>;

    /// The committed storage page of `(address, incarnation)` at `page_key`.
    /// Absent pages are all-zero.
    fn read_page(&self, address: &Address, incarnation: u64, page_key: &B256) -> StoragePage;

    /// The committed bytecode for `code_hash`, if stored.
    fn read_code(&self, code_hash: &B256) -> Option<Bytes>;
}

/// An in-memory [Db] for tests and genesis construction.
#[derive(Debug, Default)]
pub struct InMemoryDb {
    /// Accounts by address.
    pub accounts: HashMap<Address, Account>,
    /// Pages by `(address, incarnation, page_key)`.
    pub pages: HashMap<(Address, u64, B256), StoragePage>,
    /// Code by hash.
    pub code: HashMap<B256, Bytes>,
}

impl InMemoryDb {
    /// Seeds an account.
    pub fn insert_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    /// Seeds a single storage slot.
    pub fn insert_slot(&mut self, address: Address, incarnation: u64, key: B256, value: B256) {
        let page_key = StoragePage::page_key(&key);
        let page = self.pages.entry((address, incarnation, page_key)).or_default();
        page.slots[StoragePage::slot_offset(&key)] = value;
    }
}

impl Db for InMemoryDb {
    fn read_account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).copied()
    }

    fn read_page(&self, address: &Address, incarnation: u64, page_key: &B256) -> StoragePage {
        self.pages.get(&(*address, incarnation, *page_key)).copied().unwrap_or_default()
    }

    fn read_code(&self, code_hash: &B256) -> Option<Bytes> {
        self.code.get(code_hash).cloned()
    }
}

/// A [Db] over the versioned trie, reading at a parent block version.
///
/// Read failures are retried once against the committed root; a second
/// failure means the store itself is corrupt, which is fatal.
#[derive(Debug)]
pub struct TrieBackedDb<S> {
    trie: Arc<TrieDb<S>>,
    parent_block: AtomicU64,
    has_parent: AtomicU64,
}

impl<S: NodeStore + NodeWriter> TrieBackedDb<S> {
    /// Creates a view with no parent version: every read is empty (genesis).
    pub fn new(trie: Arc<TrieDb<S>>) -> Self {
        Self { trie, parent_block: AtomicU64::new(0), has_parent: AtomicU64::new(0) }
    }

    /// Points reads at the committed version of `parent_block`.
    pub fn set_parent(&self, parent_block: Option<u64>) {
        match parent_block {
            Some(block) => {
                self.parent_block.store(block, Ordering::Release);
                self.has_parent.store(1, Ordering::Release);
            }
            None => self.has_parent.store(0, Ordering::Release),
        }
    }

    /// The underlying versioned trie.
    pub fn trie(&self) -> &Arc<TrieDb<S>> {
        &self.trie
    }

    fn read(&self, path: &Nibbles) -> Option<Bytes> {
        if self.has_parent.load(Ordering::Acquire) == 0 {
            return None;
        }
        let block = self.parent_block.load(Ordering::Acquire);
        match self.trie.get(path, block) {
            Ok(value) => value,
            Err(first_err) => match self.trie.get(path, block) {
                Ok(value) => value,
                Err(err) => {
                    error!(target: "triedb", %first_err, %err, "state read failed twice");
                    panic!("fatal: corrupt state read at block {block}: {err}");
                }
            },
        }
    }
}

impl<S: NodeStore + NodeWriter> Db for TrieBackedDb<S> {
    fn read_account(&self, address: &Address) -> Option<Account> {
        let encoded = self.read(&account_path(keccak256(address)))?;
        DbAccount::decode(&mut encoded.as_ref()).ok().map(Account::from)
    }

    fn read_page(&self, address: &Address, incarnation: u64, page_key: &B256) -> StoragePage {
        let path = storage_page_path(keccak256(address), incarnation, *page_key);
        match self.read(&path) {
            Some(encoded) => {
                StoragePage::decode(&mut encoded.as_ref()).unwrap_or_default()
            }
            None => StoragePage::default(),
        }
    }

    fn read_code(&self, code_hash: &B256) -> Option<Bytes> {
        self.read(&code_path(*code_hash))
    }
}

/// Encodes a [DbAccount] for trie insertion.
pub fn encode_account(account: &Account) -> Bytes {
    let db_account = DbAccount::from(account);
    let mut buf = Vec::with_capacity(db_account.length());
    db_account.encode(&mut buf);
    buf.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use monad_mpt::{MemoryNodeStore, TrieUpdate};

    #[test]
    fn test_db_account_roundtrip() {
        let account = Account { nonce: 3, balance: U256::from(10u64), incarnation: 2, ..Default::default() };
        let encoded = encode_account(&account);
        let decoded = Account::from(DbAccount::decode(&mut encoded.as_ref()).unwrap());
        assert_eq!(decoded.nonce, 3);
        assert_eq!(decoded.incarnation, 2);
    }

    #[test]
    fn test_trie_backed_reads() {
        let trie = Arc::new(TrieDb::new(MemoryNodeStore::default()));
        let address = Address::repeat_byte(0x11);
        let account = Account { balance: U256::from(7u64), ..Default::default() };
        let key = B256::with_last_byte(5);
        let mut page = StoragePage::default();
        page.slots[StoragePage::slot_offset(&key)] = B256::with_last_byte(0xAA);

        trie.commit(
            vec![
                TrieUpdate::put(account_path(keccak256(address)), encode_account(&account)),
                TrieUpdate::put(
                    storage_page_path(keccak256(address), 0, StoragePage::page_key(&key)),
                    page.encode().into(),
                ),
            ],
            0,
            None,
        )
        .unwrap();

        let db = TrieBackedDb::new(Arc::clone(&trie));
        // No parent: genesis view is empty.
        assert_eq!(db.read_account(&address), None);

        db.set_parent(Some(0));
        assert_eq!(db.read_account(&address).unwrap().balance, U256::from(7u64));
        let read_page = db.read_page(&address, 0, &StoragePage::page_key(&key));
        assert_eq!(read_page.slots[StoragePage::slot_offset(&key)], B256::with_last_byte(0xAA));
        // Another incarnation sees zeroes.
        let fresh = db.read_page(&address, 1, &StoragePage::page_key(&key));
        assert!(fresh.is_empty());
    }
}
