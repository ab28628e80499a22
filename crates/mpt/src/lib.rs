//! Versioned Merkle-Patricia-Trie storage engine for the Monad execution
//! engine.
//!
//! The trie is content-addressed: interior nodes reference children by
//! keccak commitment once their encoding reaches 32 bytes, and every
//! committed block's root is pinned in a [RootRingBuffer] for O(1) recent
//! lookup. Four logical sub-tries hang off a per-block root, distinguished
//! by a leading nibble, so finalized history, in-flight proposals, consensus
//! headers and block artefacts (transactions, receipts, withdrawals) share
//! one physical store.

pub use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};

mod errors;
pub use errors::{DbError, DbResult, DecodeError, DecodeResult};

mod node;
pub use node::TrieNode;

mod ordered;
pub use ordered::ordered_trie_with_encoder;

mod page;
pub use page::{StoragePage, PAGE_SLOTS};

mod ring;
pub use ring::RootRingBuffer;

mod store;
pub use store::{MemoryNodeStore, NodeStore, NodeWriter, PoolNodeStore};

mod db;
pub use db::{
    account_path, bft_header_path, block_header_path, code_path, proposal_path, receipt_path,
    storage_page_path, txn_path, withdrawal_path, TrieDb, TrieUpdate, BFT_BLOCK_NIBBLE,
    BLOCK_HEADER_NIBBLE, CODE_NIBBLE, FINALIZED_NIBBLE, PROPOSAL_NIBBLE, RECEIPTS_NIBBLE,
    STORAGE_PAGE_NIBBLE, TXN_NIBBLE, WITHDRAWAL_NIBBLE,
};
