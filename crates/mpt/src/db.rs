//! The versioned trie database: per-block roots with structural sharing,
//! multiple in-flight proposals per height, and consensus-driven
//! finalization.
//!
//! Every committed block version has its own root; unchanged subtrees are
//! shared through content addressing, so a commit persists only the nodes
//! along the touched paths. Within a version root, sub-tries are
//! distinguished by a leading nibble:
//!
//! ```text
//! ROOT
//!  ├─ FINALIZED_NIBBLE    → account state (pages and code below it)
//!  ├─ PROPOSAL_NIBBLE     → per-round proposal metadata
//!  ├─ BFT_BLOCK_NIBBLE    → consensus headers
//!  ├─ BLOCK_HEADER_NIBBLE → the executed Ethereum header
//!  ├─ RECEIPTS_NIBBLE     → receipt trie entries
//!  ├─ TXN_NIBBLE          → transaction trie entries
//!  └─ WITHDRAWAL_NIBBLE   → withdrawal trie entries
//! ```
//!
//! Whether a version root is visible as a proposal or as finalized history
//! is tracked out of band: proposals live in a per-`(block, round)` table,
//! finalized roots in the [RootRingBuffer]. `finalize` promotes one proposal
//! and prunes its siblings.

use crate::{
    errors::{DbError, DbResult},
    node::TrieNode,
    ring::RootRingBuffer,
    store::{NodeStore, NodeWriter},
};
use alloy_primitives::{Bytes, B256};
use alloy_rlp::Encodable;
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Sub-trie prefix for finalized account state.
pub const FINALIZED_NIBBLE: u8 = 0x0;
/// Sub-trie prefix for per-round proposal metadata.
pub const PROPOSAL_NIBBLE: u8 = 0x1;
/// Sub-trie prefix for consensus block headers.
pub const BFT_BLOCK_NIBBLE: u8 = 0x2;
/// Sub-trie prefix for the executed Ethereum header.
pub const BLOCK_HEADER_NIBBLE: u8 = 0x3;
/// Sub-trie prefix for receipt trie entries.
pub const RECEIPTS_NIBBLE: u8 = 0x4;
/// Sub-trie prefix for transaction trie entries.
pub const TXN_NIBBLE: u8 = 0x5;
/// Sub-trie prefix for withdrawal trie entries.
pub const WITHDRAWAL_NIBBLE: u8 = 0x6;
/// Sub-trie prefix for contract code, keyed by code hash.
pub const CODE_NIBBLE: u8 = 0x7;
/// Nibble separating an account path from its storage-page keys.
pub const STORAGE_PAGE_NIBBLE: u8 = 0x8;

/// Number of recent roots pinned for O(1) lookup.
const ROOT_RING_SIZE: usize = 256;

/// A single key update within a commit. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieUpdate {
    /// Full nibble path, sub-trie prefix included.
    pub path: Nibbles,
    /// New value, or `None` to delete.
    pub value: Option<Bytes>,
}

impl TrieUpdate {
    /// An insert-or-update of `value` at `path`.
    pub const fn put(path: Nibbles, value: Bytes) -> Self {
        Self { path, value: Some(value) }
    }

    /// A deletion of the key at `path`.
    pub const fn delete(path: Nibbles) -> Self {
        Self { path, value: None }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadContext {
    block_number: u64,
    round: Option<u64>,
}

/// The versioned trie database over a content-addressed [NodeStore].
#[derive(Debug)]
pub struct TrieDb<S> {
    store: S,
    finalized: Mutex<RootRingBuffer<ROOT_RING_SIZE>>,
    proposals: Mutex<HashMap<(u64, u64), B256>>,
    context: Mutex<ReadContext>,
}

impl<S: NodeStore + NodeWriter> TrieDb<S> {
    /// Creates a database over `store` with no committed history.
    pub fn new(store: S) -> Self {
        Self {
            store,
            finalized: Mutex::new(RootRingBuffer::new()),
            proposals: Mutex::new(HashMap::new()),
            context: Mutex::new(ReadContext::default()),
        }
    }

    /// The backing node store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Declares the read context for subsequent lookups: reads at
    /// `block_number` resolve through the proposal committed at `round`
    /// when one exists, disambiguating forks.
    pub fn set_block_and_round(&self, block_number: u64, round: Option<u64>) {
        *self.context.lock() = ReadContext { block_number, round };
    }

    /// The root visible at `block_number` under the current read context:
    /// the context round's proposal if present, else finalized history.
    pub fn root_at(&self, block_number: u64) -> Option<B256> {
        if let Some(round) = self.context.lock().round {
            if let Some(root) = self.proposals.lock().get(&(block_number, round)) {
                return Some(*root);
            }
        }
        self.finalized.lock().find(block_number)
    }

    /// The highest finalized block number still in the root window.
    pub fn latest_finalized(&self) -> Option<u64> {
        self.finalized.lock().high_water()
    }

    /// Reads the value at `path` in the trie version of `block_number`.
    /// A missing key or an unknown block version is `Ok(None)`.
    pub fn get(&self, path: &Nibbles, block_number: u64) -> DbResult<Option<Bytes>> {
        let Some(root) = self.root_at(block_number) else {
            return Ok(None);
        };
        TrieNode::new_blinded(root).open(path, &self.store)
    }

    /// Commits `updates` on top of the parent version of `block_number`,
    /// persists the new nodes, and returns the root of the state sub-trie:
    /// the value that becomes the executed header's `state_root`. The
    /// global version root (which also covers artefact and consensus
    /// sub-tries) is tracked internally: as a proposal when a round is
    /// given, as finalized history otherwise (historical replay).
    pub fn commit(
        &self,
        updates: Vec<TrieUpdate>,
        block_number: u64,
        round: Option<u64>,
    ) -> DbResult<B256> {
        let parent_root = if block_number == 0 {
            None
        } else {
            self.root_at(block_number - 1)
        };
        let mut root_node = match parent_root {
            Some(root) => TrieNode::new_blinded(root),
            None => TrieNode::Empty,
        };

        let update_count = updates.len();
        for update in updates {
            match update.value {
                Some(value) => root_node.insert(&update.path, value, &self.store)?,
                None => match root_node.delete(&update.path, &self.store) {
                    // Deleting an absent key is a no-op, not corruption.
                    Ok(()) | Err(DbError::KeyMismatch) | Err(DbError::BranchNotExist) => {}
                    Err(err) => return Err(err),
                },
            }
        }

        let mut recorded = Vec::new();
        let root = root_node.persist(&mut recorded);
        for (hash, encoded) in recorded {
            self.store.put_node(hash, encoded).map_err(DbError::Store)?;
        }
        let state_root = state_subtree_root(&mut root_node, &self.store)?;

        match round {
            Some(round) => {
                // At most one proposal per (block, round); a re-commit of the
                // same pair replaces it.
                self.proposals.lock().insert((block_number, round), root);
            }
            None => self.finalized.lock().insert(block_number, root),
        }
        debug!(
            target: "triedb",
            block_number,
            ?round,
            updates = update_count,
            %root,
            %state_root,
            "committed trie version"
        );
        Ok(state_root)
    }

    /// The state sub-trie root of the version at `block_number`, under the
    /// current read context.
    pub fn state_root_at(&self, block_number: u64) -> DbResult<Option<B256>> {
        let Some(root) = self.root_at(block_number) else {
            return Ok(None);
        };
        let mut node = TrieNode::new_blinded(root);
        state_subtree_root(&mut node, &self.store).map(Some)
    }

    /// Promotes the proposal at `(block_number, round)` into finalized
    /// history and prunes every proposal at or below that height.
    pub fn finalize(&self, block_number: u64, round: u64) -> DbResult<()> {
        let mut proposals = self.proposals.lock();
        let Some(root) = proposals.remove(&(block_number, round)) else {
            return Err(DbError::RootNodeIsNull);
        };
        proposals.retain(|(block, _), _| *block > block_number);
        drop(proposals);

        self.finalized.lock().insert(block_number, root);
        info!(target: "triedb", block_number, round, %root, "finalized block");
        Ok(())
    }
}

/// Builds the state path of an account: `FINALIZED_NIBBLE ‖ keccak(addr)`.
pub fn account_path(hashed_address: B256) -> Nibbles {
    prefixed_path(FINALIZED_NIBBLE, hashed_address.as_slice())
}

/// Builds the state path of a storage page:
/// `FINALIZED_NIBBLE ‖ keccak(addr) ‖ STORAGE_PAGE_NIBBLE ‖ incarnation ‖
/// page_key`. Slots are scoped by `(address, incarnation)`: a destroyed and
/// recreated account starts at a fresh incarnation and its old pages become
/// unreachable without a subtree sweep.
pub fn storage_page_path(hashed_address: B256, incarnation: u64, page_key: B256) -> Nibbles {
    let mut nibbles = Vec::with_capacity(146);
    nibbles.push(FINALIZED_NIBBLE);
    extend_nibbles(&mut nibbles, hashed_address.as_slice());
    nibbles.push(STORAGE_PAGE_NIBBLE);
    extend_nibbles(&mut nibbles, &incarnation.to_be_bytes());
    extend_nibbles(&mut nibbles, page_key.as_slice());
    Nibbles::from_vec_unchecked(nibbles)
}

/// Builds the path of a code object: `CODE_NIBBLE ‖ code_hash`.
pub fn code_path(code_hash: B256) -> Nibbles {
    prefixed_path(CODE_NIBBLE, code_hash.as_slice())
}

/// Builds the path of the executed Ethereum header.
pub fn block_header_path() -> Nibbles {
    Nibbles::from_nibbles_unchecked([BLOCK_HEADER_NIBBLE])
}

/// Builds the path of a consensus header at `round`.
pub fn bft_header_path(round: u64) -> Nibbles {
    prefixed_path(BFT_BLOCK_NIBBLE, &round.to_be_bytes())
}

/// Builds the path of proposal metadata at `round`.
pub fn proposal_path(round: u64) -> Nibbles {
    prefixed_path(PROPOSAL_NIBBLE, &round.to_be_bytes())
}

/// Builds the path of the transaction trie entry at `index`.
pub fn txn_path(index: usize) -> Nibbles {
    indexed_path(TXN_NIBBLE, index)
}

/// Builds the path of the receipt trie entry at `index`.
pub fn receipt_path(index: usize) -> Nibbles {
    indexed_path(RECEIPTS_NIBBLE, index)
}

/// Builds the path of the withdrawal trie entry at `index`.
pub fn withdrawal_path(index: usize) -> Nibbles {
    indexed_path(WITHDRAWAL_NIBBLE, index)
}

fn prefixed_path(prefix: u8, bytes: &[u8]) -> Nibbles {
    let mut nibbles = Vec::with_capacity(1 + bytes.len() * 2);
    nibbles.push(prefix);
    extend_nibbles(&mut nibbles, bytes);
    Nibbles::from_vec_unchecked(nibbles)
}

fn indexed_path(prefix: u8, index: usize) -> Nibbles {
    let mut encoded = Vec::with_capacity(4);
    index.encode(&mut encoded);
    prefixed_path(prefix, &encoded)
}

/// The root of the state domain of a version root, as if it stood alone:
/// artefact and consensus sub-tries do not contribute, so proposer and
/// validator agree on `state_root` regardless of which bookkeeping entries
/// each side stores.
fn state_subtree_root<S: NodeStore>(root: &mut TrieNode, store: &S) -> DbResult<B256> {
    if let TrieNode::Blinded { commitment } = root {
        *root = store
            .trie_node_by_hash(*commitment)
            .map_err(|e| DbError::Store(e.to_string()))?;
    }
    Ok(match root {
        TrieNode::Empty => EMPTY_ROOT_HASH,
        TrieNode::Branch { stack, .. } => stack[FINALIZED_NIBBLE as usize].root(),
        TrieNode::Extension { prefix, node } if prefix.first() == Some(FINALIZED_NIBBLE) => {
            if prefix.len() == 1 {
                node.root()
            } else {
                TrieNode::Extension { prefix: prefix.slice(1..), node: node.clone() }.root()
            }
        }
        TrieNode::Leaf { prefix, value } if prefix.first() == Some(FINALIZED_NIBBLE) => {
            TrieNode::Leaf { prefix: prefix.slice(1..), value: value.clone() }.root()
        }
        _ => EMPTY_ROOT_HASH,
    })
}

fn extend_nibbles(nibbles: &mut Vec<u8>, bytes: &[u8]) {
    for byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
}
