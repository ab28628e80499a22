//! Per-block, per-address change records.

use alloy_primitives::{Bytes, B256};
use dashmap::DashMap;
use monad_mpt::StoragePage;
use monad_primitives::Account;
use std::collections::HashMap;

/// A `(before, after)` pair. `before` is pinned on first write and always
/// equals what the committed base returned at the block's parent version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    /// The committed value before this block.
    pub before: T,
    /// The value after the latest merged transaction.
    pub after: T,
}

impl<T: Clone> Delta<T> {
    /// A delta that has not diverged yet.
    pub fn unchanged(value: T) -> Self {
        Self { before: value.clone(), after: value }
    }
}

/// Everything a block changed about one address.
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    /// Account before/after. `None` on either side means "absent".
    pub account: Option<Delta<Option<Account>>>,
    /// Page-granular storage changes, keyed by `(incarnation, page_key)`.
    pub storage: HashMap<(u64, B256), Delta<StoragePage>>,
    /// Original slot keys per page, retained so commit can re-derive the
    /// exact slots that changed.
    pub slot_keys: HashMap<(u64, B256), Vec<B256>>,
}

/// The block's address-keyed delta map. Sharded: many concurrent readers,
/// single merging writer per entry.
pub type StateDeltas = DashMap<alloy_primitives::Address, StateDelta>;

/// Newly deployed code, keyed by code hash. Content-addressed, so writers
/// to the same key always install the same value.
pub type Code = DashMap<B256, Bytes>;
