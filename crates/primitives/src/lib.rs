//! Core types shared across the Monad execution engine: accounts with
//! incarnation tracking, hardfork revisions, and the consensus-facing block
//! representation.

mod account;
pub use account::{Account, TrieAccount, NULL_CODE_HASH};

pub mod revision;
pub use revision::{MonadRevision, Revision, Traits};

mod consensus;
pub use consensus::{Block, ConsensusBlockBody, ConsensusBlockHeader, QuorumCertificate};

mod block_hash;
pub use block_hash::{BlockHashBuffer, BLOCK_HASH_HISTORY};
