//! Errors for the `monad-executor` crate.

/// A [Result] type alias where the error is [TransactionError].
pub type TransactionResult<T> = Result<T, TransactionError>;

/// A [Result] type alias where the error is [BlockError].
pub type BlockResult<T> = Result<T, BlockError>;

/// Reasons a transaction fails validation. Attached to the transaction's
/// outcome; these never fail the block unless the check is mandatory for
/// inclusion.
#[derive(Debug, derive_more::Display, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// Nonce does not match the sender account.
    #[display("bad nonce")]
    BadNonce,
    /// Sender cannot cover value plus maximum gas cost.
    #[display("insufficient balance")]
    InsufficientBalance,
    /// Intrinsic gas exceeds the transaction gas limit.
    #[display("intrinsic gas greater than limit")]
    IntrinsicGasGreaterThanLimit,
    /// Sender is a contract account.
    #[display("sender not eoa")]
    SenderNotEoa,
    /// Transaction type not enabled at the current revision.
    #[display("type not supported")]
    TypeNotSupported,
    /// Max fee per gas is below the block base fee.
    #[display("max fee less than base")]
    MaxFeeLessThanBase,
    /// Priority fee exceeds the max fee.
    #[display("priority fee greater than max")]
    PriorityFeeGreaterThanMax,
    /// Nonce is at its maximum and cannot be incremented.
    #[display("nonce exceeds max")]
    NonceExceedsMax,
    /// Init code exceeds the EIP-3860 limit.
    #[display("init code limit exceeded")]
    InitCodeLimitExceeded,
    /// Cumulative block gas would exceed the block gas limit.
    #[display("gas limit reached")]
    GasLimitReached,
    /// Chain id mismatch.
    #[display("wrong chain id")]
    WrongChainId,
    /// Sender recovery failed or was not performed.
    #[display("missing sender")]
    MissingSender,
    /// Gas arithmetic overflowed.
    #[display("gas limit overflow")]
    GasLimitOverflow,
    /// Malformed signature (including non-canonical `s`).
    #[display("invalid signature")]
    InvalidSignature,
    /// Blob versioned hash malformed or absent.
    #[display("invalid blob hash")]
    InvalidBlobHash,
    /// EIP-7702 transaction with an empty authorization list.
    #[display("empty authorization list")]
    EmptyAuthorizationList,
    /// Sender cannot cover the fee alone (value excluded).
    #[display("insufficient balance for fee")]
    InsufficientBalanceForFee,
    /// A system transaction named its own authority as sender.
    #[display("system transaction sender is authority")]
    SystemTransactionSenderIsAuthority,
    /// The sender's rolling fee reserve is exhausted.
    #[display("insufficient reserve balance")]
    InsufficientReserveBalance,
}

impl core::error::Error for TransactionError {}

impl TransactionError {
    /// A stable status code for event payloads.
    pub const fn status_code(self) -> u32 {
        match self {
            Self::BadNonce => 1,
            Self::InsufficientBalance => 2,
            Self::IntrinsicGasGreaterThanLimit => 3,
            Self::SenderNotEoa => 4,
            Self::TypeNotSupported => 5,
            Self::MaxFeeLessThanBase => 6,
            Self::PriorityFeeGreaterThanMax => 7,
            Self::NonceExceedsMax => 8,
            Self::InitCodeLimitExceeded => 9,
            Self::GasLimitReached => 10,
            Self::WrongChainId => 11,
            Self::MissingSender => 12,
            Self::GasLimitOverflow => 13,
            Self::InvalidSignature => 14,
            Self::InvalidBlobHash => 15,
            Self::EmptyAuthorizationList => 16,
            Self::InsufficientBalanceForFee => 17,
            Self::SystemTransactionSenderIsAuthority => 18,
            Self::InsufficientReserveBalance => 19,
        }
    }
}

/// Reasons a whole block is rejected. No partial state is ever persisted
/// for a rejected block.
#[derive(Debug, derive_more::Display, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// Ommers hash mismatch between proposed and computed header.
    #[display("wrong ommers hash")]
    WrongOmmersHash,
    /// A merkle root (state, transactions, receipts, withdrawals) differs
    /// from the proposal.
    #[display("wrong merkle root")]
    WrongMerkleRoot,
    /// Gas used exceeds the block gas limit.
    #[display("gas above limit")]
    GasAboveLimit,
    /// DAO-fork extra data mismatch during historical replay.
    #[display("wrong dao extra data")]
    WrongDaoExtraData,
    /// Body content hash does not match `block_body_id`.
    #[display("wrong body id")]
    WrongBodyId,
    /// A transaction exhausted its merge retries.
    #[display("retry limit exceeded")]
    RetryLimitExceeded,
    /// Finalize named a `(block, round)` pair with no committed proposal.
    #[display("missing proposal")]
    MissingProposal,
    /// A mandatory transaction check failed.
    #[display("invalid transaction: {_0}")]
    InvalidTransaction(TransactionError),
}

impl core::error::Error for BlockError {}

impl From<TransactionError> for BlockError {
    fn from(err: TransactionError) -> Self {
        Self::InvalidTransaction(err)
    }
}

impl BlockError {
    /// A stable `(domain, status)` pair for `BLOCK_REJECT` events.
    pub const fn reject_code(self) -> (u32, u32) {
        match self {
            Self::WrongOmmersHash => (2, 1),
            Self::WrongMerkleRoot => (2, 2),
            Self::GasAboveLimit => (2, 3),
            Self::WrongDaoExtraData => (2, 4),
            Self::WrongBodyId => (2, 5),
            Self::RetryLimitExceeded => (2, 6),
            Self::MissingProposal => (2, 7),
            Self::InvalidTransaction(err) => (1, err.status_code()),
        }
    }
}
