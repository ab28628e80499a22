//! This module contains the [Account] type, the engine's in-memory account
//! representation, and its RLP view [TrieAccount].

use alloy_consensus::constants::KECCAK_EMPTY;
use alloy_consensus::EMPTY_ROOT_HASH;
use alloy_primitives::{B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// `keccak256("")`, the code hash of an account without code.
pub const NULL_CODE_HASH: B256 = KECCAK_EMPTY;

/// An account as tracked by the execution engine.
///
/// `incarnation` is engine-local bookkeeping: it increments each time a
/// destroyed account is recreated at the same address and invalidates storage
/// written under earlier incarnations. It is never serialized into the state
/// trie; the trie stores the four-field Ethereum encoding ([TrieAccount]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    /// Account nonce.
    pub nonce: u64,
    /// Account balance in wei.
    pub balance: U256,
    /// Hash of the account's bytecode.
    pub code_hash: B256,
    /// Root of the account's storage trie.
    pub storage_root: B256,
    /// Incarnation counter, monotonically non-decreasing across commits.
    pub incarnation: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: NULL_CODE_HASH,
            storage_root: EMPTY_ROOT_HASH,
            incarnation: 0,
        }
    }
}

impl Account {
    /// Returns `true` if the account is empty per EIP-161: zero nonce, zero
    /// balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == NULL_CODE_HASH
    }

    /// Returns `true` if the account carries code.
    pub fn has_code(&self) -> bool {
        self.code_hash != NULL_CODE_HASH
    }
}

/// An Ethereum account as represented in the trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct TrieAccount {
    /// Account nonce.
    pub nonce: u64,
    /// Account balance.
    pub balance: U256,
    /// Account's storage root.
    pub storage_root: B256,
    /// Hash of the account's bytecode.
    pub code_hash: B256,
}

impl From<&Account> for TrieAccount {
    fn from(account: &Account) -> Self {
        Self {
            nonce: account.nonce,
            balance: account.balance,
            storage_root: account.storage_root,
            code_hash: account.code_hash,
        }
    }
}

impl From<TrieAccount> for Account {
    fn from(trie_account: TrieAccount) -> Self {
        Self {
            nonce: trie_account.nonce,
            balance: trie_account.balance,
            code_hash: trie_account.code_hash,
            storage_root: trie_account.storage_root,
            incarnation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::{Decodable, Encodable};

    #[test]
    fn test_default_account_is_empty() {
        let account = Account::default();
        assert!(account.is_empty());
        assert!(!account.has_code());
        assert_eq!(account.storage_root, EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_nonzero_nonce_not_empty() {
        let account = Account { nonce: 1, ..Default::default() };
        assert!(!account.is_empty());
    }

    #[test]
    fn test_trie_account_roundtrip() {
        let account =
            Account { nonce: 7, balance: U256::from(1_000_000u64), ..Default::default() };
        let trie_account = TrieAccount::from(&account);

        let mut buf = Vec::with_capacity(trie_account.length());
        trie_account.encode(&mut buf);
        let decoded = TrieAccount::decode(&mut buf.as_slice()).unwrap();

        assert_eq!(decoded, trie_account);
        assert_eq!(Account::from(decoded).balance, account.balance);
    }

    #[test]
    fn test_incarnation_not_serialized() {
        let account = Account { incarnation: 3, ..Default::default() };
        let trie_account = TrieAccount::from(&account);
        assert_eq!(Account::from(trie_account).incarnation, 0);
    }
}
