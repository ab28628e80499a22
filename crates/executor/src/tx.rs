//! A uniform view over the transaction envelope variants.

use alloy_consensus::TxEnvelope;
use alloy_eips::eip2930::AccessList;
use alloy_primitives::{Address, Bytes, Signature, TxKind, B256, U256};

/// Per-type fields flattened out of a [TxEnvelope], so validation and
/// execution need not re-match the envelope at every step.
#[derive(Debug, Clone)]
pub struct TxContext {
    /// EIP-2718 type byte.
    pub tx_type: u8,
    /// Chain id, absent only for pre-EIP-155 legacy transactions.
    pub chain_id: Option<u64>,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Max fee per gas (the gas price for legacy transactions).
    pub max_fee_per_gas: u128,
    /// Priority fee cap, for EIP-1559-style transactions.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Call target, or `None` for creates.
    pub to: Option<Address>,
    /// Value transferred.
    pub value: U256,
    /// Input data (init code for creates).
    pub input: Bytes,
    /// Warm-access pre-list.
    pub access_list: AccessList,
    /// Blob hashes for EIP-4844 transactions.
    pub blob_hashes: Vec<B256>,
    /// Blob fee cap for EIP-4844 transactions.
    pub max_fee_per_blob_gas: Option<u128>,
    /// Number of EIP-7702 authorizations.
    pub authorization_count: Option<usize>,
    /// The signature, for static checks.
    pub signature: Signature,
}

impl TxContext {
    /// Flattens an envelope.
    pub fn new(tx: &TxEnvelope) -> Self {
        match tx {
            TxEnvelope::Legacy(signed) => {
                let tx = signed.tx();
                Self {
                    tx_type: 0,
                    chain_id: tx.chain_id,
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.gas_price,
                    max_priority_fee_per_gas: None,
                    to: tx.to.to().copied(),
                    value: tx.value,
                    input: tx.input.clone(),
                    access_list: AccessList::default(),
                    blob_hashes: Vec::new(),
                    max_fee_per_blob_gas: None,
                    authorization_count: None,
                    signature: *signed.signature(),
                }
            }
            TxEnvelope::Eip2930(signed) => {
                let tx = signed.tx();
                Self {
                    tx_type: 1,
                    chain_id: Some(tx.chain_id),
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.gas_price,
                    max_priority_fee_per_gas: None,
                    to: tx.to.to().copied(),
                    value: tx.value,
                    input: tx.input.clone(),
                    access_list: tx.access_list.clone(),
                    blob_hashes: Vec::new(),
                    max_fee_per_blob_gas: None,
                    authorization_count: None,
                    signature: *signed.signature(),
                }
            }
            TxEnvelope::Eip1559(signed) => {
                let tx = signed.tx();
                Self {
                    tx_type: 2,
                    chain_id: Some(tx.chain_id),
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: Some(tx.max_priority_fee_per_gas),
                    to: tx.to.to().copied(),
                    value: tx.value,
                    input: tx.input.clone(),
                    access_list: tx.access_list.clone(),
                    blob_hashes: Vec::new(),
                    max_fee_per_blob_gas: None,
                    authorization_count: None,
                    signature: *signed.signature(),
                }
            }
            TxEnvelope::Eip4844(signed) => {
                let tx = signed.tx().tx();
                Self {
                    tx_type: 3,
                    chain_id: Some(tx.chain_id),
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: Some(tx.max_priority_fee_per_gas),
                    to: Some(tx.to),
                    value: tx.value,
                    input: tx.input.clone(),
                    access_list: tx.access_list.clone(),
                    blob_hashes: tx.blob_versioned_hashes.clone(),
                    max_fee_per_blob_gas: Some(tx.max_fee_per_blob_gas),
                    authorization_count: None,
                    signature: *signed.signature(),
                }
            }
            TxEnvelope::Eip7702(signed) => {
                let tx = signed.tx();
                Self {
                    tx_type: 4,
                    chain_id: Some(tx.chain_id),
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: Some(tx.max_priority_fee_per_gas),
                    to: Some(tx.to),
                    value: tx.value,
                    input: tx.input.clone(),
                    access_list: tx.access_list.clone(),
                    blob_hashes: Vec::new(),
                    max_fee_per_blob_gas: None,
                    authorization_count: Some(tx.authorization_list.len()),
                    signature: *signed.signature(),
                }
            }
            _ => unreachable!("unknown transaction envelope type"),
        }
    }

    /// Whether this transaction deploys a contract.
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// The effective gas price under `base_fee`: the gas price for legacy
    /// types, base fee plus capped priority fee for EIP-1559 types.
    pub fn effective_gas_price(&self, base_fee: u128) -> u128 {
        match self.max_priority_fee_per_gas {
            Some(priority) => base_fee + priority.min(self.max_fee_per_gas - base_fee),
            None => self.max_fee_per_gas,
        }
    }

    /// The priority reward per gas paid to the beneficiary.
    pub fn priority_fee_per_gas(&self, base_fee: u128) -> u128 {
        self.effective_gas_price(base_fee) - base_fee
    }

    /// Builds the `to` field helper used by create-address derivation.
    pub fn kind(&self) -> TxKind {
        match self.to {
            Some(to) => TxKind::Call(to),
            None => TxKind::Create,
        }
    }
}
