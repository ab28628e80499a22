//! Consensus-facing block types. The consensus layer proposes blocks as a
//! [ConsensusBlockHeader] plus a content-addressed [ConsensusBlockBody]; the
//! execution engine verifies the body id before running anything.

use alloy_consensus::{Header, TxEnvelope};
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::B256;
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};

/// Quorum certificate carried alongside a proposal. The execution engine only
/// ever inspects the certified round; vote aggregation happens upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct QuorumCertificate {
    /// The round the certificate covers.
    pub round: u64,
    /// The BFT block id the certificate covers.
    pub block_id: B256,
}

/// The consensus header wrapping a proposed Ethereum header.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ConsensusBlockHeader {
    /// BFT id of the parent proposal.
    pub parent_bft_id: B256,
    /// Round this block was proposed in.
    pub round: u64,
    /// Round the parent was proposed in. Gaps indicate skipped rounds.
    pub parent_round: u64,
    /// blake3 content address of the block body.
    pub block_body_id: B256,
    /// The Ethereum header the proposer claims execution will produce.
    pub proposed_eth_header: Header,
    /// Certificate for the parent.
    pub qc: QuorumCertificate,
}

impl ConsensusBlockHeader {
    /// The BFT id of this header: blake3 over its RLP encoding.
    pub fn bft_id(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.length());
        self.encode(&mut buf);
        B256::from(*blake3::hash(&buf).as_bytes())
    }

    /// Block number of the wrapped Ethereum header.
    pub const fn number(&self) -> u64 {
        self.proposed_eth_header.number
    }

    /// Timestamp of the wrapped Ethereum header.
    pub const fn timestamp(&self) -> u64 {
        self.proposed_eth_header.timestamp
    }
}

/// The transaction payload of a proposal, content-addressed by blake3.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ConsensusBlockBody {
    /// Transactions in execution order.
    pub transactions: Vec<TxEnvelope>,
    /// Ommer headers. Empty on Monad; retained for Ethereum replay.
    pub ommers: Vec<Header>,
    /// Validator withdrawals (Shanghai and later).
    pub withdrawals: Vec<Withdrawal>,
}

impl ConsensusBlockBody {
    /// The content address of this body: blake3 over its RLP encoding. Must
    /// equal [ConsensusBlockHeader::block_body_id] for the body to be
    /// executed.
    pub fn id(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.length());
        self.encode(&mut buf);
        B256::from(*blake3::hash(&buf).as_bytes())
    }
}

/// An execution-layer block: header plus body parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    /// The Ethereum header.
    pub header: Header,
    /// Transactions in execution order.
    pub transactions: Vec<TxEnvelope>,
    /// Ommer headers.
    pub ommers: Vec<Header>,
    /// Validator withdrawals.
    pub withdrawals: Vec<Withdrawal>,
}

impl Block {
    /// Assembles a block from a consensus proposal and its verified body.
    pub fn from_consensus(header: &ConsensusBlockHeader, body: ConsensusBlockBody) -> Self {
        Self {
            header: header.proposed_eth_header.clone(),
            transactions: body.transactions,
            ommers: body.ommers,
            withdrawals: body.withdrawals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Decodable;

    #[test]
    fn test_body_id_stable() {
        let body = ConsensusBlockBody::default();
        assert_eq!(body.id(), body.id());

        let other = ConsensusBlockBody {
            withdrawals: vec![Withdrawal::default()],
            ..Default::default()
        };
        assert_ne!(body.id(), other.id());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ConsensusBlockHeader {
            parent_bft_id: B256::repeat_byte(1),
            round: 9,
            parent_round: 7,
            block_body_id: ConsensusBlockBody::default().id(),
            proposed_eth_header: Header { number: 42, ..Default::default() },
            qc: QuorumCertificate { round: 7, block_id: B256::repeat_byte(1) },
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        let decoded = ConsensusBlockHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.bft_id(), header.bft_id());
    }
}
