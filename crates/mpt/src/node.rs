//! This module contains the [TrieNode] type, an in-memory Merkle Patricia
//! Trie node that unblinds lazily from a [NodeStore] and re-blinds on
//! commitment.

use crate::{
    errors::{DbError, DbResult},
    store::NodeStore,
};
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::{Buf, Decodable, Encodable, Header, EMPTY_STRING_CODE};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};

/// The length of the branch list when RLP encoded.
const BRANCH_LIST_LENGTH: usize = 17;

/// The length of a leaf or extension node's RLP encoded list.
const LEAF_OR_EXTENSION_LIST_LENGTH: usize = 2;

/// Prefix for even-nibbled extension node paths.
const PREFIX_EXTENSION_EVEN: u8 = 0;

/// Prefix for odd-nibbled extension node paths.
const PREFIX_EXTENSION_ODD: u8 = 1;

/// Prefix for even-nibbled leaf node paths.
const PREFIX_LEAF_EVEN: u8 = 2;

/// Prefix for odd-nibbled leaf node paths.
const PREFIX_LEAF_ODD: u8 = 3;

/// Nibble width of a branch node.
const BRANCH_WIDTH: usize = 16;

/// A node within a Merkle Patricia Trie.
///
/// Children whose RLP encoding reaches 32 bytes are referenced by keccak
/// commitment ([TrieNode::Blinded]) until a traversal needs their contents,
/// at which point they are unblinded from the backing [NodeStore]. This keeps
/// only the touched paths of a versioned trie resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// An empty node.
    Empty,
    /// A node that has been collapsed to its keccak commitment.
    Blinded {
        /// The commitment of the blinded node.
        commitment: B256,
    },
    /// A leaf node with the encoding `rlp([encoded_path, value])`.
    Leaf {
        /// The remaining nibble path to the value.
        prefix: Nibbles,
        /// The value of the leaf.
        value: Bytes,
    },
    /// An extension node with the encoding `rlp([encoded_path, child])`.
    Extension {
        /// The shared nibble prefix.
        prefix: Nibbles,
        /// The single child below the prefix.
        node: Box<TrieNode>,
    },
    /// A branch node with the encoding `rlp([c0, ..., c15, value])`. Branch
    /// values occur where one key is a strict prefix of another, e.g. an
    /// account leaf above its storage-page sub-keys.
    Branch {
        /// The 16 children of the branch.
        stack: Vec<TrieNode>,
        /// The value stored at the branch itself.
        value: Option<Bytes>,
    },
}

impl TrieNode {
    /// Creates a new [TrieNode::Blinded] from a commitment.
    pub const fn new_blinded(commitment: B256) -> Self {
        Self::Blinded { commitment }
    }


    /// The commitment of the node, if it is blinded.
    pub const fn blinded_commitment(&self) -> Option<B256> {
        match self {
            Self::Blinded { commitment } => Some(*commitment),
            _ => None,
        }
    }

    /// The root commitment of the node: `keccak256(rlp(self))`, or the empty
    /// root hash for [TrieNode::Empty].
    pub fn root(&self) -> B256 {
        match self {
            Self::Empty => EMPTY_ROOT_HASH,
            Self::Blinded { commitment } => *commitment,
            _ => keccak256(self.encode_inner(None)),
        }
    }

    /// Collapses the node to its commitment if its encoding is at least 32
    /// bytes. Smaller nodes stay inline, matching the trie's reference
    /// encoding.
    pub fn blind(&mut self) {
        if matches!(self, Self::Empty | Self::Blinded { .. }) {
            return;
        }
        let encoded = self.encode_inner(None);
        if encoded.len() >= 32 {
            *self = Self::Blinded { commitment: keccak256(encoded) };
        }
    }

    /// Replaces a blinded node with its stored contents.
    fn unblind<S: NodeStore>(&mut self, store: &S) -> DbResult<()> {
        if let Self::Blinded { commitment } = self {
            *self = store
                .trie_node_by_hash(*commitment)
                .map_err(|e| DbError::Store(e.to_string()))?;
        }
        Ok(())
    }

    /// Walks to `path`, unblinding as needed, and returns the value of the
    /// leaf there. A missing key is `Ok(None)`; structural violations (a key
    /// that ends inside a branch) are errors.
    pub fn open<S: NodeStore>(&mut self, path: &Nibbles, store: &S) -> DbResult<Option<Bytes>> {
        match self {
            Self::Empty => Ok(None),
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.open(path, store)
            }
            Self::Leaf { prefix, value } => {
                if prefix == path {
                    Ok(Some(value.clone()))
                } else {
                    Ok(None)
                }
            }
            Self::Extension { prefix, node } => {
                if path.len() >= prefix.len() && path.as_slice().starts_with(prefix.as_slice()) {
                    node.open(&path.slice(prefix.len()..), store)
                } else {
                    Ok(None)
                }
            }
            Self::Branch { stack, value } => {
                let Some(branch) = path.first() else {
                    return Ok(value.clone());
                };
                stack[branch as usize].open(&path.slice(1..), store)
            }
        }
    }

    /// Inserts `value` at `path`, splitting leaves and extensions as needed.
    /// A key that is a strict prefix of an existing key (or vice versa)
    /// lands in a branch value slot.
    pub fn insert<S: NodeStore>(
        &mut self,
        path: &Nibbles,
        value: Bytes,
        store: &S,
    ) -> DbResult<()> {
        match self {
            Self::Empty => {
                *self = Self::Leaf { prefix: path.clone(), value };
                Ok(())
            }
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.insert(path, value, store)
            }
            Self::Leaf { prefix, value: leaf_value } => {
                if prefix == path {
                    *leaf_value = value;
                    return Ok(());
                }

                let shared = prefix.common_prefix_length(path);
                let mut stack = vec![Self::Empty; BRANCH_WIDTH];
                let branch_value = if shared == path.len() {
                    // The new key ends at the divergence: it becomes the
                    // branch value, the old leaf moves below.
                    stack[prefix[shared] as usize] = Self::Leaf {
                        prefix: prefix.slice(shared + 1..),
                        value: leaf_value.clone(),
                    };
                    Some(value)
                } else if shared == prefix.len() {
                    // The old leaf ends at the divergence.
                    stack[path[shared] as usize] =
                        Self::Leaf { prefix: path.slice(shared + 1..), value };
                    Some(leaf_value.clone())
                } else {
                    stack[prefix[shared] as usize] = Self::Leaf {
                        prefix: prefix.slice(shared + 1..),
                        value: leaf_value.clone(),
                    };
                    stack[path[shared] as usize] =
                        Self::Leaf { prefix: path.slice(shared + 1..), value };
                    None
                };

                let branch = Self::Branch { stack, value: branch_value };
                *self = if shared > 0 {
                    Self::Extension { prefix: prefix.slice(..shared), node: Box::new(branch) }
                } else {
                    branch
                };
                Ok(())
            }
            Self::Extension { prefix, node } => {
                let shared = prefix.common_prefix_length(path);
                if shared == prefix.len() {
                    return node.insert(&path.slice(shared..), value, store);
                }

                // Split the extension at the divergence point.
                let remainder = prefix.slice(shared + 1..);
                let old_child = core::mem::replace(node.as_mut(), Self::Empty);
                let reparented = if remainder.is_empty() {
                    old_child
                } else {
                    Self::Extension { prefix: remainder, node: Box::new(old_child) }
                };

                let mut stack = vec![Self::Empty; BRANCH_WIDTH];
                stack[prefix[shared] as usize] = reparented;
                let branch_value = if shared == path.len() {
                    Some(value)
                } else {
                    stack[path[shared] as usize] =
                        Self::Leaf { prefix: path.slice(shared + 1..), value };
                    None
                };

                let branch = Self::Branch { stack, value: branch_value };
                *self = if shared > 0 {
                    Self::Extension { prefix: prefix.slice(..shared), node: Box::new(branch) }
                } else {
                    branch
                };
                Ok(())
            }
            Self::Branch { stack, value: branch_value } => {
                let Some(branch) = path.first() else {
                    *branch_value = Some(value);
                    return Ok(());
                };
                stack[branch as usize].insert(&path.slice(1..), value, store)
            }
        }
    }

    /// Deletes the value at `path`, collapsing single-child branches and
    /// pass-through extensions on the way back up.
    pub fn delete<S: NodeStore>(&mut self, path: &Nibbles, store: &S) -> DbResult<()> {
        match self {
            Self::Empty => Err(DbError::KeyMismatch),
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.delete(path, store)
            }
            Self::Leaf { prefix, .. } => {
                if prefix == path {
                    *self = Self::Empty;
                    Ok(())
                } else {
                    Err(DbError::KeyMismatch)
                }
            }
            Self::Extension { prefix, node } => {
                if path.len() >= prefix.len() && path.as_slice().starts_with(prefix.as_slice()) {
                    node.delete(&path.slice(prefix.len()..), store)?;
                    self.collapse_extension(store)
                } else {
                    Err(DbError::KeyMismatch)
                }
            }
            Self::Branch { stack, value } => {
                let Some(branch) = path.first() else {
                    if value.take().is_none() {
                        return Err(DbError::KeyMismatch);
                    }
                    return self.collapse_branch(store);
                };
                if matches!(stack[branch as usize], Self::Empty) {
                    return Err(DbError::BranchNotExist);
                }
                stack[branch as usize].delete(&path.slice(1..), store)?;
                self.collapse_branch(store)
            }
        }
    }

    /// Collapses a branch left with fewer than two occupants.
    fn collapse_branch<S: NodeStore>(&mut self, store: &S) -> DbResult<()> {
        let Self::Branch { stack, value } = self else {
            return Ok(());
        };

        let mut occupied = stack
            .iter()
            .enumerate()
            .filter(|(_, node)| !matches!(node, Self::Empty));
        let Some((index, _)) = occupied.next() else {
            // No children left: only the branch value, or nothing at all.
            *self = match value.take() {
                Some(value) => Self::Leaf { prefix: Nibbles::default(), value },
                None => Self::Empty,
            };
            return Ok(());
        };
        if occupied.next().is_some() || value.is_some() {
            return Ok(());
        }

        // Single survivor: absorb the branch nibble into the child.
        let mut child = core::mem::replace(&mut stack[index], Self::Empty);
        child.unblind(store)?;
        *self = match child {
            Self::Leaf { prefix, value } => {
                Self::Leaf { prefix: prepend_nibble(index as u8, &prefix), value }
            }
            Self::Extension { prefix, node } => {
                Self::Extension { prefix: prepend_nibble(index as u8, &prefix), node }
            }
            branch @ Self::Branch { .. } => Self::Extension {
                prefix: Nibbles::from_nibbles_unchecked([index as u8]),
                node: Box::new(branch),
            },
            Self::Empty | Self::Blinded { .. } => unreachable!("survivor was unblinded"),
        };
        Ok(())
    }

    /// Collapses an extension whose child shrank to a non-branch node.
    fn collapse_extension<S: NodeStore>(&mut self, store: &S) -> DbResult<()> {
        let Self::Extension { prefix, node } = self else {
            return Ok(());
        };
        node.unblind(store)?;
        match node.as_mut() {
            Self::Empty => *self = Self::Empty,
            Self::Leaf { prefix: leaf_prefix, value } => {
                *self = Self::Leaf {
                    prefix: join_nibbles(prefix, leaf_prefix),
                    value: core::mem::take(value),
                };
            }
            Self::Extension { prefix: child_prefix, node: grandchild } => {
                let merged = join_nibbles(prefix, child_prefix);
                let grandchild = core::mem::replace(grandchild.as_mut(), Self::Empty);
                *self = Self::Extension { prefix: merged, node: Box::new(grandchild) };
            }
            Self::Branch { .. } => {}
            Self::Blinded { .. } => unreachable!("child was unblinded"),
        }
        Ok(())
    }

    /// Encodes the node, recording every node whose encoding is at least 32
    /// bytes into `out`, and returns the root commitment. The root itself is
    /// always recorded so lookups can start from its hash.
    pub fn persist(&self, out: &mut Vec<(B256, Bytes)>) -> B256 {
        match self {
            Self::Empty => EMPTY_ROOT_HASH,
            Self::Blinded { commitment } => *commitment,
            _ => {
                let encoded = self.encode_inner(Some(out));
                let root = keccak256(&encoded);
                if encoded.len() < 32 {
                    out.push((root, encoded.into()));
                }
                root
            }
        }
    }

    /// Recursively RLP-encodes the node. When `record` is set, every node
    /// whose encoding reaches 32 bytes is pushed with its commitment.
    fn encode_inner(&self, mut record: Option<&mut Vec<(B256, Bytes)>>) -> Vec<u8> {
        fn child_ref(
            child: &TrieNode,
            out: &mut Vec<u8>,
            record: Option<&mut Vec<(B256, Bytes)>>,
        ) {
            match child {
                TrieNode::Empty => out.push(EMPTY_STRING_CODE),
                TrieNode::Blinded { commitment } => commitment.encode(out),
                _ => {
                    let encoded = child.encode_inner(record);
                    if encoded.len() < 32 {
                        out.extend_from_slice(&encoded);
                    } else {
                        keccak256(encoded).encode(out);
                    }
                }
            }
        }

        let mut payload = Vec::with_capacity(64);
        match self {
            Self::Empty => return vec![EMPTY_STRING_CODE],
            Self::Blinded { commitment } => {
                let mut out = Vec::with_capacity(33);
                commitment.encode(&mut out);
                return out;
            }
            Self::Leaf { prefix, value } => {
                encode_path(prefix, true).as_slice().encode(&mut payload);
                value.encode(&mut payload);
            }
            Self::Extension { prefix, node } => {
                encode_path(prefix, false).as_slice().encode(&mut payload);
                child_ref(node, &mut payload, record.as_deref_mut());
            }
            Self::Branch { stack, value } => {
                for child in stack {
                    child_ref(child, &mut payload, record.as_deref_mut());
                }
                match value {
                    Some(value) => value.encode(&mut payload),
                    None => payload.push(EMPTY_STRING_CODE),
                }
            }
        }

        let mut out = Vec::with_capacity(payload.len() + 4);
        Header { list: true, payload_length: payload.len() }.encode(&mut out);
        out.extend_from_slice(&payload);

        if out.len() >= 32 {
            if let Some(record) = record {
                record.push((keccak256(&out), out.clone().into()));
            }
        }
        out
    }
}

impl Encodable for TrieNode {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        out.put_slice(&self.encode_inner(None));
    }

    fn length(&self) -> usize {
        self.encode_inner(None).len()
    }
}

impl Decodable for TrieNode {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            let payload = &buf[..header.payload_length];
            buf.advance(header.payload_length);
            return match payload.len() {
                0 => Ok(Self::Empty),
                32 => Ok(Self::Blinded { commitment: B256::from_slice(payload) }),
                _ => Err(alloy_rlp::Error::UnexpectedLength),
            };
        }

        let mut payload = &buf[..header.payload_length];
        buf.advance(header.payload_length);

        let mut elements = Vec::with_capacity(BRANCH_LIST_LENGTH);
        while !payload.is_empty() {
            elements.push(split_element(&mut payload)?);
        }

        match elements.len() {
            BRANCH_LIST_LENGTH => {
                let mut stack = Vec::with_capacity(BRANCH_WIDTH);
                for element in &elements[..BRANCH_WIDTH] {
                    stack.push(decode_child(element)?);
                }
                let value = if elements[BRANCH_WIDTH] == [EMPTY_STRING_CODE] {
                    None
                } else {
                    Some(Bytes::decode(&mut &*elements[BRANCH_WIDTH])?)
                };
                Ok(Self::Branch { stack, value })
            }
            LEAF_OR_EXTENSION_LIST_LENGTH => {
                let path = Bytes::decode(&mut &*elements[0])?;
                if path.is_empty() {
                    return Err(alloy_rlp::Error::InputTooShort);
                }
                let odd = path[0] & 0x10 != 0;
                let first = odd.then_some(path[0] & 0x0F);
                let prefix = unpack_path_to_nibbles(first, &path[1..]);
                match path[0] >> 4 {
                    PREFIX_EXTENSION_EVEN | PREFIX_EXTENSION_ODD => {
                        let node = decode_child(&elements[1])?;
                        Ok(Self::Extension { prefix, node: Box::new(node) })
                    }
                    PREFIX_LEAF_EVEN | PREFIX_LEAF_ODD => {
                        let value = Bytes::decode(&mut &*elements[1])?;
                        Ok(Self::Leaf { prefix, value })
                    }
                    _ => Err(alloy_rlp::Error::Custom(
                        "unexpected path identifier in high-order nibble",
                    )),
                }
            }
            _ => Err(alloy_rlp::Error::UnexpectedLength),
        }
    }
}

/// Splits the next RLP element (header included) off the front of `buf`.
fn split_element<'a>(buf: &mut &'a [u8]) -> alloy_rlp::Result<&'a [u8]> {
    let mut peek = *buf;
    let header = Header::decode(&mut peek)?;
    let total = buf.len() - peek.len() + header.payload_length;
    if buf.len() < total {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let (element, rest) = buf.split_at(total);
    *buf = rest;
    Ok(element)
}

/// Decodes a child slot of a branch or extension: an empty string, a 32-byte
/// commitment, or an inline sub-node.
fn decode_child(mut element: &[u8]) -> alloy_rlp::Result<TrieNode> {
    if element == [EMPTY_STRING_CODE] {
        return Ok(TrieNode::Empty);
    }
    TrieNode::decode(&mut element)
}

/// Hex-prefix encodes a nibble path per the yellow paper appendix C.
fn encode_path(prefix: &Nibbles, is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { PREFIX_LEAF_EVEN } else { PREFIX_EXTENSION_EVEN };
    let nibbles = prefix.as_slice();
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    if nibbles.len() % 2 == 0 {
        out.push(flag << 4);
        for pair in nibbles.chunks_exact(2) {
            out.push(pair[0] << 4 | pair[1]);
        }
    } else {
        out.push((flag | 1) << 4 | nibbles[0]);
        for pair in nibbles[1..].chunks_exact(2) {
            out.push(pair[0] << 4 | pair[1]);
        }
    }
    out
}

/// Unpacks a hex-prefix path to nibbles.
fn unpack_path_to_nibbles(first: Option<u8>, rest: &[u8]) -> Nibbles {
    let rest = Nibbles::unpack(rest);
    Nibbles::from_vec_unchecked(
        first.into_iter().chain(rest.iter().copied()).collect::<Vec<u8>>(),
    )
}

/// Prepends a single nibble to a path.
fn prepend_nibble(nibble: u8, path: &Nibbles) -> Nibbles {
    let mut nibbles = Vec::with_capacity(path.len() + 1);
    nibbles.push(nibble);
    nibbles.extend_from_slice(path.as_slice());
    Nibbles::from_vec_unchecked(nibbles)
}

/// Concatenates two nibble paths.
fn join_nibbles(a: &Nibbles, b: &Nibbles) -> Nibbles {
    let mut nibbles = Vec::with_capacity(a.len() + b.len());
    nibbles.extend_from_slice(a.as_slice());
    nibbles.extend_from_slice(b.as_slice());
    Nibbles::from_vec_unchecked(nibbles)
}
