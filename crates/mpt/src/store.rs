//! Content-addressed node persistence: the [NodeStore] trait, an in-memory
//! store for tests and genesis bootstrapping, and the on-disk [PoolNodeStore]
//! backed by the `io_uring` runtime.

use crate::TrieNode;
use alloy_primitives::{Bytes, B256};
use alloy_rlp::Decodable;
use monad_io::{AsyncIo, BLOCK_SIZE};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, VecDeque},
    fs::{File, OpenOptions},
    os::{fd::AsRawFd, unix::fs::FileExt},
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};

/// The synchronous interface for fetching trie node preimages by commitment.
pub trait NodeStore: Send + Sync {
    /// The error type for fetching trie node preimages.
    type Error: core::fmt::Display;

    /// Fetches and decodes the node committed to by `hash`.
    fn trie_node_by_hash(&self, hash: B256) -> Result<TrieNode, Self::Error>;
}

/// The write side of a node store.
pub trait NodeWriter {
    /// Stores the RLP encoding of a node under its commitment.
    fn put_node(&self, hash: B256, encoded: Bytes) -> Result<(), String>;
}

/// An in-memory content-addressed node store.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<B256, Bytes>>,
}

impl MemoryNodeStore {
    /// Stores the RLP encoding of a node under its commitment.
    pub fn put(&self, hash: B256, encoded: Bytes) {
        self.nodes.write().insert(hash, encoded);
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    type Error = String;

    fn trie_node_by_hash(&self, hash: B256) -> Result<TrieNode, Self::Error> {
        let nodes = self.nodes.read();
        let encoded = nodes.get(&hash).ok_or_else(|| format!("missing trie node {hash}"))?;
        TrieNode::decode(&mut encoded.as_ref()).map_err(|e| format!("corrupt node {hash}: {e}"))
    }
}

impl NodeWriter for MemoryNodeStore {
    fn put_node(&self, hash: B256, encoded: Bytes) -> Result<(), String> {
        self.put(hash, encoded);
        Ok(())
    }
}

/// Magic bytes opening every storage pool file.
const POOL_MAGIC: [u8; 8] = *b"MONADPL\0";

/// On-disk format version.
const POOL_VERSION: u32 = 1;

/// Bytes per chunk; block addresses decompose into `(chunk_id, offset)`.
const CHUNK_SIZE: u64 = 1 << 30;

/// Decoded-node cache entries kept hot.
const NODE_CACHE_CAP: usize = 4096;

/// Record framing: payload length then commitment then payload.
const RECORD_HEADER_LEN: usize = 4 + 32;

#[derive(Debug)]
struct Tail {
    /// Absolute file offset one past the last appended byte.
    offset: u64,
    /// Contents of the final, possibly partial, block.
    block: Box<[u8]>,
}

#[derive(Debug, Default)]
struct NodeCache {
    nodes: HashMap<B256, Bytes>,
    order: VecDeque<B256>,
}

impl NodeCache {
    fn insert(&mut self, hash: B256, encoded: Bytes) {
        if self.nodes.insert(hash, encoded).is_none() {
            self.order.push_back(hash);
            while self.order.len() > NODE_CACHE_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.nodes.remove(&evicted);
                }
            }
        }
    }
}

/// An append-only storage pool of 4 KiB blocks holding content-addressed
/// node records. The layout is WAL-like: block 0 is the pool header, records
/// follow densely and may straddle block boundaries. An in-memory index maps
/// commitments to `(offset, length)` and is rebuilt by scanning on open.
pub struct PoolNodeStore {
    file: File,
    io: Option<Arc<AsyncIo>>,
    index: RwLock<HashMap<B256, (u64, u32)>>,
    tail: Mutex<Tail>,
    cache: RwLock<NodeCache>,
}

impl std::fmt::Debug for PoolNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolNodeStore")
            .field("nodes", &self.index.read().len())
            .field("tail", &self.tail.lock().offset)
            .finish()
    }
}

impl PoolNodeStore {
    /// Opens or creates a pool file. When an [AsyncIo] runtime is supplied
    /// all block transfers go through the ring; otherwise positioned file
    /// I/O is used directly.
    pub fn open(path: &Path, io: Option<Arc<AsyncIo>>) -> Result<Self, String> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| format!("open {}: {e}", path.display()))?;

        let store = Self {
            file,
            io,
            index: RwLock::new(HashMap::new()),
            tail: Mutex::new(Tail {
                offset: BLOCK_SIZE as u64,
                block: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            }),
            cache: RwLock::new(NodeCache::default()),
        };

        let file_len =
            store.file.metadata().map_err(|e| format!("stat pool: {e}"))?.len();
        if file_len == 0 {
            store.write_header(BLOCK_SIZE as u64)?;
            info!(target: "triedb", path = %path.display(), "created storage pool");
        } else {
            store.recover()?;
        }
        Ok(store)
    }

    /// Decomposes an absolute offset into its `(chunk_id, offset_in_chunk)`
    /// address.
    pub const fn chunk_address(offset: u64) -> (u32, u64) {
        ((offset / CHUNK_SIZE) as u32, offset % CHUNK_SIZE)
    }

    fn write_header(&self, tail: u64) -> Result<(), String> {
        let mut header = vec![0u8; BLOCK_SIZE];
        header[..8].copy_from_slice(&POOL_MAGIC);
        header[8..12].copy_from_slice(&POOL_VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
        header[16..24].copy_from_slice(&tail.to_le_bytes());
        self.write_block(0, &header)
    }

    /// Rebuilds the index by scanning records from the first data block to
    /// the persisted tail.
    fn recover(&self) -> Result<(), String> {
        let header = self.read_block(0)?;
        if header[..8] != POOL_MAGIC {
            return Err("bad pool magic".to_string());
        }
        let version = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        if version != POOL_VERSION {
            return Err(format!("unsupported pool version {version}"));
        }
        let tail = u64::from_le_bytes(header[16..24].try_into().expect("8 bytes"));

        let mut index = self.index.write();
        let mut cursor = BLOCK_SIZE as u64;
        while cursor + RECORD_HEADER_LEN as u64 <= tail {
            let header_bytes = self.read_span(cursor, RECORD_HEADER_LEN)?;
            let len = u32::from_le_bytes(header_bytes[..4].try_into().expect("4 bytes"));
            let hash = B256::from_slice(&header_bytes[4..36]);
            let payload_offset = cursor + RECORD_HEADER_LEN as u64;
            if payload_offset + len as u64 > tail {
                break;
            }
            index.insert(hash, (payload_offset, len));
            cursor = payload_offset + len as u64;
        }
        drop(index);

        let mut tail_state = self.tail.lock();
        tail_state.offset = cursor;
        let tail_block_start = cursor / BLOCK_SIZE as u64 * BLOCK_SIZE as u64;
        tail_state.block = self.read_block(tail_block_start / BLOCK_SIZE as u64)?.into();
        debug!(target: "triedb", nodes = self.index.read().len(), tail = cursor, "pool recovered");
        Ok(())
    }

    fn write_block(&self, block_index: u64, data: &[u8]) -> Result<(), String> {
        debug_assert_eq!(data.len(), BLOCK_SIZE);
        match &self.io {
            Some(io) => io
                .write_block_sync(self.file.as_raw_fd(), block_index * BLOCK_SIZE as u64, data)
                .map_err(|e| e.to_string()),
            None => self
                .file
                .write_all_at(data, block_index * BLOCK_SIZE as u64)
                .map_err(|e| e.to_string()),
        }
    }

    fn read_block(&self, block_index: u64) -> Result<Vec<u8>, String> {
        match &self.io {
            Some(io) => {
                let buffer = io
                    .read_block_sync(self.file.as_raw_fd(), block_index * BLOCK_SIZE as u64)
                    .map_err(|e| e.to_string())?;
                let out = buffer.as_slice().to_vec();
                io.release_read_buffer(buffer);
                Ok(out)
            }
            None => {
                let mut out = vec![0u8; BLOCK_SIZE];
                // The tail block may be short on disk; treat the remainder
                // as zeroes.
                let mut filled = 0;
                let base = block_index * BLOCK_SIZE as u64;
                while filled < BLOCK_SIZE {
                    match self.file.read_at(&mut out[filled..], base + filled as u64) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => return Err(e.to_string()),
                    }
                }
                Ok(out)
            }
        }
    }

    /// Reads `len` bytes starting at absolute `offset`, crossing block
    /// boundaries as needed.
    fn read_span(&self, offset: u64, len: usize) -> Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = offset;
        while out.len() < len {
            let block_index = cursor / BLOCK_SIZE as u64;
            let in_block = (cursor % BLOCK_SIZE as u64) as usize;
            let block = self.read_block(block_index)?;
            let take = (len - out.len()).min(BLOCK_SIZE - in_block);
            out.extend_from_slice(&block[in_block..in_block + take]);
            cursor += take as u64;
        }
        Ok(out)
    }

    /// Appends the RLP encoding of a node under its commitment. The tail
    /// block is rewritten on every append so readers never race a partially
    /// persisted record.
    pub fn put(&self, hash: B256, encoded: Bytes) -> Result<(), String> {
        if self.index.read().contains_key(&hash) {
            // Content-addressed: an existing record is already this value.
            return Ok(());
        }

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + encoded.len());
        record.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        record.extend_from_slice(hash.as_slice());
        record.extend_from_slice(&encoded);

        let mut tail = self.tail.lock();
        let payload_offset = tail.offset + RECORD_HEADER_LEN as u64;

        let mut written = 0;
        while written < record.len() {
            let in_block = (tail.offset % BLOCK_SIZE as u64) as usize;
            let take = (record.len() - written).min(BLOCK_SIZE - in_block);
            let block_index = tail.offset / BLOCK_SIZE as u64;
            tail.block[in_block..in_block + take]
                .copy_from_slice(&record[written..written + take]);
            written += take;
            tail.offset += take as u64;
            if (tail.offset % BLOCK_SIZE as u64) == 0 {
                let block = std::mem::replace(
                    &mut tail.block,
                    vec![0u8; BLOCK_SIZE].into_boxed_slice(),
                );
                self.write_block(block_index, &block)?;
            }
        }
        // Persist the partial tail block as well.
        if (tail.offset % BLOCK_SIZE as u64) != 0 {
            self.write_block(tail.offset / BLOCK_SIZE as u64, &tail.block)?;
        }
        let tail_offset = tail.offset;
        drop(tail);

        self.index.write().insert(hash, (payload_offset, encoded.len() as u32));
        self.cache.write().insert(hash, encoded);
        self.write_header(tail_offset)
    }

    /// Warms the node cache from fiber context, parking the calling fiber on
    /// the ring while blocks are in flight.
    pub async fn prefetch(&self, hash: B256) -> Result<(), String> {
        let Some(io) = self.io.clone() else {
            // Positioned-I/O fallback has no async path; read inline.
            return self.fetch(hash).map(drop);
        };
        if self.cache.read().nodes.contains_key(&hash) {
            return Ok(());
        }
        let Some((offset, len)) = self.index.read().get(&hash).copied() else {
            return Err(format!("missing trie node {hash}"));
        };

        let mut out = Vec::with_capacity(len as usize);
        let mut cursor = offset;
        while out.len() < len as usize {
            let block_start = cursor / BLOCK_SIZE as u64 * BLOCK_SIZE as u64;
            let in_block = (cursor - block_start) as usize;
            let buffer = io
                .read_block_fiber(self.file.as_raw_fd(), block_start)
                .await
                .map_err(|e| e.to_string())?;
            let take = (len as usize - out.len()).min(BLOCK_SIZE - in_block);
            out.extend_from_slice(&buffer.as_slice()[in_block..in_block + take]);
            io.release_read_buffer(buffer);
            cursor += take as u64;
        }
        self.cache.write().insert(hash, out.into());
        Ok(())
    }

    /// Fetches the raw encoding of a node, from cache or disk.
    fn fetch(&self, hash: B256) -> Result<Bytes, String> {
        if let Some(encoded) = self.cache.read().nodes.get(&hash) {
            return Ok(encoded.clone());
        }
        let Some((offset, len)) = self.index.read().get(&hash).copied() else {
            return Err(format!("missing trie node {hash}"));
        };
        let encoded: Bytes = self.read_span(offset, len as usize)?.into();
        self.cache.write().insert(hash, encoded.clone());
        Ok(encoded)
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the pool holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

impl NodeStore for PoolNodeStore {
    type Error = String;

    fn trie_node_by_hash(&self, hash: B256) -> Result<TrieNode, Self::Error> {
        let encoded = self.fetch(hash)?;
        TrieNode::decode(&mut encoded.as_ref()).map_err(|e| format!("corrupt node {hash}: {e}"))
    }
}

impl NodeWriter for PoolNodeStore {
    fn put_node(&self, hash: B256, encoded: Bytes) -> Result<(), String> {
        self.put(hash, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    fn sample_nodes(count: u8) -> Vec<(B256, Bytes)> {
        (0..count)
            .map(|i| {
                let encoded = Bytes::from(vec![i; 100 + i as usize]);
                (keccak256(&encoded), encoded)
            })
            .collect()
    }

    #[test]
    fn test_pool_put_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = PoolNodeStore::open(&dir.path().join("pool.db"), None).unwrap();
        for (hash, encoded) in sample_nodes(50) {
            store.put(hash, encoded.clone()).unwrap();
            assert_eq!(store.fetch(hash).unwrap(), encoded);
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_pool_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let nodes = sample_nodes(120);
        {
            let store = PoolNodeStore::open(&path, None).unwrap();
            for (hash, encoded) in &nodes {
                store.put(*hash, encoded.clone()).unwrap();
            }
        }

        let reopened = PoolNodeStore::open(&path, None).unwrap();
        assert_eq!(reopened.len(), nodes.len());
        for (hash, encoded) in &nodes {
            assert_eq!(&reopened.fetch(*hash).unwrap(), encoded);
        }
        // And appends still work after recovery.
        let extra = Bytes::from_static(b"post-recovery node");
        let extra_hash = keccak256(&extra);
        reopened.put(extra_hash, extra.clone()).unwrap();
        assert_eq!(reopened.fetch(extra_hash).unwrap(), extra);
    }

    #[test]
    fn test_chunk_address() {
        assert_eq!(PoolNodeStore::chunk_address(0), (0, 0));
        assert_eq!(PoolNodeStore::chunk_address(CHUNK_SIZE + 4096), (1, 4096));
    }

    #[test]
    fn test_missing_node() {
        let dir = tempfile::tempdir().unwrap();
        let store = PoolNodeStore::open(&dir.path().join("pool.db"), None).unwrap();
        assert!(store.trie_node_by_hash(B256::repeat_byte(9)).is_err());
    }

    #[test]
    fn test_prefetch_then_decode() {
        use crate::TrieNode;
        use alloy_rlp::Encodable;
        use alloy_trie::Nibbles;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(PoolNodeStore::open(&dir.path().join("pool.db"), None).unwrap());

        let node = TrieNode::Leaf {
            prefix: Nibbles::unpack(keccak256(b"leaf")),
            value: Bytes::from(vec![0xAA; 64]),
        };
        let mut encoded = Vec::new();
        node.encode(&mut encoded);
        let hash = keccak256(&encoded);
        store.put(hash, encoded.into()).unwrap();

        let mut scheduler = monad_fiber::FiberScheduler::new();
        let fetched = Arc::clone(&store);
        let result = scheduler.block_on(None, async move { fetched.prefetch(hash).await });
        assert!(result.is_ok());
        assert_eq!(store.trie_node_by_hash(hash).unwrap(), node);
    }
}
