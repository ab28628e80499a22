//! Recent block hash window for `BLOCKHASH` lookups.

use alloy_primitives::B256;

/// How far back `BLOCKHASH` may reach, per the yellow paper.
pub const BLOCK_HASH_HISTORY: u64 = 256;

/// A fixed window of recent block hashes, indexed by block number. Hashes
/// outside the live window resolve to zero, matching EVM semantics for
/// out-of-range `BLOCKHASH`.
#[derive(Debug, Clone)]
pub struct BlockHashBuffer {
    hashes: Box<[B256; BLOCK_HASH_HISTORY as usize]>,
    /// Number of the next block to execute; the window covers
    /// `[next.saturating_sub(256), next)`.
    next: u64,
}

impl Default for BlockHashBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockHashBuffer {
    /// Creates an empty buffer positioned at genesis.
    pub fn new() -> Self {
        Self { hashes: Box::new([B256::ZERO; BLOCK_HASH_HISTORY as usize]), next: 0 }
    }

    /// Records the hash of `number` and advances the window. Numbers must be
    /// appended in order; re-appending an already-covered number rewinds the
    /// window to it (fork switch within the proposal cache).
    pub fn push(&mut self, number: u64, hash: B256) {
        self.hashes[(number % BLOCK_HASH_HISTORY) as usize] = hash;
        self.next = number + 1;
    }

    /// The hash of block `number`, or zero when outside the live window.
    pub fn get(&self, number: u64) -> B256 {
        if number >= self.next || self.next - number > BLOCK_HASH_HISTORY {
            return B256::ZERO;
        }
        self.hashes[(number % BLOCK_HASH_HISTORY) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_lookup() {
        let mut buf = BlockHashBuffer::new();
        for i in 0..300u64 {
            buf.push(i, B256::with_last_byte((i % 251) as u8));
        }

        assert_eq!(buf.get(299), B256::with_last_byte((299 % 251) as u8));
        assert_eq!(buf.get(300), B256::ZERO); // not yet executed
        assert_eq!(buf.get(43), B256::ZERO); // evicted
        assert_eq!(buf.get(44), B256::with_last_byte(44));
    }

    #[test]
    fn test_empty_buffer() {
        let buf = BlockHashBuffer::new();
        assert_eq!(buf.get(0), B256::ZERO);
    }
}
