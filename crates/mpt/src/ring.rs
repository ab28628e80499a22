//! A fixed ring of recently committed trie roots, indexed by block number.

use alloy_primitives::B256;

/// Holds the last `N` committed roots keyed by `block_number % N`, with a
/// high-water mark. Gaps are cleared in amortised O(1): a jump of `N` or more
/// blocks zeroes the whole buffer, a smaller jump clears only the missed
/// slots. Reads outside the live window return `None`.
#[derive(Debug, Clone)]
pub struct RootRingBuffer<const N: usize> {
    slots: Box<[Option<(u64, B256)>; N]>,
    high_water: Option<u64>,
}

impl<const N: usize> Default for RootRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RootRingBuffer<N> {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self { slots: Box::new([None; N]), high_water: None }
    }

    /// The highest block number ever inserted.
    pub const fn high_water(&self) -> Option<u64> {
        self.high_water
    }

    /// Inserts the root committed at `block_number`. Blocks older than the
    /// live window are ignored; inserting ahead of the high-water mark
    /// clears any skipped slots first.
    pub fn insert(&mut self, block_number: u64, root: B256) {
        if let Some(high_water) = self.high_water {
            if block_number < high_water {
                if high_water - block_number > N as u64 - 1 {
                    // Too old to cache.
                    return;
                }
                self.slots[(block_number % N as u64) as usize] = Some((block_number, root));
                return;
            }
            let gap = block_number - high_water;
            if gap >= N as u64 {
                self.slots.fill(None);
            } else {
                for missed in high_water + 1..block_number {
                    self.slots[(missed % N as u64) as usize] = None;
                }
            }
        }
        self.slots[(block_number % N as u64) as usize] = Some((block_number, root));
        self.high_water = Some(block_number);
    }

    /// The root committed at `block_number`, if it is still in the window.
    pub fn find(&self, block_number: u64) -> Option<B256> {
        self.slots[(block_number % N as u64) as usize]
            .filter(|(number, _)| *number == block_number)
            .map(|(_, root)| root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(i: u64) -> B256 {
        B256::with_last_byte(i as u8)
    }

    #[test]
    fn test_sequential_insertion() {
        let mut buffer = RootRingBuffer::<5>::new();
        buffer.insert(0, root(0));
        buffer.insert(1, root(1));
        buffer.insert(2, root(2));

        assert_eq!(buffer.find(0), Some(root(0)));
        assert_eq!(buffer.find(1), Some(root(1)));
        assert_eq!(buffer.find(2), Some(root(2)));
    }

    #[test]
    fn test_eviction() {
        let mut buffer = RootRingBuffer::<5>::new();
        for i in 0..10 {
            buffer.insert(i, root(i));
        }

        // Only last 5 should remain.
        assert_eq!(buffer.find(4), None);
        assert!(buffer.find(5).is_some());
        assert!(buffer.find(9).is_some());
    }

    #[test]
    fn test_small_gap() {
        let mut buffer = RootRingBuffer::<5>::new();
        buffer.insert(0, root(0));
        buffer.insert(3, root(3)); // gap of 2 blocks

        assert_eq!(buffer.find(0), Some(root(0)));
        assert_eq!(buffer.find(3), Some(root(3)));
        // Gaps should be cleared.
        assert_eq!(buffer.find(1), None);
        assert_eq!(buffer.find(2), None);
    }

    #[test]
    fn test_large_gap() {
        let mut buffer = RootRingBuffer::<5>::new();
        buffer.insert(0, root(0));
        buffer.insert(1000, root(100)); // large gap

        assert_eq!(buffer.find(0), None);
        assert_eq!(buffer.find(1000), Some(root(100)));
    }

    #[test]
    fn test_out_of_range_insert_ignored() {
        let mut buffer = RootRingBuffer::<5>::new();
        buffer.insert(10, root(10));
        buffer.insert(5, root(5)); // too old (10 - 5 > N - 1)

        assert_eq!(buffer.find(5), None);
        assert_eq!(buffer.find(10), Some(root(10)));
    }

    #[test]
    fn test_wraparound() {
        let mut buffer = RootRingBuffer::<5>::new();
        for i in 0..20 {
            buffer.insert(i, root(i));
        }

        assert_eq!(buffer.find(14), None);
        assert!(buffer.find(15).is_some());
        assert!(buffer.find(19).is_some());
    }

    #[test]
    fn test_spec_jump_scenario() {
        let mut buffer = RootRingBuffer::<256>::new();
        buffer.insert(0, root(1));
        buffer.insert(10_000, root(2));

        assert_eq!(buffer.find(0), None);
        assert_eq!(buffer.find(10_000), Some(root(2)));
    }
}
