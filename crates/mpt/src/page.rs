//! Storage pages: groups of 16 adjacent storage slots sharing one on-disk
//! value, with a run-length codec tuned for sparse pages.
//!
//! Encoding alternates zero-runs and data-runs:
//!
//! ```text
//! Header byte  | Meaning
//! -------------|----------------------------------------------------------
//! 0x00..0x7F   | Zero-run of 0..127 slots (0x00 terminates the encoding
//!              | since it advances by 0: the remaining slots are zero).
//! 0x80..0xFF   | Data-run of `(header & 0x7F) + 1` non-zero slots, each an
//!              | RLP string with leading zeros stripped.
//! ```
//!
//! Examples:
//! - All-zero page:                  `0x00`
//! - Slot 0 = 1, rest zero:          `0x80 0x01 0x00`
//! - Slots 0-2 zero, slot 3 = 0xAB:  `0x03 0x80 0x81 0xAB 0x00`

use crate::errors::{DecodeError, DecodeResult};
use alloy_primitives::{B256, U256};

/// Number of slots grouped into one storage page.
pub const PAGE_SLOTS: usize = 16;

/// Low-nibble mask selecting a slot within its page.
const SLOT_MASK: u8 = (PAGE_SLOTS - 1) as u8;

/// Bits of the slot key consumed by the in-page offset.
const SLOT_BITS: usize = PAGE_SLOTS.ilog2() as usize;

/// A page of [PAGE_SLOTS] adjacent storage slots. Slots are 32-byte values;
/// an all-zero page has no persistent form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePage {
    /// The slot values.
    pub slots: [B256; PAGE_SLOTS],
}

impl Default for StoragePage {
    fn default() -> Self {
        Self { slots: [B256::ZERO; PAGE_SLOTS] }
    }
}

impl StoragePage {
    /// The key of the page containing `slot_key`: the slot key shifted right
    /// past the in-page offset bits.
    pub fn page_key(slot_key: &B256) -> B256 {
        let shifted = U256::from_be_bytes(slot_key.0) >> SLOT_BITS;
        B256::from(shifted.to_be_bytes::<32>())
    }

    /// The offset of `slot_key` within its page.
    pub const fn slot_offset(slot_key: &B256) -> usize {
        (slot_key.0[31] & SLOT_MASK) as usize
    }

    /// Returns `true` if every slot is zero.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_zero())
    }

    /// Run-length encodes the page.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(PAGE_SLOTS);
        let mut i = 0;
        while i < PAGE_SLOTS {
            if self.slots[i].is_zero() {
                let mut zeros = 1;
                while i + zeros < PAGE_SLOTS && self.slots[i + zeros].is_zero() {
                    zeros += 1;
                }
                if i + zeros == PAGE_SLOTS {
                    // Rest of page is zeros: emit the terminator.
                    encoded.push(0x00);
                    break;
                }
                // Zero-run count (0x01..0x7F).
                encoded.push(zeros as u8);
                i += zeros;
            } else {
                let mut run = 1;
                while i + run < PAGE_SLOTS && run < 128 && !self.slots[i + run].is_zero() {
                    run += 1;
                }
                // Data-run header, then compact-encoded values.
                encoded.push(0x80 | (run as u8 - 1));
                for j in 0..run {
                    encode_bytes32_compact(&self.slots[i + j], &mut encoded);
                }
                i += run;
            }
        }
        encoded
    }

    /// Decodes a run-length-encoded page, consuming from `enc`. Rejects
    /// truncated input and runs that would cross the page boundary.
    pub fn decode(enc: &mut &[u8]) -> DecodeResult<Self> {
        let mut page = Self::default();
        let mut i = 0;
        while i < PAGE_SLOTS {
            let Some((&header, rest)) = enc.split_first() else {
                return Err(DecodeError::InputTooShort);
            };
            *enc = rest;
            if header == 0x00 {
                // Rest is zeros (already zero-initialized).
                break;
            } else if header < 0x80 {
                i += header as usize;
            } else {
                let count = (header & 0x7F) as usize + 1;
                if i + count > PAGE_SLOTS {
                    return Err(DecodeError::InputTooLong);
                }
                for j in 0..count {
                    page.slots[i + j] = decode_bytes32_compact(enc)?;
                }
                i += count;
            }
        }
        if i > PAGE_SLOTS {
            return Err(DecodeError::InputTooLong);
        }
        Ok(page)
    }
}

/// Encodes a 32-byte word as an RLP string with leading zeros stripped.
fn encode_bytes32_compact(value: &B256, out: &mut Vec<u8>) {
    let stripped = &value.0[value.0.iter().take_while(|byte| **byte == 0).count()..];
    match stripped {
        [] => out.push(alloy_rlp::EMPTY_STRING_CODE),
        [byte] if *byte < 0x80 => out.push(*byte),
        _ => {
            out.push(alloy_rlp::EMPTY_STRING_CODE + stripped.len() as u8);
            out.extend_from_slice(stripped);
        }
    }
}

/// Decodes a compact RLP string into a left-padded 32-byte word.
fn decode_bytes32_compact(enc: &mut &[u8]) -> DecodeResult<B256> {
    let Some((&first, rest)) = enc.split_first() else {
        return Err(DecodeError::InputTooShort);
    };
    if first < 0x80 {
        *enc = rest;
        let mut out = B256::ZERO;
        out.0[31] = first;
        return Ok(out);
    }
    if first >= 0xC0 {
        return Err(DecodeError::UnexpectedList);
    }
    // Slot values are at most 32 bytes, so only short strings are legal.
    let len = (first - alloy_rlp::EMPTY_STRING_CODE) as usize;
    if len > 32 {
        return Err(DecodeError::UnexpectedLength);
    }
    if rest.len() < len {
        return Err(DecodeError::InputTooShort);
    }
    let mut out = B256::ZERO;
    out.0[32 - len..].copy_from_slice(&rest[..len]);
    *enc = &rest[len..];
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;
    use proptest::prelude::*;

    fn slot(value: u64) -> B256 {
        B256::from(U256::from(value).to_be_bytes::<32>())
    }

    #[test]
    fn test_all_zero_page() {
        let page = StoragePage::default();
        assert!(page.is_empty());
        assert_eq!(page.encode(), vec![0x00]);

        let mut enc: &[u8] = &[0x00];
        assert_eq!(StoragePage::decode(&mut enc).unwrap(), page);
        assert!(enc.is_empty());
    }

    #[test]
    fn test_single_leading_slot() {
        let mut page = StoragePage::default();
        page.slots[0] = slot(1);
        assert_eq!(page.encode(), vec![0x80, 0x01, 0x00]);
    }

    #[test]
    fn test_zero_run_then_data() {
        let mut page = StoragePage::default();
        page.slots[3] = slot(0xAB);
        assert_eq!(page.encode(), vec![0x03, 0x80, 0x81, 0xAB, 0x00]);
    }

    #[test]
    fn test_mixed_runs() {
        let mut page = StoragePage::default();
        page.slots[0] = slot(1);
        page.slots[3] = slot(0xAB);
        assert_eq!(page.encode(), vec![0x80, 0x01, 0x02, 0x80, 0x81, 0xAB, 0x00]);

        let mut enc: &[u8] = &[0x80, 0x01, 0x02, 0x80, 0x81, 0xAB, 0x00];
        assert_eq!(StoragePage::decode(&mut enc).unwrap(), page);
    }

    #[test]
    fn test_full_page_has_no_terminator() {
        let mut page = StoragePage::default();
        for i in 0..PAGE_SLOTS {
            page.slots[i] = slot(i as u64 + 1);
        }
        let encoded = page.encode();
        assert_eq!(encoded[0], 0x80 | (PAGE_SLOTS as u8 - 1));
        assert_eq!(encoded.len(), 1 + PAGE_SLOTS);

        let mut enc: &[u8] = &encoded;
        assert_eq!(StoragePage::decode(&mut enc).unwrap(), page);
    }

    #[test]
    fn test_decode_truncated_input() {
        let mut enc: &[u8] = &[0x80];
        assert_eq!(StoragePage::decode(&mut enc), Err(DecodeError::InputTooShort));

        let mut enc: &[u8] = &[0x03];
        assert_eq!(StoragePage::decode(&mut enc), Err(DecodeError::InputTooShort));
    }

    #[test]
    fn test_decode_run_crossing_page() {
        // Data-run of 16 starting at offset 3 would cross the boundary.
        let mut enc: &[u8] = &[0x03, 0x8F, 0x01];
        assert_eq!(StoragePage::decode(&mut enc), Err(DecodeError::InputTooLong));
    }

    #[test]
    fn test_early_terminator_is_canonical() {
        // 0x00 before all slots are accounted for means "remaining zero".
        let mut enc: &[u8] = &[0x80, 0x01, 0x00];
        let page = StoragePage::decode(&mut enc).unwrap();
        assert_eq!(page.slots[0], slot(1));
        assert!(page.slots[1..].iter().all(|s| s.is_zero()));
    }

    #[test]
    fn test_page_key_and_offset() {
        let key = b256!("00000000000000000000000000000000000000000000000000000000000001a7");
        assert_eq!(
            StoragePage::page_key(&key),
            b256!("000000000000000000000000000000000000000000000000000000000000001a")
        );
        assert_eq!(StoragePage::slot_offset(&key), 0x7);
    }

    proptest! {
        #[test]
        fn proptest_roundtrip(values in prop::collection::vec(any::<u64>(), PAGE_SLOTS)) {
            let mut page = StoragePage::default();
            for (i, value) in values.iter().enumerate() {
                page.slots[i] = slot(*value);
            }
            let encoded = page.encode();
            let mut enc: &[u8] = &encoded;
            prop_assert_eq!(StoragePage::decode(&mut enc).unwrap(), page);
            prop_assert!(enc.is_empty());
        }
    }
}
