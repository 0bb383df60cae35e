//! Skip-list block layout
//!
//! ```text
//! block:  [header: 2 words][forward pointers: fc words][keys: n words][values: n words]
//!
//! header word 0:  bits  0..32  n      records in this block
//!                 bits 32..48  fc     forward pointers in this block
//!                 bits 48..56  flags  FLAG_END_BLOCK on the last block
//! header word 1:  root block:     total records in the segment
//!                 other blocks:   block index within the segment
//! ```
//!
//! Pointer `i` of block `b` refers to block `b + 2^i` and holds that block's
//! largest key. A segment's root block starts wherever the previous segment
//! ended (if enough of the physical block is left), every later block starts on
//! a physical block boundary, and the last block is written only as far as its
//! data reaches.

/// Physical block size in bytes
pub const BLOCK_SIZE: usize = 65536;

/// Words per physical block
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 8;

/// Header size in words
pub const HEADER_WORDS: usize = 2;

/// Words per record (key + value)
pub const RECORD_SIZE: usize = 2;

/// Below this many bytes left in a physical block, a new segment starts at the next boundary
pub const MIN_TRUNCATED_BLOCK_SIZE: usize = if BLOCK_SIZE / 4 > 512 { BLOCK_SIZE / 4 } else { 512 };

/// Set on the last block of a segment
pub const FLAG_END_BLOCK: u8 = 1 << 0;

/// Pointer slots reserved by a non-root block
///
/// Block indexes are u32, so a block never reserves more than 31.
#[inline]
pub fn num_pointers_for_block(block_idx: u32) -> usize {
    (block_idx.trailing_zeros() as usize).max(16)
}

/// Largest number of pointer slots any non-root block reserves
pub const MAX_NON_ROOT_POINTERS: usize = 31;

/// Upper bound on pointers a decoded header may claim; pointer i jumps 2^i blocks
pub const MAX_DECODED_POINTERS: usize = 63;

/// Record capacity of non-root block `block_idx`
#[inline]
pub fn non_root_block_capacity(block_idx: u32) -> usize {
    (BLOCK_WORDS - HEADER_WORDS - num_pointers_for_block(block_idx)) / RECORD_SIZE
}

/// Capacity lower bound over all non-root blocks
pub const MIN_NON_ROOT_CAPACITY: usize =
    (BLOCK_WORDS - HEADER_WORDS - MAX_NON_ROOT_POINTERS) / RECORD_SIZE;

/// Pointer slots reserved by a root block of `root_size` bytes holding a segment of `n` records.
///
/// Zero when everything fits in the root; otherwise enough pointers to reach
/// the last block of the segment from the root.
pub fn num_pointers_for_root_block(n: usize, root_size: usize) -> usize {
    let root_words = root_size / 8;
    let capacity_without_pointers = (root_words - HEADER_WORDS) / RECORD_SIZE;
    if n <= capacity_without_pointers {
        return 0;
    }
    let max_extra_blocks = n.div_ceil(MIN_NON_ROOT_CAPACITY);
    bit_length(max_extra_blocks as u64)
}

/// Record capacity of a root block of `root_size` bytes with `pointers` reserved slots
#[inline]
pub fn root_block_capacity(root_size: usize, pointers: usize) -> usize {
    (root_size / 8 - HEADER_WORDS - pointers) / RECORD_SIZE
}

/// Number of pointers block `b` actually carries in a segment of `num_blocks` blocks:
/// one per `i` with `b + 2^i` still inside the segment.
#[inline]
pub fn valid_pointers(block_idx: usize, num_blocks: usize) -> usize {
    let ahead = num_blocks - 1 - block_idx;
    bit_length(ahead as u64)
}

/// Position of the highest set bit plus one (0 for 0)
#[inline]
pub fn bit_length(v: u64) -> usize {
    (64 - v.leading_zeros()) as usize
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub num_records: usize,
    pub num_pointers: usize,
    pub flags: u8,
    /// Root: segment size; other blocks: block index
    pub aux: u64,
}

impl BlockHeader {
    pub fn encode(&self) -> [u64; HEADER_WORDS] {
        let word0 = (self.num_records as u64 & 0xFFFF_FFFF)
            | ((self.num_pointers as u64 & 0xFFFF) << 32)
            | ((self.flags as u64) << 48);
        [word0, self.aux]
    }

    pub fn decode(words: &[u64]) -> Self {
        let word0 = words[0];
        Self {
            num_records: (word0 & 0xFFFF_FFFF) as usize,
            num_pointers: ((word0 >> 32) & 0xFFFF) as usize,
            flags: ((word0 >> 48) & 0xFF) as u8,
            aux: words[1],
        }
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.flags & FLAG_END_BLOCK != 0
    }

    /// Words occupied by this block on disk
    #[inline]
    pub fn data_words(&self) -> usize {
        HEADER_WORDS + self.num_pointers + RECORD_SIZE * self.num_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_counts() {
        assert_eq!(num_pointers_for_block(1), 16);
        assert_eq!(num_pointers_for_block(1 << 20), 20);
        assert_eq!(num_pointers_for_block(1 << 31), 31);
        assert_eq!(valid_pointers(0, 1), 0);
        assert_eq!(valid_pointers(0, 2), 1);
        assert_eq!(valid_pointers(0, 5), 3); // 1, 2, 4 ahead
        assert_eq!(valid_pointers(3, 5), 1);
    }

    #[test]
    fn test_root_pointers() {
        assert_eq!(num_pointers_for_root_block(0, BLOCK_SIZE), 0);
        let full = root_block_capacity(BLOCK_SIZE, 0);
        assert_eq!(num_pointers_for_root_block(full, BLOCK_SIZE), 0);
        assert!(num_pointers_for_root_block(full + 1, BLOCK_SIZE) >= 1);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = BlockHeader {
            num_records: 4087,
            num_pointers: 17,
            flags: FLAG_END_BLOCK,
            aux: 123456,
        };
        let decoded = BlockHeader::decode(&header.encode());
        assert_eq!(decoded, header);
        assert!(decoded.is_end());
        assert_eq!(decoded.data_words(), 2 + 17 + 2 * 4087);
    }

    #[test]
    fn test_minimum_truncated_block() {
        assert_eq!(MIN_TRUNCATED_BLOCK_SIZE, 16384);
        // a truncated root always fits its header, pointers and at least one record
        assert!(root_block_capacity(MIN_TRUNCATED_BLOCK_SIZE, 64) > 0);
    }
}
