//! Skip-list segment writer
//!
//! Segments are written into a pre-sized word array (normally a writable map of
//! the output file). The layout of a segment depends only on its start position
//! and record count, so `SegmentLayout::plan` doubles as the size estimator used
//! to allocate the output file in one shot.

use super::constants::*;
use crate::{Result, StorageError};

/// Placement of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    /// Byte offset of the block header
    pub offset: u64,
    /// Index of the first record (into the segment's records)
    pub first: usize,
    /// Records in this block
    pub count: usize,
    /// Forward pointers written
    pub pointers: usize,
}

/// Placement of a whole segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Byte offset the segment starts at (after any padding)
    pub start: u64,
    pub blocks: Vec<BlockPlan>,
    /// Byte offset one past the segment's last word
    pub end: u64,
}

impl SegmentLayout {
    /// Plan a segment of `n` records written at byte position `pos`
    pub fn plan(pos: u64, n: usize) -> Self {
        debug_assert!(pos % 8 == 0);
        let block_size = BLOCK_SIZE as u64;

        let mut start = pos;
        let remainder = block_size - pos % block_size;
        if remainder < block_size && (remainder as usize) < MIN_TRUNCATED_BLOCK_SIZE {
            start = pos + remainder;
        }
        let root_size = (block_size - start % block_size) as usize;

        let root_pointers = num_pointers_for_root_block(n, root_size);
        let mut counts = Vec::with_capacity(1);
        let root_count = n.min(root_block_capacity(root_size, root_pointers));
        counts.push(root_count);

        let mut placed = root_count;
        let mut block_idx: u32 = 1;
        while placed < n {
            let count = (n - placed).min(non_root_block_capacity(block_idx));
            counts.push(count);
            placed += count;
            block_idx += 1;
        }

        let num_blocks = counts.len();
        let mut blocks = Vec::with_capacity(num_blocks);
        let mut first = 0;
        for (b, &count) in counts.iter().enumerate() {
            let reserved = if b == 0 {
                root_pointers
            } else {
                num_pointers_for_block(b as u32)
            };
            let offset = if b == 0 {
                start
            } else {
                start + root_size as u64 + (b as u64 - 1) * block_size
            };
            blocks.push(BlockPlan {
                offset,
                first,
                count,
                pointers: reserved.min(valid_pointers(b, num_blocks)),
            });
            first += count;
        }

        let end = match blocks.last() {
            Some(last) => {
                last.offset + 8 * (HEADER_WORDS + last.pointers + RECORD_SIZE * last.count) as u64
            }
            None => start,
        };

        Self { start, blocks, end }
    }

    /// Bytes consumed from `pos`, padding included
    pub fn size_from(&self, pos: u64) -> u64 {
        self.end - pos
    }
}

/// Bytes needed to write `n` records at `pos`
pub fn estimate_size(pos: u64, n: usize) -> u64 {
    SegmentLayout::plan(pos, n).size_from(pos)
}

/// Writes segments into a word array
pub struct SkipListWriter<'a> {
    out: &'a mut [u64],
    /// Current byte position
    pos: u64,
}

impl<'a> SkipListWriter<'a> {
    pub fn new(out: &'a mut [u64], pos: u64) -> Self {
        Self { out, pos }
    }

    /// Current byte position (where the next segment will be planned from)
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Write one segment of interleaved `(key, value)` pairs.
    ///
    /// Keys must be strictly ascending; this is checked in debug builds only.
    /// Returns the byte offset at which the segment starts, which is what the
    /// word directory records.
    pub fn write_segment(&mut self, records: &[u64]) -> Result<u64> {
        if records.len() % RECORD_SIZE != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "record slice of {} words is not a whole number of records",
                records.len()
            )));
        }
        let n = records.len() / RECORD_SIZE;
        debug_assert!(keys_ascending(records), "skip-list input must be sorted by key");

        let layout = SegmentLayout::plan(self.pos, n);
        if layout.end > (self.out.len() * 8) as u64 {
            return Err(StorageError::ResourceExhausted(format!(
                "segment ends at byte {} but output holds {} bytes",
                layout.end,
                self.out.len() * 8
            )));
        }

        // padding between the previous segment and this one
        let pad_from = (self.pos / 8) as usize;
        let pad_to = (layout.start / 8) as usize;
        self.out[pad_from..pad_to].fill(0);

        let last = layout.blocks.len() - 1;
        for (b, block) in layout.blocks.iter().enumerate() {
            let header = BlockHeader {
                num_records: block.count,
                num_pointers: block.pointers,
                flags: if b == last { FLAG_END_BLOCK } else { 0 },
                aux: if b == 0 { n as u64 } else { b as u64 },
            };

            let mut w = (block.offset / 8) as usize;
            self.out[w..w + HEADER_WORDS].copy_from_slice(&header.encode());
            w += HEADER_WORDS;

            for i in 0..block.pointers {
                let target = &layout.blocks[b + (1usize << i)];
                let max_key_idx = target.first + target.count - 1;
                self.out[w + i] = records[max_key_idx * RECORD_SIZE];
            }
            w += block.pointers;

            let recs = &records[block.first * RECORD_SIZE..(block.first + block.count) * RECORD_SIZE];
            for (i, rec) in recs.chunks_exact(RECORD_SIZE).enumerate() {
                self.out[w + i] = rec[0];
                self.out[w + block.count + i] = rec[1];
            }
        }

        self.pos = layout.end;
        Ok(layout.start)
    }
}

/// True if the keys of interleaved `(key, value)` records strictly ascend
pub fn keys_ascending(records: &[u64]) -> bool {
    records
        .chunks_exact(RECORD_SIZE)
        .zip(records.chunks_exact(RECORD_SIZE).skip(1))
        .all(|(a, b)| a[0] < b[0])
}
