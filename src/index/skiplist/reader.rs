//! Skip-list segment cursor
//!
//! A cursor only moves forward. Lookups for ascending keys reuse the block the
//! previous lookup ended in, so intersecting a sorted candidate list with a
//! segment costs one pass over the blocks that can contain candidates.

use super::constants::*;
use crate::storage::LongSource;
use crate::{Result, StorageError};
use std::sync::Arc;

struct LoadedBlock {
    idx: usize,
    offset: u64,
    header: BlockHeader,
    pointers: Vec<u64>,
    keys: Vec<u64>,
    values: Option<Vec<u64>>,
}

impl LoadedBlock {
    fn last_key(&self) -> Option<u64> {
        self.keys.last().copied()
    }

    fn values_offset(&self) -> u64 {
        self.offset + 8 * (HEADER_WORDS + self.header.num_pointers + self.header.num_records) as u64
    }
}

/// Forward cursor over one segment
pub struct SkipListReader {
    source: Arc<dyn LongSource>,
    segment_offset: u64,
    root_size: u64,
    block: Option<LoadedBlock>,
    /// Record position inside the current block
    pos: usize,
    at_end: bool,
}

impl SkipListReader {
    pub fn new(source: Arc<dyn LongSource>, segment_offset: u64) -> Self {
        let block_size = BLOCK_SIZE as u64;
        Self {
            source,
            segment_offset,
            root_size: block_size - segment_offset % block_size,
            block: None,
            pos: 0,
            at_end: false,
        }
    }

    /// Total records in the segment, from the root header alone
    pub fn estimate_size(&self) -> Result<u64> {
        let mut header = [0u64; HEADER_WORDS];
        self.source.read_words(self.segment_offset, &mut header)?;
        Ok(BlockHeader::decode(&header).aux)
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    fn block_offset(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.segment_offset
        } else {
            self.segment_offset + self.root_size + (idx as u64 - 1) * BLOCK_SIZE as u64
        }
    }

    fn load_block(&mut self, idx: usize) -> Result<()> {
        let offset = self.block_offset(idx);
        let mut header_words = [0u64; HEADER_WORDS];
        self.source.read_words(offset, &mut header_words)?;
        let header = BlockHeader::decode(&header_words);

        let capacity_words = if idx == 0 { self.root_size } else { BLOCK_SIZE as u64 } / 8;
        if header.data_words() as u64 > capacity_words {
            return Err(StorageError::Corruption(format!(
                "block {} at {} claims {} words, more than its {} word capacity",
                idx,
                offset,
                header.data_words(),
                capacity_words
            )));
        }

        if header.num_pointers > MAX_DECODED_POINTERS {
            return Err(StorageError::Corruption(format!(
                "block {} at {} claims {} forward pointers",
                idx, offset, header.num_pointers
            )));
        }

        let mut body = vec![0u64; header.num_pointers + header.num_records];
        self.source.read_words(offset + 8 * HEADER_WORDS as u64, &mut body)?;
        let keys = body.split_off(header.num_pointers);

        self.block = Some(LoadedBlock {
            idx,
            offset,
            header,
            pointers: body,
            keys,
            values: None,
        });
        self.pos = 0;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.block.is_none() {
            self.load_block(0)?;
        }
        Ok(())
    }

    /// Move to the next block; false once the end block is exhausted
    fn advance_block(&mut self) -> Result<bool> {
        let next = match &self.block {
            Some(block) if block.header.is_end() => {
                self.at_end = true;
                return Ok(false);
            }
            Some(block) => block.idx + 1,
            None => 0,
        };
        self.load_block(next)?;
        Ok(true)
    }

    /// Position the cursor on the first record with key >= `key`.
    ///
    /// Returns whether that record's key equals `key`. Keys must be sought in
    /// ascending order; seeking backwards stays at the current position.
    pub fn seek(&mut self, key: u64) -> Result<bool> {
        if self.at_end {
            return Ok(false);
        }
        self.ensure_loaded()?;

        loop {
            let (jump, in_block) = {
                let Some(block) = self.block.as_ref() else {
                    return Err(StorageError::Invariant("cursor lost its block".into()));
                };
                match block.last_key() {
                    Some(last) if key <= last && self.pos < block.keys.len() => {
                        let rest = &block.keys[self.pos..];
                        let found = rest.partition_point(|&k| k < key);
                        self.pos += found;
                        (0, true)
                    }
                    _ => {
                        // Largest pointer whose target block still ends below `key`
                        let mut jump = 1;
                        for i in (0..block.pointers.len()).rev() {
                            if block.pointers[i] < key {
                                jump = 1usize << i;
                                break;
                            }
                        }
                        (jump, false)
                    }
                }
            };

            if in_block {
                let block = self.block.as_ref().ok_or_else(|| {
                    StorageError::Invariant("cursor lost its block".into())
                })?;
                return Ok(block.keys[self.pos] == key);
            }

            let (idx, is_end) = match &self.block {
                Some(block) => (block.idx, block.header.is_end()),
                None => return Err(StorageError::Invariant("cursor lost its block".into())),
            };
            if is_end {
                self.at_end = true;
                return Ok(false);
            }
            self.load_block(idx + jump)?;
        }
    }

    /// Append up to `limit` keys from the cursor position to `out`, advancing past them
    pub fn read_keys(&mut self, out: &mut Vec<u64>, limit: usize) -> Result<usize> {
        if self.at_end {
            return Ok(0);
        }
        self.ensure_loaded()?;

        let mut read = 0;
        while read < limit {
            let exhausted = match &self.block {
                Some(block) => {
                    let take = (block.keys.len() - self.pos).min(limit - read);
                    out.extend_from_slice(&block.keys[self.pos..self.pos + take]);
                    self.pos += take;
                    read += take;
                    self.pos >= block.keys.len()
                }
                None => true,
            };
            if exhausted && !self.advance_block()? {
                break;
            }
        }
        Ok(read)
    }

    /// Append up to `limit` `(key, value)` records, advancing past them
    pub fn read_entries(&mut self, out: &mut Vec<(u64, u64)>, limit: usize) -> Result<usize> {
        if self.at_end {
            return Ok(0);
        }
        self.ensure_loaded()?;

        let mut read = 0;
        while read < limit {
            self.load_values()?;
            let exhausted = match &self.block {
                Some(block) => {
                    let values = block.values.as_deref().unwrap_or(&[]);
                    let take = (block.keys.len() - self.pos).min(limit - read);
                    for i in self.pos..self.pos + take {
                        out.push((block.keys[i], values[i]));
                    }
                    self.pos += take;
                    read += take;
                    self.pos >= block.keys.len()
                }
                None => true,
            };
            if exhausted && !self.advance_block()? {
                break;
            }
        }
        Ok(read)
    }

    fn load_values(&mut self) -> Result<()> {
        let source = &self.source;
        if let Some(block) = self.block.as_mut() {
            if block.values.is_none() {
                let mut values = vec![0u64; block.header.num_records];
                source.read_words(block.values_offset(), &mut values)?;
                block.values = Some(values);
            }
        }
        Ok(())
    }

    /// Value of the record under the cursor (after a successful `seek`)
    fn current_value(&self) -> Result<u64> {
        let block = self
            .block
            .as_ref()
            .ok_or_else(|| StorageError::Invariant("no block loaded".into()))?;
        if let Some(values) = &block.values {
            return Ok(values[self.pos]);
        }
        self.source.read_word(block.values_offset() + 8 * self.pos as u64)
    }

    /// Values for ascending `keys`; `None` where a key is absent
    pub fn get_values(&mut self, keys: &[u64]) -> Result<Vec<Option<u64>>> {
        let mut values = Vec::with_capacity(keys.len());
        for &key in keys {
            if self.seek(key)? {
                values.push(Some(self.current_value()?));
            } else {
                values.push(None);
            }
        }
        Ok(values)
    }

    /// Keep only the ascending `candidates` present in the segment
    pub fn retain_present(&mut self, candidates: &mut Vec<u64>) -> Result<()> {
        let mut kept = 0;
        for i in 0..candidates.len() {
            let key = candidates[i];
            if self.seek(key)? {
                candidates[kept] = key;
                kept += 1;
            }
        }
        candidates.truncate(kept);
        Ok(())
    }

    /// Drop the ascending `candidates` present in the segment
    pub fn reject_present(&mut self, candidates: &mut Vec<u64>) -> Result<()> {
        let mut kept = 0;
        for i in 0..candidates.len() {
            let key = candidates[i];
            if !self.seek(key)? {
                candidates[kept] = key;
                kept += 1;
            }
        }
        candidates.truncate(kept);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::skiplist::writer::{estimate_size, SkipListWriter};
    use crate::storage::LongArray;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn records_for(keys: &[u64]) -> Vec<u64> {
        keys.iter().flat_map(|&k| [k, k.wrapping_mul(31) + 7]).collect()
    }

    /// Write one segment at `pos` into a fresh array; returns (source, segment start)
    fn write_one(keys: &[u64], pos: u64) -> (Arc<dyn LongSource>, u64) {
        let records = records_for(keys);
        let size = pos + estimate_size(pos, keys.len());
        let mut out = vec![0u64; (size / 8) as usize];
        let mut writer = SkipListWriter::new(&mut out, pos);
        let start = writer.write_segment(&records).unwrap();
        assert_eq!(writer.position(), size);
        let source: Arc<dyn LongSource> = Arc::new(LongArray::from_vec(out));
        (source, start)
    }

    fn read_all(source: Arc<dyn LongSource>, start: u64) -> Vec<(u64, u64)> {
        let mut reader = SkipListReader::new(source, start);
        let mut out = Vec::new();
        while !reader.is_at_end() {
            if reader.read_entries(&mut out, 1000).unwrap() == 0 {
                break;
            }
        }
        out
    }

    fn check_roundtrip(n: usize, pos: u64) {
        let keys: Vec<u64> = (0..n as u64).map(|i| i * 3 + 1).collect();
        let (source, start) = write_one(&keys, pos);

        let reader = SkipListReader::new(source.clone(), start);
        assert_eq!(reader.estimate_size().unwrap(), n as u64);

        let entries = read_all(source.clone(), start);
        let expected: Vec<(u64, u64)> = records_for(&keys)
            .chunks_exact(2)
            .map(|r| (r[0], r[1]))
            .collect();
        assert_eq!(entries, expected, "roundtrip of {} records at {}", n, pos);

        let mut keys_out = Vec::new();
        let mut reader = SkipListReader::new(source, start);
        while reader.read_keys(&mut keys_out, 777).unwrap() > 0 {}
        assert_eq!(keys_out, keys);
    }

    #[test]
    fn test_roundtrip_sizes() {
        let root_cap = root_block_capacity(BLOCK_SIZE, 0);
        let block_cap = non_root_block_capacity(1);
        for n in [0, 1, 2, root_cap - 1, root_cap, root_cap + 1, root_cap + block_cap, 50_000] {
            check_roundtrip(n, 0);
        }
    }

    #[test]
    fn test_roundtrip_truncated_root() {
        let pos = (BLOCK_SIZE - MIN_TRUNCATED_BLOCK_SIZE) as u64;
        for n in [1, 1000, 1023, 1024, 10_000] {
            check_roundtrip(n, pos);
        }
        // padded start
        check_roundtrip(500, (BLOCK_SIZE - 64) as u64);
    }

    #[test]
    fn test_seek_and_values() {
        let keys: Vec<u64> = (0..30_000u64).map(|i| i * 2).collect();
        let (source, start) = write_one(&keys, 0);
        let mut reader = SkipListReader::new(source, start);

        assert!(reader.seek(0).unwrap());
        assert!(!reader.seek(1).unwrap());
        assert!(reader.seek(20_000).unwrap());
        assert!(reader.seek(59_998).unwrap());
        assert!(!reader.seek(59_999).unwrap());
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_get_values_across_blocks() {
        let keys: Vec<u64> = (0..40_000u64).map(|i| i * 5).collect();
        let (source, start) = write_one(&keys, 0);
        let mut reader = SkipListReader::new(source, start);

        let wanted = [0, 3, 5, 25_000, 100_000, 199_995, 200_000];
        let values = reader.get_values(&wanted).unwrap();
        assert_eq!(values[0], Some(7));
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(5 * 31 + 7));
        assert_eq!(values[3], Some(25_000 * 31 + 7));
        assert_eq!(values[4], Some(100_000 * 31 + 7));
        assert_eq!(values[5], Some(199_995 * 31 + 7));
        assert_eq!(values[6], None);
    }

    #[test]
    fn test_retain_and_reject_randomized() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<u64> = (0..25_000).map(|_| rng.gen_range(0..200_000)).collect();
        keys.sort_unstable();
        keys.dedup();
        let (source, start) = write_one(&keys, 0);

        let mut candidates: Vec<u64> = (0..2_000).map(|_| rng.gen_range(0..210_000)).collect();
        candidates.sort_unstable();
        candidates.dedup();

        let expected_retained: Vec<u64> = candidates
            .iter()
            .copied()
            .filter(|c| keys.binary_search(c).is_ok())
            .collect();
        let expected_rejected: Vec<u64> = candidates
            .iter()
            .copied()
            .filter(|c| keys.binary_search(c).is_err())
            .collect();

        let mut retained = candidates.clone();
        SkipListReader::new(source.clone(), start)
            .retain_present(&mut retained)
            .unwrap();
        assert_eq!(retained, expected_retained);

        let mut rejected = candidates;
        SkipListReader::new(source, start)
            .reject_present(&mut rejected)
            .unwrap();
        assert_eq!(rejected, expected_rejected);
    }

    #[test]
    fn test_corrupt_pointer_count_rejected() {
        let keys: Vec<u64> = (0..10).collect();
        let records = records_for(&keys);
        let mut out = vec![0u64; (estimate_size(0, keys.len()) / 8) as usize];
        SkipListWriter::new(&mut out, 0).write_segment(&records).unwrap();
        // fc field of the root header
        out[0] = (out[0] & !(0xFFFF << 32)) | (100 << 32);
        let source: Arc<dyn LongSource> = Arc::new(LongArray::from_vec(out));

        let mut reader = SkipListReader::new(source, 0);
        let err = reader.seek(1_000).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn test_many_segments_in_one_file() {
        // Back-to-back segments of mixed sizes, like a finalized postings file
        let sizes = [3usize, 5000, 1, 0, 9000, 2, 700, 4095, 12];
        let mut total = 0u64;
        for &n in &sizes {
            total += estimate_size(total, n);
        }
        let mut out = vec![0u64; (total / 8) as usize];
        let mut starts = Vec::new();
        {
            let mut writer = SkipListWriter::new(&mut out, 0);
            for (s, &n) in sizes.iter().enumerate() {
                let keys: Vec<u64> = (0..n as u64).map(|i| i * 10 + s as u64).collect();
                starts.push(writer.write_segment(&records_for(&keys)).unwrap());
            }
            assert_eq!(writer.position(), total);
        }

        let source: Arc<dyn LongSource> = Arc::new(LongArray::from_vec(out));
        for (s, &n) in sizes.iter().enumerate() {
            let entries = read_all(source.clone(), starts[s]);
            assert_eq!(entries.len(), n);
            for (i, (k, _)) in entries.iter().enumerate() {
                assert_eq!(*k, i as u64 * 10 + s as u64);
            }
        }
    }
}
