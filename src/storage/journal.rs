//! Posting journal
//!
//! Append-only record of `(term_id, document_id, metadata)` triples in the order
//! documents were processed. Construction reads it sequentially, twice.
//!
//! ## File Format
//! ```text
//! [magic: 8 bytes "PJRNL\0\0\x01"] [record count: u64 LE]
//! [term_id: u64][document_id: u64][metadata: u64]   × count
//! ```

use crate::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes, last byte is the format version
const JOURNAL_MAGIC: [u8; 8] = *b"PJRNL\0\0\x01";

const HEADER_SIZE: u64 = 16;

/// Bytes per record
pub const JOURNAL_RECORD_SIZE: u64 = 24;

/// One journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalEntry {
    pub term_id: u64,
    pub document_id: u64,
    pub metadata: u64,
}

impl JournalEntry {
    pub fn new(term_id: u64, document_id: u64, metadata: u64) -> Self {
        Self { term_id, document_id, metadata }
    }
}

/// Buffered journal writer; the file is only valid after `finish()`
pub struct JournalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    count: u64,
}

impl JournalWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::with_capacity(1 << 16, file);
        writer.write_all(&JOURNAL_MAGIC)?;
        // Count is backpatched on finish; u64::MAX marks an unfinished journal
        writer.write_all(&u64::MAX.to_le_bytes())?;
        Ok(Self { writer, path, count: 0 })
    }

    pub fn put(&mut self, term_id: u64, document_id: u64, metadata: u64) -> Result<()> {
        let mut record = [0u8; JOURNAL_RECORD_SIZE as usize];
        record[0..8].copy_from_slice(&term_id.to_le_bytes());
        record[8..16].copy_from_slice(&document_id.to_le_bytes());
        record[16..24].copy_from_slice(&metadata.to_le_bytes());
        self.writer.write_all(&record)?;
        self.count += 1;
        Ok(())
    }

    /// All `(term_id, metadata)` pairs of one document
    pub fn put_document(&mut self, document_id: u64, terms: &[(u64, u64)]) -> Result<()> {
        for &(term_id, metadata) in terms {
            self.put(term_id, document_id, metadata)?;
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Flush, write the record count and sync
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(JOURNAL_MAGIC.len() as u64))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.sync_all()?;
        Ok(self.path)
    }
}

/// Sequential journal reader
pub struct JournalReader {
    reader: BufReader<File>,
    remaining: u64,
    count: u64,
}

impl JournalReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(1 << 16, file);

        let mut header = [0u8; HEADER_SIZE as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| StorageError::CorruptedFile(path.to_path_buf()))?;
        if header[0..8] != JOURNAL_MAGIC {
            return Err(StorageError::CorruptedFile(path.to_path_buf()));
        }
        let count = u64::from_le_bytes(header[8..16].try_into().map_err(|_| {
            StorageError::CorruptedFile(path.to_path_buf())
        })?);
        // Unfinished journals and truncated tails are both rejected here
        let expected_len = count
            .checked_mul(JOURNAL_RECORD_SIZE)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE));
        if count == u64::MAX || expected_len != Some(file_len) {
            return Err(StorageError::CorruptedFile(path.to_path_buf()));
        }

        Ok(Self {
            reader,
            remaining: count,
            count,
        })
    }

    /// Total records in the journal
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut record = [0u8; JOURNAL_RECORD_SIZE as usize];
        if let Err(e) = self.reader.read_exact(&mut record) {
            self.remaining = 0;
            return Some(Err(e.into()));
        }
        let word = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&record[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes)
        };
        Some(Ok(JournalEntry::new(word(0), word(1), word(2))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch-0.journal");

        let mut writer = JournalWriter::create(&path).unwrap();
        writer.put_document(5, &[(1, 10), (2, 20)]).unwrap();
        writer.put(1, 3, 30).unwrap();
        assert_eq!(writer.len(), 3);
        writer.finish().unwrap();

        let reader = JournalReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);
        let entries: Vec<JournalEntry> = reader.map(|e| e.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                JournalEntry::new(1, 5, 10),
                JournalEntry::new(2, 5, 20),
                JournalEntry::new(1, 3, 30),
            ]
        );
    }

    #[test]
    fn test_unfinished_journal_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial.journal");

        let mut writer = JournalWriter::create(&path).unwrap();
        writer.put(1, 1, 1).unwrap();
        drop(writer); // never finished

        let err = JournalReader::open(&path).err().unwrap();
        assert!(matches!(err, StorageError::CorruptedFile(_)));
    }

    #[test]
    fn test_oversized_record_count_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("huge.journal");

        let mut bytes = JOURNAL_MAGIC.to_vec();
        bytes.extend_from_slice(&(1u64 << 62).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        std::fs::write(&path, bytes).unwrap();

        let err = JournalReader::open(&path).err().unwrap();
        assert!(matches!(err, StorageError::CorruptedFile(_)));
    }

    #[test]
    fn test_truncated_journal_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("truncated.journal");

        let mut writer = JournalWriter::create(&path).unwrap();
        writer.put(1, 1, 1).unwrap();
        writer.put(2, 2, 2).unwrap();
        writer.finish().unwrap();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(HEADER_SIZE + JOURNAL_RECORD_SIZE + 5).unwrap();
        assert!(JournalReader::open(&path).is_err());
    }

    #[test]
    fn test_empty_journal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.journal");
        JournalWriter::create(&path).unwrap().finish().unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        assert!(reader.is_empty());
        assert!(reader.next().is_none());
    }
}
