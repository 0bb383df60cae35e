//! Storage layer
//!
//! Word arrays over heap or mapped files, the posting journal, unbuffered file
//! access for the buffer pool, and file checksums for construction checkpoints.

pub mod array;
pub mod checksum;
pub mod direct_io;
pub mod journal;

pub use array::{LongArray, LongSource, WORD_SIZE};
pub use checksum::{ChecksumError, FileChecksum};
pub use journal::{JournalEntry, JournalReader, JournalWriter};
