//! revdex: reverse-index storage engine
//!
//! Stores, for every indexed term, the sorted list of documents containing it,
//! and serves lookups and intersection scans against it under concurrent load.
//!
//! ## Architecture
//! - Storage: little-endian word arrays (heap or mmap), posting journals
//! - Format: 64 KiB skip-list blocks for postings, same format for the word directory
//! - Cache: fixed-size buffer pool with pin states and background read-ahead
//! - Construction: journal -> preindex -> pairwise merge -> finalize, resumable per batch
//! - Query: reader façade with entry sources and retain/reject filter steps

pub mod cache;
pub mod config;
pub mod index;
pub mod storage;

mod error;

pub use cache::{BufferPool, BufferPoolStats};
pub use config::{BufferPoolConfig, ConstructionConfig, IndexConfig, IndexPaths};
pub use error::{Result, ResultExt, StorageError};
pub use index::{
    verify_index, DocIdRewriter, DocumentId, EntrySource, IdentityRewriter, IndexConstructor,
    LongQueryBuffer, QueryFilterStep, ReverseIndexReader, SearchBudget,
};
pub use storage::{JournalReader, JournalWriter};
